//! Swap quote oracle (external interface §6.E).
//!
//! `getSwapCalldata({fromToken, toToken, amountRaw, fromAddress,
//! slippageBps}) -> {minOutRaw, data}`. `data` is opaque bytes forwarded
//! to the on-chain executor (§6.F); the core never inspects it.

use alloy::primitives::{Address, Bytes, U256};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Parameters for a swap quote request.
#[derive(Debug, Clone)]
pub struct SwapQuoteParams {
    pub from_token: Address,
    pub to_token: Address,
    pub amount_raw: U256,
    pub from_address: Address,
    pub slippage_bps: u16,
}

/// A swap quote: minimum acceptable output and opaque execution calldata.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub min_out_raw: U256,
    pub data: Bytes,
    /// Contract the calldata must be sent to (the aggregator's router).
    pub to: Address,
}

/// External interface §6.E.
#[async_trait]
pub trait SwapQuoteOracle: Send + Sync {
    async fn get_swap_calldata(&self, params: SwapQuoteParams) -> Result<SwapQuote>;
}

/// Liqd.ag-backed swap quote oracle.
#[derive(Debug, Clone)]
pub struct LiqdSwapOracle {
    client: reqwest::Client,
    base_url: String,
}

impl LiqdSwapOracle {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.liqd.ag".to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for LiqdSwapOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwapQuoteOracle for LiqdSwapOracle {
    #[instrument(skip(self), fields(from = %params.from_token, to = %params.to_token))]
    async fn get_swap_calldata(&self, params: SwapQuoteParams) -> Result<SwapQuote> {
        let url = format!("{}/v2/route", self.base_url);
        let from_str = format!("{:?}", params.from_token).to_lowercase();
        let to_str = format!("{:?}", params.to_token).to_lowercase();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("tokenIn", from_str.as_str()),
                ("tokenOut", to_str.as_str()),
                ("amountIn", &params.amount_raw.to_string()),
                ("slippageBps", &params.slippage_bps.to_string()),
                ("recipient", &format!("{:?}", params.from_address).to_lowercase()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("swap quote request failed: {} - {}", status, body);
        }

        let api_response: LiqdRouteResponse = response.json().await?;
        if !api_response.success {
            let msg = api_response.message.unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("swap quote API error: {}", msg);
        }
        let execution = api_response
            .execution
            .ok_or_else(|| anyhow::anyhow!("swap quote response missing execution block"))?;

        let min_out_raw: U256 = execution
            .details
            .min_amount_out
            .parse()
            .map_err(|_| anyhow::anyhow!("swap quote returned non-numeric minAmountOut"))?;
        let data: Bytes = execution
            .calldata
            .parse()
            .map_err(|_| anyhow::anyhow!("swap quote returned malformed calldata"))?;
        let to: Address = execution
            .to
            .parse()
            .map_err(|_| anyhow::anyhow!("swap quote returned malformed router address"))?;

        debug!(min_out_raw = %min_out_raw, to = %to, "Obtained swap quote");

        Ok(SwapQuote { min_out_raw, data, to })
    }
}

#[derive(Debug, Deserialize)]
struct LiqdRouteResponse {
    success: bool,
    execution: Option<LiqdExecution>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LiqdExecution {
    to: String,
    calldata: String,
    details: LiqdExecutionDetails,
}

#[derive(Debug, Deserialize)]
struct LiqdExecutionDetails {
    #[serde(rename = "minAmountOut")]
    min_amount_out: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_route_response() {
        let json = r#"{
            "success": true,
            "execution": {
                "to": "0x744489ee3d540777a66f2cf297479745e0852f7a",
                "calldata": "0xabcd",
                "details": {"minAmountOut": "495000000000000000"}
            }
        }"#;
        let resp: LiqdRouteResponse = serde_json::from_str(json).unwrap();
        assert!(resp.success);
        let exec = resp.execution.unwrap();
        assert_eq!(exec.details.min_amount_out, "495000000000000000");
    }

    #[test]
    fn rejects_api_error() {
        let json = r#"{"success": false, "message": "no route found"}"#;
        let resp: LiqdRouteResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.message.as_deref(), Some("no route found"));
    }
}
