//! Borrower index provider (external interface §6.D).
//!
//! `getBorrowers(reserve) -> sequence<address>` is the only contract the
//! core depends on; the source behind it is pluggable (subgraph,
//! on-chain scanner, Redis cache, ...). This module provides the trait
//! and a BlockAnalitica-backed implementation.

use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

/// External interface §6.D: resolve the borrower set for a reserve.
#[async_trait]
pub trait BorrowerIndex: Send + Sync {
    /// Return borrowers with an open position touching `reserve`,
    /// either as collateral or as debt.
    async fn get_borrowers(&self, reserve: Address) -> Result<Vec<Address>>;
}

/// BlockAnalitica-backed borrower index.
///
/// BlockAnalitica exposes wallet-level position snapshots, not a
/// per-reserve borrower list, so `get_borrowers` pages through the
/// at-risk wallet set and filters client-side on the reserve address
/// appearing in `supplied_assets` or `borrowed_assets`.
#[derive(Debug, Clone)]
pub struct BlockAnaliticaBorrowerIndex {
    client: reqwest::Client,
    base_url: String,
    network: String,
    page_size: u32,
}

impl BlockAnaliticaBorrowerIndex {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://hyperlend-api.blockanalitica.com".to_string(),
            network: network.into(),
            page_size: 500,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_page(&self, endpoint: &str, page: u32) -> Result<WalletsResponse> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("network", self.network.as_str()),
                ("p", &page.to_string()),
                ("p_size", &self.page_size.to_string()),
            ])
            .send()
            .await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl BorrowerIndex for BlockAnaliticaBorrowerIndex {
    #[instrument(skip(self), fields(reserve = %reserve))]
    async fn get_borrowers(&self, reserve: Address) -> Result<Vec<Address>> {
        let mut borrowers = Vec::new();
        let mut page = 1;
        let mut total_available = u32::MAX;

        while borrowers.len() < total_available as usize {
            let data = self.fetch_page("wallets/bad-debt-wallets/", page).await?;
            total_available = data.count;
            let fetched = data.results.len();

            for wallet in &data.results {
                let touches_reserve = wallet
                    .supplied_assets
                    .iter()
                    .chain(wallet.borrowed_assets.iter())
                    .any(|a| a.address.parse::<Address>().map(|a| a == reserve).unwrap_or(false));
                if touches_reserve {
                    if let Ok(addr) = wallet.wallet_address.parse::<Address>() {
                        borrowers.push(addr);
                    }
                }
            }

            if fetched < self.page_size as usize {
                break;
            }
            page += 1;
        }

        debug!(reserve = %reserve, count = borrowers.len(), "Resolved borrower set for reserve");
        Ok(borrowers)
    }
}

#[derive(Debug, Deserialize)]
struct WalletsResponse {
    count: u32,
    results: Vec<WalletSnapshot>,
}

#[derive(Debug, Deserialize)]
struct WalletSnapshot {
    wallet_address: String,
    #[serde(default)]
    supplied_assets: Vec<WalletAssetRef>,
    #[serde(default)]
    borrowed_assets: Vec<WalletAssetRef>,
}

#[derive(Debug, Deserialize)]
struct WalletAssetRef {
    address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wallet_snapshot() {
        let json = r#"{
            "count": 1,
            "results": [{
                "wallet_address": "0x0af3318c4060eac02d50e140de2fb0e492b59ecb",
                "supplied_assets": [{"address": "0x9FDBdA0A5e284c32744D2f17Ee5c74B284993463"}],
                "borrowed_assets": [{"address": "0x5555555555555555555555555555555555555555"}]
            }]
        }"#;
        let data: WalletsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(data.count, 1);
        assert_eq!(data.results[0].borrowed_assets.len(), 1);
    }
}
