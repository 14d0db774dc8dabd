//! Multi-endpoint transaction broadcaster (component J).
//!
//! Fans the same signed transaction out to every configured endpoint,
//! rather than signing once and waiting synchronously on a single one.
//! It polls a
//! dedicated monitor endpoint for the receipt, and replaces the
//! transaction with a bumped fee if no receipt shows up within the
//! replacement delay. Nonce is captured exactly once before the first
//! attempt so replacements reuse it, seeded from the monitor endpoint's
//! pending count via [`Broadcaster::fetch_pending_nonce`]. Every
//! endpoint gets one provider built in `new` and reused for the
//! broadcaster's lifetime rather than redialed per attempt.

use crate::gas::{create_gas_strategy, GasParams, GasStrategy};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use futures::future::join_all;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Broadcaster tuning. Defaults mirror spec §4.J: three replacement
/// attempts, three seconds between them, +20% fee bump per
/// replacement.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub endpoints: Vec<String>,
    pub monitor_endpoint: String,
    pub replacement_cap: u32,
    pub replacement_delay: Duration,
    pub fee_bump_bps: u32,
    pub gas_limit: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            monitor_endpoint: String::new(),
            replacement_cap: 3,
            replacement_delay: Duration::from_secs(3),
            fee_bump_bps: 2000,
            gas_limit: 1_600_000,
        }
    }
}

/// Terminal state of a broadcast attempt, distinguishing "we don't
/// know yet" (Pending) from confirmed success/failure so the caller
/// can feed `AttemptHistory` the right status.
#[derive(Debug, Clone)]
pub enum BroadcastOutcome {
    Included {
        tx_hash: B256,
        block_number: u64,
        gas_used: u64,
    },
    Reverted {
        tx_hash: B256,
    },
    Pending {
        tx_hash: B256,
    },
}

pub struct Broadcaster {
    address: Address,
    chain_id: u64,
    config: BroadcasterConfig,
    gas_strategy: Box<dyn GasStrategy>,
    /// One signing provider per configured endpoint, built once in
    /// `new` so `broadcast` doesn't redial on every attempt.
    send_providers: Vec<DynProvider>,
    /// Read-only provider for the dedicated monitor endpoint, reused
    /// across every `poll_for_receipt` call.
    monitor_provider: DynProvider,
}

impl Broadcaster {
    pub fn new(
        private_key: &str,
        chain_id: u64,
        config: BroadcasterConfig,
        pricing_model: &str,
        default_gas_price_gwei: f64,
        max_gas_price_gwei: f64,
        priority_fee_gwei: Option<f64>,
    ) -> Result<Self> {
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str.parse()?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let gas_strategy = create_gas_strategy(
            pricing_model,
            default_gas_price_gwei,
            max_gas_price_gwei,
            priority_fee_gwei,
        );

        anyhow::ensure!(!config.endpoints.is_empty(), "broadcaster requires at least one endpoint");

        let send_providers = config
            .endpoints
            .iter()
            .map(|endpoint| {
                let url = endpoint.parse().with_context(|| format!("invalid broadcast endpoint {endpoint}"))?;
                Ok(ProviderBuilder::new().wallet(wallet.clone()).on_http(url).erased())
            })
            .collect::<Result<Vec<_>>>()?;
        let monitor_provider = ProviderBuilder::new()
            .on_http(config.monitor_endpoint.parse().context("invalid monitor endpoint")?)
            .erased();

        Ok(Self {
            address,
            chain_id,
            config,
            gas_strategy,
            send_providers,
            monitor_provider,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Pending-nonce for `address`, captured from the monitor endpoint
    /// so replacements and the executor's own nonce counter start from
    /// what the mempool actually sees rather than the last mined block.
    pub async fn fetch_pending_nonce(&self) -> Result<u64> {
        self.monitor_provider
            .get_transaction_count(self.address)
            .pending()
            .await
            .context("fetching pending nonce from monitor endpoint")
    }

    /// Broadcast `calldata` to `to`, fanning out to every configured
    /// endpoint, replacing with a bumped fee up to `replacement_cap`
    /// times if no receipt appears within `replacement_delay`.
    pub async fn broadcast(&self, to: Address, calldata: Bytes, nonce: u64) -> Result<BroadcastOutcome> {
        let mut params = self
            .gas_strategy
            .fetch_params(&self.config.endpoints[0])
            .await
            .context("fetching initial gas params")?;

        let mut last_tx_hash = B256::ZERO;
        let mut broadcast_ok_once = false;

        for attempt in 0..=self.config.replacement_cap {
            if attempt > 0 {
                params = bump_fee(&params, self.config.fee_bump_bps);
                info!(attempt, gas = params.effective_gas_price(), "replacing transaction with bumped fee");
            }

            let mut tx = TransactionRequest::default()
                .with_to(to)
                .with_input(calldata.clone())
                .with_value(U256::ZERO)
                .with_nonce(nonce)
                .with_gas_limit(self.config.gas_limit)
                .with_chain_id(self.chain_id);
            self.gas_strategy.apply_gas(&mut tx, &params);

            let sends = self.send_providers.iter().map(|provider| {
                let tx = tx.clone();
                async move { send_one(provider, tx).await }
            });
            let results = join_all(sends).await;
            let ok_count = results.iter().filter(|r| r.is_ok()).count();
            if let Some(Ok(hash)) = results.iter().find(|r| r.is_ok()) {
                last_tx_hash = *hash;
                broadcast_ok_once = true;
            }
            debug!(attempt, ok_count, total = results.len(), tx_hash = %last_tx_hash, "fanned out broadcast");

            if last_tx_hash != B256::ZERO {
                match self.poll_for_receipt(last_tx_hash, self.config.replacement_delay).await {
                    Some(outcome) => return Ok(outcome),
                    None => continue,
                }
            }
        }

        if broadcast_ok_once {
            Ok(BroadcastOutcome::Pending { tx_hash: last_tx_hash })
        } else {
            anyhow::bail!("all endpoints rejected the transaction after {} attempts", self.config.replacement_cap + 1)
        }
    }

    async fn poll_for_receipt(&self, tx_hash: B256, window: Duration) -> Option<BroadcastOutcome> {
        let deadline = tokio::time::Instant::now() + window;
        while tokio::time::Instant::now() < deadline {
            match self.monitor_provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    return Some(if receipt.status() {
                        BroadcastOutcome::Included {
                            tx_hash,
                            block_number: receipt.block_number.unwrap_or_default(),
                            gas_used: receipt.gas_used as u64,
                        }
                    } else {
                        BroadcastOutcome::Reverted { tx_hash }
                    });
                }
                Ok(None) => {
                    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                    let poll_interval = Duration::from_millis(250).min(remaining);
                    let _ = timeout(poll_interval, tokio::time::sleep(poll_interval)).await;
                }
                Err(e) => {
                    warn!(error = %e, "receipt poll failed, retrying");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
        }
        None
    }
}

fn bump_fee(params: &GasParams, bump_bps: u32) -> GasParams {
    let factor = |v: u128| v.saturating_mul(10_000 + bump_bps as u128) / 10_000;
    match params {
        GasParams::Legacy { gas_price } => GasParams::Legacy {
            gas_price: factor(*gas_price),
        },
        GasParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
            base_fee,
        } => GasParams::Eip1559 {
            max_fee_per_gas: factor(*max_fee_per_gas),
            max_priority_fee_per_gas: factor(*max_priority_fee_per_gas),
            base_fee: *base_fee,
        },
    }
}

async fn send_one(provider: &DynProvider, tx: TransactionRequest) -> Result<B256> {
    let pending = provider.send_transaction(tx).await?;
    Ok(*pending.tx_hash())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_fee_legacy_adds_twenty_percent() {
        let params = GasParams::Legacy { gas_price: 1_000_000_000 };
        let bumped = bump_fee(&params, 2000);
        match bumped {
            GasParams::Legacy { gas_price } => assert_eq!(gas_price, 1_200_000_000),
            _ => panic!("expected legacy"),
        }
    }

    #[test]
    fn test_bump_fee_eip1559_leaves_base_fee_untouched() {
        let params = GasParams::Eip1559 {
            max_fee_per_gas: 50_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            base_fee: 30_000_000_000,
        };
        let bumped = bump_fee(&params, 2000);
        match bumped {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee,
            } => {
                assert_eq!(max_fee_per_gas, 60_000_000_000);
                assert_eq!(max_priority_fee_per_gas, 2_400_000_000);
                assert_eq!(base_fee, 30_000_000_000);
            }
            _ => panic!("expected eip1559"),
        }
    }

    #[test]
    fn test_default_config_matches_spec_defaults() {
        let config = BroadcasterConfig::default();
        assert_eq!(config.replacement_cap, 3);
        assert_eq!(config.replacement_delay, Duration::from_secs(3));
        assert_eq!(config.fee_bump_bps, 2000);
    }
}
