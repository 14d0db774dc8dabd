//! Actionable-path orchestrator: the glue spec §2's control flow names
//! but never gives its own component letter — "the actionable path
//! consults K, asks I for candidates, obtains quotes from an external
//! swap oracle, picks the winner by net debt-token profit, and hands a
//! signed transaction to J."
//!
//! Grounded on `liquidator.rs`'s `execute_staged`/`build_and_execute`
//! shape (profitability gate, swap-route-with-candidate-fallback,
//! debt-to-cover/min-out derivation, record-after-send), rebuilt against
//! the actually-transformed collaborators: [`LiquidationPlanner`] for
//! candidates, `SwapQuoteOracle` for the quote, `Broadcaster` for
//! send-and-replace, [`AttemptHistory`] for bookkeeping.

use crate::attempt_history::{AttemptHistory, AttemptRecord, AttemptStatus};
use crate::planner::{CandidatePlan, LiquidationPlanner, PlanError};
use crate::verifier::Actionable;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use liquidator_api::{SwapQuoteOracle, SwapQuoteParams};
use liquidator_chain::{AttemptLiquidationParams, BroadcastOutcome, Broadcaster};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Tuning for the winner-selection/safety-margin arithmetic. Field names
/// mirror the §6.E/§6.F contract fields they feed.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub execution_enabled: bool,
    pub executor_address: Address,
    pub payout_address: Address,
    pub swap_slippage_bps: u16,
    /// bps of `debtToCover` reserved for the aggregator's own fee, per
    /// open question 2's `computeNetDebtToken` resolution.
    pub swap_fees_bps: u32,
    /// bps of `debtToCover` reserved as an extra safety margin, same
    /// resolution.
    pub profit_buffer_bps: u32,
    pub min_profit_usd_1e18: u128,
}

pub struct LiquidationExecutor<P> {
    planner: Arc<LiquidationPlanner<P>>,
    attempt_history: Arc<AttemptHistory>,
    swap_oracle: Arc<dyn SwapQuoteOracle>,
    broadcaster: Arc<Broadcaster>,
    config: ExecutorConfig,
    next_nonce: AtomicU64,
}

impl<P> LiquidationExecutor<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    pub fn new(
        planner: Arc<LiquidationPlanner<P>>,
        attempt_history: Arc<AttemptHistory>,
        swap_oracle: Arc<dyn SwapQuoteOracle>,
        broadcaster: Arc<Broadcaster>,
        config: ExecutorConfig,
        starting_nonce: u64,
    ) -> Self {
        Self {
            planner,
            attempt_history,
            swap_oracle,
            broadcaster,
            config,
            next_nonce: AtomicU64::new(starting_nonce),
        }
    }

    /// Drive the actionable path for one edge-trigger emission. Never
    /// returns an error to the caller — every failure mode is recorded
    /// into [`AttemptHistory`] and logged, matching spec §7's "the
    /// engine never crashes the process for a recoverable error".
    #[instrument(skip(self), fields(user = %actionable.user, hf = actionable.hf, reason = actionable.reason))]
    pub async fn handle_actionable(&self, actionable: Actionable, now_ms: u64) {
        let user = actionable.user;

        if self.attempt_history.has_pending(&user) {
            info!("skipping: an attempt is already pending for this user");
            return;
        }

        if !self.config.execution_enabled {
            info!(hf = actionable.hf, "dry-run: actionable user detected, execution disabled");
            return;
        }

        let candidates = match self.planner.plan(user, now_ms).await {
            Ok(c) => c,
            Err(PlanError::PositionFetchFailed) => {
                warn!("position fetch failed while planning; will retry on next trigger");
                return;
            }
            Err(PlanError::NoPair) => Vec::new(),
        };

        if candidates.is_empty() {
            self.record_skip_no_pair(user, now_ms);
            return;
        }

        match self.pick_winner(user, &candidates).await {
            Some((candidate, quote)) => self.execute(user, candidate, quote, now_ms).await,
            None => self.record_skip_no_pair(user, now_ms),
        }
    }

    /// Quote every candidate and select the one with the highest net
    /// debt-token profit, per open question 2's resolution:
    /// `minOut - debtToCover - fees - buffer`. Candidates that fail to
    /// quote, or whose net profit is non-positive, are dropped.
    async fn pick_winner(
        &self,
        user: Address,
        candidates: &[CandidatePlan],
    ) -> Option<(CandidatePlan, liquidator_api::SwapQuote)> {
        let mut best: Option<(CandidatePlan, liquidator_api::SwapQuote, U256)> = None;

        for candidate in candidates {
            let params = SwapQuoteParams {
                from_token: candidate.collateral_asset,
                to_token: candidate.debt_asset,
                amount_raw: candidate.expected_collateral_out_raw,
                from_address: self.config.executor_address,
                slippage_bps: self.config.swap_slippage_bps,
            };

            let quote = match self.swap_oracle.get_swap_calldata(params).await {
                Ok(q) => q,
                Err(e) => {
                    warn!(user = %user, ?candidate.debt_asset, error = %e, "swap quote failed for candidate");
                    continue;
                }
            };

            let net = self.compute_net_debt_token(candidate, &quote);
            if net.is_zero() {
                continue;
            }

            let better = best.as_ref().map(|(_, _, best_net)| net > *best_net).unwrap_or(true);
            if better {
                best = Some((*candidate, quote, net));
            }
        }

        best.map(|(c, q, _)| (c, q))
    }

    /// `minOut - debtToCover - fees - buffer`, saturating at zero. `fees`
    /// and `buffer` are expressed as bps of `debtToCover` (both default
    /// to 0 pending operator tuning — see DESIGN.md).
    fn compute_net_debt_token(&self, candidate: &CandidatePlan, quote: &liquidator_api::SwapQuote) -> U256 {
        if quote.min_out_raw <= candidate.debt_to_cover_raw {
            return U256::ZERO;
        }
        let fees = (candidate.debt_to_cover_raw * U256::from(self.config.swap_fees_bps)) / U256::from(10_000u32);
        let buffer =
            (candidate.debt_to_cover_raw * U256::from(self.config.profit_buffer_bps)) / U256::from(10_000u32);
        let gross = quote.min_out_raw - candidate.debt_to_cover_raw;
        gross.saturating_sub(fees).saturating_sub(buffer)
    }

    async fn execute(
        &self,
        user: Address,
        candidate: CandidatePlan,
        quote: liquidator_api::SwapQuote,
        now_ms: u64,
    ) {
        let params = AttemptLiquidationParams {
            user,
            collateral_asset: candidate.collateral_asset,
            debt_asset: candidate.debt_asset,
            debt_to_cover_raw: candidate.debt_to_cover_raw,
            one_inch_calldata: quote.data,
            min_out_raw: quote.min_out_raw,
            payout: self.config.payout_address,
            expected_collateral_out_raw: candidate.expected_collateral_out_raw,
        };
        let calldata = params.encode();
        let nonce = self.next_nonce.fetch_add(1, Ordering::SeqCst);

        let mut record = AttemptRecord::new(user, now_ms, AttemptStatus::Sent);
        record.debt_asset = Some(candidate.debt_asset);
        record.collateral_asset = Some(candidate.collateral_asset);
        record.debt_to_cover_raw = Some(candidate.debt_to_cover_raw.min(U256::from(u128::MAX)).to());
        record.nonce = Some(nonce);

        match self.broadcaster.broadcast(self.config.executor_address, calldata, nonce).await {
            Ok(BroadcastOutcome::Included { tx_hash, .. }) => {
                record.status = AttemptStatus::Included;
                record.tx_hash = Some(tx_hash);
                info!(%tx_hash, "liquidation included");
            }
            Ok(BroadcastOutcome::Reverted { tx_hash }) => {
                record.status = AttemptStatus::Reverted;
                record.tx_hash = Some(tx_hash);
                warn!(%tx_hash, "liquidation reverted; audit will classify");
            }
            Ok(BroadcastOutcome::Pending { tx_hash }) => {
                record.status = AttemptStatus::Pending;
                record.tx_hash = Some(tx_hash);
                info!(%tx_hash, "liquidation broadcast, not yet mined");
            }
            Err(e) => {
                record.status = AttemptStatus::Error;
                record.error = Some(e.to_string());
                warn!(error = %e, "broadcast failed on every endpoint");
            }
        }

        self.attempt_history.record(record);
    }

    fn record_skip_no_pair(&self, user: Address, now_ms: u64) {
        self.attempt_history
            .record(AttemptRecord::new(user, now_ms, AttemptStatus::SkipNoPair));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address::from(bytes)
    }

    fn candidate() -> CandidatePlan {
        CandidatePlan {
            debt_asset: addr(1),
            collateral_asset: addr(2),
            debt_to_cover_raw: U256::from(2_000_000_000u64),
            expected_collateral_out_raw: U256::from(1_050_000_000_000_000_000u128),
            profit_usd_1e18: U256::from(100u64) * crate::u256_math::WAD,
            oracle_score_1e18: U256::from(98u64) * crate::u256_math::WAD,
        }
    }

    struct FakeExecutor;
    impl FakeExecutor {
        fn net(config: &ExecutorConfig, candidate: &CandidatePlan, min_out_raw: U256) -> U256 {
            if min_out_raw <= candidate.debt_to_cover_raw {
                return U256::ZERO;
            }
            let fees = (candidate.debt_to_cover_raw * U256::from(config.swap_fees_bps)) / U256::from(10_000u32);
            let buffer =
                (candidate.debt_to_cover_raw * U256::from(config.profit_buffer_bps)) / U256::from(10_000u32);
            (min_out_raw - candidate.debt_to_cover_raw).saturating_sub(fees).saturating_sub(buffer)
        }
    }

    #[test]
    fn test_net_debt_token_zero_fees_and_buffer() {
        let config = ExecutorConfig {
            execution_enabled: true,
            executor_address: Address::ZERO,
            payout_address: Address::ZERO,
            swap_slippage_bps: 100,
            swap_fees_bps: 0,
            profit_buffer_bps: 0,
            min_profit_usd_1e18: 0,
        };
        let c = candidate();
        let net = FakeExecutor::net(&config, &c, U256::from(2_100_000_000u64));
        assert_eq!(net, U256::from(100_000_000u64));
    }

    #[test]
    fn test_net_debt_token_fees_and_buffer_eat_profit() {
        let config = ExecutorConfig {
            execution_enabled: true,
            executor_address: Address::ZERO,
            payout_address: Address::ZERO,
            swap_slippage_bps: 100,
            swap_fees_bps: 5_000, // 50%
            profit_buffer_bps: 0,
            min_profit_usd_1e18: 0,
        };
        let c = candidate();
        // debtToCover = 2_000_000_000 -> fees = 1_000_000_000, gross = 100_000_000
        let net = FakeExecutor::net(&config, &c, U256::from(2_100_000_000u64));
        assert_eq!(net, U256::ZERO);
    }

    #[test]
    fn test_min_out_below_debt_to_cover_is_unprofitable() {
        let config = ExecutorConfig {
            execution_enabled: true,
            executor_address: Address::ZERO,
            payout_address: Address::ZERO,
            swap_slippage_bps: 100,
            swap_fees_bps: 0,
            profit_buffer_bps: 0,
            min_profit_usd_1e18: 0,
        };
        let c = candidate();
        let net = FakeExecutor::net(&config, &c, U256::from(1_000_000_000u64));
        assert_eq!(net, U256::ZERO);
    }
}
