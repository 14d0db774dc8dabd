//! Batched on-chain HF verification (component G).
//!
//! Grounded on [`risk_set`] for the per-user state this component is
//! the sole mutator of, and on `liquidator_chain::multicall` for the
//! batched RPC primitive. Hedging/backoff is delegated to
//! `liquidator_chain::execute_with_policy`.

use crate::rate_limiter::{AcquirePriority, InFlightLimiter, TokenBucket};
use crate::risk_set::RiskSet;
use crate::scan_registry::{ScanKey, ScanRegistry, TriggerKind};
use crate::u256_math::wad_to_f64;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use futures::future::BoxFuture;
use liquidator_chain::{
    execute_with_policy, is_pending_unsupported, BatchEntry, BlockTag, MulticallClient,
    MulticallError, RetryPolicy,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub min_debt_usd_1e18: u128,
    pub hf_threshold: f64,
    pub hysteresis_bps: u32,
    pub near_threshold_band_bps: u32,
    pub micro_verify_max_per_block: usize,
    pub chunk_size: usize,
    pub chunk_timeout_ms: u64,
    pub chunk_retry_attempts: u32,
    pub head_check_hedge_ms: u64,
    pub pending_verify_enabled: bool,
    pub scan_lock_dedup_window_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            min_debt_usd_1e18: 10 * 10u128.pow(18),
            hf_threshold: 1.0,
            hysteresis_bps: 20,
            near_threshold_band_bps: 300,
            micro_verify_max_per_block: 20,
            chunk_size: 100,
            chunk_timeout_ms: 2_000,
            chunk_retry_attempts: 3,
            head_check_hedge_ms: 150,
            pending_verify_enabled: true,
            scan_lock_dedup_window_ms: 30_000,
        }
    }
}

/// One verified user outcome: HF crossed into/worsened within the
/// liquidatable region and an edge-trigger emission is due.
#[derive(Debug, Clone, Copy)]
pub struct Actionable {
    pub user: Address,
    pub hf: f64,
    pub debt_usd_1e18: u128,
    pub reason: &'static str,
}

/// Per-batch metrics (spec §4.G step 7).
#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub users_scanned: usize,
    pub users_pruned_zero_debt: usize,
    pub users_pruned_dust: usize,
    pub timeouts: usize,
    pub actionable: usize,
    pub suppressed_by_lock: bool,
    /// Chunks where the secondary read RPC's hedge delay elapsed and it
    /// was dispatched alongside the primary, win or lose the race.
    pub hedge_fires: usize,
}

pub struct Verifier<P> {
    risk_set: Arc<RiskSet>,
    scan_registry: Arc<ScanRegistry>,
    rate_limiter: Arc<TokenBucket>,
    in_flight: Arc<InFlightLimiter>,
    primary: Arc<MulticallClient<P>>,
    /// Secondary read endpoint the hedge race dispatches to once
    /// `head_check_hedge_ms` elapses. `None` leaves `head_check_hedge_ms`
    /// inert — there is nothing to hedge against.
    secondary: Option<Arc<MulticallClient<P>>>,
    config: VerifierConfig,
    current_chunk_size: AtomicUsize,
    consecutive_rate_limit_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    pending_poll_multiplier: AtomicU64,
}

impl<P> Verifier<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    pub fn new(
        risk_set: Arc<RiskSet>,
        scan_registry: Arc<ScanRegistry>,
        rate_limiter: Arc<TokenBucket>,
        primary: Arc<MulticallClient<P>>,
        config: VerifierConfig,
    ) -> Self {
        Self::with_in_flight_limiter(risk_set, scan_registry, rate_limiter, Arc::new(InFlightLimiter::new(16)), primary, config)
    }

    /// As [`Self::new`], but with an explicit [`InFlightLimiter`] sized
    /// from `ETH_CALL_MAX_IN_FLIGHT` (spec §5's "max concurrent eth_call"
    /// semaphore) instead of the hardcoded default.
    pub fn with_in_flight_limiter(
        risk_set: Arc<RiskSet>,
        scan_registry: Arc<ScanRegistry>,
        rate_limiter: Arc<TokenBucket>,
        in_flight: Arc<InFlightLimiter>,
        primary: Arc<MulticallClient<P>>,
        config: VerifierConfig,
    ) -> Self {
        let chunk_size = config.chunk_size;
        Self {
            risk_set,
            scan_registry,
            rate_limiter,
            in_flight,
            primary,
            secondary: None,
            config,
            current_chunk_size: AtomicUsize::new(chunk_size),
            consecutive_rate_limit_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            pending_poll_multiplier: AtomicU64::new(1),
        }
    }

    /// Attach the secondary read endpoint the hedge race dispatches to.
    /// Without this, `head_check_hedge_ms` is configured but inert.
    pub fn with_secondary(mut self, secondary: Arc<MulticallClient<P>>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Scan `users` under the given trigger, updating [`RiskSet`] in
    /// place and returning the actionable edge-trigger emissions plus
    /// batch statistics. Implements spec §4.G steps 1-7.
    pub async fn scan(
        &self,
        users: &[Address],
        trigger: TriggerKind,
        symbol_or_reserve: Option<String>,
        block: u64,
        explicit_block_tag: Option<BlockTag>,
        now_ms: u64,
    ) -> (Vec<Actionable>, ScanStats) {
        let mut stats = ScanStats::default();
        if users.is_empty() {
            return (Vec::new(), stats);
        }

        let key = ScanKey::new(trigger, symbol_or_reserve, block);
        if !self.scan_registry.try_acquire(key.clone(), now_ms) {
            stats.suppressed_by_lock = true;
            return (Vec::new(), stats);
        }

        let chunk_size = self.current_chunk_size.load(Ordering::Relaxed).max(1);
        let n_chunks = users.len().div_ceil(chunk_size);
        if !self
            .rate_limiter
            .acquire_within(n_chunks as u32, self.trigger_priority(trigger), Duration::from_secs(5))
            .await
        {
            self.scan_registry.release(key, now_ms);
            return (Vec::new(), stats);
        }

        let block_tag = explicit_block_tag.unwrap_or_else(|| self.default_block_tag(trigger, block));

        let mut actionable = Vec::new();
        for chunk in users.chunks(chunk_size) {
            let (entries, had_timeout, hedge_fired) = self.run_chunk_with_policy(chunk, block_tag).await;
            if hedge_fired {
                stats.hedge_fires += 1;
            }
            if had_timeout {
                stats.timeouts += 1;
                self.on_rate_limit_signal();
            } else {
                self.on_success_signal();
            }
            for entry in entries {
                stats.users_scanned += 1;
                self.apply_entry(entry, block, &mut stats, &mut actionable);
            }
        }

        self.scan_registry.release(key, now_ms);
        stats.actionable = actionable.len();
        (actionable, stats)
    }

    /// Release a held scan lock directly, bypassing the normal
    /// `scan`-owned acquire/release pairing. Used by the scheduler's
    /// stall-abort watchdog when it drops an in-flight `scan` future
    /// before that future's own `release` call is reached.
    pub fn release_scan_lock(&self, trigger: TriggerKind, symbol_or_reserve: Option<String>, block: u64, now_ms: u64) {
        let key = ScanKey::new(trigger, symbol_or_reserve, block);
        self.scan_registry.release(key, now_ms);
    }

    fn trigger_priority(&self, trigger: TriggerKind) -> AcquirePriority {
        match trigger {
            TriggerKind::Event | TriggerKind::Price | TriggerKind::Reserve => AcquirePriority::Event,
            TriggerKind::Head => AcquirePriority::HeadMaintenance,
        }
    }

    fn default_block_tag(&self, trigger: TriggerKind, block: u64) -> BlockTag {
        match trigger {
            TriggerKind::Price | TriggerKind::Reserve if self.config.pending_verify_enabled => BlockTag::Pending,
            _ => BlockTag::Number(block),
        }
    }

    async fn run_chunk_with_policy(&self, chunk: &[Address], block_tag: BlockTag) -> (Vec<BatchEntry>, bool, bool) {
        self.run_chunk_with_policy_opts(chunk, block_tag, true).await
    }

    async fn run_chunk_with_policy_opts(
        &self,
        chunk: &[Address],
        block_tag: BlockTag,
        hedge_enabled: bool,
    ) -> (Vec<BatchEntry>, bool, bool) {
        let hedge_delay = if hedge_enabled && self.config.head_check_hedge_ms > 0 && self.secondary.is_some() {
            Some(Duration::from_millis(self.config.head_check_hedge_ms))
        } else {
            None
        };
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(self.config.chunk_timeout_ms),
            hedge_delay,
            max_retries: self.config.chunk_retry_attempts,
            backoff_base: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter_frac: 0.3,
        };

        let primary = self.primary.clone();
        let in_flight = self.in_flight.clone();
        let chunk_owned: Vec<Address> = chunk.to_vec();
        let hedge_fired = Arc::new(AtomicBool::new(false));

        let primary_closure = {
            let primary = primary.clone();
            let in_flight = in_flight.clone();
            let chunk_owned = chunk_owned.clone();
            move || {
                let primary = primary.clone();
                let in_flight = in_flight.clone();
                let chunk_owned = chunk_owned.clone();
                let fut: BoxFuture<'static, anyhow::Result<Vec<BatchEntry>>> = Box::pin(async move {
                    let _permit = in_flight.acquire().await;
                    let res = primary.get_user_account_data_batch(&chunk_owned, block_tag).await;
                    match res {
                        Err(ref e) if is_pending_unsupported(e) => {
                            primary.get_user_account_data_batch(&chunk_owned, BlockTag::Latest).await
                        }
                        other => other,
                    }
                });
                fut
            }
        };

        let secondary_closure = self.secondary.clone().map(move |secondary| {
            let in_flight = in_flight.clone();
            move || {
                let secondary = secondary.clone();
                let in_flight = in_flight.clone();
                let chunk_owned = chunk_owned.clone();
                let hedge_fired = hedge_fired.clone();
                let fut: BoxFuture<'static, anyhow::Result<Vec<BatchEntry>>> = Box::pin(async move {
                    hedge_fired.store(true, Ordering::Relaxed);
                    let _permit = in_flight.acquire().await;
                    let res = secondary.get_user_account_data_batch(&chunk_owned, block_tag).await;
                    match res {
                        Err(ref e) if is_pending_unsupported(e) => {
                            secondary.get_user_account_data_batch(&chunk_owned, BlockTag::Latest).await
                        }
                        other => other,
                    }
                });
                fut
            }
        });

        let result = execute_with_policy::<Vec<BatchEntry>, anyhow::Error>(&policy, primary_closure, secondary_closure).await;

        match result {
            Ok(entries) => (entries, false, hedge_fired.load(Ordering::Relaxed)),
            Err(_) => {
                warn!(chunk_len = chunk.len(), "chunk verification failed after retries");
                (Vec::new(), true, hedge_fired.load(Ordering::Relaxed))
            }
        }
    }

    fn apply_entry(&self, entry: BatchEntry, block: u64, stats: &mut ScanStats, actionable: &mut Vec<Actionable>) {
        let data = match entry.data {
            Ok(d) => d,
            Err(MulticallError::CallReverted) | Err(MulticallError::DecodeFailed) => return,
        };

        if data.total_debt_base.is_zero() {
            stats.users_pruned_zero_debt += 1;
            return;
        }

        // total_debt_base is 8-decimal USD per external interface A.
        let debt_usd_1e18 = crate::u256_math::rescale(data.total_debt_base, 8, 18);
        let debt_usd_1e18_u128: u128 = debt_usd_1e18.min(U256::from(u128::MAX)).to();
        if debt_usd_1e18_u128 < self.config.min_debt_usd_1e18 {
            stats.users_pruned_dust += 1;
            return;
        }

        let hf = wad_to_f64(data.health_factor);

        if let Some(transition) = self.risk_set.update_hf(
            entry.user,
            hf,
            debt_usd_1e18_u128,
            block,
            self.config.hf_threshold,
            self.config.hysteresis_bps,
        ) {
            actionable.push(Actionable {
                user: entry.user,
                hf,
                debt_usd_1e18: debt_usd_1e18_u128,
                reason: transition.reason(),
            });
        }
    }

    fn on_rate_limit_signal(&self) {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        let failures = self.consecutive_rate_limit_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= 2 {
            let current = self.current_chunk_size.load(Ordering::Relaxed);
            let shrunk = (current as f64 * 0.67).floor().max(50.0) as usize;
            self.current_chunk_size.store(shrunk, Ordering::Relaxed);
            let mult = self.pending_poll_multiplier.load(Ordering::Relaxed);
            self.pending_poll_multiplier.store((mult * 2).min(4), Ordering::Relaxed);
            debug!(shrunk, "chunk size shrunk after repeated rate limiting");
        }
    }

    fn on_success_signal(&self) {
        self.consecutive_rate_limit_failures.store(0, Ordering::Relaxed);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= 5 {
            let current = self.current_chunk_size.load(Ordering::Relaxed);
            let grown = (current as f64 * 1.1).ceil().min(self.config.chunk_size as f64 * 2.0) as usize;
            self.current_chunk_size.store(grown, Ordering::Relaxed);
            let mult = self.pending_poll_multiplier.load(Ordering::Relaxed);
            self.pending_poll_multiplier.store(mult.saturating_sub(1).max(1), Ordering::Relaxed);
        }
    }

    /// Spec §4.G scheduling hook: single-user follow-up verify run after
    /// batch completion for [`select_micro_verify_candidates`]'s output.
    /// Hedging is off for these single-call requests (spec: "hedging off
    /// for single-call"); the caller is responsible for the
    /// `microVerifyMaxPerBlock` cap.
    pub async fn micro_verify(
        &self,
        users: &[Address],
        trigger: TriggerKind,
        block: u64,
        now_ms: u64,
    ) -> (Vec<Actionable>, ScanStats) {
        let mut stats = ScanStats::default();
        if users.is_empty() {
            return (Vec::new(), stats);
        }
        if !self
            .rate_limiter
            .acquire_within(users.len() as u32, AcquirePriority::Event, Duration::from_secs(5))
            .await
        {
            return (Vec::new(), stats);
        }

        let block_tag = self.default_block_tag(trigger, block);
        let mut actionable = Vec::new();
        for user in users {
            let (entries, had_timeout, _hedge_fired) = self
                .run_chunk_with_policy_opts(std::slice::from_ref(user), block_tag, false)
                .await;
            if had_timeout {
                stats.timeouts += 1;
            }
            for entry in entries {
                stats.users_scanned += 1;
                self.apply_entry(entry, block, &mut stats, &mut actionable);
            }
        }
        stats.actionable = actionable.len();
        (actionable, stats)
    }

    /// Select users for a single-user micro-verify pass per spec §4.G's
    /// scheduling hook: projected next-block HF < 1.0, or current HF in
    /// the near-threshold band with negative delta.
    pub fn select_micro_verify_candidates(&self, users: &[Address]) -> Vec<Address> {
        let band = self.config.near_threshold_band_bps as f64 / 10_000.0;
        let mut out = Vec::new();
        for addr in users {
            let Some(tracked) = self.risk_set.get(addr) else { continue };
            let projected_crosses = tracked.projected_next_hf().map(|p| p < 1.0).unwrap_or(false);
            let in_band = tracked.health_factor >= self.config.hf_threshold
                && tracked.health_factor <= self.config.hf_threshold + band;
            let worsening = tracked
                .projected_next_hf()
                .map(|p| p < tracked.health_factor)
                .unwrap_or(false);
            if projected_crosses || (in_band && worsening) {
                out.push(*addr);
            }
            if out.len() >= self.config.micro_verify_max_per_block {
                break;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_spec_defaults() {
        let config = VerifierConfig::default();
        assert_eq!(config.hf_threshold, 1.0);
        assert_eq!(config.hysteresis_bps, 20);
        assert!(config.pending_verify_enabled);
    }

    #[test]
    fn test_rate_limiter_and_registry_wire_up() {
        let risk_set = Arc::new(RiskSet::new());
        let scan_registry = Arc::new(ScanRegistry::new(30_000));
        let bucket = Arc::new(TokenBucket::new(100, 10.0, 0.3));
        assert_eq!(risk_set.len(), 0);
        assert!(scan_registry.is_empty());
        assert!(bucket.try_acquire(1, AcquirePriority::Event));
    }
}
