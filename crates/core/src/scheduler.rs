//! Scheduler (component H): the serialized head loop plus event/price
//! coalescing, sitting on top of the [`crate::verifier::Verifier`] and
//! [`crate::scan_registry::ScanRegistry`] primitives.
//!
//! Grounded on [`crate::risk_set::RiskSet`]'s filter-on-demand ordering
//! model (no sorted container is maintained) and on
//! [`crate::dirty_queue::DirtyQueue`]'s drain-is-atomic coalescing.

use crate::dirty_queue::DirtyQueue;
use crate::risk_set::RiskSet;
use crate::scan_registry::TriggerKind;
use crate::verifier::{Actionable, Verifier};
use alloy::primitives::Address;
use alloy::providers::Provider;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub head_critical_batch_size: usize,
    pub always_include_hf_below: f64,
    pub near_threshold_band_bps: u32,
    pub hf_threshold: f64,
    pub maintenance_sample_size: usize,
    pub head_check_page_size: usize,
    pub head_page_min: usize,
    pub head_page_max: usize,
    pub head_page_target_ms: u64,
    pub run_stall_abort_ms: u64,
    pub event_batch_coalesce_ms: u64,
    pub event_batch_max_per_block: usize,
    pub max_parallel_event_batches: usize,
    pub max_parallel_event_batches_high: usize,
    pub price_trigger_max_scan: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            head_critical_batch_size: 300,
            always_include_hf_below: 1.10,
            near_threshold_band_bps: 300,
            hf_threshold: 1.0,
            maintenance_sample_size: 120,
            head_check_page_size: 200,
            head_page_min: 50,
            head_page_max: 500,
            head_page_target_ms: 800,
            run_stall_abort_ms: 5_000,
            event_batch_coalesce_ms: 250,
            event_batch_max_per_block: 20,
            max_parallel_event_batches: 4,
            max_parallel_event_batches_high: 8,
            price_trigger_max_scan: 400,
        }
    }
}

/// Monotonically increasing block request slot, claimed by the single
/// head-loop consumer. Intermediate values pushed between claims are
/// dropped by design (spec §4.H: "intermediate skipped blocks are
/// logged but not processed").
#[derive(Debug, Default)]
pub struct HeadBlockGate {
    latest: AtomicU64,
}

impl HeadBlockGate {
    pub fn new() -> Self {
        Self {
            latest: AtomicU64::new(0),
        }
    }

    pub fn request(&self, block: u64) {
        self.latest.fetch_max(block, Ordering::SeqCst);
    }

    /// Claim the newest requested block if it is newer than
    /// `last_processed`. Does not mark it processed — the caller does
    /// that only after a successful (non-stalled) run.
    pub fn claim(&self, last_processed: u64) -> Option<u64> {
        let v = self.latest.load(Ordering::SeqCst);
        if v > last_processed {
            Some(v)
        } else {
            None
        }
    }
}

/// Rolling window of the last `window` head-pass outcomes, driving the
/// adaptive page-size rule (spec §4.H "Adaptive page size").
pub struct AdaptivePageSizer {
    history: VecDeque<(u64, bool)>,
    window: usize,
    current: usize,
    min: usize,
    max: usize,
    target_ms: u64,
}

impl AdaptivePageSizer {
    pub fn new(initial: usize, min: usize, max: usize, target_ms: u64) -> Self {
        Self {
            history: VecDeque::with_capacity(20),
            window: 20,
            current: initial,
            min,
            max,
            target_ms,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Record one run's outcome and re-derive the page size.
    pub fn record(&mut self, elapsed_ms: u64, had_timeout: bool) {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back((elapsed_ms, had_timeout));

        let n = self.history.len() as f64;
        let avg_elapsed = self.history.iter().map(|(e, _)| *e as f64).sum::<f64>() / n;
        let timeout_rate = self.history.iter().filter(|(_, t)| *t).count() as f64 / n;

        if avg_elapsed > self.target_ms as f64 || timeout_rate > 0.05 {
            self.current = ((self.current as f64 * 0.85).floor() as usize).max(self.min);
        } else if avg_elapsed < 0.6 * self.target_ms as f64 && timeout_rate == 0.0 {
            self.current = ((self.current as f64 * 1.12).ceil() as usize).min(self.max);
        }
    }
}

/// Rotating cursor over a stable-sorted snapshot, used for the
/// maintenance-sample page when no hotset is present.
#[derive(Default)]
pub struct RotatingCursor {
    offset: usize,
}

impl RotatingCursor {
    pub fn new() -> Self {
        Self { offset: 0 }
    }

    /// Take the next `page_size` addresses starting at the cursor,
    /// wrapping around, and advance the cursor.
    pub fn next_page(&mut self, universe: &[Address], page_size: usize) -> Vec<Address> {
        if universe.is_empty() || page_size == 0 {
            return Vec::new();
        }
        let n = universe.len();
        let page_size = page_size.min(n);
        let mut out = Vec::with_capacity(page_size);
        for i in 0..page_size {
            out.push(universe[(self.offset + i) % n]);
        }
        self.offset = (self.offset + page_size) % n;
        out
    }
}

/// Build the prioritized address list for one head pass: hotset-first,
/// per spec §4.H steps 1-5. Pure and RPC-free so it can be tested
/// directly against a populated [`RiskSet`]/[`DirtyQueue`] pair.
pub fn build_head_pass(
    risk_set: &RiskSet,
    dirty_queue: &DirtyQueue,
    cursor: &mut RotatingCursor,
    config: &SchedulerConfig,
    page_size: usize,
) -> Vec<Address> {
    let mut ordered = Vec::new();
    let mut seen = HashSet::new();

    // Step 1+2: all candidates below alwaysIncludeHfBelow, ascending HF;
    // the first `headCriticalBatchSize` (capped at 300) form the
    // head-start slice but every low-HF user is included regardless.
    let low_hf = risk_set.below_threshold(config.always_include_hf_below, 0);
    for tracked in &low_hf {
        if seen.insert(tracked.address) {
            ordered.push(tracked.address);
        }
    }

    // Step 3: dirty users intersected with the tracked universe.
    for addr in dirty_queue.drain_users(0) {
        if risk_set.get(&addr).is_some() && seen.insert(addr) {
            ordered.push(addr);
        }
    }

    // Step 4: maintenance sample — 120 rotating when a hotset exists,
    // else a single rotating page of `page_size`.
    let universe: Vec<Address> = risk_set.iter_all().iter().map(|t| t.address).collect();
    let maintenance_size = if !low_hf.is_empty() {
        config.maintenance_sample_size
    } else {
        page_size
    };
    for addr in cursor.next_page(&universe, maintenance_size) {
        if seen.insert(addr) {
            ordered.push(addr);
        }
    }

    ordered
}

/// The head-start slice, capped at `headCriticalBatchSize` (spec's own
/// cap of 300), restricted to users in the near-threshold band — these
/// get an immediate micro-verify alongside the regular head scan.
pub fn head_start_near_band_subset(risk_set: &RiskSet, config: &SchedulerConfig) -> Vec<Address> {
    let band = config.near_threshold_band_bps as f64 / 10_000.0;
    let cap = config.head_critical_batch_size.min(300);
    risk_set
        .below_threshold(config.always_include_hf_below, 0)
        .into_iter()
        .take(cap)
        .filter(|t| t.health_factor >= config.hf_threshold && t.health_factor <= config.hf_threshold + band)
        .map(|t| t.address)
        .collect()
}

/// Per-`(blockNumber, reserveOrUserKey)` debounce accumulator plus the
/// per-block and concurrency caps from spec §4.H "Event coalescing".
/// Reserve-data-updated events bypass this entirely (fast-lane) and are
/// not represented here.
pub struct EventCoalescer {
    config: SchedulerConfig,
    /// (block, key) -> last-touched timestamp; an entry "fires" once
    /// `event_batch_coalesce_ms` has elapsed since its last touch.
    pending: Mutex<std::collections::HashMap<(u64, String), u64>>,
    executed_this_block: Mutex<(u64, usize)>,
    concurrency: Arc<Semaphore>,
}

impl EventCoalescer {
    pub fn new(config: SchedulerConfig) -> Self {
        let permits = config.max_parallel_event_batches;
        Self {
            concurrency: Arc::new(Semaphore::new(permits)),
            config,
            pending: Mutex::new(std::collections::HashMap::new()),
            executed_this_block: Mutex::new((0, 0)),
        }
    }

    /// Touch the accumulator for `(block, key)`, resetting its debounce
    /// timer. Returns `true` if this touch made the key newly pending.
    pub fn touch(&self, block: u64, key: &str, now_ms: u64) -> bool {
        let mut pending = self.pending.lock();
        let was_new = !pending.contains_key(&(block, key.to_string()));
        pending.insert((block, key.to_string()), now_ms);
        was_new
    }

    /// Keys whose debounce window has elapsed and whose block has not
    /// yet exhausted `eventBatchMaxPerBlock`. Removes returned keys from
    /// the pending set.
    pub fn drain_ready(&self, now_ms: u64) -> Vec<(u64, String)> {
        let mut pending = self.pending.lock();
        let ready_keys: Vec<(u64, String)> = pending
            .iter()
            .filter(|(_, ts)| now_ms.saturating_sub(**ts) >= self.config.event_batch_coalesce_ms)
            .map(|(k, _)| k.clone())
            .collect();

        let mut executed = self.executed_this_block.lock();
        let mut out = Vec::new();
        for key in ready_keys {
            if executed.0 != key.0 {
                *executed = (key.0, 0);
            }
            if executed.1 >= self.config.event_batch_max_per_block {
                debug!(block = key.0, "batches_skipped: per-block cap reached");
                pending.remove(&key);
                continue;
            }
            executed.1 += 1;
            pending.remove(&key);
            out.push(key);
        }
        out
    }

    pub fn concurrency_permits(&self) -> Arc<Semaphore> {
        self.concurrency.clone()
    }
}

pub struct Scheduler<P> {
    risk_set: Arc<RiskSet>,
    dirty_queue: Arc<DirtyQueue>,
    verifier: Arc<Verifier<P>>,
    config: SchedulerConfig,
    block_gate: HeadBlockGate,
    last_processed_block: AtomicU64,
    page_sizer: Mutex<AdaptivePageSizer>,
    cursor: Mutex<RotatingCursor>,
    coalescer: EventCoalescer,
    /// Actionable emissions are forwarded here for the executor task to
    /// consume; `None` runs detection/verification only (e.g. tests).
    actionable_tx: Option<UnboundedSender<Actionable>>,
}

impl<P> Scheduler<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    pub fn new(
        risk_set: Arc<RiskSet>,
        dirty_queue: Arc<DirtyQueue>,
        verifier: Arc<Verifier<P>>,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_actionable_channel(risk_set, dirty_queue, verifier, config, None)
    }

    pub fn with_actionable_channel(
        risk_set: Arc<RiskSet>,
        dirty_queue: Arc<DirtyQueue>,
        verifier: Arc<Verifier<P>>,
        config: SchedulerConfig,
        actionable_tx: Option<UnboundedSender<Actionable>>,
    ) -> Self {
        let page_sizer = AdaptivePageSizer::new(
            config.head_check_page_size,
            config.head_page_min,
            config.head_page_max,
            config.head_page_target_ms,
        );
        let coalescer = EventCoalescer::new(config.clone());
        Self {
            risk_set,
            dirty_queue,
            verifier,
            config,
            block_gate: HeadBlockGate::new(),
            last_processed_block: AtomicU64::new(0),
            page_sizer: Mutex::new(page_sizer),
            cursor: Mutex::new(RotatingCursor::new()),
            coalescer,
            actionable_tx,
        }
    }

    /// Forward actionable emissions to the executor task, if wired.
    fn dispatch(&self, actionable: Vec<Actionable>) {
        if let Some(tx) = &self.actionable_tx {
            for a in actionable {
                let _ = tx.send(a);
            }
        }
    }

    pub fn request_block(&self, block: u64) {
        self.block_gate.request(block);
    }

    /// Drive the head loop: while a newer block exists than the one last
    /// processed, claim it and run one pass. Returns the number of
    /// passes actually run (0 if nothing was pending).
    pub async fn drive_head_loop(&self, now_ms: u64) -> usize {
        let mut runs = 0;
        loop {
            let last = self.last_processed_block.load(Ordering::SeqCst);
            let Some(block) = self.block_gate.claim(last) else {
                break;
            };
            let completed = self.run_head_pass(block, now_ms).await;
            runs += 1;
            if !completed {
                // Stalled: last_processed_block stays unadvanced so the
                // next drive_head_loop call reclaims this block (or
                // whatever is now latest, per the gate's collapsing
                // semantics) instead of skipping past it.
                break;
            }
            self.last_processed_block.store(block, Ordering::SeqCst);
        }
        runs
    }

    /// Run one head pass. Returns `false` if the main scan was aborted by
    /// the stall-abort watchdog (in which case the caller must not
    /// advance `last_processed_block`).
    async fn run_head_pass(&self, block: u64, now_ms: u64) -> bool {
        let near_band = head_start_near_band_subset(&self.risk_set, &self.config);
        if !near_band.is_empty() {
            let (actionable, stats) = self
                .verifier
                .scan(&near_band, TriggerKind::Head, None, block, None, now_ms)
                .await;
            debug!(?stats, "head-start near-band micro-verify");
            self.dispatch(actionable);
        }

        let page_size = self.page_sizer.lock().current();
        let users = {
            let mut cursor = self.cursor.lock();
            build_head_pass(&self.risk_set, &self.dirty_queue, &mut cursor, &self.config, page_size)
        };

        let start = std::time::Instant::now();
        let stall_budget = Duration::from_millis(self.config.run_stall_abort_ms);
        let scan = self.verifier.scan(&users, TriggerKind::Head, None, block, None, now_ms);

        let (elapsed_ms, had_timeout, completed) = match timeout(stall_budget, scan).await {
            Ok((actionable, stats)) => {
                self.dispatch(actionable);

                // Spec §4.G scheduling hook: follow up the batch with
                // single-user micro-verifies for anyone trending toward
                // the threshold.
                let micro_candidates = self.verifier.select_micro_verify_candidates(&users);
                if !micro_candidates.is_empty() {
                    let (micro_actionable, micro_stats) = self
                        .verifier
                        .micro_verify(&micro_candidates, TriggerKind::Head, block, now_ms)
                        .await;
                    debug!(?micro_stats, count = micro_candidates.len(), "post-batch micro-verify");
                    self.dispatch(micro_actionable);
                }

                (start.elapsed().as_millis() as u64, stats.timeouts > 0, true)
            }
            Err(_) => {
                // `timeout` dropped the scan future mid-flight, so it
                // never reached its own scan_registry.release — release
                // the lock here or this key stays Held forever.
                self.verifier.release_scan_lock(TriggerKind::Head, None, block, now_ms);
                warn!(block, stall_ms = self.config.run_stall_abort_ms, "head run aborted: stall-abort threshold exceeded");
                (self.config.run_stall_abort_ms, true, false)
            }
        };

        self.page_sizer.lock().record(elapsed_ms, had_timeout);
        completed
    }

    /// Handle one pool event: touch the dirty set and either take the
    /// watched fast-path (immediate single-user verify) or coalesce.
    pub async fn handle_event(&self, user: Option<Address>, reserve: Option<Address>, block: u64, now_ms: u64) {
        if let Some(u) = user {
            self.dirty_queue.touch_user(u);
            if self.is_watched(&u) {
                let (actionable, stats) = self
                    .verifier
                    .scan(&[u], TriggerKind::Event, None, block, None, now_ms)
                    .await;
                debug!(?stats, user = %u, "watched fast-path verify");
                self.dispatch(actionable);
                return;
            }
        }
        if let Some(r) = reserve {
            self.dirty_queue.touch_reserve(r);
        }

        let key = reserve.map(|r| r.to_string()).or(user.map(|u| u.to_string())).unwrap_or_default();
        self.coalescer.touch(block, &key, now_ms);
    }

    /// Execute any event batches whose debounce window has elapsed,
    /// bounded by the per-block cap and the concurrency semaphore.
    pub async fn drain_event_batches(&self, block: u64, now_ms: u64) {
        let ready = self.coalescer.drain_ready(now_ms);
        let permits = self.coalescer.concurrency_permits();
        let mut handles = Vec::new();
        for (batch_block, key) in ready {
            let permits = permits.clone();
            let verifier = self.verifier.clone();
            let risk_set = self.risk_set.clone();
            let actionable_tx = self.actionable_tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire().await.expect("semaphore never closed");
                let users: Vec<Address> = risk_set.iter_all().into_iter().map(|t| t.address).collect();
                let (actionable, stats) = verifier
                    .scan(&users, TriggerKind::Event, Some(key), batch_block, None, now_ms)
                    .await;
                if let Some(tx) = actionable_tx {
                    for a in actionable {
                        let _ = tx.send(a);
                    }
                }
                stats
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        let _ = block;
    }

    /// Spec §4.H "Price-shock path": steps 1-5, given an already-fetched
    /// borrower set for the affected reserve.
    pub async fn handle_price_shock(
        &self,
        symbol: &str,
        borrowers: &[Address],
        block: u64,
        now_ms: u64,
    ) -> crate::verifier::ScanStats {
        let band = self.config.near_threshold_band_bps as f64 / 10_000.0;
        let lower_bound = (self.config.hf_threshold - 0.02).max(0.0);
        let upper_bound = self.config.hf_threshold + band;

        let filtered: Vec<Address> = borrowers
            .iter()
            .filter(|addr| {
                self.risk_set
                    .get(addr)
                    .map(|t| t.health_factor >= lower_bound && t.health_factor <= upper_bound)
                    .unwrap_or(false)
            })
            .take(self.config.price_trigger_max_scan)
            .copied()
            .collect();

        let (actionable, stats) = self
            .verifier
            .scan(
                &filtered,
                TriggerKind::Price,
                Some(symbol.to_string()),
                block,
                Some(liquidator_chain::BlockTag::Pending),
                now_ms,
            )
            .await;
        self.dispatch(actionable);
        stats
    }

    fn is_watched(&self, addr: &Address) -> bool {
        self.risk_set
            .get(addr)
            .map(|t| t.health_factor < self.config.always_include_hf_below)
            .unwrap_or(false)
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

    #[test]
    fn test_head_block_gate_collapses_intermediate_blocks() {
        let gate = HeadBlockGate::new();
        gate.request(5);
        gate.request(6);
        gate.request(7);
        assert_eq!(gate.claim(4), Some(7));
        assert_eq!(gate.claim(7), None);
    }

    #[test]
    fn test_adaptive_page_sizer_shrinks_on_timeouts() {
        let mut sizer = AdaptivePageSizer::new(200, 50, 500, 800);
        for _ in 0..20 {
            sizer.record(100, true);
        }
        assert!(sizer.current() < 200);
    }

    #[test]
    fn test_adaptive_page_sizer_grows_when_fast_and_clean() {
        let mut sizer = AdaptivePageSizer::new(200, 50, 500, 800);
        for _ in 0..20 {
            sizer.record(100, false);
        }
        assert!(sizer.current() > 200);
    }

    #[test]
    fn test_rotating_cursor_wraps() {
        let mut cursor = RotatingCursor::new();
        let universe = vec![addr(1), addr(2), addr(3)];
        let first = cursor.next_page(&universe, 2);
        let second = cursor.next_page(&universe, 2);
        assert_eq!(first, vec![addr(1), addr(2)]);
        assert_eq!(second, vec![addr(3), addr(1)]);
    }

    #[test]
    fn test_build_head_pass_prioritizes_low_hf_then_dirty() {
        let risk_set = RiskSet::new();
        let dirty_queue = DirtyQueue::new();
        let config = SchedulerConfig::default();
        let mut cursor = RotatingCursor::new();

        let hot_user = addr(1);
        risk_set.upsert(hot_user);
        risk_set.update_hf(hot_user, 0.5, 100 * 10u128.pow(18), 1, 1.0, 20);

        let dirty_user = addr(2);
        risk_set.upsert(dirty_user);
        risk_set.update_hf(dirty_user, 2.0, 100 * 10u128.pow(18), 1, 1.0, 20);
        dirty_queue.touch_user(dirty_user);

        let ordered = build_head_pass(&risk_set, &dirty_queue, &mut cursor, &config, 10);
        assert_eq!(ordered[0], hot_user);
        assert!(ordered.contains(&dirty_user));
    }
}
