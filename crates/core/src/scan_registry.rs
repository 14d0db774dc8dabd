//! Scan dedup registry: a concurrent map from `(trigger, symbolOrReserve,
//! block)` to lock state, mediating concurrent verification attempts
//! aimed at the same slice of the risk set.
//!
//! Grounded on [`crate::risk_set::RiskSet`]'s `DashMap`-backed
//! single-writer-per-key pattern, applied here to lock/TTL state instead
//! of a risk record.

use dashmap::DashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Head,
    Event,
    Price,
    Reserve,
}

/// Dedup key: trigger kind, an optional symbol/reserve discriminator
/// (interned as an owned string rather than an address so head-loop
/// scans without a specific reserve can use `None`), and block number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanKey {
    pub trigger: TriggerKind,
    pub symbol_or_reserve: Option<String>,
    pub block: u64,
}

impl ScanKey {
    pub fn new(trigger: TriggerKind, symbol_or_reserve: Option<String>, block: u64) -> Self {
        Self {
            trigger,
            symbol_or_reserve,
            block,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LockState {
    Held,
    CompletedAt(u64),
}

/// Concurrent scan-dedup registry. `now_ms` is supplied by the caller on
/// every operation rather than read from a wall clock internally, so
/// tests can drive it deterministically.
#[derive(Debug, Default)]
pub struct ScanRegistry {
    locks: DashMap<ScanKey, LockState>,
    dedup_window_ms: u64,
}

impl ScanRegistry {
    pub fn new(dedup_window_ms: u64) -> Self {
        Self {
            locks: DashMap::new(),
            dedup_window_ms,
        }
    }

    /// Attempt to acquire the lock for `key`. Returns `true` (and holds
    /// the lock) iff no concurrent holder exists and no completion
    /// within the dedup window has been recorded.
    pub fn try_acquire(&self, key: ScanKey, now_ms: u64) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.locks.entry(key) {
            Entry::Occupied(mut occ) => match *occ.get() {
                LockState::Held => false,
                LockState::CompletedAt(ts) => {
                    if now_ms.saturating_sub(ts) < self.dedup_window_ms {
                        false
                    } else {
                        occ.insert(LockState::Held);
                        true
                    }
                }
            },
            Entry::Vacant(vac) => {
                vac.insert(LockState::Held);
                true
            }
        }
    }

    /// Release the lock, recording the completion timestamp so the
    /// dedup window applies to subsequent acquisitions.
    pub fn release(&self, key: ScanKey, now_ms: u64) {
        self.locks.insert(key, LockState::CompletedAt(now_ms));
    }

    /// Drop expired completion entries to bound memory. Held locks are
    /// never swept here — only an explicit `release` clears one.
    pub fn sweep_expired(&self, now_ms: u64) {
        self.locks.retain(|_, state| match state {
            LockState::Held => true,
            LockState::CompletedAt(ts) => now_ms.saturating_sub(*ts) < self.dedup_window_ms,
        });
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    fn key(block: u64) -> ScanKey {
        ScanKey::new(TriggerKind::Head, None, block)
    }

    #[test]
    fn test_exactly_one_concurrent_acquire_succeeds() {
        let reg = ScanRegistry::new(10_000);
        let k = key(100);
        assert!(reg.try_acquire(k.clone(), 0));
        assert!(!reg.try_acquire(k.clone(), 1));
    }

    #[test]
    fn test_release_then_reacquire_after_window() {
        let reg = ScanRegistry::new(1_000);
        let k = key(101);
        assert!(reg.try_acquire(k.clone(), 0));
        reg.release(k.clone(), 100);

        // Still within dedup window.
        assert!(!reg.try_acquire(k.clone(), 500));
        // Window elapsed.
        assert!(reg.try_acquire(k.clone(), 1_200));
    }

    #[test]
    fn test_different_keys_are_independent() {
        let reg = ScanRegistry::new(10_000);
        assert!(reg.try_acquire(key(1), 0));
        assert!(reg.try_acquire(key(2), 0));
    }

    #[test]
    fn test_sweep_expired_drops_completed_outside_window() {
        let reg = ScanRegistry::new(100);
        let k = key(1);
        reg.try_acquire(k.clone(), 0);
        reg.release(k.clone(), 0);
        reg.sweep_expired(1_000);
        assert!(reg.is_empty());
    }
}
