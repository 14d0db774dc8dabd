//! Global RPC-load limiters: a token bucket (rate + burst) and an
//! in-flight semaphore, shared across all scan triggers per spec §5.
//!
//! Grounded on this codebase's `parking_lot`-guarded-state idiom (see
//! [`crate::u256_math`]'s pure-function style plus the atomic counters
//! in the chain crate's `signer.rs`), applied here to a refillable
//! counter instead of a nonce.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Priority class for weighted token-bucket acquisition (spec §9:
/// "the token bucket must not starve the event-batch dispatcher").
/// Event-triggered scans draw from a reserved share of each refill
/// before head-maintenance scans are allowed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePriority {
    Event,
    HeadMaintenance,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter. `capacity` is the burst size; `rate_per_sec`
/// is the steady-state refill rate. A configurable fraction of each
/// refill is reserved for `Event`-priority acquisitions so head-loop
/// maintenance scans cannot starve event-driven ones.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    rate_per_sec: f64,
    event_reserve_frac: f64,
}

impl TokenBucket {
    pub fn new(capacity: u32, rate_per_sec: f64, event_reserve_frac: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            rate_per_sec,
            event_reserve_frac: event_reserve_frac.clamp(0.0, 1.0),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Attempt to withdraw `n` tokens immediately. `HeadMaintenance`
    /// acquisitions may not dip into the reserved event share.
    pub fn try_acquire(&self, n: u32, priority: AcquirePriority) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        let n = n as f64;
        let floor = match priority {
            AcquirePriority::Event => 0.0,
            AcquirePriority::HeadMaintenance => self.capacity * self.event_reserve_frac,
        };
        if state.tokens - n >= floor {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Poll `try_acquire` until it succeeds or `deadline` elapses.
    pub async fn acquire_within(&self, n: u32, priority: AcquirePriority, deadline: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.try_acquire(n, priority) {
                return true;
            }
            if start.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

/// Bounded concurrent eth_call budget (`maxInFlightEthCalls`).
pub struct InFlightLimiter {
    semaphore: Semaphore,
}

impl InFlightLimiter {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            semaphore: Semaphore::new(max_in_flight),
        }
    }

    pub async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("in-flight semaphore never closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_exhausted() {
        let bucket = TokenBucket::new(5, 0.0, 0.0);
        for _ in 0..5 {
            assert!(bucket.try_acquire(1, AcquirePriority::Event));
        }
        assert!(!bucket.try_acquire(1, AcquirePriority::Event));
    }

    #[test]
    fn test_head_maintenance_respects_event_reserve() {
        let bucket = TokenBucket::new(10, 0.0, 0.3);
        // 3 tokens reserved for events; maintenance can draw at most 7.
        for _ in 0..7 {
            assert!(bucket.try_acquire(1, AcquirePriority::HeadMaintenance));
        }
        assert!(!bucket.try_acquire(1, AcquirePriority::HeadMaintenance));
        // Events can still draw from the reserve.
        assert!(bucket.try_acquire(1, AcquirePriority::Event));
    }
}
