//! Authoritative map of user -> {health factor, debt USD}.
//!
//! Not a sorted container: watched subsets are produced by filter + sort
//! on demand, matching the filtered reverse-index scans the rest of this
//! codebase already does over its position maps.

use alloy::primitives::Address;
use dashmap::DashMap;
use smallvec::SmallVec;

/// A single `{hf, block}` observation kept for linear extrapolation.
#[derive(Debug, Clone, Copy)]
pub struct HfObservation {
    pub hf: f64,
    pub block: u64,
}

/// Edge-trigger state for the Safe/Liq state machine (spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    Safe,
    Liq,
}

/// Tracked user risk record.
#[derive(Debug, Clone)]
pub struct TrackedUser {
    pub address: Address,
    /// May be `f64::INFINITY` when the user has no debt.
    pub health_factor: f64,
    pub last_debt_usd_1e18: u128,
    pub last_observed_block: u64,
    /// Ring of the last ≤4 `{hf, block}` observations (newest last).
    pub hf_history: SmallVec<[HfObservation; 4]>,
    pub edge_state: EdgeState,
    pub last_edge_block: Option<u64>,
}

impl TrackedUser {
    fn new(address: Address) -> Self {
        Self {
            address,
            health_factor: f64::INFINITY,
            last_debt_usd_1e18: 0,
            last_observed_block: 0,
            hf_history: SmallVec::new(),
            edge_state: EdgeState::Safe,
            last_edge_block: None,
        }
    }

    fn push_observation(&mut self, hf: f64, block: u64) {
        if self.hf_history.len() == self.hf_history.capacity() {
            self.hf_history.remove(0);
        }
        self.hf_history.push(HfObservation { hf, block });
    }

    /// Linear extrapolation of HF at the next block from the last ≤4
    /// observations. Returns `None` when fewer than two points exist.
    pub fn projected_next_hf(&self) -> Option<f64> {
        let n = self.hf_history.len();
        if n < 2 {
            return None;
        }
        let first = self.hf_history[0];
        let last = self.hf_history[n - 1];
        let block_delta = last.block.saturating_sub(first.block);
        if block_delta == 0 {
            return None;
        }
        let slope = (last.hf - first.hf) / block_delta as f64;
        Some(last.hf + slope)
    }
}

/// Authoritative risk map, shared across the detection/verification path.
#[derive(Debug, Default)]
pub struct RiskSet {
    users: DashMap<Address, TrackedUser>,
}

impl RiskSet {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Insert a user if not already tracked. No-op if present.
    pub fn upsert(&self, addr: Address) {
        self.users.entry(addr).or_insert_with(|| TrackedUser::new(addr));
    }

    /// Update a user's HF and debt. Verifier is the only mutator of these
    /// fields. Returns the edge-trigger reason, if any emission is due.
    pub fn update_hf(
        &self,
        addr: Address,
        hf: f64,
        debt_usd_1e18: u128,
        block: u64,
        threshold: f64,
        hysteresis_bps: u32,
    ) -> Option<EdgeTransition> {
        let mut entry = self
            .users
            .entry(addr)
            .or_insert_with(|| TrackedUser::new(addr));

        let prev_hf = entry.health_factor;
        let prev_state = entry.edge_state;

        entry.health_factor = hf;
        entry.last_debt_usd_1e18 = debt_usd_1e18;
        entry.last_observed_block = block;
        entry.push_observation(hf, block);

        let liquidatable = hf < threshold;
        let new_state = if liquidatable { EdgeState::Liq } else { EdgeState::Safe };

        // At most one emission per (user, block).
        if entry.last_edge_block == Some(block) {
            entry.edge_state = new_state;
            return None;
        }

        let transition = match (prev_state, new_state) {
            (EdgeState::Safe, EdgeState::Liq) => Some(EdgeTransition::SafeToLiq),
            (EdgeState::Liq, EdgeState::Liq) => {
                if prev_hf.is_finite() && prev_hf > 0.0 {
                    let delta = (prev_hf - hf) / prev_hf;
                    if delta >= hysteresis_bps as f64 / 10000.0 {
                        Some(EdgeTransition::Worsened)
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            _ => None,
        };

        entry.edge_state = new_state;
        if transition.is_some() {
            entry.last_edge_block = Some(block);
        }
        transition
    }

    pub fn get(&self, addr: &Address) -> Option<TrackedUser> {
        self.users.get(addr).map(|e| e.clone())
    }

    pub fn iter_all(&self) -> Vec<TrackedUser> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    /// All users with `debtUsd >= min` and `hf` below threshold, ascending
    /// HF. `below_threshold` is read-only — callers decide what happens.
    pub fn below_threshold(&self, threshold: f64, min_debt_usd_1e18: u128) -> Vec<TrackedUser> {
        let mut out: Vec<TrackedUser> = self
            .users
            .iter()
            .filter(|e| e.health_factor < threshold && e.last_debt_usd_1e18 >= min_debt_usd_1e18)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.health_factor.partial_cmp(&b.health_factor).unwrap());
        out
    }

    pub fn lowest_hf(&self) -> Option<(Address, f64)> {
        self.users
            .iter()
            .min_by(|a, b| a.health_factor.partial_cmp(&b.health_factor).unwrap())
            .map(|e| (e.address, e.health_factor))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTransition {
    SafeToLiq,
    Worsened,
}

impl EdgeTransition {
    pub fn reason(&self) -> &'static str {
        match self {
            EdgeTransition::SafeToLiq => "safe_to_liq",
            EdgeTransition::Worsened => "worsened",
        }
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
    fn test_safe_to_liq_emits_once() {
        let rs = RiskSet::new();
        let a = addr(1);
        rs.upsert(a);

        assert_eq!(
            rs.update_hf(a, 0.995, 1000, 100, 1.0, 20),
            Some(EdgeTransition::SafeToLiq)
        );
        // Same block again: idempotent, no second emission.
        assert_eq!(rs.update_hf(a, 0.994, 1000, 100, 1.0, 20), None);
    }

    #[test]
    fn test_hysteresis_suppresses_small_worsening() {
        let rs = RiskSet::new();
        let a = addr(2);
        rs.upsert(a);
        rs.update_hf(a, 0.995, 1000, 100, 1.0, 20);

        // hf 0.994 at block 101: ratio change ~0.001 < 0.0020 -> suppressed
        assert_eq!(rs.update_hf(a, 0.994, 1000, 101, 1.0, 20), None);

        // hf 0.990 at block 103: ratio change ~0.004 >= 0.0020 -> emits
        assert_eq!(
            rs.update_hf(a, 0.990, 1000, 103, 1.0, 20),
            Some(EdgeTransition::Worsened)
        );
    }

    #[test]
    fn test_below_threshold_respects_min_debt() {
        let rs = RiskSet::new();
        let a = addr(3);
        rs.upsert(a);
        rs.update_hf(a, 0.5, 5, 1, 1.0, 20); // debt too small

        assert!(rs.below_threshold(1.0, 10).is_empty());
    }
}
