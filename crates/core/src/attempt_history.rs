//! Bounded per-user attempt history plus pending detection.
//!
//! Direct port of the ring-buffer idiom already used elsewhere in this
//! codebase for bounded per-position state, applied here to liquidation
//! attempts instead.

use alloy::primitives::{Address, B256};
use arrayvec::ArrayVec;
use dashmap::DashMap;
use std::collections::HashMap;

const HISTORY_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Sent,
    Pending,
    Included,
    Reverted,
    Failed,
    Error,
    SkipNoPair,
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub user: Address,
    pub ts_ms: u64,
    pub status: AttemptStatus,
    pub tx_hash: Option<B256>,
    pub nonce: Option<u64>,
    pub debt_asset: Option<Address>,
    pub collateral_asset: Option<Address>,
    pub debt_to_cover_raw: Option<u128>,
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn new(user: Address, ts_ms: u64, status: AttemptStatus) -> Self {
        Self {
            user,
            ts_ms,
            status,
            tx_hash: None,
            nonce: None,
            debt_asset: None,
            collateral_asset: None,
            debt_to_cover_raw: None,
            error: None,
        }
    }
}

/// Per-status attempt counts, returned by [`AttemptHistory::stats`].
#[derive(Debug, Default, Clone)]
pub struct AttemptStats {
    pub counts: HashMap<&'static str, u64>,
}

fn status_label(status: AttemptStatus) -> &'static str {
    match status {
        AttemptStatus::Sent => "sent",
        AttemptStatus::Pending => "pending",
        AttemptStatus::Included => "included",
        AttemptStatus::Reverted => "reverted",
        AttemptStatus::Failed => "failed",
        AttemptStatus::Error => "error",
        AttemptStatus::SkipNoPair => "skip_no_pair",
    }
}

#[derive(Debug, Default)]
pub struct AttemptHistory {
    // Addresses are lowercased for keying (Address's Eq/Hash is already
    // case-independent once parsed, so this is automatic).
    records: DashMap<Address, ArrayVec<AttemptRecord, HISTORY_CAP>>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn record(&self, r: AttemptRecord) {
        let mut ring = self.records.entry(r.user).or_insert_with(ArrayVec::new);
        if ring.is_full() {
            ring.remove(0);
        }
        ring.push(r);
    }

    pub fn last(&self, user: &Address) -> Option<AttemptRecord> {
        self.records.get(user).and_then(|ring| ring.last().cloned())
    }

    /// True iff the most recent record for `user` has status `Pending`.
    pub fn has_pending(&self, user: &Address) -> bool {
        self.last(user)
            .map(|r| r.status == AttemptStatus::Pending)
            .unwrap_or(false)
    }

    pub fn history(&self, user: &Address) -> Vec<AttemptRecord> {
        self.records
            .get(user)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> AttemptStats {
        let mut counts = HashMap::new();
        for ring in self.records.iter() {
            for record in ring.value().iter() {
                *counts.entry(status_label(record.status)).or_insert(0u64) += 1;
            }
        }
        AttemptStats { counts }
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
    fn test_has_pending_tracks_most_recent_only() {
        let h = AttemptHistory::new();
        let u = addr(1);
        h.record(AttemptRecord::new(u, 1, AttemptStatus::Pending));
        assert!(h.has_pending(&u));

        h.record(AttemptRecord::new(u, 2, AttemptStatus::Included));
        assert!(!h.has_pending(&u));
    }

    #[test]
    fn test_ring_trims_at_cap() {
        let h = AttemptHistory::new();
        let u = addr(2);
        for i in 0..15u64 {
            h.record(AttemptRecord::new(u, i, AttemptStatus::Sent));
        }
        assert_eq!(h.history(&u).len(), HISTORY_CAP);
        // Oldest entries (ts 0..5) should have been evicted.
        assert_eq!(h.history(&u).first().unwrap().ts_ms, 5);
    }
}
