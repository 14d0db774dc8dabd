//! Coalesced set of users/reserves touched since the last verification.
//!
//! Two unordered sets; inserting an existing element is a no-op, draining
//! empties the set. No per-entry count is kept — membership is the only
//! state, matching the event-accumulation style used elsewhere in this
//! codebase for coalescing bursts of chain events into a single pass.

use alloy::primitives::Address;
use dashmap::DashSet;

#[derive(Debug, Default)]
pub struct DirtyQueue {
    users: DashSet<Address>,
    reserves: DashSet<Address>,
}

impl DirtyQueue {
    pub fn new() -> Self {
        Self {
            users: DashSet::new(),
            reserves: DashSet::new(),
        }
    }

    pub fn touch_user(&self, addr: Address) {
        self.users.insert(addr);
    }

    pub fn touch_reserve(&self, addr: Address) {
        self.reserves.insert(addr);
    }

    /// Drain up to `limit` users (0 = unlimited), clearing only the
    /// drained entries.
    pub fn drain_users(&self, limit: usize) -> Vec<Address> {
        Self::drain(&self.users, limit)
    }

    pub fn drain_reserves(&self, limit: usize) -> Vec<Address> {
        Self::drain(&self.reserves, limit)
    }

    fn drain(set: &DashSet<Address>, limit: usize) -> Vec<Address> {
        let all: Vec<Address> = set.iter().map(|e| *e).collect();
        let taken = if limit == 0 || limit >= all.len() {
            all
        } else {
            all[..limit].to_vec()
        };
        for addr in &taken {
            set.remove(addr);
        }
        taken
    }

    pub fn pending_users(&self) -> usize {
        self.users.len()
    }

    pub fn pending_reserves(&self) -> usize {
        self.reserves.len()
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
    fn test_coalescing_is_idempotent() {
        let q = DirtyQueue::new();
        let a = addr(1);
        q.touch_user(a);
        q.touch_user(a);
        assert_eq!(q.pending_users(), 1);
    }

    #[test]
    fn test_drain_empties_set() {
        let q = DirtyQueue::new();
        q.touch_user(addr(1));
        q.touch_user(addr(2));

        let drained = q.drain_users(0);
        assert_eq!(drained.len(), 2);
        assert_eq!(q.pending_users(), 0);
    }

    #[test]
    fn test_drain_respects_limit() {
        let q = DirtyQueue::new();
        for i in 1..=5u8 {
            q.touch_user(addr(i));
        }
        let drained = q.drain_users(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(q.pending_users(), 3);
    }
}
