//! Reserve configuration cache, populated once at bootstrap.
//!
//! Keys are lowercased token addresses (automatic: `Address` equality is
//! already case-independent once parsed). `liquidationBonusBps` equals
//! `rawBonus - 10000` when `rawBonus > 10000`, else a configured
//! fallback — never hardcoded, since the spec leaves that fallback
//! operator-tunable.

use alloy::primitives::Address;
use dashmap::DashMap;

/// Immutable-for-the-run reserve configuration.
#[derive(Debug, Clone)]
pub struct ReserveData {
    pub decimals: u8,
    pub liquidation_bonus_bps: u16,
    pub is_collateral_enabled: bool,
    pub is_borrow_enabled: bool,
    pub variable_debt_token_address: Address,
    pub a_token_address: Address,
    pub price_feed_handle: Address,
}

/// Derive `liquidationBonusBps` from a raw on-chain `liquidationBonus`
/// value (10000 + bonusBps per external interface A), falling back to
/// the operator-configured default when the raw value looks malformed
/// (spec §9 open question: ambiguous for all-vs-malformed reserves, so
/// this is treated as operator-configurable rather than guessed).
pub fn derive_liquidation_bonus_bps(raw_bonus: u32, default_liquidation_bonus_bps: u16) -> u16 {
    if raw_bonus > 10000 {
        (raw_bonus - 10000) as u16
    } else {
        default_liquidation_bonus_bps
    }
}

#[derive(Debug, Default)]
pub struct ProtocolDataCache {
    reserves: DashMap<Address, ReserveData>,
}

impl ProtocolDataCache {
    pub fn new() -> Self {
        Self {
            reserves: DashMap::new(),
        }
    }

    pub fn put(&self, token: Address, data: ReserveData) {
        self.reserves.insert(token, data);
    }

    pub fn reserve(&self, token: &Address) -> Option<ReserveData> {
        self.reserves.get(token).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.reserves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reserves.is_empty()
    }

    pub fn all_tokens(&self) -> Vec<Address> {
        self.reserves.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bonus_from_raw_value() {
        assert_eq!(derive_liquidation_bonus_bps(10500, 500), 500);
        assert_eq!(derive_liquidation_bonus_bps(0, 500), 500);
    }

    #[test]
    fn test_cache_roundtrip() {
        let cache = ProtocolDataCache::new();
        let token = Address::ZERO;
        cache.put(
            token,
            ReserveData {
                decimals: 6,
                liquidation_bonus_bps: 500,
                is_collateral_enabled: true,
                is_borrow_enabled: true,
                variable_debt_token_address: Address::ZERO,
                a_token_address: Address::ZERO,
                price_feed_handle: Address::ZERO,
            },
        );
        assert!(cache.reserve(&token).is_some());
        assert_eq!(cache.len(), 1);
    }
}
