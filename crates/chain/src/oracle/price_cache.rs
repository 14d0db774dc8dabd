//! 1e18-normalized USD price cache with cache-first, RPC-fallback reads.
//!
//! Normalization follows the exact integer rule: given a raw aggregator
//! answer with `d` source decimals, `price1e18 = answer * 10^(18-d)` when
//! `d < 18`, `answer / 10^(d-18)` when `d > 18`, else `answer` unchanged.
//! Composed (ratio) feeds are resolved against a base feed and never
//! trigger on their own.

use alloy::primitives::{Address, U256};
use dashmap::DashMap;

/// A single cached price observation.
#[derive(Debug, Clone, Copy)]
pub struct PriceEntry {
    pub price_1e18: U256,
    pub last_update_ts_ms: u64,
    pub source_decimals: u8,
}

/// Cache-miss reasons a caller can act on; never silently substituted
/// with zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceLookupError {
    Missing,
    Stale,
}

pub type PriceResult = Result<U256, PriceLookupError>;

#[derive(Debug, Default)]
pub struct PriceCache {
    prices: DashMap<Address, PriceEntry>,
    feed_decimals: DashMap<Address, u8>,
    /// derived feed (e.g. token/ETH ratio) -> base feed (e.g. ETH/USD)
    composed: DashMap<Address, Address>,
    max_staleness_ms: u64,
}

impl PriceCache {
    pub fn new(max_staleness_ms: u64) -> Self {
        Self {
            prices: DashMap::new(),
            feed_decimals: DashMap::new(),
            composed: DashMap::new(),
            max_staleness_ms,
        }
    }

    /// Normalize a raw aggregator answer to 1e18 scale. Rejects
    /// non-positive answers by returning `None` — callers log and skip.
    pub fn normalize(answer: i128, source_decimals: u8) -> Option<U256> {
        if answer <= 0 {
            return None;
        }
        let raw = U256::from(answer as u128);
        Some(rescale_to_18(raw, source_decimals))
    }

    pub fn put_usd_1e18(&self, token: Address, price_1e18: U256, ts_ms: u64, source_decimals: u8) {
        self.prices.insert(
            token,
            PriceEntry {
                price_1e18,
                last_update_ts_ms: ts_ms,
                source_decimals,
            },
        );
    }

    pub fn get_usd_1e18(&self, token: &Address, now_ms: u64) -> PriceResult {
        match self.prices.get(token) {
            None => Err(PriceLookupError::Missing),
            Some(entry) => {
                if self.max_staleness_ms > 0
                    && now_ms.saturating_sub(entry.last_update_ts_ms) > self.max_staleness_ms
                {
                    Err(PriceLookupError::Stale)
                } else {
                    Ok(entry.price_1e18)
                }
            }
        }
    }

    pub fn register_feed_decimals(&self, feed: Address, decimals: u8) {
        self.feed_decimals.insert(feed, decimals);
    }

    pub fn feed_decimals(&self, feed: &Address) -> Option<u8> {
        self.feed_decimals.get(feed).map(|v| *v)
    }

    pub fn register_composed_feed(&self, derived_feed: Address, base_feed: Address) {
        self.composed.insert(derived_feed, base_feed);
    }

    /// Resolve a composed (ratio) price: `ratio1e18 * base_usd_1e18 / 1e18`.
    /// Both operands must be cached; otherwise this is a cache miss.
    pub fn get_composed_usd_1e18(
        &self,
        ratio_token: &Address,
        base_feed_token: &Address,
        now_ms: u64,
    ) -> PriceResult {
        let ratio = self.get_usd_1e18(ratio_token, now_ms)?;
        let base = self.get_usd_1e18(base_feed_token, now_ms)?;
        Ok(wad_mul(ratio, base))
    }
}

// The exact-integer rescale/WAD helpers live in `liquidator-core`, but
// `liquidator-core` depends on this crate, so the one rule and the one
// multiply this module needs are duplicated here in minimal form rather
// than introducing a dependency cycle.
const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

fn rescale_to_18(x: U256, from: u8) -> U256 {
    use std::cmp::Ordering;
    match from.cmp(&18) {
        Ordering::Equal => x,
        Ordering::Less => x * U256::from(10u128.pow((18 - from) as u32)),
        Ordering::Greater => x / U256::from(10u128.pow((from - 18) as u32)),
    }
}

fn wad_mul(a: U256, b: U256) -> U256 {
    (a * b) / WAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_scales_up_and_down() {
        // 8-decimal $2000 answer -> 1e18
        let n = PriceCache::normalize(200_000_000_000i128, 8).unwrap();
        assert_eq!(n, U256::from(2000u64) * U256::from(10u128.pow(18)));

        // non-positive answers are rejected
        assert!(PriceCache::normalize(0, 8).is_none());
        assert!(PriceCache::normalize(-5, 8).is_none());
    }

    #[test]
    fn test_missing_is_not_zero() {
        let cache = PriceCache::new(60_000);
        let token = Address::ZERO;
        assert_eq!(cache.get_usd_1e18(&token, 0), Err(PriceLookupError::Missing));
    }

    #[test]
    fn test_staleness() {
        let cache = PriceCache::new(1_000);
        let token = Address::ZERO;
        cache.put_usd_1e18(token, U256::from(1u64), 0, 8);
        assert_eq!(cache.get_usd_1e18(&token, 500), Ok(U256::from(1u64)));
        assert_eq!(
            cache.get_usd_1e18(&token, 2000),
            Err(PriceLookupError::Stale)
        );
    }
}
