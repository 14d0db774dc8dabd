//! LiquidationPlanner (component I): builds up to `TOP_N_PAIRS`
//! `CandidatePlan`s for a single user, sorted by `oracleScore1e18`
//! descending.
//!
//! Grounded on [`crate::u256_math`]'s exact-integer rescale rule (no
//! float touches a money value here) and on `liquidator_chain`'s
//! [`PositionClient`]/[`ProtocolDataCache`]/[`PriceCache`] for the three
//! prefetch legs.

use crate::u256_math::rescale;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use liquidator_chain::{BlockTag, PositionClient, PriceCache, ProtocolDataCache, ReserveEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const TOP_N_PAIRS: usize = 3;
pub const CLOSE_FACTOR_BPS: u32 = 5000;
pub const HAIRCUT_BPS: u32 = 200;

#[derive(Debug, Clone, Copy)]
pub struct CandidatePlan {
    pub debt_asset: Address,
    pub collateral_asset: Address,
    pub debt_to_cover_raw: U256,
    pub expected_collateral_out_raw: U256,
    pub profit_usd_1e18: U256,
    pub oracle_score_1e18: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanError {
    PositionFetchFailed,
    NoPair,
}

struct ReservePosition {
    asset: Address,
    a_token_balance: U256,
    total_debt: U256,
    collateral_enabled: bool,
}

pub struct LiquidationPlanner<P> {
    position_client: Arc<PositionClient<P>>,
    protocol_cache: Arc<ProtocolDataCache>,
    price_cache: Arc<PriceCache>,
}

impl<P> LiquidationPlanner<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    pub fn new(
        position_client: Arc<PositionClient<P>>,
        protocol_cache: Arc<ProtocolDataCache>,
        price_cache: Arc<PriceCache>,
    ) -> Self {
        Self {
            position_client,
            protocol_cache,
            price_cache,
        }
    }

    /// Build up to [`TOP_N_PAIRS`] candidate plans for `user`. Spec §4.I
    /// steps 1-5. Returns `PositionFetchFailed` (no fallback, per spec)
    /// if the per-reserve batch call itself errors; an empty vec (not an
    /// error) if every pair is filtered out.
    pub async fn plan(&self, user: Address, now_ms: u64) -> Result<Vec<CandidatePlan>, PlanError> {
        let assets = self.protocol_cache.all_tokens();
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self
            .position_client
            .get_user_reserve_data_batch(user, &assets, BlockTag::Latest)
            .await
            .map_err(|_| PlanError::PositionFetchFailed)?;

        let positions = decode_positions(entries);

        let debt_positions: Vec<&ReservePosition> =
            positions.iter().filter(|p| !p.total_debt.is_zero()).collect();
        let collateral_positions: Vec<&ReservePosition> = positions
            .iter()
            .filter(|p| p.collateral_enabled && !p.a_token_balance.is_zero())
            .collect();

        if debt_positions.is_empty() || collateral_positions.is_empty() {
            return Ok(Vec::new());
        }

        // Prefetch prices in one concurrency wave for every unique asset
        // touched by either side of the cross product; decimals and
        // liquidation bonus come from the already-persistent protocol
        // cache, so only prices need a fresh read here.
        let mut unique: Vec<Address> = debt_positions.iter().map(|p| p.asset).collect();
        unique.extend(collateral_positions.iter().map(|p| p.asset));
        unique.sort();
        unique.dedup();

        let mut prices: HashMap<Address, U256> = HashMap::with_capacity(unique.len());
        for asset in unique {
            match self.price_cache.get_usd_1e18(&asset, now_ms) {
                Ok(p) => {
                    prices.insert(asset, p);
                }
                Err(e) => {
                    debug!(?asset, ?e, "price cache miss; pairs touching this asset skipped");
                }
            }
        }

        let mut candidates = Vec::new();
        for debt in &debt_positions {
            let Some(reserve) = self.protocol_cache.reserve(&debt.asset) else {
                continue;
            };
            let Some(&debt_price_1e18) = prices.get(&debt.asset) else {
                continue;
            };

            for collateral in &collateral_positions {
                if collateral.asset == debt.asset {
                    continue;
                }
                let Some(collateral_reserve) = self.protocol_cache.reserve(&collateral.asset) else {
                    continue;
                };
                let Some(&collateral_price_1e18) = prices.get(&collateral.asset) else {
                    continue;
                };

                if let Some(plan) = build_candidate(
                    debt,
                    &reserve,
                    debt_price_1e18,
                    collateral,
                    &collateral_reserve,
                    collateral_price_1e18,
                ) {
                    candidates.push(plan);
                }
            }
        }

        candidates.sort_by(|a, b| b.oracle_score_1e18.cmp(&a.oracle_score_1e18));
        candidates.truncate(TOP_N_PAIRS);
        Ok(candidates)
    }
}

fn decode_positions(entries: Vec<ReserveEntry>) -> Vec<ReservePosition> {
    entries
        .into_iter()
        .filter_map(|entry| match entry.data {
            Ok(data) => Some(ReservePosition {
                asset: entry.asset,
                a_token_balance: data.a_token_balance,
                total_debt: data.total_debt(),
                collateral_enabled: data.usage_as_collateral_enabled,
            }),
            Err(e) => {
                warn!(asset = %entry.asset, ?e, "skipping reserve with unreadable position data");
                None
            }
        })
        .collect()
}

/// Spec §4.I step 4, applied to one `(debt, collateral)` pair. Returns
/// `None` when the pair is excluded (insufficient collateral, or
/// `oracleScore_1e18 <= 0`).
fn build_candidate(
    debt: &ReservePosition,
    debt_reserve: &liquidator_chain::ReserveData,
    debt_price_1e18: U256,
    collateral: &ReservePosition,
    collateral_reserve: &liquidator_chain::ReserveData,
    collateral_price_1e18: U256,
) -> Option<CandidatePlan> {
    let debt_to_cover_raw = (debt.total_debt * U256::from(CLOSE_FACTOR_BPS)) / U256::from(10_000u32);
    if debt_to_cover_raw.is_zero() {
        return None;
    }

    let debt_to_cover_1e18 = rescale(debt_to_cover_raw, debt_reserve.decimals, 18);
    let debt_usd_1e18 = (debt_to_cover_1e18 * debt_price_1e18) / wad();

    if collateral_price_1e18.is_zero() {
        return None;
    }
    let collateral_amount_1e18 = (debt_usd_1e18 * wad()) / collateral_price_1e18;

    let bonus_bps = collateral_reserve.liquidation_bonus_bps as u64;
    let expected_collateral_1e18 =
        (collateral_amount_1e18 * U256::from(10_000u64 + bonus_bps)) / U256::from(10_000u32);
    let expected_collateral_raw = rescale(expected_collateral_1e18, 18, collateral_reserve.decimals);

    if expected_collateral_raw > collateral.a_token_balance {
        return None;
    }

    let collateral_out_1e18 = rescale(expected_collateral_raw, collateral_reserve.decimals, 18);
    let collateral_out_usd_1e18 = (collateral_out_1e18 * collateral_price_1e18) / wad();

    if collateral_out_usd_1e18 <= debt_usd_1e18 {
        return None;
    }
    let profit_1e18 = collateral_out_usd_1e18 - debt_usd_1e18;

    let haircut = (profit_1e18 * U256::from(HAIRCUT_BPS)) / U256::from(10_000u32);
    let oracle_score_1e18 = profit_1e18 - haircut;
    if oracle_score_1e18.is_zero() {
        return None;
    }

    Some(CandidatePlan {
        debt_asset: debt.asset,
        collateral_asset: collateral.asset,
        debt_to_cover_raw,
        expected_collateral_out_raw: expected_collateral_raw,
        profit_usd_1e18: profit_1e18,
        oracle_score_1e18,
    })
}

fn wad() -> U256 {
    crate::u256_math::WAD
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidator_chain::ReserveData;

    fn weth_reserve() -> ReserveData {
        ReserveData {
            decimals: 18,
            liquidation_bonus_bps: 500,
            is_collateral_enabled: true,
            is_borrow_enabled: true,
            variable_debt_token_address: Address::ZERO,
            a_token_address: Address::ZERO,
            price_feed_handle: Address::ZERO,
        }
    }

    fn usdc_reserve() -> ReserveData {
        ReserveData {
            decimals: 6,
            liquidation_bonus_bps: 500,
            is_collateral_enabled: true,
            is_borrow_enabled: true,
            variable_debt_token_address: Address::ZERO,
            a_token_address: Address::ZERO,
            price_feed_handle: Address::ZERO,
        }
    }

    /// Spec §8 end-to-end scenario 1: the literal worked example.
    #[test]
    fn test_profitable_plan_scenario_1() {
        let debt = ReservePosition {
            asset: Address::repeat_byte(1),
            a_token_balance: U256::ZERO,
            total_debt: U256::from(4_000_000_000u64), // 4000e6 USDC
            collateral_enabled: false,
        };
        let collateral = ReservePosition {
            asset: Address::repeat_byte(2),
            a_token_balance: U256::from(2_000_000_000_000_000_000u128), // 2e18 WETH
            total_debt: U256::ZERO,
            collateral_enabled: true,
        };

        let debt_price = U256::from(1u64) * wad(); // $1.00
        let collateral_price = U256::from(2000u64) * wad(); // $2000.00

        let plan = build_candidate(
            &debt,
            &usdc_reserve(),
            debt_price,
            &collateral,
            &weth_reserve(),
            collateral_price,
        )
        .expect("plan should be accepted");

        assert_eq!(plan.debt_to_cover_raw, U256::from(2_000_000_000u64)); // 2000e6
        assert_eq!(
            plan.expected_collateral_out_raw,
            U256::from(1_050_000_000_000_000_000u128) // 1.05e18
        );
        assert_eq!(plan.profit_usd_1e18, U256::from(100u64) * wad());
        assert_eq!(plan.oracle_score_1e18, U256::from(98u64) * wad());
    }

    /// Spec §8 end-to-end scenario 2: insufficient collateral excludes
    /// the pair.
    #[test]
    fn test_insufficient_collateral_excludes_pair() {
        let debt = ReservePosition {
            asset: Address::repeat_byte(1),
            a_token_balance: U256::ZERO,
            total_debt: U256::from(4_000_000_000u64),
            collateral_enabled: false,
        };
        let collateral = ReservePosition {
            asset: Address::repeat_byte(2),
            a_token_balance: U256::from(1_000_000_000_000_000_000u128), // 1e18 < 1.05e18
            total_debt: U256::ZERO,
            collateral_enabled: true,
        };

        let debt_price = U256::from(1u64) * wad();
        let collateral_price = U256::from(2000u64) * wad();

        assert!(build_candidate(
            &debt,
            &usdc_reserve(),
            debt_price,
            &collateral,
            &weth_reserve(),
            collateral_price,
        )
        .is_none());
    }

    /// Spec §8 testable property 5: profit is monotone in collateral
    /// price, holding debt price fixed.
    #[test]
    fn test_profit_monotone_in_collateral_price() {
        let debt = ReservePosition {
            asset: Address::repeat_byte(1),
            a_token_balance: U256::ZERO,
            total_debt: U256::from(4_000_000_000u64),
            collateral_enabled: false,
        };
        let collateral = ReservePosition {
            asset: Address::repeat_byte(2),
            a_token_balance: U256::from(10_000_000_000_000_000_000u128),
            total_debt: U256::ZERO,
            collateral_enabled: true,
        };
        let debt_price = U256::from(1u64) * wad();

        let lower = build_candidate(
            &debt,
            &usdc_reserve(),
            debt_price,
            &collateral,
            &weth_reserve(),
            U256::from(2000u64) * wad(),
        )
        .unwrap();
        let higher = build_candidate(
            &debt,
            &usdc_reserve(),
            debt_price,
            &collateral,
            &weth_reserve(),
            U256::from(2500u64) * wad(),
        )
        .unwrap();

        assert!(higher.oracle_score_1e18 >= lower.oracle_score_1e18);
    }
}
