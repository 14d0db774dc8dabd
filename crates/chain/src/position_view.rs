//! Per-reserve position reads (external interface A's `getUserReserveData`),
//! batched through the same `aggregate3` aggregator as [`crate::multicall`].
//!
//! Grounded on `multicall.rs`'s `Call3`/`Result3` batching shape, applied
//! here to a per-asset call instead of a per-user one.

use crate::multicall::{BlockTag, MulticallError};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::Result;

sol! {
    #[sol(rpc)]
    interface IPoolReserveView {
        function getUserReserveData(address asset, address user) external view returns (
            uint256 currentATokenBalance,
            uint256 currentStableDebt,
            uint256 currentVariableDebt,
            uint256 principalStableDebt,
            uint256 scaledVariableDebt,
            uint256 stableBorrowRate,
            uint256 liquidityRate,
            uint40 stableRateLastUpdated,
            bool usageAsCollateralEnabled
        );
    }

    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    struct Result3 {
        bool success;
        bytes returnData;
    }

    #[sol(rpc)]
    interface IMulticall3 {
        function aggregate3(Call3[] calldata calls) external payable returns (Result3[] memory returnData);
    }
}

/// Decoded `getUserReserveData` result for a single `(user, asset)` pair.
#[derive(Debug, Clone, Copy)]
pub struct UserReserveData {
    pub a_token_balance: U256,
    pub stable_debt: U256,
    pub variable_debt: U256,
    pub usage_as_collateral_enabled: bool,
}

impl UserReserveData {
    pub fn total_debt(&self) -> U256 {
        self.stable_debt + self.variable_debt
    }
}

/// One per-asset entry paired with its decoded result.
pub struct ReserveEntry {
    pub asset: Address,
    pub data: Result<UserReserveData, MulticallError>,
}

/// Batched per-reserve position reader, one instance per pool +
/// multicall deployment. Mirrors [`crate::multicall::MulticallClient`]'s
/// shape but keyed by asset instead of by user.
pub struct PositionClient<P> {
    multicall_address: Address,
    pool_address: Address,
    provider: P,
}

impl<P: Provider + Clone> PositionClient<P> {
    pub fn new(multicall_address: Address, pool_address: Address, provider: P) -> Self {
        Self {
            multicall_address,
            pool_address,
            provider,
        }
    }

    /// Fetch `user`'s position in every asset of `assets` in a single
    /// batch call. Honors `block_tag` per external interface B.
    pub async fn get_user_reserve_data_batch(
        &self,
        user: Address,
        assets: &[Address],
        block_tag: BlockTag,
    ) -> Result<Vec<ReserveEntry>> {
        let calls: Vec<Call3> = assets
            .iter()
            .map(|asset| Call3 {
                target: self.pool_address,
                allowFailure: true,
                callData: Bytes::from(
                    IPoolReserveView::getUserReserveDataCall {
                        asset: *asset,
                        user,
                    }
                    .abi_encode(),
                ),
            })
            .collect();

        let contract = IMulticall3::new(self.multicall_address, &self.provider);
        let results = contract
            .aggregate3(calls)
            .block(block_tag_to_block_id(block_tag))
            .call()
            .await?
            ._0;

        Ok(assets
            .iter()
            .zip(results.into_iter())
            .map(|(asset, result)| ReserveEntry {
                asset: *asset,
                data: decode_result(result),
            })
            .collect())
    }
}

fn block_tag_to_block_id(tag: BlockTag) -> alloy::rpc::types::BlockId {
    use alloy::rpc::types::BlockId;
    match tag {
        BlockTag::Number(n) => BlockId::number(n),
        BlockTag::Pending => BlockId::pending(),
        BlockTag::Latest => BlockId::latest(),
    }
}

fn decode_result(result: Result3) -> Result<UserReserveData, MulticallError> {
    if !result.success {
        return Err(MulticallError::CallReverted);
    }
    let decoded = IPoolReserveView::getUserReserveDataCall::abi_decode_returns(&result.returnData, true)
        .map_err(|_| MulticallError::DecodeFailed)?;
    Ok(UserReserveData {
        a_token_balance: decoded.currentATokenBalance,
        stable_debt: decoded.currentStableDebt,
        variable_debt: decoded.currentVariableDebt,
        usage_as_collateral_enabled: decoded.usageAsCollateralEnabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_debt_sums_stable_and_variable() {
        let data = UserReserveData {
            a_token_balance: U256::from(1u64),
            stable_debt: U256::from(100u64),
            variable_debt: U256::from(50u64),
            usage_as_collateral_enabled: true,
        };
        assert_eq!(data.total_debt(), U256::from(150u64));
    }
}
