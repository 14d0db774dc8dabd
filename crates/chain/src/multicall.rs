//! Batched-read aggregator (external interface B) and the lending
//! protocol view contract (external interface A) the Verifier calls
//! through it.
//!
//! Grounded on `oracle/chainlink.rs`'s `sol!`-generated RPC interface
//! idiom, applied here to `aggregate3` and `getUserAccountData` instead
//! of an aggregator feed.

use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::BlockId;
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::Result;

sol! {
    #[sol(rpc)]
    interface IPoolView {
        function getUserAccountData(address user) external view returns (
            uint256 totalCollateralBase,
            uint256 totalDebtBase,
            uint256 availableBorrowsBase,
            uint256 currentLiquidationThreshold,
            uint256 ltv,
            uint256 healthFactor
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

/// Decoded `getUserAccountData` result. `health_factor` is 1e18-scaled
/// and `*_base` amounts are 8-decimal USD per external interface A.
#[derive(Debug, Clone, Copy)]
pub struct UserAccountData {
    pub total_collateral_base: U256,
    pub total_debt_base: U256,
    pub current_liquidation_threshold: U256,
    pub ltv: U256,
    pub health_factor: U256,
}

/// A single per-user multicall entry paired with its decoded result, so
/// the caller can attribute failures back to the requesting address.
pub struct BatchEntry {
    pub user: Address,
    pub data: Result<UserAccountData, MulticallError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulticallError {
    CallReverted,
    DecodeFailed,
}

/// Block tag for a multicall/eth_call batch, matching external
/// interface B's `blockTag` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Pending,
    Latest,
}

impl BlockTag {
    fn to_block_id(self) -> BlockId {
        match self {
            BlockTag::Number(n) => BlockId::number(n),
            BlockTag::Pending => BlockId::pending(),
            BlockTag::Latest => BlockId::latest(),
        }
    }
}

/// Thin wrapper around a deployed Multicall3 + pool-view pair. One
/// instance per RPC endpoint; the Verifier owns the hedging/retry
/// policy, this type only knows how to shape and decode one call.
pub struct MulticallClient<P> {
    multicall_address: Address,
    pool_address: Address,
    provider: P,
}

impl<P: Provider + Clone> MulticallClient<P> {
    pub fn new(multicall_address: Address, pool_address: Address, provider: P) -> Self {
        Self {
            multicall_address,
            pool_address,
            provider,
        }
    }

    /// Build and execute one `aggregate3` batch over `users`, requesting
    /// `getUserAccountData` for each. Honors `block_tag` (number or
    /// `pending`) per external interface B. Individual call failures do
    /// not fail the batch (`allowFailure = true`); they surface as
    /// `MulticallError::CallReverted` on the corresponding entry.
    pub async fn get_user_account_data_batch(
        &self,
        users: &[Address],
        block_tag: BlockTag,
    ) -> Result<Vec<BatchEntry>> {
        let calls: Vec<Call3> = users
            .iter()
            .map(|user| Call3 {
                target: self.pool_address,
                allowFailure: true,
                callData: Bytes::from(
                    IPoolView::getUserAccountDataCall { user: *user }.abi_encode(),
                ),
            })
            .collect();

        let contract = IMulticall3::new(self.multicall_address, &self.provider);
        let results = contract
            .aggregate3(calls)
            .block(block_tag.to_block_id())
            .call()
            .await?
            ._0;

        Ok(users
            .iter()
            .zip(results.into_iter())
            .map(|(user, result)| BatchEntry {
                user: *user,
                data: decode_result(result),
            })
            .collect())
    }
}

fn decode_result(result: Result3) -> Result<UserAccountData, MulticallError> {
    if !result.success {
        return Err(MulticallError::CallReverted);
    }
    let decoded = IPoolView::getUserAccountDataCall::abi_decode_returns(&result.returnData, true)
        .map_err(|_| MulticallError::DecodeFailed)?;
    Ok(UserAccountData {
        total_collateral_base: decoded.totalCollateralBase,
        total_debt_base: decoded.totalDebtBase,
        current_liquidation_threshold: decoded.currentLiquidationThreshold,
        ltv: decoded.ltv,
        health_factor: decoded.healthFactor,
    })
}

/// True when a provider error class indicates "pending block tag not
/// supported" (spec §4.G block-tag semantics), rather than a transient
/// RPC failure. Matches the common `-32602`/"not supported" phrasing
/// used by RPC providers that reject `pending` on `eth_call`.
pub fn is_pending_unsupported(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("pending") && (msg.contains("not supported") || msg.contains("unsupported") || msg.contains("invalid block"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pending_unsupported_matches_common_phrasing() {
        let err = anyhow::anyhow!("block tag 'pending' is not supported on this network");
        assert!(is_pending_unsupported(&err));

        let err = anyhow::anyhow!("connection reset by peer");
        assert!(!is_pending_unsupported(&err));
    }
}
