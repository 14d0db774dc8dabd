//! On-chain executor contract (external interface F).
//!
//! The core treats this contract as a black box that either reverts,
//! succeeds, or is never mined — its internals (flash loans, swap
//! routing) are explicitly out of scope. The single entry point mirrors
//! the documented `attemptLiquidation` contract exactly.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    interface IExecutor {
        function attemptLiquidation(
            address user,
            address collateralAsset,
            address debtAsset,
            uint256 debtToCover,
            bytes calldata oneInchCalldata,
            uint256 minOut,
            address payout,
            uint256 expectedCollateralOut
        ) external returns (uint256);
    }
}

/// Parameters for a single executor call, matching external interface F
/// field-for-field.
#[derive(Debug, Clone)]
pub struct AttemptLiquidationParams {
    pub user: Address,
    pub collateral_asset: Address,
    pub debt_asset: Address,
    pub debt_to_cover_raw: U256,
    pub one_inch_calldata: Bytes,
    pub min_out_raw: U256,
    pub payout: Address,
    pub expected_collateral_out_raw: U256,
}

impl AttemptLiquidationParams {
    pub fn encode(&self) -> Bytes {
        use alloy::sol_types::SolCall;
        let call = IExecutor::attemptLiquidationCall {
            user: self.user,
            collateralAsset: self.collateral_asset,
            debtAsset: self.debt_asset,
            debtToCover: self.debt_to_cover_raw,
            oneInchCalldata: self.one_inch_calldata.clone(),
            minOut: self.min_out_raw,
            payout: self.payout,
            expectedCollateralOut: self.expected_collateral_out_raw,
        };
        Bytes::from(call.abi_encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_roundtrips_selector() {
        let params = AttemptLiquidationParams {
            user: Address::ZERO,
            collateral_asset: Address::ZERO,
            debt_asset: Address::ZERO,
            debt_to_cover_raw: U256::from(1000u64),
            one_inch_calldata: Bytes::new(),
            min_out_raw: U256::from(900u64),
            payout: Address::ZERO,
            expected_collateral_out_raw: U256::from(950u64),
        };
        let encoded = params.encode();
        assert!(encoded.len() >= 4);
    }
}
