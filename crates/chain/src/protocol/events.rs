//! Protocol event types and signatures.
//!
//! This module defines event types that are common across different lending
//! protocols, along with their Keccak256 signatures for log filtering.

use alloy::primitives::B256;

/// Event signatures for log subscription.
///
/// These are the Keccak256 hashes of event signatures for filtering logs.
/// Different protocols may have different events, so all fields are optional.
#[derive(Debug, Clone, Default)]
pub struct ProtocolEventSignatures {
    /// Supply/Deposit event
    pub supply: Option<B256>,
    /// Withdraw event
    pub withdraw: Option<B256>,
    /// Borrow event
    pub borrow: Option<B256>,
    /// Repay event
    pub repay: Option<B256>,
    /// Liquidation event
    pub liquidation: Option<B256>,
    /// Reserve data updated (AAVE-specific)
    pub reserve_data_updated: Option<B256>,
    /// Interest rate update
    pub interest_rate_update: Option<B256>,
}

impl ProtocolEventSignatures {
    /// Create signatures for AAVE V3.
    pub fn aave_v3() -> Self {
        use alloy::primitives::keccak256;

        Self {
            // Supply(address indexed reserve, address user, address indexed onBehalfOf, uint256 amount, uint16 indexed referralCode)
            supply: Some(keccak256(
                "Supply(address,address,address,uint256,uint16)",
            )),
            // Withdraw(address indexed reserve, address indexed user, address indexed to, uint256 amount)
            withdraw: Some(keccak256(
                "Withdraw(address,address,address,uint256)",
            )),
            // Borrow(address indexed reserve, address user, address indexed onBehalfOf, uint256 amount, uint8 interestRateMode, uint256 borrowRate, uint16 indexed referralCode)
            borrow: Some(keccak256(
                "Borrow(address,address,address,uint256,uint8,uint256,uint16)",
            )),
            // Repay(address indexed reserve, address indexed user, address indexed repayer, uint256 amount, bool useATokens)
            repay: Some(keccak256(
                "Repay(address,address,address,uint256,bool)",
            )),
            // LiquidationCall(address indexed collateralAsset, address indexed debtAsset, address indexed user, uint256 debtToCover, uint256 liquidatedCollateralAmount, address liquidator, bool receiveAToken)
            liquidation: Some(keccak256(
                "LiquidationCall(address,address,address,uint256,uint256,address,bool)",
            )),
            // ReserveDataUpdated(address indexed reserve, uint256 liquidityRate, uint256 stableBorrowRate, uint256 variableBorrowRate, uint256 liquidityIndex, uint256 variableBorrowIndex)
            reserve_data_updated: Some(keccak256(
                "ReserveDataUpdated(address,uint256,uint256,uint256,uint256,uint256)",
            )),
            interest_rate_update: None,
        }
    }

    /// Get all non-None signatures as a vector.
    pub fn all_signatures(&self) -> Vec<B256> {
        [
            self.supply,
            self.withdraw,
            self.borrow,
            self.repay,
            self.liquidation,
            self.reserve_data_updated,
            self.interest_rate_update,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aave_v3_signatures() {
        let sigs = ProtocolEventSignatures::aave_v3();
        assert!(sigs.supply.is_some());
        assert!(sigs.withdraw.is_some());
        assert!(sigs.borrow.is_some());
        assert!(sigs.repay.is_some());
        assert!(sigs.liquidation.is_some());
    }

    #[test]
    fn test_all_signatures() {
        let sigs = ProtocolEventSignatures::aave_v3();
        let all = sigs.all_signatures();
        assert!(all.len() >= 5);
    }
}
