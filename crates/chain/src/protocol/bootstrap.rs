//! One-time reserve configuration bootstrap (external interface A's
//! data-provider sidecar: `getReserveConfigurationData` /
//! `getReserveTokensAddresses`), batched through the same `aggregate3`
//! aggregator as [`crate::multicall`] and [`crate::position_view`].
//!
//! Grounded on `position_view.rs`'s `PositionClient` shape: one
//! `Call3` per asset per view function, decoded back in asset order.
//! This has no teacher counterpart (the teacher's `protocol` layer
//! hid bootstrap behind a `LendingProtocol` trait that this bot does
//! not carry), so the interface below is written fresh against the
//! same local-`sol!`-per-module idiom the rest of this crate uses.

use crate::multicall::{BlockTag, MulticallError};
use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::Result;

sol! {
    #[sol(rpc)]
    interface IPoolDataProvider {
        function getReserveConfigurationData(address asset) external view returns (
            uint256 decimals,
            uint256 ltv,
            uint256 liquidationThreshold,
            uint256 liquidationBonus,
            uint256 reserveFactor,
            bool usageAsCollateralEnabled,
            bool borrowingEnabled,
            bool stableBorrowRateEnabled,
            bool isActive,
            bool isFrozen
        );

        function getReserveTokensAddresses(address asset) external view returns (
            address aTokenAddress,
            address stableDebtTokenAddress,
            address variableDebtTokenAddress
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

/// Decoded configuration for one reserve, before the caller attaches
/// the price feed handle (that comes from operator config, not chain
/// state — see [`crate::oracle`]).
#[derive(Debug, Clone, Copy)]
pub struct ReserveConfig {
    pub decimals: u8,
    pub liquidation_bonus_raw: u32,
    pub is_collateral_enabled: bool,
    pub is_borrow_enabled: bool,
    pub a_token_address: Address,
    pub variable_debt_token_address: Address,
}

/// One asset's bootstrap read, paired with its decode result.
pub struct ReserveConfigEntry {
    pub asset: Address,
    pub data: Result<ReserveConfig, MulticallError>,
}

/// Batched reserve-configuration reader. One instance per
/// `(multicall, data provider)` deployment pair; only ever called at
/// bootstrap, so it has no need for [`crate::retry::RetryPolicy`]
/// hedging the way [`crate::multicall::MulticallClient`] does.
pub struct ReserveConfigClient<P> {
    multicall_address: Address,
    data_provider_address: Address,
    provider: P,
}

impl<P: Provider + Clone> ReserveConfigClient<P> {
    pub fn new(multicall_address: Address, data_provider_address: Address, provider: P) -> Self {
        Self {
            multicall_address,
            data_provider_address,
            provider,
        }
    }

    /// Fetch configuration + token addresses for every asset in
    /// `assets`, two calls per asset, in a single batch.
    pub async fn get_reserve_config_batch(&self, assets: &[Address]) -> Result<Vec<ReserveConfigEntry>> {
        let mut calls: Vec<Call3> = Vec::with_capacity(assets.len() * 2);
        for asset in assets {
            calls.push(Call3 {
                target: self.data_provider_address,
                allowFailure: true,
                callData: Bytes::from(
                    IPoolDataProvider::getReserveConfigurationDataCall { asset: *asset }.abi_encode(),
                ),
            });
            calls.push(Call3 {
                target: self.data_provider_address,
                allowFailure: true,
                callData: Bytes::from(
                    IPoolDataProvider::getReserveTokensAddressesCall { asset: *asset }.abi_encode(),
                ),
            });
        }

        let contract = IMulticall3::new(self.multicall_address, &self.provider);
        let results = contract
            .aggregate3(calls)
            .block(alloy::rpc::types::BlockId::latest())
            .call()
            .await?
            ._0;

        Ok(assets
            .iter()
            .zip(results.chunks_exact(2))
            .map(|(asset, pair)| ReserveConfigEntry {
                asset: *asset,
                data: decode_pair(&pair[0], &pair[1]),
            })
            .collect())
    }
}

fn decode_pair(config_result: &Result3, tokens_result: &Result3) -> Result<ReserveConfig, MulticallError> {
    if !config_result.success || !tokens_result.success {
        return Err(MulticallError::CallReverted);
    }
    let config = IPoolDataProvider::getReserveConfigurationDataCall::abi_decode_returns(
        &config_result.returnData,
        true,
    )
    .map_err(|_| MulticallError::DecodeFailed)?;
    let tokens = IPoolDataProvider::getReserveTokensAddressesCall::abi_decode_returns(
        &tokens_result.returnData,
        true,
    )
    .map_err(|_| MulticallError::DecodeFailed)?;

    Ok(ReserveConfig {
        decimals: config.decimals.to::<u64>() as u8,
        liquidation_bonus_raw: config.liquidationBonus.to::<u64>() as u32,
        is_collateral_enabled: config.usageAsCollateralEnabled,
        is_borrow_enabled: config.borrowingEnabled,
        a_token_address: tokens.aTokenAddress,
        variable_debt_token_address: tokens.variableDebtTokenAddress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_config_entry_carries_asset_on_failure() {
        let entry = ReserveConfigEntry {
            asset: Address::ZERO,
            data: Err(MulticallError::CallReverted),
        };
        assert!(entry.data.is_err());
        assert_eq!(entry.asset, Address::ZERO);
    }
}
