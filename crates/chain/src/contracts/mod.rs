//! On-chain executor contract wrapper (external interface F) and the
//! pool/oracle event signature constants the listeners subscribe to.

pub mod common;
pub mod executor;

pub use executor::{AttemptLiquidationParams, IExecutor};

use crate::protocol::ProtocolEventSignatures;
use alloy::primitives::{Address, B256};

/// Pool contract event-signature accessor, used by `PoolEventListener`.
pub struct PoolContract {
    pub address: Address,
}

impl PoolContract {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn event_signatures() -> Vec<B256> {
        let sigs = ProtocolEventSignatures::aave_v3();
        [
            sigs.supply,
            sigs.withdraw,
            sigs.borrow,
            sigs.repay,
            sigs.liquidation,
            sigs.reserve_data_updated,
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
    fn test_pool_event_signatures_nonempty() {
        let sigs = PoolContract::event_signatures();
        assert_eq!(sigs.len(), 6);
    }
}
