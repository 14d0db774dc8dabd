//! Chain interaction layer.
//!
//! This crate provides:
//! - Batched reads (multicall) and RPC retry/hedge policy
//! - Contract bindings for the pool and the on-chain executor
//! - Event listeners feeding the shared price and protocol caches
//! - The 1e18-normalized price cache and the reserve configuration cache
//! - Multi-endpoint transaction broadcasting with fee-bump replacement

mod broadcaster;
mod contracts;
mod event_listener;
mod gas;
mod multicall;
mod oracle;
mod position_view;
mod protocol;
mod retry;

pub use broadcaster::{Broadcaster, BroadcasterConfig, BroadcastOutcome};
pub use contracts::{AttemptLiquidationParams, IExecutor, PoolContract};
pub use event_listener::{
    new_transmission_signature, OracleUpdate, PoolEvent, PoolEventListener, PoolSweepTrigger,
    PriceFeedListener, PriceShockSignal,
};
pub use gas::{create_gas_strategy, GasParams, GasStrategy};
pub use multicall::{
    is_pending_unsupported, BatchEntry, BlockTag, MulticallClient, MulticallError,
    UserAccountData,
};
pub use position_view::{PositionClient, ReserveEntry, UserReserveData};
pub use oracle::{
    ChainlinkOracle, ChainlinkOracleBuilder, Oracle, OracleType, PriceCache, PriceData,
    PriceEntry, PriceLookupError, PriceResult,
};
pub use protocol::{
    derive_liquidation_bonus_bps, ProtocolDataCache, ProtocolEventSignatures, ReserveConfig,
    ReserveConfigClient, ReserveConfigEntry, ReserveData,
};
pub use retry::{execute_with_policy, PolicyError, RetryPolicy};
