//! Reserve configuration and event-signature constants for the pool
//! this bot targets.
//!
//! The teacher's original layer here supported pluggable lending
//! protocols (AAVE v3/v4, Compound v3) behind `LendingProtocol`/
//! `LiquidatableProtocol` traits. That generality has no counterpart:
//! this bot targets one pool interface, so the cache and signature
//! helpers below replace the trait layer directly.

mod bootstrap;
mod data_cache;
mod events;

pub use bootstrap::{ReserveConfig, ReserveConfigClient, ReserveConfigEntry};
pub use data_cache::{derive_liquidation_bonus_bps, ProtocolDataCache, ReserveData};
pub use events::ProtocolEventSignatures;
