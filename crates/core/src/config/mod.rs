//! Runtime configuration (spec §6 "Config surface").
//!
//! A single environment-driven `BotConfig`, loaded once at startup and
//! accessed through a global `OnceLock` for the lifetime of the
//! process (this bot targets one pool on one chain; the teacher's
//! multi-chain/multi-protocol TOML deployment registry generalized
//! past what this needs, so it didn't carry over — see DESIGN.md).

mod bot;

pub use bot::{
    config, init_config, BotConfig, EventBatchConfig, HeadPageConfig, PriceTriggerConfig,
};
