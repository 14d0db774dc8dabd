//! Runtime configuration surface (spec §6 "Config surface"), loaded
//! from environment variables with `.env` support.
//!
//! Grounded on this crate's prior profile-based `BotConfig`: same
//! `OnceLock`/`init_config`/`config()` global-access idiom, same
//! from-env construction style, narrowed to the names this system
//! actually recognizes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub execution_enabled: bool,
    pub broadcast_rpc_urls: Vec<String>,
    pub monitor_rpc_url: String,
    pub http_rpc_url: String,
    /// Secondary read RPC the verifier hedges against once
    /// `head_check_hedge_ms` elapses. Empty disables hedging even if
    /// `head_check_hedge_ms` is nonzero.
    pub http_rpc_url_secondary: String,
    pub ws_rpc_url: String,

    pub chainlink_feeds_by_address: HashMap<String, String>,
    pub chainlink_feeds_by_symbol: HashMap<String, String>,
    pub derived_price_feeds: Vec<String>,

    pub min_debt_usd: f64,
    pub hf_threshold_start: f64,
    pub execution_hf_threshold_bps: u32,
    pub hysteresis_bps: u32,

    pub price_trigger: PriceTriggerConfig,

    pub multicall_batch_size: usize,
    pub chunk_timeout_ms: u64,
    pub chunk_retry_attempts: u32,
    pub head_check_hedge_ms: u64,
    pub run_stall_abort_ms: u64,
    pub ws_heartbeat_ms: u64,

    pub event_batch: EventBatchConfig,

    pub head_page: HeadPageConfig,
    pub reserve_min_index_delta_bps: u32,

    pub global_rpc_rate_limit: f64,
    pub global_rpc_burst_capacity: u32,
    pub event_reserve_frac: f64,
    pub eth_call_max_in_flight: usize,

    pub pending_verify_enabled: bool,
    pub micro_verify_max_per_block: usize,
    pub scan_lock_dedup_window_ms: u64,
    pub maintenance_sample_size: usize,
    pub price_max_staleness_ms: u64,

    // On-chain deployment addresses this bot reads through, distinct
    // from the executor/payout pair above.
    pub multicall_address: String,
    pub data_provider_address: String,
    pub borrower_index_network: String,

    // Deployment + actionable-path tuning. Not named in spec §6's config
    // list (which only covers detection/verification knobs), but the
    // binary needs somewhere to source them from; grouped here rather
    // than resurrecting the teacher's separate deployment/registry
    // layer for a handful of scalars.
    pub private_key: String,
    pub chain_id: u64,
    pub pool_address: String,
    pub executor_address: String,
    pub payout_address: String,
    pub default_liquidation_bonus_bps: u16,
    pub swap_slippage_bps: u16,
    pub swap_fees_bps: u32,
    pub profit_buffer_bps: u32,
    pub min_profit_usd: f64,
    pub gas_pricing_model: String,
    pub default_gas_price_gwei: f64,
    pub max_gas_price_gwei: f64,
    pub priority_fee_gwei: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTriggerConfig {
    pub threshold_bps: u32,
    pub debounce_ms: u64,
    pub near_band_bps: u32,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub global_min_interval_ms: u64,
    pub max_scan: usize,
    pub cumulative_mode: bool,
}

impl Default for PriceTriggerConfig {
    fn default() -> Self {
        Self {
            threshold_bps: 150,
            debounce_ms: 60_000,
            near_band_bps: 300,
            jitter_min_ms: 40,
            jitter_max_ms: 60,
            global_min_interval_ms: 1_000,
            max_scan: 400,
            cumulative_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatchConfig {
    pub coalesce_ms: u64,
    pub max_per_block: usize,
    pub max_parallel: usize,
    pub max_parallel_high: usize,
    pub adaptive_concurrency: bool,
    pub backlog_threshold: usize,
}

impl Default for EventBatchConfig {
    fn default() -> Self {
        Self {
            coalesce_ms: 250,
            max_per_block: 20,
            max_parallel: 4,
            max_parallel_high: 8,
            adaptive_concurrency: true,
            backlog_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadPageConfig {
    pub initial: usize,
    pub min: usize,
    pub max: usize,
    pub target_ms: u64,
    pub critical_batch_size: usize,
}

impl Default for HeadPageConfig {
    fn default() -> Self {
        Self {
            initial: 200,
            min: 50,
            max: 500,
            target_ms: 800,
            critical_batch_size: 300,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            execution_enabled: false,
            broadcast_rpc_urls: Vec::new(),
            monitor_rpc_url: String::new(),
            http_rpc_url: String::new(),
            http_rpc_url_secondary: String::new(),
            ws_rpc_url: String::new(),
            chainlink_feeds_by_address: HashMap::new(),
            chainlink_feeds_by_symbol: HashMap::new(),
            derived_price_feeds: Vec::new(),
            min_debt_usd: 10.0,
            hf_threshold_start: 1.10,
            execution_hf_threshold_bps: 10_000,
            hysteresis_bps: 20,
            price_trigger: PriceTriggerConfig::default(),
            multicall_batch_size: 100,
            chunk_timeout_ms: 2_000,
            chunk_retry_attempts: 3,
            head_check_hedge_ms: 150,
            run_stall_abort_ms: 5_000,
            ws_heartbeat_ms: 30_000,
            event_batch: EventBatchConfig::default(),
            head_page: HeadPageConfig::default(),
            reserve_min_index_delta_bps: 5,
            global_rpc_rate_limit: 20.0,
            global_rpc_burst_capacity: 40,
            event_reserve_frac: 0.25,
            eth_call_max_in_flight: 16,
            pending_verify_enabled: true,
            micro_verify_max_per_block: 20,
            scan_lock_dedup_window_ms: 30_000,
            maintenance_sample_size: 120,
            price_max_staleness_ms: 120_000,

            multicall_address: String::new(),
            data_provider_address: String::new(),
            borrower_index_network: "hyperevm".to_string(),

            private_key: String::new(),
            chain_id: 1,
            pool_address: String::new(),
            executor_address: String::new(),
            payout_address: String::new(),
            default_liquidation_bonus_bps: 500,
            swap_slippage_bps: 100,
            swap_fees_bps: 0,
            profit_buffer_bps: 0,
            min_profit_usd: 5.0,
            gas_pricing_model: "eip1559".to_string(),
            default_gas_price_gwei: 1.0,
            max_gas_price_gwei: 50.0,
            priority_fee_gwei: None,
        }
    }
}

impl BotConfig {
    pub fn execution_hf_threshold(&self) -> f64 {
        self.execution_hf_threshold_bps as f64 / 10_000.0
    }

    pub fn ws_heartbeat(&self) -> Duration {
        Duration::from_millis(self.ws_heartbeat_ms)
    }

    pub fn min_debt_usd_1e18(&self) -> u128 {
        (self.min_debt_usd * 1e18) as u128
    }

    /// Build from environment variables (with `.env` preloaded by the
    /// caller via `dotenvy`), falling back to defaults for anything
    /// unset. Fatal-configuration errors (missing RPC URLs, empty feed
    /// maps) are the caller's responsibility to check per spec §7.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            execution_enabled: env_bool("EXECUTION_ENABLED", defaults.execution_enabled),
            broadcast_rpc_urls: env_list("BROADCAST_RPC_URLS"),
            monitor_rpc_url: env_string("MONITOR_RPC_URL", &defaults.monitor_rpc_url),
            http_rpc_url: env_string("HTTP_RPC_URL", &defaults.http_rpc_url),
            http_rpc_url_secondary: env_string("HTTP_RPC_URL_SECONDARY", &defaults.http_rpc_url_secondary),
            ws_rpc_url: env_string("WS_RPC_URL", &defaults.ws_rpc_url),
            chainlink_feeds_by_address: env_json_map("CHAINLINK_FEEDS_BY_ADDRESS_JSON"),
            chainlink_feeds_by_symbol: env_json_map("CHAINLINK_FEEDS_JSON"),
            derived_price_feeds: env_list("DERIVED_PRICE_FEEDS"),
            min_debt_usd: env_f64("MIN_DEBT_USD", defaults.min_debt_usd),
            hf_threshold_start: env_f64("HF_THRESHOLD_START", defaults.hf_threshold_start),
            execution_hf_threshold_bps: env_u32(
                "EXECUTION_HF_THRESHOLD_BPS",
                defaults.execution_hf_threshold_bps,
            ),
            hysteresis_bps: env_u32("HYSTERESIS_BPS", defaults.hysteresis_bps),
            price_trigger: PriceTriggerConfig {
                threshold_bps: env_u32("PRICE_TRIGGER_THRESHOLD_BPS", defaults.price_trigger.threshold_bps),
                debounce_ms: env_u64("PRICE_TRIGGER_DEBOUNCE_MS", defaults.price_trigger.debounce_ms),
                near_band_bps: env_u32("PRICE_TRIGGER_NEAR_BAND_BPS", defaults.price_trigger.near_band_bps),
                jitter_min_ms: env_u64("PRICE_TRIGGER_JITTER_MIN_MS", defaults.price_trigger.jitter_min_ms),
                jitter_max_ms: env_u64("PRICE_TRIGGER_JITTER_MAX_MS", defaults.price_trigger.jitter_max_ms),
                global_min_interval_ms: env_u64(
                    "PRICE_TRIGGER_GLOBAL_MIN_INTERVAL_MS",
                    defaults.price_trigger.global_min_interval_ms,
                ),
                max_scan: env_usize("PRICE_TRIGGER_MAX_SCAN", defaults.price_trigger.max_scan),
                cumulative_mode: env_bool(
                    "PRICE_TRIGGER_CUMULATIVE_MODE",
                    defaults.price_trigger.cumulative_mode,
                ),
            },
            multicall_batch_size: env_usize("MULTICALL_BATCH_SIZE", defaults.multicall_batch_size),
            chunk_timeout_ms: env_u64("CHUNK_TIMEOUT_MS", defaults.chunk_timeout_ms),
            chunk_retry_attempts: env_u32("CHUNK_RETRY_ATTEMPTS", defaults.chunk_retry_attempts),
            head_check_hedge_ms: env_u64("HEAD_CHECK_HEDGE_MS", defaults.head_check_hedge_ms),
            run_stall_abort_ms: env_u64("RUN_STALL_ABORT_MS", defaults.run_stall_abort_ms),
            ws_heartbeat_ms: env_u64("WS_HEARTBEAT_MS", defaults.ws_heartbeat_ms),
            event_batch: EventBatchConfig {
                coalesce_ms: env_u64("EVENT_BATCH_COALESCE_MS", defaults.event_batch.coalesce_ms),
                max_per_block: env_usize("EVENT_BATCH_MAX_PER_BLOCK", defaults.event_batch.max_per_block),
                max_parallel: env_usize("MAX_PARALLEL_EVENT_BATCHES", defaults.event_batch.max_parallel),
                max_parallel_high: env_usize(
                    "MAX_PARALLEL_EVENT_BATCHES_HIGH",
                    defaults.event_batch.max_parallel_high,
                ),
                adaptive_concurrency: env_bool(
                    "ADAPTIVE_EVENT_CONCURRENCY",
                    defaults.event_batch.adaptive_concurrency,
                ),
                backlog_threshold: env_usize("EVENT_BACKLOG_THRESHOLD", defaults.event_batch.backlog_threshold),
            },
            head_page: HeadPageConfig {
                initial: env_usize("HEAD_PAGE_INITIAL", defaults.head_page.initial),
                min: env_usize("HEAD_PAGE_MIN", defaults.head_page.min),
                max: env_usize("HEAD_PAGE_MAX", defaults.head_page.max),
                target_ms: env_u64("HEAD_PAGE_TARGET_MS", defaults.head_page.target_ms),
                critical_batch_size: env_usize(
                    "HEAD_CRITICAL_BATCH_SIZE",
                    defaults.head_page.critical_batch_size,
                ),
            },
            reserve_min_index_delta_bps: env_u32(
                "RESERVE_MIN_INDEX_DELTA_BPS",
                defaults.reserve_min_index_delta_bps,
            ),
            global_rpc_rate_limit: env_f64("GLOBAL_RPC_RATE_LIMIT", defaults.global_rpc_rate_limit),
            global_rpc_burst_capacity: env_u32(
                "GLOBAL_RPC_BURST_CAPACITY",
                defaults.global_rpc_burst_capacity,
            ),
            event_reserve_frac: env_f64("EVENT_RESERVE_FRAC", defaults.event_reserve_frac),
            eth_call_max_in_flight: env_usize("ETH_CALL_MAX_IN_FLIGHT", defaults.eth_call_max_in_flight),
            pending_verify_enabled: env_bool("PENDING_VERIFY_ENABLED", defaults.pending_verify_enabled),
            micro_verify_max_per_block: env_usize(
                "MICRO_VERIFY_MAX_PER_BLOCK",
                defaults.micro_verify_max_per_block,
            ),
            scan_lock_dedup_window_ms: env_u64(
                "SCAN_LOCK_DEDUP_WINDOW_MS",
                defaults.scan_lock_dedup_window_ms,
            ),
            maintenance_sample_size: env_usize("MAINTENANCE_SAMPLE_SIZE", defaults.maintenance_sample_size),
            price_max_staleness_ms: env_u64("PRICE_MAX_STALENESS_MS", defaults.price_max_staleness_ms),

            multicall_address: env_string("MULTICALL_ADDRESS", &defaults.multicall_address),
            data_provider_address: env_string("DATA_PROVIDER_ADDRESS", &defaults.data_provider_address),
            borrower_index_network: env_string("BORROWER_INDEX_NETWORK", &defaults.borrower_index_network),

            private_key: env_string("PRIVATE_KEY", &defaults.private_key),
            chain_id: env_u64("CHAIN_ID", defaults.chain_id),
            pool_address: env_string("POOL_ADDRESS", &defaults.pool_address),
            executor_address: env_string("EXECUTOR_ADDRESS", &defaults.executor_address),
            payout_address: env_string("PAYOUT_ADDRESS", &defaults.payout_address),
            default_liquidation_bonus_bps: env_u32(
                "DEFAULT_LIQUIDATION_BONUS_BPS",
                defaults.default_liquidation_bonus_bps as u32,
            ) as u16,
            swap_slippage_bps: env_u32("SWAP_SLIPPAGE_BPS", defaults.swap_slippage_bps as u32) as u16,
            swap_fees_bps: env_u32("SWAP_FEES_BPS", defaults.swap_fees_bps),
            profit_buffer_bps: env_u32("PROFIT_BUFFER_BPS", defaults.profit_buffer_bps),
            min_profit_usd: env_f64("MIN_PROFIT_USD", defaults.min_profit_usd),
            gas_pricing_model: env_string("GAS_PRICING_MODEL", &defaults.gas_pricing_model),
            default_gas_price_gwei: env_f64("DEFAULT_GAS_PRICE_GWEI", defaults.default_gas_price_gwei),
            max_gas_price_gwei: env_f64("MAX_GAS_PRICE_GWEI", defaults.max_gas_price_gwei),
            priority_fee_gwei: std::env::var("PRIORITY_FEE_GWEI").ok().and_then(|v| v.parse().ok()),
        }
    }

    pub fn log_config(&self) {
        tracing::info!(
            execution_enabled = self.execution_enabled,
            endpoints = self.broadcast_rpc_urls.len(),
            min_debt_usd = self.min_debt_usd,
            hf_threshold_start = self.hf_threshold_start,
            "bot configuration loaded"
        );
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn env_json_map(key: &str) -> HashMap<String, String> {
    std::env::var(key)
        .ok()
        .and_then(|v| serde_json::from_str(&v).ok())
        .unwrap_or_default()
}

static GLOBAL_CONFIG: OnceLock<BotConfig> = OnceLock::new();

pub fn init_config(config: BotConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

pub fn config() -> &'static BotConfig {
    GLOBAL_CONFIG.get_or_init(BotConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_spec_defaults() {
        let config = BotConfig::default();
        assert!(!config.execution_enabled);
        assert_eq!(config.hysteresis_bps, 20);
        assert_eq!(config.price_trigger.near_band_bps, 300);
    }

    #[test]
    fn test_execution_hf_threshold_from_bps() {
        let mut config = BotConfig::default();
        config.execution_hf_threshold_bps = 10_050;
        assert!((config.execution_hf_threshold() - 1.005).abs() < 1e-9);
    }
}
