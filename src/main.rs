//! Liquidation bot binary entrypoint.
//!
//! Wires the stateless chain-interaction layer, the stateful core
//! engine, and the pluggable off-chain data sources together: loads
//! configuration, bootstraps the reserve and price caches plus the
//! tracked-borrower set, then drives the head loop and the event/price
//! listeners until the process is killed.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_api::{BlockAnaliticaBorrowerIndex, BorrowerIndex, LiqdSwapOracle};
use liquidator_chain::{
    derive_liquidation_bonus_bps, Broadcaster, BroadcasterConfig, ChainlinkOracle, MulticallClient,
    Oracle, PoolEvent, PoolEventListener, PositionClient, PriceCache, PriceFeedListener,
    ProtocolDataCache, ReserveConfigClient, ReserveData,
};
use liquidator_core::{
    config, init_config, AttemptHistory, AuditListener, BotConfig, DirtyQueue, ExecutorConfig,
    InFlightLimiter, LiquidationExecutor, LiquidationPlanner, OnChainLiquidationEvent, RiskSet,
    ScanRegistry, Scheduler, SchedulerConfig, TokenBucket, Verifier, VerifierConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,liquidator_core=debug,liquidator_chain=debug")),
        )
        .init();

    let bot_config = BotConfig::from_env();
    bot_config.log_config();
    init_config(bot_config);
    let cfg = config();

    info!("starting liquidation bot");

    let pool_address = parse_address("POOL_ADDRESS", &cfg.pool_address)?;
    let multicall_address = parse_address("MULTICALL_ADDRESS", &cfg.multicall_address)?;
    let data_provider_address = parse_address("DATA_PROVIDER_ADDRESS", &cfg.data_provider_address)?;
    let executor_address = parse_address("EXECUTOR_ADDRESS", &cfg.executor_address)?;
    let payout_address = parse_address("PAYOUT_ADDRESS", &cfg.payout_address)?;
    anyhow::ensure!(!cfg.http_rpc_url.is_empty(), "HTTP_RPC_URL must be set");
    anyhow::ensure!(!cfg.ws_rpc_url.is_empty(), "WS_RPC_URL must be set");
    anyhow::ensure!(!cfg.chainlink_feeds_by_address.is_empty(), "CHAINLINK_FEEDS_BY_ADDRESS_JSON must be set");

    let provider = ProviderBuilder::new().on_http(cfg.http_rpc_url.parse().context("invalid HTTP_RPC_URL")?);

    let price_cache = Arc::new(PriceCache::new(cfg.price_max_staleness_ms));
    let protocol_cache = Arc::new(ProtocolDataCache::new());
    let risk_set = Arc::new(RiskSet::new());
    let dirty_queue = Arc::new(DirtyQueue::new());
    let attempt_history = Arc::new(AttemptHistory::new());
    let scan_registry = Arc::new(ScanRegistry::new(cfg.scan_lock_dedup_window_ms));
    let rate_limiter = Arc::new(TokenBucket::new(
        cfg.global_rpc_burst_capacity,
        cfg.global_rpc_rate_limit,
        cfg.event_reserve_frac,
    ));

    let feed_to_token = bootstrap_reserves(
        &provider,
        multicall_address,
        data_provider_address,
        &protocol_cache,
        &price_cache,
        cfg,
    )
    .await?;

    let reserves: Vec<Address> = protocol_cache.all_tokens();
    info!(reserve_count = reserves.len(), "reserve configuration bootstrapped");

    let borrower_index = Arc::new(BlockAnaliticaBorrowerIndex::new(cfg.borrower_index_network.clone()));
    let reserve_borrowers = bootstrap_borrowers(&borrower_index, &reserves, &risk_set).await;

    let multicall_client = Arc::new(MulticallClient::new(multicall_address, pool_address, provider.clone()));
    let position_client = Arc::new(PositionClient::new(multicall_address, pool_address, provider.clone()));

    let verifier_config = VerifierConfig {
        min_debt_usd_1e18: cfg.min_debt_usd_1e18(),
        hf_threshold: cfg.execution_hf_threshold(),
        hysteresis_bps: cfg.hysteresis_bps,
        near_threshold_band_bps: cfg.price_trigger.near_band_bps,
        micro_verify_max_per_block: cfg.micro_verify_max_per_block,
        chunk_size: cfg.multicall_batch_size,
        chunk_timeout_ms: cfg.chunk_timeout_ms,
        chunk_retry_attempts: cfg.chunk_retry_attempts,
        head_check_hedge_ms: cfg.head_check_hedge_ms,
        pending_verify_enabled: cfg.pending_verify_enabled,
        scan_lock_dedup_window_ms: cfg.scan_lock_dedup_window_ms,
    };
    let in_flight_limiter = Arc::new(InFlightLimiter::new(cfg.eth_call_max_in_flight));
    let mut verifier = Verifier::with_in_flight_limiter(
        risk_set.clone(),
        scan_registry.clone(),
        rate_limiter.clone(),
        in_flight_limiter,
        multicall_client.clone(),
        verifier_config,
    );
    if !cfg.http_rpc_url_secondary.is_empty() {
        let secondary_provider =
            ProviderBuilder::new().on_http(cfg.http_rpc_url_secondary.parse().context("invalid HTTP_RPC_URL_SECONDARY")?);
        let secondary_multicall = Arc::new(MulticallClient::new(multicall_address, pool_address, secondary_provider));
        verifier = verifier.with_secondary(secondary_multicall);
    }
    let verifier = Arc::new(verifier);

    let planner = Arc::new(LiquidationPlanner::new(
        position_client.clone(),
        protocol_cache.clone(),
        price_cache.clone(),
    ));
    let swap_oracle: Arc<dyn liquidator_api::SwapQuoteOracle> = Arc::new(LiqdSwapOracle::new());

    let broadcaster_config = BroadcasterConfig {
        endpoints: cfg.broadcast_rpc_urls.clone(),
        monitor_endpoint: cfg.monitor_rpc_url.clone(),
        ..BroadcasterConfig::default()
    };
    let broadcaster = Arc::new(Broadcaster::new(
        &cfg.private_key,
        cfg.chain_id,
        broadcaster_config,
        &cfg.gas_pricing_model,
        cfg.default_gas_price_gwei,
        cfg.max_gas_price_gwei,
        cfg.priority_fee_gwei,
    )?);

    let starting_nonce = broadcaster
        .fetch_pending_nonce()
        .await
        .context("failed to fetch starting nonce")?;

    let executor_config = ExecutorConfig {
        execution_enabled: cfg.execution_enabled,
        executor_address,
        payout_address,
        swap_slippage_bps: cfg.swap_slippage_bps,
        swap_fees_bps: cfg.swap_fees_bps,
        profit_buffer_bps: cfg.profit_buffer_bps,
        min_profit_usd_1e18: (cfg.min_profit_usd * 1e18) as u128,
    };
    let executor = Arc::new(LiquidationExecutor::new(
        planner,
        attempt_history.clone(),
        swap_oracle,
        broadcaster,
        executor_config,
        starting_nonce,
    ));

    let audit_listener = Arc::new(AuditListener::new(
        risk_set.clone(),
        attempt_history.clone(),
        cfg.min_debt_usd_1e18(),
    ));

    let scheduler_config = SchedulerConfig {
        head_critical_batch_size: cfg.head_page.critical_batch_size,
        always_include_hf_below: cfg.hf_threshold_start,
        near_threshold_band_bps: cfg.price_trigger.near_band_bps,
        hf_threshold: cfg.execution_hf_threshold(),
        maintenance_sample_size: cfg.maintenance_sample_size,
        head_check_page_size: cfg.head_page.initial,
        head_page_min: cfg.head_page.min,
        head_page_max: cfg.head_page.max,
        head_page_target_ms: cfg.head_page.target_ms,
        run_stall_abort_ms: cfg.run_stall_abort_ms,
        event_batch_coalesce_ms: cfg.event_batch.coalesce_ms,
        event_batch_max_per_block: cfg.event_batch.max_per_block,
        max_parallel_event_batches: cfg.event_batch.max_parallel,
        max_parallel_event_batches_high: cfg.event_batch.max_parallel_high,
        price_trigger_max_scan: cfg.price_trigger.max_scan,
    };

    let (actionable_tx, mut actionable_rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(Scheduler::with_actionable_channel(
        risk_set.clone(),
        dirty_queue.clone(),
        verifier,
        scheduler_config,
        Some(actionable_tx),
    ));

    tokio::spawn({
        let executor = executor.clone();
        async move {
            while let Some(actionable) = actionable_rx.recv().await {
                let now_ms = now_ms();
                executor.handle_actionable(actionable, now_ms).await;
            }
        }
    });

    tokio::spawn(run_head_loop(scheduler.clone(), provider.clone()));
    tokio::spawn(run_pool_event_listener(
        scheduler.clone(),
        audit_listener,
        executor_address,
        cfg.ws_rpc_url.clone(),
        pool_address,
        cfg.reserve_min_index_delta_bps,
        cfg,
    ));
    tokio::spawn(run_price_feed_listener(
        scheduler.clone(),
        reserve_borrowers,
        cfg.ws_rpc_url.clone(),
        feed_to_token,
        price_cache.clone(),
        cfg,
    ));

    info!("all components running; entering idle wait");
    std::future::pending::<()>().await;
    Ok(())
}

fn parse_address(name: &str, value: &str) -> Result<Address> {
    value.parse().with_context(|| format!("invalid address for {name}: {value:?}"))
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Populate [`ProtocolDataCache`] from the on-chain data-provider
/// sidecar and seed [`PriceCache`] with one initial read per configured
/// feed. Returns the feed -> token map [`PriceFeedListener`] needs to
/// attribute incoming `NewTransmission` events.
async fn bootstrap_reserves<P: Provider + Clone + Send + Sync + 'static>(
    provider: &P,
    multicall_address: Address,
    data_provider_address: Address,
    protocol_cache: &Arc<ProtocolDataCache>,
    price_cache: &Arc<PriceCache>,
    cfg: &BotConfig,
) -> Result<HashMap<Address, Address>> {
    let mut tokens = Vec::with_capacity(cfg.chainlink_feeds_by_address.len());
    let mut feeds = HashMap::with_capacity(cfg.chainlink_feeds_by_address.len());
    for (token_str, feed_str) in &cfg.chainlink_feeds_by_address {
        let token: Address = token_str.parse().with_context(|| format!("invalid reserve token address: {token_str}"))?;
        let feed: Address = feed_str.parse().with_context(|| format!("invalid feed address: {feed_str}"))?;
        tokens.push(token);
        feeds.insert(token, feed);
    }

    let config_client = ReserveConfigClient::new(multicall_address, data_provider_address, provider.clone());
    let entries = config_client.get_reserve_config_batch(&tokens).await?;

    for entry in entries {
        let feed = feeds.get(&entry.asset).copied().unwrap_or(Address::ZERO);
        match entry.data {
            Ok(raw) => {
                protocol_cache.put(
                    entry.asset,
                    ReserveData {
                        decimals: raw.decimals,
                        liquidation_bonus_bps: derive_liquidation_bonus_bps(
                            raw.liquidation_bonus_raw,
                            cfg.default_liquidation_bonus_bps,
                        ),
                        is_collateral_enabled: raw.is_collateral_enabled,
                        is_borrow_enabled: raw.is_borrow_enabled,
                        variable_debt_token_address: raw.variable_debt_token_address,
                        a_token_address: raw.a_token_address,
                        price_feed_handle: feed,
                    },
                );
            }
            Err(e) => warn!(asset = %entry.asset, error = ?e, "reserve configuration read failed, skipping reserve"),
        }
    }

    let now = now_ms();
    for (&token, &feed) in &feeds {
        let probe = ChainlinkOracle::new(feed, token, 8, Arc::new(provider.clone()));
        let decimals = probe.fetch_decimals().await.unwrap_or(8);
        let oracle = ChainlinkOracle::new(feed, token, decimals, Arc::new(provider.clone()));
        match oracle.get_price().await {
            Ok(price_data) => {
                let price_1e18 = liquidator_core::u256_math::rescale(price_data.price, price_data.decimals, 18);
                price_cache.put_usd_1e18(token, price_1e18, now, price_data.decimals);
                price_cache.register_feed_decimals(feed, price_data.decimals);
            }
            Err(e) => warn!(%token, %feed, error = %e, "initial price seed failed; awaiting first feed update"),
        }
    }

    Ok(feeds.into_iter().map(|(token, feed)| (feed, token)).collect())
}

/// Resolve the initial borrower universe by unioning every configured
/// reserve's borrower list into [`RiskSet`]. Returns a per-reserve
/// snapshot so the price-shock path has a borrower list to re-scan
/// without a fresh index-provider round trip.
async fn bootstrap_borrowers(
    borrower_index: &Arc<BlockAnaliticaBorrowerIndex>,
    reserves: &[Address],
    risk_set: &Arc<RiskSet>,
) -> HashMap<Address, Vec<Address>> {
    let mut reserve_borrowers = HashMap::with_capacity(reserves.len());
    for &reserve in reserves {
        match borrower_index.get_borrowers(reserve).await {
            Ok(borrowers) => {
                for &user in &borrowers {
                    risk_set.upsert(user);
                }
                info!(%reserve, count = borrowers.len(), "borrower index bootstrap");
                reserve_borrowers.insert(reserve, borrowers);
            }
            Err(e) => warn!(%reserve, error = %e, "borrower index bootstrap failed for reserve"),
        }
    }
    reserve_borrowers
}

/// Poll the chain head over the HTTP provider and drive the scheduler's
/// serialized head loop. A WS block subscription would save the poll,
/// but every other path already needs its own WS connection, so a
/// cheap poll on the shared HTTP provider avoids one more socket.
async fn run_head_loop<P: Provider + Clone + Send + Sync + 'static>(scheduler: Arc<Scheduler<P>>, provider: P) {
    let mut last_seen = 0u64;
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(200));
    loop {
        interval.tick().await;
        let block = match provider.get_block_number().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "head poll failed");
                continue;
            }
        };
        if block > last_seen {
            last_seen = block;
            scheduler.request_block(block);
        }
        scheduler.drive_head_loop(now_ms()).await;
        scheduler.drain_event_batches(block, now_ms()).await;
    }
}

async fn run_pool_event_listener<P: Provider + Clone + Send + Sync + 'static>(
    scheduler: Arc<Scheduler<P>>,
    audit_listener: Arc<AuditListener>,
    our_executor_address: Address,
    ws_url: String,
    pool_address: Address,
    reserve_min_index_delta_bps: u32,
    cfg: &'static BotConfig,
) {
    let listener = PoolEventListener::new(ws_url, pool_address, reserve_min_index_delta_bps, cfg.ws_heartbeat());
    let mut stream = match listener.subscribe().await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "pool event subscription failed");
            return;
        }
    };

    while let Some(event) = stream.next().await {
        let now = now_ms();

        if let PoolEvent::LiquidationCall {
            collateral_asset,
            debt_asset,
            user,
            liquidator,
            tx_hash,
            ..
        } = &event
        {
            if *liquidator != our_executor_address {
                let notification = audit_listener.classify(OnChainLiquidationEvent {
                    user: *user,
                    collateral_asset: *collateral_asset,
                    debt_asset: *debt_asset,
                    tx_hash: *tx_hash,
                });
                info!(user = %user, reason = notification.reason.label(), "competitor liquidation observed");
            }
        }

        // Route through the reducer so reserve-data-updated suppression
        // (spec §4.F) actually applies instead of every index tick
        // reaching the scheduler.
        let Some(trigger) = listener.on_event(event) else {
            continue;
        };
        if trigger.users.is_empty() {
            scheduler.handle_event(None, trigger.reserve, trigger.block_number, now).await;
        } else {
            for user in trigger.users {
                scheduler.handle_event(Some(user), trigger.reserve, trigger.block_number, now).await;
            }
        }
    }
    error!("pool event stream ended after exhausting reconnection attempts");
}

async fn run_price_feed_listener<P: Provider + Clone + Send + Sync + 'static>(
    scheduler: Arc<Scheduler<P>>,
    reserve_borrowers: HashMap<Address, Vec<Address>>,
    ws_url: String,
    feed_to_token: HashMap<Address, Address>,
    price_cache: Arc<PriceCache>,
    cfg: &'static BotConfig,
) {
    let derived_feeds: Vec<Address> = cfg
        .derived_price_feeds
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let listener = Arc::new(PriceFeedListener::new(
        ws_url,
        feed_to_token,
        derived_feeds,
        price_cache,
        cfg.price_trigger.threshold_bps as i64,
        std::time::Duration::from_millis(cfg.price_trigger.debounce_ms),
        std::time::Duration::from_millis(cfg.price_trigger.global_min_interval_ms),
        cfg.price_trigger.cumulative_mode,
        cfg.ws_heartbeat(),
    ));

    let mut stream = match listener.subscribe().await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "price feed subscription failed");
            return;
        }
    };

    while let Some(update) = stream.next().await {
        let block = update.block_number;
        if let Some(signal) = listener.on_update(update) {
            let borrowers = reserve_borrowers.get(&signal.reserve).cloned().unwrap_or_default();
            if borrowers.is_empty() {
                continue;
            }
            tokio::time::sleep(signal.jitter).await;
            let stats = scheduler
                .handle_price_shock(&signal.reserve.to_string(), &borrowers, block, now_ms())
                .await;
            info!(?stats, reserve = %signal.reserve, change_bps = signal.change_bps, "price-shock scan");
        }
    }
    error!("price feed stream ended after exhausting reconnection attempts");
}

fn print_banner() {
    println!(
        r#"
    ┌─┐┬┌─┐ ┬ ┬┬┌┬┐┌─┐┌┬┐┌─┐┬─┐
    │  ││─┼┐│ ││ │││ │ │ │ │├┬┘
    └─┘┴└─┘└└─┘┴─┴┘└─┘ ┴ └─┘┴└─
    Liquidation Bot
    "#
    );
}
