//! WebSocket listeners for aggregator feeds (E) and lending-pool events (F).
//!
//! Both listeners only decode logs and maintain their own small pieces of
//! bookkeeping (dedupe windows, debounce, suppression); deciding what to
//! do with a trigger is the scheduler's job, one layer up.

use alloy::primitives::{keccak256, Address, B256, I256, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use anyhow::Result;
use dashmap::{DashMap, DashSet};
use futures::stream::{Stream, StreamExt};
use rand::Rng;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::contracts::PoolContract;
use crate::oracle::{ChainlinkOracle, Oracle, PriceCache};
use crate::protocol::ProtocolEventSignatures;

/// Reconnection policy for both listeners: on stream end or heartbeat
/// timeout, back off `1s * 2^attempt` capped at 60s, up to 10 attempts
/// before giving up on the subscription entirely.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
const RECONNECT_MAX_ATTEMPTS: u32 = 10;

fn reconnect_backoff(attempt: u32) -> Duration {
    let scale = 1u32.checked_shl(attempt.min(6)).unwrap_or(u32::MAX);
    (RECONNECT_BASE_DELAY * scale).min(RECONNECT_MAX_DELAY)
}

/// Oracle type for price feed categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OracleType {
    Standard,
    RedStone,
    Pyth,
    DualOracle,
    PendlePT,
}

/// A decoded new-round transmission, already pushed to [`PriceCache`].
#[derive(Debug, Clone)]
pub struct OracleUpdate {
    pub oracle: Address,
    pub asset: Address,
    pub price: U256,
    pub round_id: u128,
    pub timestamp: u64,
    pub block_number: u64,
    pub tx_hash: B256,
    pub oracle_type: OracleType,
}

/// A sharp price drop that should trigger a targeted scan of the
/// reserve's borrowers.
#[derive(Debug, Clone)]
pub struct PriceShockSignal {
    pub reserve: Address,
    pub change_bps: i64,
    pub block_number: u64,
    /// 40-60ms jitter to apply before scheduling the scan.
    pub jitter: Duration,
}

/// Pool event types.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Supply {
        reserve: Address,
        user: Address,
        on_behalf_of: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
    },
    Withdraw {
        reserve: Address,
        user: Address,
        to: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
    },
    Borrow {
        reserve: Address,
        user: Address,
        on_behalf_of: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
    },
    Repay {
        reserve: Address,
        user: Address,
        repayer: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
    },
    LiquidationCall {
        collateral_asset: Address,
        debt_asset: Address,
        user: Address,
        debt_to_cover: U256,
        liquidated_collateral: U256,
        liquidator: Address,
        block_number: u64,
        tx_hash: B256,
    },
    ReserveDataUpdated {
        reserve: Address,
        liquidity_index: U256,
        variable_borrow_index: U256,
        block_number: u64,
        tx_hash: B256,
    },
}

impl PoolEvent {
    /// Users directly affected by this event (empty for reserve updates).
    pub fn affected_user(&self) -> Option<Address> {
        match self {
            Self::Supply { on_behalf_of, .. } => Some(*on_behalf_of),
            Self::Withdraw { user, .. } => Some(*user),
            Self::Borrow { on_behalf_of, .. } => Some(*on_behalf_of),
            Self::Repay { user, .. } => Some(*user),
            Self::LiquidationCall { user, .. } => Some(*user),
            Self::ReserveDataUpdated { .. } => None,
        }
    }

    pub fn reserve(&self) -> Address {
        match self {
            Self::Supply { reserve, .. }
            | Self::Withdraw { reserve, .. }
            | Self::Borrow { reserve, .. }
            | Self::Repay { reserve, .. }
            | Self::ReserveDataUpdated { reserve, .. } => *reserve,
            Self::LiquidationCall { collateral_asset, .. } => *collateral_asset,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Supply { block_number, .. }
            | Self::Withdraw { block_number, .. }
            | Self::Borrow { block_number, .. }
            | Self::Repay { block_number, .. }
            | Self::LiquidationCall { block_number, .. }
            | Self::ReserveDataUpdated { block_number, .. } => *block_number,
        }
    }

    pub fn is_liquidation(&self) -> bool {
        matches!(self, Self::LiquidationCall { .. })
    }
}

/// A coalesced result of decoding one pool log: who is affected and
/// which reserve, per spec. `None` for both fields means the event was
/// suppressed (reserve-data-updated below the index-delta floor).
#[derive(Debug, Clone, Default)]
pub struct PoolSweepTrigger {
    pub users: Vec<Address>,
    pub reserve: Option<Address>,
    pub block_number: u64,
    pub from_liquidation: bool,
}

const DEDUPE_WINDOW: Duration = Duration::from_secs(600);

/// Subscribes to aggregator feeds, normalizes into [`PriceCache`], and
/// emits sharp-drop signals for targeted re-scans.
pub struct PriceFeedListener {
    ws_url: String,
    feeds: Vec<Address>,
    feed_to_token: HashMap<Address, Address>,
    derived_feeds: DashSet<Address>,
    price_cache: Arc<PriceCache>,
    round_dedupe: DashMap<(Address, u128), Instant>,
    last_answer: DashMap<Address, i128>,
    baseline: DashMap<Address, i128>,
    last_trigger_at: DashMap<Address, Instant>,
    in_flight: DashSet<Address>,
    last_triggered_block: DashMap<Address, u64>,
    global_last_trigger_ms: AtomicU64,
    threshold_bps: i64,
    debounce: Duration,
    global_min_interval: Duration,
    cumulative_mode: bool,
    ws_heartbeat: Duration,
}

impl PriceFeedListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ws_url: impl Into<String>,
        feed_to_token: HashMap<Address, Address>,
        derived_feeds: Vec<Address>,
        price_cache: Arc<PriceCache>,
        threshold_bps: i64,
        debounce: Duration,
        global_min_interval: Duration,
        cumulative_mode: bool,
        ws_heartbeat: Duration,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            feeds: feed_to_token.keys().copied().collect(),
            feed_to_token,
            derived_feeds: derived_feeds.into_iter().collect(),
            price_cache,
            round_dedupe: DashMap::new(),
            last_answer: DashMap::new(),
            baseline: DashMap::new(),
            last_trigger_at: DashMap::new(),
            in_flight: DashSet::new(),
            last_triggered_block: DashMap::new(),
            global_last_trigger_ms: AtomicU64::new(0),
            threshold_bps,
            debounce,
            global_min_interval,
            cumulative_mode,
            ws_heartbeat,
        }
    }

    /// Subscribe to new-round transmissions on every configured feed.
    /// Deliberately not the legacy `AnswerUpdated` event, which this bot
    /// never subscribes to (it would double-fire alongside the
    /// transmission event on most deployed aggregators). Feed each item
    /// through [`Self::on_update`] to push it into the price cache and
    /// detect sharp drops.
    ///
    /// On stream end or on silence past the configured heartbeat, the
    /// subscription is torn down and re-established with exponential
    /// backoff, re-seeding every feed's decimals and latest price before
    /// resuming so a missed update during the outage isn't carried
    /// forward stale.
    pub async fn subscribe(&self) -> Result<Pin<Box<dyn Stream<Item = OracleUpdate> + Send>>> {
        info!(feeds = self.feeds.len(), ws_url = %self.ws_url, "subscribing to price feeds");

        let feeds = self.feeds.clone();
        let connect = {
            let ws_url = self.ws_url.clone();
            move || {
                let ws_url = ws_url.clone();
                let feeds = feeds.clone();
                async move {
                    let ws = WsConnect::new(&ws_url);
                    let provider = ProviderBuilder::new().on_ws(ws).await?;
                    let filter = Filter::new().address(feeds).event_signature(new_transmission_signature());
                    let sub = provider.subscribe_logs(&filter).await?;
                    let stream = Box::pin(sub.into_stream()) as Pin<Box<dyn Stream<Item = Log> + Send>>;
                    Ok::<_, anyhow::Error>((provider, stream))
                }
            }
        };

        let (provider, inner_stream) = connect().await?;

        let feed_to_token = self.feed_to_token.clone();
        let price_cache = self.price_cache.clone();
        let ws_heartbeat = self.ws_heartbeat;

        let update_stream = futures::stream::unfold(
            (provider, inner_stream, Instant::now()),
            move |(mut provider, mut stream, mut last_frame)| {
                let connect = connect.clone();
                let feed_to_token = feed_to_token.clone();
                let price_cache = price_cache.clone();
                async move {
                    loop {
                        let budget = ws_heartbeat.saturating_sub(last_frame.elapsed()).max(Duration::from_millis(1));
                        let next = tokio::time::timeout(budget, stream.next()).await;
                        let reason = match next {
                            Ok(Some(log)) => {
                                last_frame = Instant::now();
                                if let Some(update) = parse_transmission(log, &feed_to_token) {
                                    return Some((update, (provider, stream, last_frame)));
                                }
                                continue;
                            }
                            Ok(None) => "stream ended",
                            Err(_) => "heartbeat timeout",
                        };

                        warn!(reason, "price feed websocket disconnected, reconnecting");
                        let mut reconnected = None;
                        for attempt in 0..RECONNECT_MAX_ATTEMPTS {
                            tokio::time::sleep(reconnect_backoff(attempt)).await;
                            match connect().await {
                                Ok((p, s)) => {
                                    reseed_feed_prices(&price_cache, &feed_to_token, &p).await;
                                    reconnected = Some((p, s));
                                    break;
                                }
                                Err(e) => warn!(attempt, error = %e, "price feed reconnect attempt failed"),
                            }
                        }

                        match reconnected {
                            Some((p, s)) => {
                                provider = p;
                                stream = s;
                                last_frame = Instant::now();
                            }
                            None => {
                                error!(attempts = RECONNECT_MAX_ATTEMPTS, "price feed reconnection exhausted, giving up");
                                return None;
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(update_stream))
    }

    /// Process one decoded transmission: push into the cache, run
    /// sharp-drop detection, and return the shock signal if one fires.
    pub fn on_update(&self, update: OracleUpdate) -> Option<PriceShockSignal> {
        let key = (update.oracle, update.round_id);
        if let Some(seen) = self.round_dedupe.get(&key) {
            if seen.elapsed() < DEDUPE_WINDOW {
                return None;
            }
        }
        self.round_dedupe.insert(key, Instant::now());

        let token = update.asset;
        let source_decimals = self
            .price_cache
            .feed_decimals(&update.oracle)
            .unwrap_or(8);
        if let Some(normalized) = PriceCache::normalize(
            update.price.try_into().unwrap_or(i128::MAX),
            source_decimals,
        ) {
            self.price_cache.put_usd_1e18(
                token,
                normalized,
                update.timestamp * 1000,
                source_decimals,
            );
        }

        let price_i128: i128 = update.price.try_into().unwrap_or(i128::MAX);
        let previous = self.last_answer.insert(token, price_i128);
        self.baseline.entry(token).or_insert(price_i128);

        if self.derived_feeds.contains(&update.oracle) {
            return None;
        }

        let reference = if self.cumulative_mode {
            *self.baseline.get(&token).unwrap()
        } else {
            previous.unwrap_or(price_i128)
        };

        if reference == 0 {
            return None;
        }
        let change_bps = ((price_i128 - reference) * 10_000) / reference;
        if change_bps > -self.threshold_bps {
            return None;
        }

        if self
            .last_trigger_at
            .get(&token)
            .is_some_and(|t| t.elapsed() < self.debounce)
        {
            return None;
        }
        if !self.in_flight.insert(token) {
            return None;
        }
        if self
            .last_triggered_block
            .get(&token)
            .is_some_and(|b| *b == update.block_number)
        {
            self.in_flight.remove(&token);
            return None;
        }
        let now_ms = now_millis();
        let last_global = self.global_last_trigger_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last_global) < self.global_min_interval.as_millis() as u64 {
            self.in_flight.remove(&token);
            return None;
        }

        self.last_trigger_at.insert(token, Instant::now());
        self.last_triggered_block.insert(token, update.block_number);
        self.global_last_trigger_ms.store(now_ms, Ordering::Relaxed);
        self.in_flight.remove(&token);

        let jitter_ms = rand::thread_rng().gen_range(40..=60);
        Some(PriceShockSignal {
            reserve: token,
            change_bps,
            block_number: update.block_number,
            jitter: Duration::from_millis(jitter_ms),
        })
    }
}

/// Re-read every feed's decimals and latest price straight from the
/// aggregator, the same bootstrap read `main` does at startup. Called
/// after a successful reconnect so an update missed during the outage
/// doesn't leave the cache on a stale price.
async fn reseed_feed_prices<P: Provider + Clone + 'static>(
    price_cache: &Arc<PriceCache>,
    feed_to_token: &HashMap<Address, Address>,
    provider: &P,
) {
    let provider = Arc::new(provider.clone());
    let now = now_millis();
    for (&feed, &token) in feed_to_token {
        let probe = ChainlinkOracle::new(feed, token, 8, provider.clone());
        let decimals = probe.fetch_decimals().await.unwrap_or(8);
        let oracle = ChainlinkOracle::new(feed, token, decimals, provider.clone());
        match oracle.get_price().await {
            Ok(price_data) => {
                let price_i128: i128 = price_data.price.try_into().unwrap_or(i128::MAX);
                if let Some(price_1e18) = PriceCache::normalize(price_i128, price_data.decimals) {
                    price_cache.put_usd_1e18(token, price_1e18, now, price_data.decimals);
                }
                price_cache.register_feed_decimals(feed, price_data.decimals);
            }
            Err(e) => warn!(%token, %feed, error = %e, "price reseed after reconnect failed"),
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Keccak256 of the OCR2 aggregator's `NewTransmission` event, the
/// round-level event this bot subscribes to instead of `AnswerUpdated`.
pub fn new_transmission_signature() -> B256 {
    keccak256("NewTransmission(uint32,int192,address,int192[],bytes,int192,uint64,bytes32,uint32,bytes)")
}

fn parse_transmission(log: Log, feed_to_token: &HashMap<Address, Address>) -> Option<OracleUpdate> {
    let oracle = log.address();
    let asset = *feed_to_token.get(&oracle)?;

    if log.topics().len() < 2 {
        warn!(oracle = %oracle, "invalid transmission log: missing round topic");
        return None;
    }
    let round_id = U256::from_be_bytes(log.topics()[1].0).to::<u128>();

    if log.data().data.len() < 32 {
        return None;
    }
    let answer = I256::from_be_bytes::<32>(log.data().data[0..32].try_into().ok()?);
    if answer.is_negative() {
        warn!(oracle = %oracle, "negative price from oracle");
        return None;
    }
    let price = U256::from_limbs(answer.into_raw().into_limbs());

    let block_number = log.block_number.unwrap_or(0);
    let tx_hash = log.transaction_hash.unwrap_or_default();
    let timestamp = now_millis() / 1000;

    debug!(oracle = %oracle, asset = %asset, round = round_id, block = block_number, "transmission decoded");

    Some(OracleUpdate {
        oracle,
        asset,
        price,
        round_id,
        timestamp,
        block_number,
        tx_hash,
        oracle_type: OracleType::Standard,
    })
}

/// Subscribes to the lending pool's state-changing events and reduces
/// them to `(users_affected, reserve_affected)` per spec.
pub struct PoolEventListener {
    ws_url: String,
    pool_address: Address,
    sigs: ProtocolEventSignatures,
    last_indices: DashMap<Address, (U256, U256)>,
    reserve_min_index_delta_bps: u32,
    ws_heartbeat: Duration,
}

impl PoolEventListener {
    pub fn new(
        ws_url: impl Into<String>,
        pool_address: Address,
        reserve_min_index_delta_bps: u32,
        ws_heartbeat: Duration,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            pool_address,
            sigs: ProtocolEventSignatures::aave_v3(),
            last_indices: DashMap::new(),
            reserve_min_index_delta_bps,
            ws_heartbeat,
        }
    }

    /// Same detach/backoff/reattach behavior as [`PriceFeedListener::subscribe`],
    /// minus the price reseed step since this listener carries no price state.
    pub async fn subscribe(&self) -> Result<Pin<Box<dyn Stream<Item = PoolEvent> + Send>>> {
        info!(pool = %self.pool_address, ws_url = %self.ws_url, "subscribing to pool events");

        let pool_address = self.pool_address;
        let connect = {
            let ws_url = self.ws_url.clone();
            move || {
                let ws_url = ws_url.clone();
                async move {
                    let ws = WsConnect::new(&ws_url);
                    let provider = ProviderBuilder::new().on_ws(ws).await?;
                    let filter = Filter::new()
                        .address(pool_address)
                        .event_signature(PoolContract::event_signatures());
                    let sub = provider.subscribe_logs(&filter).await?;
                    let stream = Box::pin(sub.into_stream()) as Pin<Box<dyn Stream<Item = Log> + Send>>;
                    Ok::<_, anyhow::Error>((provider, stream))
                }
            }
        };

        let (provider, inner_stream) = connect().await?;

        let sigs = self.sigs.clone();
        let ws_heartbeat = self.ws_heartbeat;

        let event_stream = futures::stream::unfold(
            (provider, inner_stream, Instant::now()),
            move |(mut provider, mut stream, mut last_frame)| {
                let connect = connect.clone();
                let sigs = sigs.clone();
                async move {
                    loop {
                        let budget = ws_heartbeat.saturating_sub(last_frame.elapsed()).max(Duration::from_millis(1));
                        let next = tokio::time::timeout(budget, stream.next()).await;
                        let reason = match next {
                            Ok(Some(log)) => {
                                last_frame = Instant::now();
                                if let Some(event) = parse_pool_event(log, &sigs) {
                                    return Some((event, (provider, stream, last_frame)));
                                }
                                continue;
                            }
                            Ok(None) => "stream ended",
                            Err(_) => "heartbeat timeout",
                        };

                        warn!(reason, "pool event websocket disconnected, reconnecting");
                        let mut reconnected = None;
                        for attempt in 0..RECONNECT_MAX_ATTEMPTS {
                            tokio::time::sleep(reconnect_backoff(attempt)).await;
                            match connect().await {
                                Ok((p, s)) => {
                                    reconnected = Some((p, s));
                                    break;
                                }
                                Err(e) => warn!(attempt, error = %e, "pool event reconnect attempt failed"),
                            }
                        }

                        match reconnected {
                            Some((p, s)) => {
                                provider = p;
                                stream = s;
                                last_frame = Instant::now();
                            }
                            None => {
                                error!(attempts = RECONNECT_MAX_ATTEMPTS, "pool event reconnection exhausted, giving up");
                                return None;
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }

    /// Reduce one decoded event into a sweep trigger, applying the
    /// reserve-data-updated suppression rule. Returns `None` when the
    /// event should be dropped entirely.
    pub fn on_event(&self, event: PoolEvent) -> Option<PoolSweepTrigger> {
        let block_number = event.block_number();
        let from_liquidation = event.is_liquidation();

        if let PoolEvent::ReserveDataUpdated {
            reserve,
            liquidity_index,
            variable_borrow_index,
            ..
        } = &event
        {
            let reserve = *reserve;
            let prev = self
                .last_indices
                .insert(reserve, (*liquidity_index, *variable_borrow_index));
            if let Some((prev_liq, prev_var)) = prev {
                let liq_delta_bps = index_delta_bps(prev_liq, *liquidity_index);
                let var_delta_bps = index_delta_bps(prev_var, *variable_borrow_index);
                if liq_delta_bps < self.reserve_min_index_delta_bps
                    && var_delta_bps < self.reserve_min_index_delta_bps
                {
                    return None;
                }
            }
            return Some(PoolSweepTrigger {
                users: Vec::new(),
                reserve: Some(reserve),
                block_number,
                from_liquidation: false,
            });
        }

        let mut users = Vec::new();
        if let Some(user) = event.affected_user() {
            users.push(user);
        }
        if let PoolEvent::LiquidationCall { user, .. } = &event {
            if !users.contains(user) {
                users.push(*user);
            }
        }

        Some(PoolSweepTrigger {
            users,
            reserve: Some(event.reserve()),
            block_number,
            from_liquidation,
        })
    }
}

fn index_delta_bps(prev: U256, current: U256) -> u32 {
    if prev.is_zero() {
        return u32::MAX;
    }
    let diff = if current > prev { current - prev } else { prev - current };
    ((diff * U256::from(10_000u64)) / prev).try_into().unwrap_or(u32::MAX)
}

fn parse_pool_event(log: Log, sigs: &ProtocolEventSignatures) -> Option<PoolEvent> {
    let block_number = log.block_number.unwrap_or(0);
    let tx_hash = log.transaction_hash.unwrap_or_default();

    if log.topics().is_empty() {
        return None;
    }
    let sig = log.topics()[0];

    if Some(sig) == sigs.supply {
        parse_supply_event(log, block_number, tx_hash)
    } else if Some(sig) == sigs.withdraw {
        parse_withdraw_event(log, block_number, tx_hash)
    } else if Some(sig) == sigs.borrow {
        parse_borrow_event(log, block_number, tx_hash)
    } else if Some(sig) == sigs.repay {
        parse_repay_event(log, block_number, tx_hash)
    } else if Some(sig) == sigs.liquidation {
        parse_liquidation_event(log, block_number, tx_hash)
    } else if Some(sig) == sigs.reserve_data_updated {
        parse_reserve_data_updated(log, block_number, tx_hash)
    } else {
        None
    }
}

fn parse_supply_event(log: Log, block_number: u64, tx_hash: B256) -> Option<PoolEvent> {
    if log.topics().len() < 3 || log.data().data.len() < 64 {
        return None;
    }
    let reserve = Address::from_slice(&log.topics()[1][12..]);
    let on_behalf_of = Address::from_slice(&log.topics()[2][12..]);
    let user = Address::from_slice(&log.data().data[12..32]);
    let amount = U256::from_be_slice(&log.data().data[32..64]);
    Some(PoolEvent::Supply {
        reserve,
        user,
        on_behalf_of,
        amount,
        block_number,
        tx_hash,
    })
}

fn parse_withdraw_event(log: Log, block_number: u64, tx_hash: B256) -> Option<PoolEvent> {
    if log.topics().len() < 4 || log.data().data.len() < 32 {
        return None;
    }
    let reserve = Address::from_slice(&log.topics()[1][12..]);
    let user = Address::from_slice(&log.topics()[2][12..]);
    let to = Address::from_slice(&log.topics()[3][12..]);
    let amount = U256::from_be_slice(&log.data().data[0..32]);
    Some(PoolEvent::Withdraw {
        reserve,
        user,
        to,
        amount,
        block_number,
        tx_hash,
    })
}

fn parse_borrow_event(log: Log, block_number: u64, tx_hash: B256) -> Option<PoolEvent> {
    if log.topics().len() < 3 || log.data().data.len() < 64 {
        return None;
    }
    let reserve = Address::from_slice(&log.topics()[1][12..]);
    let on_behalf_of = Address::from_slice(&log.topics()[2][12..]);
    let user = Address::from_slice(&log.data().data[12..32]);
    let amount = U256::from_be_slice(&log.data().data[32..64]);
    Some(PoolEvent::Borrow {
        reserve,
        user,
        on_behalf_of,
        amount,
        block_number,
        tx_hash,
    })
}

fn parse_repay_event(log: Log, block_number: u64, tx_hash: B256) -> Option<PoolEvent> {
    if log.topics().len() < 4 || log.data().data.len() < 32 {
        return None;
    }
    let reserve = Address::from_slice(&log.topics()[1][12..]);
    let user = Address::from_slice(&log.topics()[2][12..]);
    let repayer = Address::from_slice(&log.topics()[3][12..]);
    let amount = U256::from_be_slice(&log.data().data[0..32]);
    Some(PoolEvent::Repay {
        reserve,
        user,
        repayer,
        amount,
        block_number,
        tx_hash,
    })
}

fn parse_liquidation_event(log: Log, block_number: u64, tx_hash: B256) -> Option<PoolEvent> {
    if log.topics().len() < 4 || log.data().data.len() < 96 {
        return None;
    }
    let collateral_asset = Address::from_slice(&log.topics()[1][12..]);
    let debt_asset = Address::from_slice(&log.topics()[2][12..]);
    let user = Address::from_slice(&log.topics()[3][12..]);
    let debt_to_cover = U256::from_be_slice(&log.data().data[0..32]);
    let liquidated_collateral = U256::from_be_slice(&log.data().data[32..64]);
    let liquidator = Address::from_slice(&log.data().data[76..96]);
    Some(PoolEvent::LiquidationCall {
        collateral_asset,
        debt_asset,
        user,
        debt_to_cover,
        liquidated_collateral,
        liquidator,
        block_number,
        tx_hash,
    })
}

fn parse_reserve_data_updated(log: Log, block_number: u64, tx_hash: B256) -> Option<PoolEvent> {
    if log.topics().len() < 2 || log.data().data.len() < 128 {
        return None;
    }
    let reserve = Address::from_slice(&log.topics()[1][12..]);
    // liquidityRate, stableBorrowRate, variableBorrowRate, liquidityIndex, variableBorrowIndex
    let liquidity_index = U256::from_be_slice(&log.data().data[96..128]);
    let variable_borrow_index = if log.data().data.len() >= 160 {
        U256::from_be_slice(&log.data().data[128..160])
    } else {
        U256::ZERO
    };
    Some(PoolEvent::ReserveDataUpdated {
        reserve,
        liquidity_index,
        variable_borrow_index,
        block_number,
        tx_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address::from(bytes)
    }

    #[test]
    fn test_pool_event_affected_user() {
        let event = PoolEvent::Supply {
            reserve: Address::ZERO,
            user: addr(1),
            on_behalf_of: addr(2),
            amount: U256::from(1000u64),
            block_number: 100,
            tx_hash: B256::ZERO,
        };
        assert_eq!(event.affected_user(), Some(addr(2)));
    }

    #[test]
    fn test_sharp_drop_triggers_once_per_block() {
        let cache = Arc::new(PriceCache::new(60_000));
        let mut feed_to_token = HashMap::new();
        feed_to_token.insert(addr(9), addr(1));
        let listener = PriceFeedListener::new(
            "wss://example.invalid",
            feed_to_token,
            Vec::new(),
            cache,
            500, // 5% threshold
            Duration::from_secs(60),
            Duration::from_millis(0),
            false,
            Duration::from_secs(30),
        );

        let base = OracleUpdate {
            oracle: addr(9),
            asset: addr(1),
            price: U256::from(100_000_000u64),
            round_id: 1,
            timestamp: 0,
            block_number: 10,
            tx_hash: B256::ZERO,
            oracle_type: OracleType::Standard,
        };
        assert!(listener.on_update(base).is_none());

        let dropped = OracleUpdate {
            round_id: 2,
            price: U256::from(90_000_000u64), // -10%
            block_number: 11,
            ..OracleUpdate {
                oracle: addr(9),
                asset: addr(1),
                price: U256::ZERO,
                round_id: 0,
                timestamp: 0,
                block_number: 0,
                tx_hash: B256::ZERO,
                oracle_type: OracleType::Standard,
            }
        };
        let signal = listener.on_update(dropped);
        assert!(signal.is_some());

        let repeat_same_block = OracleUpdate {
            oracle: addr(9),
            asset: addr(1),
            price: U256::from(89_000_000u64),
            round_id: 3,
            timestamp: 0,
            block_number: 11,
            tx_hash: B256::ZERO,
            oracle_type: OracleType::Standard,
        };
        assert!(listener.on_update(repeat_same_block).is_none());
    }

    #[test]
    fn test_reserve_update_suppressed_below_floor() {
        let listener = PoolEventListener::new("wss://example.invalid", addr(5), 50, Duration::from_secs(30));
        let reserve = addr(1);
        let first = PoolEvent::ReserveDataUpdated {
            reserve,
            liquidity_index: U256::from(1_000_000_000u64),
            variable_borrow_index: U256::from(1_000_000_000u64),
            block_number: 1,
            tx_hash: B256::ZERO,
        };
        assert!(listener.on_event(first).is_some());

        let tiny_move = PoolEvent::ReserveDataUpdated {
            reserve,
            liquidity_index: U256::from(1_000_000_100u64),
            variable_borrow_index: U256::from(1_000_000_050u64),
            block_number: 2,
            tx_hash: B256::ZERO,
        };
        assert!(listener.on_event(tiny_move).is_none());
    }
}
