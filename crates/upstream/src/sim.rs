//! In-process simulated trading-platform session.
//!
//! Serves a fixed instrument catalogue and, while connected, drives a random
//! walk per subscribed instrument: every step publishes one tick batch for all
//! tick subscriptions and one bar update per bar subscription (partial until
//! the bar's granularity has elapsed, then a completed bar with
//! `has_new_bar`). Historical requests are synthesized deterministically.
//!
//! With `tick_interval: None` nothing is generated in the background; tests
//! drive the buses through [`SimulatedSession::publish_ticks`] and
//! [`SimulatedSession::publish_bar_update`] instead.

use crate::bar_size::{BarSize, HistoryDuration};
use crate::error::{Error, Result};
use crate::session::UpstreamSession;
use crate::types::{
    Bar, BarUpdate, ContractDescription, ContractDetails, HistoricalRequest, Instrument,
    InstrumentId, Position, SubscriptionId, TickBatch, Ticker, WhatToShow,
};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use dashmap::{DashMap, DashSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cap on synthesized historical bars per request.
const MAX_HISTORICAL_BARS: u64 = 2_000;

/// One catalogue entry: contract details plus the walk's starting price.
#[derive(Debug, Clone)]
pub struct SimInstrument {
    pub details: ContractDetails,
    pub price: f64,
}

impl SimInstrument {
    pub fn new(
        con_id: InstrumentId,
        symbol: &str,
        sec_type: &str,
        exchange: &str,
        long_name: &str,
        price: f64,
    ) -> Self {
        let (route, currency) = if sec_type == "CASH" {
            ("IDEALPRO", symbol.rsplit('.').next().unwrap_or("USD"))
        } else {
            ("SMART", "USD")
        };
        Self {
            details: ContractDetails {
                contract: Instrument {
                    con_id,
                    symbol: symbol.split('.').next().unwrap_or(symbol).to_string(),
                    sec_type: sec_type.to_string(),
                    exchange: route.to_string(),
                    primary_exchange: exchange.to_string(),
                    currency: currency.to_string(),
                    local_symbol: symbol.to_string(),
                },
                market_name: symbol.split('.').next().unwrap_or(symbol).to_string(),
                long_name: long_name.to_string(),
                min_tick: if sec_type == "CASH" { 0.00005 } else { 0.01 },
                time_zone_id: "US/Eastern".to_string(),
                trading_hours: String::new(),
                liquid_hours: String::new(),
            },
            price,
        }
    }

    fn instrument(&self) -> &Instrument {
        &self.details.contract
    }
}

/// Simulator configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Gateway address this session stands in for (reported, not dialled).
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub instruments: Vec<SimInstrument>,
    pub accounts: Vec<String>,
    pub positions: Vec<Position>,
    /// Step period of the background walk; `None` disables it.
    pub tick_interval: Option<Duration>,
    /// Artificial latency added to every subscribe call.
    pub subscribe_latency: Duration,
    /// Artificial latency added to every unsubscribe call; the
    /// subscription stays active until it has elapsed.
    pub unsubscribe_latency: Duration,
    /// Capacity of each event bus.
    pub event_capacity: usize,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
            instruments: default_catalogue(),
            accounts: vec!["DU0000001".to_string()],
            positions: Vec::new(),
            tick_interval: Some(Duration::from_millis(250)),
            subscribe_latency: Duration::ZERO,
            unsubscribe_latency: Duration::ZERO,
            event_capacity: 1024,
            seed: 42,
        }
    }
}

fn default_catalogue() -> Vec<SimInstrument> {
    vec![
        SimInstrument::new(265598, "AAPL", "STK", "NASDAQ", "APPLE INC", 190.0),
        SimInstrument::new(272093, "MSFT", "STK", "NASDAQ", "MICROSOFT CORP", 410.0),
        SimInstrument::new(756733, "SPY", "STK", "ARCA", "SPDR S&P 500 ETF TRUST", 500.0),
        SimInstrument::new(76792991, "TSLA", "STK", "NASDAQ", "TESLA INC", 240.0),
        SimInstrument::new(4391, "AMD", "STK", "NASDAQ", "ADVANCED MICRO DEVICES", 160.0),
        SimInstrument::new(1715006, "A", "STK", "NYSE", "AGILENT TECHNOLOGIES INC", 130.0),
        SimInstrument::new(251962528, "AA", "STK", "NYSE", "ALCOA CORP", 35.0),
        SimInstrument::new(12087792, "EUR.USD", "CASH", "IDEALPRO", "European Monetary Union Euro", 1.08),
    ]
}

/// What an active simulated subscription streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFeed {
    Ticks,
    Bars { granularity_secs: u32 },
}

/// Snapshot of one active subscription, for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub id: SubscriptionId,
    pub instrument_id: InstrumentId,
    pub feed: SimFeed,
}

/// Mutable walk state, behind one lock.
struct MarketState {
    rng: StdRng,
    prices: HashMap<InstrumentId, f64>,
    volumes: HashMap<InstrumentId, f64>,
    partial_bars: HashMap<SubscriptionId, Bar>,
}

struct SimInner {
    config: SimConfig,
    catalogue: DashMap<InstrumentId, SimInstrument>,
    connected: AtomicBool,
    next_subscription: AtomicU64,
    subscriptions: DashMap<SubscriptionId, ActiveSubscription>,
    rejected: DashSet<InstrumentId>,
    market: Mutex<MarketState>,
    tick_tx: broadcast::Sender<TickBatch>,
    bar_tx: broadcast::Sender<BarUpdate>,
    driver: Mutex<Option<JoinHandle<()>>>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

/// Simulated [`UpstreamSession`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimulatedSession {
    inner: Arc<SimInner>,
}

impl SimulatedSession {
    pub fn new(config: SimConfig) -> Self {
        let (tick_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (bar_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let catalogue = DashMap::new();
        let mut prices = HashMap::new();
        for entry in &config.instruments {
            prices.insert(entry.instrument().con_id, entry.price);
            catalogue.insert(entry.instrument().con_id, entry.clone());
        }
        let market = MarketState {
            rng: StdRng::seed_from_u64(config.seed),
            prices,
            volumes: HashMap::new(),
            partial_bars: HashMap::new(),
        };
        Self {
            inner: Arc::new(SimInner {
                config,
                catalogue,
                connected: AtomicBool::new(false),
                next_subscription: AtomicU64::new(1),
                subscriptions: DashMap::new(),
                rejected: DashSet::new(),
                market: Mutex::new(market),
                tick_tx,
                bar_tx,
                driver: Mutex::new(None),
                subscribe_calls: AtomicUsize::new(0),
                unsubscribe_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Gateway host this session reports.
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Gateway port this session reports.
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Add (or replace) a catalogue entry.
    pub fn add_instrument(&self, instrument: SimInstrument) {
        let con_id = instrument.instrument().con_id;
        lock(&self.inner.market).prices.insert(con_id, instrument.price);
        self.inner.catalogue.insert(con_id, instrument);
    }

    /// Make every later subscribe call for `con_id` fail.
    pub fn reject_subscriptions(&self, con_id: InstrumentId) {
        self.inner.rejected.insert(con_id);
    }

    /// Publish a tick batch on the bus. Returns the number of receivers.
    pub fn publish_ticks(&self, batch: TickBatch) -> usize {
        self.inner.tick_tx.send(batch).unwrap_or(0)
    }

    /// Publish a bar update on the bus. Returns the number of receivers.
    pub fn publish_bar_update(&self, update: BarUpdate) -> usize {
        self.inner.bar_tx.send(update).unwrap_or(0)
    }

    /// Currently active subscriptions, ordered by id.
    pub fn active_subscriptions(&self) -> Vec<ActiveSubscription> {
        let mut subs: Vec<_> = self.inner.subscriptions.iter().map(|s| *s.value()).collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    /// Total successful subscribe calls since creation.
    pub fn subscribe_calls(&self) -> usize {
        self.inner.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Total successful unsubscribe calls since creation.
    pub fn unsubscribe_calls(&self) -> usize {
        self.inner.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Advance the walk by one step and publish the resulting events.
    pub fn step(&self) {
        self.inner.step(Utc::now().timestamp());
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn open_subscription(&self, instrument: &Instrument, feed: SimFeed) -> Result<SubscriptionId> {
        self.ensure_connected()?;
        if !self.inner.config.subscribe_latency.is_zero() {
            tokio::time::sleep(self.inner.config.subscribe_latency).await;
        }
        if self.inner.rejected.contains(&instrument.con_id) {
            return Err(Error::Rejected {
                code: 354,
                message: format!("Requested market data is not subscribed for {}", instrument.con_id),
            });
        }
        if !self.inner.catalogue.contains_key(&instrument.con_id) {
            return Err(Error::Rejected {
                code: 200,
                message: format!("No security definition has been found for {}", instrument.con_id),
            });
        }

        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.inner.subscriptions.insert(
            id,
            ActiveSubscription {
                id,
                instrument_id: instrument.con_id,
                feed,
            },
        );
        self.inner.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated subscription {} opened for {} ({:?})", id, instrument.con_id, feed);
        Ok(id)
    }

    async fn close_subscription(&self, subscription: SubscriptionId) -> Result<()> {
        self.ensure_connected()?;
        if !self.inner.config.unsubscribe_latency.is_zero() {
            tokio::time::sleep(self.inner.config.unsubscribe_latency).await;
        }
        match self.inner.subscriptions.remove(&subscription) {
            Some(_) => {
                lock(&self.inner.market).partial_bars.remove(&subscription);
                self.inner.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
                debug!("Simulated subscription {} closed", subscription);
                Ok(())
            }
            None => Err(Error::UnknownSubscription(subscription.0)),
        }
    }
}

impl SimInner {
    fn step(&self, now: i64) {
        let subs: Vec<ActiveSubscription> =
            self.subscriptions.iter().map(|s| *s.value()).collect();
        if subs.is_empty() {
            return;
        }

        let mut tickers = Vec::new();
        let mut bar_updates = Vec::new();
        {
            let mut market = lock(&self.market);
            let mut walked: HashMap<InstrumentId, f64> = HashMap::new();
            for sub in &subs {
                let price = match walked.get(&sub.instrument_id) {
                    Some(price) => *price,
                    None => {
                        let price = market.walk(sub.instrument_id);
                        walked.insert(sub.instrument_id, price);
                        price
                    }
                };

                match sub.feed {
                    SimFeed::Ticks => {
                        if tickers.iter().any(|t: &Ticker| t.instrument_id == sub.instrument_id) {
                            continue;
                        }
                        tickers.push(market.ticker(sub.instrument_id, price, now));
                    }
                    SimFeed::Bars { granularity_secs } => {
                        bar_updates.push(market.advance_bar(sub, granularity_secs, price, now));
                    }
                }
            }
        }

        if !tickers.is_empty() {
            let _ = self.tick_tx.send(TickBatch { tickers });
        }
        for update in bar_updates {
            let _ = self.bar_tx.send(update);
        }
    }
}

impl MarketState {
    fn walk(&mut self, con_id: InstrumentId) -> f64 {
        let drift: f64 = self.rng.gen_range(-0.001..0.001);
        let price = self.prices.entry(con_id).or_insert(100.0);
        *price = (*price * (1.0 + drift)).max(0.0001);
        *price
    }

    fn ticker(&mut self, con_id: InstrumentId, price: f64, now: i64) -> Ticker {
        let half_spread = (price * 0.0001).max(0.00005);
        let traded: f64 = self.rng.gen_range(1.0..100.0_f64).round();
        let volume = self.volumes.entry(con_id).or_insert(0.0);
        *volume += traded;
        Ticker {
            instrument_id: con_id,
            last: Some(price),
            bid: Some(price - half_spread),
            ask: Some(price + half_spread),
            bid_size: Some(self.rng.gen_range(1.0..500.0_f64).round()),
            ask_size: Some(self.rng.gen_range(1.0..500.0_f64).round()),
            volume: Some(*volume),
            time: now,
        }
    }

    fn advance_bar(
        &mut self,
        sub: &ActiveSubscription,
        granularity_secs: u32,
        price: f64,
        now: i64,
    ) -> BarUpdate {
        let granularity = i64::from(granularity_secs.max(1));
        let start = now - now.rem_euclid(granularity);
        let traded: f64 = self.rng.gen_range(1.0..100.0_f64).round();

        let mut completed = None;
        let bar = self.partial_bars.entry(sub.id).or_insert(Bar {
            time: start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        });
        if bar.time < start {
            completed = Some(*bar);
            *bar = Bar {
                time: start,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 0.0,
            };
        }
        bar.high = bar.high.max(price);
        bar.low = bar.low.min(price);
        bar.close = price;
        bar.volume += traded;

        match completed {
            Some(done) => BarUpdate {
                subscription: sub.id,
                instrument_id: sub.instrument_id,
                bars: vec![done],
                has_new_bar: true,
            },
            None => BarUpdate {
                subscription: sub.id,
                instrument_id: sub.instrument_id,
                bars: vec![*bar],
                has_new_bar: false,
            },
        }
    }
}

#[async_trait]
impl UpstreamSession for SimulatedSession {
    async fn connect(&self) -> Result<()> {
        if self.inner.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(
            "Simulated session ready as client {} of {}:{} ({} instruments)",
            self.inner.config.client_id,
            self.inner.config.host,
            self.inner.config.port,
            self.inner.catalogue.len()
        );

        if let Some(period) = self.inner.config.tick_interval {
            let weak: Weak<SimInner> = Arc::downgrade(&self.inner);
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    match weak.upgrade() {
                        Some(inner) => inner.step(Utc::now().timestamp()),
                        None => break,
                    }
                }
            });
            if let Some(previous) = lock(&self.inner.driver).replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(driver) = lock(&self.inner.driver).take() {
            driver.abort();
        }
        let dropped = self.inner.subscriptions.len();
        self.inner.subscriptions.clear();
        lock(&self.inner.market).partial_bars.clear();
        if dropped > 0 {
            warn!("Simulated session disconnected with {} active subscriptions", dropped);
        } else {
            info!("Simulated session disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn contract_details(&self, con_id: InstrumentId) -> Result<Vec<ContractDetails>> {
        self.ensure_connected()?;
        Ok(self
            .inner
            .catalogue
            .get(&con_id)
            .map(|entry| vec![entry.details.clone()])
            .unwrap_or_default())
    }

    async fn matching_symbols(&self, pattern: &str) -> Result<Vec<ContractDescription>> {
        self.ensure_connected()?;
        let mut hits: Vec<ContractDescription> = self
            .inner
            .catalogue
            .iter()
            .filter(|entry| symbol_matches(pattern, &entry.details))
            .map(|entry| ContractDescription {
                contract: entry.instrument().clone(),
                derivative_sec_types: if entry.instrument().sec_type == "STK" {
                    vec!["OPT".to_string(), "WAR".to_string()]
                } else {
                    Vec::new()
                },
            })
            .collect();
        hits.sort_by(|a, b| {
            a.contract
                .symbol
                .cmp(&b.contract.symbol)
                .then(a.contract.con_id.cmp(&b.contract.con_id))
        });
        Ok(hits)
    }

    async fn managed_accounts(&self) -> Result<Vec<String>> {
        self.ensure_connected()?;
        Ok(self.inner.config.accounts.clone())
    }

    async fn positions(&self, account: &str) -> Result<Vec<Position>> {
        self.ensure_connected()?;
        Ok(self
            .inner
            .config
            .positions
            .iter()
            .filter(|p| p.account == account)
            .cloned()
            .collect())
    }

    async fn historical_bars(
        &self,
        instrument: &Instrument,
        request: &HistoricalRequest,
    ) -> Result<Vec<Bar>> {
        self.ensure_connected()?;
        let bar_size: BarSize = request.bar_size.parse()?;
        let duration: HistoryDuration = request.duration.parse()?;
        let end = parse_end_date_time(&request.end_date_time)?;
        let start_price = match self.inner.catalogue.get(&instrument.con_id) {
            Some(entry) => entry.price,
            None => return Ok(Vec::new()),
        };

        let step = bar_size.seconds().max(1);
        let count = (duration.seconds() / step).clamp(1, MAX_HISTORICAL_BARS);
        let step = step as i64;
        let last_start = end - end.rem_euclid(step) - step;
        let first_start = last_start - (count as i64 - 1) * step;

        let mut rng = StdRng::seed_from_u64(instrument.con_id as u64 ^ first_start as u64);
        let mut price = start_price;
        let mut bars = Vec::with_capacity(count as usize);
        for i in 0..count as i64 {
            let open = price;
            let close = (open * (1.0 + rng.gen_range(-0.004..0.004))).max(0.0001);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.002));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.002));
            bars.push(Bar {
                time: first_start + i * step,
                open,
                high,
                low,
                close,
                volume: rng.gen_range(100.0..10_000.0_f64).round(),
            });
            price = close;
        }
        Ok(bars)
    }

    async fn subscribe_ticks(&self, instrument: &Instrument) -> Result<SubscriptionId> {
        self.open_subscription(instrument, SimFeed::Ticks).await
    }

    async fn unsubscribe_ticks(&self, subscription: SubscriptionId) -> Result<()> {
        self.close_subscription(subscription).await
    }

    async fn subscribe_bars(
        &self,
        instrument: &Instrument,
        granularity_secs: u32,
        _what_to_show: WhatToShow,
    ) -> Result<SubscriptionId> {
        self.open_subscription(instrument, SimFeed::Bars { granularity_secs }).await
    }

    async fn unsubscribe_bars(&self, subscription: SubscriptionId) -> Result<()> {
        self.close_subscription(subscription).await
    }

    fn tick_events(&self) -> broadcast::Receiver<TickBatch> {
        self.inner.tick_tx.subscribe()
    }

    fn bar_events(&self) -> broadcast::Receiver<BarUpdate> {
        self.inner.bar_tx.subscribe()
    }
}

/// `AB*` matches any symbol starting with `AB`, `AB?` exactly one more
/// character; a plain pattern matches a symbol prefix or a long-name substring.
fn symbol_matches(pattern: &str, details: &ContractDetails) -> bool {
    let pattern = pattern.trim().to_ascii_uppercase();
    let symbol = details.contract.symbol.to_ascii_uppercase();
    if let Some(prefix) = pattern.strip_suffix('*') {
        symbol.starts_with(prefix)
    } else if let Some(prefix) = pattern.strip_suffix('?') {
        symbol.len() == prefix.len() + 1 && symbol.starts_with(prefix)
    } else {
        !pattern.is_empty()
            && (symbol.starts_with(&pattern)
                || details.long_name.to_ascii_uppercase().contains(&pattern))
    }
}

/// `""` means now; otherwise `%Y%m%d %H:%M:%S` in local time.
fn parse_end_date_time(value: &str) -> Result<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Utc::now().timestamp());
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%d %H:%M:%S")
        .map_err(|_| Error::InvalidEndTime(value.to_string()))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| Error::InvalidEndTime(value.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
