//! Stream hub: ties topic registrations to upstream feeds.
//!
//! Each topic has a gate, an async mutex holding the topic's upstream feed
//! (subscription token plus the forwarder task that turns bus events into
//! broadcasts). Acquire and release take the gate, so for one topic the
//! sequence register → open feed and unregister → cancel feed is linear
//! even though opening a feed awaits the upstream session. Other topics
//! are unaffected.
//!
//! ```text
//! acquire:  gate ─► registry.register ─► [no feed] bus.subscribe ─► session.subscribe_* ─► spawn forwarder
//! release:  gate ─► registry.unregister ─► [topic empty] abort forwarder ─► session.unsubscribe_*
//! ```
//!
//! The bus receiver is created before the upstream subscribe call so no
//! event emitted after the subscription starts is missed.

use crate::broadcaster::Broadcaster;
use crate::client::{ClientChannel, ClientId};
use crate::error::Result;
use crate::protocol::StreamMessage;
use crate::registry::SubscriptionRegistry;
use crate::topic::{StreamKind, TopicKey};
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use upstream::{BarUpdate, Instrument, SubscriptionId, TickBatch, UpstreamSession, WhatToShow};

/// Handle on one live upstream subscription.
struct UpstreamFeed {
    subscription: SubscriptionId,
    ticks: bool,
    forwarder: JoinHandle<()>,
}

type Gate = Arc<Mutex<Option<UpstreamFeed>>>;

/// Owns the mapping from topics to upstream feeds.
pub struct StreamHub {
    session: Arc<dyn UpstreamSession>,
    registry: Arc<SubscriptionRegistry>,
    broadcaster: Arc<Broadcaster>,
    gates: DashMap<TopicKey, Gate>,
    feeds: AtomicUsize,
    bar_granularity_secs: u32,
}

impl StreamHub {
    pub fn new(session: Arc<dyn UpstreamSession>, bar_granularity_secs: u32) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
        Self {
            session,
            registry,
            broadcaster,
            gates: DashMap::new(),
            feeds: AtomicUsize::new(0),
            bar_granularity_secs,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Number of upstream subscriptions currently open.
    pub fn feed_count(&self) -> usize {
        self.feeds.load(Ordering::SeqCst)
    }

    /// Register `channel` on `topic`, opening the upstream feed if the topic
    /// has none.
    ///
    /// If the feed cannot be opened the registration is rolled back and the
    /// error returned; nothing is retried.
    pub async fn acquire(
        self: &Arc<Self>,
        topic: TopicKey,
        instrument: &Instrument,
        channel: Arc<ClientChannel>,
    ) -> Result<TopicLease> {
        let client_id = channel.id;
        let gate = self.gate(&topic);
        {
            let mut feed = gate.lock().await;
            let first = self.registry.register(&topic, channel);
            if feed.is_none() {
                match self.open_feed(&topic, instrument).await {
                    Ok(opened) => {
                        info!("Opened upstream feed {} for {}", opened.subscription, topic);
                        *feed = Some(opened);
                        self.feed_opened();
                    }
                    Err(e) => {
                        warn!("Failed to open upstream feed for {}: {}", topic, e);
                        self.registry.unregister(&topic, &client_id);
                        drop(feed);
                        drop(gate);
                        self.discard_gate(&topic);
                        return Err(e);
                    }
                }
            } else if first {
                debug!("Reusing upstream feed for {}", topic);
            }
        }

        Ok(TopicLease {
            hub: self.clone(),
            topic,
            client_id,
            released: false,
        })
    }

    /// Unregister a client; cancel the topic's feed if nobody is left.
    ///
    /// The gate stays locked until the upstream cancel returns, so a new
    /// acquire on the topic opens its feed only after the old one is gone.
    /// Running twice for the same client is harmless.
    async fn release(&self, topic: &TopicKey, client_id: &ClientId) {
        let gate = self.gate(topic);
        {
            let mut feed = gate.lock().await;
            self.registry.unregister(topic, client_id);
            if self.registry.is_empty(topic) {
                if let Some(closing) = feed.take() {
                    self.close_feed(topic, closing).await;
                }
            }
        }
        drop(gate);
        self.discard_gate(topic);
    }

    fn gate(&self, topic: &TopicKey) -> Gate {
        self.gates.entry(topic.clone()).or_default().clone()
    }

    /// Drop the topic's gate once nobody holds it and it carries no feed.
    fn discard_gate(&self, topic: &TopicKey) {
        self.gates.remove_if(topic, |_, gate| {
            Arc::strong_count(gate) == 1 && gate.try_lock().is_ok_and(|feed| feed.is_none())
        });
    }

    async fn open_feed(&self, topic: &TopicKey, instrument: &Instrument) -> Result<UpstreamFeed> {
        if topic.kind.uses_ticks() {
            let rx = self.session.tick_events();
            let subscription = self.session.subscribe_ticks(instrument).await?;
            let forwarder = tokio::spawn(forward_ticks(rx, topic.clone(), self.broadcaster.clone()));
            Ok(UpstreamFeed {
                subscription,
                ticks: true,
                forwarder,
            })
        } else {
            let rx = self.session.bar_events();
            let subscription = self
                .session
                .subscribe_bars(instrument, self.bar_granularity_secs, WhatToShow::Trades)
                .await?;
            let forwarder = tokio::spawn(forward_bars(
                rx,
                topic.clone(),
                subscription,
                self.broadcaster.clone(),
            ));
            Ok(UpstreamFeed {
                subscription,
                ticks: false,
                forwarder,
            })
        }
    }

    async fn close_feed(&self, topic: &TopicKey, feed: UpstreamFeed) {
        feed.forwarder.abort();
        self.feed_closed();

        let result = if feed.ticks {
            self.session.unsubscribe_ticks(feed.subscription).await
        } else {
            self.session.unsubscribe_bars(feed.subscription).await
        };
        match result {
            Ok(()) => info!("Cancelled upstream feed {} for {}", feed.subscription, topic),
            Err(e) => warn!("Failed to cancel upstream feed {} for {}: {}", feed.subscription, topic, e),
        }
    }

    fn feed_opened(&self) {
        let n = self.feeds.fetch_add(1, Ordering::SeqCst) + 1;
        counter!("gateway_upstream_subscriptions_total").increment(1);
        gauge!("gateway_upstream_feeds").set(n as f64);
    }

    fn feed_closed(&self) {
        let n = self.feeds.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        gauge!("gateway_upstream_feeds").set(n as f64);
    }
}

/// A client's registration on a topic.
///
/// `release` unregisters and, for the last client, cancels the upstream feed.
/// A lease dropped without `release` does the same from a spawned task.
/// Either way the release runs on its own task, so it completes even if the
/// caller stops waiting for it.
pub struct TopicLease {
    hub: Arc<StreamHub>,
    topic: TopicKey,
    client_id: ClientId,
    released: bool,
}

impl TopicLease {
    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Release and wait for the upstream cancel, if any, to finish.
    pub async fn release(mut self) {
        let handle = tokio::runtime::Handle::current();
        let task = self.spawn_release(&handle);
        self.released = true;
        if let Err(e) = task.await {
            warn!("Release task for {} failed: {}", self.topic, e);
        }
    }

    fn spawn_release(&self, handle: &tokio::runtime::Handle) -> JoinHandle<()> {
        let hub = self.hub.clone();
        let topic = self.topic.clone();
        let client_id = self.client_id;
        handle.spawn(async move { hub.release(&topic, &client_id).await })
    }
}

impl Drop for TopicLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.spawn_release(&handle);
            }
            Err(_) => warn!("Lease on {} dropped outside a runtime; not released", self.topic),
        }
    }
}

async fn forward_ticks(
    mut rx: broadcast::Receiver<TickBatch>,
    topic: TopicKey,
    broadcaster: Arc<Broadcaster>,
) {
    loop {
        match rx.recv().await {
            Ok(batch) => {
                for ticker in batch
                    .tickers
                    .iter()
                    .filter(|t| t.instrument_id == topic.instrument_id)
                {
                    let message = match topic.kind {
                        StreamKind::OrderBook => StreamMessage::order_book(ticker),
                        _ => StreamMessage::price(ticker),
                    };
                    broadcaster.broadcast(&topic, &message);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Forwarder for {} lagged, skipped {} tick batches", topic, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Tick forwarder for {} stopped", topic);
}

async fn forward_bars(
    mut rx: broadcast::Receiver<BarUpdate>,
    topic: TopicKey,
    subscription: SubscriptionId,
    broadcaster: Arc<Broadcaster>,
) {
    loop {
        match rx.recv().await {
            Ok(update) if update.subscription == subscription => {
                if let Some(bar) = update.completed_bar() {
                    broadcaster.broadcast(&topic, &StreamMessage::candle(topic.instrument_id, bar));
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Forwarder for {} lagged, skipped {} bar updates", topic, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Bar forwarder for {} stopped", topic);
}
