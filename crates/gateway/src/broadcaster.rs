//! Fan-out broadcaster: one stream message → every channel of a topic.
//!
//! The message is serialized once and the same frame is enqueued on each
//! registered channel without waiting. A channel whose queue is closed or
//! full has failed delivery; it is dropped from the registry and closed,
//! which its connection handler treats as a disconnect.
//!
//! `broadcast` never returns an error: it runs on the upstream event path.

use crate::protocol::StreamMessage;
use crate::registry::SubscriptionRegistry;
use crate::topic::TopicKey;
use axum::extract::ws::{close_code, Message};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one broadcast pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Delivers serialized stream messages to a topic's registrants.
pub struct Broadcaster {
    registry: Arc<SubscriptionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `message` to every channel currently registered on `topic`.
    pub fn broadcast(&self, topic: &TopicKey, message: &StreamMessage) -> DeliveryReport {
        let channels = self.registry.snapshot(topic);
        if channels.is_empty() {
            debug!("No clients subscribed to {}", topic);
            return DeliveryReport::default();
        }

        // Pre-serialize once
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize message for {}: {}", topic, e);
                return DeliveryReport::default();
            }
        };
        let frame = Message::Text(json.into());

        let mut report = DeliveryReport::default();
        for channel in channels {
            if channel.try_deliver(frame.clone()) {
                report.delivered += 1;
            } else {
                report.failed += 1;
                self.registry.unregister(topic, &channel.id);
                if channel.close_with(close_code::AGAIN, "delivery failed") {
                    debug!("Dropped client {} from {} after failed delivery", channel.id, topic);
                }
            }
        }

        counter!("gateway_messages_broadcast_total", "kind" => topic.kind.as_str()).increment(1);
        counter!("gateway_messages_delivered_total").increment(report.delivered as u64);
        if report.failed > 0 {
            counter!("gateway_delivery_failures_total").increment(report.failed as u64);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientChannel;
    use tokio::sync::mpsc;
    use upstream::Ticker;

    fn tick(price: f64) -> StreamMessage {
        StreamMessage::price(&Ticker {
            instrument_id: 111,
            last: Some(price),
            ..Ticker::default()
        })
    }

    fn text(msg: Message) -> String {
        match msg {
            Message::Text(text) => text.to_string(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_delivers_identical_payload_to_all() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let topic = TopicKey::price(111);
        let (a, mut rx_a) = ClientChannel::bounded();
        let (b, mut rx_b) = ClientChannel::bounded();
        registry.register(&topic, a);
        registry.register(&topic, b);

        let report = broadcaster.broadcast(&topic, &tick(10.0));
        assert_eq!(report, DeliveryReport { delivered: 2, failed: 0 });
        assert_eq!(text(rx_a.try_recv().unwrap()), text(rx_b.try_recv().unwrap()));
    }

    #[test]
    fn test_failed_channels_are_pruned() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let topic = TopicKey::price(111);

        let mut live = Vec::new();
        for _ in 0..3 {
            let (ch, rx) = ClientChannel::bounded();
            registry.register(&topic, ch);
            live.push(rx);
        }
        let mut failing = Vec::new();
        for _ in 0..2 {
            let (ch, rx) = ClientChannel::bounded();
            drop(rx);
            registry.register(&topic, ch.clone());
            failing.push(ch);
        }
        // A full queue counts as failed delivery too.
        let (tx, _full_rx) = mpsc::channel(1);
        let full = Arc::new(ClientChannel::new(tx));
        assert!(full.try_deliver(Message::Text("filler".into())));
        registry.register(&topic, full.clone());
        failing.push(full);

        let report = broadcaster.broadcast(&topic, &tick(1.0));
        assert_eq!(report, DeliveryReport { delivered: 3, failed: 3 });
        assert_eq!(registry.snapshot(&topic).len(), 3);
        assert!(failing.iter().all(|ch| ch.is_closed()));
        for rx in &mut live {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[test]
    fn test_per_topic_order_is_preserved() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let topic = TopicKey::price(111);
        let (ch, mut rx) = ClientChannel::bounded();
        registry.register(&topic, ch);

        for i in 0..20 {
            broadcaster.broadcast(&topic, &tick(i as f64));
        }
        for i in 0..20 {
            let value: serde_json::Value = serde_json::from_str(&text(rx.try_recv().unwrap())).unwrap();
            assert_eq!(value["price"], serde_json::json!(i as f64));
        }
    }

    #[test]
    fn test_empty_topic_is_noop() {
        let broadcaster = Broadcaster::new(Arc::new(SubscriptionRegistry::new()));
        assert_eq!(
            broadcaster.broadcast(&TopicKey::price(5), &tick(1.0)),
            DeliveryReport::default()
        );
    }
}
