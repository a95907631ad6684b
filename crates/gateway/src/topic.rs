//! Streaming topic keys.
//!
//! A topic names one logical stream shared by every interested client:
//! the stream kind, the instrument, and for candles the bar interval.
//! Keys are built only from request parameters, and the interval goes
//! through [`BarSize`] so equivalent spellings land on the same key.

use crate::error::{GatewayError, Result};
use std::fmt;
use upstream::{BarSize, InstrumentId};

/// Kind of client-facing stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Price,
    Candle,
    OrderBook,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Price => "price",
            StreamKind::Candle => "candle",
            StreamKind::OrderBook => "orderbook",
        }
    }

    /// Whether the upstream feed for this kind is a tick stream.
    pub fn uses_ticks(&self) -> bool {
        !matches!(self, StreamKind::Candle)
    }
}

/// Key of one logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    pub kind: StreamKind,
    pub instrument_id: InstrumentId,
    pub interval: Option<BarSize>,
}

impl TopicKey {
    pub fn price(instrument_id: InstrumentId) -> Self {
        Self {
            kind: StreamKind::Price,
            instrument_id,
            interval: None,
        }
    }

    pub fn order_book(instrument_id: InstrumentId) -> Self {
        Self {
            kind: StreamKind::OrderBook,
            instrument_id,
            interval: None,
        }
    }

    pub fn candle(instrument_id: InstrumentId, interval: BarSize) -> Self {
        Self {
            kind: StreamKind::Candle,
            instrument_id,
            interval: Some(interval),
        }
    }

    /// Build a candle key from a client-supplied interval string.
    pub fn parse_candle(instrument_id: InstrumentId, interval: &str) -> Result<Self> {
        let interval: BarSize = interval
            .parse()
            .map_err(|_| GatewayError::InvalidInterval(interval.to_string()))?;
        Ok(Self::candle(instrument_id, interval))
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.interval {
            Some(interval) => write!(f, "{}.{}.{}", self.kind.as_str(), self.instrument_id, interval),
            None => write!(f, "{}.{}", self.kind.as_str(), self.instrument_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equivalent_intervals_share_key() {
        let a = TopicKey::parse_candle(111, "5 mins").unwrap();
        let b = TopicKey::parse_candle(111, "5 min").unwrap();
        let c = TopicKey::parse_candle(111, "5mins").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.to_string(), "candle.111.5 mins");
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let keys: HashSet<TopicKey> = [
            TopicKey::price(111),
            TopicKey::order_book(111),
            TopicKey::parse_candle(111, "1 min").unwrap(),
            TopicKey::parse_candle(111, "5 mins").unwrap(),
            TopicKey::price(222),
        ]
        .into_iter()
        .collect();
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_invalid_interval() {
        assert!(matches!(
            TopicKey::parse_candle(111, "soon"),
            Err(GatewayError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(TopicKey::price(222).to_string(), "price.222");
        assert_eq!(TopicKey::order_book(7).to_string(), "orderbook.7");
    }
}
