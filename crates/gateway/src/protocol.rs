//! WebSocket stream message types.
//!
//! Every frame sent on a streaming connection is one JSON object tagged by
//! `type`. Numbers are always present: fields the platform has not reported
//! are sent as `0` rather than `null`, and an absent book side is `[]`.

use serde::Serialize;
use upstream::{Bar, InstrumentId, Ticker};

/// Message sent from server to a streaming client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    /// Last trade and top-of-book quote.
    #[serde(rename_all = "camelCase")]
    Price {
        instrument_id: InstrumentId,
        price: f64,
        bid: f64,
        ask: f64,
        volume: f64,
    },
    /// A completed bar.
    #[serde(rename_all = "camelCase")]
    Candle {
        instrument_id: InstrumentId,
        /// Bar start, unix seconds.
        time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    },
    /// Top-of-book as single-level ladders.
    Orderbook {
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    },
}

/// One price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

/// The platform reports unknown values as NaN on some paths.
fn known(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn or_zero(value: Option<f64>) -> f64 {
    known(value).unwrap_or(0.0)
}

impl StreamMessage {
    /// Price message from a ticker update.
    pub fn price(ticker: &Ticker) -> Self {
        StreamMessage::Price {
            instrument_id: ticker.instrument_id,
            price: or_zero(ticker.last),
            bid: or_zero(ticker.bid),
            ask: or_zero(ticker.ask),
            volume: or_zero(ticker.volume),
        }
    }

    /// Candle message from a completed bar.
    pub fn candle(instrument_id: InstrumentId, bar: &Bar) -> Self {
        StreamMessage::Candle {
            instrument_id,
            time: bar.time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }

    /// Order-book message from a ticker's top of book.
    pub fn order_book(ticker: &Ticker) -> Self {
        let level = |price: Option<f64>, size: Option<f64>| {
            known(price)
                .map(|price| BookLevel {
                    price,
                    quantity: or_zero(size),
                })
                .into_iter()
                .collect::<Vec<_>>()
        };
        StreamMessage::Orderbook {
            bids: level(ticker.bid, ticker.bid_size),
            asks: level(ticker.ask, ticker.ask_size),
        }
    }
}
