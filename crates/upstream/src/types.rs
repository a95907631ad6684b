//! Domain types exchanged with the trading-platform session.
//!
//! Field names serialize in camelCase to match what browser clients of the
//! platform's own tooling expect (`conId`, `secType`, `avgCost`, ...).

use serde::{Deserialize, Serialize};

/// Platform-specific numeric contract identifier.
pub type InstrumentId = i64;

/// A fully specified tradable contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub con_id: InstrumentId,
    pub symbol: String,
    pub sec_type: String,
    pub exchange: String,
    pub primary_exchange: String,
    pub currency: String,
    pub local_symbol: String,
}

/// A symbol-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDescription {
    pub contract: Instrument,
    pub derivative_sec_types: Vec<String>,
}

/// Descriptive details for a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetails {
    pub contract: Instrument,
    pub market_name: String,
    pub long_name: String,
    pub min_tick: f64,
    pub time_zone_id: String,
    pub trading_hours: String,
    pub liquid_hours: String,
}

/// Latest top-of-book and trade state for one instrument.
///
/// `None` means the platform has not reported the field yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub instrument_id: InstrumentId,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    pub volume: Option<f64>,
    /// Unix seconds of the update.
    pub time: i64,
}

/// Tickers that changed since the previous batch; may span instruments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickBatch {
    pub tickers: Vec<Ticker>,
}

/// One OHLCV bar. `time` is the bar's start in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Opaque token identifying one upstream streaming subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Update for a real-time bar subscription.
///
/// `has_new_bar` is set when the last element of `bars` has just completed.
#[derive(Debug, Clone, PartialEq)]
pub struct BarUpdate {
    pub subscription: SubscriptionId,
    pub instrument_id: InstrumentId,
    pub bars: Vec<Bar>,
    pub has_new_bar: bool,
}

impl BarUpdate {
    /// The bar that just completed, if this update marks a bar boundary.
    pub fn completed_bar(&self) -> Option<&Bar> {
        if self.has_new_bar {
            self.bars.last()
        } else {
            None
        }
    }
}

/// A held position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub account: String,
    pub contract: Instrument,
    pub position: f64,
    pub avg_cost: f64,
}

/// Price source for bar data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WhatToShow {
    #[default]
    Trades,
    Midpoint,
    Bid,
    Ask,
}

/// Parameters of a historical bar request, in the platform's string forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalRequest {
    /// `""` for "now", otherwise `%Y%m%d %H:%M:%S`.
    #[serde(default)]
    pub end_date_time: String,
    pub duration: String,
    pub bar_size: String,
    #[serde(default)]
    pub what_to_show: WhatToShow,
    #[serde(default = "default_use_rth")]
    pub use_rth: bool,
}

fn default_use_rth() -> bool {
    true
}
