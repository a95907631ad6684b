//! Trading-platform session collaborator.
//!
//! This crate defines the boundary the gateway talks to:
//! - `UpstreamSession`: async request/response calls plus subscribe/cancel
//!   and session-wide tick/bar event buses
//! - Domain types: instruments, contract details, tickers, bars, positions
//! - `BarSize` / `HistoryDuration` parsing of the platform's interval strings
//! - `SimulatedSession`: an in-process implementation with a random-walk feed
//!
//! # Example
//!
//! ```ignore
//! use upstream::{SimConfig, SimulatedSession, UpstreamSession};
//!
//! let session = SimulatedSession::new(SimConfig::default());
//! session.connect().await?;
//! let instrument = session.resolve(265598).await?.expect("known contract");
//! let token = session.subscribe_ticks(&instrument).await?;
//! ```

pub mod bar_size;
pub mod error;
pub mod session;
pub mod sim;
pub mod types;

pub use bar_size::{BarSize, BarUnit, HistoryDuration};
pub use error::{Error, Result};
pub use session::UpstreamSession;
pub use sim::{ActiveSubscription, SimConfig, SimFeed, SimInstrument, SimulatedSession};
pub use types::{
    Bar, BarUpdate, ContractDescription, ContractDetails, HistoricalRequest, Instrument,
    InstrumentId, Position, SubscriptionId, TickBatch, Ticker, WhatToShow,
};
