//! HTTP/WebSocket gateway in front of one trading-platform session.
//!
//! This service:
//! - Owns a single upstream session shared by every request
//! - Serves request-response endpoints (accounts, positions, search, history)
//! - Streams prices, candles and top-of-book to WebSocket clients
//! - Shares one upstream subscription between all clients of a topic and
//!   cancels it when the last one leaves
//!
//! ## Architecture
//!
//! ```text
//! UpstreamSession (tick / bar event buses)
//!         ↓
//! StreamHub (one gate + forwarder per topic)
//!         ↓
//! Broadcaster (serialize once, non-blocking fan-out)
//!         ↓
//! SubscriptionRegistry (DashMap: topic → client channels)
//!         ↓
//! WebSocket clients
//! ```

pub mod api;
pub mod broadcaster;
pub mod client;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod queries;
pub mod registry;
pub mod streams;
pub mod topic;

pub use api::{create_router, ApiError};
pub use broadcaster::{Broadcaster, DeliveryReport};
pub use client::{ClientChannel, ClientId};
pub use commands::SessionCommand;
pub use config::GatewayConfig;
pub use context::GatewayContext;
pub use error::{GatewayError, Result};
pub use hub::{StreamHub, TopicLease};
pub use protocol::{BookLevel, StreamMessage};
pub use registry::SubscriptionRegistry;
pub use topic::{StreamKind, TopicKey};
