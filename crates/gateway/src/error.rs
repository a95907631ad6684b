//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Error reported by the upstream session.
    #[error("Upstream error: {0}")]
    Upstream(#[from] upstream::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Instrument id that resolves to no tradable contract.
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(i64),

    /// Bar interval string that is not a valid bar size.
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

impl GatewayError {
    /// Whether the error means the upstream session is not connected.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, GatewayError::Upstream(e) if e.is_disconnected())
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
