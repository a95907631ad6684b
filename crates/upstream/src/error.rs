//! Error types for the upstream session.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request rejected ({code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    #[error("Invalid bar size: {0}")]
    InvalidBarSize(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid end time: {0}")]
    InvalidEndTime(String),
}

impl Error {
    /// Whether the error means the session has no live connection.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Error::NotConnected | Error::ConnectionFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
