//! # Broker Errors

use thiserror::Error;

/// Errors from the broker transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// A frame could not be decoded.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A frame grew beyond the decoder limit.
    #[error("frame exceeds maximum size of {max} bytes")]
    FrameTooLarge { max: usize },

    /// The endpoint URL is unusable.
    #[error("invalid broker endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The broker answered with an `ERROR` frame.
    #[error("{0}")]
    Server(String),

    /// The connection is no longer open.
    #[error("connection closed")]
    Closed,

    /// No answer arrived in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Final failure to establish a connection after failover.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{cause}")]
pub struct ConnectionError {
    pub cause: String,
}

impl From<BrokerError> for ConnectionError {
    fn from(err: BrokerError) -> Self {
        Self {
            cause: err.to_string(),
        }
    }
}

/// Failure to begin, write or commit a publish transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("publish failed: {cause}")]
pub struct PublishError {
    pub cause: String,
}

impl From<BrokerError> for PublishError {
    fn from(err: BrokerError) -> Self {
        Self {
            cause: err.to_string(),
        }
    }
}
