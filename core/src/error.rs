//! Transport-level failures shared by every client transport.

use std::time::Duration;
use thiserror::Error;

/// A request or subscription could not complete
///
/// Transport failures are never fatal: callers retry, roll back, or fall back
/// to polling a snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The lock service could not be reached or answered with a server error
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The peer sent something we could not understand
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection was closed
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the same request may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}
