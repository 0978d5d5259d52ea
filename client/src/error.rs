//! Engine errors.

use seatlock_runtime::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`Engine`](crate::Engine) calls
///
/// Seat-level failures are not errors: they come back as
/// [`SelectOutcome`](crate::SelectOutcome) values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine has been shut down
    #[error("engine has been shut down")]
    Shutdown,

    /// The engine did not resolve the call in time
    #[error("no answer within {0:?}")]
    Timeout(Duration),

    /// The store runtime failed
    #[error("engine runtime failure: {0}")]
    Runtime(StoreError),
}

impl EngineError {
    /// Maps a store error observed while waiting `waited`
    #[must_use]
    pub fn from_store(err: StoreError, waited: Duration) -> Self {
        match err {
            StoreError::ShutdownInProgress => Self::Shutdown,
            StoreError::Timeout => Self::Timeout(waited),
            StoreError::ChannelClosed => Self::Runtime(err),
        }
    }
}
