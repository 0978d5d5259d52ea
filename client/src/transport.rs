//! Transport seams between the engine and the lock service.
//!
//! The engine only sees these traits. [`HttpLockService`](crate::http::HttpLockService)
//! and [`WsFeedConnector`](crate::ws::WsFeedConnector) talk to a real server;
//! in-process implementations back the tests.
//!
//! # Dyn Compatibility
//!
//! The traits return `Pin<Box<dyn Future>>` instead of using `async fn` so they
//! can be held as `Arc<dyn LockService>` and captured by effect futures.

use futures::Stream;
use seatlock_core::TransportError;
use seatlock_core::protocol::{FeedMessage, HoldRequest, HoldResponse, SeatOutcome, Snapshot};
use seatlock_core::types::{SeatId, ShowtimeId};
use seatlock_runtime::retry::retry_with_predicate;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::config::EngineConfig;

/// Boxed future resolving to a transport result
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Frames from one feed subscription; the stream ends when the connection does
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedMessage, TransportError>> + Send>>;

/// Request/response side of the lock protocol
pub trait LockService: Send + Sync {
    /// Acquire holds
    fn acquire(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse>;

    /// Renew holds
    fn renew(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse>;

    /// Release holds
    fn release(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse>;

    /// Fetch the full state of a showtime
    fn snapshot(&self, showtime_id: ShowtimeId) -> TransportFuture<'_, Snapshot>;
}

/// Push side of the lock protocol
pub trait FeedConnector: Send + Sync {
    /// Open a subscription to a showtime's change feed
    fn subscribe(&self, showtime_id: ShowtimeId) -> TransportFuture<'_, FeedStream>;
}

/// Runs `call` under the configured per-attempt timeout and retry budget
///
/// A timed-out attempt counts as a failure. Protocol errors are not retried.
///
/// # Errors
///
/// The last [`TransportError`] once every attempt failed.
pub async fn call_with_retry<T, F, Fut>(config: &EngineConfig, mut call: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let deadline: Duration = config.request_timeout;
    retry_with_predicate(
        config.request_policy(),
        || {
            let attempt = call();
            async move {
                tokio::time::timeout(deadline, attempt)
                    .await
                    .unwrap_or(Err(TransportError::Timeout(deadline)))
            }
        },
        TransportError::is_retryable,
    )
    .await
}

/// Picks one seat's outcome out of a response
///
/// # Errors
///
/// [`TransportError::Protocol`] if the response does not mention the seat.
pub fn outcome_for(response: HoldResponse, seat_id: &SeatId) -> Result<SeatOutcome, TransportError> {
    response
        .outcomes
        .into_iter()
        .find(|o| &o.seat_id == seat_id)
        .ok_or_else(|| TransportError::Protocol(format!("response has no outcome for seat {seat_id}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config(retries: usize) -> EngineConfig {
        EngineConfig::builder()
            .request_timeout(Duration::from_millis(100))
            .request_retries(retries)
            .retry_delay(Duration::from_millis(10))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempt_is_retried_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<u32, _> = call_with_retry(&fast_config(1), || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    std::future::pending::<()>().await;
                }
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_with_last_error() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32, _> = call_with_retry(&fast_config(1), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Unavailable("down".into())) }
        })
        .await;

        assert_eq!(result, Err(TransportError::Unavailable("down".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32, _> = call_with_retry(&fast_config(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Protocol("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outcome_for_missing_seat_is_protocol_error() {
        let err = outcome_for(HoldResponse::default(), &SeatId::new("A1")).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
