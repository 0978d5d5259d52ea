//! Fixtures for multi-client scenarios.
//!
//! A [`TestShowtime`] is one scheduled showtime on an in-process lock manager
//! whose clock is a [`TokioClock`], so under paused tokio time the server's
//! hold expiry and every engine's timers move together.

use seatlock_client::{Engine, EngineConfig, EngineError};
use seatlock_core::environment::Clock;
use seatlock_core::protocol::{HoldRequest, HoldResponse};
use seatlock_core::types::{Hold, HolderId, SeatId, ShowtimeId};
use seatlock_runtime::retry::RetryPolicy;
use seatlock_server::layout::grid;
use seatlock_server::{ChangeFeed, LockConfig, LockError, LockManager};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::mocks::TokioClock;
use crate::transport::InProcessTransport;

/// Initializes a test tracing subscriber; later calls are no-ops
///
/// Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine settings for scenarios
///
/// Default poll intervals and renew fraction, with short request timeouts
/// and a fixed one second reconnect delay.
#[must_use]
pub fn fast_engine_config() -> EngineConfig {
    EngineConfig::builder()
        .request_timeout(Duration::from_secs(2))
        .retry_delay(Duration::from_millis(50))
        .reconnect(
            RetryPolicy::builder()
                .max_retries(usize::MAX)
                .initial_delay(Duration::from_secs(1))
                .max_delay(Duration::from_secs(1))
                .jitter(0.0)
                .build(),
        )
        .build()
}

/// Polls `check` every 10ms until it holds or `within` has passed
///
/// Returns whether the check ever passed.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// One showtime on an in-process lock manager
#[derive(Debug, Clone)]
pub struct TestShowtime {
    id: ShowtimeId,
    manager: Arc<LockManager>,
    clock: TokioClock,
}

impl TestShowtime {
    /// Schedules a grid of `rows` × `seats_per_row` seats with the given hold lifetime
    ///
    /// Must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`LockError`] if the layout is rejected.
    pub fn new(hold_ttl: Duration, rows: &[&str], seats_per_row: u32) -> Result<Self, LockError> {
        let clock = TokioClock::new();
        let manager = Arc::new(LockManager::new(
            LockConfig {
                hold_ttl,
                ..LockConfig::default()
            },
            Arc::new(clock),
            Arc::new(ChangeFeed::new(256)),
        ));
        let id = ShowtimeId::new();
        manager.schedule_showtime(id, grid(rows, seats_per_row))?;
        Ok(Self { id, manager, clock })
    }

    /// Showtime id
    #[must_use]
    pub const fn id(&self) -> ShowtimeId {
        self.id
    }

    /// Lock manager
    #[must_use]
    pub const fn manager(&self) -> &Arc<LockManager> {
        &self.manager
    }

    /// Clock shared by the manager and every engine built here
    #[must_use]
    pub const fn clock(&self) -> TokioClock {
        self.clock
    }

    /// A fresh, healthy transport
    #[must_use]
    pub fn transport(&self) -> InProcessTransport {
        InProcessTransport::new(Arc::clone(&self.manager))
    }

    /// Starts an engine on its own transport
    ///
    /// The transport is returned so the test can inject faults.
    ///
    /// # Errors
    ///
    /// [`EngineError`] from [`Engine::start`].
    pub async fn engine(&self, config: EngineConfig, holder_id: HolderId) -> Result<(Engine, InProcessTransport), EngineError> {
        let transport = self.transport();
        let engine = Engine::start(
            config,
            self.id,
            holder_id,
            Arc::new(transport.clone()),
            Arc::new(transport.clone()),
            Arc::new(self.clock) as Arc<dyn Clock>,
        )
        .await?;
        Ok((engine, transport))
    }

    /// Acquires seats straight on the manager, as a client without an engine would
    ///
    /// # Errors
    ///
    /// [`LockError`] if the request is rejected as a whole.
    pub fn acquire(&self, holder_id: HolderId, seats: &[&str]) -> Result<HoldResponse, LockError> {
        self.manager.acquire(&self.request(holder_id, seats))
    }

    /// Releases seats straight on the manager
    ///
    /// # Errors
    ///
    /// [`LockError`] if the request is rejected as a whole.
    pub fn release(&self, holder_id: HolderId, seats: &[&str]) -> Result<HoldResponse, LockError> {
        self.manager.release(&self.request(holder_id, seats))
    }

    /// Sells seats straight on the manager
    ///
    /// # Errors
    ///
    /// [`LockError`] if the request is rejected as a whole.
    pub fn confirm(&self, holder_id: HolderId, seats: &[&str]) -> Result<HoldResponse, LockError> {
        self.manager.confirm(&self.request(holder_id, seats))
    }

    /// The live hold on a seat
    #[must_use]
    pub fn hold(&self, seat: &str) -> Option<Hold> {
        self.manager.hold(self.id, &SeatId::new(seat)).ok().flatten()
    }

    fn request(&self, holder_id: HolderId, seats: &[&str]) -> HoldRequest {
        HoldRequest::new(self.id, seats.iter().copied().map(SeatId::new).collect(), holder_id)
    }
}
