//! The per-showtime engine handle.
//!
//! [`Engine`] owns a [`Store`] running the [`EngineReducer`] plus the feed
//! connection loop. Everything it schedules (timers, requests, the feed) is
//! registered with the store and torn down by [`Engine::shutdown`].

use chrono::{DateTime, Utc};
use futures::StreamExt;
use seatlock_core::effect::EffectId;
use seatlock_core::environment::Clock;
use seatlock_core::protocol::{FeedEvent, FeedMessage, HoldRequest};
use seatlock_core::types::{HolderId, Seat, SeatId, ShowtimeId};
use seatlock_runtime::retry::RetryPolicy;
use seatlock_runtime::{Store, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::notifications::{ConflictNotice, Notifier};
use crate::reducer::{DeselectOutcome, EngineAction, EngineEnvironment, EngineReducer, SelectOutcome};
use crate::state::{EngineState, FeedState, SeatPhase};
use crate::transport::{FeedConnector, LockService, call_with_retry};

/// Store type behind an [`Engine`]
pub type EngineStore = Store<EngineState, EngineAction, EngineEnvironment, EngineReducer>;

/// Key of the feed connection loop in the store's scheduler
#[must_use]
pub fn feed_task() -> EffectId {
    EffectId::new("feed")
}

/// Reconciliation engine for one showtime view
///
/// Dropping the engine tears down every timer, request and the feed loop.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::start(config, showtime_id, holder_id, service, connector, clock).await?;
///
/// match engine.select(SeatId::new("A1")).await? {
///     SelectOutcome::Held { expires_at } => println!("held until {expires_at}"),
///     other => println!("not held: {other:?}"),
/// }
///
/// let mut notices = engine.subscribe_notices();
/// while let Ok(notice) = notices.recv().await {
///     println!("{}", notice.message);
/// }
/// ```
pub struct Engine {
    store: EngineStore,
    service: Arc<dyn LockService>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    config: EngineConfig,
    showtime_id: ShowtimeId,
    holder_id: HolderId,
    tickets: AtomicU64,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("showtime_id", &self.showtime_id)
            .field("holder_id", &self.holder_id)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Loads the first snapshot and starts the feed loop
    ///
    /// A first snapshot that fails or times out is not fatal: the poll timer
    /// keeps retrying.
    ///
    /// # Errors
    ///
    /// [`EngineError`] if the store stopped before the engine was running.
    #[tracing::instrument(skip_all, fields(showtime = %showtime_id, holder = %holder_id))]
    pub async fn start(
        config: EngineConfig,
        showtime_id: ShowtimeId,
        holder_id: HolderId,
        service: Arc<dyn LockService>,
        connector: Arc<dyn FeedConnector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let env = EngineEnvironment::new(Arc::clone(&service), Arc::clone(&clock), config.clone());
        let notifier = env.notifier.clone();
        let state = EngineState::new(showtime_id, holder_id, config.renew_holds);
        let store = Store::with_broadcast_capacity(state, EngineReducer, env, 256);

        let budget = config.request_budget();
        match store
            .send_and_wait_for(
                EngineAction::Start,
                |action| matches!(action, EngineAction::SnapshotLoaded(_)),
                budget,
            )
            .await
        {
            Ok(EngineAction::SnapshotLoaded(Err(error))) => {
                tracing::warn!(%error, "First snapshot failed, polling will retry");
            },
            Ok(_) => tracing::debug!("First snapshot loaded"),
            Err(StoreError::Timeout) => tracing::warn!(?budget, "First snapshot timed out"),
            Err(err) => return Err(EngineError::from_store(err, budget)),
        }

        store.spawn_keyed(
            feed_task(),
            run_feed(store.clone(), connector, showtime_id, config.reconnect.clone()),
        );

        Ok(Self {
            store,
            service,
            clock,
            notifier,
            config,
            showtime_id,
            holder_id,
            tickets: AtomicU64::new(1),
        })
    }

    /// Showtime this engine tracks
    #[must_use]
    pub const fn showtime_id(&self) -> ShowtimeId {
        self.showtime_id
    }

    /// Holder identity used for every request
    #[must_use]
    pub const fn holder_id(&self) -> HolderId {
        self.holder_id
    }

    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::Relaxed)
    }

    /// Tries to hold a seat
    ///
    /// The seat shows as [`SeatPhase::Locking`] until the server answers.
    ///
    /// # Errors
    ///
    /// [`EngineError`] if the engine is shut down or does not answer in time.
    #[tracing::instrument(skip(self), fields(showtime = %self.showtime_id))]
    pub async fn select(&self, seat_id: SeatId) -> Result<SelectOutcome, EngineError> {
        let ticket = self.next_ticket();
        let wait = self.config.request_budget();
        let resolved = self
            .store
            .send_and_wait_for(
                EngineAction::Select { seat_id, ticket },
                move |action| matches!(action, EngineAction::SelectResolved { ticket: t, .. } if *t == ticket),
                wait,
            )
            .await
            .map_err(|err| EngineError::from_store(err, wait))?;

        match resolved {
            EngineAction::SelectResolved { outcome, .. } => Ok(outcome),
            _ => Err(EngineError::Runtime(StoreError::ChannelClosed)),
        }
    }

    /// Gives a seat up
    ///
    /// Returns once the seat left the cart; the release itself runs in the
    /// background.
    ///
    /// # Errors
    ///
    /// [`EngineError`] if the engine is shut down or does not answer in time.
    #[tracing::instrument(skip(self), fields(showtime = %self.showtime_id))]
    pub async fn deselect(&self, seat_id: SeatId) -> Result<DeselectOutcome, EngineError> {
        let ticket = self.next_ticket();
        let wait = self.config.request_budget();
        let resolved = self
            .store
            .send_and_wait_for(
                EngineAction::Deselect { seat_id, ticket },
                move |action| matches!(action, EngineAction::DeselectResolved { ticket: t, .. } if *t == ticket),
                wait,
            )
            .await
            .map_err(|err| EngineError::from_store(err, wait))?;

        match resolved {
            EngineAction::DeselectResolved { outcome, .. } => Ok(outcome),
            _ => Err(EngineError::Runtime(StoreError::ChannelClosed)),
        }
    }

    /// Releases every seat in the cart
    ///
    /// # Errors
    ///
    /// [`EngineError::Shutdown`] after shutdown.
    pub async fn deselect_all(&self) -> Result<(), EngineError> {
        self.send(EngineAction::DeselectAll).await
    }

    /// Fetches a snapshot now
    ///
    /// # Errors
    ///
    /// [`EngineError::Shutdown`] after shutdown.
    pub async fn resync(&self) -> Result<(), EngineError> {
        self.send(EngineAction::Resync).await
    }

    /// Turns keep-alive renewals on or off
    ///
    /// # Errors
    ///
    /// [`EngineError::Shutdown`] after shutdown.
    pub async fn set_renewal(&self, enabled: bool) -> Result<(), EngineError> {
        self.send(EngineAction::SetRenewal { enabled }).await
    }

    async fn send(&self, action: EngineAction) -> Result<(), EngineError> {
        self.store
            .send(action)
            .await
            .map_err(|err| EngineError::from_store(err, Duration::ZERO))
    }

    /// Phase of one seat for rendering
    pub async fn phase(&self, seat_id: &SeatId) -> SeatPhase {
        let now = self.clock.now();
        self.store.state(|s| s.phase(seat_id, now)).await
    }

    /// Phase of every known seat
    pub async fn phases(&self) -> BTreeMap<SeatId, SeatPhase> {
        let now = self.clock.now();
        self.store
            .state(|s| {
                s.layout
                    .keys()
                    .chain(s.mirror.keys())
                    .map(|seat_id| (seat_id.clone(), s.phase(seat_id, now)))
                    .collect()
            })
            .await
    }

    /// Seats in the cart with their expiry
    pub async fn cart(&self) -> BTreeMap<SeatId, DateTime<Utc>> {
        self.store.state(|s| s.cart.clone()).await
    }

    /// Catalog record of a seat
    pub async fn seat(&self, seat_id: &SeatId) -> Option<Seat> {
        self.store.state(|s| s.layout.get(seat_id).cloned()).await
    }

    /// Seat catalog, in seat id order
    pub async fn layout(&self) -> Vec<Seat> {
        self.store.state(|s| s.layout.values().cloned().collect()).await
    }

    /// Time left on a held seat, for countdown widgets
    pub async fn countdown(&self, seat_id: &SeatId) -> Option<Duration> {
        let now = self.clock.now();
        self.store.state(|s| s.countdown(seat_id, now)).await
    }

    /// Conflict notices raised from now on
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<ConflictNotice> {
        self.notifier.subscribe()
    }

    /// Most recent notices, oldest first
    pub async fn recent_notices(&self) -> Vec<ConflictNotice> {
        self.store.state(|s| s.notices.iter().cloned().collect()).await
    }

    /// Feed connectivity
    pub async fn feed_state(&self) -> FeedState {
        self.store.state(|s| s.feed).await
    }

    /// Server time of the last applied snapshot
    pub async fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.store.state(|s| s.last_snapshot).await
    }

    /// Ids of pending timers and keyed tasks
    #[must_use]
    pub fn scheduled(&self) -> Vec<EffectId> {
        self.store.scheduled()
    }

    /// Whether [`Engine::shutdown`] has run
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.store.is_shutdown()
    }

    /// Stops every timer, request and the feed loop
    ///
    /// Holds stay on the server until they expire; use [`Engine::leave`] to
    /// release them first.
    pub fn shutdown(&self) {
        if !self.store.is_shutdown() {
            tracing::debug!(showtime = %self.showtime_id, "Engine shutting down");
        }
        self.store.shutdown();
    }

    /// Releases the cart (best effort) and shuts down
    pub async fn leave(self) {
        let seats: Vec<SeatId> = self.store.state(|s| s.cart.keys().cloned().collect()).await;
        self.shutdown();
        if seats.is_empty() {
            return;
        }

        let request = HoldRequest::new(self.showtime_id, seats, self.holder_id);
        let service = Arc::clone(&self.service);
        if let Err(error) = call_with_retry(&self.config, || service.release(request.clone())).await {
            tracing::warn!(%error, "Release on leave failed, holds will expire");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.store.shutdown();
    }
}

/// Feed connection loop: subscribe, forward frames, reconnect with backoff
async fn run_feed(store: EngineStore, connector: Arc<dyn FeedConnector>, showtime_id: ShowtimeId, policy: RetryPolicy) {
    let mut connected_before = false;
    let mut failures = 0_usize;

    loop {
        let reason = match connector.subscribe(showtime_id).await {
            Ok(mut stream) => {
                failures = 0;
                let event = if connected_before {
                    FeedEvent::Resubscribed
                } else {
                    FeedEvent::Connected
                };
                connected_before = true;
                if store.send(EngineAction::Feed(event)).await.is_err() {
                    return;
                }

                loop {
                    let action = match stream.next().await {
                        Some(Ok(FeedMessage::Delta(delta))) => EngineAction::Feed(FeedEvent::Delta(delta)),
                        Some(Ok(FeedMessage::Lagged { skipped })) => EngineAction::FeedLagged { skipped },
                        Some(Ok(FeedMessage::Ping)) => continue,
                        Some(Ok(FeedMessage::Error { message })) => break message,
                        Some(Err(error)) => break error.to_string(),
                        None => break "feed closed".to_string(),
                    };
                    if store.send(action).await.is_err() {
                        return;
                    }
                }
            },
            Err(error) => {
                failures = failures.saturating_add(1);
                error.to_string()
            },
        };

        if store
            .send(EngineAction::Feed(FeedEvent::Disconnected { reason }))
            .await
            .is_err()
        {
            return;
        }

        if failures > policy.max_retries {
            tracing::warn!(failures, "Giving up on the feed, polling only");
            return;
        }
        let delay = policy.delay_for_attempt(failures.saturating_sub(1));
        tracing::debug!(?delay, failures, "Reconnecting feed");
        tokio::time::sleep(delay).await;
    }
}
