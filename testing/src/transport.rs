//! In-process client transport.
//!
//! [`InProcessTransport`] answers the engine's requests straight from a
//! [`LockManager`] and turns its change feed into a [`FeedStream`]. Faults can
//! be switched on per transport, so one engine can lose deltas or its feed
//! while the others stay healthy.

use futures::stream;
use seatlock_client::transport::{FeedConnector, FeedStream, LockService, TransportFuture};
use seatlock_core::TransportError;
use seatlock_core::protocol::{FeedMessage, HoldRequest, HoldResponse, Snapshot};
use seatlock_core::types::ShowtimeId;
use seatlock_server::LockError;
use seatlock_server::lock_manager::LockManager;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// A call made through the transport
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Call {
    /// `acquire`
    Acquire,
    /// `renew`
    Renew,
    /// `release`
    Release,
    /// `snapshot`
    Snapshot,
    /// Feed subscription
    Subscribe,
}

#[derive(Debug)]
struct Faults {
    failing_requests: AtomicUsize,
    dropped_deltas: AtomicUsize,
    feed_down: AtomicBool,
    latency: Mutex<Duration>,
    cut: watch::Sender<u64>,
    calls: Mutex<Vec<Call>>,
}

impl Faults {
    fn new() -> Self {
        Self {
            failing_requests: AtomicUsize::new(0),
            dropped_deltas: AtomicUsize::new(0),
            feed_down: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            cut: watch::channel(0).0,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    fn latency(&self) -> Duration {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Takes one from a fault budget, if any is left
fn take(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn rejected(error: LockError) -> TransportError {
    TransportError::Protocol(error.to_string())
}

/// Client transport wired directly to a [`LockManager`]
///
/// Clones share the fault switches and the call log.
///
/// # Example
///
/// ```ignore
/// let transport = InProcessTransport::new(Arc::clone(&manager));
/// transport.drop_next_deltas(1);
///
/// let engine = Engine::start(
///     config,
///     showtime_id,
///     HolderId::new(),
///     Arc::new(transport.clone()),
///     Arc::new(transport.clone()),
///     clock,
/// )
/// .await?;
/// ```
#[derive(Clone, Debug)]
pub struct InProcessTransport {
    manager: Arc<LockManager>,
    faults: Arc<Faults>,
}

impl InProcessTransport {
    /// A healthy transport to `manager`
    #[must_use]
    pub fn new(manager: Arc<LockManager>) -> Self {
        Self {
            manager,
            faults: Arc::new(Faults::new()),
        }
    }

    /// The lock manager behind this transport
    #[must_use]
    pub const fn manager(&self) -> &Arc<LockManager> {
        &self.manager
    }

    /// The next `n` requests fail with [`TransportError::Unavailable`]
    pub fn fail_next_requests(&self, n: usize) {
        self.faults.failing_requests.store(n, Ordering::SeqCst);
    }

    /// The next `n` deltas are silently lost
    pub fn drop_next_deltas(&self, n: usize) {
        self.faults.dropped_deltas.store(n, Ordering::SeqCst);
    }

    /// While down, subscriptions are refused
    pub fn set_feed_down(&self, down: bool) {
        self.faults.feed_down.store(down, Ordering::SeqCst);
    }

    /// Ends every open feed stream
    pub fn disconnect(&self) {
        self.faults.cut.send_modify(|generation| *generation += 1);
    }

    /// Delay added before every request is answered
    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Every call so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.faults.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// How many times `call` was made
    #[must_use]
    pub fn count(&self, call: Call) -> usize {
        self.faults
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    /// Forgets the call log
    pub fn clear_calls(&self) {
        self.faults.calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    async fn answer<T>(&self, call: Call, respond: impl FnOnce(&LockManager) -> Result<T, LockError>) -> Result<T, TransportError> {
        self.faults.record(call);
        let latency = self.faults.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if take(&self.faults.failing_requests) {
            return Err(TransportError::Unavailable(format!("injected failure on {call:?}")));
        }
        respond(&self.manager).map_err(rejected)
    }
}

impl LockService for InProcessTransport {
    fn acquire(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse> {
        Box::pin(self.answer(Call::Acquire, move |m| m.acquire(&request)))
    }

    fn renew(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse> {
        Box::pin(self.answer(Call::Renew, move |m| m.renew(&request)))
    }

    fn release(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse> {
        Box::pin(self.answer(Call::Release, move |m| m.release(&request)))
    }

    fn snapshot(&self, showtime_id: ShowtimeId) -> TransportFuture<'_, Snapshot> {
        Box::pin(self.answer(Call::Snapshot, move |m| m.snapshot(showtime_id)))
    }
}

struct Subscription {
    deltas: broadcast::Receiver<seatlock_core::protocol::SeatDelta>,
    cut: watch::Receiver<u64>,
    faults: Arc<Faults>,
}

impl FeedConnector for InProcessTransport {
    fn subscribe(&self, showtime_id: ShowtimeId) -> TransportFuture<'_, FeedStream> {
        Box::pin(async move {
            self.faults.record(Call::Subscribe);
            if self.faults.feed_down.load(Ordering::SeqCst) {
                return Err(TransportError::Unavailable("feed is down".to_string()));
            }
            let deltas = self
                .manager
                .feed()
                .subscribe(showtime_id)
                .ok_or_else(|| rejected(LockError::UnknownShowtime(showtime_id)))?;
            let subscription = Subscription {
                deltas,
                cut: self.faults.cut.subscribe(),
                faults: Arc::clone(&self.faults),
            };

            let frames = stream::unfold(subscription, |mut sub| async move {
                loop {
                    tokio::select! {
                        _ = sub.cut.changed() => return None,
                        received = sub.deltas.recv() => match received {
                            Ok(delta) => {
                                if take(&sub.faults.dropped_deltas) {
                                    tracing::debug!(seat = %delta.state.seat_id, "Dropping delta");
                                    continue;
                                }
                                return Some((Ok(FeedMessage::Delta(delta)), sub));
                            },
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                return Some((Ok(FeedMessage::Lagged { skipped }), sub));
                            },
                            Err(broadcast::error::RecvError::Closed) => return None,
                        },
                    }
                }
            });
            Ok(Box::pin(frames) as FeedStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mocks::ManualClock;
    use futures::StreamExt;
    use seatlock_core::types::{HolderId, SeatId};
    use seatlock_server::feed::ChangeFeed;
    use seatlock_server::layout::grid;
    use seatlock_server::lock_manager::LockConfig;

    fn manager() -> (Arc<LockManager>, ShowtimeId) {
        let manager = Arc::new(LockManager::new(
            LockConfig::default(),
            Arc::new(ManualClock::default()),
            Arc::new(ChangeFeed::new(16)),
        ));
        let id = ShowtimeId::new();
        manager.schedule_showtime(id, grid(&["A"], 4)).unwrap();
        (manager, id)
    }

    fn request(id: ShowtimeId, seat: &str) -> HoldRequest {
        HoldRequest::new(id, vec![SeatId::new(seat)], HolderId::new())
    }

    #[tokio::test]
    async fn injected_failures_are_used_up() {
        let (manager, id) = manager();
        let transport = InProcessTransport::new(manager);
        transport.fail_next_requests(1);

        assert!(transport.acquire(request(id, "A1")).await.unwrap_err().is_retryable());
        assert!(transport.acquire(request(id, "A1")).await.unwrap().all_succeeded());
        assert_eq!(transport.count(Call::Acquire), 2);
    }

    #[tokio::test]
    async fn manager_rejections_are_protocol_errors() {
        let (manager, _) = manager();
        let transport = InProcessTransport::new(manager);

        let err = transport.snapshot(ShowtimeId::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[tokio::test]
    async fn feed_drops_deltas_and_ends_on_disconnect() {
        let (manager, id) = manager();
        let transport = InProcessTransport::new(Arc::clone(&manager));
        let mut feed = transport.subscribe(id).await.unwrap();
        transport.drop_next_deltas(1);

        manager.acquire(&request(id, "A1")).unwrap();
        manager.acquire(&request(id, "A2")).unwrap();

        match feed.next().await {
            Some(Ok(FeedMessage::Delta(delta))) => assert_eq!(delta.state.seat_id, SeatId::new("A2")),
            other => panic!("expected a delta, got {other:?}"),
        }

        transport.disconnect();
        assert!(feed.next().await.is_none());
        assert_eq!(transport.calls(), vec![Call::Subscribe]);
    }

    #[tokio::test]
    async fn refuses_subscriptions_while_down() {
        let (manager, id) = manager();
        let transport = InProcessTransport::new(manager);
        transport.set_feed_down(true);

        assert!(matches!(transport.subscribe(id).await, Err(TransportError::Unavailable(_))));

        transport.set_feed_down(false);
        assert!(transport.subscribe(id).await.is_ok());
    }
}
