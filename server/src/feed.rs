//! Change feed hub: one broadcast channel per showtime.
//!
//! Delivery is at-most-once. A subscriber that falls more than `capacity`
//! deltas behind loses the oldest ones and is told how many it skipped.

use seatlock_core::protocol::SeatDelta;
use seatlock_core::types::ShowtimeId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

/// Receiver of one showtime's deltas
pub type FeedSubscription = broadcast::Receiver<SeatDelta>;

/// Per-showtime delta broadcaster
#[derive(Debug)]
pub struct ChangeFeed {
    channels: RwLock<HashMap<ShowtimeId, broadcast::Sender<SeatDelta>>>,
    capacity: usize,
}

impl ChangeFeed {
    /// Creates a hub whose channels buffer `capacity` deltas per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Opens the channel for a showtime (no-op if already open)
    pub fn open(&self, showtime_id: ShowtimeId) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(showtime_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    /// Closes a showtime's channel; subscribers see the stream end
    pub fn close(&self, showtime_id: ShowtimeId) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&showtime_id);
    }

    /// Publishes a delta, returning how many subscribers received it
    pub fn publish(&self, delta: SeatDelta) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(&delta.showtime_id)
            .and_then(|tx| tx.send(delta).ok())
            .unwrap_or(0)
    }

    /// Subscribes to a showtime, or `None` if its channel is not open
    #[must_use]
    pub fn subscribe(&self, showtime_id: ShowtimeId) -> Option<FeedSubscription> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&showtime_id)
            .map(broadcast::Sender::subscribe)
    }

    /// Current subscribers of a showtime
    #[must_use]
    pub fn subscriber_count(&self, showtime_id: ShowtimeId) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&showtime_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}
