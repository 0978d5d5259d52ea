//! Conflict notices for the UI layer.

use chrono::{DateTime, Utc};
use seatlock_core::types::SeatId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a seat left the cart without the user asking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Another customer now holds the seat
    SeatTaken,
    /// The seat was sold to another customer
    SeatSold,
    /// The hold lapsed and the seat is free again
    HoldExpired,
}

impl NoticeKind {
    /// Metric label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::SeatTaken => "seat_taken",
            Self::SeatSold => "seat_sold",
            Self::HoldExpired => "hold_expired",
        }
    }

    fn message(self, seat_id: &SeatId) -> String {
        match self {
            Self::SeatTaken => format!("Seat {seat_id} was taken by another customer."),
            Self::SeatSold => format!("Seat {seat_id} has been sold."),
            Self::HoldExpired => format!("Your hold on seat {seat_id} expired."),
        }
    }
}

/// One user-facing conflict notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictNotice {
    /// Affected seat
    pub seat_id: SeatId,
    /// What happened
    pub kind: NoticeKind,
    /// Display text
    pub message: String,
    /// When the engine noticed
    pub raised_at: DateTime<Utc>,
}

impl ConflictNotice {
    /// Builds a notice with the standard message for `kind`
    #[must_use]
    pub fn new(seat_id: SeatId, kind: NoticeKind, raised_at: DateTime<Utc>) -> Self {
        let message = kind.message(&seat_id);
        Self {
            seat_id,
            kind,
            message,
            raised_at,
        }
    }
}

/// Fan-out of notices to any number of listeners
#[derive(Clone, Debug)]
pub struct Notifier {
    sender: broadcast::Sender<ConflictNotice>,
}

impl Notifier {
    /// Creates a notifier buffering `capacity` notices per listener
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New listener; sees notices raised from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConflictNotice> {
        self.sender.subscribe()
    }

    /// Delivers a notice, returning how many listeners received it
    pub fn publish(&self, notice: ConflictNotice) -> usize {
        self.sender.send(notice).unwrap_or(0)
    }
}
