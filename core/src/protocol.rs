//! Wire protocol between the lock manager and its clients.
//!
//! Request/response bodies for the hold endpoints, the showtime snapshot used
//! by the poll path, and the change-feed frames pushed over the websocket.
//! Field names are camelCase on the wire.

use crate::types::{HolderId, Seat, SeatId, SeatStatus, ShowtimeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Hold requests and responses
// ============================================================================

/// Body of every hold operation (acquire, renew, release, confirm)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest {
    /// Target showtime
    pub showtime_id: ShowtimeId,
    /// Seats to operate on
    pub seat_ids: Vec<SeatId>,
    /// Caller identity
    pub holder_id: HolderId,
}

impl HoldRequest {
    /// Creates a request
    #[must_use]
    pub fn new(showtime_id: ShowtimeId, seat_ids: Vec<SeatId>, holder_id: HolderId) -> Self {
        Self {
            showtime_id,
            seat_ids,
            holder_id,
        }
    }
}

/// Why a per-seat operation failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Another holder has a live hold
    HeldByOther,
    /// The seat is sold
    Sold,
    /// The caller holds nothing on this seat
    NotHeld,
    /// The caller's hold lapsed before the request arrived
    Expired,
    /// No such seat in this showtime
    UnknownSeat,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::HeldByOther => "held by another customer",
            Self::Sold => "sold",
            Self::NotHeld => "not held",
            Self::Expired => "hold expired",
            Self::UnknownSeat => "unknown seat",
        };
        f.write_str(text)
    }
}

/// Per-seat result of a hold operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatOutcome {
    /// Seat this outcome refers to
    pub seat_id: SeatId,
    /// Whether the operation succeeded for this seat
    pub success: bool,
    /// Failure reason (absent on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Expiry of the caller's hold after the operation, if it holds the seat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Authoritative seat state after the operation (absent for unknown seats)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<SeatState>,
}

impl SeatOutcome {
    /// Successful outcome carrying the resulting seat state
    #[must_use]
    pub fn succeeded(current: SeatState) -> Self {
        Self {
            seat_id: current.seat_id.clone(),
            success: true,
            reason: None,
            expires_at: current.expires_at,
            current: Some(current),
        }
    }

    /// Failed outcome, with the seat state if the seat exists
    #[must_use]
    pub fn failed(seat_id: SeatId, reason: FailureReason, current: Option<SeatState>) -> Self {
        Self {
            seat_id,
            success: false,
            reason: Some(reason),
            expires_at: None,
            current,
        }
    }
}

/// Response of every hold operation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldResponse {
    /// One outcome per distinct requested seat, in request order
    pub outcomes: Vec<SeatOutcome>,
}

impl HoldResponse {
    /// Outcome for a given seat
    #[must_use]
    pub fn outcome(&self, seat_id: &SeatId) -> Option<&SeatOutcome> {
        self.outcomes.iter().find(|o| &o.seat_id == seat_id)
    }

    /// True when every seat succeeded
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    /// Seats that succeeded
    pub fn succeeded(&self) -> impl Iterator<Item = &SeatOutcome> {
        self.outcomes.iter().filter(|o| o.success)
    }

    /// Seats that failed
    pub fn failed(&self) -> impl Iterator<Item = &SeatOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

// ============================================================================
// Seat state on the wire
// ============================================================================

/// Coarse seat status on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireStatus {
    /// Free
    Available,
    /// Held by `holderId` until `expiresAt`
    Held,
    /// Sold to `holderId`
    Sold,
}

/// Authoritative state of one seat, stamped with its version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatState {
    /// Seat id
    pub seat_id: SeatId,
    /// Status
    pub status: WireStatus,
    /// Holder (held) or buyer (sold)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_id: Option<HolderId>,
    /// Hold expiry (held only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Per-showtime sequence value of the last mutation of this seat
    pub version: u64,
}

impl SeatState {
    /// Builds the wire form of a status
    #[must_use]
    pub fn new(seat_id: SeatId, status: SeatStatus, version: u64) -> Self {
        let (wire, holder_id, expires_at) = match status {
            SeatStatus::Available => (WireStatus::Available, None, None),
            SeatStatus::Held {
                holder_id,
                expires_at,
            } => (WireStatus::Held, Some(holder_id), Some(expires_at)),
            SeatStatus::Sold { holder_id } => (WireStatus::Sold, Some(holder_id), None),
        };
        Self {
            seat_id,
            status: wire,
            holder_id,
            expires_at,
            version,
        }
    }

    /// Converts back to the typed status
    ///
    /// Frames missing a holder or expiry for a held/sold seat are read as
    /// available: a claim that cannot be attributed is not trusted.
    #[must_use]
    pub fn status(&self) -> SeatStatus {
        match (self.status, self.holder_id, self.expires_at) {
            (WireStatus::Held, Some(holder_id), Some(expires_at)) => SeatStatus::Held {
                holder_id,
                expires_at,
            },
            (WireStatus::Sold, Some(holder_id), _) => SeatStatus::Sold { holder_id },
            _ => SeatStatus::Available,
        }
    }
}

/// Full registry state of one showtime: the poll payload and reconnect baseline
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Showtime
    pub showtime_id: ShowtimeId,
    /// Server time the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Highest version issued for the showtime at snapshot time
    pub sequence: u64,
    /// Seat catalog
    pub layout: Vec<Seat>,
    /// Current state of every seat
    pub seats: Vec<SeatState>,
}

impl Snapshot {
    /// State of one seat
    #[must_use]
    pub fn seat(&self, seat_id: &SeatId) -> Option<&SeatState> {
        self.seats.iter().find(|s| &s.seat_id == seat_id)
    }
}

// ============================================================================
// Change feed
// ============================================================================

/// What mutation produced a delta
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    /// A new hold was granted
    Acquired,
    /// An existing hold was extended
    Renewed,
    /// The holder released the seat
    Released,
    /// A hold lapsed
    Expired,
    /// A held seat was converted into a sale
    Sold,
}

/// One seat mutation, broadcast to every subscriber of the showtime
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatDelta {
    /// Showtime the seat belongs to
    pub showtime_id: ShowtimeId,
    /// Seat state after the mutation
    #[serde(flatten)]
    pub state: SeatState,
    /// Mutation kind
    pub cause: ChangeCause,
}

/// Frame sent over the change-feed websocket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// A seat changed
    Delta(SeatDelta),
    /// Keep-alive
    Ping,
    /// The server dropped `skipped` deltas for this subscriber
    Lagged {
        /// Number of dropped deltas
        skipped: u64,
    },
    /// Server-side error; the connection will close
    Error {
        /// Human-readable message
        message: String,
    },
}

/// Connection lifecycle and data events seen by a feed consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEvent {
    /// First successful subscription
    Connected,
    /// Subscription lost
    Disconnected {
        /// Why
        reason: String,
    },
    /// Subscription re-established after a loss
    Resubscribed,
    /// A seat delta
    Delta(SeatDelta),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn delta_frame_is_flat_camel_case() {
        let showtime = ShowtimeId::from_uuid(Uuid::nil());
        let holder = HolderId::from_uuid(Uuid::nil());
        let expires_at = DateTime::parse_from_rfc3339("2025-01-01T19:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let frame = FeedMessage::Delta(SeatDelta {
            showtime_id: showtime,
            state: SeatState::new(
                SeatId::new("A1"),
                SeatStatus::Held {
                    holder_id: holder,
                    expires_at,
                },
                7,
            ),
            cause: ChangeCause::Acquired,
        });

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "delta",
                "showtimeId": Uuid::nil(),
                "seatId": "A1",
                "status": "held",
                "holderId": Uuid::nil(),
                "expiresAt": "2025-01-01T19:15:00Z",
                "version": 7,
                "cause": "acquired",
            })
        );
    }

    #[test]
    fn outcome_omits_absent_fields() {
        let outcome = SeatOutcome::failed(SeatId::new("Z9"), FailureReason::UnknownSeat, None);
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(
            value,
            json!({"seatId": "Z9", "success": false, "reason": "unknown_seat"})
        );
    }

    #[test]
    fn unattributed_hold_reads_as_available() {
        let state = SeatState {
            seat_id: SeatId::new("A1"),
            status: WireStatus::Held,
            holder_id: None,
            expires_at: None,
            version: 3,
        };
        assert_eq!(state.status(), SeatStatus::Available);
    }

    #[test]
    fn control_frames_parse() {
        let lagged: FeedMessage = serde_json::from_str(r#"{"type":"lagged","skipped":4}"#).unwrap();
        assert_eq!(lagged, FeedMessage::Lagged { skipped: 4 });
        let ping: FeedMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, FeedMessage::Ping);
    }
}
