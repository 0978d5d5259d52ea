//! Engine state: the authoritative mirror plus local intent.
//!
//! The mirror only ever moves forward (merges are keyed on the per-seat
//! version). Optimistic intent lives in a separate overlay so a rollback is a
//! removal, never a reconstruction.

use chrono::{DateTime, Utc};
use seatlock_core::protocol::{SeatDelta, SeatState};
use seatlock_core::types::{HolderId, Seat, SeatId, SeatStatus, ShowtimeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use crate::notifications::ConflictNotice;

/// Deltas kept while a resync is in flight; older ones are dropped first
pub const MAX_BUFFERED_DELTAS: usize = 1024;

/// Recent notices retained for late readers
pub const MAX_RECENT_NOTICES: usize = 64;

/// What the user sees for one seat
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeatPhase {
    /// Free to select
    Available,
    /// Selection sent, waiting for the server
    Locking,
    /// In the user's cart
    SelfHeld,
    /// Deselection sent, waiting for the server
    Releasing,
    /// Held by someone else
    OtherHeld,
    /// Sold
    Sold,
}

/// Local intent layered over the mirror
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overlay {
    /// Acquire in flight
    Locking {
        /// The user deselected while the acquire was in flight
        abandoned: bool,
        /// Select call waiting on this acquire
        ticket: u64,
    },
    /// Release in flight
    Releasing,
    /// Our hold timed out locally; the next authoritative data decides
    Lapsed,
}

/// Change-feed connectivity as seen by the engine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FeedState {
    /// Never connected yet
    #[default]
    Connecting,
    /// Subscribed and receiving deltas
    Live,
    /// Lost; polling at the fallback rate
    Disconnected,
}

/// Everything the reducer owns for one showtime session
#[derive(Clone, Debug)]
pub struct EngineState {
    /// Showtime being viewed
    pub showtime_id: ShowtimeId,
    /// This session's identity
    pub holder_id: HolderId,
    /// Seat catalog, filled from the first snapshot
    pub layout: BTreeMap<SeatId, Seat>,
    /// Last authoritative state per seat
    pub mirror: BTreeMap<SeatId, SeatState>,
    /// Local intent per seat
    pub overlay: BTreeMap<SeatId, Overlay>,
    /// Seats we hold, with the expiry our timers track
    pub cart: BTreeMap<SeatId, DateTime<Utc>>,
    /// Seats the user gave up that the server may still show as ours
    pub dismissed: BTreeSet<SeatId>,
    /// Seats selected again while their release is in flight, with the
    /// waiting select ticket; the acquire goes out once the release lands
    pub reselect: BTreeMap<SeatId, u64>,
    /// Feed connectivity
    pub feed: FeedState,
    /// A snapshot is pending; deltas are buffered until it lands
    pub syncing: bool,
    /// Deltas received while syncing
    pub buffered: Vec<SeatDelta>,
    /// Server time of the last applied snapshot
    pub last_snapshot: Option<DateTime<Utc>>,
    /// Keep holds alive with renewals
    pub renew_holds: bool,
    /// Last notice time per seat, for duplicate suppression
    pub last_notice: HashMap<SeatId, DateTime<Utc>>,
    /// Most recent notices, oldest first
    pub notices: VecDeque<ConflictNotice>,
}

impl EngineState {
    /// Fresh state for a session
    #[must_use]
    pub fn new(showtime_id: ShowtimeId, holder_id: HolderId, renew_holds: bool) -> Self {
        Self {
            showtime_id,
            holder_id,
            layout: BTreeMap::new(),
            mirror: BTreeMap::new(),
            overlay: BTreeMap::new(),
            cart: BTreeMap::new(),
            dismissed: BTreeSet::new(),
            reselect: BTreeMap::new(),
            feed: FeedState::Connecting,
            syncing: true,
            buffered: Vec::new(),
            last_snapshot: None,
            renew_holds,
            last_notice: HashMap::new(),
            notices: VecDeque::new(),
        }
    }

    /// Applies an authoritative seat state if it is newer than what we have
    ///
    /// Returns `true` if the mirror changed.
    pub fn merge(&mut self, state: SeatState) -> bool {
        match self.mirror.get(&state.seat_id) {
            Some(known) if known.version >= state.version => false,
            _ => {
                self.mirror.insert(state.seat_id.clone(), state);
                true
            },
        }
    }

    /// Keeps a delta for after the pending snapshot
    pub fn buffer(&mut self, delta: SeatDelta) {
        if self.buffered.len() >= MAX_BUFFERED_DELTAS {
            self.buffered.remove(0);
        }
        self.buffered.push(delta);
    }

    /// Whether the seat is part of the catalog (unknown until the first snapshot)
    #[must_use]
    pub fn knows_seat(&self, seat_id: &SeatId) -> bool {
        self.layout.is_empty() || self.layout.contains_key(seat_id)
    }

    /// Mirror status with lapsed holds treated as available
    #[must_use]
    pub fn authoritative(&self, seat_id: &SeatId, now: DateTime<Utc>) -> SeatStatus {
        self.mirror
            .get(seat_id)
            .map_or(SeatStatus::Available, |s| s.status().effective(now))
    }

    /// Expiry of our live hold on the seat according to the mirror
    #[must_use]
    pub fn own_hold(&self, seat_id: &SeatId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.authoritative(seat_id, now) {
            SeatStatus::Held {
                holder_id,
                expires_at,
            } if holder_id == self.holder_id => Some(expires_at),
            _ => None,
        }
    }

    /// Composite phase: overlay first, then the mirror
    #[must_use]
    pub fn phase(&self, seat_id: &SeatId, now: DateTime<Utc>) -> SeatPhase {
        if self.reselect.contains_key(seat_id) {
            return SeatPhase::Locking;
        }
        match self.overlay.get(seat_id) {
            Some(Overlay::Locking {
                abandoned: false, ..
            }) => return SeatPhase::Locking,
            Some(Overlay::Locking { abandoned: true, .. } | Overlay::Releasing) => {
                return SeatPhase::Releasing;
            },
            Some(Overlay::Lapsed) => return SeatPhase::Available,
            None => {},
        }

        match self.authoritative(seat_id, now) {
            SeatStatus::Available => SeatPhase::Available,
            SeatStatus::Held { holder_id, .. } if holder_id == self.holder_id => {
                if self.dismissed.contains(seat_id) {
                    SeatPhase::Available
                } else {
                    SeatPhase::SelfHeld
                }
            },
            SeatStatus::Held { .. } => SeatPhase::OtherHeld,
            SeatStatus::Sold { .. } => SeatPhase::Sold,
        }
    }

    /// Time left on a cart hold
    #[must_use]
    pub fn countdown(&self, seat_id: &SeatId, now: DateTime<Utc>) -> Option<Duration> {
        self.cart
            .get(seat_id)
            .map(|expires_at| remaining(*expires_at, now))
    }

    /// Records a notice unless one was raised for the seat within `window`
    ///
    /// Returns `true` if the notice should be delivered.
    pub fn record_notice(&mut self, notice: &ConflictNotice, window: Duration) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(1));
        let duplicate = self
            .last_notice
            .get(&notice.seat_id)
            .is_some_and(|last| notice.raised_at - *last < window);
        if duplicate {
            return false;
        }
        self.last_notice
            .insert(notice.seat_id.clone(), notice.raised_at);
        if self.notices.len() >= MAX_RECENT_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice.clone());
        true
    }

    /// Seats whose status the engine has an opinion about
    #[must_use]
    pub fn tracked_seats(&self, now: DateTime<Utc>) -> BTreeSet<SeatId> {
        let mut seats: BTreeSet<SeatId> = self.cart.keys().cloned().collect();
        seats.extend(self.overlay.keys().cloned());
        seats.extend(self.dismissed.iter().cloned());
        seats.extend(
            self.mirror
                .keys()
                .filter(|seat_id| self.own_hold(seat_id, now).is_some())
                .cloned(),
        );
        seats
    }
}

/// Non-negative time until `deadline`
#[must_use]
pub fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::notifications::NoticeKind;
    use seatlock_core::protocol::WireStatus;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T19:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap()
    }

    fn held(seat: &str, holder: HolderId, version: u64) -> SeatState {
        SeatState::new(
            SeatId::new(seat),
            SeatStatus::Held {
                holder_id: holder,
                expires_at: now() + chrono::Duration::minutes(10),
            },
            version,
        )
    }

    #[test]
    fn merge_ignores_older_versions() {
        let me = HolderId::new();
        let mut state = EngineState::new(ShowtimeId::new(), me, true);

        assert!(state.merge(held("A1", me, 5)));
        assert!(!state.merge(SeatState::new(SeatId::new("A1"), SeatStatus::Available, 4)));
        assert!(!state.merge(SeatState::new(SeatId::new("A1"), SeatStatus::Available, 5)));
        assert_eq!(state.mirror[&SeatId::new("A1")].status, WireStatus::Held);

        assert!(state.merge(SeatState::new(SeatId::new("A1"), SeatStatus::Available, 6)));
        assert_eq!(state.phase(&SeatId::new("A1"), now()), SeatPhase::Available);
    }

    #[test]
    fn overlay_wins_over_mirror() {
        let me = HolderId::new();
        let other = HolderId::new();
        let seat = SeatId::new("A1");
        let mut state = EngineState::new(ShowtimeId::new(), me, true);
        state.merge(held("A1", other, 1));

        assert_eq!(state.phase(&seat, now()), SeatPhase::OtherHeld);

        state.overlay.insert(
            seat.clone(),
            Overlay::Locking {
                abandoned: false,
                ticket: 1,
            },
        );
        assert_eq!(state.phase(&seat, now()), SeatPhase::Locking);

        state.overlay.insert(seat.clone(), Overlay::Releasing);
        assert_eq!(state.phase(&seat, now()), SeatPhase::Releasing);

        state.overlay.insert(seat.clone(), Overlay::Lapsed);
        assert_eq!(state.phase(&seat, now()), SeatPhase::Available);
    }

    #[test]
    fn lapsed_mirror_hold_reads_available() {
        let me = HolderId::new();
        let seat = SeatId::new("A1");
        let mut state = EngineState::new(ShowtimeId::new(), me, true);
        state.merge(held("A1", me, 1));

        assert_eq!(state.phase(&seat, now()), SeatPhase::SelfHeld);
        let later = now() + chrono::Duration::minutes(10);
        assert_eq!(state.phase(&seat, later), SeatPhase::Available);
        assert_eq!(state.own_hold(&seat, later), None);
    }

    #[test]
    fn notices_are_deduplicated_per_seat() {
        let mut state = EngineState::new(ShowtimeId::new(), HolderId::new(), true);
        let window = Duration::from_secs(10);
        let first = ConflictNotice::new(SeatId::new("B3"), NoticeKind::SeatTaken, now());
        let again = ConflictNotice::new(
            SeatId::new("B3"),
            NoticeKind::HoldExpired,
            now() + chrono::Duration::seconds(3),
        );
        let other_seat = ConflictNotice::new(SeatId::new("B4"), NoticeKind::SeatTaken, now());
        let later = ConflictNotice::new(
            SeatId::new("B3"),
            NoticeKind::SeatTaken,
            now() + chrono::Duration::seconds(11),
        );

        assert!(state.record_notice(&first, window));
        assert!(!state.record_notice(&again, window));
        assert!(state.record_notice(&other_seat, window));
        assert!(state.record_notice(&later, window));
        assert_eq!(state.notices.len(), 3);
    }

    #[test]
    fn buffer_is_bounded() {
        let mut state = EngineState::new(ShowtimeId::new(), HolderId::new(), true);
        for version in 0..(MAX_BUFFERED_DELTAS as u64 + 10) {
            state.buffer(SeatDelta {
                showtime_id: state.showtime_id,
                state: SeatState::new(SeatId::new("A1"), SeatStatus::Available, version),
                cause: seatlock_core::protocol::ChangeCause::Released,
            });
        }
        assert_eq!(state.buffered.len(), MAX_BUFFERED_DELTAS);
        assert_eq!(state.buffered[0].state.version, 10);
    }

    #[test]
    fn countdown_saturates_at_zero() {
        let mut state = EngineState::new(ShowtimeId::new(), HolderId::new(), true);
        let seat = SeatId::new("A1");
        state.cart.insert(seat.clone(), now());
        assert_eq!(
            state.countdown(&seat, now() - chrono::Duration::seconds(5)),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            state.countdown(&seat, now() + chrono::Duration::seconds(5)),
            Some(Duration::ZERO)
        );
    }
}
