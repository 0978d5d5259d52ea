//! Lock manager: the only writer of seat status.
//!
//! Grants, renews, releases and sells seat holds. Every per-seat decision is
//! taken under that seat's mutex and the resulting delta is published to the
//! change feed before the mutex is released, so subscribers observe each
//! seat's mutations in order.
//!
//! Expiry is enforced lazily: any operation (including a snapshot) that finds
//! a hold past its `expires_at` first flips the seat to available and
//! announces it with cause `expired`. The [`ExpirySweeper`](crate::sweeper::ExpirySweeper)
//! calls [`LockManager::expire_due`] so abandoned holds are announced even
//! when nobody touches the seat.

use crate::error::LockError;
use crate::feed::ChangeFeed;
use crate::registry::{SeatRecord, SeatRegistry, ShowtimeSeats};
use chrono::{DateTime, Utc};
use seatlock_core::environment::Clock;
use seatlock_core::protocol::{
    ChangeCause, FailureReason, HoldRequest, HoldResponse, SeatDelta, SeatOutcome, SeatState,
    Snapshot,
};
use seatlock_core::types::{Hold, HolderId, Seat, SeatId, SeatStatus, ShowtimeId};
use seatlock_runtime::metrics::LockMetrics;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lock manager settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockConfig {
    /// Lifetime of a hold from acquisition or last renewal
    pub hold_ttl: Duration,
    /// Largest number of distinct seats one request may name
    pub max_seats_per_request: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(15 * 60),
            max_seats_per_request: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Acquire,
    Renew,
    Release,
    Confirm,
}

impl Operation {
    const fn name(self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Renew => "renew",
            Self::Release => "release",
            Self::Confirm => "confirm",
        }
    }
}

const fn reason_label(reason: FailureReason) -> &'static str {
    match reason {
        FailureReason::HeldByOther => "held_by_other",
        FailureReason::Sold => "sold",
        FailureReason::NotHeld => "not_held",
        FailureReason::Expired => "expired",
        FailureReason::UnknownSeat => "unknown_seat",
    }
}

fn current(seat_id: &SeatId, record: &SeatRecord) -> SeatState {
    SeatState::new(seat_id.clone(), record.status, record.version)
}

/// Sole writer of seat status
pub struct LockManager {
    registry: SeatRegistry,
    feed: Arc<ChangeFeed>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config)
            .field("showtimes", &self.registry.ids().len())
            .finish_non_exhaustive()
    }
}

impl LockManager {
    /// Creates a lock manager publishing to `feed`
    #[must_use]
    pub fn new(config: LockConfig, clock: Arc<dyn Clock>, feed: Arc<ChangeFeed>) -> Self {
        Self {
            registry: SeatRegistry::new(),
            feed,
            clock,
            config,
        }
    }

    /// Settings
    #[must_use]
    pub const fn config(&self) -> &LockConfig {
        &self.config
    }

    /// The change feed this manager publishes to
    #[must_use]
    pub const fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Current time according to the injected clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.hold_ttl).unwrap_or(chrono::Duration::MAX)
    }

    // ------------------------------------------------------------------
    // Showtime lifecycle
    // ------------------------------------------------------------------

    /// Creates a showtime's seats (all available) and opens its feed
    ///
    /// # Errors
    ///
    /// [`LockError::ShowtimeExists`] or [`LockError::DuplicateSeat`].
    pub fn schedule_showtime(&self, showtime_id: ShowtimeId, layout: Vec<Seat>) -> Result<usize, LockError> {
        let seats = self.registry.insert(showtime_id, layout)?;
        self.feed.open(showtime_id);
        tracing::info!(showtime = %showtime_id, seats = seats.len(), "Showtime scheduled");
        Ok(seats.len())
    }

    /// Drops a showtime's seats and closes its feed
    ///
    /// # Errors
    ///
    /// [`LockError::UnknownShowtime`].
    pub fn retire_showtime(&self, showtime_id: ShowtimeId) -> Result<(), LockError> {
        self.registry.remove(showtime_id)?;
        self.feed.close(showtime_id);
        tracing::info!(showtime = %showtime_id, "Showtime retired");
        Ok(())
    }

    /// Scheduled showtimes
    #[must_use]
    pub fn showtimes(&self) -> Vec<ShowtimeId> {
        self.registry.ids()
    }

    // ------------------------------------------------------------------
    // Hold operations
    // ------------------------------------------------------------------

    /// Grants holds on available seats
    ///
    /// A seat already held by the caller is renewed. Each seat succeeds or
    /// fails independently.
    ///
    /// # Errors
    ///
    /// Rejects the whole request for an unknown showtime, an empty seat list,
    /// or more distinct seats than `max_seats_per_request`.
    pub fn acquire(&self, request: &HoldRequest) -> Result<HoldResponse, LockError> {
        self.apply(request, Operation::Acquire)
    }

    /// Extends holds owned by the caller to `now + TTL`
    ///
    /// # Errors
    ///
    /// Same request-level validation as [`LockManager::acquire`].
    pub fn renew(&self, request: &HoldRequest) -> Result<HoldResponse, LockError> {
        self.apply(request, Operation::Renew)
    }

    /// Releases holds owned by the caller
    ///
    /// Releasing a seat that is available (or whose hold lapsed) succeeds
    /// without effect. Another holder's hold is never touched.
    ///
    /// # Errors
    ///
    /// Same request-level validation as [`LockManager::acquire`].
    pub fn release(&self, request: &HoldRequest) -> Result<HoldResponse, LockError> {
        self.apply(request, Operation::Release)
    }

    /// Converts the caller's live holds into sales
    ///
    /// # Errors
    ///
    /// Same request-level validation as [`LockManager::acquire`].
    pub fn confirm(&self, request: &HoldRequest) -> Result<HoldResponse, LockError> {
        self.apply(request, Operation::Confirm)
    }

    /// Full state of a showtime, with lapsed holds expired first
    ///
    /// # Errors
    ///
    /// [`LockError::UnknownShowtime`].
    pub fn snapshot(&self, showtime_id: ShowtimeId) -> Result<Snapshot, LockError> {
        let showtime = self.registry.get(showtime_id)?;
        let now = self.clock.now();

        let seats = showtime
            .slots()
            .map(|slot| {
                let seat_id = &slot.seat().id;
                let mut record = slot.lock();
                self.expire_if_due(&showtime, seat_id, &mut record, now);
                current(seat_id, &record)
            })
            .collect();

        Ok(Snapshot {
            showtime_id,
            taken_at: now,
            sequence: showtime.sequence(),
            layout: showtime.layout(),
            seats,
        })
    }

    /// The live hold on a seat, if any
    ///
    /// # Errors
    ///
    /// [`LockError::UnknownShowtime`].
    pub fn hold(&self, showtime_id: ShowtimeId, seat_id: &SeatId) -> Result<Option<Hold>, LockError> {
        let showtime = self.registry.get(showtime_id)?;
        let now = self.clock.now();
        let hold = showtime.slot(seat_id).and_then(|slot| {
            let record = slot.lock();
            match (record.status.effective(now), record.held_since) {
                (
                    SeatStatus::Held {
                        holder_id,
                        expires_at,
                    },
                    Some(created_at),
                ) => Some(Hold {
                    seat_id: seat_id.clone(),
                    holder_id,
                    created_at,
                    expires_at,
                }),
                _ => None,
            }
        });
        Ok(hold)
    }

    /// Expires every lapsed hold of a showtime, returning how many lapsed
    ///
    /// # Errors
    ///
    /// [`LockError::UnknownShowtime`].
    pub fn expire_due(&self, showtime_id: ShowtimeId) -> Result<usize, LockError> {
        let showtime = self.registry.get(showtime_id)?;
        let now = self.clock.now();
        let expired = showtime
            .slots()
            .filter(|slot| {
                let mut record = slot.lock();
                self.expire_if_due(&showtime, &slot.seat().id, &mut record, now)
            })
            .count();
        Ok(expired)
    }

    /// Expires lapsed holds across every scheduled showtime
    pub fn expire_all_due(&self) -> usize {
        self.registry
            .ids()
            .into_iter()
            // A showtime retired mid-sweep has nothing left to expire.
            .filter_map(|id| self.expire_due(id).ok())
            .sum()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn distinct_seats(&self, request: &HoldRequest) -> Result<Vec<SeatId>, LockError> {
        let mut seen = HashSet::with_capacity(request.seat_ids.len());
        let seat_ids: Vec<SeatId> = request
            .seat_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();

        if seat_ids.is_empty() {
            return Err(LockError::EmptyRequest);
        }
        if seat_ids.len() > self.config.max_seats_per_request {
            return Err(LockError::TooManySeats {
                requested: seat_ids.len(),
                max: self.config.max_seats_per_request,
            });
        }
        Ok(seat_ids)
    }

    #[tracing::instrument(
        skip(self, request),
        fields(showtime = %request.showtime_id, holder = %request.holder_id, op = op.name())
    )]
    fn apply(&self, request: &HoldRequest, op: Operation) -> Result<HoldResponse, LockError> {
        let started = Instant::now();
        let seat_ids = self.distinct_seats(request)?;
        let showtime = self.registry.get(request.showtime_id)?;
        let holder = request.holder_id;
        let now = self.clock.now();

        let outcomes: Vec<SeatOutcome> = seat_ids
            .into_iter()
            .map(|seat_id| {
                let outcome = match showtime.slot(&seat_id) {
                    None => SeatOutcome::failed(seat_id, FailureReason::UnknownSeat, None),
                    Some(slot) => {
                        let mut record = slot.lock();
                        self.expire_if_due(&showtime, &seat_id, &mut record, now);
                        match op {
                            Operation::Acquire => {
                                self.acquire_seat(&showtime, &seat_id, &mut record, holder, now)
                            },
                            Operation::Renew => {
                                self.renew_seat(&showtime, &seat_id, &mut record, holder, now)
                            },
                            Operation::Release => {
                                self.release_seat(&showtime, &seat_id, &mut record, holder)
                            },
                            Operation::Confirm => {
                                self.confirm_seat(&showtime, &seat_id, &mut record, holder)
                            },
                        }
                    },
                };
                if let Some(reason) = outcome.reason {
                    LockMetrics::record_conflict(reason_label(reason));
                }
                outcome
            })
            .collect();

        LockMetrics::record_request(op.name(), started.elapsed());
        tracing::debug!(
            succeeded = outcomes.iter().filter(|o| o.success).count(),
            failed = outcomes.iter().filter(|o| !o.success).count(),
            "Hold request served"
        );
        Ok(HoldResponse { outcomes })
    }

    /// Writes `status`, stamps a version and publishes the delta
    fn commit(
        &self,
        showtime: &ShowtimeSeats,
        seat_id: &SeatId,
        record: &mut SeatRecord,
        status: SeatStatus,
        cause: ChangeCause,
    ) -> SeatState {
        let state = showtime.write(seat_id, record, status);
        self.feed.publish(SeatDelta {
            showtime_id: showtime.id(),
            state: state.clone(),
            cause,
        });
        state
    }

    fn expire_if_due(
        &self,
        showtime: &ShowtimeSeats,
        seat_id: &SeatId,
        record: &mut SeatRecord,
        now: DateTime<Utc>,
    ) -> bool {
        let SeatStatus::Held {
            holder_id,
            expires_at,
        } = record.status
        else {
            return false;
        };
        if now < expires_at {
            return false;
        }

        record.lapsed_holder = Some(holder_id);
        record.held_since = None;
        self.commit(showtime, seat_id, record, SeatStatus::Available, ChangeCause::Expired);
        LockMetrics::record_expired();
        tracing::debug!(seat = %seat_id, holder = %holder_id, "Hold expired");
        true
    }

    fn hold_until(&self, holder_id: HolderId, now: DateTime<Utc>) -> SeatStatus {
        SeatStatus::Held {
            holder_id,
            expires_at: now + self.ttl(),
        }
    }

    fn acquire_seat(
        &self,
        showtime: &ShowtimeSeats,
        seat_id: &SeatId,
        record: &mut SeatRecord,
        holder: HolderId,
        now: DateTime<Utc>,
    ) -> SeatOutcome {
        match record.status {
            SeatStatus::Available => {
                record.held_since = Some(now);
                record.lapsed_holder = None;
                let status = self.hold_until(holder, now);
                let state = self.commit(showtime, seat_id, record, status, ChangeCause::Acquired);
                LockMetrics::record_acquired();
                SeatOutcome::succeeded(state)
            },
            SeatStatus::Held { holder_id, .. } if holder_id == holder => {
                let status = self.hold_until(holder, now);
                let state = self.commit(showtime, seat_id, record, status, ChangeCause::Renewed);
                LockMetrics::record_renewed();
                SeatOutcome::succeeded(state)
            },
            SeatStatus::Held { .. } => {
                SeatOutcome::failed(seat_id.clone(), FailureReason::HeldByOther, Some(current(seat_id, record)))
            },
            SeatStatus::Sold { .. } => {
                SeatOutcome::failed(seat_id.clone(), FailureReason::Sold, Some(current(seat_id, record)))
            },
        }
    }

    fn renew_seat(
        &self,
        showtime: &ShowtimeSeats,
        seat_id: &SeatId,
        record: &mut SeatRecord,
        holder: HolderId,
        now: DateTime<Utc>,
    ) -> SeatOutcome {
        let reason = match record.status {
            SeatStatus::Held { holder_id, .. } if holder_id == holder => {
                let status = self.hold_until(holder, now);
                let state = self.commit(showtime, seat_id, record, status, ChangeCause::Renewed);
                LockMetrics::record_renewed();
                return SeatOutcome::succeeded(state);
            },
            SeatStatus::Held { .. } => FailureReason::HeldByOther,
            SeatStatus::Sold { .. } => FailureReason::Sold,
            SeatStatus::Available if record.lapsed_holder == Some(holder) => FailureReason::Expired,
            SeatStatus::Available => FailureReason::NotHeld,
        };
        SeatOutcome::failed(seat_id.clone(), reason, Some(current(seat_id, record)))
    }

    fn release_seat(
        &self,
        showtime: &ShowtimeSeats,
        seat_id: &SeatId,
        record: &mut SeatRecord,
        holder: HolderId,
    ) -> SeatOutcome {
        match record.status {
            SeatStatus::Held { holder_id, .. } if holder_id == holder => {
                record.held_since = None;
                let state = self.commit(showtime, seat_id, record, SeatStatus::Available, ChangeCause::Released);
                LockMetrics::record_released();
                SeatOutcome::succeeded(state)
            },
            SeatStatus::Available => SeatOutcome::succeeded(current(seat_id, record)),
            SeatStatus::Held { .. } => {
                SeatOutcome::failed(seat_id.clone(), FailureReason::HeldByOther, Some(current(seat_id, record)))
            },
            SeatStatus::Sold { .. } => {
                SeatOutcome::failed(seat_id.clone(), FailureReason::Sold, Some(current(seat_id, record)))
            },
        }
    }

    fn confirm_seat(
        &self,
        showtime: &ShowtimeSeats,
        seat_id: &SeatId,
        record: &mut SeatRecord,
        holder: HolderId,
    ) -> SeatOutcome {
        let reason = match record.status {
            SeatStatus::Held { holder_id, .. } if holder_id == holder => {
                record.held_since = None;
                let status = SeatStatus::Sold { holder_id: holder };
                let state = self.commit(showtime, seat_id, record, status, ChangeCause::Sold);
                LockMetrics::record_sold();
                tracing::info!(seat = %seat_id, holder = %holder, "Seat sold");
                return SeatOutcome::succeeded(state);
            },
            SeatStatus::Sold { holder_id } if holder_id == holder => {
                return SeatOutcome::succeeded(current(seat_id, record));
            },
            SeatStatus::Held { .. } => FailureReason::HeldByOther,
            SeatStatus::Sold { .. } => FailureReason::Sold,
            SeatStatus::Available if record.lapsed_holder == Some(holder) => FailureReason::Expired,
            SeatStatus::Available => FailureReason::NotHeld,
        };
        SeatOutcome::failed(seat_id.clone(), reason, Some(current(seat_id, record)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::layout::grid;
    use seatlock_core::protocol::WireStatus;
    use seatlock_testing::ManualClock;

    struct Fixture {
        manager: LockManager,
        clock: ManualClock,
        showtime: ShowtimeId,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::default();
        let manager = LockManager::new(
            LockConfig::default(),
            Arc::new(clock.clone()),
            Arc::new(ChangeFeed::new(64)),
        );
        let showtime = ShowtimeId::new();
        manager.schedule_showtime(showtime, grid(&["A", "B"], 4)).unwrap();
        Fixture {
            manager,
            clock,
            showtime,
        }
    }

    fn request(f: &Fixture, holder: HolderId, seats: &[&str]) -> HoldRequest {
        HoldRequest::new(f.showtime, seats.iter().map(|s| SeatId::new(*s)).collect(), holder)
    }

    fn ttl() -> chrono::Duration {
        chrono::Duration::minutes(15)
    }

    #[test]
    fn acquire_grants_hold_with_ttl() {
        let f = fixture();
        let alice = HolderId::new();

        let response = f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();

        let outcome = response.outcome(&SeatId::new("A1")).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.expires_at, Some(f.clock.now() + ttl()));
        let current = outcome.current.clone().unwrap();
        assert_eq!(current.status, WireStatus::Held);
        assert_eq!(current.holder_id, Some(alice));
    }

    #[test]
    fn contention_reports_held_by_other() {
        let f = fixture();
        let alice = HolderId::new();
        let bob = HolderId::new();
        f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();

        let response = f.manager.acquire(&request(&f, bob, &["A1", "A2"])).unwrap();

        let a1 = response.outcome(&SeatId::new("A1")).unwrap();
        assert!(!a1.success);
        assert_eq!(a1.reason, Some(FailureReason::HeldByOther));
        assert_eq!(a1.current.as_ref().unwrap().holder_id, Some(alice));
        assert!(response.outcome(&SeatId::new("A2")).unwrap().success);
    }

    #[test]
    fn reacquire_by_same_holder_renews() {
        let f = fixture();
        let alice = HolderId::new();
        f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();
        f.clock.advance(chrono::Duration::minutes(5));

        let response = f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();

        assert!(response.all_succeeded());
        assert_eq!(response.outcomes[0].expires_at, Some(f.clock.now() + ttl()));
    }

    #[test]
    fn unknown_seat_fails_alone() {
        let f = fixture();
        let response = f.manager.acquire(&request(&f, HolderId::new(), &["Z9", "B1"])).unwrap();

        let z9 = response.outcome(&SeatId::new("Z9")).unwrap();
        assert_eq!(z9.reason, Some(FailureReason::UnknownSeat));
        assert!(z9.current.is_none());
        assert!(response.outcome(&SeatId::new("B1")).unwrap().success);
    }

    #[test]
    fn request_validation() {
        let f = fixture();
        let holder = HolderId::new();

        assert_eq!(f.manager.acquire(&request(&f, holder, &[])), Err(LockError::EmptyRequest));

        let eleven: Vec<String> = (1..=11).map(|n| format!("X{n}")).collect();
        let names: Vec<&str> = eleven.iter().map(String::as_str).collect();
        assert_eq!(
            f.manager.acquire(&request(&f, holder, &names)),
            Err(LockError::TooManySeats { requested: 11, max: 10 })
        );

        let unknown = HoldRequest::new(ShowtimeId::new(), vec![SeatId::new("A1")], holder);
        assert!(matches!(f.manager.acquire(&unknown), Err(LockError::UnknownShowtime(_))));
    }

    #[test]
    fn repeated_seat_ids_are_collapsed() {
        let f = fixture();
        let response = f.manager.acquire(&request(&f, HolderId::new(), &["A1", "A1", "A1"])).unwrap();
        assert_eq!(response.outcomes.len(), 1);
        assert!(response.all_succeeded());
    }

    #[test]
    fn renew_extends_and_keeps_holder_and_created_at() {
        let f = fixture();
        let alice = HolderId::new();
        f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();
        let before = f.manager.hold(f.showtime, &SeatId::new("A1")).unwrap().unwrap();

        f.clock.advance(chrono::Duration::minutes(10));
        let response = f.manager.renew(&request(&f, alice, &["A1"])).unwrap();
        assert!(response.all_succeeded());

        let after = f.manager.hold(f.showtime, &SeatId::new("A1")).unwrap().unwrap();
        assert_eq!(after.holder_id, alice);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.expires_at > before.expires_at);
        assert_eq!(after.expires_at, f.clock.now() + ttl());
    }

    #[test]
    fn expired_hold_is_not_renewable() {
        let f = fixture();
        let alice = HolderId::new();
        f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();

        f.clock.advance(ttl());
        let response = f.manager.renew(&request(&f, alice, &["A1"])).unwrap();

        assert_eq!(response.outcomes[0].reason, Some(FailureReason::Expired));
        assert_eq!(response.outcomes[0].current.as_ref().unwrap().status, WireStatus::Available);

        // Re-acquiring is the only way back
        assert!(f.manager.acquire(&request(&f, alice, &["A1"])).unwrap().all_succeeded());
    }

    #[test]
    fn renew_after_reassignment_reports_held_by_other() {
        let f = fixture();
        let alice = HolderId::new();
        let bob = HolderId::new();
        f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();
        f.clock.advance(ttl() + chrono::Duration::seconds(1));
        assert!(f.manager.acquire(&request(&f, bob, &["A1"])).unwrap().all_succeeded());

        let response = f.manager.renew(&request(&f, alice, &["A1"])).unwrap();
        assert_eq!(response.outcomes[0].reason, Some(FailureReason::HeldByOther));
    }

    #[test]
    fn renew_of_never_held_seat_is_not_held() {
        let f = fixture();
        let response = f.manager.renew(&request(&f, HolderId::new(), &["A1"])).unwrap();
        assert_eq!(response.outcomes[0].reason, Some(FailureReason::NotHeld));
    }

    #[test]
    fn release_then_other_acquires() {
        let f = fixture();
        let alice = HolderId::new();
        let bob = HolderId::new();
        f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();

        assert!(f.manager.release(&request(&f, alice, &["A1"])).unwrap().all_succeeded());
        assert!(f.manager.acquire(&request(&f, bob, &["A1"])).unwrap().all_succeeded());
    }

    #[test]
    fn release_is_idempotent_and_never_touches_other_holds() {
        let f = fixture();
        let alice = HolderId::new();
        let bob = HolderId::new();

        assert!(f.manager.release(&request(&f, alice, &["A1"])).unwrap().all_succeeded());

        f.manager.acquire(&request(&f, bob, &["A1"])).unwrap();
        let response = f.manager.release(&request(&f, alice, &["A1"])).unwrap();
        assert_eq!(response.outcomes[0].reason, Some(FailureReason::HeldByOther));
        assert_eq!(f.manager.hold(f.showtime, &SeatId::new("A1")).unwrap().unwrap().holder_id, bob);
    }

    #[test]
    fn confirm_requires_live_hold() {
        let f = fixture();
        let alice = HolderId::new();

        let direct = f.manager.confirm(&request(&f, alice, &["A1"])).unwrap();
        assert_eq!(direct.outcomes[0].reason, Some(FailureReason::NotHeld));

        f.manager.acquire(&request(&f, alice, &["A1"])).unwrap();
        let sold = f.manager.confirm(&request(&f, alice, &["A1"])).unwrap();
        assert!(sold.all_succeeded());
        assert_eq!(sold.outcomes[0].current.as_ref().unwrap().status, WireStatus::Sold);

        let again = f.manager.acquire(&request(&f, HolderId::new(), &["A1"])).unwrap();
        assert_eq!(again.outcomes[0].reason, Some(FailureReason::Sold));
    }

    #[test]
    fn snapshot_expires_lapsed_holds_and_publishes() {
        let f = fixture();
        let alice = HolderId::new();
        let mut rx = f.manager.feed().subscribe(f.showtime).unwrap();
        f.manager.acquire(&request(&f, alice, &["B3"])).unwrap();

        f.clock.advance(ttl());
        let snapshot = f.manager.snapshot(f.showtime).unwrap();

        assert_eq!(snapshot.seat(&SeatId::new("B3")).unwrap().status, WireStatus::Available);
        assert_eq!(snapshot.layout.len(), 8);
        assert_eq!(snapshot.sequence, 2);

        let acquired = rx.try_recv().unwrap();
        assert_eq!(acquired.cause, ChangeCause::Acquired);
        let expired = rx.try_recv().unwrap();
        assert_eq!(expired.cause, ChangeCause::Expired);
        assert_eq!(expired.state.version, 2);
    }

    #[test]
    fn expire_due_counts_lapsed_holds() {
        let f = fixture();
        f.manager.acquire(&request(&f, HolderId::new(), &["A1", "A2"])).unwrap();
        f.clock.advance(chrono::Duration::minutes(5));
        f.manager.acquire(&request(&f, HolderId::new(), &["A3"])).unwrap();

        f.clock.advance(chrono::Duration::minutes(10));
        assert_eq!(f.manager.expire_due(f.showtime).unwrap(), 2);
        assert_eq!(f.manager.expire_all_due(), 0);
    }

    #[test]
    fn retire_closes_feed() {
        let f = fixture();
        assert!(f.manager.feed().subscribe(f.showtime).is_some());
        f.manager.retire_showtime(f.showtime).unwrap();
        assert!(f.manager.feed().subscribe(f.showtime).is_none());
        assert!(f.manager.showtimes().is_empty());
    }
}
