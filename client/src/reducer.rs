//! Reconciliation reducer.
//!
//! Every input (user commands, feed frames, request results, timers) is an
//! [`EngineAction`]. The reducer folds it into [`EngineState`] and returns the
//! requests and timers to run next. All I/O happens in effect futures.
//!
//! # Timers
//!
//! Each cart seat owns two keyed timers, `renew:{seat}` and `expiry:{seat}`.
//! Re-arming a timer replaces the pending one; dropping a seat cancels both.
//! A single `poll` timer drives the snapshot backstop and a single `resync`
//! key guards the snapshot request itself.

use chrono::{DateTime, Utc};
use seatlock_core::effect::{Effect, EffectId};
use seatlock_core::environment::Clock;
use seatlock_core::protocol::{FailureReason, FeedEvent, HoldRequest, SeatDelta, SeatOutcome, Snapshot};
use seatlock_core::reducer::Reducer;
use seatlock_core::types::{SeatId, SeatStatus};
use seatlock_core::{SmallVec, TransportError};
use seatlock_runtime::metrics::ClientMetrics;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::notifications::{ConflictNotice, NoticeKind, Notifier};
use crate::state::{EngineState, FeedState, Overlay, remaining};
use crate::transport::{LockService, call_with_retry, outcome_for};

type Effects = SmallVec<[Effect<EngineAction>; 4]>;

/// Renewals that fail in transport are retried only while this much time is left
const RENEW_RETRY_FLOOR: Duration = Duration::from_secs(1);

/// Result of a select call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The seat is in the cart
    Held {
        /// Server-assigned expiry
        expires_at: DateTime<Utc>,
    },
    /// An acquire for this seat is already in flight
    Pending,
    /// The server refused
    Unavailable {
        /// Why
        reason: FailureReason,
    },
    /// The request did not get through; the seat was rolled back
    TryAgain {
        /// Transport failure text
        error: String,
    },
    /// The user deselected before the acquire completed
    Cancelled,
}

/// Result of a deselect call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeselectOutcome {
    /// The seat left the cart and a release was sent
    Released,
    /// The in-flight acquire will be released when it lands
    Cancelled,
    /// The seat was not selected
    NotSelected,
}

/// Engine inputs
#[derive(Clone, Debug)]
pub enum EngineAction {
    // Commands
    /// Load the first snapshot and arm the poll timer
    Start,
    /// User picked a seat
    Select {
        /// Seat
        seat_id: SeatId,
        /// Correlates the resolution with the caller
        ticket: u64,
    },
    /// User removed a seat
    Deselect {
        /// Seat
        seat_id: SeatId,
        /// Correlates the resolution with the caller
        ticket: u64,
    },
    /// Empty the cart
    DeselectAll,
    /// Fetch a snapshot now
    Resync,
    /// Turn keep-alive renewals on or off
    SetRenewal {
        /// New setting
        enabled: bool,
    },

    // Feed
    /// Connection event or delta from the feed
    Feed(FeedEvent),
    /// The server dropped deltas for us
    FeedLagged {
        /// Count of dropped deltas
        skipped: u64,
    },

    // Request results
    /// Snapshot request finished
    SnapshotLoaded(Result<Snapshot, TransportError>),
    /// Acquire finished
    AcquireCompleted {
        /// Seat
        seat_id: SeatId,
        /// Server outcome
        result: Result<SeatOutcome, TransportError>,
    },
    /// Renewal finished
    RenewCompleted {
        /// Seat
        seat_id: SeatId,
        /// Server outcome
        result: Result<SeatOutcome, TransportError>,
    },
    /// Release finished
    ReleaseCompleted {
        /// Seat
        seat_id: SeatId,
        /// Server outcome
        result: Result<SeatOutcome, TransportError>,
    },

    // Timers
    /// Time to renew a cart hold
    RenewDue {
        /// Seat
        seat_id: SeatId,
    },
    /// A cart hold reached its expiry
    ExpiryDue {
        /// Seat
        seat_id: SeatId,
    },
    /// Snapshot backstop
    PollDue,

    // Resolutions
    /// Answer to a [`EngineAction::Select`]
    SelectResolved {
        /// Seat
        seat_id: SeatId,
        /// Ticket of the select call
        ticket: u64,
        /// Outcome
        outcome: SelectOutcome,
    },
    /// Answer to a [`EngineAction::Deselect`]
    DeselectResolved {
        /// Seat
        seat_id: SeatId,
        /// Ticket of the deselect call
        ticket: u64,
        /// Outcome
        outcome: DeselectOutcome,
    },
}

/// Injected dependencies of the reducer
#[derive(Clone)]
pub struct EngineEnvironment {
    /// Lock service client
    pub service: Arc<dyn LockService>,
    /// Time source for expiry decisions
    pub clock: Arc<dyn Clock>,
    /// Where conflict notices go
    pub notifier: Notifier,
    /// Tuning
    pub config: EngineConfig,
}

impl EngineEnvironment {
    /// Creates an environment
    #[must_use]
    pub fn new(service: Arc<dyn LockService>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let notifier = Notifier::new(config.notice_capacity);
        Self {
            service,
            clock,
            notifier,
            config,
        }
    }
}

impl std::fmt::Debug for EngineEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEnvironment")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Timer id for a seat's renewal
#[must_use]
pub fn renew_timer(seat_id: &SeatId) -> EffectId {
    EffectId::new(format!("renew:{seat_id}"))
}

/// Timer id for a seat's local expiry
#[must_use]
pub fn expiry_timer(seat_id: &SeatId) -> EffectId {
    EffectId::new(format!("expiry:{seat_id}"))
}

/// Snapshot backstop timer
#[must_use]
pub fn poll_timer() -> EffectId {
    EffectId::new("poll")
}

/// In-flight snapshot request
#[must_use]
pub fn resync_key() -> EffectId {
    EffectId::new("resync")
}

/// Where an authoritative seat state came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    Snapshot,
    Delta,
    Response,
}

#[derive(Clone, Copy, Debug)]
enum HoldOp {
    Acquire,
    Renew,
    Release,
}

/// The reconciliation reducer
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineReducer;

impl Reducer for EngineReducer {
    type State = EngineState;
    type Action = EngineAction;
    type Environment = EngineEnvironment;

    fn reduce(
        &self,
        state: &mut EngineState,
        action: EngineAction,
        env: &EngineEnvironment,
    ) -> SmallVec<[Effect<EngineAction>; 4]> {
        let now = env.clock.now();
        let mut fx = Effects::new();

        match action {
            EngineAction::Start | EngineAction::PollDue => {
                fx.push(resync(state, env));
                fx.push(arm_poll(state, env));
            },
            EngineAction::Resync => fx.push(resync(state, env)),
            EngineAction::Select { seat_id, ticket } => select(state, env, seat_id, ticket, &mut fx),
            EngineAction::Deselect { seat_id, ticket } => {
                let outcome = deselect(state, env, &seat_id, &mut fx);
                fx.push(resolve(EngineAction::DeselectResolved {
                    seat_id,
                    ticket,
                    outcome,
                }));
            },
            EngineAction::DeselectAll => {
                let mut seats: Vec<SeatId> = state.cart.keys().cloned().collect();
                seats.extend(state.overlay.iter().filter_map(|(seat_id, overlay)| {
                    matches!(overlay, Overlay::Locking { .. }).then(|| seat_id.clone())
                }));
                seats.extend(state.reselect.keys().cloned());
                for seat_id in seats {
                    deselect(state, env, &seat_id, &mut fx);
                }
            },
            EngineAction::SetRenewal { enabled } => set_renewal(state, env, enabled, now, &mut fx),
            EngineAction::Feed(event) => on_feed(state, env, event, now, &mut fx),
            EngineAction::FeedLagged { skipped } => {
                tracing::warn!(skipped, "Feed dropped deltas, resyncing");
                fx.push(resync(state, env));
            },
            EngineAction::SnapshotLoaded(result) => on_snapshot(state, env, result, now, &mut fx),
            EngineAction::AcquireCompleted { seat_id, result } => {
                on_acquired(state, env, seat_id, result, now, &mut fx);
            },
            EngineAction::RenewCompleted { seat_id, result } => {
                on_renewed(state, env, seat_id, result, now, &mut fx);
            },
            EngineAction::ReleaseCompleted { seat_id, result } => {
                on_released(state, env, &seat_id, result, now, &mut fx);
            },
            EngineAction::RenewDue { seat_id } => {
                if state.renew_holds && state.cart.contains_key(&seat_id) {
                    fx.push(hold_request(state, env, HoldOp::Renew, seat_id));
                }
            },
            EngineAction::ExpiryDue { seat_id } => on_expiry(state, env, seat_id, now, &mut fx),
            // Resolutions only wake the caller waiting on them
            EngineAction::SelectResolved { .. } | EngineAction::DeselectResolved { .. } => {},
        }

        fx
    }
}

// ============================================================================
// Commands
// ============================================================================

fn select(state: &mut EngineState, env: &EngineEnvironment, seat_id: SeatId, ticket: u64, fx: &mut Effects) {
    let immediate = if !state.knows_seat(&seat_id) {
        Some(SelectOutcome::Unavailable {
            reason: FailureReason::UnknownSeat,
        })
    } else if let Some(expires_at) = state.cart.get(&seat_id) {
        Some(SelectOutcome::Held {
            expires_at: *expires_at,
        })
    } else if let Some(Overlay::Locking { abandoned, .. }) = state.overlay.get_mut(&seat_id) {
        // Re-selecting a seat abandoned mid-flight keeps it
        *abandoned = false;
        state.dismissed.remove(&seat_id);
        Some(SelectOutcome::Pending)
    } else if state.reselect.contains_key(&seat_id) {
        Some(SelectOutcome::Pending)
    } else if matches!(state.overlay.get(&seat_id), Some(Overlay::Releasing)) {
        // Acquiring now would race the release on the server
        tracing::debug!(seat = %seat_id, "Selected during release, acquiring after it");
        state.reselect.insert(seat_id, ticket);
        return;
    } else {
        None
    };

    if let Some(outcome) = immediate {
        fx.push(resolve(EngineAction::SelectResolved {
            seat_id,
            ticket,
            outcome,
        }));
        return;
    }

    tracing::debug!(seat = %seat_id, "Selecting seat");
    state.dismissed.remove(&seat_id);
    state.overlay.insert(
        seat_id.clone(),
        Overlay::Locking {
            abandoned: false,
            ticket,
        },
    );
    fx.push(hold_request(state, env, HoldOp::Acquire, seat_id));
}

fn deselect(state: &mut EngineState, env: &EngineEnvironment, seat_id: &SeatId, fx: &mut Effects) -> DeselectOutcome {
    if let Some(ticket) = state.reselect.remove(seat_id) {
        fx.push(resolve(EngineAction::SelectResolved {
            seat_id: seat_id.clone(),
            ticket,
            outcome: SelectOutcome::Cancelled,
        }));
        return DeselectOutcome::Cancelled;
    }

    if let Some(Overlay::Locking { abandoned, .. }) = state.overlay.get_mut(seat_id) {
        *abandoned = true;
        state.dismissed.insert(seat_id.clone());
        return DeselectOutcome::Cancelled;
    }

    if state.cart.contains_key(seat_id) {
        tracing::debug!(seat = %seat_id, "Releasing seat");
        drop_hold(state, seat_id, fx);
        begin_release(state, env, seat_id.clone(), fx);
        return DeselectOutcome::Released;
    }

    if matches!(state.overlay.get(seat_id), Some(Overlay::Lapsed)) {
        state.overlay.remove(seat_id);
    }
    DeselectOutcome::NotSelected
}

fn set_renewal(state: &mut EngineState, env: &EngineEnvironment, enabled: bool, now: DateTime<Utc>, fx: &mut Effects) {
    if state.renew_holds == enabled {
        return;
    }
    state.renew_holds = enabled;
    let cart: Vec<(SeatId, DateTime<Utc>)> = state.cart.iter().map(|(s, e)| (s.clone(), *e)).collect();
    for (seat_id, expires_at) in cart {
        if enabled {
            fx.push(arm_renewal(env, &seat_id, expires_at, now));
        } else {
            fx.push(Effect::Cancel(renew_timer(&seat_id)));
        }
    }
}

// ============================================================================
// Feed and snapshots
// ============================================================================

fn on_feed(state: &mut EngineState, env: &EngineEnvironment, event: FeedEvent, now: DateTime<Utc>, fx: &mut Effects) {
    match event {
        FeedEvent::Connected | FeedEvent::Resubscribed => {
            tracing::info!(showtime = %state.showtime_id, "Feed live, resyncing");
            state.feed = FeedState::Live;
            state.syncing = true;
            fx.push(resync(state, env));
            fx.push(arm_poll(state, env));
        },
        FeedEvent::Disconnected { reason } => {
            if state.feed == FeedState::Disconnected {
                return;
            }
            tracing::warn!(showtime = %state.showtime_id, %reason, "Feed lost, polling");
            state.feed = FeedState::Disconnected;
            fx.push(resync(state, env));
            fx.push(arm_poll(state, env));
        },
        FeedEvent::Delta(delta) => {
            if delta.showtime_id != state.showtime_id {
                return;
            }
            if state.syncing {
                state.buffer(delta);
            } else {
                apply_delta(state, env, delta, now, fx);
            }
        },
    }
}

fn apply_delta(state: &mut EngineState, env: &EngineEnvironment, delta: SeatDelta, now: DateTime<Utc>, fx: &mut Effects) {
    let seat_id = delta.state.seat_id.clone();
    if state.merge(delta.state) {
        reconcile(state, env, &seat_id, Source::Delta, now, fx);
    }
}

fn on_snapshot(
    state: &mut EngineState,
    env: &EngineEnvironment,
    result: Result<Snapshot, TransportError>,
    now: DateTime<Utc>,
    fx: &mut Effects,
) {
    let snapshot = match result {
        Ok(snapshot) if snapshot.showtime_id == state.showtime_id => snapshot,
        Ok(snapshot) => {
            tracing::warn!(showtime = %snapshot.showtime_id, "Ignoring snapshot for another showtime");
            return;
        },
        Err(error) => {
            tracing::warn!(%error, "Snapshot failed");
            return;
        },
    };

    tracing::debug!(sequence = snapshot.sequence, seats = snapshot.seats.len(), "Applying snapshot");
    if state.layout.is_empty() {
        state.layout = snapshot
            .layout
            .into_iter()
            .map(|seat| (seat.id.clone(), seat))
            .collect();
    }
    for seat in snapshot.seats {
        state.merge(seat);
    }
    state.syncing = false;
    state.last_snapshot = Some(snapshot.taken_at);

    // Buffered deltas older than the snapshot are no-ops thanks to versioning
    for delta in std::mem::take(&mut state.buffered) {
        if delta.showtime_id == state.showtime_id {
            state.merge(delta.state);
        }
    }

    for seat_id in state.tracked_seats(now) {
        reconcile(state, env, &seat_id, Source::Snapshot, now, fx);
    }
}

// ============================================================================
// Request results
// ============================================================================

fn on_acquired(
    state: &mut EngineState,
    env: &EngineEnvironment,
    seat_id: SeatId,
    result: Result<SeatOutcome, TransportError>,
    now: DateTime<Utc>,
    fx: &mut Effects,
) {
    let Some(Overlay::Locking { abandoned, ticket }) = state.overlay.get(&seat_id).copied() else {
        // The seat moved on (e.g. lapsed); keep the data, ignore the intent
        if let Ok(outcome) = result {
            merge_outcome(state, env, outcome, now, fx);
        }
        return;
    };
    state.overlay.remove(&seat_id);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => {
            tracing::warn!(seat = %seat_id, %error, "Acquire failed, rolling back");
            fx.push(resolve(EngineAction::SelectResolved {
                seat_id,
                ticket,
                outcome: SelectOutcome::TryAgain {
                    error: error.to_string(),
                },
            }));
            fx.push(resync(state, env));
            return;
        },
    };

    if let Some(current) = outcome.current.clone() {
        state.merge(current);
    }

    if !outcome.success {
        let reason = outcome.reason.unwrap_or(FailureReason::HeldByOther);
        tracing::debug!(seat = %seat_id, %reason, "Acquire refused");
        ClientMetrics::record_conflict("contention");
        state.dismissed.remove(&seat_id);
        fx.push(resolve(EngineAction::SelectResolved {
            seat_id,
            ticket,
            outcome: SelectOutcome::Unavailable { reason },
        }));
        return;
    }

    if abandoned {
        tracing::debug!(seat = %seat_id, "Acquired after deselect, releasing");
        begin_release(state, env, seat_id.clone(), fx);
        fx.push(resolve(EngineAction::SelectResolved {
            seat_id,
            ticket,
            outcome: SelectOutcome::Cancelled,
        }));
        return;
    }

    match outcome.expires_at.or_else(|| state.own_hold(&seat_id, now)) {
        Some(expires_at) => {
            hold(state, env, &seat_id, expires_at, now, fx);
            fx.push(resolve(EngineAction::SelectResolved {
                seat_id,
                ticket,
                outcome: SelectOutcome::Held { expires_at },
            }));
        },
        None => {
            tracing::warn!(seat = %seat_id, "Acquire succeeded without an expiry");
            fx.push(resolve(EngineAction::SelectResolved {
                seat_id,
                ticket,
                outcome: SelectOutcome::TryAgain {
                    error: "acquire response carried no expiry".to_string(),
                },
            }));
            fx.push(resync(state, env));
        },
    }
}

fn on_renewed(
    state: &mut EngineState,
    env: &EngineEnvironment,
    seat_id: SeatId,
    result: Result<SeatOutcome, TransportError>,
    now: DateTime<Utc>,
    fx: &mut Effects,
) {
    let Some(tracked) = state.cart.get(&seat_id).copied() else {
        if let Ok(outcome) = result {
            merge_outcome(state, env, outcome, now, fx);
        }
        return;
    };

    match result {
        Ok(outcome) if outcome.success => {
            if let Some(current) = outcome.current.clone() {
                state.merge(current);
            }
            let expires_at = outcome.expires_at.unwrap_or(tracked);
            tracing::debug!(seat = %seat_id, %expires_at, "Hold renewed");
            hold(state, env, &seat_id, expires_at, now, fx);
        },
        Ok(outcome) => {
            if let Some(current) = outcome.current.clone() {
                state.merge(current);
            }
            let kind = match outcome.reason {
                Some(FailureReason::HeldByOther) => NoticeKind::SeatTaken,
                Some(FailureReason::Sold) => NoticeKind::SeatSold,
                _ => NoticeKind::HoldExpired,
            };
            tracing::info!(seat = %seat_id, ?kind, "Renewal refused, dropping seat");
            drop_hold(state, &seat_id, fx);
            notify(state, env, seat_id, kind, now, fx);
            fx.push(resync(state, env));
        },
        Err(error) => {
            let left = remaining(tracked, now);
            if left > RENEW_RETRY_FLOOR && state.renew_holds {
                tracing::warn!(seat = %seat_id, %error, "Renewal failed, retrying");
                fx.push(Effect::timer(
                    renew_timer(&seat_id),
                    left / 2,
                    EngineAction::RenewDue { seat_id },
                ));
            } else {
                tracing::warn!(seat = %seat_id, %error, "Renewal failed, hold will lapse");
            }
        },
    }
}

fn on_released(
    state: &mut EngineState,
    env: &EngineEnvironment,
    seat_id: &SeatId,
    result: Result<SeatOutcome, TransportError>,
    now: DateTime<Utc>,
    fx: &mut Effects,
) {
    if matches!(state.overlay.get(seat_id), Some(Overlay::Releasing)) {
        state.overlay.remove(seat_id);
    }
    match result {
        Ok(outcome) => {
            if !outcome.success {
                tracing::info!(seat = %seat_id, reason = ?outcome.reason, "Release refused, resyncing");
                fx.push(resync(state, env));
            }
            if let Some(current) = outcome.current {
                state.merge(current);
            }
        },
        // The next snapshot retries dismissed seats the server still shows as ours
        Err(error) => tracing::warn!(seat = %seat_id, %error, "Release failed"),
    }
    if let Some(ticket) = state.reselect.remove(seat_id) {
        state.dismissed.remove(seat_id);
        state.overlay.insert(
            seat_id.clone(),
            Overlay::Locking {
                abandoned: false,
                ticket,
            },
        );
        fx.push(hold_request(state, env, HoldOp::Acquire, seat_id.clone()));
        return;
    }
    reconcile(state, env, seat_id, Source::Response, now, fx);
}

fn on_expiry(state: &mut EngineState, env: &EngineEnvironment, seat_id: SeatId, now: DateTime<Utc>, fx: &mut Effects) {
    let Some(expires_at) = state.cart.get(&seat_id).copied() else {
        return;
    };
    if expires_at > now {
        // Woke before the wall clock caught up
        fx.push(Effect::timer(
            expiry_timer(&seat_id),
            remaining(expires_at, now),
            EngineAction::ExpiryDue { seat_id },
        ));
        return;
    }
    tracing::info!(seat = %seat_id, "Hold lapsed locally");
    drop_hold(state, &seat_id, fx);
    state.overlay.insert(seat_id, Overlay::Lapsed);
    fx.push(resync(state, env));
}

fn merge_outcome(state: &mut EngineState, env: &EngineEnvironment, outcome: SeatOutcome, now: DateTime<Utc>, fx: &mut Effects) {
    let changed = outcome.current.is_some_and(|current| state.merge(current));
    if changed {
        reconcile(state, env, &outcome.seat_id, Source::Response, now, fx);
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Brings local intent in line with the mirror for one seat
fn reconcile(
    state: &mut EngineState,
    env: &EngineEnvironment,
    seat_id: &SeatId,
    source: Source,
    now: DateTime<Utc>,
    fx: &mut Effects,
) {
    let me = state.holder_id;
    let status = state.authoritative(seat_id, now);
    let ours = matches!(status, SeatStatus::Held { holder_id, .. } if holder_id == me);

    match state.overlay.get(seat_id) {
        // The pending response decides
        Some(Overlay::Locking { .. } | Overlay::Releasing) => return,
        Some(Overlay::Lapsed) => {
            state.overlay.remove(seat_id);
            match status {
                SeatStatus::Held { expires_at, .. } if ours => {
                    tracing::debug!(seat = %seat_id, "Lapsed hold is still ours");
                    hold(state, env, seat_id, expires_at, now, fx);
                },
                SeatStatus::Held { .. } => notify(state, env, seat_id.clone(), NoticeKind::SeatTaken, now, fx),
                SeatStatus::Sold { holder_id } if holder_id != me => {
                    notify(state, env, seat_id.clone(), NoticeKind::SeatSold, now, fx);
                },
                SeatStatus::Sold { .. } => {},
                SeatStatus::Available => notify(state, env, seat_id.clone(), NoticeKind::HoldExpired, now, fx),
            }
            return;
        },
        None => {},
    }

    if state.dismissed.contains(seat_id) {
        if !ours {
            state.dismissed.remove(seat_id);
        } else if source == Source::Snapshot {
            tracing::debug!(seat = %seat_id, "Dismissed seat still held, releasing again");
            begin_release(state, env, seat_id.clone(), fx);
        }
        return;
    }

    if let Some(tracked) = state.cart.get(seat_id).copied() {
        match status {
            SeatStatus::Held { expires_at, .. } if ours => {
                if expires_at != tracked {
                    hold(state, env, seat_id, expires_at, now, fx);
                }
            },
            SeatStatus::Held { .. } => {
                drop_hold(state, seat_id, fx);
                notify(state, env, seat_id.clone(), NoticeKind::SeatTaken, now, fx);
            },
            SeatStatus::Sold { holder_id } if holder_id == me => {
                tracing::info!(seat = %seat_id, "Seat purchased");
                drop_hold(state, seat_id, fx);
            },
            SeatStatus::Sold { .. } => {
                drop_hold(state, seat_id, fx);
                notify(state, env, seat_id.clone(), NoticeKind::SeatSold, now, fx);
            },
            SeatStatus::Available => {
                drop_hold(state, seat_id, fx);
                notify(state, env, seat_id.clone(), NoticeKind::HoldExpired, now, fx);
            },
        }
        return;
    }

    // A hold from an earlier session (or a lost acquire response)
    if source != Source::Snapshot {
        return;
    }
    if let Some(expires_at) = state.own_hold(seat_id, now) {
        tracing::info!(seat = %seat_id, "Adopting hold found in snapshot");
        hold(state, env, seat_id, expires_at, now, fx);
    }
}

// ============================================================================
// Effect builders
// ============================================================================

/// Puts a seat in the cart and (re)arms its timers
fn hold(
    state: &mut EngineState,
    env: &EngineEnvironment,
    seat_id: &SeatId,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    fx: &mut Effects,
) {
    state.cart.insert(seat_id.clone(), expires_at);
    fx.push(Effect::timer(
        expiry_timer(seat_id),
        remaining(expires_at, now),
        EngineAction::ExpiryDue {
            seat_id: seat_id.clone(),
        },
    ));
    if state.renew_holds {
        fx.push(arm_renewal(env, seat_id, expires_at, now));
    }
}

/// Takes a seat out of the cart and cancels its timers
fn drop_hold(state: &mut EngineState, seat_id: &SeatId, fx: &mut Effects) {
    state.cart.remove(seat_id);
    fx.push(Effect::Cancel(renew_timer(seat_id)));
    fx.push(Effect::Cancel(expiry_timer(seat_id)));
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn arm_renewal(env: &EngineEnvironment, seat_id: &SeatId, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Effect<EngineAction> {
    let left_ms = remaining(expires_at, now).as_millis() as f64;
    let delay_ms = (left_ms * env.config.renew_fraction).round().max(0.0);
    Effect::timer(
        renew_timer(seat_id),
        Duration::from_millis(delay_ms as u64),
        EngineAction::RenewDue {
            seat_id: seat_id.clone(),
        },
    )
}

fn begin_release(state: &mut EngineState, env: &EngineEnvironment, seat_id: SeatId, fx: &mut Effects) {
    state.dismissed.insert(seat_id.clone());
    state.overlay.insert(seat_id.clone(), Overlay::Releasing);
    fx.push(hold_request(state, env, HoldOp::Release, seat_id));
}

fn arm_poll(state: &EngineState, env: &EngineEnvironment) -> Effect<EngineAction> {
    Effect::timer(
        poll_timer(),
        env.config.poll_period(state.feed == FeedState::Live),
        EngineAction::PollDue,
    )
}

fn resync(state: &EngineState, env: &EngineEnvironment) -> Effect<EngineAction> {
    ClientMetrics::record_resync();
    let service = Arc::clone(&env.service);
    let config = env.config.clone();
    let showtime_id = state.showtime_id;
    Effect::Cancellable {
        id: resync_key(),
        effect: Box::new(Effect::future(async move {
            let result = call_with_retry(&config, || service.snapshot(showtime_id)).await;
            Some(EngineAction::SnapshotLoaded(result))
        })),
    }
}

fn hold_request(state: &EngineState, env: &EngineEnvironment, op: HoldOp, seat_id: SeatId) -> Effect<EngineAction> {
    let service = Arc::clone(&env.service);
    let config = env.config.clone();
    let request = HoldRequest::new(state.showtime_id, vec![seat_id.clone()], state.holder_id);
    Effect::future(async move {
        let result = call_with_retry(&config, || {
            let request = request.clone();
            match op {
                HoldOp::Acquire => service.acquire(request),
                HoldOp::Renew => service.renew(request),
                HoldOp::Release => service.release(request),
            }
        })
        .await
        .and_then(|response| outcome_for(response, &seat_id));

        Some(match op {
            HoldOp::Acquire => EngineAction::AcquireCompleted { seat_id, result },
            HoldOp::Renew => EngineAction::RenewCompleted { seat_id, result },
            HoldOp::Release => EngineAction::ReleaseCompleted { seat_id, result },
        })
    })
}

fn notify(state: &mut EngineState, env: &EngineEnvironment, seat_id: SeatId, kind: NoticeKind, now: DateTime<Utc>, fx: &mut Effects) {
    let notice = ConflictNotice::new(seat_id, kind, now);
    if !state.record_notice(&notice, env.config.conflict_window) {
        tracing::debug!(seat = %notice.seat_id, ?kind, "Suppressed duplicate notice");
        return;
    }
    tracing::info!(seat = %notice.seat_id, ?kind, "Conflict");
    ClientMetrics::record_conflict(kind.label());
    let notifier = env.notifier.clone();
    fx.push(Effect::future(async move {
        notifier.publish(notice);
        None
    }));
}

fn resolve(action: EngineAction) -> Effect<EngineAction> {
    Effect::future(async move { Some(action) })
}
