//! Property and race tests for the lock manager.
//!
//! Random operation sequences are checked against a small reference model,
//! and the change feed is replayed to confirm it reproduces the snapshot.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use seatlock_core::environment::Clock;
use seatlock_core::protocol::{ChangeCause, FailureReason, HoldRequest, SeatState};
use seatlock_core::types::{HolderId, SeatId, SeatStatus, ShowtimeId};
use seatlock_server::layout::grid;
use seatlock_server::{ChangeFeed, LockConfig, LockManager};
use seatlock_testing::ManualClock;
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::time::Duration;

const TTL_SECS: i64 = 60;
const SEATS: usize = 3;
const HOLDERS: usize = 3;

#[derive(Clone, Copy, Debug)]
enum Op {
    Acquire,
    Renew,
    Release,
    Confirm,
}

#[derive(Clone, Debug)]
enum Step {
    Hold { op: Op, holder: usize, seat: usize },
    Advance(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Acquire), Just(Op::Renew), Just(Op::Release), Just(Op::Confirm)]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (op(), 0..HOLDERS, 0..SEATS).prop_map(|(op, holder, seat)| Step::Hold { op, holder, seat }),
        1 => (1..(TTL_SECS * 3 / 2)).prop_map(Step::Advance),
    ]
}

/// Reference model of one seat
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Model {
    Available { lapsed: Option<usize> },
    Held { holder: usize, expires_at: i64 },
    Sold { holder: usize },
}

impl Model {
    fn expire(&mut self, now: i64) {
        if let Self::Held { holder, expires_at } = *self {
            if now >= expires_at {
                *self = Self::Available { lapsed: Some(holder) };
            }
        }
    }

    fn apply(&mut self, op: Op, caller: usize, now: i64) -> Result<(), FailureReason> {
        let held = Self::Held {
            holder: caller,
            expires_at: now + TTL_SECS,
        };
        match (op, *self) {
            (Op::Acquire, Self::Available { .. }) => *self = held,
            (Op::Acquire | Op::Renew, Self::Held { holder, .. }) if holder == caller => *self = held,
            (Op::Release, Self::Held { holder, .. }) if holder == caller => {
                *self = Self::Available { lapsed: None };
            },
            (Op::Release, Self::Available { .. }) => {},
            (Op::Confirm, Self::Held { holder, .. }) if holder == caller => *self = Self::Sold { holder },
            (Op::Confirm, Self::Sold { holder }) if holder == caller => {},
            (_, Self::Held { .. }) => return Err(FailureReason::HeldByOther),
            (_, Self::Sold { .. }) => return Err(FailureReason::Sold),
            (_, Self::Available { lapsed }) if lapsed == Some(caller) => return Err(FailureReason::Expired),
            (_, Self::Available { .. }) => return Err(FailureReason::NotHeld),
        }
        Ok(())
    }
}

fn request(manager: &LockManager, op: Op, req: &HoldRequest) -> seatlock_core::protocol::HoldResponse {
    match op {
        Op::Acquire => manager.acquire(req),
        Op::Renew => manager.renew(req),
        Op::Release => manager.release(req),
        Op::Confirm => manager.confirm(req),
    }
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn manager_matches_reference_model(steps in prop::collection::vec(step(), 1..60)) {
        let clock = ManualClock::default();
        let start = clock.now();
        let config = LockConfig {
            hold_ttl: Duration::from_secs(TTL_SECS.unsigned_abs()),
            max_seats_per_request: 10,
        };
        let manager = LockManager::new(config, Arc::new(clock.clone()), Arc::new(ChangeFeed::new(1024)));
        let showtime = ShowtimeId::new();
        manager.schedule_showtime(showtime, grid(&["A"], u32::try_from(SEATS).unwrap())).unwrap();
        let mut feed = manager.feed().subscribe(showtime).unwrap();

        let holders: Vec<HolderId> = (0..HOLDERS).map(|_| HolderId::new()).collect();
        let seat_ids: Vec<SeatId> = (1..=SEATS).map(|n| SeatId::new(format!("A{n}"))).collect();
        let mut model = vec![Model::Available { lapsed: None }; SEATS];
        let mut elapsed = 0_i64;

        for step in steps {
            match step {
                Step::Advance(secs) => {
                    clock.advance(chrono::Duration::seconds(secs));
                    elapsed += secs;
                },
                Step::Hold { op, holder, seat } => {
                    let req = HoldRequest::new(showtime, vec![seat_ids[seat].clone()], holders[holder]);
                    let outcome = request(&manager, op, &req).outcomes.remove(0);

                    model[seat].expire(elapsed);
                    let expected = model[seat].apply(op, holder, elapsed);
                    prop_assert_eq!(outcome.success, expected.is_ok(), "{:?} by {} on {}", op, holder, seat);
                    prop_assert_eq!(outcome.reason, expected.err());
                },
            }
        }

        let snapshot = manager.snapshot(showtime).unwrap();
        for (seat, state) in model.iter_mut().enumerate() {
            state.expire(elapsed);
            let actual = snapshot.seat(&seat_ids[seat]).unwrap().status();
            let expected = match *state {
                Model::Available { .. } => SeatStatus::Available,
                Model::Held { holder, expires_at } => SeatStatus::Held {
                    holder_id: holders[holder],
                    expires_at: start + chrono::Duration::seconds(expires_at),
                },
                Model::Sold { holder } => SeatStatus::Sold { holder_id: holders[holder] },
            };
            prop_assert_eq!(actual, expected);
        }

        // Replaying the feed reproduces the snapshot, with versions only moving forward.
        let mut replayed: HashMap<SeatId, SeatState> = HashMap::new();
        let mut last_version = 0;
        while let Ok(delta) = feed.try_recv() {
            prop_assert!(delta.state.version > last_version);
            last_version = delta.state.version;
            replayed.insert(delta.state.seat_id.clone(), delta.state);
        }
        prop_assert_eq!(last_version, snapshot.sequence);
        for state in &snapshot.seats {
            match replayed.get(&state.seat_id) {
                Some(replayed) => prop_assert_eq!(replayed, state),
                None => prop_assert_eq!(state.version, 0),
            }
        }
    }
}

fn race_fixture(seats: u32) -> (Arc<LockManager>, ShowtimeId) {
    let manager = Arc::new(LockManager::new(
        LockConfig::default(),
        Arc::new(ManualClock::default()),
        Arc::new(ChangeFeed::new(1024)),
    ));
    let showtime = ShowtimeId::new();
    manager.schedule_showtime(showtime, grid(&["A"], seats)).unwrap();
    (manager, showtime)
}

#[test]
fn concurrent_acquires_grant_exactly_one_hold() {
    const CONTENDERS: usize = 16;
    let (manager, showtime) = race_fixture(1);
    let mut feed = manager.feed().subscribe(showtime).unwrap();
    let barrier = Barrier::new(CONTENDERS);

    let winners: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|_| {
                let manager = &manager;
                let barrier = &barrier;
                scope.spawn(move || {
                    let req = HoldRequest::new(showtime, vec![SeatId::new("A1")], HolderId::new());
                    barrier.wait();
                    usize::from(manager.acquire(&req).unwrap().all_succeeded())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(winners, 1);
    assert_eq!(feed.try_recv().unwrap().cause, ChangeCause::Acquired);
    assert!(feed.try_recv().is_err());
}

#[test]
fn overlapping_multi_seat_requests_never_share_a_seat() {
    const CONTENDERS: usize = 8;
    let (manager, showtime) = race_fixture(4);
    let barrier = Barrier::new(CONTENDERS);

    let grants: Vec<(HolderId, Vec<SeatId>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|i| {
                let manager = &manager;
                let barrier = &barrier;
                scope.spawn(move || {
                    let mut seats: Vec<SeatId> = (1..=4).map(|n| SeatId::new(format!("A{n}"))).collect();
                    if i % 2 == 1 {
                        seats.reverse();
                    }
                    let holder = HolderId::new();
                    barrier.wait();
                    let response = manager.acquire(&HoldRequest::new(showtime, seats, holder)).unwrap();
                    (holder, response.succeeded().map(|o| o.seat_id.clone()).collect())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut owners: HashMap<SeatId, HolderId> = HashMap::new();
    for (holder, seats) in grants {
        for seat in seats {
            assert!(owners.insert(seat, holder).is_none(), "seat granted twice");
        }
    }
    assert_eq!(owners.len(), 4);

    let snapshot = manager.snapshot(showtime).unwrap();
    for (seat, holder) in owners {
        assert_eq!(snapshot.seat(&seat).unwrap().holder_id, Some(holder));
    }
}
