//! Seat registry: the canonical per-seat record for every scheduled showtime.
//!
//! Each seat owns its own mutex. Every read-modify-write of a seat happens
//! while that mutex is held, which is what makes two simultaneous acquires
//! of the same seat impossible to both succeed. The showtime map itself is
//! only write-locked to schedule or retire a showtime.

use crate::error::LockError;
use chrono::{DateTime, Utc};
use seatlock_core::protocol::SeatState;
use seatlock_core::types::{HolderId, Seat, SeatId, SeatStatus, ShowtimeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Mutable state of one seat
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatRecord {
    /// Authoritative status (may hold a lapsed hold until it is next touched)
    pub status: SeatStatus,
    /// When the current hold was first granted
    pub held_since: Option<DateTime<Utc>>,
    /// Holder whose hold lapsed most recently, cleared once the seat moves on
    pub lapsed_holder: Option<HolderId>,
    /// Version stamped by the last mutation
    pub version: u64,
}

impl SeatRecord {
    const fn available() -> Self {
        Self {
            status: SeatStatus::Available,
            held_since: None,
            lapsed_holder: None,
            version: 0,
        }
    }
}

/// One seat: immutable catalog data plus its locked record
#[derive(Debug)]
pub struct SeatSlot {
    seat: Seat,
    record: Mutex<SeatRecord>,
}

impl SeatSlot {
    /// Catalog data
    #[must_use]
    pub const fn seat(&self) -> &Seat {
        &self.seat
    }

    /// Locks the seat record
    ///
    /// A poisoned mutex is recovered: the record is plain data and every
    /// writer leaves it consistent before it could panic.
    pub fn lock(&self) -> MutexGuard<'_, SeatRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// All seats of one showtime
#[derive(Debug)]
pub struct ShowtimeSeats {
    id: ShowtimeId,
    slots: Vec<SeatSlot>,
    index: HashMap<SeatId, usize>,
    sequence: AtomicU64,
}

impl ShowtimeSeats {
    fn new(id: ShowtimeId, layout: Vec<Seat>) -> Result<Self, LockError> {
        let mut index = HashMap::with_capacity(layout.len());
        let mut slots = Vec::with_capacity(layout.len());

        for seat in layout {
            if index.insert(seat.id.clone(), slots.len()).is_some() {
                return Err(LockError::DuplicateSeat(seat.id));
            }
            slots.push(SeatSlot {
                seat,
                record: Mutex::new(SeatRecord::available()),
            });
        }

        Ok(Self {
            id,
            slots,
            index,
            sequence: AtomicU64::new(0),
        })
    }

    /// Showtime id
    #[must_use]
    pub const fn id(&self) -> ShowtimeId {
        self.id
    }

    /// Looks up a seat
    #[must_use]
    pub fn slot(&self, seat_id: &SeatId) -> Option<&SeatSlot> {
        self.index.get(seat_id).and_then(|&i| self.slots.get(i))
    }

    /// Seats in layout order
    pub fn slots(&self) -> impl Iterator<Item = &SeatSlot> {
        self.slots.iter()
    }

    /// Number of seats
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the showtime has no seats
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Catalog of every seat
    #[must_use]
    pub fn layout(&self) -> Vec<Seat> {
        self.slots.iter().map(|slot| slot.seat.clone()).collect()
    }

    /// Issues the next version; call only while holding the seat's lock
    pub fn next_version(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Highest version issued so far
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Applies `status` to a locked record, stamping a fresh version
    pub fn write(&self, seat_id: &SeatId, record: &mut SeatRecord, status: SeatStatus) -> SeatState {
        record.status = status;
        record.version = self.next_version();
        SeatState::new(seat_id.clone(), status, record.version)
    }
}

/// Registry of scheduled showtimes
#[derive(Debug, Default)]
pub struct SeatRegistry {
    showtimes: RwLock<HashMap<ShowtimeId, Arc<ShowtimeSeats>>>,
}

impl SeatRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a showtime with every seat available
    ///
    /// # Errors
    ///
    /// [`LockError::ShowtimeExists`] if already scheduled,
    /// [`LockError::DuplicateSeat`] if the layout repeats a seat id.
    pub fn insert(&self, id: ShowtimeId, layout: Vec<Seat>) -> Result<Arc<ShowtimeSeats>, LockError> {
        let seats = Arc::new(ShowtimeSeats::new(id, layout)?);
        let mut showtimes = self.showtimes.write().unwrap_or_else(PoisonError::into_inner);
        match showtimes.entry(id) {
            Entry::Occupied(_) => Err(LockError::ShowtimeExists(id)),
            Entry::Vacant(slot) => Ok(Arc::clone(slot.insert(seats))),
        }
    }

    /// Removes a showtime
    ///
    /// # Errors
    ///
    /// [`LockError::UnknownShowtime`] if it is not scheduled.
    pub fn remove(&self, id: ShowtimeId) -> Result<Arc<ShowtimeSeats>, LockError> {
        self.showtimes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(LockError::UnknownShowtime(id))
    }

    /// Looks up a showtime
    ///
    /// # Errors
    ///
    /// [`LockError::UnknownShowtime`] if it is not scheduled.
    pub fn get(&self, id: ShowtimeId) -> Result<Arc<ShowtimeSeats>, LockError> {
        self.showtimes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(LockError::UnknownShowtime(id))
    }

    /// Ids of all scheduled showtimes
    #[must_use]
    pub fn ids(&self) -> Vec<ShowtimeId> {
        let mut ids: Vec<_> = self
            .showtimes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use seatlock_core::types::{Money, SeatCategory};

    fn seat(row: &str, number: u32) -> Seat {
        Seat::new(row, number, SeatCategory::Standard, Money::from_cents(1_200))
    }

    #[test]
    fn duplicate_seat_is_rejected() {
        let registry = SeatRegistry::new();
        let result = registry.insert(ShowtimeId::new(), vec![seat("A", 1), seat("A", 1)]);
        assert_eq!(result.err(), Some(LockError::DuplicateSeat(SeatId::new("A1"))));
    }

    #[test]
    fn duplicate_showtime_is_rejected() {
        let registry = SeatRegistry::new();
        let id = ShowtimeId::new();
        registry.insert(id, vec![seat("A", 1)]).unwrap();
        assert_eq!(
            registry.insert(id, vec![seat("A", 2)]).err(),
            Some(LockError::ShowtimeExists(id))
        );
    }

    #[test]
    fn versions_are_monotonic_across_seats() {
        let registry = SeatRegistry::new();
        let id = ShowtimeId::new();
        let seats = registry.insert(id, vec![seat("A", 1), seat("A", 2)]).unwrap();

        let a1 = SeatId::new("A1");
        let a2 = SeatId::new("A2");
        let first = {
            let slot = seats.slot(&a1).unwrap();
            seats.write(&a1, &mut slot.lock(), SeatStatus::Available)
        };
        let second = {
            let slot = seats.slot(&a2).unwrap();
            seats.write(&a2, &mut slot.lock(), SeatStatus::Available)
        };

        assert!(second.version > first.version);
        assert_eq!(seats.sequence(), second.version);
    }

    #[test]
    fn removed_showtime_is_unknown() {
        let registry = SeatRegistry::new();
        let id = ShowtimeId::new();
        registry.insert(id, vec![seat("A", 1)]).unwrap();
        registry.remove(id).unwrap();
        assert_eq!(registry.get(id).err(), Some(LockError::UnknownShowtime(id)));
        assert!(registry.ids().is_empty());
    }
}
