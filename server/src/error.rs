//! Lock manager errors.
//!
//! These reject a request as a whole. Per-seat failures (contention, stale
//! holds) are not errors: they are reported in the response outcomes.

use seatlock_core::types::{SeatId, ShowtimeId};
use thiserror::Error;

/// Errors from the lock manager and seat registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The showtime is not scheduled
    #[error("showtime {0} not found")]
    UnknownShowtime(ShowtimeId),

    /// The showtime is already scheduled
    #[error("showtime {0} is already scheduled")]
    ShowtimeExists(ShowtimeId),

    /// A layout names the same seat twice
    #[error("seat {0} appears more than once in the layout")]
    DuplicateSeat(SeatId),

    /// A hold request names no seats
    #[error("request names no seats")]
    EmptyRequest,

    /// A hold request names too many seats
    #[error("request names {requested} seats, at most {max} allowed")]
    TooManySeats {
        /// Distinct seats requested
        requested: usize,
        /// Configured limit
        max: usize,
    },
}
