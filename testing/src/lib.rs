//! # Seatlock Testing
//!
//! Testing utilities and helpers for the seat hold workspace.
//!
//! This crate provides:
//! - Clocks implementing [`Clock`]: fixed, manually advanced, and one that
//!   follows tokio's (pausable) time
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//! - [`InProcessTransport`], a client transport backed by an in-process lock
//!   manager, with fault injection
//! - [`fixtures`] for building a showtime and its engines
//!
//! ## Example
//!
//! ```ignore
//! use seatlock_testing::fixtures::{TestShowtime, fast_engine_config};
//!
//! #[tokio::test(start_paused = true)]
//! async fn two_shoppers() {
//!     let showtime = TestShowtime::new(Duration::from_secs(900), &["A"], 4);
//!     let (alice, _) = showtime.engine(fast_engine_config(), HolderId::new()).await;
//!     let (bob, _) = showtime.engine(fast_engine_config(), HolderId::new()).await;
//!
//!     alice.select(SeatId::new("A1")).await.unwrap();
//! }
//! ```

use chrono::{DateTime, Utc};
use seatlock_core::environment::Clock;

pub mod fixtures;
pub mod reducer_test;
pub mod transport;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    fn epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatlock_testing::mocks::FixedClock;
    /// use seatlock_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }

    /// Clock moved by hand
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the code under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Starts at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                now: Arc::new(Mutex::new(time)),
            }
        }

        /// Moves time forward (or back, with a negative duration)
        pub fn advance(&self, by: chrono::Duration) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            *now += by;
        }

        /// Jumps to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Default for ManualClock {
        /// Starts at 2025-01-01 00:00:00 UTC
        fn default() -> Self {
            Self::new(epoch())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Wall time derived from tokio's clock
    ///
    /// Under `#[tokio::test(start_paused = true)]` this clock advances
    /// exactly as far as tokio timers do, so hold expiry and engine timers
    /// agree. Clones share the same origin.
    #[derive(Debug, Clone, Copy)]
    pub struct TokioClock {
        base: DateTime<Utc>,
        origin: tokio::time::Instant,
    }

    impl TokioClock {
        /// Starts at 2025-01-01 00:00:00 UTC, now
        ///
        /// Must be called inside a tokio runtime when time is paused.
        #[must_use]
        pub fn new() -> Self {
            Self {
                base: epoch(),
                origin: tokio::time::Instant::now(),
            }
        }
    }

    impl Default for TokioClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
            self.base + elapsed
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, TokioClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
pub use transport::InProcessTransport;
