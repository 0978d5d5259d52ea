//! Domain types for seat holds.
//!
//! Identifiers, the seat catalog record, holds and the authoritative seat
//! status shared by the lock manager and every client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a showtime
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShowtimeId(Uuid);

impl ShowtimeId {
    /// Creates a new random `ShowtimeId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ShowtimeId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ShowtimeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ShowtimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque seat identifier, unique within a showtime (e.g. `"A1"`)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatId(String);

impl SeatId {
    /// Creates a new `SeatId`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SeatId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identity of whoever holds a seat (one per shopper session)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(Uuid);

impl HolderId {
    /// Creates a new random `HolderId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `HolderId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Seat catalog
// ============================================================================

/// Seat category (price tier)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatCategory {
    /// Regular seating
    Standard,
    /// Better sight lines
    Premium,
    /// VIP seating
    Vip,
}

impl fmt::Display for SeatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standard => "standard",
            Self::Premium => "premium",
            Self::Vip => "vip",
        };
        f.write_str(name)
    }
}

/// Canonical catalog record for one seat of a showtime
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    /// Opaque seat id
    pub id: SeatId,
    /// Row label (e.g. "A")
    pub row: String,
    /// Seat number within the row
    pub number: u32,
    /// Price tier
    pub category: SeatCategory,
    /// Price of one ticket for this seat
    pub price: Money,
}

impl Seat {
    /// Creates a seat whose id is `row` followed by `number` (e.g. `A1`)
    #[must_use]
    pub fn new(row: impl Into<String>, number: u32, category: SeatCategory, price: Money) -> Self {
        let row = row.into();
        Self {
            id: SeatId::new(format!("{row}{number}")),
            row,
            number,
            category,
            price,
        }
    }
}

// ============================================================================
// Holds and status
// ============================================================================

/// A time-bounded, renewable exclusive claim on a seat
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    /// Seat being held
    pub seat_id: SeatId,
    /// Who holds it
    pub holder_id: HolderId,
    /// When the hold was first granted (unchanged by renewal)
    pub created_at: DateTime<Utc>,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    /// Checks if the hold has expired
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry (zero once expired)
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.expires_at - now).max(chrono::Duration::zero())
    }
}

/// Authoritative seat status, as recorded by the lock manager
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeatStatus {
    /// Free to be held
    Available,
    /// Held (temporary claim with expiry)
    Held {
        /// Current holder
        holder_id: HolderId,
        /// When the hold lapses
        expires_at: DateTime<Utc>,
    },
    /// Sold (permanent)
    Sold {
        /// Buyer
        holder_id: HolderId,
    },
}

impl SeatStatus {
    /// The status with any lapsed hold treated as absent
    ///
    /// A hold whose `expires_at` has passed must never be trusted, even if the
    /// record has not been cleaned up yet.
    #[must_use]
    pub fn effective(self, now: DateTime<Utc>) -> Self {
        match self {
            Self::Held { expires_at, .. } if now >= expires_at => Self::Available,
            other => other,
        }
    }

    /// The holder of a live hold or the buyer of a sold seat
    #[must_use]
    pub const fn holder(&self) -> Option<HolderId> {
        match self {
            Self::Available => None,
            Self::Held { holder_id, .. } | Self::Sold { holder_id } => Some(*holder_id),
        }
    }

    /// Expiry of the hold, if held
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Held { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }

    /// Status as seen by `viewer` at `now`
    #[must_use]
    pub fn view_for(self, viewer: HolderId, now: DateTime<Utc>) -> ViewStatus {
        match self.effective(now) {
            Self::Available => ViewStatus::Available,
            Self::Held { holder_id, .. } if holder_id == viewer => ViewStatus::HeldBySelf,
            Self::Held { .. } => ViewStatus::HeldByOther,
            Self::Sold { .. } => ViewStatus::Sold,
        }
    }
}

/// Viewer-relative seat status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViewStatus {
    /// Nobody holds it
    Available,
    /// The viewer holds it
    HeldBySelf,
    /// Someone else holds it
    HeldByOther,
    /// Sold
    Sold,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T19:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    #[test]
    fn lapsed_hold_is_treated_as_available() {
        let holder = HolderId::new();
        let status = SeatStatus::Held {
            holder_id: holder,
            expires_at: now(),
        };

        assert_eq!(status.effective(now()), SeatStatus::Available);
        assert_eq!(status.view_for(holder, now()), ViewStatus::Available);
        assert_eq!(
            status.view_for(holder, now() - Duration::seconds(1)),
            ViewStatus::HeldBySelf
        );
    }

    #[test]
    fn view_depends_on_viewer() {
        let me = HolderId::new();
        let other = HolderId::new();
        let status = SeatStatus::Held {
            holder_id: other,
            expires_at: now() + Duration::minutes(15),
        };

        assert_eq!(status.view_for(me, now()), ViewStatus::HeldByOther);
        assert_eq!(status.view_for(other, now()), ViewStatus::HeldBySelf);
        assert_eq!(
            SeatStatus::Sold { holder_id: me }.view_for(me, now()),
            ViewStatus::Sold
        );
    }

    #[test]
    fn seat_id_is_row_and_number() {
        let seat = Seat::new("B", 3, SeatCategory::Premium, Money::from_cents(1_850));
        assert_eq!(seat.id.as_str(), "B3");
        assert_eq!(seat.price.to_string(), "$18.50");
    }

    #[test]
    fn hold_remaining_never_negative() {
        let hold = Hold {
            seat_id: SeatId::new("A1"),
            holder_id: HolderId::new(),
            created_at: now() - Duration::minutes(20),
            expires_at: now() - Duration::minutes(5),
        };
        assert!(hold.is_expired(now()));
        assert_eq!(hold.remaining(now()), Duration::zero());
    }
}
