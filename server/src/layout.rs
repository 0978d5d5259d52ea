//! Seat layouts for scheduling showtimes.

use seatlock_core::types::{Money, Seat, SeatCategory};

/// Price of a standard seat in cents
pub const STANDARD_PRICE: Money = Money::from_cents(1_250);
/// Price of a premium seat in cents
pub const PREMIUM_PRICE: Money = Money::from_cents(1_800);
/// Price of a VIP seat in cents
pub const VIP_PRICE: Money = Money::from_cents(2_800);

/// A uniform grid of standard seats, ids `A1`, `A2`, ...
#[must_use]
pub fn grid(rows: &[&str], seats_per_row: u32) -> Vec<Seat> {
    rows.iter()
        .flat_map(|row| {
            (1..=seats_per_row).map(move |number| Seat::new(*row, number, SeatCategory::Standard, STANDARD_PRICE))
        })
        .collect()
}

/// Demo auditorium: rows A-H with 12 seats each
///
/// Rows A-B are standard (closest to the screen), C-F premium, G-H VIP.
#[must_use]
pub fn demo_theater() -> Vec<Seat> {
    const ROWS: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];

    ROWS.iter()
        .flat_map(|row| {
            let (category, price) = match *row {
                "A" | "B" => (SeatCategory::Standard, STANDARD_PRICE),
                "G" | "H" => (SeatCategory::Vip, VIP_PRICE),
                _ => (SeatCategory::Premium, PREMIUM_PRICE),
            };
            (1..=12).map(move |number| Seat::new(*row, number, category, price))
        })
        .collect()
}
