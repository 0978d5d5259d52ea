//! Hold endpoints.
//!
//! All four share the body `{showtimeId, seatIds[], holderId}` and answer
//! with per-seat outcomes. Per-seat failures are `200 OK`; only request-level
//! problems (unknown showtime, empty or oversized request) are errors.

use super::error::AppError;
use super::state::AppState;
use axum::{Json, extract::State};
use seatlock_core::protocol::{HoldRequest, HoldResponse};

/// `POST /api/holds/acquire`
///
/// # Errors
///
/// 404 for an unknown showtime, 422 for an invalid request.
#[tracing::instrument(skip_all, fields(showtime = %request.showtime_id, seats = request.seat_ids.len()))]
pub async fn acquire(
    State(state): State<AppState>,
    Json(request): Json<HoldRequest>,
) -> Result<Json<HoldResponse>, AppError> {
    Ok(Json(state.manager.acquire(&request)?))
}

/// `POST /api/holds/renew`
///
/// # Errors
///
/// 404 for an unknown showtime, 422 for an invalid request.
#[tracing::instrument(skip_all, fields(showtime = %request.showtime_id, seats = request.seat_ids.len()))]
pub async fn renew(
    State(state): State<AppState>,
    Json(request): Json<HoldRequest>,
) -> Result<Json<HoldResponse>, AppError> {
    Ok(Json(state.manager.renew(&request)?))
}

/// `POST /api/holds/release`
///
/// # Errors
///
/// 404 for an unknown showtime, 422 for an invalid request.
#[tracing::instrument(skip_all, fields(showtime = %request.showtime_id, seats = request.seat_ids.len()))]
pub async fn release(
    State(state): State<AppState>,
    Json(request): Json<HoldRequest>,
) -> Result<Json<HoldResponse>, AppError> {
    Ok(Json(state.manager.release(&request)?))
}

/// `POST /api/holds/confirm`, called by the booking backend once paid
///
/// # Errors
///
/// 404 for an unknown showtime, 422 for an invalid request.
#[tracing::instrument(skip_all, fields(showtime = %request.showtime_id, seats = request.seat_ids.len()))]
pub async fn confirm(
    State(state): State<AppState>,
    Json(request): Json<HoldRequest>,
) -> Result<Json<HoldResponse>, AppError> {
    Ok(Json(state.manager.confirm(&request)?))
}
