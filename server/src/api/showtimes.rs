//! Showtime endpoints: snapshot (poll path), schedule and retire.

use super::error::AppError;
use super::state::AppState;
use crate::layout::demo_theater;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use seatlock_core::protocol::Snapshot;
use seatlock_core::types::{Seat, ShowtimeId};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/showtimes`
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    /// Id to use (generated if absent)
    #[serde(default)]
    pub showtime_id: Option<ShowtimeId>,
    /// Seat catalog (demo auditorium if absent)
    #[serde(default)]
    pub seats: Option<Vec<Seat>>,
}

/// Response of `POST /api/showtimes`
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    /// Scheduled showtime
    pub showtime_id: ShowtimeId,
    /// Number of seats created
    pub seat_count: usize,
}

/// `GET /api/showtimes/:id/snapshot`
///
/// # Errors
///
/// 404 for an unknown showtime.
pub async fn snapshot(
    State(state): State<AppState>,
    Path(showtime_id): Path<ShowtimeId>,
) -> Result<Json<Snapshot>, AppError> {
    Ok(Json(state.manager.snapshot(showtime_id)?))
}

/// `POST /api/showtimes`
///
/// # Errors
///
/// 409 if the id is taken, 422 for a layout with duplicate seats.
#[tracing::instrument(skip_all)]
pub async fn schedule(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleResponse>), AppError> {
    let showtime_id = request.showtime_id.unwrap_or_default();
    let layout = request.seats.unwrap_or_else(demo_theater);
    if layout.is_empty() {
        return Err(AppError::validation("a showtime needs at least one seat"));
    }

    let seat_count = state.manager.schedule_showtime(showtime_id, layout)?;
    Ok((
        StatusCode::CREATED,
        Json(ScheduleResponse {
            showtime_id,
            seat_count,
        }),
    ))
}

/// `DELETE /api/showtimes/:id`
///
/// # Errors
///
/// 404 for an unknown showtime.
#[tracing::instrument(skip(state))]
pub async fn retire(
    State(state): State<AppState>,
    Path(showtime_id): Path<ShowtimeId>,
) -> Result<StatusCode, AppError> {
    state.manager.retire_showtime(showtime_id)?;
    Ok(StatusCode::NO_CONTENT)
}
