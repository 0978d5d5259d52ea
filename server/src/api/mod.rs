//! HTTP and WebSocket API.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/health` | [`health::health_check`] |
//! | `POST` | `/api/showtimes` | [`showtimes::schedule`] |
//! | `DELETE` | `/api/showtimes/:id` | [`showtimes::retire`] |
//! | `GET` | `/api/showtimes/:id/snapshot` | [`showtimes::snapshot`] |
//! | `GET` | `/api/showtimes/:id/feed` | [`websocket::seat_feed`] |
//! | `POST` | `/api/holds/acquire` | [`holds::acquire`] |
//! | `POST` | `/api/holds/renew` | [`holds::renew`] |
//! | `POST` | `/api/holds/release` | [`holds::release`] |
//! | `POST` | `/api/holds/confirm` | [`holds::confirm`] |

pub mod error;
pub mod health;
pub mod holds;
pub mod showtimes;
pub mod state;
pub mod websocket;

pub use error::AppError;
pub use state::AppState;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/showtimes", post(showtimes::schedule))
        .route("/showtimes/:id", delete(showtimes::retire))
        .route("/showtimes/:id/snapshot", get(showtimes::snapshot))
        .route("/showtimes/:id/feed", get(websocket::seat_feed))
        .route("/holds/acquire", post(holds::acquire))
        .route("/holds/renew", post(holds::renew))
        .route("/holds/release", post(holds::release))
        .route("/holds/confirm", post(holds::confirm));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
