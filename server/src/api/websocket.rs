//! Change feed over WebSocket.
//!
//! ```text
//! ws://localhost:8080/api/showtimes/:id/feed
//! ```
//!
//! Every frame is a JSON [`FeedMessage`]:
//!
//! ```json
//! {"type":"delta","showtimeId":"...","seatId":"C7","status":"held","holderId":"...","expiresAt":"...","version":42,"cause":"acquired"}
//! {"type":"ping"}
//! {"type":"lagged","skipped":17}
//! {"type":"error","message":"showtime retired"}
//! ```
//!
//! Delivery is at-most-once. A `lagged` frame tells the client it missed
//! deltas and should fetch a snapshot. Clients only listen; anything they
//! send merely counts as activity for the idle timeout.

use super::error::AppError;
use super::state::{AppState, ConnectionGuard};
use crate::feed::FeedSubscription;
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use seatlock_core::protocol::FeedMessage;
use seatlock_core::types::ShowtimeId;
use seatlock_runtime::metrics::FeedMetrics;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, Instant, interval};
use tracing::{debug, info, warn};

/// Subscribes to a showtime's change feed.
///
/// Answers 503 beyond the connection limit and 404 for an unknown
/// showtime; both are decided before the upgrade.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn seat_feed(
    ws: WebSocketUpgrade,
    Path(showtime_id): Path<ShowtimeId>,
    State(state): State<AppState>,
) -> Response {
    let Some(guard) = state.try_connect() else {
        warn!(
            current_connections = state.active_connections(),
            "WebSocket connection limit exceeded"
        );
        return AppError::unavailable("Too many concurrent connections. Please try again later.")
            .into_response();
    };

    let Some(subscription) = state.manager.feed().subscribe(showtime_id) else {
        return AppError::not_found("Showtime", showtime_id).into_response();
    };

    info!(showtime = %showtime_id, "Feed subscription requested");
    ws.on_upgrade(move |socket| handle_feed_socket(socket, showtime_id, subscription, state, guard))
}

fn frame(message: &FeedMessage) -> Option<Message> {
    serde_json::to_string(message).ok().map(Message::Text)
}

async fn handle_feed_socket(
    socket: WebSocket,
    showtime_id: ShowtimeId,
    mut subscription: FeedSubscription,
    state: AppState,
    _guard: ConnectionGuard,
) {
    FeedMetrics::subscriber_joined();
    info!(
        showtime = %showtime_id,
        total_connections = state.active_connections(),
        "Feed connection established"
    );

    let (mut sender, mut receiver) = socket.split();
    let mut ping = interval(Duration::from_secs(state.websocket.ping_interval_secs.max(1)));
    ping.tick().await;
    let idle_timeout = Duration::from_secs(state.websocket.idle_timeout_secs);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            delta = subscription.recv() => {
                let outgoing = match delta {
                    Ok(delta) => FeedMessage::Delta(delta),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(showtime = %showtime_id, skipped, "Feed subscriber lagged");
                        FeedMetrics::record_lagged(skipped);
                        FeedMessage::Lagged { skipped }
                    },
                    Err(RecvError::Closed) => {
                        let closing = FeedMessage::Error { message: "showtime retired".to_string() };
                        if let Some(message) = frame(&closing) {
                            let _ = sender.send(message).await;
                        }
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    },
                };
                let Some(message) = frame(&outgoing) else { continue };
                if sender.send(message).await.is_err() {
                    debug!("Client disconnected during feed stream");
                    break;
                }
            }
            _ = ping.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    info!(showtime = %showtime_id, "Closing idle feed connection");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                let Some(keepalive) = frame(&FeedMessage::Ping) else { continue };
                if sender.send(Message::Ping(Vec::new())).await.is_err()
                    || sender.send(keepalive).await.is_err()
                {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_activity = Instant::now(),
                    Some(Err(e)) => {
                        debug!(error = %e, "Feed socket error");
                        break;
                    },
                }
            }
        }
    }

    FeedMetrics::subscriber_left();
    info!(showtime = %showtime_id, "Feed connection closed");
}
