//! Websocket change-feed connector.

use futures::StreamExt;
use seatlock_core::TransportError;
use seatlock_core::protocol::FeedMessage;
use seatlock_core::types::ShowtimeId;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::transport::{FeedConnector, FeedStream, TransportFuture};

/// [`FeedConnector`] over the server's websocket feed
///
/// Each subscription is a fresh connection. Frames that do not parse are
/// logged and skipped; a close frame or socket error ends the stream.
#[derive(Clone, Debug)]
pub struct WsFeedConnector {
    base_url: String,
}

impl WsFeedConnector {
    /// Connector for a server at `base_url`; `http`/`https` become `ws`/`wss`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    /// Websocket URL of a showtime's feed
    #[must_use]
    pub fn feed_url(&self, showtime_id: ShowtimeId) -> String {
        let root = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{root}/api/showtimes/{showtime_id}/feed")
    }
}

impl FeedConnector for WsFeedConnector {
    fn subscribe(&self, showtime_id: ShowtimeId) -> TransportFuture<'_, FeedStream> {
        let url = self.feed_url(showtime_id);
        Box::pin(async move {
            let (socket, _) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Unavailable(format!("feed connect failed: {e}")))?;
            tracing::debug!(%url, "Feed connected");

            let frames = socket.filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<FeedMessage>(&text) {
                        Ok(message) => Some(Ok(message)),
                        Err(error) => {
                            tracing::warn!(%error, "Skipping unreadable feed frame");
                            None
                        },
                    },
                    Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                    Ok(_) => None,
                    Err(error) => Some(Err(TransportError::Unavailable(format!("feed socket error: {error}")))),
                }
            });
            Ok(Box::pin(frames) as FeedStream)
        })
    }
}
