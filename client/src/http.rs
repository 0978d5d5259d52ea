//! HTTP client for the lock service endpoints.

use seatlock_core::TransportError;
use seatlock_core::protocol::{HoldRequest, HoldResponse, Snapshot};
use seatlock_core::types::ShowtimeId;
use serde::de::DeserializeOwned;

use crate::transport::{LockService, TransportFuture};

/// [`LockService`] over the server's JSON API
///
/// Timeouts are applied by the engine per attempt, so the client itself has
/// none.
#[derive(Clone, Debug)]
pub struct HttpLockService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLockService {
    /// Creates a client for a server at `base_url` (e.g. `http://localhost:8080`)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Uses a preconfigured `reqwest` client
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    /// Server root this client talks to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_hold(&self, op: &'static str, request: HoldRequest) -> Result<HoldResponse, TransportError> {
        let url = format!("{}/api/holds/{op}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(request_failed)?;
        decode(response).await
    }

    async fn get_snapshot(&self, showtime_id: ShowtimeId) -> Result<Snapshot, TransportError> {
        let url = format!("{}/api/showtimes/{showtime_id}/snapshot", self.base_url);
        let response = self.client.get(&url).send().await.map_err(request_failed)?;
        decode(response).await
    }
}

impl LockService for HttpLockService {
    fn acquire(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse> {
        Box::pin(self.post_hold("acquire", request))
    }

    fn renew(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse> {
        Box::pin(self.post_hold("renew", request))
    }

    fn release(&self, request: HoldRequest) -> TransportFuture<'_, HoldResponse> {
        Box::pin(self.post_hold("release", request))
    }

    fn snapshot(&self, showtime_id: ShowtimeId) -> TransportFuture<'_, Snapshot> {
        Box::pin(self.get_snapshot(showtime_id))
    }
}

fn request_failed(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        TransportError::Protocol(format!("invalid response: {err}"))
    } else {
        TransportError::Unavailable(format!("request failed: {err}"))
    }
}

/// Success bodies are decoded; 5xx is retryable, anything else is a protocol error
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Protocol(format!("invalid response body: {e}")));
    }

    let body = response.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| value.get("message").and_then(|v| v.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(&body).to_string());

    if status.is_server_error() {
        Err(TransportError::Unavailable(format!("{status}: {message}")))
    } else {
        Err(TransportError::Protocol(format!("{status}: {message}")))
    }
}
