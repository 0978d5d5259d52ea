//! Prometheus metrics for observability and monitoring.
//!
//! Metric names for the lock manager, the change feed, the client engine and
//! the store runtime are described here so every binary exports the same
//! catalogue.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatlock_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let body = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Holds granted by the lock manager
pub const HOLDS_ACQUIRED: &str = "seatlock_holds_acquired_total";
/// Holds extended by the lock manager
pub const HOLDS_RENEWED: &str = "seatlock_holds_renewed_total";
/// Holds released by their holder
pub const HOLDS_RELEASED: &str = "seatlock_holds_released_total";
/// Holds that lapsed (lazily or via the sweeper)
pub const HOLDS_EXPIRED: &str = "seatlock_holds_expired_total";
/// Seats converted into sales
pub const SEATS_SOLD: &str = "seatlock_seats_sold_total";
/// Per-seat operations refused because of contention or stale state
pub const HOLD_CONFLICTS: &str = "seatlock_hold_conflicts_total";
/// Current change-feed subscribers
pub const FEED_SUBSCRIBERS: &str = "seatlock_feed_subscribers";
/// Deltas dropped for slow subscribers
pub const FEED_LAGGED: &str = "seatlock_feed_lagged_total";
/// Conflicts surfaced to a user by a client engine
pub const CLIENT_CONFLICTS: &str = "seatlock_client_conflicts_total";
/// Snapshot resyncs performed by a client engine
pub const CLIENT_RESYNCS: &str = "seatlock_client_resyncs_total";
/// Lock request latency seen by the server
pub const REQUEST_DURATION: &str = "seatlock_request_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its scrape endpoint should bind to.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint should listen on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (tests) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(HOLDS_ACQUIRED, "Total number of seat holds granted");
    describe_counter!(HOLDS_RENEWED, "Total number of seat holds extended");
    describe_counter!(HOLDS_RELEASED, "Total number of seat holds released by their holder");
    describe_counter!(HOLDS_EXPIRED, "Total number of seat holds that lapsed");
    describe_counter!(SEATS_SOLD, "Total number of held seats converted into sales");
    describe_counter!(
        HOLD_CONFLICTS,
        "Per-seat operations refused (held by other, sold, expired, not held)"
    );
    describe_gauge!(FEED_SUBSCRIBERS, "Current number of change-feed subscribers");
    describe_counter!(FEED_LAGGED, "Total number of deltas dropped for slow subscribers");
    describe_counter!(CLIENT_CONFLICTS, "Total number of conflicts surfaced to users");
    describe_counter!(CLIENT_RESYNCS, "Total number of client snapshot resyncs");
    describe_histogram!(REQUEST_DURATION, "Time taken to serve hold requests");

    describe_counter!("store.effects.executed", "Total number of effects executed by stores");
    describe_counter!("store.effects.cancelled", "Total number of keyed effects cancelled or replaced");
    describe_histogram!("store.reducer.duration_seconds", "Time taken to run reducers");
}

/// Lock manager metrics recorder.
pub struct LockMetrics;

impl LockMetrics {
    /// Record a granted hold.
    pub fn record_acquired() {
        counter!(HOLDS_ACQUIRED).increment(1);
    }

    /// Record a renewed hold.
    pub fn record_renewed() {
        counter!(HOLDS_RENEWED).increment(1);
    }

    /// Record a released hold.
    pub fn record_released() {
        counter!(HOLDS_RELEASED).increment(1);
    }

    /// Record a lapsed hold.
    pub fn record_expired() {
        counter!(HOLDS_EXPIRED).increment(1);
    }

    /// Record a sale.
    pub fn record_sold() {
        counter!(SEATS_SOLD).increment(1);
    }

    /// Record a refused per-seat operation, labelled by reason.
    pub fn record_conflict(reason: &'static str) {
        counter!(HOLD_CONFLICTS, "reason" => reason).increment(1);
    }

    /// Record how long a hold request took.
    pub fn record_request(operation: &'static str, duration: Duration) {
        histogram!(REQUEST_DURATION, "operation" => operation).record(duration.as_secs_f64());
    }
}

/// Change feed metrics recorder.
pub struct FeedMetrics;

impl FeedMetrics {
    /// Record a subscriber joining.
    pub fn subscriber_joined() {
        gauge!(FEED_SUBSCRIBERS).increment(1.0);
    }

    /// Record a subscriber leaving.
    pub fn subscriber_left() {
        gauge!(FEED_SUBSCRIBERS).decrement(1.0);
    }

    /// Record deltas dropped for a slow subscriber.
    pub fn record_lagged(skipped: u64) {
        counter!(FEED_LAGGED).increment(skipped);
    }
}

/// Client engine metrics recorder.
pub struct ClientMetrics;

impl ClientMetrics {
    /// Record a conflict surfaced to the user.
    pub fn record_conflict(kind: &'static str) {
        counter!(CLIENT_CONFLICTS, "kind" => kind).increment(1);
    }

    /// Record a snapshot resync.
    pub fn record_resync() {
        counter!(CLIENT_RESYNCS).increment(1);
    }
}
