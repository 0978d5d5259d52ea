//! Configuration management for the seatlock server.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::lock_manager::LockConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Lock manager configuration
    pub locks: LockSettings,
    /// Change-feed websocket configuration
    pub websocket: WebSocketConfig,
    /// Showtime to schedule with the demo layout at startup
    pub seed_demo_showtime: Option<Uuid>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Log filter (used when `RUST_LOG` is unset)
    pub log_level: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Lock manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockSettings {
    /// Hold lifetime in seconds
    pub hold_ttl_secs: u64,
    /// Largest number of distinct seats per request
    pub max_seats_per_request: usize,
    /// Expiry sweeper period in seconds
    pub sweep_interval_secs: u64,
    /// Deltas buffered per feed subscriber before it lags
    pub feed_capacity: usize,
}

/// Change-feed websocket configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Maximum concurrent feed connections (503 beyond)
    pub max_connections: usize,
    /// Keep-alive ping period in seconds
    pub ping_interval_secs: u64,
    /// Close connections silent for this many seconds
    pub idle_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            ping_interval_secs: 30,
            idle_timeout_secs: 300,
        }
    }
}

impl LockSettings {
    /// Lock manager settings
    #[must_use]
    pub const fn lock_config(&self) -> LockConfig {
        LockConfig {
            hold_ttl: Duration::from_secs(self.hold_ttl_secs),
            max_seats_per_request: self.max_seats_per_request,
        }
    }

    /// Sweeper period
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Missing or unparsable values fall back to their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = WebSocketConfig::default();

        Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed(&lookup, "PORT", 8080),
                log_level: lookup("RUST_LOG").unwrap_or_else(|| "info,seatlock=debug".to_string()),
                metrics_host: lookup("METRICS_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                metrics_port: parsed(&lookup, "METRICS_PORT", 9090),
                shutdown_timeout: parsed(&lookup, "SHUTDOWN_TIMEOUT", 30),
            },
            locks: LockSettings {
                hold_ttl_secs: parsed(&lookup, "HOLD_TTL_SECS", 900),
                max_seats_per_request: parsed(&lookup, "MAX_SEATS_PER_REQUEST", 10),
                sweep_interval_secs: parsed(&lookup, "SWEEP_INTERVAL_SECS", 5),
                feed_capacity: parsed(&lookup, "FEED_CAPACITY", 1024),
            },
            websocket: WebSocketConfig {
                max_connections: parsed(&lookup, "WS_MAX_CONNECTIONS", defaults.max_connections),
                ping_interval_secs: parsed(&lookup, "WS_PING_INTERVAL_SECS", defaults.ping_interval_secs),
                idle_timeout_secs: parsed(&lookup, "WS_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            },
            seed_demo_showtime: lookup("SEED_DEMO_SHOWTIME").and_then(|s| s.parse().ok()),
        }
    }

    /// Address the API server binds to
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Address the metrics endpoint binds to
    #[must_use]
    pub fn metrics_address(&self) -> String {
        format!("{}:{}", self.server.metrics_host, self.server.metrics_port)
    }
}
