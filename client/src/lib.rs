//! # Seatlock Client
//!
//! Client-side reconciliation engine for seat holds.
//!
//! An [`Engine`] tracks one showtime for one shopper. It keeps two layers of
//! state: an authoritative mirror written only by server data (feed deltas,
//! snapshots, request responses) and a thin optimistic overlay written by user
//! actions. Rendering reads the composite through [`SeatPhase`].
//!
//! ## Update paths
//!
//! - **Push**: the websocket feed ([`WsFeedConnector`]). At-most-once; every
//!   (re)connect is followed by a snapshot before deltas are trusted.
//! - **Poll**: periodic snapshots ([`HttpLockService`]), as a fallback while
//!   the feed is down and as a backstop while it is up.
//!
//! Both feed the same reducer, whose merges are keyed on the per-seat version,
//! so duplicate or stale data is a no-op.
//!
//! ## Example
//!
//! ```ignore
//! use seatlock_client::{Engine, EngineConfig, HttpLockService, WsFeedConnector};
//! use seatlock_core::environment::SystemClock;
//!
//! let engine = Engine::start(
//!     EngineConfig::default(),
//!     showtime_id,
//!     HolderId::new(),
//!     Arc::new(HttpLockService::new("http://localhost:8080")),
//!     Arc::new(WsFeedConnector::new("http://localhost:8080")),
//!     Arc::new(SystemClock),
//! )
//! .await?;
//!
//! engine.select(SeatId::new("A1")).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod notifications;
pub mod reducer;
pub mod state;
pub mod transport;
pub mod ws;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::EngineError;
pub use http::HttpLockService;
pub use notifications::{ConflictNotice, NoticeKind, Notifier};
pub use reducer::{DeselectOutcome, EngineAction, EngineEnvironment, EngineReducer, SelectOutcome};
pub use state::{EngineState, FeedState, SeatPhase};
pub use transport::{FeedConnector, FeedStream, LockService, TransportFuture};
pub use ws::WsFeedConnector;
