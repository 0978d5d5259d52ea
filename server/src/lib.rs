//! # Seatlock server
//!
//! Authoritative seat hold service. The [`LockManager`] owns every seat's
//! status for every scheduled showtime: it grants, renews, releases and
//! sells time-bounded holds, and publishes each change to the per-showtime
//! [`ChangeFeed`]. The [`api`] module exposes both over HTTP and WebSocket.
//!
//! ```ignore
//! let feed = Arc::new(ChangeFeed::new(1024));
//! let manager = Arc::new(LockManager::new(LockConfig::default(), Arc::new(SystemClock), feed));
//! manager.schedule_showtime(ShowtimeId::new(), layout::demo_theater())?;
//! let app = api::build_router(AppState::new(manager, WebSocketConfig::default()));
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod layout;
pub mod lock_manager;
pub mod registry;
pub mod sweeper;

pub use api::{AppState, build_router};
pub use config::Config;
pub use error::LockError;
pub use feed::{ChangeFeed, FeedSubscription};
pub use lock_manager::{LockConfig, LockManager};
pub use sweeper::ExpirySweeper;
