//! Shared handler state.

use crate::config::WebSocketConfig;
use crate::lock_manager::LockManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// State shared by every handler
#[derive(Clone, Debug)]
pub struct AppState {
    /// The lock manager
    pub manager: Arc<LockManager>,
    /// Feed websocket limits
    pub websocket: WebSocketConfig,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Creates handler state
    #[must_use]
    pub fn new(manager: Arc<LockManager>, websocket: WebSocketConfig) -> Self {
        Self {
            manager,
            websocket,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open feed connections
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Claims a connection slot, or `None` at the limit
    #[must_use]
    pub fn try_connect(&self) -> Option<ConnectionGuard> {
        let max = self.websocket.max_connections;
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| ConnectionGuard {
                connections: Arc::clone(&self.connections),
            })
    }
}

/// Releases a connection slot on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.fetch_sub(1, Ordering::AcqRel);
    }
}
