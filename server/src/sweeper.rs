//! Background expiry of abandoned holds.

use crate::lock_manager::LockManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodically expires lapsed holds across all showtimes
pub struct ExpirySweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Starts sweeping every `interval`
    #[must_use]
    pub fn spawn(manager: Arc<LockManager>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let expired = manager.expire_all_due();
                        if expired > 0 {
                            tracing::debug!(expired, "Sweeper expired lapsed holds");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            tracing::debug!("Expiry sweeper stopped");
        });

        Self { shutdown, handle }
    }

    /// Stops the sweeper and waits for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
