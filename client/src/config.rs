//! Engine tuning.

use seatlock_runtime::retry::RetryPolicy;
use std::time::Duration;

/// Reconciliation engine settings
///
/// # Default Values
///
/// - `renew_fraction`: 2/3 (renew once a third of the remaining hold time is used)
/// - `poll_interval`: 15 seconds while the feed is live
/// - `fallback_poll_interval`: 3 seconds while the feed is down
/// - `request_timeout`: 5 seconds per attempt
/// - `request_retries`: 1
/// - `conflict_window`: 10 seconds
/// - `renew_holds`: true
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Fraction of the remaining hold time after which a renewal fires
    pub renew_fraction: f64,
    /// Snapshot backstop period while the feed is connected
    pub poll_interval: Duration,
    /// Snapshot period while the feed is disconnected
    pub fallback_poll_interval: Duration,
    /// Per-attempt request deadline
    pub request_timeout: Duration,
    /// Extra attempts for a failed request
    pub request_retries: usize,
    /// Pause before retrying a failed request
    pub retry_delay: Duration,
    /// Duplicate notices for one seat within this window are dropped
    pub conflict_window: Duration,
    /// Keep holds alive with renewals
    pub renew_holds: bool,
    /// Feed reconnect backoff
    pub reconnect: RetryPolicy,
    /// Buffered notices per subscriber
    pub notice_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Create a new config builder.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self {
                renew_fraction: 2.0 / 3.0,
                poll_interval: Duration::from_secs(15),
                fallback_poll_interval: Duration::from_secs(3),
                request_timeout: Duration::from_secs(5),
                request_retries: 1,
                retry_delay: Duration::from_millis(200),
                conflict_window: Duration::from_secs(10),
                renew_holds: true,
                reconnect: RetryPolicy::builder()
                    .max_retries(usize::MAX)
                    .initial_delay(Duration::from_millis(500))
                    .max_delay(Duration::from_secs(30))
                    .jitter(0.2)
                    .build(),
                notice_capacity: 64,
            },
        }
    }

    /// Retry policy for a single request
    #[must_use]
    pub fn request_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.request_retries)
            .initial_delay(self.retry_delay)
            .max_delay(self.retry_delay)
            .build()
    }

    /// Longest a request can take across all attempts
    #[must_use]
    pub fn request_budget(&self) -> Duration {
        let attempts = u32::try_from(self.request_retries.saturating_add(1)).unwrap_or(u32::MAX);
        (self.request_timeout + self.retry_delay).saturating_mul(attempts) + Duration::from_secs(1)
    }

    /// Poll period for the given feed state
    #[must_use]
    pub const fn poll_period(&self, feed_live: bool) -> Duration {
        if feed_live {
            self.poll_interval
        } else {
            self.fallback_poll_interval
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the renewal point as a fraction of the remaining hold time (clamped to `0.05..=0.95`).
    #[must_use]
    pub fn renew_fraction(mut self, fraction: f64) -> Self {
        self.config.renew_fraction = fraction.clamp(0.05, 0.95);
        self
    }

    /// Set the live poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the disconnected poll interval.
    #[must_use]
    pub const fn fallback_poll_interval(mut self, interval: Duration) -> Self {
        self.config.fallback_poll_interval = interval;
        self
    }

    /// Set the per-attempt request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set how many times a failed request is retried.
    #[must_use]
    pub const fn request_retries(mut self, retries: usize) -> Self {
        self.config.request_retries = retries;
        self
    }

    /// Set the pause between request attempts.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set the duplicate notice window.
    #[must_use]
    pub const fn conflict_window(mut self, window: Duration) -> Self {
        self.config.conflict_window = window;
        self
    }

    /// Enable or disable keep-alive renewals.
    #[must_use]
    pub const fn renew_holds(mut self, enabled: bool) -> Self {
        self.config.renew_holds = enabled;
        self
    }

    /// Set the feed reconnect backoff.
    #[must_use]
    pub fn reconnect(mut self, policy: RetryPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Set the notice buffer size.
    #[must_use]
    pub const fn notice_capacity(mut self, capacity: usize) -> Self {
        self.config.notice_capacity = capacity;
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert!((config.renew_fraction - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.fallback_poll_interval, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.request_retries, 1);
        assert_eq!(config.conflict_window, Duration::from_secs(10));
        assert!(config.renew_holds);
    }

    #[test]
    fn builder_clamps_renew_fraction() {
        let config = EngineConfig::builder().renew_fraction(1.5).build();
        assert!((config.renew_fraction - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn request_policy_follows_retry_settings() {
        let config = EngineConfig::builder()
            .request_retries(2)
            .retry_delay(Duration::from_millis(50))
            .build();
        let policy = config.request_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(50));
    }

    #[test]
    fn poll_period_depends_on_feed() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_period(true), Duration::from_secs(15));
        assert_eq!(config.poll_period(false), Duration::from_secs(3));
    }
}
