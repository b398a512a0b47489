//! Request pacing.
//!
//! Enforces a minimum interval between successive requests so bulk work
//! does not burst the marketplace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::{Sleeper, TokioSleeper};

/// Rate limiter that enforces minimum intervals between operations.
pub struct RateLimiter {
    /// Minimum duration between allowed operations.
    min_interval: Duration,

    /// Last time an operation was performed.
    last_operation: Mutex<Option<Instant>>,

    sleeper: Arc<dyn Sleeper>,
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_operation: Mutex::new(None),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the sleeper used while waiting.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The configured minimum interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until an operation is allowed, then marks the operation as performed.
    ///
    /// Returns the duration waited (0 if no wait was needed).
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut last = self.last_operation.lock().await;

        let wait_duration = last.map_or(Duration::ZERO, |last_time| {
            self.min_interval.saturating_sub(last_time.elapsed())
        });

        if !wait_duration.is_zero() {
            debug!(
                "Rate limiter: waiting {:?} before next operation",
                wait_duration
            );
            self.sleeper.sleep(wait_duration).await;
        }

        *last = Some(Instant::now());
        wait_duration
    }

    /// Returns the time remaining until the next operation is allowed.
    pub async fn time_until_allowed(&self) -> Duration {
        let last = self.last_operation.lock().await;
        last.map_or(Duration::ZERO, |last_time| {
            self.min_interval.saturating_sub(last_time.elapsed())
        })
    }

    /// Resets the rate limiter, allowing immediate operation.
    pub async fn reset(&self) {
        let mut last = self.last_operation.lock().await;
        *last = None;
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
