//! Retrying wrapper around a [`Transport`].
//!
//! A response is retried when its status is one of [`TRANSIENT_STATUSES`],
//! or when the start of its body carries a known transient-error phrase
//! (some gateways answer throttling with a misleading status). Delays honour
//! an explicit `Retry-After` header and otherwise back off exponentially,
//! with a little random jitter on top.
//!
//! Exhausting the attempt budget is not an error: the last response is
//! handed back for the caller to interpret.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, warn};

use super::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper, until};

/// Status codes that are always retried.
pub const TRANSIENT_STATUSES: [u16; 3] = [429, 502, 503];

/// Lower-case phrases that mark a body as a transient failure.
const TRANSIENT_PHRASES: &[&str] = &[
    "too many requests",
    "502 bad gateway",
    "503 service temporarily unavailable",
    "service unavailable",
    "rate limit exceeded",
];

/// How much of the body is inspected for [`TRANSIENT_PHRASES`].
const BODY_PREFIX_BYTES: usize = 512;

/// Retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,

    /// Ceiling for the exponential delay.
    pub max_delay: Duration,

    /// Upper bound of the random jitter added to every delay.
    pub max_jitter: Duration,

    /// Ceiling for server-provided `Retry-After` hints.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_jitter: Duration::from_secs(1),
            max_retry_after: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `retry` (0-based), without jitter.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay)
    }
}

/// Whether a response should be retried.
#[must_use]
pub fn is_transient(response: &HttpResponse) -> bool {
    if TRANSIENT_STATUSES.contains(&response.status) {
        return true;
    }

    let prefix = response.body_prefix(BODY_PREFIX_BYTES).to_lowercase();
    TRANSIENT_PHRASES.iter().any(|phrase| prefix.contains(phrase))
}

/// Parses a `Retry-After` header given as delta-seconds or an HTTP date.
fn retry_after(response: &HttpResponse, now: DateTime<Utc>) -> Option<Duration> {
    let value = response.header("retry-after")?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(until(now, at.with_timezone(&Utc)))
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Transport wrapper that transparently retries transient failures.
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl ResilientClient {
    /// Wraps `transport` with the given policy.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the sleeper used between attempts.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replaces the clock used to resolve `Retry-After` dates.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The active retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends `request`, retrying transient failures.
    ///
    /// Non-transient responses, successful or not, are returned after the
    /// first attempt. When every attempt is transient, the final response is
    /// returned as-is.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the final attempt if it produced no
    /// response at all. A malformed request fails on the first attempt.
    pub async fn call(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = self.transport.send(request).await;

            match &outcome {
                Ok(response) if !is_transient(response) => return outcome,
                Err(e) if !e.is_transient() => {
                    warn!(url = %request.url, error = %e, "Request cannot be sent");
                    return outcome;
                }
                Ok(response) => debug!(
                    url = %request.url,
                    status = response.status,
                    attempt,
                    "Transient response"
                ),
                Err(e) => debug!(url = %request.url, attempt, error = %e, "Transport failure"),
            }

            if attempt >= max_attempts {
                warn!(
                    method = %request.method,
                    url = %request.url,
                    attempts = attempt,
                    "Giving up after repeated transient failures"
                );
                return outcome;
            }

            let delay = self.delay_for(outcome.as_ref().ok(), attempt - 1);
            debug!(url = %request.url, delay_ms = delay.as_millis(), "Retrying after delay");
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    fn delay_for(&self, response: Option<&HttpResponse>, retry: u32) -> Duration {
        let base = response
            .and_then(|r| retry_after(r, self.clock.now()))
            .map_or_else(
                || self.policy.backoff(retry),
                |hint| hint.min(self.policy.max_retry_after),
            );
        base + jitter(self.policy.max_jitter)
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
