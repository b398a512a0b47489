//! Outbound HTTP layer.
//!
//! Every call the bot makes to the marketplace goes through a
//! [`ResilientClient`], which retries transient failures with backoff.

mod rate_limiter;
mod retry;
mod transport;

pub use rate_limiter::RateLimiter;
pub use retry::{ResilientClient, RetryPolicy, TRANSIENT_STATUSES, is_transient};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError};
