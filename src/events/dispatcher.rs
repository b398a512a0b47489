//! Event dispatch loop.
//!
//! Pulls events from an [`EventSource`] one at a time and runs every
//! handler registered for the event's kind, in registration order. A
//! handler that fails (or panics) is logged and skipped; the remaining
//! handlers and all later events are unaffected. Each event is fully
//! dispatched before the next one is polled.
//!
//! Handlers run without a timeout: one that never returns stalls the loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::handler::guarded;
use super::{Event, EventSource, HandlerRegistry, LifecycleEvent, LifecycleHandler, LifecycleKind};
use crate::clock::{Sleeper, TokioSleeper};

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers invoked.
    pub attempted: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Invokes lifecycle handlers in order with the dispatch isolation policy.
pub(crate) async fn notify_lifecycle(
    handlers: &[Arc<dyn LifecycleHandler>],
    event: &LifecycleEvent,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    for handler in handlers {
        report.attempted += 1;
        if let Err(failure) = guarded(handler.handle(event)).await {
            report.failed += 1;
            warn!(
                handler = handler.name(),
                event = %event.kind,
                module = event.module_id.as_deref().unwrap_or("-"),
                error = %failure,
                "Lifecycle handler failed"
            );
        }
    }
    report
}

/// Serial dispatcher over a shared [`HandlerRegistry`].
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
    poll_error_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            poll_error_delay: Duration::from_secs(10),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Sets how long to back off after a failed poll.
    #[must_use]
    pub const fn with_poll_error_delay(mut self, delay: Duration) -> Self {
        self.poll_error_delay = delay;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Runs every handler for `event`'s kind against a snapshot of the registry.
    pub async fn dispatch(&self, event: &Event) -> DispatchReport {
        let kind = event.kind();
        let handlers = self.registry.domain_snapshot(kind);
        let mut report = DispatchReport::default();

        if handlers.is_empty() {
            debug!(event = %kind, id = %event.identity(), "No handlers for event");
            return report;
        }

        for handler in handlers {
            report.attempted += 1;
            if let Err(failure) = guarded(handler.handle(event)).await {
                report.failed += 1;
                warn!(
                    handler = handler.name(),
                    event = %kind,
                    id = %event.identity(),
                    error = %failure,
                    "Event handler failed"
                );
            }
        }

        debug!(
            event = %kind,
            attempted = report.attempted,
            failed = report.failed,
            "Event dispatched"
        );
        report
    }

    /// Sends a process-wide lifecycle event to every registered listener.
    pub async fn broadcast(&self, kind: LifecycleKind) -> DispatchReport {
        let handlers = self.registry.lifecycle_snapshot(kind);
        notify_lifecycle(&handlers, &LifecycleEvent::global(kind)).await
    }

    /// Dispatches events until the source is exhausted. Returns how many
    /// events were dispatched.
    ///
    /// Poll failures are logged and retried after the poll error delay.
    pub async fn run<S>(&self, source: &mut S) -> u64
    where
        S: EventSource + ?Sized,
    {
        info!("Event dispatch loop started");
        self.broadcast(LifecycleKind::Start).await;

        let mut processed = 0;
        loop {
            match source.next_event().await {
                Ok(Some(event)) => {
                    self.dispatch(&event).await;
                    processed += 1;
                }
                Ok(None) => {
                    info!(processed, "Event source exhausted, dispatch loop stopping");
                    break;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_secs = self.poll_error_delay.as_secs(),
                        "Failed to poll events"
                    );
                    self.sleeper.sleep(self.poll_error_delay).await;
                }
            }
        }
        processed
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("poll_error_delay", &self.poll_error_delay)
            .finish_non_exhaustive()
    }
}
