//! Counts marketplace activity.
//!
//! Handlers only increment atomics; a maintenance task owned by the binary
//! periodically writes a [`StatsSnapshot`] to disk.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::with_lifecycle_logging;
use crate::events::{Event, EventHandler, EventKind, EventPayload, HandlerBundle};
use crate::modules::{ModuleContext, ModuleFactory, ModuleInfo};

/// Live counters shared between the stats handlers and the flush task.
#[derive(Debug, Default)]
pub struct StatsCounters {
    messages: AtomicU64,
    orders: AtomicU64,
    status_changes: AtomicU64,
}

impl StatsCounters {
    /// Counters continuing from a saved snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &StatsSnapshot) -> Self {
        Self {
            messages: AtomicU64::new(snapshot.messages),
            orders: AtomicU64::new(snapshot.orders),
            status_changes: AtomicU64::new(snapshot.status_changes),
        }
    }

    /// Copies the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            orders: self.orders.load(Ordering::Relaxed),
            status_changes: self.status_changes.load(Ordering::Relaxed),
            saved_at: Some(Utc::now()),
        }
    }

    /// Writes a snapshot to `path`, logging on failure.
    pub fn flush(&self, path: &Path) -> bool {
        match self.snapshot().save(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Stats flushed");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to flush stats");
                false
            }
        }
    }

    fn record(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::NewMessage => &self.messages,
            EventKind::NewOrder => &self.orders,
            EventKind::OrderStatusChanged => &self.status_changes,
            EventKind::ChatsListChanged => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Persisted counter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub messages: u64,
    pub orders: u64,
    pub status_changes: u64,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// Loads a snapshot, returns default if not found.
    pub fn load(path: impl AsRef<Path>) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// Factory for the stats module.
#[derive(Debug, Clone)]
pub struct Stats {
    counters: Arc<StatsCounters>,
}

impl Stats {
    pub const ID: &'static str = "stats";

    #[must_use]
    pub fn new(counters: Arc<StatsCounters>) -> Self {
        Self { counters }
    }
}

impl ModuleFactory for Stats {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(
            Self::ID,
            "Statistics",
            env!("CARGO_PKG_VERSION"),
            "Counts messages, orders and order status changes",
        )
    }

    fn build(&self, _context: &ModuleContext) -> anyhow::Result<HandlerBundle> {
        let handler = Arc::new(CountingHandler {
            counters: Arc::clone(&self.counters),
        });
        let bundle = [
            EventKind::NewMessage,
            EventKind::NewOrder,
            EventKind::OrderStatusChanged,
        ]
        .into_iter()
        .fold(HandlerBundle::new(), |bundle, kind| {
            bundle.on_event(kind, handler.clone())
        });
        Ok(with_lifecycle_logging(bundle, Self::ID))
    }
}

struct CountingHandler {
    counters: Arc<StatsCounters>,
}

#[async_trait]
impl EventHandler for CountingHandler {
    fn name(&self) -> &str {
        "stats.count"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if let EventPayload::NewMessage(message) = &event.payload
            && message.by_bot
        {
            return Ok(());
        }
        self.counters.record(event.kind());
        Ok(())
    }
}
