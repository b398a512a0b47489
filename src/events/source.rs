//! Event sources.
//!
//! [`PollingEventSource`] turns the marketplace's repeated update snapshots
//! into a stream of events, each delivered at most once.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use super::{Event, EventPayload};
use crate::clock::{Sleeper, TokioSleeper};

/// How many event identities are remembered for de-duplication.
const SEEN_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be established at all. Fatal.
    #[error("Failed to connect to event source: {0}")]
    Connect(String),

    /// A single poll failed; the next poll may succeed.
    #[error("Failed to poll for updates: {0}")]
    Poll(String),
}

/// Produces events one at a time, possibly waiting between them.
#[async_trait]
pub trait EventSource: Send {
    /// Returns the next event, or `None` once the source is exhausted.
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError>;
}

/// The raw update feed: every call returns what is currently pending.
/// Items may repeat across calls.
#[async_trait]
pub trait UpdateFeed: Send + Sync {
    async fn fetch_updates(&self) -> Result<Vec<EventPayload>, SourceError>;
}

/// Bounded set of recently seen identities.
#[derive(Debug)]
struct SeenSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Records `identity`; returns `false` if it was already present.
    fn insert(&mut self, identity: String) -> bool {
        if self.members.contains(&identity) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.members.remove(&oldest);
        }
        self.order.push_back(identity.clone());
        self.members.insert(identity);
        true
    }
}

/// [`EventSource`] polling an [`UpdateFeed`].
pub struct PollingEventSource {
    feed: Arc<dyn UpdateFeed>,
    buffer: VecDeque<Event>,
    seen: SeenSet,
    poll_interval: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl PollingEventSource {
    /// Performs the initial fetch and marks everything already pending as
    /// seen, so the backlog present at startup is not replayed.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connect`] if the feed cannot be reached.
    pub async fn connect(feed: Arc<dyn UpdateFeed>, poll_interval: Duration) -> Result<Self, SourceError> {
        Self::connect_with_sleeper(feed, poll_interval, Arc::new(TokioSleeper)).await
    }

    /// Like [`Self::connect`] with a custom sleeper.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connect`] if the feed cannot be reached.
    pub async fn connect_with_sleeper(
        feed: Arc<dyn UpdateFeed>,
        poll_interval: Duration,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, SourceError> {
        let backlog = feed.fetch_updates().await.map_err(|e| match e {
            SourceError::Poll(reason) | SourceError::Connect(reason) => SourceError::Connect(reason),
        })?;

        let mut seen = SeenSet::new(SEEN_CAPACITY);
        for payload in &backlog {
            seen.insert(payload.identity());
        }
        info!(backlog = backlog.len(), "Connected to event source");

        Ok(Self {
            feed,
            buffer: VecDeque::new(),
            seen,
            poll_interval,
            sleeper,
        })
    }

    /// Buffers unseen payloads; returns how many were new.
    fn enqueue(&mut self, payloads: Vec<EventPayload>) -> usize {
        let mut fresh = 0;
        for payload in payloads {
            if self.seen.insert(payload.identity()) {
                self.buffer.push_back(Event::new(payload));
                fresh += 1;
            }
        }
        fresh
    }
}

#[async_trait]
impl EventSource for PollingEventSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Some(event));
            }

            let payloads = self.feed.fetch_updates().await?;
            let fresh = self.enqueue(payloads);
            if fresh == 0 {
                self.sleeper.sleep(self.poll_interval).await;
            } else {
                debug!(fresh, "Fetched new events");
            }
        }
    }
}

impl std::fmt::Debug for PollingEventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingEventSource")
            .field("buffered", &self.buffer.len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
