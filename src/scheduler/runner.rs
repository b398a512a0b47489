//! Raise scheduler runner.
//!
//! One pass works like this:
//! 1. Push `next_run_at` out to `now + default_interval` (safety ceiling)
//! 2. Enumerate categories and drop cooldowns for ones that disappeared
//! 3. For every category whose cooldown has expired, drop the stale entry,
//!    wait for the pacer and try to raise it:
//!    - success: clear the cooldown, optionally probe once more to learn
//!      the next cooldown boundary
//!    - cooldown: remember `now + wait` (none when no wait is given)
//!    - throttled: abort the pass, defer by `throttle_backoff`
//! 4. Pull `next_run_at` forward to the earliest cooldown and save state
//!
//! The owning tick loop only starts a pass when `next_run_at` has passed.
//! The cooldown table lives inside the scheduler and is never shared.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::{PersistentRaiseState, RaiseState};
use crate::clock::{Clock, Sleeper, after};
use crate::http::RateLimiter;

/// One independently raisable group of offers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// Why a raise (or the category listing) did not go through.
#[derive(Debug, Error)]
pub enum RaiseError {
    /// The category cannot be raised yet.
    #[error("Category is on cooldown (wait: {wait:?})")]
    Cooldown { wait: Option<Duration> },

    /// The marketplace throttles the whole account.
    #[error("Marketplace throttled the request")]
    Throttled,

    #[error("Raise failed: {0}")]
    Other(String),
}

/// Something whose categories can be raised.
#[async_trait]
pub trait RaiseTarget: Send + Sync {
    /// Lists the categories that can be raised.
    async fn categories(&self) -> Result<Vec<Category>, RaiseError>;

    /// Raises one category.
    async fn raise(&self, category: &Category) -> Result<(), RaiseError>;
}

/// Raise scheduler settings.
#[derive(Debug, Clone)]
pub struct RaiseSettings {
    /// Ceiling between passes when nothing reports a cooldown.
    pub default_interval: Duration,
    /// Deferral after the marketplace throttles a pass.
    pub throttle_backoff: Duration,
    /// Minimum gap between two raise calls within a pass.
    pub pacing: Duration,
    /// Re-raise right after a success to learn the next cooldown.
    pub probe_after_raise: bool,
    /// Deferral after the category listing fails for another reason.
    pub enumerate_retry: Duration,
    /// How often the tick loop checks whether a pass is due.
    pub check_interval: Duration,
    /// Where to persist state; `None` keeps it in memory only.
    pub state_path: Option<PathBuf>,
}

impl Default for RaiseSettings {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(3600),
            throttle_backoff: Duration::from_secs(300),
            pacing: Duration::from_secs(1),
            probe_after_raise: true,
            enumerate_retry: Duration::from_secs(60),
            check_interval: Duration::from_secs(10),
            state_path: None,
        }
    }
}

/// Messages that can be sent to the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerMessage {
    /// Run a pass now, regardless of `next_run_at`.
    TriggerPass,
    /// Stop the scheduler.
    Shutdown,
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Raise calls made, probes included.
    pub attempted: usize,
    /// Categories raised.
    pub raised: usize,
    /// Ids of categories that reported a cooldown.
    pub deferred: Vec<String>,
    /// Whether the pass stopped on a global throttle.
    pub throttled: bool,
}

/// Periodically raises every category whose cooldown has expired.
pub struct RaiseScheduler {
    target: Arc<dyn RaiseTarget>,
    settings: RaiseSettings,
    clock: Arc<dyn Clock>,
    pacer: RateLimiter,
    state: RaiseState,
    next_run_tx: watch::Sender<DateTime<Utc>>,
}

impl RaiseScheduler {
    /// Creates a scheduler, restoring persisted state when a path is set.
    #[must_use]
    pub fn new(target: Arc<dyn RaiseTarget>, settings: RaiseSettings, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let state = settings.state_path.as_ref().map_or_else(
            || RaiseState::new(now),
            |path| RaiseState::from_persistent(PersistentRaiseState::load(path), now),
        );
        let (next_run_tx, _) = watch::channel(state.next_run_at());

        Self {
            target,
            pacer: RateLimiter::new(settings.pacing),
            settings,
            clock,
            state,
            next_run_tx,
        }
    }

    /// Replaces the starting state.
    #[must_use]
    pub fn with_state(mut self, state: RaiseState) -> Self {
        self.next_run_tx.send_replace(state.next_run_at());
        self.state = state;
        self
    }

    /// Replaces the sleeper used for pacing.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.pacer = RateLimiter::new(self.settings.pacing).with_sleeper(sleeper);
        self
    }

    /// Receives every new `next_run_at`.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DateTime<Utc>> {
        self.next_run_tx.subscribe()
    }

    #[must_use]
    pub const fn state(&self) -> &RaiseState {
        &self.state
    }

    /// Runs the scheduler loop until shut down.
    pub async fn run(mut self, mut rx: mpsc::Receiver<SchedulerMessage>) {
        info!(
            next_run_at = %self.state.next_run_at(),
            cooldowns = self.state.cooldown_count(),
            "Raise scheduler started"
        );

        let mut check_timer = interval(self.settings.check_interval.max(Duration::from_millis(1)));
        check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = check_timer.tick() => {
                    if self.state.is_due(self.clock.now()) {
                        self.run_pass().await;
                    }
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SchedulerMessage::TriggerPass) => {
                            debug!("Received trigger pass message");
                            self.run_pass().await;
                        }
                        Some(SchedulerMessage::Shutdown) | None => {
                            info!("Raise scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Runs one pass over all categories.
    pub async fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        let started = self.clock.now();
        self.state
            .defer_until(after(started, self.settings.default_interval));

        let categories = match self.target.categories().await {
            Ok(categories) => categories,
            Err(RaiseError::Throttled) => {
                self.throttle(&mut report);
                return report;
            }
            Err(e) => {
                warn!(error = %e, "Failed to list categories");
                let retry_at = after(self.clock.now(), self.settings.enumerate_retry);
                self.state.defer_until(retry_at);
                self.finish();
                return report;
            }
        };

        self.state
            .retain_cooldowns(|id| categories.iter().any(|c| c.id == id));
        self.pacer.reset().await;

        for category in &categories {
            if !self.state.is_eligible(&category.id, self.clock.now()) {
                continue;
            }
            // An expired cooldown must not outlive the attempt
            self.state.clear_cooldown(&category.id);

            self.pacer.wait_and_acquire().await;
            report.attempted += 1;
            let result = self.target.raise(category).await;

            let result = match result {
                Ok(()) => {
                    report.raised += 1;
                    if !self.settings.probe_after_raise {
                        continue;
                    }
                    self.pacer.wait_and_acquire().await;
                    report.attempted += 1;
                    match self.target.raise(category).await {
                        Ok(()) => {
                            debug!(category = %category.name, "Probe raised again, no cooldown learned");
                            continue;
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            match result {
                RaiseError::Cooldown { wait: Some(wait) } => {
                    let until = after(self.clock.now(), wait);
                    debug!(category = %category.name, %until, "Category on cooldown");
                    self.state.set_cooldown(&category.id, until);
                    report.deferred.push(category.id.clone());
                }
                RaiseError::Cooldown { wait: None } => {
                    debug!(category = %category.name, "Category on cooldown without a wait time");
                    report.deferred.push(category.id.clone());
                }
                RaiseError::Throttled => {
                    self.throttle(&mut report);
                    return report;
                }
                RaiseError::Other(reason) => {
                    warn!(category = %category.name, %reason, "Failed to raise category");
                }
            }
        }

        self.state.settle(self.clock.now());
        info!(
            attempted = report.attempted,
            raised = report.raised,
            deferred = report.deferred.len(),
            next_run_at = %self.state.next_run_at(),
            "Raise pass finished"
        );
        self.finish();
        report
    }

    /// Aborts the pass and backs off the whole scheduler.
    fn throttle(&mut self, report: &mut PassReport) {
        let until = after(self.clock.now(), self.settings.throttle_backoff);
        warn!(%until, "Marketplace throttled the raise pass, backing off");
        self.state.defer_until(until);
        report.throttled = true;
        self.finish();
    }

    /// Publishes and persists the current state.
    fn finish(&self) {
        self.next_run_tx.send_replace(self.state.next_run_at());

        if let Some(path) = &self.settings.state_path
            && let Err(e) = self.state.to_persistent().save(path)
        {
            warn!(path = %path.display(), error = %e, "Failed to save raise state");
        }
    }
}

impl std::fmt::Debug for RaiseScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaiseScheduler")
            .field("settings", &self.settings)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;
    use crate::testing::{ManualClock, RecordingSleeper};

    /// Target answering raises from per-category scripts.
    #[derive(Default)]
    struct FakeTarget {
        categories: Vec<Category>,
        listing_throttled: bool,
        scripts: Mutex<HashMap<String, VecDeque<Result<(), RaiseError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTarget {
        fn new(ids: &[&str]) -> Self {
            Self {
                categories: ids
                    .iter()
                    .map(|id| Category {
                        id: (*id).to_owned(),
                        name: id.to_uppercase(),
                    })
                    .collect(),
                ..Self::default()
            }
        }

        fn script(self, id: &str, results: Vec<Result<(), RaiseError>>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(id.to_owned(), results.into());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RaiseTarget for FakeTarget {
        async fn categories(&self) -> Result<Vec<Category>, RaiseError> {
            if self.listing_throttled {
                return Err(RaiseError::Throttled);
            }
            Ok(self.categories.clone())
        }

        async fn raise(&self, category: &Category) -> Result<(), RaiseError> {
            self.calls.lock().unwrap().push(category.id.clone());
            self.scripts
                .lock()
                .unwrap()
                .get_mut(&category.id)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(()))
        }
    }

    fn cooldown(secs: u64) -> Result<(), RaiseError> {
        Err(RaiseError::Cooldown {
            wait: Some(Duration::from_secs(secs)),
        })
    }

    fn settings(probe: bool) -> RaiseSettings {
        RaiseSettings {
            probe_after_raise: probe,
            ..RaiseSettings::default()
        }
    }

    fn scheduler(target: Arc<FakeTarget>, settings: RaiseSettings, clock: &Arc<ManualClock>) -> RaiseScheduler {
        RaiseScheduler::new(target, settings, clock.clone()).with_sleeper(RecordingSleeper::new())
    }

    #[tokio::test]
    async fn test_resource_without_cooldown_is_attempted_every_pass() {
        let clock = ManualClock::new();
        let target = Arc::new(FakeTarget::new(&["a"]));
        let mut scheduler = scheduler(target.clone(), settings(false), &clock);

        scheduler.run_pass().await;
        scheduler.run_pass().await;

        assert_eq!(target.calls(), vec!["a", "a"]);
        assert_eq!(scheduler.state().cooldown("a"), None);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_until_it_expires() {
        let clock = ManualClock::new();
        let target = Arc::new(FakeTarget::new(&["a"]).script("a", vec![cooldown(600)]));
        let mut scheduler = scheduler(target.clone(), settings(false), &clock);

        let report = scheduler.run_pass().await;
        assert_eq!(report.deferred, vec!["a".to_owned()]);
        assert_eq!(
            scheduler.state().next_run_at(),
            after(clock.now(), Duration::from_secs(600))
        );

        clock.advance(Duration::from_secs(599));
        scheduler.run_pass().await;
        assert_eq!(target.calls().len(), 1);

        clock.advance(Duration::from_secs(1));
        scheduler.run_pass().await;
        assert_eq!(target.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_cooldown_without_wait_stays_eligible() {
        let clock = ManualClock::new();
        let target = Arc::new(
            FakeTarget::new(&["a"]).script("a", vec![Err(RaiseError::Cooldown { wait: None })]),
        );
        let mut scheduler = scheduler(target.clone(), settings(false), &clock);

        scheduler.run_pass().await;
        assert_eq!(scheduler.state().cooldown("a"), None);

        scheduler.run_pass().await;
        assert_eq!(target.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_probe_records_next_cooldown() {
        let clock = ManualClock::new();
        let target = Arc::new(FakeTarget::new(&["a"]).script("a", vec![Ok(()), cooldown(3600)]));
        let mut scheduler = scheduler(target.clone(), settings(true), &clock);

        let report = scheduler.run_pass().await;

        assert_eq!(report.raised, 1);
        assert_eq!(report.attempted, 2);
        assert_eq!(
            scheduler.state().cooldown("a"),
            Some(after(clock.now(), Duration::from_secs(3600)))
        );
    }

    #[tokio::test]
    async fn test_throttle_stops_pass_and_defers_by_backoff() {
        let clock = ManualClock::new();
        let target = Arc::new(
            FakeTarget::new(&["a", "b", "c"]).script("b", vec![Err(RaiseError::Throttled)]),
        );
        let mut scheduler = scheduler(target.clone(), settings(false), &clock);
        let next_run = scheduler.subscribe();

        let report = scheduler.run_pass().await;

        assert!(report.throttled);
        assert_eq!(target.calls(), vec!["a", "b"]);
        let expected = after(clock.now(), Duration::from_secs(300));
        assert_eq!(scheduler.state().next_run_at(), expected);
        assert_eq!(*next_run.borrow(), expected);
    }

    #[tokio::test]
    async fn test_throttled_listing_defers_by_backoff() {
        let clock = ManualClock::new();
        let target = Arc::new(FakeTarget {
            listing_throttled: true,
            ..FakeTarget::new(&["a"])
        });
        let mut scheduler = scheduler(target.clone(), settings(false), &clock);

        let report = scheduler.run_pass().await;

        assert!(report.throttled);
        assert!(target.calls().is_empty());
        assert_eq!(
            scheduler.state().next_run_at(),
            after(clock.now(), Duration::from_secs(300))
        );
    }

    #[tokio::test]
    async fn test_successful_pass_uses_default_interval() {
        let clock = ManualClock::new();
        let target = Arc::new(FakeTarget::new(&["a", "b"]));
        let mut scheduler = scheduler(target, settings(false), &clock);

        scheduler.run_pass().await;

        assert_eq!(
            scheduler.state().next_run_at(),
            after(clock.now(), Duration::from_secs(3600))
        );
    }

    fn expired_cooldown_scheduler(
        target: Arc<FakeTarget>,
        clock: &Arc<ManualClock>,
    ) -> RaiseScheduler {
        let mut state = RaiseState::new(clock.now());
        state.set_cooldown("a", after(clock.now(), Duration::from_secs(60)));
        let scheduler = scheduler(target, settings(false), clock).with_state(state);
        clock.advance(Duration::from_secs(120));
        scheduler
    }

    #[tokio::test]
    async fn test_expired_cooldown_is_dropped_when_raise_fails() {
        let clock = ManualClock::new();
        let target = Arc::new(
            FakeTarget::new(&["a"]).script("a", vec![Err(RaiseError::Other("500".to_owned()))]),
        );
        let mut scheduler = expired_cooldown_scheduler(target.clone(), &clock);

        scheduler.run_pass().await;

        assert_eq!(target.calls(), vec!["a"]);
        assert_eq!(scheduler.state().cooldown("a"), None);
        assert_eq!(
            scheduler.state().next_run_at(),
            after(clock.now(), Duration::from_secs(3600))
        );
    }

    #[tokio::test]
    async fn test_expired_cooldown_is_dropped_after_success() {
        let clock = ManualClock::new();
        let target = Arc::new(FakeTarget::new(&["a"]));
        let mut scheduler = expired_cooldown_scheduler(target.clone(), &clock);

        let report = scheduler.run_pass().await;

        assert_eq!(report.raised, 1);
        assert_eq!(scheduler.state().cooldown("a"), None);
        assert_eq!(
            scheduler.state().next_run_at(),
            after(clock.now(), Duration::from_secs(3600))
        );
    }

    #[tokio::test]
    async fn test_mixed_outcomes_keep_the_ceiling() {
        let clock = ManualClock::new();
        let target = Arc::new(
            FakeTarget::new(&["a", "b", "c"])
                .script("b", vec![Err(RaiseError::Other("unexpected body".to_owned()))])
                .script("c", vec![Err(RaiseError::Cooldown { wait: None })]),
        );
        let mut state = RaiseState::new(clock.now());
        for id in ["a", "b", "c"] {
            state.set_cooldown(id, after(clock.now(), Duration::from_secs(30)));
        }
        let mut scheduler = scheduler(target.clone(), settings(false), &clock).with_state(state);
        clock.advance(Duration::from_secs(45));

        let report = scheduler.run_pass().await;

        assert_eq!(target.calls(), vec!["a", "b", "c"]);
        assert_eq!(report.raised, 1);
        assert_eq!(report.deferred, vec!["c".to_owned()]);
        assert_eq!(scheduler.state().cooldown_count(), 0);
        assert_eq!(
            scheduler.state().next_run_at(),
            after(clock.now(), Duration::from_secs(3600))
        );
    }

    #[tokio::test]
    async fn test_pacing_between_attempts() {
        let clock = ManualClock::new();
        let sleeper = RecordingSleeper::new();
        let target = Arc::new(FakeTarget::new(&["a", "b", "c"]));
        let mut scheduler =
            RaiseScheduler::new(target, settings(false), clock.clone()).with_sleeper(sleeper.clone());

        scheduler.run_pass().await;

        // The first attempt of a pass goes out immediately.
        let delays = sleeper.delays();
        assert_eq!(delays.len(), 2);
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_vanished_categories_lose_cooldowns() {
        let clock = ManualClock::new();
        let mut state = RaiseState::new(clock.now());
        state.set_cooldown("gone", after(clock.now(), Duration::from_secs(60)));
        let target = Arc::new(FakeTarget::new(&["a"]));
        let mut scheduler = scheduler(target, settings(false), &clock).with_state(state);

        scheduler.run_pass().await;

        assert_eq!(scheduler.state().cooldown("gone"), None);
    }

    #[tokio::test]
    async fn test_state_is_persisted_and_restored() {
        let clock = ManualClock::new();
        let path = std::env::temp_dir().join(format!("autobot-scheduler-{}.json", std::process::id()));
        let settings = RaiseSettings {
            state_path: Some(path.clone()),
            ..settings(false)
        };
        let target = Arc::new(FakeTarget::new(&["a"]).script("a", vec![cooldown(900)]));

        let mut first = scheduler(target.clone(), settings.clone(), &clock);
        first.run_pass().await;
        let restored = scheduler(target, settings, &clock);
        std::fs::remove_file(&path).ok();

        assert_eq!(restored.state(), first.state());
    }

    #[tokio::test]
    async fn test_run_handles_trigger_and_shutdown() {
        let clock = ManualClock::new();
        let target = Arc::new(FakeTarget::new(&["a"]));
        let scheduler = scheduler(target.clone(), settings(false), &clock)
            .with_state(RaiseState::new(after(clock.now(), Duration::from_secs(3600))));
        let (tx, rx) = mpsc::channel(4);

        tx.send(SchedulerMessage::TriggerPass).await.unwrap();
        tx.send(SchedulerMessage::Shutdown).await.unwrap();
        scheduler.run(rx).await;

        assert_eq!(target.calls(), vec!["a"]);
    }
}
