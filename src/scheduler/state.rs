//! Raise scheduler state: the global next-run time and per-category cooldowns.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::until;

/// Persistent state that survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PersistentRaiseState {
    /// When the next pass is due.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Earliest retry time per category id.
    #[serde(default)]
    pub cooldowns: HashMap<String, DateTime<Utc>>,
}

impl PersistentRaiseState {
    /// Loads state from a JSON file, returns default if not found.
    pub fn load(path: impl AsRef<Path>) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Saves state to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

/// State of the raise scheduler. Owned by the scheduler's own task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaiseState {
    next_run_at: DateTime<Utc>,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl RaiseState {
    /// Fresh state: due immediately, no cooldowns.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            next_run_at: now,
            cooldowns: HashMap::new(),
        }
    }

    /// Creates state from persistent state loaded from disk.
    #[must_use]
    pub fn from_persistent(persistent: PersistentRaiseState, now: DateTime<Utc>) -> Self {
        Self {
            next_run_at: persistent.next_run_at.unwrap_or(now),
            cooldowns: persistent.cooldowns,
        }
    }

    /// Converts to persistent state for saving.
    #[must_use]
    pub fn to_persistent(&self) -> PersistentRaiseState {
        PersistentRaiseState {
            next_run_at: Some(self.next_run_at),
            cooldowns: self.cooldowns.clone(),
        }
    }

    #[must_use]
    pub const fn next_run_at(&self) -> DateTime<Utc> {
        self.next_run_at
    }

    /// Whether a pass is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_run_at
    }

    /// Time left until the next pass.
    #[must_use]
    pub fn time_until_due(&self, now: DateTime<Utc>) -> Duration {
        until(now, self.next_run_at)
    }

    /// Sets the next pass time.
    pub fn defer_until(&mut self, at: DateTime<Utc>) {
        self.next_run_at = at;
    }

    /// Whether `id` may be attempted at `now`.
    #[must_use]
    pub fn is_eligible(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns.get(id).is_none_or(|until| *until <= now)
    }

    #[must_use]
    pub fn cooldown(&self, id: &str) -> Option<DateTime<Utc>> {
        self.cooldowns.get(id).copied()
    }

    pub fn set_cooldown(&mut self, id: &str, until: DateTime<Utc>) {
        self.cooldowns.insert(id.to_owned(), until);
    }

    pub fn clear_cooldown(&mut self, id: &str) {
        self.cooldowns.remove(id);
    }

    /// Drops cooldowns for ids `keep` rejects (e.g. categories that no
    /// longer exist).
    pub fn retain_cooldowns(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.cooldowns.retain(|id, _| keep(id));
    }

    #[must_use]
    pub fn cooldown_count(&self) -> usize {
        self.cooldowns.len()
    }

    /// Pulls the next run forward to the earliest cooldown expiry, never
    /// earlier than `now`.
    pub fn settle(&mut self, now: DateTime<Utc>) {
        if let Some(earliest) = self.cooldowns.values().min() {
            self.next_run_at = self.next_run_at.min(*earliest);
        }
        self.next_run_at = self.next_run_at.max(now);
    }
}
