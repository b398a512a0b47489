//! Module configuration (`modules.json`) and validation.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or validating module configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Auto-reply rule at index {index} has no triggers")]
    NoTriggers { index: usize },

    #[error("Auto-reply rule at index {index} has an empty trigger")]
    EmptyTrigger { index: usize },

    #[error("Auto-reply rule at index {index} has an empty response")]
    EmptyResponse { index: usize },

    #[error("Trigger '{trigger}' is used by more than one auto-reply rule")]
    DuplicateTrigger { trigger: String },

    #[error("Order greeting text is empty")]
    EmptyGreeting,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Answers a chat message whose text matches one of `triggers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoReplyRule {
    /// Texts that trigger this rule (matched case-insensitively, trimmed).
    pub triggers: Vec<String>,

    /// Reply template. Supports `$username` and `$chat_id`.
    pub response: String,
}

impl AutoReplyRule {
    #[must_use]
    pub fn new(triggers: &[&str], response: &str) -> Self {
        Self {
            triggers: triggers.iter().map(|t| (*t).to_owned()).collect(),
            response: response.to_owned(),
        }
    }
}

/// Texts sent by the order greeting module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderGreetingConfig {
    /// Sent to the buyer when a new order arrives. Supports `$username`,
    /// `$order_id` and `$order_desc`.
    pub greeting: String,

    /// Sent when an order is closed; `None` disables the review request.
    #[serde(default)]
    pub review_request: Option<String>,
}

impl Default for OrderGreetingConfig {
    fn default() -> Self {
        Self {
            greeting: "Thank you for your order #$order_id, $username! I'll be with you shortly."
                .to_owned(),
            review_request: Some(
                "Order #$order_id is complete. A review would be much appreciated!".to_owned(),
            ),
        }
    }
}

/// Configuration shared by the compiled-in modules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModulesConfig {
    /// Ids of modules that stay disabled across restarts.
    #[serde(default)]
    pub disabled: BTreeSet<String>,

    #[serde(default)]
    pub auto_reply: Vec<AutoReplyRule>,

    #[serde(default)]
    pub order_greeting: OrderGreetingConfig,
}

impl ModulesConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ValidationError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.validate_all().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Returns every validation problem, in file order.
    #[must_use]
    pub fn validate_all(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen_triggers = HashSet::new();

        for (index, rule) in self.auto_reply.iter().enumerate() {
            if rule.triggers.is_empty() {
                errors.push(ValidationError::NoTriggers { index });
            }

            for trigger in &rule.triggers {
                let normalized = normalize_trigger(trigger);
                if normalized.is_empty() {
                    errors.push(ValidationError::EmptyTrigger { index });
                } else if !seen_triggers.insert(normalized.clone()) {
                    errors.push(ValidationError::DuplicateTrigger {
                        trigger: normalized,
                    });
                }
            }

            if rule.response.trim().is_empty() {
                errors.push(ValidationError::EmptyResponse { index });
            }
        }

        if self.order_greeting.greeting.trim().is_empty() {
            errors.push(ValidationError::EmptyGreeting);
        }

        errors
    }

    /// Disabled ids that are not in `known`.
    #[must_use]
    pub fn unknown_disabled(&self, known: &[&str]) -> Vec<String> {
        self.disabled
            .iter()
            .filter(|id| !known.contains(&id.as_str()))
            .cloned()
            .collect()
    }

    /// Whether a module is marked disabled.
    #[must_use]
    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled.contains(id)
    }

    /// Records a module's enabled state. Returns whether anything changed.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        if enabled {
            self.disabled.remove(id)
        } else {
            self.disabled.insert(id.to_owned())
        }
    }

    /// Creates an example configuration for users to reference.
    #[must_use]
    pub fn example() -> Self {
        Self {
            disabled: BTreeSet::new(),
            auto_reply: vec![
                AutoReplyRule::new(
                    &["hi", "hello"],
                    "Hello, $username! Place an order and I'll deliver within minutes.",
                ),
                AutoReplyRule::new(&["!support"], "A human will answer you soon."),
            ],
            order_greeting: OrderGreetingConfig::default(),
        }
    }
}

/// Canonical form used to match triggers.
#[must_use]
pub fn normalize_trigger(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_is_valid() {
        assert!(ModulesConfig::example().validate().is_ok());
    }

    #[test]
    fn test_missing_sections_default() {
        let config: ModulesConfig = serde_json::from_str("{}").unwrap();
        assert!(config.disabled.is_empty());
        assert!(config.auto_reply.is_empty());
        assert_eq!(config.order_greeting, OrderGreetingConfig::default());
    }

    #[test]
    fn test_validation_duplicate_trigger_is_case_insensitive() {
        let config = ModulesConfig {
            auto_reply: vec![
                AutoReplyRule::new(&["Hello"], "one"),
                AutoReplyRule::new(&[" hello "], "two"),
            ],
            ..ModulesConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateTrigger { trigger }) if trigger == "hello"
        ));
    }

    #[test]
    fn test_validate_all_collects_every_problem() {
        let config = ModulesConfig {
            auto_reply: vec![
                AutoReplyRule::new(&[], "orphan"),
                AutoReplyRule::new(&["  "], " "),
            ],
            order_greeting: OrderGreetingConfig {
                greeting: String::new(),
                review_request: None,
            },
            ..ModulesConfig::default()
        };
        let errors = config.validate_all();
        assert_eq!(errors.len(), 4);
        assert!(matches!(errors[0], ValidationError::NoTriggers { index: 0 }));
        assert!(matches!(errors[3], ValidationError::EmptyGreeting));
    }

    #[test]
    fn test_set_enabled_tracks_disabled_ids() {
        let mut config = ModulesConfig::default();
        assert!(config.set_enabled("stats", false));
        assert!(!config.set_enabled("stats", false));
        assert!(config.is_disabled("stats"));
        assert!(config.set_enabled("stats", true));
        assert!(!config.is_disabled("stats"));
    }

    #[test]
    fn test_unknown_disabled() {
        let mut config = ModulesConfig::default();
        config.set_enabled("stats", false);
        config.set_enabled("ghost", false);
        assert_eq!(config.unknown_disabled(&["stats"]), vec!["ghost".to_owned()]);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!("autobot-modules-{}.json", std::process::id()));
        let mut config = ModulesConfig::example();
        config.set_enabled("auto_reply", false);
        config.save_to_file(&path).unwrap();

        let loaded = ModulesConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
