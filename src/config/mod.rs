//! Configuration module for the bot.
//!
//! Handles environment-driven settings, marketplace credentials, and the
//! `modules.json` file shared by the compiled-in modules.

mod modules;
mod settings;

pub use modules::{AutoReplyRule, ModulesConfig, OrderGreetingConfig, ValidationError, normalize_trigger};
pub use settings::{BotSettings, ConfigError, MarketplaceConfig};
