//! Marketplace Autobot Library
//!
//! An event-driven automation bot for a marketplace account.
//!
//! This crate provides the core functionality for:
//! - Polling the marketplace and dispatching typed events to handlers
//! - Hot-swappable modules that register and retract handler bundles
//! - A resilient HTTP layer that retries transient failures with backoff
//! - A rate-limited scheduler that raises listings category by category
//! - An admin console for toggling modules at runtime

pub mod clock;
pub mod commands;
pub mod config;
pub mod events;
pub mod http;
pub mod marketplace;
pub mod modules;
pub mod scheduler;

#[cfg(test)]
mod testing;
