//! Marketplace boundary.
//!
//! The bot talks to the marketplace through a small JSON API; every call
//! goes through the [`crate::http::ResilientClient`].

mod client;

use async_trait::async_trait;
use thiserror::Error;

use crate::http::TransportError;

pub use client::HttpMarketplace;

/// Errors returned by marketplace calls.
#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Marketplace answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed marketplace response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Sends chat messages on behalf of the account.
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), MarketplaceError>;
}
