//! HTTP client for the marketplace JSON API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{ChatSender, MarketplaceError};
use crate::config::MarketplaceConfig;
use crate::events::{EventPayload, SourceError, UpdateFeed};
use crate::http::{HttpRequest, Method, ResilientClient};
use crate::scheduler::{Category, RaiseError, RaiseTarget};

/// How much of an error body is kept in error messages.
const ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct RunnerUpdates {
    #[serde(default)]
    events: Vec<EventPayload>,
}

#[derive(Debug, Deserialize)]
struct RaiseReply {
    raised: bool,
    #[serde(default)]
    wait_seconds: Option<u64>,
}

/// Marketplace account spoken to over HTTP.
pub struct HttpMarketplace {
    client: Arc<ResilientClient>,
    base_url: String,
    token: String,
}

impl HttpMarketplace {
    #[must_use]
    pub fn new(client: Arc<ResilientClient>, config: &MarketplaceConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> HttpRequest {
        HttpRequest::new(method, format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .header("authorization", format!("Bearer {}", self.token))
            .header("accept", "application/json")
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MarketplaceError> {
        let response = self.client.call(&self.request(Method::GET, path)).await?;
        if !response.is_success() {
            return Err(MarketplaceError::Status {
                status: response.status,
                body: truncate(&response.body, ERROR_BODY_CHARS),
            });
        }
        Ok(serde_json::from_str(&response.body)?)
    }

    /// Fetches pending updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is malformed.
    pub async fn updates(&self) -> Result<Vec<EventPayload>, MarketplaceError> {
        let updates: RunnerUpdates = self.get_json("runner").await?;
        Ok(updates.events)
    }

    /// Lists the categories the account has offers in.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is malformed.
    pub async fn list_categories(&self) -> Result<Vec<Category>, MarketplaceError> {
        self.get_json("categories").await
    }

    /// Raises all offers of one category.
    ///
    /// # Errors
    ///
    /// Returns [`RaiseError::Cooldown`] when the category cannot be raised
    /// yet, [`RaiseError::Throttled`] when the marketplace is still answering
    /// 429 after retries.
    pub async fn raise_category(&self, category: &Category) -> Result<(), RaiseError> {
        let path = format!("categories/{}/raise", category.id);
        let request = self.request(Method::POST, &path).json_body("{}");
        let response = self
            .client
            .call(&request)
            .await
            .map_err(|e| RaiseError::Other(e.to_string()))?;

        if response.status == 429 {
            return Err(RaiseError::Throttled);
        }

        match serde_json::from_str::<RaiseReply>(&response.body) {
            Ok(reply) if reply.raised && response.is_success() => {
                info!(category = %category.name, "Category raised");
                Ok(())
            }
            Ok(reply) if !reply.raised => Err(RaiseError::Cooldown {
                wait: reply.wait_seconds.map(Duration::from_secs),
            }),
            _ => Err(RaiseError::Other(format!(
                "unexpected raise response {}: {}",
                response.status,
                truncate(&response.body, ERROR_BODY_CHARS)
            ))),
        }
    }
}

#[async_trait]
impl ChatSender for HttpMarketplace {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), MarketplaceError> {
        let body = serde_json::json!({ "text": text }).to_string();
        let request = self
            .request(Method::POST, &format!("chats/{chat_id}/messages"))
            .json_body(body);
        let response = self.client.call(&request).await?;

        if !response.is_success() {
            return Err(MarketplaceError::Status {
                status: response.status,
                body: truncate(&response.body, ERROR_BODY_CHARS),
            });
        }

        debug!(chat_id, "Message sent");
        Ok(())
    }
}

#[async_trait]
impl UpdateFeed for HttpMarketplace {
    async fn fetch_updates(&self) -> Result<Vec<EventPayload>, SourceError> {
        self.updates()
            .await
            .map_err(|e| SourceError::Poll(e.to_string()))
    }
}

#[async_trait]
impl RaiseTarget for HttpMarketplace {
    async fn categories(&self) -> Result<Vec<Category>, RaiseError> {
        match self.list_categories().await {
            Ok(categories) => Ok(categories),
            Err(MarketplaceError::Status { status: 429, .. }) => Err(RaiseError::Throttled),
            Err(e) => Err(RaiseError::Other(e.to_string())),
        }
    }

    async fn raise(&self, category: &Category) -> Result<(), RaiseError> {
        self.raise_category(category).await
    }
}

impl std::fmt::Debug for HttpMarketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMarketplace")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Truncates a string for error messages.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
