//! Replies to chat messages that match a configured trigger.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tracing::debug;

use super::{render_template, with_lifecycle_logging};
use crate::config::normalize_trigger;
use crate::events::{Event, EventHandler, EventKind, EventPayload, HandlerBundle};
use crate::marketplace::ChatSender;
use crate::modules::{ModuleContext, ModuleFactory, ModuleInfo};

/// Factory for the auto-reply module.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoReply;

impl AutoReply {
    pub const ID: &'static str = "auto_reply";
}

impl ModuleFactory for AutoReply {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(
            Self::ID,
            "Auto reply",
            env!("CARGO_PKG_VERSION"),
            "Answers chat messages that match configured triggers",
        )
    }

    fn build(&self, context: &ModuleContext) -> anyhow::Result<HandlerBundle> {
        let config = context.config_snapshot();
        let mut replies = HashMap::new();

        for (index, rule) in config.auto_reply.iter().enumerate() {
            if rule.response.trim().is_empty() {
                bail!("auto-reply rule {index} has an empty response");
            }
            for trigger in &rule.triggers {
                let trigger = normalize_trigger(trigger);
                if trigger.is_empty() {
                    bail!("auto-reply rule {index} has an empty trigger");
                }
                replies.entry(trigger).or_insert_with(|| rule.response.clone());
            }
        }

        let handler = Arc::new(AutoReplyHandler {
            chat: Arc::clone(&context.chat),
            replies,
        });
        Ok(with_lifecycle_logging(
            HandlerBundle::new().on_event(EventKind::NewMessage, handler),
            Self::ID,
        ))
    }
}

struct AutoReplyHandler {
    chat: Arc<dyn ChatSender>,
    /// Normalized trigger -> response template.
    replies: HashMap<String, String>,
}

#[async_trait]
impl EventHandler for AutoReplyHandler {
    fn name(&self) -> &str {
        "auto_reply.reply"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let EventPayload::NewMessage(message) = &event.payload else {
            return Ok(());
        };
        if message.by_bot {
            return Ok(());
        }

        let Some(template) = self.replies.get(&normalize_trigger(&message.text)) else {
            return Ok(());
        };

        let chat_id = message.chat_id.to_string();
        let reply = render_template(
            template,
            &[("username", message.author.as_str()), ("chat_id", chat_id.as_str())],
        );
        self.chat.send_message(message.chat_id, &reply).await?;
        debug!(chat_id = message.chat_id, "Auto-reply sent");
        Ok(())
    }
}
