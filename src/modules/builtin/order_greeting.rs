//! Greets buyers on new orders and asks for a review once an order closes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{render_template, with_lifecycle_logging};
use crate::config::OrderGreetingConfig;
use crate::events::{Event, EventHandler, EventKind, EventPayload, HandlerBundle, Order, OrderStatus};
use crate::marketplace::ChatSender;
use crate::modules::{ModuleContext, ModuleFactory, ModuleInfo};

/// Factory for the order greeting module.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderGreeting;

impl OrderGreeting {
    pub const ID: &'static str = "order_greeting";
}

impl ModuleFactory for OrderGreeting {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(
            Self::ID,
            "Order greeting",
            env!("CARGO_PKG_VERSION"),
            "Thanks buyers for new orders and asks for reviews",
        )
    }

    fn build(&self, context: &ModuleContext) -> anyhow::Result<HandlerBundle> {
        let texts = context.config_snapshot().order_greeting;
        if texts.greeting.trim().is_empty() {
            anyhow::bail!("order greeting text is empty");
        }

        let handler = Arc::new(GreetingHandler {
            chat: Arc::clone(&context.chat),
            texts,
        });
        let bundle = HandlerBundle::new()
            .on_event(EventKind::NewOrder, handler.clone())
            .on_event(EventKind::OrderStatusChanged, handler);
        Ok(with_lifecycle_logging(bundle, Self::ID))
    }
}

struct GreetingHandler {
    chat: Arc<dyn ChatSender>,
    texts: OrderGreetingConfig,
}

impl GreetingHandler {
    async fn send(&self, template: &str, order: &Order) -> anyhow::Result<()> {
        let text = render_template(
            template,
            &[
                ("username", order.buyer.as_str()),
                ("order_id", order.order_id.as_str()),
                ("order_desc", order.description.as_str()),
            ],
        );
        self.chat.send_message(order.chat_id, &text).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for GreetingHandler {
    fn name(&self) -> &str {
        "order_greeting.notify"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        match &event.payload {
            EventPayload::NewOrder(order) => {
                self.send(&self.texts.greeting, order).await?;
                debug!(order = %order.order_id, "Buyer greeted");
            }
            EventPayload::OrderStatusChanged(order) if order.status == OrderStatus::Closed => {
                if let Some(request) = &self.texts.review_request {
                    self.send(request, order).await?;
                    debug!(order = %order.order_id, "Review requested");
                }
            }
            _ => {}
        }
        Ok(())
    }
}
