//! Event data model.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of marketplace events handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ChatsListChanged,
    NewMessage,
    NewOrder,
    OrderStatusChanged,
}

impl EventKind {
    /// All variants, for iteration.
    pub const ALL: &'static [Self] = &[
        Self::ChatsListChanged,
        Self::NewMessage,
        Self::NewOrder,
        Self::OrderStatusChanged,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Kinds of bot and module lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleKind {
    /// Process-wide: every module has been connected.
    Init,
    /// Process-wide: the dispatch loop is about to poll.
    Start,
    /// Per module: connected at startup.
    Connected,
    /// Per module: enabled.
    Enabled,
    /// Per module: disabled.
    Disabled,
    /// Per module: reloaded from its definition.
    Reloaded,
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Paid,
    Closed,
    Refunded,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Paid => "paid",
            Self::Closed => "closed",
            Self::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

/// A chat message seen by the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub author: String,
    #[serde(default)]
    pub author_id: i64,
    pub text: String,
    /// Sent by this account (including by the bot itself).
    #[serde(default)]
    pub by_bot: bool,
}

/// An order as reported by the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub chat_id: i64,
    pub buyer: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_amount")]
    pub amount: u32,
    pub price: f64,
    pub status: OrderStatus,
}

fn default_amount() -> u32 {
    1
}

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: i64,
    pub name: String,
    #[serde(default)]
    pub last_message: String,
}

/// Kind-specific event data, as delivered by the update feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ChatsListChanged { chats: Vec<ChatSummary> },
    NewMessage(ChatMessage),
    NewOrder(Order),
    OrderStatusChanged(Order),
}

impl EventPayload {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ChatsListChanged { .. } => EventKind::ChatsListChanged,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::NewOrder(_) => EventKind::NewOrder,
            Self::OrderStatusChanged(_) => EventKind::OrderStatusChanged,
        }
    }

    /// Identity used to avoid processing the same occurrence twice.
    ///
    /// Status changes include the new status, so an order moving through
    /// several states yields one event per state.
    #[must_use]
    pub fn identity(&self) -> String {
        match self {
            Self::ChatsListChanged { chats } => {
                let mut hasher = DefaultHasher::new();
                chats.hash(&mut hasher);
                format!("chats:{:016x}", hasher.finish())
            }
            Self::NewMessage(message) => format!("message:{}", message.message_id),
            Self::NewOrder(order) => format!("order:{}", order.order_id),
            Self::OrderStatusChanged(order) => {
                format!("order:{}:{}", order.order_id, order.status)
            }
        }
    }
}

/// Something that happened on the marketplace. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub payload: EventPayload,
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// Wraps a payload, stamping it with the current time.
    #[must_use]
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    #[must_use]
    pub fn identity(&self) -> String {
        self.payload.identity()
    }
}

/// A lifecycle notification, optionally scoped to one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub module_id: Option<String>,
}

impl LifecycleEvent {
    /// A process-wide lifecycle event.
    #[must_use]
    pub const fn global(kind: LifecycleKind) -> Self {
        Self {
            kind,
            module_id: None,
        }
    }

    /// A lifecycle event concerning one module.
    #[must_use]
    pub fn for_module(kind: LifecycleKind, module_id: &str) -> Self {
        Self {
            kind,
            module_id: Some(module_id.to_owned()),
        }
    }
}
