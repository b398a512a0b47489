//! Event pipeline.
//!
//! Marketplace updates become typed [`Event`]s, handlers subscribe to
//! event kinds through the [`HandlerRegistry`], and the [`EventDispatcher`]
//! drives events from an [`EventSource`] to those handlers.

mod dispatcher;
mod handler;
mod registry;
mod source;
mod types;

pub(crate) use dispatcher::notify_lifecycle;
pub use dispatcher::{DispatchReport, EventDispatcher};
pub use handler::{
    EventHandler, HandlerBundle, HandlerFailure, LifecycleHandler, event_fn, lifecycle_fn,
};
pub use registry::{HandlerRegistry, Namespace, RegistrationToken};
pub use source::{EventSource, PollingEventSource, SourceError, UpdateFeed};
pub use types::{
    ChatMessage, ChatSummary, Event, EventKind, EventPayload, LifecycleEvent, LifecycleKind, Order,
    OrderStatus,
};
