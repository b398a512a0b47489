//! Handler traits and the bundles modules register them in.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;

use super::{Event, EventKind, LifecycleEvent, LifecycleKind};

/// Reacts to marketplace events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// Reacts to lifecycle events.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

struct EventFn<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventHandler for EventFn<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

struct LifecycleFn<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> LifecycleHandler for LifecycleFn<F>
where
    F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

/// Wraps a synchronous closure as an [`EventHandler`].
pub fn event_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(EventFn {
        name: name.into(),
        f,
    })
}

/// Wraps a synchronous closure as a [`LifecycleHandler`].
pub fn lifecycle_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn LifecycleHandler>
where
    F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(LifecycleFn {
        name: name.into(),
        f,
    })
}

/// Everything one module contributes to the registry, in both namespaces.
///
/// The bundle owns its handlers; the registry only holds clones of the
/// `Arc`s while the module is enabled.
#[derive(Clone, Default)]
pub struct HandlerBundle {
    pub(crate) lifecycle: Vec<(LifecycleKind, Arc<dyn LifecycleHandler>)>,
    pub(crate) domain: Vec<(EventKind, Arc<dyn EventHandler>)>,
}

impl HandlerBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a marketplace event binding.
    #[must_use]
    pub fn on_event(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.domain.push((kind, handler));
        self
    }

    /// Adds a lifecycle binding.
    #[must_use]
    pub fn on_lifecycle(mut self, kind: LifecycleKind, handler: Arc<dyn LifecycleHandler>) -> Self {
        self.lifecycle.push((kind, handler));
        self
    }

    /// This bundle's lifecycle handlers for `kind`, in declaration order.
    #[must_use]
    pub fn lifecycle_handlers(&self, kind: LifecycleKind) -> Vec<Arc<dyn LifecycleHandler>> {
        self.lifecycle
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }

    /// Total number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lifecycle.len() + self.domain.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBundle")
            .field("lifecycle", &self.lifecycle.len())
            .field("domain", &self.domain.len())
            .finish()
    }
}

/// Why a handler invocation did not complete normally.
#[derive(Debug, Error)]
pub enum HandlerFailure {
    #[error("{0:#}")]
    Error(anyhow::Error),

    #[error("panicked: {0}")]
    Panic(String),
}

/// Runs a handler future, converting both errors and panics into a
/// [`HandlerFailure`].
pub(crate) async fn guarded<F>(future: F) -> Result<(), HandlerFailure>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(HandlerFailure::Error(e)),
        Err(panic) => Err(HandlerFailure::Panic(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
