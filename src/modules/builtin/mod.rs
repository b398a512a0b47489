//! Modules shipped with the bot.

mod auto_reply;
mod order_greeting;
mod stats;

use std::sync::Arc;

use tracing::info;

use super::ModuleCatalog;
use crate::events::{HandlerBundle, LifecycleKind, lifecycle_fn};

pub use auto_reply::AutoReply;
pub use order_greeting::OrderGreeting;
pub use stats::{Stats, StatsCounters, StatsSnapshot};

/// Ids of the built-in modules, in catalog order.
pub const KNOWN_MODULE_IDS: &[&str] = &[AutoReply::ID, OrderGreeting::ID, Stats::ID];

/// Catalog of every built-in module.
#[must_use]
pub fn catalog(stats: Arc<StatsCounters>) -> ModuleCatalog {
    ModuleCatalog::new()
        .with(Arc::new(AutoReply))
        .with(Arc::new(OrderGreeting))
        .with(Arc::new(Stats::new(stats)))
}

/// Adds hooks that log the module's lifecycle transitions.
fn with_lifecycle_logging(bundle: HandlerBundle, module: &'static str) -> HandlerBundle {
    [
        LifecycleKind::Connected,
        LifecycleKind::Enabled,
        LifecycleKind::Disabled,
        LifecycleKind::Reloaded,
    ]
    .into_iter()
    .fold(bundle, |bundle, kind| {
        bundle.on_lifecycle(
            kind,
            lifecycle_fn(format!("{module}.lifecycle"), move |event| {
                info!(module, event = %event.kind, "Module lifecycle");
                Ok(())
            }),
        )
    })
}

/// Substitutes `$name` placeholders in one scan over the template, so
/// substituted values are never expanded again. At each `$` the longest
/// matching name wins, so `$order_id` is not read as `$order`.
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let matched = vars
            .iter()
            .filter(|(name, _)| !name.is_empty() && after.starts_with(name))
            .max_by_key(|(name, _)| name.len());

        match matched {
            Some((name, value)) => {
                out.push_str(value);
                rest = &after[name.len()..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
