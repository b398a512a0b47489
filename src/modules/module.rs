//! Module descriptors and the catalog they are discovered from.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::config::ModulesConfig;
use crate::events::HandlerBundle;
use crate::marketplace::ChatSender;

/// Identity and metadata of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
}

impl ModuleInfo {
    #[must_use]
    pub fn new(id: &str, name: &str, version: &str, description: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
            description: description.to_owned(),
        }
    }
}

/// Where a module is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Found in the catalog, not built yet.
    Discovered,
    /// Built; handlers not registered.
    Loaded,
    /// Handlers registered.
    Enabled,
    /// Handlers retracted.
    Disabled,
    /// Could not be loaded; excluded from every further operation.
    Failed,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::Loaded => "loaded",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Collaborators handed to modules when they are built.
#[derive(Clone)]
pub struct ModuleContext {
    pub chat: Arc<dyn ChatSender>,
    pub config: Arc<RwLock<ModulesConfig>>,
}

impl ModuleContext {
    #[must_use]
    pub fn new(chat: Arc<dyn ChatSender>, config: Arc<RwLock<ModulesConfig>>) -> Self {
        Self { chat, config }
    }

    /// Copy of the current module configuration.
    #[must_use]
    pub fn config_snapshot(&self) -> ModulesConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext").finish_non_exhaustive()
    }
}

/// A compiled-in module definition.
///
/// `build` is called on load and again on every reload, so it must read
/// its settings from the context rather than caching them.
pub trait ModuleFactory: Send + Sync {
    fn info(&self) -> ModuleInfo;

    /// Creates a fresh set of handlers.
    fn build(&self, context: &ModuleContext) -> anyhow::Result<HandlerBundle>;
}

/// Ordered set of module definitions known to the process.
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: Vec<Arc<dyn ModuleFactory>>,
}

impl ModuleCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition.
    #[must_use]
    pub fn with(mut self, factory: Arc<dyn ModuleFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ModuleFactory>> {
        self.factories.iter()
    }

    /// Ids of every definition, in catalog order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.factories.iter().map(|f| f.info().id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("modules", &self.ids())
            .finish()
    }
}
