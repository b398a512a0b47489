//! Module lifecycle manager.
//!
//! States: `Discovered -> Loaded -> Enabled <-> Disabled`, with reload
//! tearing a module down and building it again. A module that fails to
//! load is `Failed` and refuses every further operation.
//!
//! A module's handlers are in the registry if and only if it is
//! `Enabled`. Registration and retraction go through
//! [`HandlerRegistry::bulk_register`] / [`HandlerRegistry::bulk_unregister`]
//! so the dispatcher never sees half a module. Bundles are ranked by
//! catalog position, so re-enabling restores the original order.
//!
//! The module's own lifecycle hooks run after the manager lock is released;
//! their failures are logged and never fail the operation.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{ModuleCatalog, ModuleContext, ModuleFactory, ModuleInfo, ModuleState};
use crate::events::{
    HandlerBundle, HandlerRegistry, LifecycleEvent, LifecycleHandler, LifecycleKind, notify_lifecycle,
};

/// Errors returned by module operations.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module '{0}' not found")]
    NotFound(String),

    #[error("Module '{id}' failed to load: {reason}")]
    LoadFailed { id: String, reason: String },

    #[error("Module '{id}' is in a failed state: {reason}")]
    Failed { id: String, reason: String },
}

/// Displayable view of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub info: ModuleInfo,
    pub state: ModuleState,
    /// Number of handler bindings the module contributes.
    pub handlers: usize,
    /// Last load error, if any.
    pub error: Option<String>,
}

/// Outcome of [`ModuleManager::connect_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectReport {
    pub enabled: Vec<String>,
    /// Left disabled because the configuration says so.
    pub skipped: Vec<String>,
    /// Modules that could not be enabled, with the reason.
    pub failed: Vec<(String, String)>,
}

struct ModuleEntry {
    factory: Arc<dyn ModuleFactory>,
    /// Catalog position; keeps handler order stable across toggles.
    rank: u64,
    info: ModuleInfo,
    state: ModuleState,
    bundle: Option<HandlerBundle>,
    error: Option<String>,
}

impl ModuleEntry {
    fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            info: self.info.clone(),
            state: self.state,
            handlers: self.bundle.as_ref().map_or(0, HandlerBundle::len),
            error: self.error.clone(),
        }
    }

    fn hooks(&self, kind: LifecycleKind) -> Vec<Arc<dyn LifecycleHandler>> {
        self.bundle
            .as_ref()
            .map(|bundle| bundle.lifecycle_handlers(kind))
            .unwrap_or_default()
    }

    fn failed(&self) -> ModuleError {
        ModuleError::Failed {
            id: self.info.id.clone(),
            reason: self.error.clone().unwrap_or_default(),
        }
    }
}

/// Lifecycle hooks collected under the lock and run after it is released.
#[derive(Default)]
struct PendingHooks(Vec<(Vec<Arc<dyn LifecycleHandler>>, LifecycleEvent)>);

impl PendingHooks {
    fn push(&mut self, handlers: Vec<Arc<dyn LifecycleHandler>>, kind: LifecycleKind, module_id: &str) {
        if !handlers.is_empty() {
            self.0.push((handlers, LifecycleEvent::for_module(kind, module_id)));
        }
    }

    async fn run(self) {
        for (handlers, event) in self.0 {
            notify_lifecycle(&handlers, &event).await;
        }
    }
}

/// Owns the modules and keeps the registry in step with their states.
pub struct ModuleManager {
    registry: Arc<HandlerRegistry>,
    catalog: ModuleCatalog,
    context: ModuleContext,
    modules: Mutex<Vec<ModuleEntry>>,
}

impl ModuleManager {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, catalog: ModuleCatalog, context: ModuleContext) -> Self {
        Self {
            registry,
            catalog,
            context,
            modules: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ModuleEntry>> {
        self.modules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Builds every module in the catalog.
    ///
    /// A module whose metadata is invalid or whose build fails is marked
    /// `Failed`; the others load regardless. Modules enabled by an earlier
    /// call are retracted first.
    pub fn load_all(&self) -> Vec<ModuleSummary> {
        let mut modules = self.lock();

        for entry in modules.iter().filter(|e| e.state == ModuleState::Enabled) {
            if let Some(bundle) = &entry.bundle {
                self.registry.bulk_unregister(bundle);
            }
        }
        modules.clear();

        for (rank, factory) in (0..).zip(self.catalog.iter()) {
            let info = factory.info();
            let mut entry = ModuleEntry {
                factory: Arc::clone(factory),
                rank,
                info,
                state: ModuleState::Discovered,
                bundle: None,
                error: None,
            };

            let problem = if entry.info.id.trim().is_empty() {
                Some("module id is empty".to_owned())
            } else if modules.iter().any(|m| m.info.id == entry.info.id) {
                Some("duplicate module id".to_owned())
            } else {
                None
            };

            match problem {
                Some(reason) => {
                    error!(module = %entry.info.id, %reason, "Invalid module metadata");
                    entry.state = ModuleState::Failed;
                    entry.error = Some(reason);
                }
                None => match entry.factory.build(&self.context) {
                    Ok(bundle) => {
                        debug!(module = %entry.info.id, handlers = bundle.len(), "Module loaded");
                        entry.state = ModuleState::Loaded;
                        entry.bundle = Some(bundle);
                    }
                    Err(e) => {
                        error!(module = %entry.info.id, error = %format!("{e:#}"), "Failed to load module");
                        entry.state = ModuleState::Failed;
                        entry.error = Some(format!("{e:#}"));
                    }
                },
            }

            modules.push(entry);
        }

        let loaded = modules
            .iter()
            .filter(|m| m.state == ModuleState::Loaded)
            .count();
        info!(loaded, total = modules.len(), "Modules loaded");
        modules.iter().map(ModuleEntry::summary).collect()
    }

    /// Enables every loaded module not listed in `disabled`, then fires
    /// each enabled module's connected hooks and the process-wide `Init`.
    pub async fn connect_all(&self, disabled: &BTreeSet<String>) -> ConnectReport {
        let mut report = ConnectReport::default();
        let mut pending = PendingHooks::default();
        let mut connected = Vec::new();

        {
            let mut modules = self.lock();
            for entry in modules.iter_mut() {
                let id = entry.info.id.clone();
                match entry.state {
                    ModuleState::Failed => {
                        warn!(module = %id, "Skipping failed module");
                        report
                            .failed
                            .push((id, entry.error.clone().unwrap_or_default()));
                    }
                    _ if disabled.contains(&id) => {
                        debug!(module = %id, "Module disabled by configuration");
                        if entry.state == ModuleState::Loaded {
                            entry.state = ModuleState::Disabled;
                        }
                        report.skipped.push(id);
                    }
                    _ => {
                        if self.enable_entry(entry, &mut pending) {
                            info!(module = %id, "Module enabled");
                        }
                        connected.push(entry.hooks(LifecycleKind::Connected));
                        report.enabled.push(id);
                    }
                }
            }
        }

        pending.run().await;

        for (handlers, id) in connected.into_iter().zip(&report.enabled) {
            notify_lifecycle(&handlers, &LifecycleEvent::for_module(LifecycleKind::Connected, id)).await;
        }

        let init = self.registry.lifecycle_snapshot(LifecycleKind::Init);
        notify_lifecycle(&init, &LifecycleEvent::global(LifecycleKind::Init)).await;

        info!(
            enabled = report.enabled.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Modules connected"
        );
        report
    }

    /// Registers a module's handlers. Returns `Ok(false)` if it was already
    /// enabled.
    pub async fn enable(&self, id: &str) -> Result<bool, ModuleError> {
        let mut pending = PendingHooks::default();
        let changed = {
            let mut modules = self.lock();
            let entry = find(&mut modules, id)?;
            if entry.state == ModuleState::Failed {
                return Err(entry.failed());
            }
            self.enable_entry(entry, &mut pending)
        };

        pending.run().await;
        if changed {
            info!(module = id, "Module enabled");
        }
        Ok(changed)
    }

    /// Retracts a module's handlers. Returns `Ok(false)` if it was not
    /// enabled.
    pub async fn disable(&self, id: &str) -> Result<bool, ModuleError> {
        let mut pending = PendingHooks::default();
        let changed = {
            let mut modules = self.lock();
            let entry = find(&mut modules, id)?;
            if entry.state == ModuleState::Failed {
                return Err(entry.failed());
            }
            self.disable_entry(entry, &mut pending)
        };

        pending.run().await;
        if changed {
            info!(module = id, "Module disabled");
        }
        Ok(changed)
    }

    /// Disables a module, builds it again and enables the fresh build.
    ///
    /// If the build fails the module stays `Disabled` with its previous
    /// handlers kept aside, and the error is returned.
    pub async fn reload(&self, id: &str) -> Result<(), ModuleError> {
        let mut pending = PendingHooks::default();
        let result = {
            let mut modules = self.lock();
            let entry = find(&mut modules, id)?;
            if entry.state == ModuleState::Failed {
                return Err(entry.failed());
            }

            self.disable_entry(entry, &mut pending);
            match entry.factory.build(&self.context) {
                Ok(bundle) => {
                    entry.bundle = Some(bundle);
                    entry.state = ModuleState::Loaded;
                    entry.error = None;
                    pending.push(entry.hooks(LifecycleKind::Reloaded), LifecycleKind::Reloaded, id);
                    self.enable_entry(entry, &mut pending);
                    Ok(())
                }
                Err(e) => {
                    let reason = format!("{e:#}");
                    entry.state = ModuleState::Disabled;
                    entry.error = Some(reason.clone());
                    Err(ModuleError::LoadFailed {
                        id: id.to_owned(),
                        reason,
                    })
                }
            }
        };

        pending.run().await;
        match &result {
            Ok(()) => info!(module = id, "Module reloaded"),
            Err(e) => error!(module = id, error = %e, "Module reload failed, left disabled"),
        }
        result
    }

    /// Summaries of every module, in catalog order.
    #[must_use]
    pub fn summaries(&self) -> Vec<ModuleSummary> {
        self.lock().iter().map(ModuleEntry::summary).collect()
    }

    /// Summary of one module.
    #[must_use]
    pub fn summary(&self, id: &str) -> Option<ModuleSummary> {
        self.lock()
            .iter()
            .find(|m| m.info.id == id)
            .map(ModuleEntry::summary)
    }

    fn enable_entry(&self, entry: &mut ModuleEntry, pending: &mut PendingHooks) -> bool {
        if entry.state == ModuleState::Enabled {
            return false;
        }
        let Some(bundle) = &entry.bundle else {
            return false;
        };

        self.registry.bulk_register_ranked(bundle, entry.rank);
        entry.state = ModuleState::Enabled;
        pending.push(entry.hooks(LifecycleKind::Enabled), LifecycleKind::Enabled, &entry.info.id);
        true
    }

    fn disable_entry(&self, entry: &mut ModuleEntry, pending: &mut PendingHooks) -> bool {
        if entry.state != ModuleState::Enabled {
            return false;
        }
        if let Some(bundle) = &entry.bundle {
            let removed = self.registry.bulk_unregister(bundle);
            debug!(module = %entry.info.id, removed, "Module handlers retracted");
        }
        entry.state = ModuleState::Disabled;
        pending.push(entry.hooks(LifecycleKind::Disabled), LifecycleKind::Disabled, &entry.info.id);
        true
    }
}

fn find<'a>(modules: &'a mut [ModuleEntry], id: &str) -> Result<&'a mut ModuleEntry, ModuleError> {
    modules
        .iter_mut()
        .find(|m| m.info.id == id)
        .ok_or_else(|| ModuleError::NotFound(id.to_owned()))
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::config::ModulesConfig;
    use crate::events::{
        EventDispatcher, EventKind, EventPayload, Order, OrderStatus, Event, event_fn, lifecycle_fn,
    };
    use crate::testing::RecordingChat;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Module that logs every event it sees and every hook it gets.
    struct TestModule {
        id: &'static str,
        log: Log,
        broken: Arc<AtomicBool>,
    }

    impl TestModule {
        fn new(id: &'static str, log: &Log) -> Self {
            Self {
                id,
                log: Arc::clone(log),
                broken: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl ModuleFactory for TestModule {
        fn info(&self) -> ModuleInfo {
            ModuleInfo::new(self.id, self.id, "1.0.0", "test module")
        }

        fn build(&self, _context: &ModuleContext) -> anyhow::Result<HandlerBundle> {
            if self.broken.load(Ordering::SeqCst) {
                anyhow::bail!("definition is broken");
            }
            let id = self.id;
            let events = Arc::clone(&self.log);
            let hooks = Arc::clone(&self.log);
            Ok(HandlerBundle::new()
                .on_event(
                    EventKind::NewOrder,
                    event_fn(id, move |_| {
                        events.lock().unwrap().push(id.to_owned());
                        Ok(())
                    }),
                )
                .on_lifecycle(
                    LifecycleKind::Enabled,
                    lifecycle_fn(id, move |event| {
                        hooks.lock().unwrap().push(format!("{}:{}", event.kind, id));
                        Ok(())
                    }),
                ))
        }
    }

    struct FailingModule;

    impl ModuleFactory for FailingModule {
        fn info(&self) -> ModuleInfo {
            ModuleInfo::new("failing", "Failing", "0.1.0", "never loads")
        }

        fn build(&self, _context: &ModuleContext) -> anyhow::Result<HandlerBundle> {
            anyhow::bail!("missing dependency")
        }
    }

    fn context() -> ModuleContext {
        ModuleContext::new(RecordingChat::new(), Arc::new(RwLock::new(ModulesConfig::default())))
    }

    fn manager(catalog: ModuleCatalog) -> ModuleManager {
        ModuleManager::new(Arc::new(HandlerRegistry::new()), catalog, context())
    }

    fn order_event() -> Event {
        Event::new(EventPayload::NewOrder(Order {
            order_id: "A1".to_owned(),
            chat_id: 1,
            buyer: "eve".to_owned(),
            description: String::new(),
            amount: 1,
            price: 1.0,
            status: OrderStatus::Paid,
        }))
    }

    #[tokio::test]
    async fn test_enable_is_idempotent() {
        let log: Log = Arc::default();
        let manager = manager(ModuleCatalog::new().with(Arc::new(TestModule::new("a", &log))));
        manager.load_all();

        assert!(manager.enable("a").await.unwrap());
        assert!(!manager.enable("a").await.unwrap());

        assert_eq!(manager.registry().domain_handler_names(EventKind::NewOrder), vec!["a"]);
        assert_eq!(*log.lock().unwrap(), vec!["Enabled:a"]);
    }

    #[tokio::test]
    async fn test_enable_disable_enable_restores_handler_set() {
        let log: Log = Arc::default();
        let manager = manager(ModuleCatalog::new().with(Arc::new(TestModule::new("a", &log))));
        manager.load_all();

        manager.enable("a").await.unwrap();
        let registered = manager.registry().len();
        assert_eq!(registered, 2);

        assert!(manager.disable("a").await.unwrap());
        assert!(manager.registry().is_empty());
        assert!(!manager.disable("a").await.unwrap());

        manager.enable("a").await.unwrap();
        assert_eq!(manager.registry().len(), registered);
        assert_eq!(manager.summary("a").unwrap().state, ModuleState::Enabled);
    }

    #[tokio::test]
    async fn test_unknown_module_is_not_found() {
        let manager = manager(ModuleCatalog::new());
        manager.load_all();

        assert!(matches!(manager.enable("ghost").await, Err(ModuleError::NotFound(id)) if id == "ghost"));
        assert!(matches!(manager.disable("ghost").await, Err(ModuleError::NotFound(_))));
        assert!(matches!(manager.reload("ghost").await, Err(ModuleError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_failure_is_isolated() {
        let log: Log = Arc::default();
        let manager = manager(
            ModuleCatalog::new()
                .with(Arc::new(FailingModule))
                .with(Arc::new(TestModule::new("a", &log))),
        );

        let summaries = manager.load_all();
        assert_eq!(summaries[0].state, ModuleState::Failed);
        assert_eq!(summaries[0].error.as_deref(), Some("missing dependency"));
        assert_eq!(summaries[1].state, ModuleState::Loaded);

        let report = manager.connect_all(&BTreeSet::new()).await;
        assert_eq!(report.enabled, vec!["a"]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(manager.enable("failing").await, Err(ModuleError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_id_fails_second_definition() {
        let log: Log = Arc::default();
        let manager = manager(
            ModuleCatalog::new()
                .with(Arc::new(TestModule::new("a", &log)))
                .with(Arc::new(TestModule::new("a", &log))),
        );

        let summaries = manager.load_all();
        assert_eq!(summaries[0].state, ModuleState::Loaded);
        assert_eq!(summaries[1].state, ModuleState::Failed);
    }

    #[tokio::test]
    async fn test_failed_reload_leaves_module_disabled() {
        let log: Log = Arc::default();
        let module = TestModule::new("a", &log);
        let broken = Arc::clone(&module.broken);
        let manager = manager(ModuleCatalog::new().with(Arc::new(module)));
        manager.load_all();
        manager.enable("a").await.unwrap();

        broken.store(true, Ordering::SeqCst);
        let result = manager.reload("a").await;

        assert!(matches!(result, Err(ModuleError::LoadFailed { .. })));
        assert_eq!(manager.summary("a").unwrap().state, ModuleState::Disabled);
        assert!(manager.registry().is_empty());

        broken.store(false, Ordering::SeqCst);
        manager.reload("a").await.unwrap();
        assert_eq!(manager.summary("a").unwrap().state, ModuleState::Enabled);
        assert_eq!(manager.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_reload_replaces_handlers() {
        let log: Log = Arc::default();
        let manager = manager(ModuleCatalog::new().with(Arc::new(TestModule::new("a", &log))));
        manager.load_all();
        manager.enable("a").await.unwrap();
        let before = manager.registry().domain_snapshot(EventKind::NewOrder);

        manager.reload("a").await.unwrap();
        let after = manager.registry().domain_snapshot(EventKind::NewOrder);

        assert_eq!(after.len(), 1);
        assert!(!std::ptr::addr_eq(Arc::as_ptr(&before[0]), Arc::as_ptr(&after[0])));
    }

    #[tokio::test]
    async fn test_connect_all_honours_disabled_list_and_fires_init_last() {
        let log: Log = Arc::default();
        let manager = manager(
            ModuleCatalog::new()
                .with(Arc::new(TestModule::new("a", &log)))
                .with(Arc::new(TestModule::new("b", &log))),
        );
        manager.load_all();

        let init_log = Arc::clone(&log);
        manager.registry().register_lifecycle(
            LifecycleKind::Init,
            lifecycle_fn("init", move |_| {
                init_log.lock().unwrap().push("Init".to_owned());
                Ok(())
            }),
        );

        let disabled = BTreeSet::from(["b".to_owned()]);
        let report = manager.connect_all(&disabled).await;

        assert_eq!(report.enabled, vec!["a"]);
        assert_eq!(report.skipped, vec!["b"]);
        assert_eq!(manager.summary("b").unwrap().state, ModuleState::Disabled);
        assert_eq!(*log.lock().unwrap(), vec!["Enabled:a", "Init"]);
    }

    #[tokio::test]
    async fn test_hook_failure_does_not_fail_enable() {
        struct LoudModule;

        impl ModuleFactory for LoudModule {
            fn info(&self) -> ModuleInfo {
                ModuleInfo::new("loud", "Loud", "1.0.0", "hook always fails")
            }

            fn build(&self, _context: &ModuleContext) -> anyhow::Result<HandlerBundle> {
                Ok(HandlerBundle::new().on_lifecycle(
                    LifecycleKind::Enabled,
                    lifecycle_fn("loud", |_| anyhow::bail!("cannot greet")),
                ))
            }
        }

        let manager = manager(ModuleCatalog::new().with(Arc::new(LoudModule)));
        manager.load_all();

        assert!(manager.enable("loud").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_module_is_skipped_by_dispatch() {
        let log: Log = Arc::default();
        let manager = manager(
            ModuleCatalog::new()
                .with(Arc::new(TestModule::new("A", &log)))
                .with(Arc::new(TestModule::new("B", &log)))
                .with(Arc::new(TestModule::new("C", &log))),
        );
        manager.load_all();
        manager.connect_all(&BTreeSet::new()).await;
        manager.disable("B").await.unwrap();
        let dispatcher = EventDispatcher::new(Arc::clone(manager.registry()));

        log.lock().unwrap().clear();
        dispatcher.dispatch(&order_event()).await;
        assert_eq!(*log.lock().unwrap(), vec!["A", "C"]);

        manager.enable("B").await.unwrap();
        log.lock().unwrap().clear();
        dispatcher.dispatch(&order_event()).await;
        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
    }
}
