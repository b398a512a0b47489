//! Handler registry.
//!
//! Two independent tables (lifecycle and domain), each mapping a kind to an
//! ordered handler list. Both live behind a single lock so a module's whole
//! bundle is applied or retracted in one critical section, and readers only
//! ever get point-in-time copies.
//!
//! Bundles may be registered with a rank (the module manager uses catalog
//! order), so a module that is disabled and enabled again gets its old
//! position back. Unranked registrations are appended.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::{EventHandler, EventKind, HandlerBundle, LifecycleHandler, LifecycleKind};

/// Which table a registration lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Lifecycle,
    Domain,
}

/// Receipt for a single registration; can be used to remove exactly that entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken {
    pub namespace: Namespace,
    id: u64,
}

/// Rank given to plain registrations; sorts after every ranked bundle.
const UNRANKED: u64 = u64::MAX;

struct Entry<H: ?Sized> {
    rank: u64,
    id: u64,
    handler: Arc<H>,
}

struct HandlerTable<K, H: ?Sized> {
    entries: HashMap<K, Vec<Entry<H>>>,
}

impl<K, H: ?Sized> Default for HandlerTable<K, H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash, H: ?Sized> HandlerTable<K, H> {
    fn insert(&mut self, kind: K, rank: u64, id: u64, handler: Arc<H>) {
        let list = self.entries.entry(kind).or_default();
        let pos = list.partition_point(|e| e.rank <= rank);
        list.insert(pos, Entry { rank, id, handler });
    }

    fn remove_first(&mut self, kind: K, handler: &Arc<H>) -> bool {
        let Some(list) = self.entries.get_mut(&kind) else {
            return false;
        };
        let Some(pos) = list
            .iter()
            .position(|e| std::ptr::addr_eq(Arc::as_ptr(&e.handler), Arc::as_ptr(handler)))
        else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.entries.remove(&kind);
        }
        true
    }

    fn remove_id(&mut self, id: u64) -> bool {
        let found = self.entries.iter_mut().find_map(|(kind, list)| {
            let pos = list.iter().position(|e| e.id == id)?;
            list.remove(pos);
            Some((*kind, list.is_empty()))
        });
        match found {
            Some((kind, now_empty)) => {
                if now_empty {
                    self.entries.remove(&kind);
                }
                true
            }
            None => false,
        }
    }

    fn snapshot(&self, kind: K) -> Vec<Arc<H>> {
        self.entries
            .get(&kind)
            .map(|list| list.iter().map(|e| Arc::clone(&e.handler)).collect())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

#[derive(Default)]
struct Tables {
    next_id: u64,
    lifecycle: HandlerTable<LifecycleKind, dyn LifecycleHandler>,
    domain: HandlerTable<EventKind, dyn EventHandler>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-wide kind → handlers mapping, shared by reference.
#[derive(Default)]
pub struct HandlerRegistry {
    tables: RwLock<Tables>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a domain handler. Registering the same handler twice yields
    /// two entries, both of which are invoked.
    pub fn register_domain(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> RegistrationToken {
        let mut tables = self.write();
        let id = tables.next_id();
        debug!(handler = handler.name(), event = %kind, "Registering event handler");
        tables.domain.insert(kind, UNRANKED, id, handler);
        RegistrationToken {
            namespace: Namespace::Domain,
            id,
        }
    }

    /// Appends a lifecycle handler.
    pub fn register_lifecycle(
        &self,
        kind: LifecycleKind,
        handler: Arc<dyn LifecycleHandler>,
    ) -> RegistrationToken {
        let mut tables = self.write();
        let id = tables.next_id();
        debug!(handler = handler.name(), event = %kind, "Registering lifecycle handler");
        tables.lifecycle.insert(kind, UNRANKED, id, handler);
        RegistrationToken {
            namespace: Namespace::Lifecycle,
            id,
        }
    }

    /// Removes the first entry for `handler` under `kind`. Returns whether
    /// anything was removed.
    pub fn unregister_domain(&self, kind: EventKind, handler: &Arc<dyn EventHandler>) -> bool {
        self.write().domain.remove_first(kind, handler)
    }

    /// Removes the first entry for `handler` under `kind`.
    pub fn unregister_lifecycle(&self, kind: LifecycleKind, handler: &Arc<dyn LifecycleHandler>) -> bool {
        self.write().lifecycle.remove_first(kind, handler)
    }

    /// Removes the entry created by a specific registration.
    pub fn unregister_token(&self, token: RegistrationToken) -> bool {
        let mut tables = self.write();
        match token.namespace {
            Namespace::Domain => tables.domain.remove_id(token.id),
            Namespace::Lifecycle => tables.lifecycle.remove_id(token.id),
        }
    }

    /// Point-in-time copy of the handlers for `kind`, in registration order.
    #[must_use]
    pub fn domain_snapshot(&self, kind: EventKind) -> Vec<Arc<dyn EventHandler>> {
        self.read().domain.snapshot(kind)
    }

    /// Point-in-time copy of the lifecycle handlers for `kind`.
    #[must_use]
    pub fn lifecycle_snapshot(&self, kind: LifecycleKind) -> Vec<Arc<dyn LifecycleHandler>> {
        self.read().lifecycle.snapshot(kind)
    }

    /// Installs every binding of `bundle` in one critical section, after
    /// all existing entries.
    pub fn bulk_register(&self, bundle: &HandlerBundle) {
        self.bulk_register_ranked(bundle, UNRANKED);
    }

    /// Installs every binding of `bundle` in one critical section. Within a
    /// kind, entries are ordered by rank, then by registration order.
    pub fn bulk_register_ranked(&self, bundle: &HandlerBundle, rank: u64) {
        let mut tables = self.write();
        for (kind, handler) in &bundle.lifecycle {
            let id = tables.next_id();
            tables.lifecycle.insert(*kind, rank, id, Arc::clone(handler));
        }
        for (kind, handler) in &bundle.domain {
            let id = tables.next_id();
            tables.domain.insert(*kind, rank, id, Arc::clone(handler));
        }
    }

    /// Retracts every binding of `bundle` in one critical section. Returns
    /// how many entries were removed.
    pub fn bulk_unregister(&self, bundle: &HandlerBundle) -> usize {
        let mut tables = self.write();
        let lifecycle = bundle
            .lifecycle
            .iter()
            .filter(|(kind, handler)| tables.lifecycle.remove_first(*kind, handler))
            .count();
        let domain = bundle
            .domain
            .iter()
            .filter(|(kind, handler)| tables.domain.remove_first(*kind, handler))
            .count();
        lifecycle + domain
    }

    /// Names of the domain handlers for `kind`, in order.
    #[must_use]
    pub fn domain_handler_names(&self, kind: EventKind) -> Vec<String> {
        self.domain_snapshot(kind)
            .iter()
            .map(|h| h.name().to_owned())
            .collect()
    }

    /// Total entries across both namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        let tables = self.read();
        tables.lifecycle.len() + tables.domain.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.read();
        f.debug_struct("HandlerRegistry")
            .field("lifecycle", &tables.lifecycle.len())
            .field("domain", &tables.domain.len())
            .finish()
    }
}
