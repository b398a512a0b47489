//! Pluggable modules.
//!
//! Modules are compiled in and described by a [`ModuleFactory`]; the
//! [`ModuleManager`] builds them from a [`ModuleCatalog`] and moves their
//! handler bundles in and out of the registry as they are toggled.

pub mod builtin;
mod manager;
mod module;

pub use manager::{ConnectReport, ModuleError, ModuleManager, ModuleSummary};
pub use module::{ModuleCatalog, ModuleContext, ModuleFactory, ModuleInfo, ModuleState};
