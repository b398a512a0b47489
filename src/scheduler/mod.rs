//! Raise scheduling and background task supervision.
//!
//! Periodically raises every marketplace category whose cooldown has
//! expired, backing off the whole pass when the marketplace throttles.

mod runner;
mod state;
mod supervisor;

pub use runner::{Category, PassReport, RaiseError, RaiseScheduler, RaiseSettings, RaiseTarget, SchedulerMessage};
pub use state::{PersistentRaiseState, RaiseState};
pub use supervisor::TaskSupervisor;
