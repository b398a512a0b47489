//! Admin control surface.
//!
//! Text commands (default prefix `/autobot`) that enable, disable and
//! reload modules, show status, and trigger a raise pass.

mod handler;
mod types;

pub use handler::{AdminConsole, SchedulerHandle};
pub use types::{AdminCommand, CommandResult};
