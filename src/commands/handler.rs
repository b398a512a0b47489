//! Admin console implementation.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::types::{AdminCommand, CommandResult};
use crate::clock::{Clock, SystemClock, until};
use crate::config::ModulesConfig;
use crate::modules::{ModuleManager, ModuleState};
use crate::scheduler::SchedulerMessage;

/// Connection to a running raise scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    pub trigger: mpsc::Sender<SchedulerMessage>,
    pub next_run: watch::Receiver<DateTime<Utc>>,
}

/// Turns admin text commands into module manager and scheduler calls.
pub struct AdminConsole {
    /// Command prefix (e.g., "`/autobot`").
    prefix: String,

    manager: Arc<ModuleManager>,

    /// Module configuration shared with the module context.
    config: Arc<RwLock<ModulesConfig>>,

    /// Path to modules.json (for saving the disabled list).
    config_path: PathBuf,

    /// `None` when autoraise is off.
    scheduler: Option<SchedulerHandle>,

    clock: Arc<dyn Clock>,
}

impl AdminConsole {
    #[must_use]
    pub fn new(
        prefix: String,
        manager: Arc<ModuleManager>,
        config: Arc<RwLock<ModulesConfig>>,
        config_path: PathBuf,
    ) -> Self {
        Self {
            prefix,
            manager,
            config,
            config_path,
            scheduler: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Connects the console to the raise scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Tries to parse and execute a command from a line of text.
    ///
    /// Returns `None` if the text is not a command.
    pub async fn try_handle(&self, text: &str) -> Option<CommandResult> {
        let command = AdminCommand::parse(text, &self.prefix)?;

        debug!(%command, "Handling admin command");
        let result = self.execute(command).await;
        info!(success = result.success, "Admin command handled");

        Some(result)
    }

    /// Executes a parsed command.
    pub async fn execute(&self, command: AdminCommand) -> CommandResult {
        match command {
            AdminCommand::Modules => self.handle_modules(),
            AdminCommand::Enable(id) => self.handle_toggle(&id, true).await,
            AdminCommand::Disable(id) => self.handle_toggle(&id, false).await,
            AdminCommand::Reload(id) => self.handle_reload(&id).await,
            AdminCommand::Status => self.handle_status(),
            AdminCommand::Raise => self.handle_raise().await,
            AdminCommand::Help => self.handle_help(),
            AdminCommand::Info => handle_info(),
        }
    }

    fn handle_modules(&self) -> CommandResult {
        let summaries = self.manager.summaries();
        if summaries.is_empty() {
            return CommandResult::error("No modules loaded.");
        }

        let mut lines = vec!["Modules:".to_owned()];
        for summary in summaries {
            lines.push(format!(
                "  [{}] {} v{} - {} ({} handlers)",
                summary.state, summary.info.id, summary.info.version, summary.info.name, summary.handlers
            ));
            if let Some(error) = summary.error {
                lines.push(format!("      error: {error}"));
            }
        }

        CommandResult::success(lines.join("\n"))
    }

    async fn handle_toggle(&self, id: &str, enable: bool) -> CommandResult {
        let result = if enable {
            self.manager.enable(id).await
        } else {
            self.manager.disable(id).await
        };

        let changed = match result {
            Ok(changed) => changed,
            Err(e) => return CommandResult::error(e.to_string()),
        };

        let verb = if enable { "enabled" } else { "disabled" };
        let mut message = if changed {
            format!("✓ Module '{id}' {verb}.")
        } else {
            format!("Module '{id}' is already {verb}.")
        };
        if let Some(warning) = self.remember(id, enable) {
            message.push('\n');
            message.push_str(&warning);
        }

        CommandResult::success(message)
    }

    async fn handle_reload(&self, id: &str) -> CommandResult {
        let mut new_config = match ModulesConfig::load_from_file(&self.config_path) {
            Ok(config) => config,
            Err(e) => return CommandResult::error(format!("Failed to reload: {e}")),
        };
        if let Err(e) = new_config.validate() {
            return CommandResult::error(format!("Validation failed: {e}"));
        }

        new_config.set_enabled(id, true);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;

        match self.manager.reload(id).await {
            Ok(()) => {
                let mut message = format!("✓ Module '{id}' reloaded.");
                if let Some(warning) = self.remember(id, true) {
                    message.push('\n');
                    message.push_str(&warning);
                }
                CommandResult::success(message)
            }
            Err(e) => CommandResult::error(e.to_string()),
        }
    }

    fn handle_status(&self) -> CommandResult {
        let summaries = self.manager.summaries();
        let count = |state: ModuleState| summaries.iter().filter(|s| s.state == state).count();

        let raise = match &self.scheduler {
            Some(scheduler) => {
                let next_run = *scheduler.next_run.borrow();
                let remaining = until(self.clock.now(), next_run);
                format!(
                    "{} (in {})",
                    next_run.format("%Y-%m-%d %H:%M:%S UTC"),
                    format_duration(remaining.as_secs())
                )
            }
            None => "autoraise disabled".to_owned(),
        };

        let message = format!(
            "Modules: {} enabled, {} disabled, {} failed\n\
             Handlers registered: {}\n\
             Next raise: {raise}",
            count(ModuleState::Enabled),
            count(ModuleState::Disabled) + count(ModuleState::Loaded),
            count(ModuleState::Failed),
            self.manager.registry().len(),
        );

        CommandResult::success(message)
    }

    async fn handle_raise(&self) -> CommandResult {
        let Some(scheduler) = &self.scheduler else {
            return CommandResult::error("Autoraise is disabled.");
        };

        match scheduler.trigger.send(SchedulerMessage::TriggerPass).await {
            Ok(()) => CommandResult::success("✓ Raise pass triggered."),
            Err(_) => CommandResult::error("Raise scheduler is not running."),
        }
    }

    fn handle_help(&self) -> CommandResult {
        let mut lines = vec![
            format!("Autobot Commands (prefix: {})", self.prefix),
            String::new(),
        ];

        for (cmd, aliases, desc) in AdminCommand::all_commands() {
            let alias_str = if aliases.is_empty() {
                String::new()
            } else {
                format!(" {aliases}")
            };
            lines.push(format!("  {cmd}{alias_str} - {desc}"));
        }

        CommandResult::success(lines.join("\n"))
    }

    /// Records a module's enabled flag in modules.json. Returns a warning
    /// for the user if the file could not be written.
    fn remember(&self, id: &str, enabled: bool) -> Option<String> {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        config.set_enabled(id, enabled);

        match config.save_to_file(&self.config_path) {
            Ok(()) => None,
            Err(e) => {
                warn!(path = %self.config_path.display(), error = %e, "Failed to save module configuration");
                Some(format!("⚠ Not saved: {e}"))
            }
        }
    }
}

impl std::fmt::Debug for AdminConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConsole")
            .field("prefix", &self.prefix)
            .field("config_path", &self.config_path)
            .finish_non_exhaustive()
    }
}

fn handle_info() -> CommandResult {
    let version = env!("CARGO_PKG_VERSION");
    CommandResult::success(format!(
        "Marketplace Autobot v{version}\n\
         Event-driven marketplace automation with hot-swappable modules."
    ))
}

/// Formats duration in human-readable format.
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::after;
    use crate::config::AutoReplyRule;
    use crate::events::{HandlerRegistry, EventKind};
    use crate::modules::{ModuleContext, builtin};
    use crate::testing::{ManualClock, RecordingChat};

    struct Fixture {
        console: AdminConsole,
        config: Arc<RwLock<ModulesConfig>>,
        path: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_file(&self.path).ok();
        }
    }

    async fn fixture(name: &str) -> Fixture {
        let path = std::env::temp_dir().join(format!("autobot-console-{name}-{}.json", std::process::id()));
        let initial = ModulesConfig::example();
        initial.save_to_file(&path).unwrap();

        let config = Arc::new(RwLock::new(initial));
        let context = ModuleContext::new(RecordingChat::new(), Arc::clone(&config));
        let manager = Arc::new(ModuleManager::new(
            Arc::new(HandlerRegistry::new()),
            builtin::catalog(Arc::default()),
            context,
        ));
        manager.load_all();
        manager.connect_all(&Default::default()).await;

        let console = AdminConsole::new("/autobot".to_owned(), manager, Arc::clone(&config), path.clone());
        Fixture { console, config, path }
    }

    #[tokio::test]
    async fn test_disable_persists_disabled_list() {
        let fixture = fixture("disable").await;

        let result = fixture.console.try_handle("/autobot disable stats").await.unwrap();

        assert!(result.success, "{}", result.message);
        let saved = ModulesConfig::load_from_file(&fixture.path).unwrap();
        assert!(saved.is_disabled("stats"));

        let result = fixture.console.try_handle("/autobot enable stats").await.unwrap();
        assert!(result.success);
        let saved = ModulesConfig::load_from_file(&fixture.path).unwrap();
        assert!(!saved.is_disabled("stats"));
    }

    #[tokio::test]
    async fn test_unknown_module_is_an_error() {
        let fixture = fixture("unknown").await;

        let result = fixture.console.try_handle("/autobot enable ghost").await.unwrap();

        assert!(!result.success);
        assert!(result.message.contains("ghost"));
    }

    #[tokio::test]
    async fn test_reload_reads_configuration_file() {
        let fixture = fixture("reload").await;
        let mut edited = ModulesConfig::example();
        edited.auto_reply.push(AutoReplyRule::new(&["price?"], "Prices are in the listing."));
        edited.save_to_file(&fixture.path).unwrap();

        let result = fixture.console.try_handle("/autobot reload auto_reply").await.unwrap();

        assert!(result.success, "{}", result.message);
        assert_eq!(fixture.config.read().unwrap().auto_reply.len(), 3);
        let registry = fixture.console.manager.registry();
        assert_eq!(registry.domain_handler_names(EventKind::NewMessage).len(), 2);
    }

    #[tokio::test]
    async fn test_reload_rejects_invalid_file() {
        let fixture = fixture("invalid").await;
        std::fs::write(&fixture.path, "{ not json").unwrap();

        let result = fixture.console.try_handle("/autobot reload auto_reply").await.unwrap();

        assert!(!result.success);
        assert_eq!(fixture.config.read().unwrap().auto_reply.len(), 2);
    }

    #[tokio::test]
    async fn test_raise_and_status_use_scheduler() {
        let clock = ManualClock::new();
        let (trigger, mut rx) = mpsc::channel(1);
        let (_next_tx, next_run) = watch::channel(after(clock.now(), Duration::from_secs(5400)));
        let fixture = fixture("raise").await;
        let console = AdminConsole::new(
            "/autobot".to_owned(),
            Arc::clone(&fixture.console.manager),
            Arc::clone(&fixture.config),
            fixture.path.clone(),
        )
        .with_scheduler(SchedulerHandle { trigger, next_run })
        .with_clock(clock.clone());

        let result = console.execute(AdminCommand::Raise).await;
        assert!(result.success);
        assert!(matches!(rx.recv().await, Some(SchedulerMessage::TriggerPass)));

        let status = console.execute(AdminCommand::Status).await;
        assert!(status.message.contains("in 1h 30m"), "{}", status.message);
        assert!(status.message.contains("3 enabled"), "{}", status.message);
    }

    #[tokio::test]
    async fn test_raise_without_scheduler() {
        let fixture = fixture("noraise").await;
        let result = fixture.console.execute(AdminCommand::Raise).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_non_commands_are_ignored() {
        let fixture = fixture("ignored").await;
        assert!(fixture.console.try_handle("hello there").await.is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m");
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(5400), "1h 30m");
    }
}
