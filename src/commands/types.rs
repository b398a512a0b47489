//! Admin command types and parsing.

use std::fmt;

/// Commands accepted by the admin console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// List modules with their state.
    Modules,

    /// Enable a module by id.
    Enable(String),

    /// Disable a module by id.
    Disable(String),

    /// Re-read the module configuration and rebuild a module.
    Reload(String),

    /// Show module states and the next raise time.
    Status,

    /// Run a raise pass now.
    Raise,

    /// Show help information.
    Help,

    /// Show information about the bot.
    Info,
}

impl AdminCommand {
    /// Parses a command from a line of text.
    ///
    /// Returns `None` if the text is not a valid command.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let text = text.trim();
        let after_prefix = text.strip_prefix(prefix)?;

        // "/autobotstatus" is not a command
        if !after_prefix.is_empty() && !after_prefix.starts_with(char::is_whitespace) {
            return None;
        }
        let after_prefix = after_prefix.trim_start();

        let (cmd, arg) = match after_prefix.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd.to_lowercase(), Some(arg.trim())),
            None => (after_prefix.to_lowercase(), None),
        };
        let module_id = || arg.filter(|a| !a.is_empty()).map(str::to_owned);

        match cmd.as_str() {
            "modules" | "list" | "ls" => Some(Self::Modules),
            "enable" | "on" => module_id().map(Self::Enable),
            "disable" | "off" => module_id().map(Self::Disable),
            "reload" | "refresh" => module_id().map(Self::Reload),
            "status" | "stat" | "s" => Some(Self::Status),
            "raise" | "up" => Some(Self::Raise),
            "help" | "h" | "?" | "" => Some(Self::Help),
            "info" | "about" | "version" => Some(Self::Info),
            _ => None,
        }
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Modules => "modules",
            Self::Enable(_) => "enable",
            Self::Disable(_) => "disable",
            Self::Reload(_) => "reload",
            Self::Status => "status",
            Self::Raise => "raise",
            Self::Help => "help",
            Self::Info => "info",
        }
    }

    /// Returns all available commands with their aliases and descriptions.
    #[must_use]
    pub fn all_commands() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("modules", "(ls)", "List modules and their state"),
            ("enable <id>", "(on)", "Enable a module and remember it"),
            ("disable <id>", "(off)", "Disable a module and remember it"),
            ("reload <id>", "", "Re-read modules.json and rebuild a module"),
            ("status", "(s)", "Show module states and the next raise"),
            ("raise", "(up)", "Run a raise pass now"),
            ("info", "", "Show bot information"),
            ("help", "(h, ?)", "Show this help message"),
        ]
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enable(id) | Self::Disable(id) | Self::Reload(id) => {
                write!(f, "{} {id}", self.name())
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Result of command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,
}

impl CommandResult {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
