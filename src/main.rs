//! Marketplace Autobot - Main Entry Point
//!
//! Polls the marketplace for events, runs the enabled modules against them,
//! and keeps listings raised in the background.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use marketplace_autobot::clock::SystemClock;
use marketplace_autobot::commands::{AdminConsole, SchedulerHandle};
use marketplace_autobot::config::{BotSettings, MarketplaceConfig, ModulesConfig};
use marketplace_autobot::events::{EventDispatcher, HandlerRegistry, PollingEventSource};
use marketplace_autobot::http::{ReqwestTransport, ResilientClient};
use marketplace_autobot::marketplace::HttpMarketplace;
use marketplace_autobot::modules::builtin::{self, KNOWN_MODULE_IDS, StatsCounters, StatsSnapshot};
use marketplace_autobot::modules::{ModuleContext, ModuleManager};
use marketplace_autobot::scheduler::{RaiseScheduler, SchedulerMessage, TaskSupervisor};

/// Event-driven marketplace automation bot.
#[derive(Parser, Debug)]
#[command(name = "autobot")]
#[command(about = "Automate a marketplace account with hot-swappable modules")]
#[command(version)]
struct Args {
    /// Path to the modules JSON configuration file.
    #[arg(short, long, default_value = "modules.json")]
    modules_config: PathBuf,

    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Generate an example configuration file and exit.
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Handle example config generation
    if args.generate_config {
        return generate_example_config();
    }

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let marketplace_config = MarketplaceConfig::from_env()
        .context("Failed to load marketplace configuration from environment")?;
    let settings = BotSettings::from_env_with_defaults();
    let modules_config = load_modules_config(&args.modules_config)?;

    // Outbound HTTP
    let transport = ReqwestTransport::new(settings.request_timeout(), &marketplace_config.user_agent)
        .context("Failed to build HTTP client")?;
    let client = Arc::new(ResilientClient::new(Arc::new(transport), settings.retry_policy()));
    let marketplace = Arc::new(HttpMarketplace::new(client, &marketplace_config));

    // Without an event source there is nothing to dispatch
    let mut source = PollingEventSource::connect(marketplace.clone(), settings.poll_interval())
        .await
        .context("Failed to connect to the marketplace event feed")?;
    info!(base_url = %marketplace_config.base_url, "Connected to marketplace");

    // Modules
    let counters = Arc::new(StatsCounters::from_snapshot(&StatsSnapshot::load(&settings.stats_path)));
    let disabled = modules_config.disabled.clone();
    let shared_config = Arc::new(RwLock::new(modules_config));
    let registry = Arc::new(HandlerRegistry::new());
    let manager = Arc::new(ModuleManager::new(
        Arc::clone(&registry),
        builtin::catalog(Arc::clone(&counters)),
        ModuleContext::new(marketplace.clone(), Arc::clone(&shared_config)),
    ));

    for summary in manager.load_all() {
        info!(
            module = %summary.info.id,
            version = %summary.info.version,
            state = %summary.state,
            "Discovered module"
        );
    }
    manager.connect_all(&disabled).await;

    // Background workers
    let mut supervisor = TaskSupervisor::new();
    let mut console = AdminConsole::new(
        settings.command_prefix.clone(),
        Arc::clone(&manager),
        shared_config,
        args.modules_config.clone(),
    );

    let scheduler_tx = if settings.autoraise {
        let scheduler = RaiseScheduler::new(marketplace.clone(), settings.raise_settings(), Arc::new(SystemClock));
        let (tx, rx) = mpsc::channel::<SchedulerMessage>(8);
        console = console.with_scheduler(SchedulerHandle {
            trigger: tx.clone(),
            next_run: scheduler.subscribe(),
        });
        supervisor.spawn("raise-scheduler", scheduler.run(rx));
        Some(tx)
    } else {
        info!("Autoraise disabled");
        None
    };

    let flush_counters = Arc::clone(&counters);
    let stats_path = settings.stats_path.clone();
    supervisor.spawn_periodic("stats-flush", settings.stats_flush_interval(), move || {
        let counters = Arc::clone(&flush_counters);
        let path = stats_path.clone();
        async move {
            counters.flush(&path);
        }
    });

    info!("Command prefix: {}", settings.command_prefix);
    supervisor.spawn("admin-console", run_console(console));

    let dispatcher = EventDispatcher::new(registry).with_poll_error_delay(settings.poll_error_delay());

    info!("Bot is running. Use Ctrl+C to stop.");

    tokio::select! {
        processed = dispatcher.run(&mut source) => {
            info!(processed, "Event source closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    // Cleanup
    if let Some(tx) = scheduler_tx {
        tx.send(SchedulerMessage::Shutdown).await.ok();
    }
    supervisor.shutdown().await;
    counters.flush(&settings.stats_path);

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads modules.json, falling back to defaults when the file is absent.
fn load_modules_config(path: &Path) -> Result<ModulesConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Module configuration not found, using defaults");
        return Ok(ModulesConfig::default());
    }

    let config = ModulesConfig::load_from_file(path).context("Failed to load module configuration")?;

    // Broken rules only take down the module that uses them
    for problem in config.validate_all() {
        warn!(path = %path.display(), "{problem}");
    }
    for id in config.unknown_disabled(KNOWN_MODULE_IDS) {
        warn!(module = %id, "Disabled module is not known");
    }

    info!(
        rules = config.auto_reply.len(),
        disabled = config.disabled.len(),
        "Loaded module configuration"
    );
    Ok(config)
}

/// Feeds stdin lines to the admin console.
async fn run_console(console: AdminConsole) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match console.try_handle(&line).await {
                    Some(result) => println!("{}", result.message),
                    None => println!("Unknown command. Try: {} help", console.prefix()),
                }
            }
            Ok(None) => {
                debug!("Admin console input closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read admin console input: {}", e);
                break;
            }
        }
    }
}

/// Generates an example configuration file.
fn generate_example_config() -> Result<()> {
    let example = ModulesConfig::example();
    example.save_to_file("modules.example.json")?;

    println!("✓ Example configuration written to: modules.example.json");
    println!("\nTo use this bot:");
    println!("1. Copy modules.example.json to modules.json");
    println!("2. Edit the auto-reply rules and order texts to your liking");
    println!("3. Create a .env file with MARKETPLACE_BASE_URL and MARKETPLACE_TOKEN");
    println!("4. Run: autobot");

    Ok(())
}
