//! Standalone validator for module configuration files.
//!
//! Checks a modules.json for well-formed auto-reply rules, unique trigger
//! texts, a usable order greeting, and disabled ids that name real modules.

use std::process::ExitCode;

use clap::Parser;

use marketplace_autobot::config::{ModulesConfig, normalize_trigger};
use marketplace_autobot::modules::builtin::KNOWN_MODULE_IDS;

/// Module configuration validator.
#[derive(Parser, Debug)]
#[command(name = "validate_modules")]
#[command(about = "Validates module configuration files for the marketplace autobot")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file to validate.
    #[arg(short, long, default_value = "modules.json")]
    file: String,

    /// Generate an example configuration file at the specified path.
    #[arg(long)]
    generate_example: Option<String>,

    /// Show every rule, not just the problems.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(output_path) = args.generate_example {
        return generate_example(&output_path);
    }

    validate_config(&args.file, args.verbose)
}

fn generate_example(output_path: &str) -> ExitCode {
    let example = ModulesConfig::example();

    match example.save_to_file(output_path) {
        Ok(()) => {
            println!("✓ Example configuration written to: {output_path}");
            println!("\nThe file contains {} example auto-reply rules.", example.auto_reply.len());
            println!("Known modules: {}", KNOWN_MODULE_IDS.join(", "));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to write example file: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_config(path: &str, verbose: bool) -> ExitCode {
    println!("Validating: {path}\n");

    let config = match ModulesConfig::load_from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("✗ Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if verbose {
        for (i, rule) in config.auto_reply.iter().enumerate() {
            let triggers: Vec<String> = rule.triggers.iter().map(|t| normalize_trigger(t)).collect();
            println!("[{i}] {} -> \"{}\"", triggers.join(" | "), truncate(&rule.response, 40));
        }
        println!();
    }

    let errors = config.validate_all();
    for error in &errors {
        println!("  ✗ Error: {error}");
    }

    let unknown = config.unknown_disabled(KNOWN_MODULE_IDS);
    for id in &unknown {
        println!("  ✗ Error: disabled module '{id}' does not exist");
    }

    let problems = errors.len() + unknown.len();
    if problems == 0 {
        println!("✓ Configuration is valid!");
        println!("  {} auto-reply rule(s)", config.auto_reply.len());
        if config.disabled.is_empty() {
            println!("  All modules enabled");
        } else {
            let disabled: Vec<&str> = config.disabled.iter().map(String::as_str).collect();
            println!("  Disabled: {}", disabled.join(", "));
        }
        ExitCode::SUCCESS
    } else {
        println!("\n✗ Found {problems} problem(s)");
        ExitCode::FAILURE
    }
}

/// Truncates a string for display.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
