//! formflow CLI
//!
//! Command-line interface for stored form definitions.
//!
//! # Usage
//!
//! ```bash
//! formflow forms list
//! formflow forms save -f invoice.json
//! formflow forms check invoice.yaml
//! formflow forms recompute invoice.json --now 2026-10-16T18:00:00Z
//! formflow eval "amount * rate" --var amount=100 --var rate=0.2
//! formflow config set engine.password_min_length 12
//! ```

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod output;

const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Parser)]
#[command(name = "formflow")]
#[command(version)]
#[command(about = "formflow form definition tool", long_about = None)]
struct Cli {
    /// Directory holding stored forms
    #[arg(long, env = "FORMFLOW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format (defaults to the configured one, then table)
    #[arg(long, short)]
    format: Option<output::OutputFormat>,

    /// Profile name from config file
    #[arg(long, short, env = "FORMFLOW_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stored forms
    Forms {
        #[command(subcommand)]
        action: FormCommands,
    },
    /// Evaluate a formula
    Eval {
        formula: String,
        /// Variable binding, repeatable
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = commands::eval::parse_var)]
        vars: Vec<(String, f64)>,
        /// Clock value for `now` (RFC 3339); defaults to the current time
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Configure CLI
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum FormCommands {
    /// List stored forms
    List,
    /// Show a stored form
    Show { id: String },
    /// Delete a stored form
    Delete { id: String },
    /// Recompute, validate and store a form definition file
    Save {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Validate a form definition file without storing it
    Check { file: PathBuf },
    /// Print the derived values of a form definition file
    Recompute {
        file: PathBuf,
        /// Clock value for `now` (RFC 3339)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set configuration value
    Set { key: String, value: String },
    /// Get configuration value
    Get { key: String },
    /// List all configuration
    List,
    /// Initialize configuration
    Init,
}

fn main() {
    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    let loaded = config::Config::load(profile);
    let level = loaded
        .as_ref()
        .ok()
        .and_then(|c| c.log_level.clone())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or(level),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config not readable, using defaults");
        config::Config::default()
    });
    let format = cli
        .format
        .or_else(|| config.output_format())
        .unwrap_or(output::OutputFormat::Table);

    let result = match cli.command {
        Commands::Forms { action } => {
            commands::forms::handle(action, &config, cli.data_dir, format)
        }
        Commands::Eval { formula, vars, now } => {
            commands::eval::handle(&formula, vars, now, format)
        }
        Commands::Config { action } => commands::config::handle(action, profile),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
