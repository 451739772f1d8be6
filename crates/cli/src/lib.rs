pub mod bootstrap;
pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use arena_core::config::{AppConfig, LoadOptions, LogFormat};

use crate::commands::batch::BatchArgs;
use crate::commands::battle::BattleArgs;

#[derive(Debug, Parser)]
#[command(
    name = "arena",
    about = "Closer arena operator CLI",
    long_about = "Run budget-governed battles between a sales closer and adversarial personas.",
    after_help = "Examples:\n  arena migrate\n  arena budget\n  arena battle --persona P-CFO --dry-run\n  arena batch --size 20 --concurrency 2"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a TOML config file (defaults to ./arena.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Show effective configuration with source attribution and redaction")]
    Config,
    #[command(about = "Show today's budget state derived from the cost ledger")]
    Budget,
    #[command(about = "Run a single battle against one persona")]
    Battle {
        #[arg(long = "persona", help = "Persona id to battle")]
        persona_id: String,
        #[arg(long, help = "Use the scripted gateway and keep all writes in memory")]
        dry_run: bool,
    },
    #[command(about = "Run a batch of battles across personas")]
    Batch {
        #[arg(long = "persona", help = "Restrict the batch to these persona ids (repeatable)")]
        persona_ids: Vec<String>,
        #[arg(long, help = "Number of battles to start")]
        size: Option<u32>,
        #[arg(long, help = "Maximum battles in flight")]
        concurrency: Option<u32>,
        #[arg(long, help = "Pause between consecutive starts in milliseconds")]
        delay_ms: Option<u64>,
        #[arg(long, help = "Use the scripted gateway and keep all writes in memory")]
        dry_run: bool,
    },
}

/// Logs go to stderr so stdout stays a single JSON payload.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when embedded; keep the existing one.
    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Config => commands::config::run(&options),
        Command::Budget => commands::budget::run(&options),
        Command::Battle { persona_id, dry_run } => {
            commands::battle::run(&options, BattleArgs { persona_id, dry_run })
        }
        Command::Batch { persona_ids, size, concurrency, delay_ms, dry_run } => {
            commands::batch::run(
                &options,
                BatchArgs { persona_ids, size, concurrency, delay_ms, dry_run },
            )
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
