//! Marketplace CLI - drives the marketplace services against a local SQLite store.
//!
//! Useful for headless operation, scripting and reproducing booking or
//! messaging races by hand from two terminals.

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;
use tracing::{error, info};
use uuid::Uuid;

use mkt_core::config::{AppConfig, ConfigHandle};
use mkt_core::error::{MktError, MktResult};
use mkt_core::logging;
use mkt_services::outcome;

/// Marketplace - bookings, reviews and messaging for a service marketplace.
#[derive(Parser)]
#[command(
    name = "marketplace",
    version,
    about = "Service marketplace client CLI",
    long_about = "A command-line interface for the service marketplace.\n\
                  Create and move bookings, leave reviews and chat with the other party."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    /// User id to act as.
    #[arg(short, long, global = true)]
    user: Option<Uuid>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Register and inspect users.
    Users {
        #[command(subcommand)]
        action: commands::users::UsersAction,
    },
    /// Create, list and move bookings.
    Bookings {
        #[command(subcommand)]
        action: commands::bookings::BookingsAction,
    },
    /// Write and read reviews.
    Reviews {
        #[command(subcommand)]
        action: commands::reviews::ReviewsAction,
    },
    /// Send messages and follow conversations.
    Messages {
        #[command(subcommand)]
        action: commands::messages::MessagesAction,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = cli.format;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, format);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> MktResult<()> {
    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from_file(std::path::Path::new(path))?,
        None => AppConfig::load_default()?,
    };

    let mut log_config = config.logging.clone();
    if cli.verbose {
        log_config.level = "debug".to_string();
    }
    let log_dir = config.effective_log_dir()?;
    let _guard = logging::init_logging(&log_config, &log_dir)?;

    info!("{} CLI v{}", mkt_core::constants::APP_NAME, mkt_core::constants::APP_VERSION);

    let ctx = commands::Context::open(ConfigHandle::new(config), cli.user, cli.format).await?;
    let result = match cli.command {
        Commands::Users { action } => commands::users::run(&ctx, action).await,
        Commands::Bookings { action } => commands::bookings::run(&ctx, action).await,
        Commands::Reviews { action } => commands::reviews::run(&ctx, action).await,
        Commands::Messages { action } => commands::messages::run(&ctx, action).await,
    };
    ctx.registry.shutdown().await?;
    result
}

fn report(err: &MktError, format: OutputFormat) {
    if !err.is_expected() {
        error!("command failed: {err}");
    }
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "error": err.kind(),
                "message": outcome::describe(err),
                "detail": err.to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputFormat::Text => {
            eprintln!("{} {}", style("error:").red().bold(), outcome::describe(err));
        }
    }
}
