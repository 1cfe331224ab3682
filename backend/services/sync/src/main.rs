mod commands;
mod coordinator;
mod destination;
mod reconcile;
mod scheduler;
mod source;
mod status;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rowsync_config::init_tracing;

/// MySQL to SmartSuite record sync
#[derive(Parser)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync definitions file
    #[arg(long, global = true, default_value = "config/sync_mappings.yml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run enabled syncs once and exit
    Run {
        /// Run only this sync
        #[arg(long)]
        sync_name: Option<String>,

        /// Fail runs left `running` by a crashed process before starting.
        /// Only use when no other rowsync process shares the state database.
        #[arg(long)]
        recover: bool,
    },

    /// Run enabled syncs on a fixed interval until interrupted
    Schedule {
        /// Minutes between runs (default: SYNC_INTERVAL_MINUTES or 5)
        #[arg(long)]
        interval: Option<u64>,

        /// Start the first run right away instead of after one interval
        #[arg(long)]
        run_immediately: bool,
    },

    /// Load and validate the sync definitions
    Validate,

    /// Show watermarks, mapping counts and recent runs
    Status {
        /// Runs to show per sync
        #[arg(long, default_value_t = 5)]
        limit: u32,
    },

    /// Test MySQL and SmartSuite connectivity
    Check,

    /// Delete mappings and watermark for one sync
    Reset {
        #[arg(long)]
        sync_name: String,
    },
}

fn normalize_level(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_owned(),
        "critical" => "error".to_owned(),
        other => other.to_owned(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&normalize_level(&cli.log_level));

    tracing::info!(service = "rowsync", config = %cli.config.display(), "starting");

    let result = match cli.command {
        Commands::Run { sync_name, recover } => {
            commands::run_once(&cli.config, sync_name.as_deref(), recover).await
        }
        Commands::Schedule {
            interval,
            run_immediately,
        } => commands::schedule(&cli.config, interval, run_immediately).await,
        Commands::Validate => commands::validate(&cli.config),
        Commands::Status { limit } => commands::status(&cli.config, limit).await,
        Commands::Check => commands::check().await,
        Commands::Reset { sync_name } => commands::reset(&cli.config, &sync_name).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}
