//! Solstat CLI: terminal interface for the Solstat statistics engine.
//!
//! Analyzes saved backend responses offline or refreshes against a live
//! statistics backend.

mod commands;
mod render;

use clap::Parser;
use solstat_core::DashboardRole;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Solstat: resilient statistics for academic-process dashboards
#[derive(Parser, Debug)]
#[command(name = "solstat", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the snapshot as JSON instead of a text report
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Analyze a saved primary response without contacting the backend
    Analyze {
        /// Primary response file: `{"httpStatus": .., "body": {..}}` or a bare body
        response: PathBuf,

        /// HTTP status to assume for the response
        #[arg(short, long)]
        status: Option<u16>,

        /// Time-series file keyed by entity name
        #[arg(long)]
        series: Option<PathBuf>,

        /// Per-metric payloads used if the primary response is unusable
        #[arg(long)]
        fallback: Option<PathBuf>,
    },
    /// Run one refresh against the configured backend
    Refresh {
        /// Override the backend base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Dashboard role: administrator or coordinator
        #[arg(long, value_parser = parse_role)]
        role: Option<DashboardRole>,

        /// Restrict program breakdowns to one program
        #[arg(long)]
        program: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective configuration
    Show,
    /// Check the effective configuration for problems
    Validate,
}

fn parse_role(value: &str) -> Result<DashboardRole, String> {
    match value.to_ascii_lowercase().as_str() {
        "administrator" | "admin" => Ok(DashboardRole::Administrator),
        "coordinator" | "coordinador" => Ok(DashboardRole::Coordinator),
        other => Err(format!(
            "unknown role '{}', expected 'administrator' or 'coordinator'",
            other
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "solstat", "solstat")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "solstat.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let context = commands::Context {
        workspace,
        config_file: cli.config,
        json: cli.json,
    };
    commands::handle_command(cli.command, &context).await
}
