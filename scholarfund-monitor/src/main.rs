//! scholarfund monitor - realtime connection status for the dashboard backend
//!
//! Keeps one realtime channel open against the backend, prints the live
//! indicator whenever the connection state changes, and logs each refresh
//! round that dashboard screens would run after a reconnect.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scholarfund_monitor::config::MonitorConfig;
use scholarfund_monitor::monitor::{self, OutputFormat};
use scholarfund_monitor::version;

#[derive(Parser, Debug)]
#[command(name = "scholarfund-monitor", version, about = "Realtime connection status monitor")]
struct Cli {
    /// Config file (defaults to <config dir>/scholarfund/monitor.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format for status lines
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the realtime backend and report status changes (default)
    Watch,

    /// Replay a scripted sequence of transport statuses without a network
    Simulate {
        /// Comma-separated statuses: subscribed, timed_out, channel_error, closed
        #[arg(long, default_value = "subscribed,timed_out,subscribed")]
        script: String,

        /// Pause after each step in milliseconds
        #[arg(long, default_value_t = 2_500)]
        step_ms: u64,
    },

    /// Print the effective configuration
    Config,

    /// Print version and build details
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MonitorConfig::load_from(path),
        None => MonitorConfig::load(),
    }
    .context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("📋 Configuration loaded from {}", config.config_path.display());

    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => {
            info!("🚀 {} watching channel '{}'", version::version_short(), config.realtime.channel);
            monitor::run_watch(&config, cli.format).await?;
        }
        Command::Simulate { script, step_ms } => {
            let steps = monitor::parse_script(&script)?;
            let summary = monitor::run_simulation(
                &config,
                &steps,
                Duration::from_millis(step_ms),
                cli.format,
            )
            .await?;
            info!(
                "Simulation finished in state {} after {} refresh round(s)",
                summary.final_state, summary.refreshes
            );
        }
        Command::Config => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
            println!("# {}", config.config_path.display());
            println!("{}", rendered);
        }
        Command::Version => {
            let info = version::BuildInfo::current();
            match cli.format {
                OutputFormat::Text => print!("{}", info),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&info).context("Failed to render build info")?
                ),
            }
        }
    }

    info!("👋 scholarfund monitor stopped");
    Ok(())
}
