//! Session owner for the realtime status broadcaster
//!
//! Owns one broadcaster for the lifetime of a monitoring session, registers
//! the refresh hook that dashboard screens used to install, and reports
//! every state change as an indicator line.

use anyhow::{Context, Result};
use chrono::Local;
use scholarfund_realtime::{
    ConnectionState, ListenerGuard, ManualTransport, PhoenixTransport, RealtimeStatusBroadcaster,
    RealtimeTransport, StatusChange, StatusIndicator, TransportStatus,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::MonitorConfig;

/// How status lines are written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Serialize)]
struct StatusLine<'a> {
    state: ConnectionState,
    previous: Option<ConnectionState>,
    at: String,
    indicator: &'a StatusIndicator,
}

/// Render one state change for stdout
pub fn render_change(change: &StatusChange, format: OutputFormat) -> Result<String> {
    let indicator = StatusIndicator::for_state(change.state);
    match format {
        OutputFormat::Text => {
            let time = change.at.with_timezone(&Local).format("%H:%M:%S");
            Ok(match change.previous {
                Some(previous) => format!("[{}] {} ({}, was {})", time, indicator, change.state, previous),
                None => format!("[{}] {} ({})", time, indicator, change.state),
            })
        }
        OutputFormat::Json => {
            let line = StatusLine {
                state: change.state,
                previous: change.previous,
                at: change.at.to_rfc3339(),
                indicator: &indicator,
            };
            serde_json::to_string(&line).context("Failed to serialize status line")
        }
    }
}

/// Parse a comma-separated simulation script such as `subscribed,timed_out,subscribed`
pub fn parse_script(script: &str) -> Result<Vec<TransportStatus>> {
    let steps = script
        .split(',')
        .filter(|step| !step.trim().is_empty())
        .map(|step| {
            TransportStatus::parse(step)
                .with_context(|| format!("Unknown transport status in script: '{}'", step.trim()))
        })
        .collect::<Result<Vec<_>>>()?;

    if steps.is_empty() {
        anyhow::bail!("Simulation script is empty");
    }
    Ok(steps)
}

/// One monitoring session
pub struct Monitor {
    broadcaster: Arc<RealtimeStatusBroadcaster>,
    refreshes: Arc<AtomicU64>,
    _refresh_hook: ListenerGuard,
}

impl Monitor {
    pub fn new(config: &MonitorConfig, transport: Arc<dyn RealtimeTransport>) -> Result<Self> {
        let broadcaster = RealtimeStatusBroadcaster::with_policy(
            config.realtime.channel.clone(),
            transport,
            config.reconnect.clone(),
        )
        .context("Failed to create status broadcaster")?;

        let refreshes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&refreshes);
        let refresh_hook = broadcaster.listen(move || {
            let round = counter.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Connection recovered, refreshing dashboard data (round {})", round);
        });

        Ok(Self {
            broadcaster: Arc::new(broadcaster),
            refreshes,
            _refresh_hook: refresh_hook,
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.broadcaster
            .start()
            .await
            .context("Failed to start status broadcaster")
    }

    /// Print every state change until the broadcaster is dropped
    pub fn spawn_reporter(&self, format: OutputFormat) -> JoinHandle<()> {
        let mut rx = self.broadcaster.watch();
        tokio::spawn(async move {
            loop {
                let change = rx.borrow_and_update().clone();
                match render_change(&change, format) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to render status change: {}", e),
                }
                if rx.changed().await.is_err() {
                    debug!("Status channel closed, reporter exiting");
                    break;
                }
            }
        })
    }

    pub fn broadcaster(&self) -> &Arc<RealtimeStatusBroadcaster> {
        &self.broadcaster
    }

    pub fn status(&self) -> ConnectionState {
        self.broadcaster.status()
    }

    /// Number of refresh rounds triggered so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) -> Result<()> {
        if self.broadcaster.is_running() {
            self.broadcaster
                .stop()
                .await
                .context("Failed to stop status broadcaster")?;
        }
        Ok(())
    }
}

/// Watch the live backend until Ctrl-C
pub async fn run_watch(config: &MonitorConfig, format: OutputFormat) -> Result<()> {
    let transport = PhoenixTransport::new(config.phoenix_config())
        .context("Invalid realtime transport settings")?;

    info!("🔌 Connecting to {}", config.realtime.endpoint);
    let monitor = Monitor::new(config, Arc::new(transport))?;
    let reporter = monitor.spawn_reporter(format);
    monitor.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Received shutdown signal");

    monitor.shutdown().await?;
    // Give the reporter a moment to print the final CLOSED line
    tokio::time::sleep(Duration::from_millis(50)).await;
    reporter.abort();

    info!("Refresh rounds this session: {}", monitor.refresh_count());
    Ok(())
}

/// Outcome of a scripted run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationSummary {
    pub final_state: ConnectionState,
    pub refreshes: u64,
}

/// Drive the broadcaster through `steps`, pausing `step_delay` after each one
pub async fn run_simulation(
    config: &MonitorConfig,
    steps: &[TransportStatus],
    step_delay: Duration,
    format: OutputFormat,
) -> Result<SimulationSummary> {
    let transport = Arc::new(ManualTransport::new());
    let monitor = Monitor::new(config, transport.clone())?;
    let reporter = monitor.spawn_reporter(format);
    monitor.start().await?;

    for step in steps {
        info!("▶️ Simulating transport status '{}'", step);
        transport.emit(*step);
        tokio::time::sleep(step_delay).await;
    }

    let summary = SimulationSummary {
        final_state: monitor.status(),
        refreshes: monitor.refresh_count(),
    };

    monitor.shutdown().await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    reporter.abort();

    Ok(summary)
}
