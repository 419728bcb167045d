//! Configuration management

use anyhow::{Context, Result};
use scholarfund_realtime::{PhoenixConfig, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `realtime.api_key`
pub const API_KEY_ENV: &str = "SCHOLARFUND_API_KEY";

/// Realtime backend connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    /// Project URL or full websocket URL of the realtime service
    pub endpoint: String,

    /// Public (anon) API key sent with the socket URL and join payload
    pub api_key: String,

    /// Channel used for connection monitoring
    pub channel: String,

    /// How long to wait for the join reply (milliseconds)
    pub join_timeout_ms: u64,

    /// Heartbeat period (milliseconds)
    pub heartbeat_ms: u64,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:54321".to_string(), // local backend stack
            api_key: String::new(),
            channel: "realtime-status-monitor".to_string(),
            join_timeout_ms: 10_000,
            heartbeat_ms: 25_000,
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Fallback log filter when RUST_LOG is unset
    pub log_level: String,

    pub realtime: RealtimeSection,

    /// Drives both the RECONNECTING marker and socket reconnect pacing
    pub reconnect: ReconnectPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            log_level: "info".to_string(),
            realtime: RealtimeSection::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Load configuration from `config_path`, writing defaults there if it doesn't exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

            let mut config: MonitorConfig = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            config.config_path = config_path.to_path_buf();
            config
        } else {
            let config = Self {
                config_path: config_path.to_path_buf(),
                ..Self::default()
            };
            config.save()
                .context("Failed to save default config")?;
            config
        };

        config.apply_env(std::env::var(API_KEY_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Apply an API key taken from the environment
    pub fn apply_env(&mut self, api_key: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.realtime.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.realtime.channel.trim().is_empty() {
            anyhow::bail!("realtime.channel must not be empty");
        }
        if self.realtime.join_timeout_ms == 0 || self.realtime.heartbeat_ms == 0 {
            anyhow::bail!("realtime.join_timeout_ms and realtime.heartbeat_ms must be positive");
        }
        self.reconnect
            .validate()
            .context("Invalid [reconnect] section")?;
        Ok(())
    }

    /// Websocket transport settings derived from this config
    pub fn phoenix_config(&self) -> PhoenixConfig {
        let mut phoenix = PhoenixConfig::new(&self.realtime.endpoint, &self.realtime.api_key);
        phoenix.join_timeout = Duration::from_millis(self.realtime.join_timeout_ms);
        phoenix.heartbeat_interval = Duration::from_millis(self.realtime.heartbeat_ms);
        phoenix.reconnect = self.reconnect.clone();
        phoenix
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scholarfund")
            .join("monitor.toml")
    }
}
