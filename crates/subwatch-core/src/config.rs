//! Monitoring configuration and, with the `persistence` feature, the
//! server configuration file.
//!
//! Defaults:
//! - dial timeout (dial + metadata + subscriptions): 30s
//! - stats refresh interval: 30s, per-tick query budget: 10s
//! - block body fetch budget: 10s
//! - viewer broadcast interval: 5s
//! - rolling window: 10 blocks
//! - health threshold: 3 nominal block times

use std::time::Duration;

use crate::window::BlockWindow;

/// Timing and sizing knobs for the connection registry and its tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// End-to-end budget for dialing a chain and becoming ready.
    pub dial_timeout: Duration,
    /// Period of the per-connection stats refresher.
    pub stats_interval: Duration,
    /// Budget for one stats tick.
    pub stats_query_timeout: Duration,
    /// Budget for fetching one block body.
    pub block_fetch_timeout: Duration,
    /// Period of the viewer broadcaster.
    pub broadcast_interval: Duration,
    /// Number of recent blocks kept per connection.
    pub window_size: usize,
    /// A chain is unhealthy once its latest block is older than this many
    /// nominal block times.
    pub health_block_multiplier: u32,
    /// Events queued per viewer before new ones are dropped.
    pub viewer_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(30),
            stats_interval: Duration::from_secs(30),
            stats_query_timeout: Duration::from_secs(10),
            block_fetch_timeout: Duration::from_secs(10),
            broadcast_interval: Duration::from_secs(5),
            window_size: BlockWindow::DEFAULT_CAPACITY,
            health_block_multiplier: 3,
            viewer_buffer: 64,
        }
    }
}

#[cfg(feature = "persistence")]
pub use persistence::*;

#[cfg(feature = "persistence")]
mod persistence {
    use directories::ProjectDirs;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::MonitorConfig;
    use crate::endpoint::ChainEndpointRequest;

    /// Configuration error type.
    #[derive(Debug, thiserror::Error)]
    pub enum ConfigError {
        /// IO error.
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
        /// JSON serialization/deserialization error.
        #[error("JSON error: {0}")]
        Json(#[from] serde_json::Error),
        /// Other configuration error.
        #[error("{0}")]
        Other(String),
    }

    /// File form of [`MonitorConfig`], durations in seconds.
    /// Missing fields fall back to the defaults.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct MonitorSettings {
        pub dial_timeout_secs: u64,
        pub stats_interval_secs: u64,
        pub stats_query_timeout_secs: u64,
        pub block_fetch_timeout_secs: u64,
        pub broadcast_interval_secs: u64,
        pub window_size: usize,
        pub health_block_multiplier: u32,
        pub viewer_buffer: usize,
    }

    impl Default for MonitorSettings {
        fn default() -> Self {
            MonitorConfig::default().into()
        }
    }

    impl From<MonitorConfig> for MonitorSettings {
        fn from(config: MonitorConfig) -> Self {
            Self {
                dial_timeout_secs: config.dial_timeout.as_secs(),
                stats_interval_secs: config.stats_interval.as_secs(),
                stats_query_timeout_secs: config.stats_query_timeout.as_secs(),
                block_fetch_timeout_secs: config.block_fetch_timeout.as_secs(),
                broadcast_interval_secs: config.broadcast_interval.as_secs(),
                window_size: config.window_size,
                health_block_multiplier: config.health_block_multiplier,
                viewer_buffer: config.viewer_buffer,
            }
        }
    }

    impl MonitorSettings {
        /// Convert to runtime configuration. Zero durations would spin the
        /// periodic tasks, so they are raised to one second.
        pub fn to_monitor_config(&self) -> MonitorConfig {
            let secs = |s: u64| Duration::from_secs(s.max(1));
            MonitorConfig {
                dial_timeout: secs(self.dial_timeout_secs),
                stats_interval: secs(self.stats_interval_secs),
                stats_query_timeout: secs(self.stats_query_timeout_secs),
                block_fetch_timeout: secs(self.block_fetch_timeout_secs),
                broadcast_interval: secs(self.broadcast_interval_secs),
                window_size: self.window_size.max(1),
                health_block_multiplier: self.health_block_multiplier.max(1),
                viewer_buffer: self.viewer_buffer.max(1),
            }
        }
    }

    /// Server configuration file.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AppConfig {
        /// Socket address of the HTTP and viewer server.
        #[serde(default = "default_bind")]
        pub bind: String,
        /// Allowed CORS origin. `None` allows any origin.
        #[serde(default)]
        pub cors_origin: Option<String>,
        #[serde(default)]
        pub monitor: MonitorSettings,
        /// Chains connected at startup.
        #[serde(default)]
        pub bootstrap: Vec<ChainEndpointRequest>,
    }

    fn default_bind() -> String {
        "0.0.0.0:5000".to_string()
    }

    impl Default for AppConfig {
        fn default() -> Self {
            Self {
                bind: default_bind(),
                cors_origin: None,
                monitor: MonitorSettings::default(),
                bootstrap: Vec::new(),
            }
        }
    }

    impl AppConfig {
        /// Add a bootstrap endpoint. Does not add duplicates.
        pub fn add_bootstrap(&mut self, request: ChainEndpointRequest) {
            if self.bootstrap.iter().any(|b| b.ws_url == request.ws_url) {
                return;
            }
            self.bootstrap.push(request);
        }
    }

    /// Get the configuration directory path.
    pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("io", "subwatch", "subwatch")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Other("Could not determine config directory".into()))
    }

    /// Get the default configuration file path.
    pub fn get_config_path() -> Result<PathBuf, ConfigError> {
        get_config_dir().map(|dir| dir.join("config.json"))
    }

    /// Load configuration from the default location.
    /// A missing file yields the defaults.
    pub fn load_config() -> Result<AppConfig, ConfigError> {
        load_config_from(&get_config_path()?)
    }

    /// Load configuration from an explicit path.
    pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
        if !path.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
        save_config_to(&get_config_path()?, config)
    }

    /// Save configuration to an explicit path.
    pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }
}
