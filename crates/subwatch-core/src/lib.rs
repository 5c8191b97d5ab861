//! Core domain types for multi-chain monitoring.
//!
//! This crate provides:
//! - Chain, block and statistics types (`types` module)
//! - Endpoint validation (`endpoint` module)
//! - The bounded rolling block history (`window` module)
//! - Monitoring configuration with documented defaults (`config` module)
//!
//! With the `persistence` feature enabled, `config` also loads and saves
//! the server configuration file.

pub mod config;
pub mod endpoint;
pub mod types;
pub mod window;

pub use config::MonitorConfig;
pub use endpoint::*;
pub use types::*;
pub use window::*;

#[cfg(feature = "persistence")]
pub use config::{AppConfig, ConfigError, MonitorSettings};
