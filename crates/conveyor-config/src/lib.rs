//! KDL configuration parsing for Conveyor CI/CD.
//!
//! This crate handles parsing of:
//! - Server, queue and timing settings
//! - Repository definitions (build commands, deploy targets, PR behaviour)
//! - Notification sinks

pub mod config;
pub mod error;
mod node;
pub mod repo;

pub use config::{
    Config, NotifyConfig, ReconcileSettings, ServerConfig, Timeouts, load_config, parse_config,
};
pub use error::{ConfigError, ConfigResult};
