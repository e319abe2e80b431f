//! Relay configuration
//!
//! Defaults, optionally overridden by a TOML file and then by the
//! listen address given on the command line.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Environment variable naming an optional TOML config file
pub const CONFIG_ENV: &str = "CHAT_RELAY_CONFIG";

/// Default listen port
pub const DEFAULT_PORT: u16 = 12345;

/// Runtime configuration for the relay
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the listener binds to
    pub listen_addr: SocketAddr,
    /// Append-only transcript file
    pub transcript_path: PathBuf,
    /// Per-session outbound queue length
    pub outbound_capacity: usize,
    /// Relay command queue length
    pub command_capacity: usize,
    /// Pending transcript lines before new ones are dropped
    pub transcript_capacity: usize,
    /// Longest accepted inbound line, in bytes
    pub max_line_length: usize,
    /// How long shutdown waits for sessions to close
    pub shutdown_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            transcript_path: PathBuf::from("chat_history.txt"),
            outbound_capacity: 64,
            command_capacity: 256,
            transcript_capacity: 1024,
            max_line_length: 4096,
            shutdown_grace_ms: 2000,
        }
    }
}

impl Config {
    /// Parse a config from TOML text
    pub fn from_toml(text: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file from disk
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Build the effective config from the environment and CLI arguments
    ///
    /// `listen_arg` is the first positional argument, if any.
    pub fn load(listen_arg: Option<&str>) -> Result<Self, AppError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Some(arg) = listen_arg {
            config.listen_addr = parse_listen_addr(arg)?;
        }
        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Accepts a bare port (bound on all interfaces) or a full `host:port`
pub fn parse_listen_addr(arg: &str) -> Result<SocketAddr, AppError> {
    if let Ok(port) = arg.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    arg.parse::<SocketAddr>()
        .map_err(|_| AppError::InvalidAddress(arg.to_string()))
}
