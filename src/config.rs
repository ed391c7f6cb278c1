//! Configuration for relaydrop.
//!
//! Loaded from `~/.config/relaydrop/config.toml` when present; every field
//! has a default and CLI flags override file values.

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Seconds between keep-alive pings to each client
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Relay WebSocket URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Where `receive` writes completed files
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_ping_interval() -> u64 {
    30
}

fn default_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            download_dir: default_download_dir(),
        }
    }
}

impl RelayConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("relaydrop")
            .join("config.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TransferError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Load from the default path, falling back to defaults if absent.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TransferError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.client.url.starts_with("ws://") || self.client.url.starts_with("wss://")) {
            return Err(TransferError::Config(format!(
                "relay url must start with ws:// or wss://, got {}",
                self.client.url
            )));
        }
        if self.relay.ping_interval_secs == 0 {
            return Err(TransferError::Config(
                "ping_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.relay.bind.is_empty() {
            return Err(TransferError::Config("bind address is empty".to_string()));
        }
        Ok(())
    }
}
