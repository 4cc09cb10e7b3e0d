//! Daemon and bridge settings
//!
//! ```toml
//! [server]
//! port = 18090
//!
//! [device]
//! host = "192.168.1.20"
//! username = "USER"
//! password = "123"
//!
//! [bridge]
//! namespace = "windhager.0"
//! update_interval_secs = 60
//! read_strategy = "bulk"
//! function_types = "config/function-types.yaml"
//!
//! [store]
//! snapshot = "whbd-store.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, BridgeResult};

/// Largest fan-out for concurrent device reads
pub const MAX_BLOCK_SIZE: usize = 25;

/// Top-level settings file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse '{}': {}", path.display(), e)))
    }

    /// Parse settings from a TOML string
    pub fn from_toml(content: &str) -> BridgeResult<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    18090
}

/// Controller connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Language of display names and resource texts
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            username: default_username(),
            password: String::new(),
            timeout_secs: default_timeout_secs(),
            language: default_language(),
        }
    }
}

impl DeviceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_username() -> String {
    "USER".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_language() -> String {
    "de".to_string()
}

/// How the interval loop reads values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStrategy {
    /// One `readAllDatapoints` per cycle
    #[default]
    Bulk,
    /// One `readDatapoint` per mapped OID with bounded fan-out
    PerDatapoint,
}

/// Engine settings
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSettings {
    /// Host namespace of this adapter instance
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    /// Scan every level of every function at connect
    #[serde(default)]
    pub full_scan: bool,
    #[serde(default)]
    pub read_strategy: ReadStrategy,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Function-type configuration (JSON or YAML)
    #[serde(default)]
    pub function_types: Option<PathBuf>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_secs")]
    pub connect_retry_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            update_interval_secs: default_update_interval_secs(),
            full_scan: false,
            read_strategy: ReadStrategy::default(),
            block_size: default_block_size(),
            function_types: None,
            connect_attempts: default_connect_attempts(),
            connect_retry_secs: default_connect_retry_secs(),
        }
    }
}

impl BridgeSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(1))
    }

    pub fn connect_retry(&self) -> Duration {
        Duration::from_secs(self.connect_retry_secs)
    }

    /// Fan-out for concurrent device reads, clamped to `1..=25`
    pub fn effective_block_size(&self) -> usize {
        self.block_size.clamp(1, MAX_BLOCK_SIZE)
    }
}

fn default_namespace() -> String {
    "windhager.0".to_string()
}

fn default_update_interval_secs() -> u64 {
    60
}

fn default_block_size() -> usize {
    16
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_retry_secs() -> u64 {
    300
}

/// Host store settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSettings {
    /// JSON snapshot loaded at start and saved at shutdown
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
}
