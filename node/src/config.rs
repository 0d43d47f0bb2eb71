//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use tezdel_store_lmdb::DEFAULT_MAP_SIZE;
use tezdel_sync::{DEFAULT_API, MAX_INTERVAL};

use crate::{LogFormat, NodeError};

/// Configuration for a tezdel node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Upstream delegations endpoint.
    #[serde(default = "default_api")]
    pub api: String,

    /// LMDB environment directory.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// LMDB map size in bytes.
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Live polling interval, in seconds.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Run the historical backfill at startup.
    #[serde(default = "default_true")]
    pub history: bool,

    /// Read API port. `0` picks a free one.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter, e.g. "info" or "info,tezdel_sync=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_api() -> String {
    DEFAULT_API.to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./tezdel_data")
}

fn default_map_size() -> usize {
    DEFAULT_MAP_SIZE
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("NodeConfig is always serializable to TOML")
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.sync_interval_secs == 0 {
            return Err(NodeError::Config(
                "sync_interval_secs must be greater than zero".into(),
            ));
        }
        if self.sync_interval_secs > MAX_INTERVAL.as_secs() {
            return Err(NodeError::Config(format!(
                "sync_interval_secs must be at most {}",
                MAX_INTERVAL.as_secs()
            )));
        }
        if self.map_size == 0 {
            return Err(NodeError::Config("map_size must be greater than zero".into()));
        }
        self.log_format()?;
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api: default_api(),
            db_path: default_db_path(),
            map_size: default_map_size(),
            sync_interval_secs: default_sync_interval_secs(),
            history: default_true(),
            port: default_port(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
