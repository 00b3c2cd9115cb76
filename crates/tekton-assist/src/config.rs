//! Process configuration loaded from a mounted YAML file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssistConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub inspect: InspectConfig,
}

/// Resource cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Namespace to mirror; all namespaces when unset or empty
    #[serde(default)]
    pub namespace: Option<String>,

    /// Seconds between full relists of every mirror
    #[serde(rename = "resyncSeconds", default = "default_resync_seconds")]
    pub resync_seconds: u64,

    /// Seconds to wait for the initial sync before giving up
    #[serde(
        rename = "syncTimeoutSeconds",
        default = "default_sync_timeout_seconds"
    )]
    pub sync_timeout_seconds: u64,
}

fn default_resync_seconds() -> u64 {
    600
}

fn default_sync_timeout_seconds() -> u64 {
    120
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            namespace: None,
            resync_seconds: default_resync_seconds(),
            sync_timeout_seconds: default_sync_timeout_seconds(),
        }
    }
}

impl CacheConfig {
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_seconds)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_seconds)
    }
}

/// Diagnosis engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InspectConfig {
    /// Lines requested from the failed step's container log
    #[serde(rename = "logTailLines", default = "default_log_tail_lines")]
    pub log_tail_lines: i64,

    /// Lines kept in the excerpt around the last error line
    #[serde(rename = "snippetLines", default = "default_snippet_lines")]
    pub snippet_lines: usize,
}

fn default_log_tail_lines() -> i64 {
    200
}

fn default_snippet_lines() -> usize {
    10
}

impl Default for InspectConfig {
    fn default() -> Self {
        InspectConfig {
            log_tail_lines: default_log_tail_lines(),
            snippet_lines: default_snippet_lines(),
        }
    }
}

impl AssistConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.cache.resync_seconds == 0 {
            return Err(anyhow::anyhow!("cache.resyncSeconds must be greater than zero"));
        }
        if self.cache.sync_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "cache.syncTimeoutSeconds must be greater than zero"
            ));
        }
        if self.inspect.log_tail_lines <= 0 {
            return Err(anyhow::anyhow!(format!(
                "inspect.logTailLines must be positive, got {}",
                self.inspect.log_tail_lines
            )));
        }
        if self.inspect.snippet_lines == 0 {
            return Err(anyhow::anyhow!("inspect.snippetLines must be greater than zero"));
        }
        Ok(())
    }

    /// Load configuration from a mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    /// Like `from_mounted_file`, but a missing file yields the defaults.
    pub fn load(config_path: &str) -> Result<Self, anyhow::Error> {
        if Path::new(config_path).exists() {
            Self::from_mounted_file(config_path)
        } else {
            info!(path = config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }
}
