//! Configuration for mirror synchronization

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Mirror sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Full resynchronization cadence (seconds)
    pub resync_interval_secs: u64,

    /// Retry configuration for transient source errors
    pub retry: RetryConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/mirror"),
            service_name: "mirror-sync".to_string(),
            resync_interval_secs: 300,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial retry delay (milliseconds)
    pub initial_delay_ms: u64,

    /// Maximum retry delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
        }
    }
}

impl MirrorConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MirrorConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = MirrorConfig::default();

        if let Ok(data_dir) = std::env::var("MIRROR_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(secs) = std::env::var("MIRROR_RESYNC_INTERVAL_SECS") {
            config.resync_interval_secs = secs
                .parse()
                .map_err(|e| crate::Error::Config(format!("MIRROR_RESYNC_INTERVAL_SECS: {e}")))?;
        }

        Ok(config)
    }
}
