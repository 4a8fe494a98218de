//! Configuration for the verification engine

use serde::{Deserialize, Serialize};

/// Verification policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Oldest claimable production time, in days before submission
    pub retention_days: i64,

    /// Hours a pending submission stays resolvable before it expires
    pub verification_window_hours: i64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            verification_window_hours: 24,
        }
    }
}

impl VerificationConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VerificationConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = VerificationConfig::default();

        if let Ok(days) = std::env::var("VERIFICATION_RETENTION_DAYS") {
            config.retention_days = days
                .parse()
                .map_err(|e| crate::Error::Config(format!("VERIFICATION_RETENTION_DAYS: {e}")))?;
        }

        if let Ok(hours) = std::env::var("VERIFICATION_WINDOW_HOURS") {
            config.verification_window_hours = hours
                .parse()
                .map_err(|e| crate::Error::Config(format!("VERIFICATION_WINDOW_HOURS: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.retention_days <= 0 || self.verification_window_hours <= 0 {
            return Err(crate::Error::Config(
                "retention and verification windows must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
