//! Configuration for the marketplace engine

use serde::{Deserialize, Serialize};

/// Highest expressible fee: 100% in basis points
pub const MAX_FEE_RATE_BPS: u64 = 10_000;

/// Marketplace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Platform fee in basis points of the purchase total
    pub fee_rate_bps: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self { fee_rate_bps: 250 }
    }
}

impl MarketConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MarketConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = MarketConfig::default();

        if let Ok(bps) = std::env::var("MARKET_FEE_RATE_BPS") {
            config.fee_rate_bps = bps
                .parse()
                .map_err(|e| crate::Error::Config(format!("MARKET_FEE_RATE_BPS: {e}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.fee_rate_bps > MAX_FEE_RATE_BPS {
            return Err(crate::Error::Config(format!(
                "fee_rate_bps {} exceeds {MAX_FEE_RATE_BPS}",
                self.fee_rate_bps
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MarketConfig::default();
        assert_eq!(config.fee_rate_bps, 250);
    }
}
