//! Environment configuration with validation

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::lock::LockConfig;
use crate::market_service::MarketServiceConfig;

/// Kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Market defaults
    pub market: MarketSettings,

    /// Lock acquisition tuning
    pub lock: LockSettings,

    /// Delta fan-out tuning
    pub broadcast: BroadcastSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSettings {
    pub default_seed_liquidity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastSettings {
    pub capacity: usize,
}

impl CoreConfig {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CoreConfig {
            market: MarketSettings {
                default_seed_liquidity: env::var("MARKET_SEED_LIQUIDITY")
                    .unwrap_or_else(|_| "100.0".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("MARKET_SEED_LIQUIDITY".to_string()))?,
            },

            lock: LockSettings {
                initial_interval_ms: env::var("LOCK_INITIAL_INTERVAL_MS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                max_interval_ms: env::var("LOCK_MAX_INTERVAL_MS")
                    .unwrap_or_else(|_| "250".to_string())
                    .parse()
                    .unwrap_or(250),
                max_elapsed_ms: env::var("LOCK_MAX_ELAPSED_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .unwrap_or(2000),
            },

            broadcast: BroadcastSettings {
                capacity: env::var("BROADCAST_CAPACITY")
                    .unwrap_or_else(|_| "1024".to_string())
                    .parse()
                    .unwrap_or(1024),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.market.default_seed_liquidity.is_finite()
            || self.market.default_seed_liquidity <= 0.0
        {
            return Err(ConfigError::InvalidValue(
                "default_seed_liquidity must be positive".to_string(),
            ));
        }

        if self.lock.initial_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "lock initial interval must be greater than 0".to_string(),
            ));
        }
        if self.lock.max_interval_ms < self.lock.initial_interval_ms {
            return Err(ConfigError::InvalidValue(
                "lock max interval must be >= initial interval".to_string(),
            ));
        }
        if self.lock.max_elapsed_ms < self.lock.max_interval_ms {
            return Err(ConfigError::InvalidValue(
                "lock max elapsed must be >= max interval".to_string(),
            ));
        }

        if self.broadcast.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "broadcast capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            initial_interval: Duration::from_millis(self.lock.initial_interval_ms),
            max_interval: Duration::from_millis(self.lock.max_interval_ms),
            max_elapsed: Duration::from_millis(self.lock.max_elapsed_ms),
        }
    }

    pub fn market_service_config(&self) -> MarketServiceConfig {
        MarketServiceConfig {
            default_seed_liquidity: self.market.default_seed_liquidity,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            market: MarketSettings {
                default_seed_liquidity: 100.0,
            },
            lock: LockSettings {
                initial_interval_ms: 10,
                max_interval_ms: 250,
                max_elapsed_ms: 2000,
            },
            broadcast: BroadcastSettings { capacity: 1024 },
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_config().max_elapsed, Duration::from_secs(2));
        assert_eq!(config.market_service_config().default_seed_liquidity, 100.0);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = CoreConfig::default();
        config.market.default_seed_liquidity = 0.0;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.lock.max_interval_ms = 1;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.broadcast.capacity = 0;
        assert!(config.validate().is_err());
    }
}
