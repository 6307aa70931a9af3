//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Retention applied when `set` is called without one.
    /// `None` means entries are kept until deleted.
    pub default_retention: Option<Duration>,
    /// Background retention sweep interval in seconds
    pub sweep_interval: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `DEFAULT_RETENTION_SECS` - Default retention in seconds (default: unset, keep forever)
    /// - `SWEEP_INTERVAL` - Sweep frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        Self {
            default_retention: env::var("DEFAULT_RETENTION_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            sweep_interval: env::var("SWEEP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_retention: None,
            sweep_interval: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert!(config.default_retention.is_none());
        assert_eq!(config.sweep_interval, 60);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("DEFAULT_RETENTION_SECS");
        env::remove_var("SWEEP_INTERVAL");

        let config = CacheConfig::from_env();
        assert!(config.default_retention.is_none());
        assert_eq!(config.sweep_interval, 60);
    }
}
