//! Session configuration loaded from the environment

use std::env;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {field}, expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Behaviour switches for a [`Session`](crate::session::Session)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Emit one debug event per backend call
    pub log_queries: bool,
    /// Honour `<name>_count` owner columns and `counter_cache` declarations
    pub use_counter_cache: bool,
    /// Wrap saves, destroy cascades and write-through replacements in a transaction
    pub transactional_cascades: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_queries: false,
            use_counter_cache: true,
            transactional_cascades: true,
        }
    }
}

impl SessionConfig {
    /// Load configuration from `TETHER_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            log_queries: get_env_bool("TETHER_LOG_QUERIES", defaults.log_queries)?,
            use_counter_cache: get_env_bool("TETHER_COUNTER_CACHE", defaults.use_counter_cache)?,
            transactional_cascades: get_env_bool(
                "TETHER_TRANSACTIONAL_CASCADES",
                defaults.transactional_cascades,
            )?,
        })
    }

    pub fn with_log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn with_counter_cache(mut self, enabled: bool) -> Self {
        self.use_counter_cache = enabled;
        self
    }

    pub fn with_transactional_cascades(mut self, enabled: bool) -> Self {
        self.transactional_cascades = enabled;
        self
    }
}

fn get_env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_bool(key, &value),
        Err(_) => Ok(default),
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: "true/false, 1/0 or yes/no".to_string(),
        }),
    }
}
