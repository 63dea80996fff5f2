//! Structured logging setup
//!
//! The crate only emits `tracing` events under `tether::*` targets
//! (`session`, `association`, `dependency`, `backend`, `transaction`).
//! Applications and tests call [`init_logging`] once to install a subscriber.

use std::env;
use std::io;

use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level for `tether::*` events when no directive overrides it
    pub level: String,
    pub format: LogFormat,
    /// Full `EnvFilter` directive, e.g. `tether::dependency=debug,tether=warn`
    pub directive: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            directive: None,
        }
    }
}

impl LoggingConfig {
    /// Every association load, cascade step and backend call
    pub fn development() -> Self {
        Self {
            level: "trace".to_string(),
            ..Self::default()
        }
    }

    /// Only errors; keeps test output readable
    pub fn test() -> Self {
        Self {
            level: "error".to_string(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `TETHER_LOG` (a directive) and
    /// `TETHER_LOG_FORMAT` (`json` or `text`)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(directive) = env::var("TETHER_LOG") {
            config.directive = Some(directive);
        }
        if let Ok(format) = env::var("TETHER_LOG_FORMAT") {
            if format.eq_ignore_ascii_case("json") {
                config.format = LogFormat::Json;
            }
        }
        config
    }

    pub fn with_directive<S: Into<String>>(mut self, directive: S) -> Self {
        self.directive = Some(directive.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn filter_directive(&self) -> String {
        match &self.directive {
            Some(directive) => directive.clone(),
            None => format!("tether={}", self.level),
        }
    }
}

/// Install a global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(config.filter_directive())?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(Layer::new().with_writer(io::stdout).json())
            .try_init()?,
        LogFormat::Text => registry.with(Layer::new().with_writer(io::stdout)).try_init()?,
    }

    tracing::debug!(
        target: "tether::logging",
        "Logging initialized ({}, {:?})",
        config.filter_directive(),
        config.format
    );
    Ok(())
}
