//! Logging setup
//!
//! The library only emits `tracing` events. Hosts that do not install their
//! own subscriber can call [`init_logging`] for a stock one.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    fn level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn filter(&self) -> Result<EnvFilter> {
        let noisy = ["hyper=warn", "reqwest=info", "rustls=warn"];

        let mut filter = EnvFilter::from_default_env().add_directive(self.level().into());
        for directive in noisy {
            let directive = directive
                .parse::<Directive>()
                .map_err(|e| Error::Internal(format!("bad log directive {}: {}", directive, e)))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Install a global `fmt` subscriber
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = config.filter()?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    installed.map_err(|e| Error::Internal(format!("failed to install log subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        let config = LogConfig {
            level: "DEBUG".into(),
            ..Default::default()
        };
        assert_eq!(config.level(), Level::DEBUG);

        let config = LogConfig {
            level: "chatty".into(),
            ..Default::default()
        };
        assert_eq!(config.level(), Level::INFO);
    }

    #[test]
    fn test_config_from_yaml() {
        let config: LogConfig = serde_yaml::from_str("json: true").unwrap();
        assert!(config.json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(&LogConfig::default());
        let second = init_logging(&LogConfig {
            json: true,
            ..Default::default()
        });
        assert!(matches!(second, Err(Error::Internal(_))));
    }
}
