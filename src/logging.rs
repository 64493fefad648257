//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {0:?}: {1}")]
    Filter(String, String),
    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Install the global `tracing` subscriber in the configured format.
pub fn init(cfg: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.level)
            .map_err(|e| LoggingError::Filter(cfg.level.clone(), e.to_string()))?,
    };

    let result = match cfg.format.as_str() {
        "pretty" => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };
    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
