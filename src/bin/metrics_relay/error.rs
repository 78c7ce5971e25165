//! Error types for the metrics relay.

use dex_client::error::MetricsError;

use crate::config::ConfigError;

/// Main error type for the metrics relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Failed to read input: {0}")]
    Input(#[from] std::io::Error),

    #[error("{0} metrics still queued after drain timeout")]
    Undelivered(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
