//! Configuration for the metrics relay.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): collector and origin details
//! - CLI arguments: batching parameters

use std::time::Duration;

use clap::Parser;
use dex_client::metrics::{MAX_BATCH_LENGTH, MetricsConfig, Origin};
use url::Url;

/// Environment configuration (collector and origin details).
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// Endpoint accepting batch reports
    pub collector_url: String,

    /// URL of the page the metrics are attributed to
    pub app_url: String,

    /// Application version (default: relay version)
    pub app_version: Option<String>,

    /// Whether the metrics come from a development build (default: false)
    pub is_dev: Option<bool>,

    /// Directory for timers that survive restarts (default: in memory)
    pub storage_dir: Option<String>,

    /// Optional timeout for collector requests (default: 10s)
    pub timeout_seconds: Option<u64>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Parse the collector endpoint.
    pub fn collector_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.collector_url)
    }

    /// Parse the page URL into the origin metadata.
    pub fn origin(&self) -> Result<Origin, url::ParseError> {
        let url = Url::parse(&self.app_url)?;
        Ok(Origin::from_url(
            &url,
            self.app_version
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            self.is_dev.unwrap_or(false),
        ))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(10))
    }
}

/// CLI arguments for the relay.
#[derive(Debug, Parser)]
#[command(name = "metrics-relay")]
#[command(about = "Forwards JSON-lines metrics from stdin to the collector")]
pub struct CliConfig {
    /// Pause between two delivery attempts, in milliseconds
    #[arg(long, default_value = "1000")]
    pub batch_interval_ms: u64,

    /// Maximum number of items per delivered batch
    #[arg(long, default_value_t = MAX_BATCH_LENGTH)]
    pub max_batch_len: usize,

    /// How long to keep delivering queued metrics after stdin closes
    #[arg(long, default_value = "10")]
    pub drain_timeout_secs: u64,
}

impl CliConfig {
    /// Combine CLI and origin into the pipeline configuration.
    pub fn to_metrics_config(&self, origin: Origin) -> Result<MetricsConfig, ConfigError> {
        if self.batch_interval_ms == 0 {
            return Err(ConfigError::ZeroBatchInterval);
        }

        if self.max_batch_len == 0 {
            return Err(ConfigError::ZeroBatchLength);
        }

        let mut config = MetricsConfig::default().with_origin(origin);
        if self.max_batch_len > config.max_queue_len {
            return Err(ConfigError::BatchLongerThanQueue(config.max_queue_len));
        }

        config.batch_interval = Duration::from_millis(self.batch_interval_ms);
        config.max_batch_len = self.max_batch_len;
        Ok(config)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("batch_interval_ms cannot be zero")]
    ZeroBatchInterval,

    #[error("max_batch_len cannot be zero")]
    ZeroBatchLength,

    #[error("max_batch_len cannot exceed the queue length of {0}")]
    BatchLongerThanQueue(usize),
}
