//! Metrics relay for DEX client telemetry.
//!
//! This binary reads JSON-lines metric messages from stdin and ships them
//! to the collector in batches, draining the queue before it exits.

mod config;
mod error;
mod relay;

use std::{process::exit, sync::Arc};

use clap::Parser;
use dex_client::metrics::{FileStorage, HttpTransport, Metrics, install_panic_hook};
use tokio::io::BufReader;
use tracing::{error, info};

use config::{CliConfig, EnvConfig};
use error::Result;
use relay::MetricsRelay;

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    // Parse environment configuration
    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    // Parse CLI arguments
    let cli_config = CliConfig::parse();

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(env_config, cli_config).await {
        error!(%e, "Metrics relay failed, shutting down");
        exit(1);
    }
}

async fn run(env_config: EnvConfig, cli_config: CliConfig) -> Result<()> {
    let origin = env_config.origin()?;
    let metrics_config = cli_config.to_metrics_config(origin)?;
    let collector_url = env_config.collector_url()?;
    let transport = HttpTransport::new(collector_url, env_config.timeout())?;

    info!(
        collector = %transport.endpoint(),
        host = %metrics_config.origin.host,
        batch_interval = ?metrics_config.batch_interval,
        max_batch_len = metrics_config.max_batch_len,
        "Starting metrics relay"
    );

    let mut builder = Metrics::builder(metrics_config).with_transport(Arc::new(transport));
    if let Some(dir) = &env_config.storage_dir {
        builder = builder.with_persistent_storage(Arc::new(FileStorage::new(dir)?));
    }
    let metrics = builder.build();

    let (emitter, dispatcher) = metrics.subscribe();
    install_panic_hook(emitter.clone());

    let relay = MetricsRelay::new(metrics, emitter);
    let result = relay
        .run(BufReader::new(tokio::io::stdin()), cli_config.drain_timeout())
        .await;

    // The panic hook keeps an emitter alive, so the dispatcher never ends on its own.
    dispatcher.abort();
    result
}
