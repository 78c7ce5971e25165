//! Delivery of batches to the remote collector.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::payload::BatchReport;
use crate::error::MetricsError;

/// Status the collector answers with for a batch it will never accept.
pub const BAD_REQUEST_STATUS: u16 = 400;

/// HTTP-like outcome of a delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_bad_request(&self) -> bool {
        self.status == BAD_REQUEST_STATUS
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Result<Value, MetricsError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends a batch of metric items and reports how the collector answered.
///
/// `Err` stands for a failure to get any answer at all.
#[async_trait]
pub trait MetricsTransport: Send + Sync {
    async fn post_batch(&self, batch: &BatchReport) -> Result<TransportResponse, MetricsError>;
}

/// Posts batches as JSON to the collector endpoint.
#[derive(Clone, derive_more::Debug)]
pub struct HttpTransport {
    #[debug(skip)]
    http: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, MetricsError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl MetricsTransport for HttpTransport {
    #[instrument(skip(self, batch), fields(items = batch.items.len()), level = "debug")]
    async fn post_batch(&self, batch: &BatchReport) -> Result<TransportResponse, MetricsError> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(batch)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        debug!(status, "batch report posted");

        Ok(TransportResponse { status, body })
    }
}
