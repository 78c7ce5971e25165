//! Relay loop: parses metric messages from the input and feeds the pipeline.

use std::time::Duration;

use dex_client::metrics::{
    CustomFields, FieldValue, MetricEventParams, Metrics, MetricsEmitter, ReportedError,
    StorageScope,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Error source of lines the relay could not understand.
const RELAY_ERROR_SOURCE: &str = "metricsRelay";

/// One line of relay input.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayMessage {
    Event {
        event: String,
        data: Option<Map<String, Value>>,
        time: Option<f64>,
        #[serde(default, rename = "isError")]
        is_error: bool,
    },
    Counter {
        event: String,
        data: Option<Map<String, Value>>,
    },
    Timing {
        event: String,
        time: f64,
        data: Option<Map<String, Value>>,
    },
    Error {
        message: String,
    },
    StartTimer {
        label: String,
        #[serde(default)]
        persistent: bool,
    },
    /// Pushes the time elapsed since `startTimer` as a timing named `event`.
    StopTimer {
        label: String,
        event: String,
        #[serde(default)]
        persistent: bool,
    },
}

/// Forwards parsed input into the metrics pipeline.
#[derive(Debug)]
pub struct MetricsRelay {
    metrics: Metrics,
    emitter: MetricsEmitter,
}

impl MetricsRelay {
    pub fn new(metrics: Metrics, emitter: MetricsEmitter) -> Self {
        Self { metrics, emitter }
    }

    /// Reads the input to its end, then keeps delivering until the queue is
    /// empty or `drain_timeout` elapses.
    pub async fn run<R>(self, input: R, drain_timeout: Duration) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let flush = self.metrics.start(tokio::time::sleep);
        let mut lines = input.lines();
        let mut forwarded = 0usize;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.handle_line(&line);
            forwarded += 1;
        }
        info!(forwarded, "input closed, draining metrics queue");

        let Self { metrics, emitter } = self;
        drop(emitter);

        let interval = metrics.config().batch_interval;
        let deadline = tokio::time::Instant::now() + drain_timeout;
        // Bus messages may still be in flight right after the input closes.
        tokio::time::sleep(interval).await;
        while metrics.queue_len() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(interval).await;
        }
        flush.stop().await;

        match metrics.queue_len() {
            0 => Ok(()),
            remaining => Err(Error::Undelivered(remaining)),
        }
    }

    pub fn handle_line(&self, line: &str) {
        match serde_json::from_str::<RelayMessage>(line) {
            Ok(message) => self.forward(message),
            Err(e) => {
                warn!(%e, "skipping malformed metrics line");
                self.metrics.push_error(&e, RELAY_ERROR_SOURCE);
            }
        }
    }

    fn forward(&self, message: RelayMessage) {
        debug!(?message, "relaying metric");
        match message {
            RelayMessage::Event {
                event,
                data,
                time,
                is_error,
            } => {
                let mut params = MetricEventParams::new(event).with_error(is_error);
                params.data = data.map(to_custom_fields);
                params.time = time;
                self.emitter.event(params);
            }
            RelayMessage::Counter { event, data } => {
                self.emitter.counter(event, data.map(to_custom_fields))
            }
            RelayMessage::Timing { event, time, data } => {
                self.emitter.timing(event, time, data.map(to_custom_fields))
            }
            RelayMessage::Error { message } => {
                self.emitter.global_error(ReportedError::Message(message))
            }
            RelayMessage::StartTimer { label, persistent } => {
                self.metrics.start_timer(&label, scope(persistent))
            }
            RelayMessage::StopTimer {
                label,
                event,
                persistent,
            } => match self.metrics.get_time(&label, true, scope(persistent)) {
                Some(elapsed) => self.emitter.timing(event, elapsed as f64, None),
                None => debug!(label, "timer not started or expired"),
            },
        }
    }
}

fn scope(persistent: bool) -> StorageScope {
    if persistent {
        StorageScope::Persistent
    } else {
        StorageScope::Session
    }
}

fn to_custom_fields(data: Map<String, Value>) -> CustomFields {
    data.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => FieldValue::String(s),
                other => FieldValue::Json(other),
            };
            (key, value)
        })
        .collect()
}
