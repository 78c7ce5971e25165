//! Batching and delivery loop.

use std::{future::Future, time::Duration};

use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, trace, warn};

use super::{BatchReport, BatchReportItem, METRICS_ERROR_SOURCE, Metrics, trim_queue};
use crate::error::MetricsError;

/// What a single flush cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No transport attached, the queue was left untouched.
    NoTransport,
    Empty,
    /// Batch of the given size accepted by the collector.
    Delivered(usize),
    /// Batch of the given size refused with `400` and dropped.
    Rejected(usize),
    /// Batch of the given size put back in front of the queue.
    Requeued(usize),
}

/// Handle of the background flush loop.
///
/// Dropping the handle stops the loop after its current cycle.
#[derive(Debug)]
pub struct FlushHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushHandle {
    /// Signals the loop to stop and waits for the in-flight cycle to finish.
    pub async fn stop(self) {
        _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!(%e, "metrics flush loop ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Metrics {
    /// Spawns the flush loop.
    ///
    /// Each cycle runs [`Self::process_queue`] and then sleeps for the batch
    /// interval, so two delivery attempts are never closer than the interval.
    /// Start it once per service.
    pub fn start<S, SFut>(&self, sleep: S) -> FlushHandle
    where
        S: Fn(Duration) -> SFut + Send + 'static,
        SFut: Future<Output = ()> + Send,
    {
        let (stop, mut stopped) = watch::channel(false);
        let metrics = self.clone();
        let interval = self.shared.config.batch_interval;

        let handle = tokio::spawn(async move {
            debug!(?interval, "metrics flush loop started");
            loop {
                let outcome = metrics.process_queue().await;
                trace!(?outcome, "metrics flush cycle");

                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = stopped.changed() => break,
                }
            }
            debug!("metrics flush loop stopped");
        });

        FlushHandle { stop, handle }
    }

    /// Runs one flush cycle: takes a batch from the front of the queue and
    /// attempts a single delivery.
    pub async fn process_queue(&self) -> CycleOutcome {
        let (transport, items) = {
            let mut state = self.shared.state.lock();
            let Some(transport) = state.transport.clone() else {
                debug!(queued = state.queue.len(), "metrics transport is not attached");
                return CycleOutcome::NoTransport;
            };
            if state.queue.is_empty() {
                trace!("metrics queue is empty");
                return CycleOutcome::Empty;
            }

            trim_queue(&mut state.queue, self.shared.config.max_queue_len);
            let len = state.queue.len().min(self.shared.config.max_batch_len);
            let items: Vec<_> = state.queue.drain(..len).collect();
            (transport, items)
        };

        let count = items.len();
        debug!(items = count, "sending metrics batch");
        let batch = BatchReport { items };

        let failure = match transport.post_batch(&batch).await {
            Ok(resp) if resp.ok() => return CycleOutcome::Delivered(count),
            Ok(resp) if resp.is_bad_request() => {
                let details = resp.json().unwrap_or(Value::String(resp.body));
                let err = MetricsError::BadRequest(details);
                warn!(%err, items = count, "metrics batch rejected");
                self.push_error(&err, METRICS_ERROR_SOURCE);
                return CycleOutcome::Rejected(count);
            }
            Ok(resp) => MetricsError::Http {
                status: resp.status,
                reason: resp.body,
            },
            Err(e) => e,
        };

        warn!(%failure, items = count, "error sending metrics batch, will retry");
        self.requeue(batch.items);
        CycleOutcome::Requeued(count)
    }

    fn requeue(&self, items: Vec<BatchReportItem>) {
        let mut state = self.shared.state.lock();
        for item in items.into_iter().rev() {
            state.queue.push_front(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        metrics::{MetricEventParams, MetricsConfig},
        testing::MockTransport,
    };

    fn metrics_with(transport: &Arc<MockTransport>) -> Metrics {
        let metrics = Metrics::builder(MetricsConfig::default()).build();
        metrics.set_transport(transport.clone());
        metrics
    }

    fn push(metrics: &Metrics, events: std::ops::Range<usize>) {
        for i in events {
            metrics.push_event(MetricEventParams::new(format!("e{i}")));
        }
    }

    #[tokio::test]
    async fn test_cycle_without_transport_keeps_queue() {
        let metrics = Metrics::builder(MetricsConfig::default()).build();
        push(&metrics, 0..3);
        assert_eq!(metrics.process_queue().await, CycleOutcome::NoTransport);
        assert_eq!(metrics.queue_len(), 3);
    }

    #[tokio::test]
    async fn test_cycle_with_empty_queue() {
        let transport = Arc::new(MockTransport::always_ok());
        let metrics = metrics_with(&transport);
        assert_eq!(metrics.process_queue().await, CycleOutcome::Empty);
        assert!(transport.batches().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_sends_at_most_one_batch() {
        let transport = Arc::new(MockTransport::always_ok());
        let metrics = metrics_with(&transport);
        push(&metrics, 0..150);

        assert_eq!(metrics.process_queue().await, CycleOutcome::Delivered(100));
        assert_eq!(metrics.queue_len(), 50);
        assert_eq!(metrics.queued_items()[0].event(), "e100");

        assert_eq!(metrics.process_queue().await, CycleOutcome::Delivered(50));
        assert_eq!(metrics.queue_len(), 0);

        let batches = transport.batches();
        assert_eq!(batches[0].items.len(), 100);
        assert_eq!(batches[0].items[99].event(), "e99");
        assert_eq!(batches[1].items[0].event(), "e100");
    }

    #[tokio::test]
    async fn test_server_error_requeues_in_front() {
        let transport = Arc::new(MockTransport::always_ok());
        transport.respond_with(503, "unavailable");
        let metrics = metrics_with(&transport);
        push(&metrics, 0..3);

        assert_eq!(metrics.process_queue().await, CycleOutcome::Requeued(3));
        push(&metrics, 3..5);

        let events: Vec<_> = metrics
            .queued_items()
            .iter()
            .map(|i| i.event().to_string())
            .collect();
        assert_eq!(events, ["e0", "e1", "e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn test_network_error_requeues() {
        let transport = Arc::new(MockTransport::always_ok());
        transport.fail_with("connection refused");
        let metrics = metrics_with(&transport);
        push(&metrics, 0..2);

        assert_eq!(metrics.process_queue().await, CycleOutcome::Requeued(2));
        assert_eq!(metrics.process_queue().await, CycleOutcome::Delivered(2));
        assert_eq!(transport.batches().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_request_reports_error_without_retry() {
        let transport = Arc::new(MockTransport::always_ok());
        transport.respond_with(400, r#"{"error":"invalid payload"}"#);
        let metrics = metrics_with(&transport);
        push(&metrics, 0..2);

        assert_eq!(metrics.process_queue().await, CycleOutcome::Rejected(2));

        let items = metrics.queued_items();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_error());
        let crate::metrics::BatchReportItem::Event(payload) = &items[0] else {
            panic!("expected error event");
        };
        assert_eq!(payload.custom_fields["errorName"], "BadRequest");
        assert_eq!(payload.custom_fields["errorSource"], METRICS_ERROR_SOURCE);
        assert!(
            payload.custom_fields["errorMessage"]
                .as_str()
                .unwrap()
                .contains("invalid payload")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_spacing_and_stop() {
        let transport = Arc::new(MockTransport::always_ok());
        let metrics = metrics_with(&transport);
        push(&metrics, 0..250);

        let handle = metrics.start(tokio::time::sleep);
        // First cycle runs immediately, the next ones after each interval.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.batches().len(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(transport.batches().len(), 2);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(transport.batches().len(), 3);
        assert_eq!(metrics.queue_len(), 0);

        handle.stop().await;
        push(&metrics, 0..1);
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(transport.batches().len(), 3);
        assert_eq!(metrics.queue_len(), 1);
    }
}
