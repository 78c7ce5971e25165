//! Client telemetry pipeline.
//!
//! # Overview
//!
//! [`Metrics`] accepts events, counters and timings from anywhere in the
//! application, keeps them in a bounded in-memory queue and ships them to a
//! remote collector in batches from a background flush loop.
//!
//! Nothing here fails towards the caller: delivery failures are retried or
//! reported as `error` metrics, storage failures are logged and ignored.
//!
//! # Lifecycle
//!
//! * Build the service with [`Metrics::builder`] at the composition root and
//!   pass clones of it around.
//! * Attach a [`MetricsTransport`] whenever it becomes available; until then
//!   metrics simply accumulate.
//! * Call [`Metrics::start`] once to spawn the flush loop and keep the returned
//!   [`FlushHandle`] to stop it.
//! * Optionally [`Metrics::subscribe`] to hand out [`MetricsEmitter`]s to code
//!   that should not hold the service itself.
//!
//! # Delivery
//!
//! Every cycle takes at most `max_batch_len` items from the front of the queue
//! and posts them in a single request, then sleeps `batch_interval`. A
//! successful answer drops the batch, a `400` drops it and reports the
//! collector's complaint as an error, anything else puts the batch back in
//! front of the queue so it is retried before newer items.

mod bus;
mod cache;
mod clock;
mod errors;
mod fields;
mod flush;
mod observer;
mod payload;
mod storage;
mod transport;

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{task::JoinHandle, time::Instant};
use tracing::debug;
use url::Url;

pub use bus::*;
pub use cache::CachedMetricRecord;
pub use clock::{Clock, SystemClock};
pub use errors::{ErrorMetricData, Thrown};
pub use fields::{BANNED_CUSTOM_FIELDS, CustomFields, ERROR_STACK_FIELD, FieldValue};
pub use flush::{CycleOutcome, FlushHandle};
pub use observer::*;
pub use payload::*;
pub use storage::*;
pub use transport::*;

use cache::MetricsCache;

pub const MAX_METRICS_STORE_TIME: Duration = Duration::from_secs(60);
pub const MAX_QUEUE_LENGTH: usize = 500;
pub const MAX_BATCH_LENGTH: usize = 100;
pub const BATCH_INTERVAL: Duration = Duration::from_millis(1000);
pub const INITIAL_LOAD_WINDOW: Duration = Duration::from_secs(20);

/// Name of the event every reported error is pushed as.
pub const ERROR_EVENT: &str = "error";

pub const ACCOUNT_INITED_EVENT: &str = "accountInited";

/// Field of the global metric data copied into counters and timings.
pub const AB_FLAGS_FIELD: &str = "abFlags";

/// Error source of failures raised by the pipeline itself.
pub const METRICS_ERROR_SOURCE: &str = "Metrics";

/// Tuning and origin metadata of the pipeline.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub origin: Origin,
    /// Pause between two flush cycles.
    pub batch_interval: Duration,
    /// Oldest items are dropped beyond this length.
    pub max_queue_len: usize,
    pub max_batch_len: usize,
    /// Age after which cached records and timers are treated as absent.
    pub retention: Duration,
    /// Long tasks observed within this window after start count as initial load.
    pub initial_load_window: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            origin: Origin::default(),
            batch_interval: BATCH_INTERVAL,
            max_queue_len: MAX_QUEUE_LENGTH,
            max_batch_len: MAX_BATCH_LENGTH,
            retention: MAX_METRICS_STORE_TIME,
            initial_load_window: INITIAL_LOAD_WINDOW,
        }
    }
}

impl MetricsConfig {
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

/// Parameters of a pushed event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricEventParams {
    pub event: String,
    pub data: Option<CustomFields>,
    pub time: Option<f64>,
    pub is_error: bool,
}

impl MetricEventParams {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: CustomFields) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_error(mut self, is_error: bool) -> Self {
        self.is_error = is_error;
        self
    }
}

/// Builds a [`Metrics`] service.
pub struct MetricsBuilder {
    config: MetricsConfig,
    session_storage: Option<Arc<dyn MetricStorage>>,
    persistent_storage: Option<Arc<dyn MetricStorage>>,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn MetricsTransport>>,
}

impl MetricsBuilder {
    /// Storage for cached metric records and session timers (default: in memory).
    pub fn with_session_storage(mut self, storage: Arc<dyn MetricStorage>) -> Self {
        self.session_storage = Some(storage);
        self
    }

    /// Storage for timers that outlive the session (default: in memory).
    pub fn with_persistent_storage(mut self, storage: Arc<dyn MetricStorage>) -> Self {
        self.persistent_storage = Some(storage);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MetricsTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Metrics {
        let session = self
            .session_storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let persistent = self
            .persistent_storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache = MetricsCache::new(session, persistent, clock, self.config.retention);

        Metrics {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    origin: self.config.origin.clone(),
                    queue: VecDeque::new(),
                    transport: self.transport,
                    global: CustomFields::new(),
                    wallets: None,
                    account_inited: false,
                }),
                config: self.config,
                cache,
                started_at: Instant::now(),
            }),
        }
    }
}

/// Telemetry pipeline service. Clones share the same queue.
#[derive(Clone, derive_more::Debug)]
pub struct Metrics {
    #[debug(skip)]
    shared: Arc<Shared>,
}

struct Shared {
    config: MetricsConfig,
    cache: MetricsCache,
    started_at: Instant,
    state: Mutex<State>,
}

struct State {
    origin: Origin,
    queue: VecDeque<BatchReportItem>,
    transport: Option<Arc<dyn MetricsTransport>>,
    global: CustomFields,
    wallets: Option<Vec<String>>,
    account_inited: bool,
}

impl State {
    fn ab_flags(&self) -> Option<Value> {
        self.global.get(AB_FLAGS_FIELD).map(FieldValue::to_json)
    }
}

impl Metrics {
    pub fn builder(config: MetricsConfig) -> MetricsBuilder {
        MetricsBuilder {
            config,
            session_storage: None,
            persistent_storage: None,
            clock: None,
            transport: None,
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.shared.config
    }

    /// Attaches the transport; queued items go out on the next cycle.
    pub fn set_transport(&self, transport: Arc<dyn MetricsTransport>) {
        let mut state = self.shared.state.lock();
        state.transport = Some(transport);
        debug!(queued = state.queue.len(), "metrics transport attached");
    }

    pub fn clear_transport(&self) {
        self.shared.state.lock().transport = None;
    }

    pub fn has_transport(&self) -> bool {
        self.shared.state.lock().transport.is_some()
    }

    /// Merges fields into the data attached to every subsequent event.
    pub fn set_global_metric_data(&self, data: CustomFields) {
        self.shared.state.lock().global.merge(data);
    }

    /// Identifiers of the connected wallets, attached to every event.
    pub fn set_wallet_names(&self, wallets: Vec<String>) {
        self.shared.state.lock().wallets = Some(wallets);
    }

    /// Updates the page the metrics are reported from.
    pub fn set_location(&self, url: &Url) {
        let mut state = self.shared.state.lock();
        state.origin.host = payload::host_of(url);
        state.origin.url = url.to_string();
    }

    pub fn origin(&self) -> Origin {
        self.shared.state.lock().origin.clone()
    }

    pub fn push_event(&self, params: MetricEventParams) {
        let mut state = self.shared.state.lock();

        let mut custom_fields = params.data.map(CustomFields::serialize).unwrap_or_default();
        // Global data is spread as is, only the caller data is filtered and cut.
        custom_fields.extend(
            state
                .global
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_json())),
        );
        if let Some(wallets) = &state.wallets {
            custom_fields.insert("wallets".to_string(), Value::from(wallets.clone()));
        }

        let origin = &state.origin;
        let payload = EventPayload {
            is_dev: origin.is_dev,
            host: origin.host.clone(),
            url: origin.url.clone(),
            event: params.event,
            version: origin.version.clone(),
            is_error: params.is_error,
            time: params.time,
            custom_fields,
        };

        debug!(event = %payload.event, is_error = payload.is_error, "metrics push event");
        self.enqueue(&mut state, BatchReportItem::Event(payload));
    }

    pub fn push_counter(&self, event: impl Into<String>, data: Option<CustomFields>) {
        let mut state = self.shared.state.lock();
        let origin = &state.origin;
        let payload = CounterPayload {
            event: event.into(),
            is_dev: origin.is_dev,
            host: origin.host.clone(),
            url: origin.url.clone(),
            version: origin.version.clone(),
            ab_flags: state.ab_flags(),
            custom_fields: data.map(CustomFields::serialize),
        };

        debug!(event = %payload.event, "metrics push counter");
        self.enqueue(&mut state, BatchReportItem::Counter(payload));
    }

    pub fn push_timing(&self, event: impl Into<String>, time: f64, data: Option<CustomFields>) {
        let mut state = self.shared.state.lock();
        let origin = &state.origin;
        let payload = TimingPayload {
            event: event.into(),
            is_dev: origin.is_dev,
            host: origin.host.clone(),
            url: origin.url.clone(),
            version: origin.version.clone(),
            time,
            ab_flags: state.ab_flags(),
            custom_fields: data.map(CustomFields::serialize),
        };

        debug!(event = %payload.event, time, "metrics push timing");
        self.enqueue(&mut state, BatchReportItem::Timing(payload));
    }

    /// Pushes an `error` event describing the failure.
    ///
    /// Values without a usable message are skipped silently.
    pub fn push_error<'a>(&self, error: impl Into<Thrown<'a>>, error_source: &str) {
        let Some(data) = ErrorMetricData::prepare(error.into()) else {
            debug!(error_source, "error without message skipped");
            return;
        };

        self.push_event(
            MetricEventParams::new(ERROR_EVENT)
                .with_error(true)
                .with_data(data.into_fields(error_source)),
        );
    }

    /// Pushes the `accountInited` event, once per service.
    pub fn push_account_inited(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.account_inited {
                return;
            }
            state.account_inited = true;
        }
        self.push_event(
            MetricEventParams::new(ACCOUNT_INITED_EVENT).with_data(CustomFields::new()),
        );
    }

    fn enqueue(&self, state: &mut State, item: BatchReportItem) {
        state.queue.push_back(item);
        trim_queue(&mut state.queue, self.shared.config.max_queue_len);
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Snapshot of the queued items, oldest first.
    pub fn queued_items(&self) -> Vec<BatchReportItem> {
        self.shared.state.lock().queue.iter().cloned().collect()
    }

    /// Caches the record under `metric_id` so it can be correlated after a reload.
    pub fn set_cached_metric_data<T: Serialize>(
        &self,
        metric_id: &str,
        data: T,
    ) -> CachedMetricRecord<T> {
        self.shared.cache.set_record(metric_id, data)
    }

    /// Returns the cached record unless it is missing or expired. `clear`
    /// removes it from storage.
    pub fn get_cached_metric_data<T: DeserializeOwned>(
        &self,
        metric_id: &str,
        clear: bool,
    ) -> Option<CachedMetricRecord<T>> {
        self.shared.cache.get_record(metric_id, clear)
    }

    pub fn start_timer(&self, label: &str, scope: StorageScope) {
        self.shared.cache.start_timer(label, scope);
    }

    /// Milliseconds since [`Self::start_timer`], unless never started or expired.
    pub fn get_time(&self, label: &str, clear: bool, scope: StorageScope) -> Option<i64> {
        self.shared.cache.get_time(label, clear, scope)
    }

    /// Whether the service was created within the initial load window.
    pub fn is_initial_load(&self) -> bool {
        self.shared.started_at.elapsed() < self.shared.config.initial_load_window
    }

    /// Spawns the dispatcher forwarding bus messages into this service.
    ///
    /// The dispatcher ends once every returned emitter is dropped.
    pub fn subscribe(&self) -> (MetricsEmitter, JoinHandle<()>) {
        let (emitter, mut rx) = MetricsEmitter::channel();
        let metrics = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                metrics.dispatch(message);
            }
            debug!("metrics bus dispatcher stopped");
        });
        (emitter, handle)
    }

    pub fn dispatch(&self, message: BusMessage) {
        match message {
            BusMessage::Event(params) => self.push_event(params),
            BusMessage::Counter { event, data } => self.push_counter(event, data),
            BusMessage::Timing { event, time, data } => self.push_timing(event, time, data),
            BusMessage::GlobalError(error) => {
                self.push_error(error.as_thrown(), GLOBAL_ERROR_SOURCE)
            }
            BusMessage::UnhandledRejection(error) => {
                self.push_error(error.as_thrown(), UNHANDLED_REJECTION_SOURCE)
            }
        }
    }
}

fn trim_queue(queue: &mut VecDeque<BatchReportItem>, max_len: usize) {
    if queue.len() > max_len {
        let dropped = queue.len() - max_len;
        queue.drain(..dropped);
        debug!(dropped, "metrics queue trimmed");
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::U256;
    use serde_json::json;

    use super::*;
    use crate::error::MetricsError;

    fn metrics() -> Metrics {
        let origin = Origin::from_url(
            &Url::parse("https://app.example/#/trade").unwrap(),
            "2.1.0",
            false,
        );
        Metrics::builder(MetricsConfig::default().with_origin(origin)).build()
    }

    fn event_payload(item: &BatchReportItem) -> &EventPayload {
        match item {
            BatchReportItem::Event(p) => p,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_push_event_serializes_custom_fields() {
        let metrics = metrics();
        metrics.push_event(
            MetricEventParams::new("orderSubmitted").with_data(
                CustomFields::new()
                    .with("metricId", "order:1")
                    .with("sizeDeltaUsd", U256::from(123456789u64)),
            ),
        );

        let items = metrics.queued_items();
        let payload = event_payload(&items[0]);
        assert_eq!(payload.host, "app.example");
        assert_eq!(payload.version, "2.1.0");
        assert!(!payload.is_error);
        assert_eq!(payload.custom_fields["sizeDeltaUsd"], json!("123456789"));
        assert!(!payload.custom_fields.contains_key("metricId"));
    }

    #[test]
    fn test_push_event_merges_global_data_and_wallets() {
        let metrics = metrics();
        metrics.set_global_metric_data(CustomFields::from([("isWalletConnected", true)]));
        metrics.set_global_metric_data(CustomFields::from([("abFlags", json!({"testA": true}))]));
        metrics.set_wallet_names(vec!["MetaMask".to_string()]);
        metrics.push_event(MetricEventParams::new("pageView"));

        let items = metrics.queued_items();
        let fields = &event_payload(&items[0]).custom_fields;
        assert_eq!(fields["isWalletConnected"], json!(true));
        assert_eq!(fields["abFlags"], json!({"testA": true}));
        assert_eq!(fields["wallets"], json!(["MetaMask"]));
    }

    #[test]
    fn test_global_data_is_not_filtered() {
        let metrics = metrics();
        let referrer = "r".repeat(700);
        metrics.set_global_metric_data(
            CustomFields::new()
                .with("metricId", "session:1")
                .with("referrer", referrer.clone()),
        );
        metrics.push_event(
            MetricEventParams::new("pageView")
                .with_data(CustomFields::from([("metricId", "page:1")])),
        );

        let items = metrics.queued_items();
        let fields = &event_payload(&items[0]).custom_fields;
        assert_eq!(fields["metricId"], json!("session:1"));
        assert_eq!(fields["referrer"], json!(referrer));
    }

    #[test]
    fn test_counter_and_timing_carry_ab_flags_only() {
        let metrics = metrics();
        metrics.set_global_metric_data(
            CustomFields::new()
                .with("abFlags", json!({"testA": false}))
                .with("account", "0xabc"),
        );
        metrics.push_counter("chartLoaded", None);
        metrics.push_timing(
            "chartLoaded.timing",
            42.5,
            Some(CustomFields::from([("pair", "BTC/USD")])),
        );

        let items = metrics.queued_items();
        let BatchReportItem::Counter(counter) = &items[0] else {
            panic!("expected counter");
        };
        assert_eq!(counter.ab_flags, Some(json!({"testA": false})));
        assert!(counter.custom_fields.is_none());

        let BatchReportItem::Timing(timing) = &items[1] else {
            panic!("expected timing");
        };
        assert_eq!(timing.time, 42.5);
        let fields = timing.custom_fields.as_ref().unwrap();
        assert_eq!(fields["pair"], json!("BTC/USD"));
        assert!(!fields.contains_key("account"));
    }

    #[test]
    fn test_push_error_builds_error_event() {
        let metrics = metrics();
        let err = MetricsError::Storage("quota exceeded".to_string());
        metrics.push_error(&err, "cache");

        let items = metrics.queued_items();
        let payload = event_payload(&items[0]);
        assert_eq!(payload.event, ERROR_EVENT);
        assert!(payload.is_error);
        assert_eq!(
            payload.custom_fields["errorMessage"],
            json!("storage error: quota exceeded")
        );
        assert_eq!(payload.custom_fields["errorName"], json!("StorageError"));
        assert_eq!(payload.custom_fields["errorSource"], json!("cache"));
    }

    #[test]
    fn test_push_error_without_message_is_skipped() {
        let metrics = metrics();
        metrics.push_error("", "cache");
        assert_eq!(metrics.queue_len(), 0);
    }

    #[test]
    fn test_account_inited_is_pushed_once() {
        let metrics = metrics();
        metrics.push_account_inited();
        metrics.push_account_inited();
        assert_eq!(metrics.queue_len(), 1);
        assert_eq!(metrics.queued_items()[0].event(), ACCOUNT_INITED_EVENT);
    }

    #[test]
    fn test_queue_is_bounded_on_push() {
        let metrics = metrics();
        for i in 0..600 {
            metrics.push_counter(format!("c{i}"), None);
        }
        let items = metrics.queued_items();
        assert_eq!(items.len(), MAX_QUEUE_LENGTH);
        assert_eq!(items[0].event(), "c100");
        assert_eq!(items[499].event(), "c599");
    }

    #[test]
    fn test_set_location_updates_origin() {
        let metrics = metrics();
        metrics.set_location(&Url::parse("https://other.example:8443/#/pools").unwrap());
        metrics.push_counter("navigated", None);

        let BatchReportItem::Counter(counter) = &metrics.queued_items()[0] else {
            panic!("expected counter");
        };
        assert_eq!(counter.host, "other.example:8443");
        assert_eq!(counter.url, "https://other.example:8443/#/pools");
    }

    #[tokio::test]
    async fn test_bus_dispatches_into_queue() {
        let metrics = metrics();
        let (emitter, handle) = metrics.subscribe();

        emitter.event(MetricEventParams::new("fromBus"));
        emitter.counter("busCounter", None);
        emitter.timing("busTiming", 10.0, None);
        emitter.global_error(ReportedError::Message("boom".to_string()));
        emitter.unhandled_rejection(ReportedError::Message(String::new()));
        drop(emitter);
        handle.await.unwrap();

        let events: Vec<_> = metrics
            .queued_items()
            .iter()
            .map(|i| i.event().to_string())
            .collect();
        assert_eq!(events, ["fromBus", "busCounter", "busTiming", "error"]);
        let items = metrics.queued_items();
        assert_eq!(
            event_payload(&items[3]).custom_fields["errorSource"],
            json!(GLOBAL_ERROR_SOURCE)
        );
    }

    #[tokio::test]
    async fn test_panic_hook_reports_global_error() {
        let metrics = metrics();
        let (emitter, handle) = metrics.subscribe();

        let previous = std::panic::take_hook();
        install_panic_hook(emitter);
        let result = std::panic::catch_unwind(|| panic!("chart crashed"));
        // Dropping the installed hook releases the last emitter.
        drop(std::panic::take_hook());
        std::panic::set_hook(previous);
        assert!(result.is_err());
        handle.await.unwrap();

        let items = metrics.queued_items();
        // The hook is process wide, panics of other tests may land here too.
        let payload = items
            .iter()
            .map(event_payload)
            .find(|p| {
                p.custom_fields["errorMessage"]
                    .as_str()
                    .is_some_and(|m| m.starts_with("chart crashed at "))
            })
            .unwrap();
        assert!(payload.is_error);
        assert_eq!(payload.event, ERROR_EVENT);
        assert_eq!(
            payload.custom_fields["errorSource"],
            json!(GLOBAL_ERROR_SOURCE)
        );
        assert!(payload.custom_fields["errorMessage"]
            .as_str()
            .unwrap()
            .contains("mod.rs"));
    }

    #[tokio::test]
    async fn test_failed_task_reported_as_unhandled_rejection() {
        let metrics = metrics();
        let (emitter, handle) = metrics.subscribe();

        let task = tokio::spawn(async { panic!("keeper crashed") });
        let err = task.await.unwrap_err();
        emitter.report_join_error(err);
        drop(emitter);
        handle.await.unwrap();

        let items = metrics.queued_items();
        let payload = event_payload(&items[0]);
        assert_eq!(payload.custom_fields["errorMessage"], json!("keeper crashed"));
        assert_eq!(
            payload.custom_fields["errorSource"],
            json!(UNHANDLED_REJECTION_SOURCE)
        );
    }

    #[tokio::test]
    async fn test_long_tasks_become_timings() {
        let metrics = metrics();
        let entries = futures::stream::iter([
            Ok(PerformanceEntry {
                name: "self".to_string(),
                start_time: 10.0,
                duration: 120.0,
            }),
            Ok(PerformanceEntry {
                name: "cross-origin-descendant".to_string(),
                start_time: 20.0,
                duration: 80.0,
            }),
            Err(ObserverError::Failed("entry list unavailable".to_string())),
            Ok(PerformanceEntry {
                name: "self".to_string(),
                start_time: 30.0,
                duration: 60.0,
            }),
        ]);

        metrics
            .observe_long_tasks(Ok(entries))
            .unwrap()
            .await
            .unwrap();

        let items = metrics.queued_items();
        assert_eq!(items.len(), 2);
        let BatchReportItem::Timing(timing) = &items[0] else {
            panic!("expected timing");
        };
        assert_eq!(timing.event, LONG_TASK_TIMING_EVENT);
        assert_eq!(timing.time, 120.0);
        assert_eq!(
            timing.custom_fields.as_ref().unwrap()["isInitialLoad"],
            json!(true)
        );
        assert_eq!(
            event_payload(&items[1]).custom_fields["errorSource"],
            json!(LONG_TASK_ERROR_SOURCE)
        );
    }

    #[tokio::test]
    async fn test_unsupported_observer_is_reported() {
        let metrics = metrics();
        let observer: Result<futures::stream::Empty<_>, _> = Err(ObserverError::Unsupported);
        assert!(metrics.observe_long_tasks(observer).is_none());
        assert_eq!(metrics.queued_items()[0].event(), ERROR_EVENT);
    }
}
