//! Records and timers persisted across reloads.
//!
//! Both live in a [`MetricStorage`] as a single JSON object per storage key.
//! Entries older than the retention window are treated as absent on read and
//! dropped on the next write; nothing sweeps them in the background.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Serialize, de::{DeserializeOwned, Error as _}};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    clock::Clock,
    storage::{CACHED_METRICS_DATA_KEY, METRICS_TIMERS_KEY, MetricStorage, StorageScope},
};

const CREATED_FIELD: &str = "_metricDataCreated";
const METRIC_ID_FIELD: &str = "metricId";

/// Caller data stored under a metric id, stamped with its creation time.
///
/// The caller data may carry its own `metricId`; it shares the stored
/// object with the stamp fields.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CachedMetricRecord<T> {
    #[serde(rename = "_metricDataCreated")]
    pub created_at: i64,
    #[serde(rename = "metricId")]
    pub metric_id: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T: DeserializeOwned> CachedMetricRecord<T> {
    /// Parses a stored record. The caller data is read from the whole object.
    fn from_stored(value: Value) -> Result<Self, serde_json::Error> {
        let created_at = value
            .get(CREATED_FIELD)
            .and_then(Value::as_i64)
            .ok_or_else(|| serde_json::Error::missing_field(CREATED_FIELD))?;
        let metric_id = value
            .get(METRIC_ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| serde_json::Error::missing_field(METRIC_ID_FIELD))?
            .to_string();

        Ok(Self {
            created_at,
            metric_id,
            data: serde_json::from_value(value)?,
        })
    }
}

pub(crate) struct MetricsCache {
    session: Arc<dyn MetricStorage>,
    persistent: Arc<dyn MetricStorage>,
    clock: Arc<dyn Clock>,
    retention_ms: i64,
    // Serializes read-modify-write cycles on the stores.
    lock: Mutex<()>,
}

impl MetricsCache {
    pub(crate) fn new(
        session: Arc<dyn MetricStorage>,
        persistent: Arc<dyn MetricStorage>,
        clock: Arc<dyn Clock>,
        retention: Duration,
    ) -> Self {
        Self {
            session,
            persistent,
            clock,
            retention_ms: i64::try_from(retention.as_millis()).unwrap_or(i64::MAX),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn is_fresh(&self, created_at: i64, now: i64) -> bool {
        now.saturating_sub(created_at) < self.retention_ms
    }

    fn storage(&self, scope: StorageScope) -> &dyn MetricStorage {
        match scope {
            StorageScope::Session => self.session.as_ref(),
            StorageScope::Persistent => self.persistent.as_ref(),
        }
    }

    pub(crate) fn set_record<T: Serialize>(
        &self,
        metric_id: &str,
        data: T,
    ) -> CachedMetricRecord<T> {
        let _guard = self.lock.lock();
        let now = self.now_ms();
        let record = CachedMetricRecord {
            created_at: now,
            metric_id: metric_id.to_string(),
            data,
        };

        match serde_json::to_value(&record) {
            Ok(value) => {
                let mut records = self.read_object(self.session.as_ref(), CACHED_METRICS_DATA_KEY);
                records.insert(metric_id.to_string(), value);
                self.write_records(records, now);
                debug!(metric_id, "metric data cached");
            }
            Err(e) => warn!(?e, metric_id, "failed to serialize cached metric data"),
        }

        record
    }

    pub(crate) fn get_record<T: DeserializeOwned>(
        &self,
        metric_id: &str,
        clear: bool,
    ) -> Option<CachedMetricRecord<T>> {
        let _guard = self.lock.lock();
        let now = self.now_ms();
        let mut records = self.read_object(self.session.as_ref(), CACHED_METRICS_DATA_KEY);
        let total = records.len();
        records.retain(|_, record| self.record_is_fresh(record, now));
        let purged = records.len() != total;

        let record = if clear {
            records.remove(metric_id)
        } else {
            records.get(metric_id).cloned()
        };

        if clear || purged {
            self.write_records(records, now);
        }

        match CachedMetricRecord::from_stored(record?) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(?e, metric_id, "cached metric data has unexpected shape");
                None
            }
        }
    }

    pub(crate) fn start_timer(&self, label: &str, scope: StorageScope) {
        let _guard = self.lock.lock();
        let storage = self.storage(scope);
        let now = self.now_ms();
        let mut timers = self.read_object(storage, METRICS_TIMERS_KEY);
        timers.insert(label.to_string(), Value::from(now));
        self.write_timers(storage, timers, now);
        debug!(label, ?scope, "timer started");
    }

    pub(crate) fn get_time(&self, label: &str, clear: bool, scope: StorageScope) -> Option<i64> {
        let _guard = self.lock.lock();
        let storage = self.storage(scope);
        let now = self.now_ms();
        let mut timers = self.read_object(storage, METRICS_TIMERS_KEY);
        let started = timers.get(label).and_then(Value::as_i64);

        let expired = started.is_some_and(|started| !self.is_fresh(started, now));
        if clear || expired {
            timers.remove(label);
            self.write_timers(storage, timers, now);
        }

        started
            .filter(|started| self.is_fresh(*started, now))
            .map(|started| now - started)
    }

    fn record_is_fresh(&self, record: &Value, now: i64) -> bool {
        record
            .get(CREATED_FIELD)
            .and_then(Value::as_i64)
            .is_some_and(|created| self.is_fresh(created, now))
    }

    fn read_object(&self, storage: &dyn MetricStorage, key: &str) -> Map<String, Value> {
        let raw = match storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Map::new(),
            Err(e) => {
                warn!(%e, key, "failed to read metrics storage");
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(key, "discarding malformed metrics storage entry");
                Map::new()
            }
        }
    }

    fn write_records(&self, mut records: Map<String, Value>, now: i64) {
        records.retain(|_, record| self.record_is_fresh(record, now));
        self.write_object(self.session.as_ref(), CACHED_METRICS_DATA_KEY, records);
    }

    fn write_timers(&self, storage: &dyn MetricStorage, mut timers: Map<String, Value>, now: i64) {
        timers.retain(|_, started| {
            started
                .as_i64()
                .is_some_and(|started| self.is_fresh(started, now))
        });
        self.write_object(storage, METRICS_TIMERS_KEY, timers);
    }

    fn write_object(&self, storage: &dyn MetricStorage, key: &str, object: Map<String, Value>) {
        let serialized = Value::Object(object).to_string();
        if let Err(e) = storage.set(key, &serialized) {
            warn!(%e, key, "failed to write metrics storage");
        }
    }
}
