//! Long-task observation.

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Metrics, fields::CustomFields};

/// Name of the entries attributed to the application itself.
pub const LONG_TASK_SELF_NAME: &str = "self";

/// Timing event a qualifying long task is reported as.
pub const LONG_TASK_TIMING_EVENT: &str = "longtasks.self.timing";

pub const LONG_TASK_ERROR_SOURCE: &str = "subscribeToLongTasks";

/// A task that blocked the runtime longer than the reporting threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct PerformanceEntry {
    pub name: String,
    /// Milliseconds since the observed runtime started.
    pub start_time: f64,
    /// Milliseconds.
    pub duration: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("long task observation is not supported")]
    Unsupported,

    #[error("long task observer failed: {0}")]
    Failed(String),
}

impl Metrics {
    /// Reports long tasks from the observer stream as timings.
    ///
    /// A setup failure is reported as an error and nothing is spawned. An
    /// error item is reported the same way and ends the observation.
    pub fn observe_long_tasks<S>(
        &self,
        observer: Result<S, ObserverError>,
    ) -> Option<JoinHandle<()>>
    where
        S: Stream<Item = Result<PerformanceEntry, ObserverError>> + Send + 'static,
    {
        let entries = match observer {
            Ok(entries) => entries,
            Err(e) => {
                self.push_error(&e, LONG_TASK_ERROR_SOURCE);
                return None;
            }
        };

        let metrics = self.clone();
        Some(tokio::spawn(async move {
            futures::pin_mut!(entries);
            while let Some(entry) = entries.next().await {
                match entry {
                    Ok(entry) => metrics.record_long_task(&entry),
                    Err(e) => {
                        metrics.push_error(&e, LONG_TASK_ERROR_SOURCE);
                        break;
                    }
                }
            }
            debug!("long task observer disconnected");
        }))
    }

    fn record_long_task(&self, entry: &PerformanceEntry) {
        if entry.name != LONG_TASK_SELF_NAME {
            return;
        }
        let is_initial_load = self.is_initial_load();
        debug!(duration = entry.duration, is_initial_load, "long task observed");
        self.push_timing(
            LONG_TASK_TIMING_EVENT,
            entry.duration,
            Some(CustomFields::new().with("isInitialLoad", is_initial_load)),
        );
    }
}
