//! Test doubles for the metrics pipeline.
//!
//! [`MockTransport`] records every batch it receives and answers from a
//! script, falling back to a default status once the script is exhausted.
//!
//! [`ManualClock`] only moves when told to, which makes retention windows
//! of cached records and timers deterministic.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicI64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    error::MetricsError,
    metrics::{BatchReport, Clock, MetricsTransport, TransportResponse},
};

/// Scripted answer of the [`MockTransport`].
#[derive(Clone, Debug)]
enum Reply {
    Response(TransportResponse),
    Failure(String),
}

#[derive(Debug)]
pub struct MockTransport {
    default_status: u16,
    script: Mutex<VecDeque<Reply>>,
    batches: Mutex<Vec<BatchReport>>,
}

impl MockTransport {
    /// Transport answering `200` unless scripted otherwise.
    pub fn always_ok() -> Self {
        Self::with_default_status(200)
    }

    /// Transport answering `status` unless scripted otherwise.
    pub fn with_default_status(status: u16) -> Self {
        Self {
            default_status: status,
            script: Mutex::new(VecDeque::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response, answered after the replies scripted before it.
    pub fn respond_with(&self, status: u16, body: &str) {
        self.script
            .lock()
            .push_back(Reply::Response(TransportResponse::new(status, body)));
    }

    /// Queues a failure to get any response at all.
    pub fn fail_with(&self, reason: &str) {
        self.script
            .lock()
            .push_back(Reply::Failure(reason.to_string()));
    }

    /// Every batch received so far, in order, including failed ones.
    pub fn batches(&self) -> Vec<BatchReport> {
        self.batches.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl MetricsTransport for MockTransport {
    async fn post_batch(&self, batch: &BatchReport) -> Result<TransportResponse, MetricsError> {
        self.batches.lock().push(batch.clone());
        let reply = self.script.lock().pop_front();
        match reply {
            Some(Reply::Response(resp)) => Ok(resp),
            Some(Reply::Failure(reason)) => Err(MetricsError::Transport(reason)),
            None => Ok(TransportResponse::new(self.default_status, "")),
        }
    }
}

/// Clock that only advances on demand.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
