//! In-process channel for reporting metrics without a handle to [`Metrics`].
//!
//! [`Metrics::subscribe`] hands out a cloneable [`MetricsEmitter`] and spawns a
//! dispatcher that forwards every message into the pipeline. The dispatcher
//! stops once every emitter has been dropped.
//!
//! [`Metrics`]: super::Metrics
//! [`Metrics::subscribe`]: super::Metrics::subscribe

use std::{any::Any, error::Error};

use tokio::{sync::mpsc, task::JoinError};
use tracing::debug;

use super::{MetricEventParams, errors::Thrown, fields::CustomFields};

/// Source tag of errors raised outside of any task.
pub const GLOBAL_ERROR_SOURCE: &str = "globalError";

/// Source tag of failed background tasks.
pub const UNHANDLED_REJECTION_SOURCE: &str = "unhandledRejection";

/// Owned failure value carried over the bus.
#[derive(Debug)]
pub enum ReportedError {
    Error(Box<dyn Error + Send + Sync>),
    Message(String),
    Panic(Box<dyn Any + Send>),
}

impl ReportedError {
    pub fn as_thrown(&self) -> Thrown<'_> {
        match self {
            ReportedError::Error(err) => Thrown::Error(err.as_ref()),
            ReportedError::Message(message) => Thrown::Message(message),
            ReportedError::Panic(payload) => Thrown::Panic(payload.as_ref()),
        }
    }
}

impl From<JoinError> for ReportedError {
    fn from(value: JoinError) -> Self {
        if value.is_panic() {
            Self::Panic(value.into_panic())
        } else {
            Self::Message(value.to_string())
        }
    }
}

/// Message published on the bus.
#[derive(Debug)]
pub enum BusMessage {
    Event(MetricEventParams),
    Counter {
        event: String,
        data: Option<CustomFields>,
    },
    Timing {
        event: String,
        time: f64,
        data: Option<CustomFields>,
    },
    GlobalError(ReportedError),
    UnhandledRejection(ReportedError),
}

/// Cloneable publishing side of the bus.
#[derive(Clone, Debug)]
pub struct MetricsEmitter {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl MetricsEmitter {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<BusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, message: BusMessage) {
        if self.tx.send(message).is_err() {
            debug!("metrics bus closed, message dropped");
        }
    }

    pub fn event(&self, params: MetricEventParams) {
        self.publish(BusMessage::Event(params));
    }

    pub fn counter(&self, event: impl Into<String>, data: Option<CustomFields>) {
        self.publish(BusMessage::Counter {
            event: event.into(),
            data,
        });
    }

    pub fn timing(&self, event: impl Into<String>, time: f64, data: Option<CustomFields>) {
        self.publish(BusMessage::Timing {
            event: event.into(),
            time,
            data,
        });
    }

    pub fn global_error(&self, error: ReportedError) {
        self.publish(BusMessage::GlobalError(error));
    }

    pub fn unhandled_rejection(&self, error: ReportedError) {
        self.publish(BusMessage::UnhandledRejection(error));
    }

    /// Reports a background task that panicked or was cancelled.
    pub fn report_join_error(&self, error: JoinError) {
        self.unhandled_rejection(error.into());
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Routes panics into the bus as global errors, then runs the previous hook.
pub fn install_panic_hook(emitter: MetricsEmitter) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        if let Some(message) = message {
            let message = match info.location() {
                Some(location) => format!("{message} at {location}"),
                None => message,
            };
            emitter.global_error(ReportedError::Message(message));
        }
        previous(info);
    }));
}
