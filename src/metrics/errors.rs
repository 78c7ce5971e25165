//! Turning arbitrary failures into `error` metric fields.

use std::{any::Any, error::Error};

use super::fields::{CustomFields, ERROR_STACK_FIELD};
use crate::error::MetricsError;

/// A failure value as observed by the reporting code.
#[derive(Clone, Copy, Debug)]
pub enum Thrown<'a> {
    Error(&'a (dyn Error + 'static)),
    Message(&'a str),
    /// Payload of a caught panic.
    Panic(&'a (dyn Any + Send)),
}

impl<'a> From<&'a str> for Thrown<'a> {
    fn from(value: &'a str) -> Self {
        Self::Message(value)
    }
}

impl<'a, E: Error + 'static> From<&'a E> for Thrown<'a> {
    fn from(value: &'a E) -> Self {
        Self::Error(value)
    }
}

/// Structured description of a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMetricData {
    pub error_message: String,
    pub error_name: String,
    pub error_stack: Option<String>,
}

impl ErrorMetricData {
    /// Extracts the error fields, or `None` when the value has no message.
    pub fn prepare(thrown: Thrown<'_>) -> Option<Self> {
        let (message, name, stack) = match thrown {
            Thrown::Error(err) => {
                let name = err
                    .downcast_ref::<MetricsError>()
                    .map_or("Error", MetricsError::name);
                let chain = std::iter::successors(err.source(), |&e| e.source())
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>();
                let stack = (!chain.is_empty()).then(|| chain.join("\ncaused by: "));
                (err.to_string(), name, stack)
            }
            Thrown::Message(message) => (message.to_string(), "Error", None),
            Thrown::Panic(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())?;
                (message, "Panic", None)
            }
        };

        if message.trim().is_empty() {
            return None;
        }

        Some(Self {
            error_message: message,
            error_name: name.to_string(),
            error_stack: stack,
        })
    }

    pub(crate) fn into_fields(self, error_source: &str) -> CustomFields {
        let mut fields = CustomFields::new()
            .with("errorMessage", self.error_message)
            .with("errorName", self.error_name);
        if let Some(stack) = self.error_stack {
            fields.insert(ERROR_STACK_FIELD, stack);
        }
        fields.with("errorSource", error_source)
    }
}
