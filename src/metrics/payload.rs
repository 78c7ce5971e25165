//! Envelopes shipped to the collector.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Where the metrics originate from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub host: String,
    pub url: String,
    pub version: String,
    pub is_dev: bool,
}

impl Origin {
    /// Builds the origin from the page URL, taking the host (with port) from it.
    pub fn from_url(url: &Url, version: impl Into<String>, is_dev: bool) -> Self {
        Self {
            host: host_of(url),
            url: url.to_string(),
            version: version.into(),
            is_dev,
        }
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            url: "http://localhost/".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            is_dev: cfg!(debug_assertions),
        }
    }
}

pub(crate) fn host_of(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub is_dev: bool,
    pub host: String,
    pub url: String,
    pub event: String,
    pub version: String,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    pub custom_fields: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterPayload {
    pub event: String,
    pub is_dev: bool,
    pub host: String,
    pub url: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ab_flags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingPayload {
    pub event: String,
    pub is_dev: bool,
    pub host: String,
    pub url: String,
    pub version: String,
    pub time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ab_flags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Map<String, Value>>,
}

/// Single queued metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum BatchReportItem {
    Event(EventPayload),
    Counter(CounterPayload),
    Timing(TimingPayload),
}

impl BatchReportItem {
    pub fn event(&self) -> &str {
        match self {
            BatchReportItem::Event(p) => &p.event,
            BatchReportItem::Counter(p) => &p.event,
            BatchReportItem::Timing(p) => &p.event,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, BatchReportItem::Event(p) if p.is_error)
    }
}

/// Body of a single delivery attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub items: Vec<BatchReportItem>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_item_wire_shape() {
        let item = BatchReportItem::Timing(TimingPayload {
            event: "longtasks.self.timing".to_string(),
            is_dev: false,
            host: "app.example".to_string(),
            url: "https://app.example/trade".to_string(),
            version: "1.0.0".to_string(),
            time: 75.0,
            ab_flags: None,
            custom_fields: None,
        });

        assert_eq!(
            serde_json::to_value(&item).unwrap(),
            json!({
                "type": "timing",
                "payload": {
                    "event": "longtasks.self.timing",
                    "isDev": false,
                    "host": "app.example",
                    "url": "https://app.example/trade",
                    "version": "1.0.0",
                    "time": 75.0,
                }
            })
        );
    }

    #[test]
    fn test_origin_from_url_keeps_port() {
        let url = Url::parse("http://localhost:3010/#/trade").unwrap();
        let origin = Origin::from_url(&url, "2.0.0", true);
        assert_eq!(origin.host, "localhost:3010");
        assert_eq!(origin.url, "http://localhost:3010/#/trade");
    }
}
