//! Custom fields attached to metric envelopes.

use alloy::primitives::{I256, U256};
use serde_json::{Map, Value};

/// Keys reserved by the collector, never forwarded as custom fields.
pub const BANNED_CUSTOM_FIELDS: &[&str] = &["metricId"];

/// Field holding a stack trace, allowed a larger character budget.
pub const ERROR_STACK_FIELD: &str = "errorStack";

const ERROR_STACK_CHAR_LIMIT: usize = 2000;
const DEFAULT_CHAR_LIMIT: usize = 500;

/// Scalar value of a custom field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    BigUint(U256),
    BigInt(I256),
    /// Arbitrary JSON, passed through untouched apart from the string budget.
    Json(Value),
}

impl FieldValue {
    /// Plain JSON form, without any character budget.
    pub(crate) fn to_json(&self) -> Value {
        self.clone().into_json(usize::MAX)
    }

    fn into_json(self, char_limit: usize) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(v) => Value::Bool(v),
            FieldValue::Int(v) => Value::from(v),
            FieldValue::UInt(v) => Value::from(v),
            FieldValue::Float(v) => Value::from(v),
            FieldValue::String(v) => Value::String(truncate(v, char_limit)),
            FieldValue::BigUint(v) => Value::String(truncate(v.to_string(), char_limit)),
            FieldValue::BigInt(v) => Value::String(truncate(v.to_string(), char_limit)),
            FieldValue::Json(Value::String(v)) => Value::String(truncate(v, char_limit)),
            FieldValue::Json(v) => v,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        Self::UInt(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<U256> for FieldValue {
    fn from(value: U256) -> Self {
        Self::BigUint(value)
    }
}

impl From<I256> for FieldValue {
    fn from(value: I256) -> Self {
        Self::BigInt(value)
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Ordered set of custom fields supplied with a metric.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CustomFields(Vec<(String, FieldValue)>);

impl CustomFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets the field, replacing an earlier value of the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Merges `other` into `self`, fields of `other` win.
    pub fn merge(&mut self, other: CustomFields) {
        for (key, value) in other.0 {
            self.insert(key, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serializes the fields into the JSON shape sent to the collector.
    ///
    /// Banned keys are dropped, big integers become decimal strings and
    /// strings are cut to the per-field character budget.
    pub fn serialize(self) -> Map<String, Value> {
        self.0
            .into_iter()
            .filter(|(key, _)| !BANNED_CUSTOM_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| {
                let limit = if key == ERROR_STACK_FIELD {
                    ERROR_STACK_CHAR_LIMIT
                } else {
                    DEFAULT_CHAR_LIMIT
                };
                let value = value.into_json(limit);
                (key, value)
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<FieldValue>, const N: usize> From<[(K, V); N]> for CustomFields {
    fn from(value: [(K, V); N]) -> Self {
        value
            .into_iter()
            .fold(Self::new(), |fields, (k, v)| fields.with(k, v))
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for CustomFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |fields, (k, v)| fields.with(k, v))
    }
}

fn truncate(value: String, char_limit: usize) -> String {
    match value.char_indices().nth(char_limit) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_serialize_stringifies_big_integers() {
        let fields = CustomFields::new()
            .with("sizeDeltaUsd", U256::from(10).pow(U256::from(30)))
            .with("pnl", I256::try_from(-5).unwrap())
            .with("count", 3u64);

        let serialized = fields.serialize();
        assert_eq!(
            serialized["sizeDeltaUsd"],
            json!("1000000000000000000000000000000")
        );
        assert_eq!(serialized["pnl"], json!("-5"));
        assert_eq!(serialized["count"], json!(3));
    }

    #[test]
    fn test_serialize_drops_banned_fields() {
        let fields = CustomFields::from([("metricId", "order:1"), ("pair", "ETH/USD")]);
        let serialized = fields.serialize();
        assert!(!serialized.contains_key("metricId"));
        assert_eq!(serialized["pair"], json!("ETH/USD"));
    }

    #[test]
    fn test_serialize_truncates_strings() {
        let long = "x".repeat(3000);
        let fields = CustomFields::new()
            .with(ERROR_STACK_FIELD, long.clone())
            .with("errorMessage", long);

        let serialized = fields.serialize();
        assert_eq!(serialized[ERROR_STACK_FIELD].as_str().unwrap().len(), 2000);
        assert_eq!(serialized["errorMessage"].as_str().unwrap().len(), 500);
    }

    #[test]
    fn test_serialize_truncates_json_strings() {
        let long = "y".repeat(1200);
        let fields = CustomFields::new()
            .with("viaJson", json!(long))
            .with(ERROR_STACK_FIELD, json!("z".repeat(3000)))
            .with("nested", json!({ "inner": long }));

        let serialized = fields.serialize();
        assert_eq!(serialized["viaJson"].as_str().unwrap().len(), 500);
        assert_eq!(serialized[ERROR_STACK_FIELD].as_str().unwrap().len(), 2000);
        assert_eq!(serialized["nested"]["inner"].as_str().unwrap().len(), 1200);
    }

    #[test]
    fn test_to_json_keeps_full_strings() {
        let value = FieldValue::from("x".repeat(800));
        assert_eq!(value.to_json().as_str().unwrap().len(), 800);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let value = "é".repeat(600);
        assert_eq!(truncate(value, 500).chars().count(), 500);
    }

    #[test]
    fn test_insert_replaces_existing_key() {
        let mut fields = CustomFields::from([("a", 1), ("b", 2)]);
        fields.merge(CustomFields::from([("a", 3)]));
        assert_eq!(fields.get("a"), Some(&FieldValue::Int(3)));
        assert_eq!(fields.iter().count(), 2);
    }
}
