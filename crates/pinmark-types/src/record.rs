//! Records and keys.
//!
//! The storage layer treats every value as an opaque JSON document. Higher
//! layers own record shape; the only field this layer ever reads is an
//! optional top-level `timestamp` (unix milliseconds) used to age records
//! during eviction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An opaque, JSON-serializable value.
pub type Record = serde_json::Value;

/// A set of records keyed by caller-chosen names.
pub type Records = HashMap<String, Record>;

/// Name of the optional field carrying a record's write time.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Serialized size of a record in bytes, as the host would account it.
pub fn approx_size_bytes(key: &str, record: &Record) -> u64 {
    let value_len = serde_json::to_vec(record).map(|v| v.len()).unwrap_or(0);
    (key.len() + value_len) as u64
}

/// Total serialized size of a record set.
pub fn total_size_bytes(records: &Records) -> u64 {
    records
        .iter()
        .map(|(key, record)| approx_size_bytes(key, record))
        .sum()
}

/// Read the `timestamp` field from a record, if it has one.
pub fn record_timestamp_ms(record: &Record) -> Option<i64> {
    record.get(TIMESTAMP_FIELD).and_then(|ts| ts.as_i64())
}

/// One or many keys, as accepted by `get` and `remove`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keys(Vec<String>);

impl Keys {
    /// Create from any iterator of key-like values.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// Borrow the keys.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consume into the inner vector.
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl From<&str> for Keys {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<String> for Keys {
    fn from(key: String) -> Self {
        Self(vec![key])
    }
}

impl From<Vec<String>> for Keys {
    fn from(keys: Vec<String>) -> Self {
        Self(keys)
    }
}

impl From<Vec<&str>> for Keys {
    fn from(keys: Vec<&str>) -> Self {
        Self::new(keys)
    }
}

impl From<&[&str]> for Keys {
    fn from(keys: &[&str]) -> Self {
        Self::new(keys.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Keys {
    fn from(keys: [&str; N]) -> Self {
        Self::new(keys)
    }
}

impl IntoIterator for Keys {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Keys {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_size_includes_key() {
        let record = json!({"a": 1});
        // `{"a":1}` is 7 bytes
        assert_eq!(approx_size_bytes("k", &record), 8);
    }

    #[test]
    fn test_total_size() {
        let mut records = Records::new();
        records.insert("a".to_string(), json!(1));
        records.insert("bb".to_string(), json!("x"));
        assert_eq!(total_size_bytes(&records), 1 + 1 + 2 + 3);
    }

    #[test]
    fn test_timestamp_field() {
        assert_eq!(record_timestamp_ms(&json!({"timestamp": 1700})), Some(1700));
        assert_eq!(record_timestamp_ms(&json!({"timestamp": "soon"})), None);
        assert_eq!(record_timestamp_ms(&json!([1, 2])), None);
        assert_eq!(record_timestamp_ms(&json!(5)), None);
    }

    #[test]
    fn test_keys_conversions() {
        assert_eq!(Keys::from("a").as_slice(), &["a".to_string()]);
        assert_eq!(Keys::from(["a", "b"]).len(), 2);
        assert_eq!(Keys::from(vec!["x".to_string()]).into_vec(), vec!["x"]);
        assert!(Keys::default().is_empty());
    }
}
