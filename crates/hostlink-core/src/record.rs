//! Data records produced by collectors
//!
//! A [`Record`] is a schema name, a UTC timestamp and a flat map of typed
//! attribute values. Every record created through [`Record::new`] carries
//! the `machine` attribute identifying the host that produced it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Attribute key holding the producing host's name
pub const MACHINE_KEY: &str = "machine";

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// Pre-serialized JSON text, sent as a string
    RawJson(String),
}

impl Value {
    pub fn raw_json(text: impl Into<String>) -> Self {
        Value::RawJson(text.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::RawJson(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(value.into())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

/// One timestamped, schema-tagged data point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    #[serde(rename = "Schema")]
    schema: String,

    #[serde(rename = "TimeStamp")]
    timestamp: DateTime<Utc>,

    #[serde(rename = "Data")]
    data: BTreeMap<String, Value>,
}

impl Record {
    /// Create a record stamped with the current time and the local machine name
    pub fn new(schema: impl Into<String>) -> Self {
        Self::with_timestamp(schema, Utc::now())
    }

    /// Create a record with an explicit timestamp
    pub fn with_timestamp(schema: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let mut data = BTreeMap::new();
        data.insert(MACHINE_KEY.to_string(), Value::from(machine_name()));
        Self {
            schema: schema.into(),
            timestamp,
            data,
        }
    }

    /// Builder-style attribute insertion
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Name of the local machine, resolved once per process
pub fn machine_name() -> &'static str {
    static MACHINE_NAME: OnceLock<String> = OnceLock::new();
    MACHINE_NAME.get_or_init(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    })
}

/// Normalize a schema or attribute name
///
/// Letters and digits are kept, `.` is kept when `allow_period` is set and
/// every other character becomes `_`.
pub fn clean_schema_name(name: &str, allow_period: bool) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || (allow_period && c == '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
