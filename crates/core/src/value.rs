use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A caller-owned record: named fields, opaque to the engine.
///
/// `BTreeMap` keeps field iteration order stable, which the scoring and merge
/// paths rely on for reproducible output.
pub type Record = BTreeMap<String, FieldValue>;

/// A single field value.
///
/// Untagged on the wire: plain JSON scalars/arrays round-trip, and RFC 3339
/// strings deserialize as `Timestamp` (the variant is tried before `Text`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type tag used in conflict messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Timestamp(_) => "timestamp",
            Self::Text(_) => "text",
            Self::Array(_) => "array",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Coerce a scalar to its text form for string comparators.
    ///
    /// `Null` and `Array` do not coerce.
    pub fn coerce_text(&self) -> Option<String> {
        match self {
            Self::Null | Self::Array(_) => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) => Some(format_number(*n)),
            Self::Timestamp(t) => Some(t.to_rfc3339()),
            Self::Text(s) => Some(s.clone()),
        }
    }

    /// Stable textual form, type-tagged, for counting and de-duplication keys.
    pub fn canonical(&self) -> String {
        match self {
            Self::Null => "null:".into(),
            Self::Bool(b) => format!("bool:{b}"),
            Self::Number(n) => format!("number:{}", format_number(*n)),
            Self::Timestamp(t) => format!("timestamp:{}", t.timestamp_millis()),
            Self::Text(s) => format!("text:{s}"),
            Self::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.canonical()).collect();
                format!("array:[{}]", parts.join(","))
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// The non-null value of `field`, if the record has one.
pub fn field_value<'a>(record: &'a Record, field: &str) -> Option<&'a FieldValue> {
    record.get(field).filter(|v| !v.is_null())
}

/// The record's stable id under `id_field`, as text.
pub fn record_id(record: &Record, id_field: &str) -> Option<String> {
    field_value(record, id_field).and_then(|v| v.coerce_text())
}
