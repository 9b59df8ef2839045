//! CSV ingestion: header-mapped extraction of engine records, with
//! per-column type coercion. Feeds `deduplicate_batch`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use kindred_core::error::KindredError;
use kindred_core::value::{FieldValue, Record};

/// Record field → source column mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestSpec {
    pub columns: BTreeMap<String, ColumnSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    /// CSV header name.
    pub source: String,
    #[serde(default)]
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Number,
    Timestamp,
    Bool,
}

impl Default for ColumnKind {
    fn default() -> Self {
        Self::Text
    }
}

/// Load CSV rows into records, applying the column mapping and coercion.
///
/// Empty cells become `Null` so the comparators' shared null policy applies.
pub fn load_csv_records(csv_data: &str, spec: &IngestSpec) -> Result<Vec<Record>, KindredError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| KindredError::Io(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    // Resolve every mapped column up front.
    let mut indexed: Vec<(&String, &ColumnSpec, usize)> = Vec::with_capacity(spec.columns.len());
    for (field, column) in &spec.columns {
        let idx = headers.iter().position(|h| *h == column.source).ok_or_else(|| {
            KindredError::Validation(format!("missing column '{}'", column.source))
        })?;
        indexed.push((field, column, idx));
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| KindredError::Io(e.to_string()))?;
        let mut record = Record::new();
        for (field, column, idx) in &indexed {
            let raw = row.get(*idx).unwrap_or("").trim();
            record.insert((*field).clone(), coerce(raw, column.kind, field)?);
        }
        records.push(record);
    }

    Ok(records)
}

fn coerce(raw: &str, kind: ColumnKind, field: &str) -> Result<FieldValue, KindredError> {
    if raw.is_empty() {
        return Ok(FieldValue::Null);
    }
    match kind {
        ColumnKind::Text => Ok(FieldValue::Text(raw.to_string())),
        ColumnKind::Number => raw
            .parse::<f64>()
            .map(FieldValue::Number)
            .map_err(|_| KindredError::Parse { field: field.into(), value: raw.into() }),
        ColumnKind::Timestamp => DateTime::parse_from_rfc3339(raw)
            .map(|t| FieldValue::Timestamp(t.with_timezone(&Utc)))
            .map_err(|_| KindredError::Parse { field: field.into(), value: raw.into() }),
        ColumnKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(FieldValue::Bool(true)),
            "false" | "0" | "no" => Ok(FieldValue::Bool(false)),
            _ => Err(KindredError::Parse { field: field.into(), value: raw.into() }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> IngestSpec {
        let mut columns = BTreeMap::new();
        columns.insert(
            "id".to_string(),
            ColumnSpec { source: "customer_id".into(), kind: ColumnKind::Text },
        );
        columns.insert(
            "first_name".to_string(),
            ColumnSpec { source: "fname".into(), kind: ColumnKind::Text },
        );
        columns.insert(
            "balance".to_string(),
            ColumnSpec { source: "bal".into(), kind: ColumnKind::Number },
        );
        columns.insert(
            "updated_at".to_string(),
            ColumnSpec { source: "modified".into(), kind: ColumnKind::Timestamp },
        );
        IngestSpec { columns }
    }

    #[test]
    fn load_basic() {
        let csv = "\
customer_id,fname,bal,modified
c1,John,10.5,2026-01-15T09:00:00Z
c2,Jane,,\n";
        let records = load_csv_records(csv, &spec()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], FieldValue::Text("c1".into()));
        assert_eq!(records[0]["balance"], FieldValue::Number(10.5));
        assert!(matches!(records[0]["updated_at"], FieldValue::Timestamp(_)));
        // Empty cells become null.
        assert_eq!(records[1]["balance"], FieldValue::Null);
        assert_eq!(records[1]["updated_at"], FieldValue::Null);
    }

    #[test]
    fn missing_mapped_column_is_a_validation_error() {
        let csv = "customer_id,fname\nc1,John\n";
        let err = load_csv_records(csv, &spec()).unwrap_err();
        assert!(err.to_string().contains("missing column 'bal'"));
    }

    #[test]
    fn bad_number_is_a_parse_error() {
        let csv = "\
customer_id,fname,bal,modified
c1,John,not-a-number,2026-01-15T09:00:00Z
";
        let err = load_csv_records(csv, &spec()).unwrap_err();
        match err {
            KindredError::Parse { field, value } => {
                assert_eq!(field, "balance");
                assert_eq!(value, "not-a-number");
            }
            other => panic!("expected parse error, got {other}"),
        }
    }
}
