//! Audit model for merges: source snapshots, field-level provenance, and the
//! merge result envelope.
//!
//! A `Provenance` row is created at merge time and only ever mutated to set
//! the unmerge fields; it is never deleted, so the audit trail survives an
//! unmerge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kindred_core::error::KindredError;
use kindred_core::value::{FieldValue, Record};

use crate::config::ConflictResolution;

// ---------------------------------------------------------------------------
// Source snapshots
// ---------------------------------------------------------------------------

/// Immutable snapshot of a record taken before merging; required for unmerge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub record: Record,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SourceRecord {
    /// Snapshot a record, reading its stable id from `id_field` and its
    /// timestamps from `created_at`/`updated_at` fields when present.
    pub fn from_record(record: &Record, id_field: &str) -> Result<Self, KindredError> {
        let id = kindred_core::value::record_id(record, id_field).ok_or_else(|| {
            KindredError::Validation(format!("record has no stable '{id_field}' field"))
        })?;
        let now = Utc::now();
        let created_at = timestamp_field(record, "created_at").unwrap_or(now);
        let updated_at = timestamp_field(record, "updated_at").unwrap_or(now);
        Ok(Self { id, record: record.clone(), created_at, updated_at })
    }
}

fn timestamp_field(record: &Record, field: &str) -> Option<DateTime<Utc>> {
    match record.get(field) {
        Some(FieldValue::Timestamp(t)) => Some(*t),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Field provenance
// ---------------------------------------------------------------------------

/// One source's contribution to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldContribution {
    pub source_record_id: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenance {
    /// Winning source, when the strategy picks a single one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_record_id: Option<String>,
    pub strategy_applied: String,
    /// Every source contribution, so conflicts stay computable regardless of
    /// how the field was resolved.
    pub all_values: Vec<FieldContribution>,
    pub had_conflict: bool,
    /// Set when the field went through the conflict-resolution path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_resolution: Option<ConflictResolution>,
}

// ---------------------------------------------------------------------------
// Merge provenance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub golden_record_id: String,
    /// Always contains the golden record's own id.
    pub source_record_ids: Vec<String>,
    pub merged_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
    pub field_sources: BTreeMap<String, FieldProvenance>,
    /// Default strategy in force for this merge.
    pub strategy_used: String,
    #[serde(default)]
    pub unmerged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmerged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmerged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmerge_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Result envelope
// ---------------------------------------------------------------------------

/// A field the configured strategy could not resolve cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub field: String,
    /// Strategy that failed to resolve the field.
    pub strategy: String,
    pub message: String,
    /// Fallback strategy that produced the value, if any did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_with: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeStats {
    pub fields_merged: usize,
    /// Fields where at least two sources held differing non-null values.
    pub conflicts_detected: usize,
    pub sources_merged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResult {
    pub golden_record: Record,
    pub golden_record_id: String,
    pub provenance: Provenance,
    pub source_records: Vec<SourceRecord>,
    pub conflicts: Vec<Conflict>,
    pub stats: MergeStats,
}
