//! Persistence adapter contracts.
//!
//! The engine performs no IO of its own; these traits define what an
//! external store must satisfy. Cross-store atomicity is the adapter's
//! concern: callers needing it wrap queue decisions in
//! [`DatabaseAdapter::transaction`].
//!
//! Persisted queue-item shape: `candidate`, `potential_matches`, `decision`
//! and `context` are serialized as JSON text; `status` is one of the five
//! queue states; `priority` an integer defaulting to 0; `tags` a string
//! array defaulting to empty.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kindred_core::error::KindredError;
use kindred_core::model::BlockingKey;
use kindred_core::value::{FieldValue, Record};
use kindred_merge::provenance::{Provenance, SourceRecord};

use crate::queue::{QueueItem, QueueItemPatch, QueueStatus};

// ---------------------------------------------------------------------------
// Query options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    pub order_by: Option<OrderBy>,
    /// Projection: restrict returned records to these fields.
    pub fields: Option<Vec<String>>,
}

impl QueryOptions {
    pub fn limited(limit: usize) -> Self {
        Self { limit: Some(limit), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl Default for SortDirection {
    fn default() -> Self {
        Self::Asc
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Field name → condition. A bare value means implicit equality.
pub type FilterCriteria = BTreeMap<String, FilterValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Condition { operator: FilterOp, value: FieldValue },
    Literal(FieldValue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Like,
}

impl FilterValue {
    /// Whether a record's field value satisfies this condition.
    pub fn matches(&self, actual: Option<&FieldValue>) -> bool {
        let (op, expected) = match self {
            Self::Literal(v) => (FilterOp::Eq, v),
            Self::Condition { operator, value } => (*operator, value),
        };
        let actual = actual.unwrap_or(&FieldValue::Null);
        match op {
            FilterOp::Eq => actual == expected,
            FilterOp::Ne => actual != expected,
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                match compare_values(actual, expected) {
                    Some(ord) => match op {
                        FilterOp::Gt => ord.is_gt(),
                        FilterOp::Gte => ord.is_ge(),
                        FilterOp::Lt => ord.is_lt(),
                        _ => ord.is_le(),
                    },
                    None => false,
                }
            }
            FilterOp::In => match expected {
                FieldValue::Array(items) => items.contains(actual),
                _ => false,
            },
            FilterOp::Like => match (actual, expected) {
                (FieldValue::Text(haystack), FieldValue::Text(pattern)) => {
                    like_match(haystack, pattern)
                }
                _ => false,
            },
        }
    }
}

/// Same-type ordering; mixed types are unordered.
fn compare_values(a: &FieldValue, b: &FieldValue) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (FieldValue::Number(x), FieldValue::Number(y)) => x.partial_cmp(y),
        (FieldValue::Text(x), FieldValue::Text(y)) => Some(x.cmp(y)),
        (FieldValue::Timestamp(x), FieldValue::Timestamp(y)) => Some(x.cmp(y)),
        (FieldValue::Bool(x), FieldValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// SQL-style LIKE with `%` wildcards, case-sensitive.
fn like_match(haystack: &str, pattern: &str) -> bool {
    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return haystack == pattern;
    }
    let mut rest = haystack;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Queue filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    /// Items must carry all of these tags.
    pub tags: Option<Vec<String>>,
    /// Created-at lower bound, inclusive.
    pub since: Option<DateTime<Utc>>,
    /// Created-at upper bound, inclusive.
    pub until: Option<DateTime<Utc>>,
    pub priority: Option<PriorityRange>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub order_by: Option<OrderBy>,
}

impl QueueFilter {
    pub fn with_status(status: QueueStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

// ---------------------------------------------------------------------------
// Adapter traits
// ---------------------------------------------------------------------------

/// Record store consumed by the resolver.
pub trait DatabaseAdapter: Send + Sync {
    /// Records whose normalized field values match every entry of the key.
    fn find_by_blocking_keys(
        &self,
        keys: &BlockingKey,
        options: &QueryOptions,
    ) -> Result<Vec<Record>, KindredError>;

    fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Record>, KindredError>;

    fn find_all(&self, options: &QueryOptions) -> Result<Vec<Record>, KindredError>;

    fn count(&self, filter: Option<&FilterCriteria>) -> Result<usize, KindredError>;

    fn insert(&self, record: &Record) -> Result<(), KindredError>;

    fn update(&self, id: &str, record: &Record) -> Result<(), KindredError>;

    fn delete(&self, id: &str) -> Result<(), KindredError>;

    fn batch_insert(&self, records: &[Record]) -> Result<(), KindredError>;

    fn batch_update(&self, updates: &[(String, Record)]) -> Result<(), KindredError>;

    /// Run `f` atomically: on error every write inside is rolled back.
    fn transaction(
        &self,
        f: &mut dyn FnMut(&dyn DatabaseAdapter) -> Result<(), KindredError>,
    ) -> Result<(), KindredError>;
}

/// Review-queue store.
pub trait QueueAdapter: Send + Sync {
    fn insert_queue_item(&self, item: &QueueItem) -> Result<(), KindredError>;

    /// Apply a partial update; returns the updated item.
    fn update_queue_item(
        &self,
        id: &str,
        patch: &QueueItemPatch,
    ) -> Result<QueueItem, KindredError>;

    fn find_queue_items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, KindredError>;

    fn find_queue_item_by_id(&self, id: &str) -> Result<Option<QueueItem>, KindredError>;

    fn delete_queue_item(&self, id: &str) -> Result<(), KindredError>;

    fn count_queue_items(&self, filter: &QueueFilter) -> Result<usize, KindredError>;

    fn batch_insert_queue_items(&self, items: &[QueueItem]) -> Result<(), KindredError>;
}

/// Context recorded when sources are archived for a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub reason: Option<String>,
    pub merged_into_id: Option<String>,
}

/// Archive store for merged source records; required for unmerge.
pub trait MergeAdapter: Send + Sync {
    fn archive(&self, sources: &[SourceRecord], meta: &ArchiveMeta) -> Result<(), KindredError>;

    /// Move archived snapshots back to active state and return them.
    fn restore(&self, ids: &[String]) -> Result<Vec<SourceRecord>, KindredError>;

    fn get_archived(&self, ids: &[String]) -> Result<Vec<SourceRecord>, KindredError>;

    /// Reflects only currently archived ids.
    fn is_archived(&self, ids: &[String]) -> Result<BTreeMap<String, bool>, KindredError>;

    fn get_archived_by_golden_record(
        &self,
        golden_record_id: &str,
    ) -> Result<Vec<SourceRecord>, KindredError>;

    fn permanently_delete_archived(&self, ids: &[String]) -> Result<(), KindredError>;

    fn count_archived(&self) -> Result<usize, KindredError>;
}

/// Provenance store. Rows are never deleted by unmerge, only flagged.
pub trait ProvenanceAdapter: Send + Sync {
    fn save(&self, provenance: &Provenance) -> Result<(), KindredError>;

    fn get(&self, golden_record_id: &str) -> Result<Option<Provenance>, KindredError>;

    fn get_by_source_id(&self, source_record_id: &str) -> Result<Vec<Provenance>, KindredError>;

    fn mark_unmerged(
        &self,
        golden_record_id: &str,
        at: DateTime<Utc>,
        by: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), KindredError>;

    fn delete(&self, golden_record_id: &str) -> Result<(), KindredError>;

    fn exists(&self, golden_record_id: &str) -> Result<bool, KindredError>;

    fn count(&self) -> Result<usize, KindredError>;
}
