//! In-memory adapter implementations.
//!
//! Reference implementations of the persistence contracts, used by the test
//! suites and as a starting point for real store adapters. All state lives
//! behind a mutex; `transaction` is snapshot/rollback.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use kindred_core::error::KindredError;
use kindred_core::model::BlockingKey;
use kindred_core::value::{record_id, FieldValue, Record};
use kindred_merge::provenance::{Provenance, SourceRecord};

use crate::adapter::{
    ArchiveMeta, DatabaseAdapter, FilterCriteria, MergeAdapter, OrderBy, ProvenanceAdapter,
    QueryOptions, QueueAdapter, QueueFilter, SortDirection,
};
use crate::queue::{QueueItem, QueueItemPatch};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub struct MemoryDatabaseAdapter {
    id_field: String,
    rows: Mutex<BTreeMap<String, Record>>,
}

impl MemoryDatabaseAdapter {
    pub fn new() -> Self {
        Self::with_id_field("id")
    }

    pub fn with_id_field(id_field: &str) -> Self {
        Self { id_field: id_field.into(), rows: Mutex::new(BTreeMap::new()) }
    }

    pub fn seed(&self, records: &[Record]) -> Result<(), KindredError> {
        self.batch_insert(records)
    }

    fn require_id(&self, record: &Record) -> Result<String, KindredError> {
        record_id(record, &self.id_field).ok_or_else(|| {
            KindredError::Validation(format!("record has no stable '{}' field", self.id_field))
        })
    }
}

impl Default for MemoryDatabaseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseAdapter for MemoryDatabaseAdapter {
    fn find_by_blocking_keys(
        &self,
        keys: &BlockingKey,
        options: &QueryOptions,
    ) -> Result<Vec<Record>, KindredError> {
        if keys.is_empty() {
            return Err(KindredError::Validation("empty blocking keys".into()));
        }
        let rows = self.rows.lock().unwrap();
        let matched: Vec<Record> = rows
            .values()
            .filter(|record| {
                keys.iter().all(|(field, value)| {
                    record
                        .get(field)
                        .filter(|v| !v.is_null())
                        .and_then(|v| v.coerce_text())
                        .map(|text| normalize(&text) == *value)
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect();
        Ok(apply_options(matched, options))
    }

    fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Record>, KindredError> {
        let rows = self.rows.lock().unwrap();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    fn find_all(&self, options: &QueryOptions) -> Result<Vec<Record>, KindredError> {
        let rows = self.rows.lock().unwrap();
        Ok(apply_options(rows.values().cloned().collect(), options))
    }

    fn count(&self, filter: Option<&FilterCriteria>) -> Result<usize, KindredError> {
        let rows = self.rows.lock().unwrap();
        match filter {
            None => Ok(rows.len()),
            Some(criteria) => Ok(rows
                .values()
                .filter(|record| {
                    criteria.iter().all(|(field, condition)| condition.matches(record.get(field)))
                })
                .count()),
        }
    }

    fn insert(&self, record: &Record) -> Result<(), KindredError> {
        let id = self.require_id(record)?;
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&id) {
            return Err(KindredError::Validation(format!("record '{id}' already exists")));
        }
        rows.insert(id, record.clone());
        Ok(())
    }

    fn update(&self, id: &str, record: &Record) -> Result<(), KindredError> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(id) {
            return Err(KindredError::NotFound { entity: "record".into(), id: id.into() });
        }
        rows.insert(id.into(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), KindredError> {
        let mut rows = self.rows.lock().unwrap();
        rows.remove(id)
            .map(|_| ())
            .ok_or_else(|| KindredError::NotFound { entity: "record".into(), id: id.into() })
    }

    fn batch_insert(&self, records: &[Record]) -> Result<(), KindredError> {
        for record in records {
            self.insert(record)?;
        }
        Ok(())
    }

    fn batch_update(&self, updates: &[(String, Record)]) -> Result<(), KindredError> {
        for (id, record) in updates {
            self.update(id, record)?;
        }
        Ok(())
    }

    fn transaction(
        &self,
        f: &mut dyn FnMut(&dyn DatabaseAdapter) -> Result<(), KindredError>,
    ) -> Result<(), KindredError> {
        let snapshot = self.rows.lock().unwrap().clone();
        match f(self) {
            Ok(()) => Ok(()),
            Err(err) => {
                *self.rows.lock().unwrap() = snapshot;
                Err(KindredError::Transaction(format!("rolled back: {err}")))
            }
        }
    }
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn apply_options(mut records: Vec<Record>, options: &QueryOptions) -> Vec<Record> {
    if let Some(OrderBy { field, direction }) = &options.order_by {
        records.sort_by(|a, b| {
            let ord = order_values(a.get(field), b.get(field));
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }
    let iter = records.into_iter().skip(options.offset);
    let mut out: Vec<Record> = match options.limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    };
    if let Some(fields) = &options.fields {
        for record in &mut out {
            record.retain(|k, _| fields.contains(k));
        }
    }
    out
}

fn order_values(a: Option<&FieldValue>, b: Option<&FieldValue>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(FieldValue::Number(x)), Some(FieldValue::Number(y))) => {
            x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
        }
        (Some(FieldValue::Timestamp(x)), Some(FieldValue::Timestamp(y))) => x.cmp(y),
        _ => order_key(a).cmp(&order_key(b)),
    }
}

fn order_key(value: Option<&FieldValue>) -> String {
    value.map(|v| v.canonical()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Queue items
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryQueueAdapter {
    items: Mutex<BTreeMap<String, QueueItem>>,
}

impl MemoryQueueAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn filter_matches(item: &QueueItem, filter: &QueueFilter) -> bool {
    if let Some(status) = filter.status {
        if item.status != status {
            return false;
        }
    }
    if let Some(tags) = &filter.tags {
        if !tags.iter().all(|t| item.tags.contains(t)) {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if item.created_at < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if item.created_at > until {
            return false;
        }
    }
    if let Some(range) = filter.priority {
        if range.min.map(|min| item.priority < min).unwrap_or(false) {
            return false;
        }
        if range.max.map(|max| item.priority > max).unwrap_or(false) {
            return false;
        }
    }
    true
}

impl QueueAdapter for MemoryQueueAdapter {
    fn insert_queue_item(&self, item: &QueueItem) -> Result<(), KindredError> {
        let mut items = self.items.lock().unwrap();
        if items.contains_key(&item.id) {
            return Err(KindredError::Validation(format!(
                "queue item '{}' already exists",
                item.id
            )));
        }
        items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn update_queue_item(
        &self,
        id: &str,
        patch: &QueueItemPatch,
    ) -> Result<QueueItem, KindredError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| KindredError::NotFound { entity: "queue item".into(), id: id.into() })?;
        if let Some(status) = patch.status {
            item.status = status;
        }
        if let Some(decision) = &patch.decision {
            item.decision = Some(decision.clone());
        }
        if let Some(decided_at) = patch.decided_at {
            item.decided_at = Some(decided_at);
        }
        if let Some(decided_by) = &patch.decided_by {
            item.decided_by = Some(decided_by.clone());
        }
        if let Some(context) = &patch.context {
            item.context = Some(context.clone());
        }
        if let Some(priority) = patch.priority {
            item.priority = priority;
        }
        if let Some(tags) = &patch.tags {
            item.tags = tags.clone();
        }
        item.updated_at = patch.updated_at.unwrap_or_else(Utc::now);
        Ok(item.clone())
    }

    fn find_queue_items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, KindredError> {
        let items = self.items.lock().unwrap();
        let mut matched: Vec<QueueItem> =
            items.values().filter(|i| filter_matches(i, filter)).cloned().collect();
        match &filter.order_by {
            Some(OrderBy { field, direction }) => {
                matched.sort_by(|a, b| {
                    let ord = match field.as_str() {
                        "priority" => a.priority.cmp(&b.priority),
                        "updated_at" => a.updated_at.cmp(&b.updated_at),
                        _ => a.created_at.cmp(&b.created_at),
                    };
                    let ord = ord.then_with(|| a.id.cmp(&b.id));
                    match direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    }
                });
            }
            None => matched.sort_by(|a, b| {
                a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
            }),
        }
        let iter = matched.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        })
    }

    fn find_queue_item_by_id(&self, id: &str) -> Result<Option<QueueItem>, KindredError> {
        Ok(self.items.lock().unwrap().get(id).cloned())
    }

    fn delete_queue_item(&self, id: &str) -> Result<(), KindredError> {
        self.items
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| KindredError::NotFound { entity: "queue item".into(), id: id.into() })
    }

    fn count_queue_items(&self, filter: &QueueFilter) -> Result<usize, KindredError> {
        let items = self.items.lock().unwrap();
        Ok(items.values().filter(|i| filter_matches(i, filter)).count())
    }

    fn batch_insert_queue_items(&self, items: &[QueueItem]) -> Result<(), KindredError> {
        for item in items {
            self.insert_queue_item(item)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

struct ArchivedEntry {
    source: SourceRecord,
    meta: ArchiveMeta,
}

#[derive(Default)]
pub struct MemoryMergeAdapter {
    archived: Mutex<BTreeMap<String, ArchivedEntry>>,
}

impl MemoryMergeAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MergeAdapter for MemoryMergeAdapter {
    fn archive(&self, sources: &[SourceRecord], meta: &ArchiveMeta) -> Result<(), KindredError> {
        let mut archived = self.archived.lock().unwrap();
        for source in sources {
            archived.insert(
                source.id.clone(),
                ArchivedEntry { source: source.clone(), meta: meta.clone() },
            );
        }
        Ok(())
    }

    fn restore(&self, ids: &[String]) -> Result<Vec<SourceRecord>, KindredError> {
        let mut archived = self.archived.lock().unwrap();
        let mut restored = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = archived.remove(id).ok_or_else(|| KindredError::NotFound {
                entity: "archived record".into(),
                id: id.clone(),
            })?;
            restored.push(entry.source);
        }
        Ok(restored)
    }

    fn get_archived(&self, ids: &[String]) -> Result<Vec<SourceRecord>, KindredError> {
        let archived = self.archived.lock().unwrap();
        Ok(ids.iter().filter_map(|id| archived.get(id).map(|e| e.source.clone())).collect())
    }

    fn is_archived(&self, ids: &[String]) -> Result<BTreeMap<String, bool>, KindredError> {
        let archived = self.archived.lock().unwrap();
        Ok(ids.iter().map(|id| (id.clone(), archived.contains_key(id))).collect())
    }

    fn get_archived_by_golden_record(
        &self,
        golden_record_id: &str,
    ) -> Result<Vec<SourceRecord>, KindredError> {
        let archived = self.archived.lock().unwrap();
        Ok(archived
            .values()
            .filter(|e| e.meta.merged_into_id.as_deref() == Some(golden_record_id))
            .map(|e| e.source.clone())
            .collect())
    }

    fn permanently_delete_archived(&self, ids: &[String]) -> Result<(), KindredError> {
        let mut archived = self.archived.lock().unwrap();
        for id in ids {
            archived.remove(id);
        }
        Ok(())
    }

    fn count_archived(&self) -> Result<usize, KindredError> {
        Ok(self.archived.lock().unwrap().len())
    }
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryProvenanceAdapter {
    rows: Mutex<BTreeMap<String, Provenance>>,
}

impl MemoryProvenanceAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProvenanceAdapter for MemoryProvenanceAdapter {
    fn save(&self, provenance: &Provenance) -> Result<(), KindredError> {
        self.rows
            .lock()
            .unwrap()
            .insert(provenance.golden_record_id.clone(), provenance.clone());
        Ok(())
    }

    fn get(&self, golden_record_id: &str) -> Result<Option<Provenance>, KindredError> {
        Ok(self.rows.lock().unwrap().get(golden_record_id).cloned())
    }

    fn get_by_source_id(&self, source_record_id: &str) -> Result<Vec<Provenance>, KindredError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|p| p.source_record_ids.iter().any(|id| id == source_record_id))
            .cloned()
            .collect())
    }

    fn mark_unmerged(
        &self,
        golden_record_id: &str,
        at: DateTime<Utc>,
        by: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), KindredError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(golden_record_id).ok_or_else(|| KindredError::NotFound {
            entity: "provenance".into(),
            id: golden_record_id.into(),
        })?;
        row.unmerged = true;
        row.unmerged_at = Some(at);
        row.unmerged_by = by.map(str::to_string);
        row.unmerge_reason = reason.map(str::to_string);
        Ok(())
    }

    fn delete(&self, golden_record_id: &str) -> Result<(), KindredError> {
        self.rows.lock().unwrap().remove(golden_record_id).map(|_| ()).ok_or_else(|| {
            KindredError::NotFound { entity: "provenance".into(), id: golden_record_id.into() }
        })
    }

    fn exists(&self, golden_record_id: &str) -> Result<bool, KindredError> {
        Ok(self.rows.lock().unwrap().contains_key(golden_record_id))
    }

    fn count(&self) -> Result<usize, KindredError> {
        Ok(self.rows.lock().unwrap().len())
    }
}
