//! Review-queue state machine.
//!
//! Lifecycle: `pending → reviewing → {confirmed, rejected}`, and a merge
//! decision takes a pending/reviewing/confirmed item to `merged` (terminal,
//! reversible only via unmerge).
//!
//! `handle_merge_decision` treats the merge as committed once the golden
//! record and provenance exist; the final queue-item update is advisory
//! bookkeeping and its failure is logged and reported, never propagated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kindred_core::error::KindredError;
use kindred_core::model::MatchOutcome;
use kindred_core::value::{record_id, Record};
use kindred_merge::config::MergeConfig;
use kindred_merge::executor::merge;
use kindred_merge::provenance::{MergeResult, SourceRecord};

use crate::adapter::{
    ArchiveMeta, DatabaseAdapter, MergeAdapter, ProvenanceAdapter, QueueAdapter, QueueFilter,
};
use crate::events::{noop_sink, EventSink, ResolveEvent};

// ---------------------------------------------------------------------------
// Queue model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Reviewing,
    Confirmed,
    Rejected,
    Merged,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Reviewing => write!(f, "reviewing"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// One scored match offered for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialMatch {
    pub record: Record,
    pub score: f64,
    pub outcome: MatchOutcome,
    pub explanation: String,
}

/// The reviewer's decision payload recorded on a merged item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    /// Id of the chosen record among `potential_matches`.
    pub selected_match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub candidate: Record,
    pub potential_matches: Vec<PotentialMatch>,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<MergeDecision>,
    /// Caller-supplied context, carried opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Record>,
    pub priority: i64,
    pub tags: Vec<String>,
}

impl QueueItem {
    /// JSON text form, the shape adapters persist.
    pub fn to_json(&self) -> Result<String, KindredError> {
        serde_json::to_string(self).map_err(|e| KindredError::Query(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, KindredError> {
        serde_json::from_str(json)
            .map_err(|e| KindredError::Validation(format!("malformed queue item: {e}")))
    }

    pub fn new(candidate: Record, potential_matches: Vec<PotentialMatch>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            candidate,
            potential_matches,
            status: QueueStatus::Pending,
            created_at: now,
            updated_at: now,
            decided_at: None,
            decided_by: None,
            decision: None,
            context: None,
            priority: 0,
            tags: Vec::new(),
        }
    }
}

/// Partial update applied by [`QueueAdapter::update_queue_item`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueItemPatch {
    pub status: Option<QueueStatus>,
    pub decision: Option<MergeDecision>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub context: Option<Record>,
    pub priority: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Decision envelopes
// ---------------------------------------------------------------------------

/// Non-throwing merge precondition check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanMerge {
    pub can_merge: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CanMerge {
    fn ok() -> Self {
        Self { can_merge: true, reason: None }
    }

    fn blocked(reason: String) -> Self {
        Self { can_merge: false, reason: Some(reason) }
    }
}

/// Outcome of `handle_merge_decision`.
#[derive(Debug)]
pub struct MergeDecisionOutcome {
    pub merge: MergeResult,
    /// False when the advisory queue-item update failed; the merge itself
    /// is committed regardless.
    pub queue_item_updated: bool,
}

/// Outcome of `unmerge`.
#[derive(Debug)]
pub struct UnmergeReport {
    pub restored: Vec<SourceRecord>,
    pub golden_deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UnmergeOptions {
    pub by: Option<String>,
    pub reason: Option<String>,
    pub delete_golden: bool,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Review queue bound to a [`QueueAdapter`], with optional provenance,
/// archive and database adapters for the merge/unmerge paths.
pub struct ReviewQueue {
    queue: Arc<dyn QueueAdapter>,
    provenance: Option<Arc<dyn ProvenanceAdapter>>,
    archive: Option<Arc<dyn MergeAdapter>>,
    database: Option<Arc<dyn DatabaseAdapter>>,
    merge_config: MergeConfig,
    sink: EventSink,
}

impl ReviewQueue {
    pub fn new(queue: Arc<dyn QueueAdapter>, merge_config: MergeConfig) -> Self {
        Self {
            queue,
            provenance: None,
            archive: None,
            database: None,
            merge_config,
            sink: noop_sink(),
        }
    }

    pub fn with_provenance(mut self, adapter: Arc<dyn ProvenanceAdapter>) -> Self {
        self.provenance = Some(adapter);
        self
    }

    pub fn with_archive(mut self, adapter: Arc<dyn MergeAdapter>) -> Self {
        self.archive = Some(adapter);
        self
    }

    pub fn with_database(mut self, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        self.database = Some(adapter);
        self
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    // -- intake -----------------------------------------------------------

    /// Enqueue a candidate with its potential matches.
    pub fn add(
        &self,
        candidate: Record,
        potential_matches: Vec<PotentialMatch>,
        priority: i64,
        tags: Vec<String>,
        context: Option<Record>,
    ) -> Result<QueueItem, KindredError> {
        if potential_matches.is_empty() {
            return Err(KindredError::Validation(
                "queue item requires at least one potential match".into(),
            ));
        }
        let mut item = QueueItem::new(candidate, potential_matches);
        item.priority = priority;
        item.tags = tags;
        item.context = context;
        self.queue.insert_queue_item(&item)?;
        Ok(item)
    }

    pub fn get(&self, id: &str) -> Result<QueueItem, KindredError> {
        self.queue
            .find_queue_item_by_id(id)?
            .ok_or_else(|| KindredError::NotFound { entity: "queue item".into(), id: id.into() })
    }

    pub fn list(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, KindredError> {
        self.queue.find_queue_items(filter)
    }

    pub fn count(&self, filter: &QueueFilter) -> Result<usize, KindredError> {
        self.queue.count_queue_items(filter)
    }

    pub fn delete(&self, id: &str) -> Result<(), KindredError> {
        self.queue.delete_queue_item(id)
    }

    // -- review transitions -----------------------------------------------

    /// `pending → reviewing`.
    pub fn start_review(&self, id: &str) -> Result<QueueItem, KindredError> {
        let item = self.get(id)?;
        if item.status != QueueStatus::Pending {
            return Err(KindredError::Validation(format!(
                "cannot start review from status '{}'",
                item.status
            )));
        }
        self.queue.update_queue_item(
            id,
            &QueueItemPatch {
                status: Some(QueueStatus::Reviewing),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
    }

    /// `pending/reviewing → confirmed`.
    pub fn confirm(&self, id: &str, by: Option<&str>) -> Result<QueueItem, KindredError> {
        self.decide(id, QueueStatus::Confirmed, by)
    }

    /// `pending/reviewing → rejected`.
    pub fn reject(&self, id: &str, by: Option<&str>) -> Result<QueueItem, KindredError> {
        self.decide(id, QueueStatus::Rejected, by)
    }

    fn decide(
        &self,
        id: &str,
        status: QueueStatus,
        by: Option<&str>,
    ) -> Result<QueueItem, KindredError> {
        let item = self.get(id)?;
        if !matches!(item.status, QueueStatus::Pending | QueueStatus::Reviewing) {
            return Err(KindredError::Validation(format!(
                "cannot move to '{status}' from status '{}'",
                item.status
            )));
        }
        let now = Utc::now();
        self.queue.update_queue_item(
            id,
            &QueueItemPatch {
                status: Some(status),
                decided_at: Some(now),
                decided_by: by.map(str::to_string),
                updated_at: Some(now),
                ..Default::default()
            },
        )
    }

    // -- merge ------------------------------------------------------------

    /// Non-throwing precondition check for a merge decision.
    pub fn can_merge(&self, item: &QueueItem, selected_match_id: &str) -> CanMerge {
        if !matches!(
            item.status,
            QueueStatus::Pending | QueueStatus::Reviewing | QueueStatus::Confirmed
        ) {
            return CanMerge::blocked(format!(
                "queue item '{}' has status '{}'",
                item.id, item.status
            ));
        }
        let id_field = &self.merge_config.id_field;
        if record_id(&item.candidate, id_field).is_none() {
            return CanMerge::blocked(format!(
                "candidate record has no stable '{id_field}' field"
            ));
        }
        let selected = item
            .potential_matches
            .iter()
            .find(|m| record_id(&m.record, id_field).as_deref() == Some(selected_match_id));
        match selected {
            None => CanMerge::blocked(format!(
                "'{selected_match_id}' is not among the item's potential matches"
            )),
            Some(_) => CanMerge::ok(),
        }
    }

    /// Execute a merge decision.
    ///
    /// Order: validate, build source pair, run the merge executor, persist
    /// provenance, archive both sources, then best-effort update of the
    /// queue item to `merged`. A failure in the final step is logged and
    /// reported via `queue_item_updated: false` but does not undo the merge.
    pub fn handle_merge_decision(
        &mut self,
        item_id: &str,
        decision: &MergeDecision,
    ) -> Result<MergeDecisionOutcome, KindredError> {
        let item = self.get(item_id)?;

        let check = self.can_merge(&item, &decision.selected_match_id);
        if !check.can_merge {
            return Err(KindredError::Validation(
                check.reason.unwrap_or_else(|| "merge blocked".into()),
            ));
        }

        let id_field = self.merge_config.id_field.clone();
        let selected = item
            .potential_matches
            .iter()
            .find(|m| {
                record_id(&m.record, &id_field).as_deref() == Some(decision.selected_match_id.as_str())
            })
            .expect("validated above");

        let sources = vec![
            SourceRecord::from_record(&item.candidate, &id_field)?,
            SourceRecord::from_record(&selected.record, &id_field)?,
        ];

        let mut result = merge(&sources, &self.merge_config)?;
        result.provenance.queue_item_id = Some(item.id.clone());
        result.provenance.merged_by = decision.decided_by.clone();

        if let Some(provenance) = &self.provenance {
            provenance.save(&result.provenance)?;
        }

        if let Some(archive) = &self.archive {
            archive.archive(
                &result.source_records,
                &ArchiveMeta {
                    reason: Some("merged".into()),
                    merged_into_id: Some(result.golden_record_id.clone()),
                },
            )?;
        }

        if let Some(database) = &self.database {
            upsert(database.as_ref(), &id_field, &result.golden_record_id, &result.golden_record)?;
        }

        (self.sink)(ResolveEvent::MergeCommitted {
            golden_record_id: result.golden_record_id.clone(),
            queue_item_id: Some(item.id.clone()),
            source_record_ids: result.provenance.source_record_ids.clone(),
        });

        // Advisory bookkeeping from here on: the merge is committed.
        let now = Utc::now();
        let queue_item_updated = match self.queue.update_queue_item(
            item_id,
            &QueueItemPatch {
                status: Some(QueueStatus::Merged),
                decision: Some(decision.clone()),
                decided_at: Some(now),
                decided_by: decision.decided_by.clone(),
                updated_at: Some(now),
                ..Default::default()
            },
        ) {
            Ok(_) => true,
            Err(err) => {
                log::warn!("queue item '{item_id}' not updated after merge: {err}");
                (self.sink)(ResolveEvent::QueueUpdateFailed {
                    queue_item_id: item_id.into(),
                    error: err.to_string(),
                });
                false
            }
        };

        Ok(MergeDecisionOutcome { merge: result, queue_item_updated })
    }

    // -- unmerge ----------------------------------------------------------

    /// Reverse a merge: restore archived sources, flag the provenance row
    /// (never delete it), optionally delete the golden record.
    pub fn unmerge(
        &mut self,
        golden_record_id: &str,
        options: &UnmergeOptions,
    ) -> Result<UnmergeReport, KindredError> {
        let provenance_adapter = self.provenance.as_ref().ok_or_else(|| {
            KindredError::Validation("unmerge requires a provenance adapter".into())
        })?;
        let archive = self.archive.as_ref().ok_or_else(|| {
            KindredError::Validation("unmerge requires a merge/archive adapter".into())
        })?;

        let provenance = provenance_adapter.get(golden_record_id)?.ok_or_else(|| {
            KindredError::NotFound { entity: "provenance".into(), id: golden_record_id.into() }
        })?;
        if provenance.unmerged {
            return Err(KindredError::Validation(format!(
                "golden record '{golden_record_id}' is already unmerged"
            )));
        }

        let restored = archive.restore(&provenance.source_record_ids)?;

        if let Some(database) = &self.database {
            let id_field = self.merge_config.id_field.clone();
            for source in &restored {
                upsert(database.as_ref(), &id_field, &source.id, &source.record)?;
            }
        }

        provenance_adapter.mark_unmerged(
            golden_record_id,
            Utc::now(),
            options.by.as_deref(),
            options.reason.as_deref(),
        )?;

        let golden_deleted = if options.delete_golden {
            let database = self.database.as_ref().ok_or_else(|| {
                KindredError::Validation(
                    "deleting the golden record requires a database adapter".into(),
                )
            })?;
            database.delete(golden_record_id)?;
            true
        } else {
            false
        };

        (self.sink)(ResolveEvent::Unmerged {
            golden_record_id: golden_record_id.into(),
            restored: restored.len(),
        });

        Ok(UnmergeReport { restored, golden_deleted })
    }
}

/// Update-or-insert against a record store, making sure the stable id field
/// is present on the persisted record.
fn upsert(
    database: &dyn DatabaseAdapter,
    id_field: &str,
    id: &str,
    record: &Record,
) -> Result<(), KindredError> {
    let mut record = record.clone();
    record
        .entry(id_field.to_string())
        .or_insert_with(|| kindred_core::value::FieldValue::Text(id.to_string()));
    match database.update(id, &record) {
        Err(KindredError::NotFound { .. }) => database.insert(&record),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::value::FieldValue;

    #[test]
    fn new_items_start_pending_with_defaults() {
        let item = QueueItem::new(Record::new(), Vec::new());
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.priority, 0);
        assert!(item.tags.is_empty());
        assert!(item.decision.is_none());
    }

    #[test]
    fn json_round_trip() {
        let mut candidate = Record::new();
        candidate.insert("id".into(), FieldValue::Text("rec-1".into()));
        let mut item = QueueItem::new(
            candidate,
            vec![PotentialMatch {
                record: Record::new(),
                score: 0.72,
                outcome: MatchOutcome::PotentialMatch,
                explanation: "close email".into(),
            }],
        );
        item.tags = vec!["crm".into()];
        item.priority = 3;

        let json = item.to_json().unwrap();
        assert!(json.contains("\"potential_match\""));
        let back = QueueItem::from_json(&json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        let err = QueueItem::from_json("{not json").unwrap_err();
        assert!(err.to_string().contains("malformed queue item"));
    }
}
