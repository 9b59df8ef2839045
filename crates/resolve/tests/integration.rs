use std::sync::Arc;

use kindred_core::compare::{
    ComparatorKind, ExactOptions, JaroWinklerOptions, LevenshteinOptions,
};
use kindred_core::scoring::{FieldRule, ScoringConfig};
use kindred_core::value::{record_id, FieldValue, Record};
use kindred_core::{BlockingStrategy, KindredError, MatchOutcome};
use kindred_merge::config::{MergeConfig, MergeStrategy};
use kindred_resolve::{
    EventCollector, MemoryDatabaseAdapter, MemoryMergeAdapter, MemoryProvenanceAdapter,
    MemoryQueueAdapter, MergeDecision, QueueAdapter, QueueFilter, QueueItem, QueueStatus,
    ResolveEvent, ResolveOptions, Resolver, UnmergeOptions,
};

// -------------------------------------------------------------------------
// Fixtures
// -------------------------------------------------------------------------

fn text(s: &str) -> FieldValue {
    FieldValue::Text(s.into())
}

fn candidate_record() -> Record {
    let mut r = Record::new();
    r.insert("id".into(), text("rec-001"));
    r.insert("first_name".into(), text("John"));
    r.insert("last_name".into(), text("Smith"));
    r.insert("email".into(), text("john@example.com"));
    r
}

fn match_record() -> Record {
    let mut r = Record::new();
    r.insert("id".into(), text("rec-002"));
    r.insert("first_name".into(), text("Jonathan"));
    r.insert("last_name".into(), text("Smith"));
    r.insert("email".into(), text("johnny@example.com"));
    r.insert("phone".into(), text("555-1234"));
    r
}

fn scoring() -> ScoringConfig {
    ScoringConfig {
        fields: vec![
            FieldRule {
                field: "last_name".into(),
                comparator: ComparatorKind::Exact(ExactOptions {
                    case_insensitive: true,
                    ..Default::default()
                }),
                weight: 1.0,
                threshold: None,
            },
            FieldRule {
                field: "first_name".into(),
                comparator: ComparatorKind::JaroWinkler(JaroWinklerOptions::default()),
                weight: 1.0,
                threshold: None,
            },
            FieldRule {
                field: "email".into(),
                comparator: ComparatorKind::Levenshtein(LevenshteinOptions::default()),
                weight: 1.0,
                threshold: None,
            },
        ],
        no_match_threshold: 0.5,
        definite_match_threshold: 0.95,
    }
}

fn merge_config() -> MergeConfig {
    let mut config = MergeConfig::default();
    config.default_strategy = MergeStrategy::PreferNonNull;
    config.field_strategies.insert("first_name".into(), MergeStrategy::PreferLonger);
    config.field_strategies.insert("last_name".into(), MergeStrategy::PreferLonger);
    config.field_strategies.insert("email".into(), MergeStrategy::PreferFirst);
    config.field_strategies.insert("phone".into(), MergeStrategy::PreferNonNull);
    config
}

struct Stores {
    database: Arc<MemoryDatabaseAdapter>,
    queue: Arc<MemoryQueueAdapter>,
    provenance: Arc<MemoryProvenanceAdapter>,
    archive: Arc<MemoryMergeAdapter>,
}

fn wired_resolver(collector: &EventCollector) -> (Resolver, Stores) {
    let stores = Stores {
        database: Arc::new(MemoryDatabaseAdapter::new()),
        queue: Arc::new(MemoryQueueAdapter::new()),
        provenance: Arc::new(MemoryProvenanceAdapter::new()),
        archive: Arc::new(MemoryMergeAdapter::new()),
    };
    let resolver = Resolver::new(scoring())
        .unwrap()
        .with_merge_config(merge_config())
        .with_database(stores.database.clone())
        .with_queue_adapter(stores.queue.clone())
        .with_provenance(stores.provenance.clone())
        .with_archive(stores.archive.clone())
        .with_event_sink(collector.sink());
    (resolver, stores)
}

// -------------------------------------------------------------------------
// End-to-end: resolve → queue → merge decision → unmerge
// -------------------------------------------------------------------------

#[test]
fn resolve_queue_merge_golden_record() {
    let collector = EventCollector::new();
    let (mut resolver, stores) = wired_resolver(&collector);
    stores.database.seed(&[match_record()]).unwrap();

    let options = ResolveOptions { auto_queue: true, ..Default::default() };
    let report = resolver.resolve(&candidate_record(), &[match_record()], &options);
    assert_eq!(report.potential_matches, 1);
    let item_id = report.queued_item_id.clone().expect("potential match queued");

    let mut queue = resolver.queue().unwrap();
    let item = queue.start_review(&item_id).unwrap();
    assert_eq!(item.status, QueueStatus::Reviewing);

    let check = queue.can_merge(&item, "rec-002");
    assert!(check.can_merge, "blocked: {:?}", check.reason);

    let decision = MergeDecision {
        selected_match_id: "rec-002".into(),
        decided_by: Some("reviewer@example.com".into()),
        notes: None,
    };
    let outcome = queue.handle_merge_decision(&item_id, &decision).unwrap();
    assert!(outcome.queue_item_updated);

    // Golden record per the configured field strategies.
    let golden = &outcome.merge.golden_record;
    assert_eq!(golden["first_name"], text("Jonathan"));
    assert_eq!(golden["last_name"], text("Smith"));
    assert_eq!(golden["email"], text("john@example.com"));
    assert_eq!(golden["phone"], text("555-1234"));
    assert_eq!(outcome.merge.golden_record_id, "rec-001");

    // Provenance: persisted, covers both sources, stamped with the decision.
    let provenance = stores.provenance.as_ref();
    use kindred_resolve::ProvenanceAdapter;
    let row = provenance.get("rec-001").unwrap().expect("provenance saved");
    assert_eq!(row.source_record_ids, vec!["rec-001", "rec-002"]);
    assert_eq!(row.queue_item_id.as_deref(), Some(item_id.as_str()));
    assert_eq!(row.merged_by.as_deref(), Some("reviewer@example.com"));
    assert!(row.field_sources["first_name"].had_conflict);
    assert!(!row.field_sources["phone"].had_conflict);

    // Both sources archived; queue item retired.
    use kindred_resolve::MergeAdapter;
    let archived = stores.archive.is_archived(&["rec-001".into(), "rec-002".into()]).unwrap();
    assert!(archived["rec-001"] && archived["rec-002"]);
    let item = queue.get(&item_id).unwrap();
    assert_eq!(item.status, QueueStatus::Merged);
    assert_eq!(item.decision.as_ref().unwrap().selected_match_id, "rec-002");

    // Merge committed event carries the full source set.
    let merges = collector.merges();
    match &merges[0] {
        ResolveEvent::MergeCommitted { golden_record_id, source_record_ids, .. } => {
            assert_eq!(golden_record_id, "rec-001");
            assert_eq!(source_record_ids, &["rec-001".to_string(), "rec-002".to_string()]);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Unmerge: sources restored, provenance flagged but never deleted.
    let report = queue
        .unmerge(
            "rec-001",
            &UnmergeOptions {
                by: Some("admin".into()),
                reason: Some("wrong person".into()),
                delete_golden: false,
            },
        )
        .unwrap();
    assert_eq!(report.restored.len(), 2);
    assert_eq!(report.restored[0].record, candidate_record());
    assert_eq!(report.restored[1].record, match_record());

    let row = provenance.get("rec-001").unwrap().unwrap();
    assert!(row.unmerged);
    assert_eq!(row.unmerged_by.as_deref(), Some("admin"));
    assert_eq!(row.unmerge_reason.as_deref(), Some("wrong person"));

    let archived = stores.archive.is_archived(&["rec-001".into(), "rec-002".into()]).unwrap();
    assert!(!archived["rec-001"] && !archived["rec-002"]);

    // A second unmerge is rejected.
    let err = queue.unmerge("rec-001", &UnmergeOptions::default()).unwrap_err();
    assert!(err.to_string().contains("already unmerged"));
}

// -------------------------------------------------------------------------
// Queue state machine
// -------------------------------------------------------------------------

#[test]
fn can_merge_is_non_throwing_on_settled_items() {
    let collector = EventCollector::new();
    let (resolver, _stores) = wired_resolver(&collector);
    let queue = resolver.queue().unwrap();

    let potential = kindred_resolve::PotentialMatch {
        record: match_record(),
        score: 0.9,
        outcome: MatchOutcome::PotentialMatch,
        explanation: "close name".into(),
    };
    let item = queue.add(candidate_record(), vec![potential], 0, vec![], None).unwrap();
    let rejected = queue.reject(&item.id, Some("reviewer")).unwrap();
    assert_eq!(rejected.status, QueueStatus::Rejected);

    let check = queue.can_merge(&rejected, "rec-002");
    assert!(!check.can_merge);
    assert!(check.reason.unwrap().contains("rejected"));

    // Unknown match id is reported, not thrown.
    let fresh = queue.add(candidate_record(), vec![kindred_resolve::PotentialMatch {
        record: match_record(),
        score: 0.9,
        outcome: MatchOutcome::PotentialMatch,
        explanation: String::new(),
    }], 0, vec![], None).unwrap();
    let check = queue.can_merge(&fresh, "rec-999");
    assert!(!check.can_merge);
    assert!(check.reason.unwrap().contains("rec-999"));

    // Candidate without a stable id blocks merging.
    let mut anonymous = candidate_record();
    anonymous.remove("id");
    let item = queue.add(anonymous, vec![kindred_resolve::PotentialMatch {
        record: match_record(),
        score: 0.9,
        outcome: MatchOutcome::PotentialMatch,
        explanation: String::new(),
    }], 0, vec![], None).unwrap();
    let check = queue.can_merge(&item, "rec-002");
    assert!(!check.can_merge);
    assert!(check.reason.unwrap().contains("no stable 'id' field"));
}

#[test]
fn review_transitions_validate_source_status() {
    let collector = EventCollector::new();
    let (resolver, _stores) = wired_resolver(&collector);
    let queue = resolver.queue().unwrap();

    let item = queue
        .add(
            candidate_record(),
            vec![kindred_resolve::PotentialMatch {
                record: match_record(),
                score: 0.9,
                outcome: MatchOutcome::PotentialMatch,
                explanation: String::new(),
            }],
            0,
            vec![],
            None,
        )
        .unwrap();

    queue.start_review(&item.id).unwrap();
    // Starting review twice is invalid.
    let err = queue.start_review(&item.id).unwrap_err();
    assert!(err.to_string().contains("reviewing"));

    queue.confirm(&item.id, Some("reviewer")).unwrap();
    // Confirmed items cannot be rejected afterwards.
    let err = queue.reject(&item.id, Some("reviewer")).unwrap_err();
    assert!(err.to_string().contains("confirmed"));
}

#[test]
fn queue_filters_by_status_tags_and_priority() {
    let collector = EventCollector::new();
    let (resolver, _stores) = wired_resolver(&collector);
    let queue = resolver.queue().unwrap();

    let pm = || kindred_resolve::PotentialMatch {
        record: match_record(),
        score: 0.9,
        outcome: MatchOutcome::PotentialMatch,
        explanation: String::new(),
    };
    let a = queue.add(candidate_record(), vec![pm()], 1, vec!["crm".into()], None).unwrap();
    let _b = queue.add(candidate_record(), vec![pm()], 5, vec!["crm".into(), "vip".into()], None).unwrap();
    let _c = queue.add(candidate_record(), vec![pm()], 9, vec![], None).unwrap();
    queue.start_review(&a.id).unwrap();

    let pending = queue.list(&QueueFilter::with_status(QueueStatus::Pending)).unwrap();
    assert_eq!(pending.len(), 2);

    let tagged = queue
        .list(&QueueFilter { tags: Some(vec!["crm".into(), "vip".into()]), ..Default::default() })
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].priority, 5);

    let high = queue
        .count(&QueueFilter {
            priority: Some(kindred_resolve::adapter::PriorityRange {
                min: Some(5),
                max: None,
            }),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(high, 2);
}

// -------------------------------------------------------------------------
// Best-effort paths
// -------------------------------------------------------------------------

/// Delegates to a memory queue but refuses updates, to exercise the
/// advisory post-merge bookkeeping path.
struct UpdateRefusingQueue {
    inner: MemoryQueueAdapter,
}

impl QueueAdapter for UpdateRefusingQueue {
    fn insert_queue_item(&self, item: &QueueItem) -> Result<(), KindredError> {
        self.inner.insert_queue_item(item)
    }
    fn update_queue_item(
        &self,
        _id: &str,
        _patch: &kindred_resolve::queue::QueueItemPatch,
    ) -> Result<QueueItem, KindredError> {
        Err(KindredError::Connection("queue store offline".into()))
    }
    fn find_queue_items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, KindredError> {
        self.inner.find_queue_items(filter)
    }
    fn find_queue_item_by_id(&self, id: &str) -> Result<Option<QueueItem>, KindredError> {
        self.inner.find_queue_item_by_id(id)
    }
    fn delete_queue_item(&self, id: &str) -> Result<(), KindredError> {
        self.inner.delete_queue_item(id)
    }
    fn count_queue_items(&self, filter: &QueueFilter) -> Result<usize, KindredError> {
        self.inner.count_queue_items(filter)
    }
    fn batch_insert_queue_items(&self, items: &[QueueItem]) -> Result<(), KindredError> {
        self.inner.batch_insert_queue_items(items)
    }
}

#[test]
fn merge_stays_committed_when_queue_update_fails() {
    let collector = EventCollector::new();
    let provenance = Arc::new(MemoryProvenanceAdapter::new());
    let archive = Arc::new(MemoryMergeAdapter::new());
    let queue_adapter = Arc::new(UpdateRefusingQueue { inner: MemoryQueueAdapter::new() });

    let resolver = Resolver::new(scoring())
        .unwrap()
        .with_merge_config(merge_config())
        .with_queue_adapter(queue_adapter.clone())
        .with_provenance(provenance.clone())
        .with_archive(archive.clone());
    let mut queue = resolver.queue().unwrap().with_event_sink(collector.sink());

    let item = queue
        .add(
            candidate_record(),
            vec![kindred_resolve::PotentialMatch {
                record: match_record(),
                score: 0.9,
                outcome: MatchOutcome::PotentialMatch,
                explanation: String::new(),
            }],
            0,
            vec![],
            None,
        )
        .unwrap();

    let decision = MergeDecision {
        selected_match_id: "rec-002".into(),
        decided_by: None,
        notes: None,
    };
    let outcome = queue.handle_merge_decision(&item.id, &decision).unwrap();

    // The advisory update failed but the merge is committed: provenance and
    // archive rows exist, and the failure surfaced as an event.
    assert!(!outcome.queue_item_updated);
    use kindred_resolve::{MergeAdapter, ProvenanceAdapter};
    assert!(provenance.exists("rec-001").unwrap());
    assert_eq!(archive.count_archived().unwrap(), 2);
    assert!(collector
        .events()
        .iter()
        .any(|e| matches!(e, ResolveEvent::QueueUpdateFailed { .. })));

    // The item itself still reports its pre-merge status.
    let stale = queue.get(&item.id).unwrap();
    assert_eq!(stale.status, QueueStatus::Pending);
}

// -------------------------------------------------------------------------
// Database-backed resolution
// -------------------------------------------------------------------------

#[test]
fn resolve_with_database_uses_blocking_keys() {
    let collector = EventCollector::new();
    let (resolver, stores) = wired_resolver(&collector);
    let mut resolver = resolver
        .with_blocking(BlockingStrategy::Standard {
            fields: vec!["last_name".into()],
            case_insensitive: true,
        })
        .unwrap();

    let mut other = Record::new();
    other.insert("id".into(), text("rec-900"));
    other.insert("first_name".into(), text("Greta"));
    other.insert("last_name".into(), text("Klein"));
    stores.database.seed(&[match_record(), other]).unwrap();

    let report = resolver
        .resolve_with_database(&candidate_record(), &ResolveOptions::default())
        .unwrap();

    // Blocking on last_name fetched only the Smith record.
    assert_eq!(report.considered, 1);
    assert_eq!(record_id(&report.matches[0].record, "id").unwrap(), "rec-002");
    assert_eq!(report.potential_matches, 1);
}

#[test]
fn resolve_with_database_requires_adapter() {
    let mut resolver = Resolver::new(scoring()).unwrap();
    let err = resolver
        .resolve_with_database(&candidate_record(), &ResolveOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("database adapter"));
}

// -------------------------------------------------------------------------
// Batch deduplication
// -------------------------------------------------------------------------

#[test]
fn deduplicate_batch_with_blocking_and_auto_queue() {
    let collector = EventCollector::new();
    let (resolver, stores) = wired_resolver(&collector);
    let mut resolver = resolver
        .with_blocking(BlockingStrategy::Standard {
            fields: vec!["last_name".into()],
            case_insensitive: true,
        })
        .unwrap();

    let person = |id: &str, first: &str, last: &str, email: &str| {
        let mut r = Record::new();
        r.insert("id".into(), text(id));
        r.insert("first_name".into(), text(first));
        r.insert("last_name".into(), text(last));
        r.insert("email".into(), text(email));
        r
    };
    let records = vec![
        person("r1", "John", "Smith", "john@example.com"),
        person("r2", "John", "Smith", "john@example.com"),
        person("r3", "Jonathan", "Smith", "johnny@example.com"),
        person("r4", "Greta", "Klein", "greta@example.com"),
    ];

    let options = ResolveOptions { auto_queue: true, ..Default::default() };
    let report = resolver.deduplicate_batch(&records, &options);

    // Blocking keeps Smith-Smith pairs only: (r1,r2), (r1,r3), (r2,r3).
    assert_eq!(report.pairs_compared, 3);
    assert_eq!(report.definite_matches, 1);
    assert_eq!(report.groups, vec![vec![0, 1]]);
    assert_eq!(report.potential_matches, 2);
    assert_eq!(report.queued, 2);
    assert_eq!(
        stores.queue.count_queue_items(&QueueFilter::default()).unwrap(),
        2
    );
}
