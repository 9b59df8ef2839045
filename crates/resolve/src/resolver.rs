//! Top-level resolver: blocking → scoring → classification, with optional
//! auto-queue of potential matches and adapter-backed candidate fetch.

use std::sync::Arc;
use std::time::Instant;

use kindred_core::blocking::BlockingStrategy;
use kindred_core::error::KindredError;
use kindred_core::model::{MatchOutcome, MatchResult};
use kindred_core::scoring::{score, ScoringConfig};
use kindred_core::value::{record_id, Record};
use kindred_merge::config::MergeConfig;

use crate::adapter::{
    DatabaseAdapter, MergeAdapter, ProvenanceAdapter, QueryOptions, QueueAdapter,
};
use crate::events::{noop_sink, EventSink, ResolveEvent};
use crate::queue::{PotentialMatch, QueueItem, ReviewQueue};

const DEFAULT_MAX_FETCH: usize = 1_000;

// ---------------------------------------------------------------------------
// Options + reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Enqueue potential matches (never no-matches or definite matches)
    /// for human review. Insertion failures are logged and emitted, not
    /// returned: the resolve call itself stays synchronous over scoring.
    pub auto_queue: bool,
    /// Extra context merged onto auto-queued items.
    pub queue_context: Option<Record>,
    pub queue_priority: i64,
    pub queue_tags: Vec<String>,
    /// Upper bound on adapter-fetched candidates.
    pub max_fetch_size: Option<usize>,
}

/// One scored pair from a resolve call.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// Index into the candidate set that was scored.
    pub index: usize,
    pub record: Record,
    pub result: MatchResult,
}

#[derive(Debug)]
pub struct ResolveReport {
    /// Scored survivors of blocking, best score first.
    pub matches: Vec<ScoredCandidate>,
    pub considered: usize,
    pub definite_matches: usize,
    pub potential_matches: usize,
    pub no_matches: usize,
    /// Id of the queue item created by auto-queue, if any.
    pub queued_item_id: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub struct BatchReport {
    pub total_records: usize,
    pub pairs_compared: usize,
    pub definite_matches: usize,
    pub potential_matches: usize,
    pub no_matches: usize,
    /// Duplicate groups (definite matches, transitively), as record indexes.
    pub groups: Vec<Vec<usize>>,
    pub queued: usize,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver {
    scoring: ScoringConfig,
    blocking: Option<BlockingStrategy>,
    merge_config: MergeConfig,
    database: Option<Arc<dyn DatabaseAdapter>>,
    queue_adapter: Option<Arc<dyn QueueAdapter>>,
    provenance: Option<Arc<dyn ProvenanceAdapter>>,
    archive: Option<Arc<dyn MergeAdapter>>,
    sink: EventSink,
    max_fetch_size: usize,
}

impl Resolver {
    pub fn new(scoring: ScoringConfig) -> Result<Self, KindredError> {
        scoring.validate()?;
        Ok(Self {
            scoring,
            blocking: None,
            merge_config: MergeConfig::default(),
            database: None,
            queue_adapter: None,
            provenance: None,
            archive: None,
            sink: noop_sink(),
            max_fetch_size: DEFAULT_MAX_FETCH,
        })
    }

    pub fn with_blocking(mut self, strategy: BlockingStrategy) -> Result<Self, KindredError> {
        strategy.validate()?;
        self.blocking = Some(strategy);
        Ok(self)
    }

    pub fn with_merge_config(mut self, config: MergeConfig) -> Self {
        self.merge_config = config;
        self
    }

    pub fn with_database(mut self, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        self.database = Some(adapter);
        self
    }

    pub fn with_queue_adapter(mut self, adapter: Arc<dyn QueueAdapter>) -> Self {
        self.queue_adapter = Some(adapter);
        self
    }

    pub fn with_provenance(mut self, adapter: Arc<dyn ProvenanceAdapter>) -> Self {
        self.provenance = Some(adapter);
        self
    }

    pub fn with_archive(mut self, adapter: Arc<dyn MergeAdapter>) -> Self {
        self.archive = Some(adapter);
        self
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_max_fetch_size(mut self, max: usize) -> Self {
        self.max_fetch_size = max;
        self
    }

    /// The review queue bound to the configured adapters.
    pub fn queue(&self) -> Result<ReviewQueue, KindredError> {
        let adapter = self
            .queue_adapter
            .clone()
            .ok_or_else(|| KindredError::Queue("no queue adapter configured".into()))?;
        let mut queue = ReviewQueue::new(adapter, self.merge_config.clone());
        if let Some(provenance) = self.provenance.clone() {
            queue = queue.with_provenance(provenance);
        }
        if let Some(archive) = self.archive.clone() {
            queue = queue.with_archive(archive);
        }
        if let Some(database) = self.database.clone() {
            queue = queue.with_database(database);
        }
        Ok(queue)
    }

    // -- resolution -------------------------------------------------------

    /// Score a candidate against a caller-supplied record set.
    ///
    /// Blocking (when configured) shrinks the set first; every survivor is
    /// scored and classified.
    pub fn resolve(
        &mut self,
        candidate: &Record,
        existing: &[Record],
        options: &ResolveOptions,
    ) -> ResolveReport {
        let started = Instant::now();
        let indexes: Vec<usize> = match &self.blocking {
            Some(strategy) => strategy.candidates_for(candidate, existing),
            None => (0..existing.len()).collect(),
        };
        self.score_survivors(candidate, existing, &indexes, options, started)
    }

    /// Same as [`Resolver::resolve`], but candidates come from the database
    /// adapter, bounded by `max_fetch_size`.
    pub fn resolve_with_database(
        &mut self,
        candidate: &Record,
        options: &ResolveOptions,
    ) -> Result<ResolveReport, KindredError> {
        let started = Instant::now();
        let database = self.database.clone().ok_or_else(|| {
            KindredError::Validation("resolve_with_database requires a database adapter".into())
        })?;

        let fetch = QueryOptions::limited(options.max_fetch_size.unwrap_or(self.max_fetch_size));
        let fetched = match &self.blocking {
            Some(strategy) => match strategy.generate(candidate) {
                Some(keys) => database.find_by_blocking_keys(&keys, &fetch)?,
                // Candidate lacks the blocking fields: fall back to a
                // bounded scan rather than dropping it.
                None => database.find_all(&fetch)?,
            },
            None => database.find_all(&fetch)?,
        };

        // Blocking already constrained the fetch; score everything returned.
        let indexes: Vec<usize> = (0..fetched.len()).collect();
        Ok(self.score_survivors(candidate, &fetched, &indexes, options, started))
    }

    fn score_survivors(
        &mut self,
        candidate: &Record,
        existing: &[Record],
        indexes: &[usize],
        options: &ResolveOptions,
        started: Instant,
    ) -> ResolveReport {
        let mut matches: Vec<ScoredCandidate> = indexes
            .iter()
            .map(|&index| ScoredCandidate {
                index,
                record: existing[index].clone(),
                result: score(candidate, &existing[index], &self.scoring),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.result
                .total_score
                .partial_cmp(&a.result.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.index.cmp(&b.index))
        });

        let definite_matches =
            matches.iter().filter(|m| m.result.outcome == MatchOutcome::DefiniteMatch).count();
        let potential_matches =
            matches.iter().filter(|m| m.result.outcome == MatchOutcome::PotentialMatch).count();
        let no_matches = matches.len() - definite_matches - potential_matches;

        let queued_item_id = if options.auto_queue && potential_matches > 0 {
            self.auto_queue(candidate, &matches, options)
        } else {
            None
        };

        ResolveReport {
            considered: matches.len(),
            definite_matches,
            potential_matches,
            no_matches,
            matches,
            queued_item_id,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Fire-and-forget enqueue of a candidate's potential matches. Failures
    /// are logged and emitted as events, never returned.
    fn auto_queue(
        &mut self,
        candidate: &Record,
        matches: &[ScoredCandidate],
        options: &ResolveOptions,
    ) -> Option<String> {
        let queue = match &self.queue_adapter {
            Some(queue) => queue.clone(),
            None => {
                log::debug!("auto_queue requested but no queue adapter configured");
                return None;
            }
        };

        let potential: Vec<PotentialMatch> = matches
            .iter()
            .filter(|m| m.result.outcome == MatchOutcome::PotentialMatch)
            .map(|m| PotentialMatch {
                record: m.record.clone(),
                score: m.result.total_score,
                outcome: m.result.outcome,
                explanation: m.result.explanation(),
            })
            .collect();

        let mut item = QueueItem::new(candidate.clone(), potential);
        item.priority = options.queue_priority;
        item.tags = options.queue_tags.clone();
        item.context = options.queue_context.clone();

        let candidate_id = record_id(candidate, &self.merge_config.id_field);
        match queue.insert_queue_item(&item) {
            Ok(()) => {
                (self.sink)(ResolveEvent::PotentialMatchQueued {
                    queue_item_id: item.id.clone(),
                    candidate_id,
                    match_count: item.potential_matches.len(),
                });
                Some(item.id)
            }
            Err(err) => {
                log::warn!("auto-queue insertion failed: {err}");
                (self.sink)(ResolveEvent::QueueInsertFailed {
                    candidate_id,
                    error: err.to_string(),
                });
                None
            }
        }
    }

    // -- batch ------------------------------------------------------------

    /// Pairwise resolution across a batch: candidate pairs from blocking
    /// (all pairs when unblocked), duplicate groups from definite matches.
    pub fn deduplicate_batch(
        &mut self,
        records: &[Record],
        options: &ResolveOptions,
    ) -> BatchReport {
        let started = Instant::now();
        let pairs: Vec<(usize, usize)> = match &self.blocking {
            Some(strategy) => strategy.candidate_pairs(records),
            None => {
                let mut all = Vec::new();
                for i in 0..records.len() {
                    for j in i + 1..records.len() {
                        all.push((i, j));
                    }
                }
                all
            }
        };

        let mut definite_matches = 0usize;
        let mut potential_matches = 0usize;
        let mut queued = 0usize;
        let mut union_find: Vec<usize> = (0..records.len()).collect();

        for &(i, j) in &pairs {
            let result = score(&records[i], &records[j], &self.scoring);
            match result.outcome {
                MatchOutcome::DefiniteMatch => {
                    definite_matches += 1;
                    union(&mut union_find, i, j);
                }
                MatchOutcome::PotentialMatch => {
                    potential_matches += 1;
                    if options.auto_queue {
                        let scored = ScoredCandidate {
                            index: j,
                            record: records[j].clone(),
                            result,
                        };
                        if self.auto_queue(&records[i], &[scored], options).is_some() {
                            queued += 1;
                        }
                    }
                }
                MatchOutcome::NoMatch => {}
            }
        }

        // Collect duplicate groups of two or more.
        let mut grouped: std::collections::BTreeMap<usize, Vec<usize>> =
            std::collections::BTreeMap::new();
        for i in 0..records.len() {
            grouped.entry(find(&mut union_find, i)).or_default().push(i);
        }
        let groups: Vec<Vec<usize>> =
            grouped.into_values().filter(|members| members.len() > 1).collect();

        BatchReport {
            total_records: records.len(),
            pairs_compared: pairs.len(),
            definite_matches,
            potential_matches,
            no_matches: pairs.len() - definite_matches - potential_matches,
            groups,
            queued,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn find(parents: &mut Vec<usize>, i: usize) -> usize {
    if parents[i] != i {
        let root = find(parents, parents[i]);
        parents[i] = root;
    }
    parents[i]
}

fn union(parents: &mut Vec<usize>, a: usize, b: usize) {
    let ra = find(parents, a);
    let rb = find(parents, b);
    if ra != rb {
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parents[hi] = lo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kindred_core::compare::{ComparatorKind, ExactOptions, JaroWinklerOptions};
    use kindred_core::scoring::FieldRule;
    use kindred_core::value::FieldValue;

    use crate::events::EventCollector;
    use crate::memory::MemoryQueueAdapter;

    fn person(id: &str, first: &str, last: &str) -> Record {
        let mut r = Record::new();
        r.insert("id".into(), FieldValue::Text(id.into()));
        r.insert("first_name".into(), FieldValue::Text(first.into()));
        r.insert("last_name".into(), FieldValue::Text(last.into()));
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
            ],
            no_match_threshold: 0.5,
            definite_match_threshold: 0.97,
        }
    }

    #[test]
    fn resolve_classifies_each_survivor() {
        let mut resolver = Resolver::new(scoring()).unwrap();
        let existing = vec![
            person("r1", "John", "Smith"),
            person("r2", "Johnny", "Smith"),
            person("r3", "Greta", "Klein"),
        ];
        let report =
            resolver.resolve(&person("c1", "John", "Smith"), &existing, &ResolveOptions::default());

        assert_eq!(report.considered, 3);
        assert_eq!(report.definite_matches, 1);
        assert_eq!(report.potential_matches, 1);
        assert_eq!(report.no_matches, 1);
        // Best score first.
        assert_eq!(report.matches[0].index, 0);
        assert!(report.queued_item_id.is_none());
    }

    #[test]
    fn auto_queue_enqueues_only_potential_matches() {
        let queue = Arc::new(MemoryQueueAdapter::new());
        let collector = EventCollector::new();
        let mut resolver = Resolver::new(scoring())
            .unwrap()
            .with_queue_adapter(queue.clone())
            .with_event_sink(collector.sink());

        let existing = vec![
            person("r1", "John", "Smith"),
            person("r2", "Johnny", "Smith"),
        ];
        let options = ResolveOptions {
            auto_queue: true,
            queue_tags: vec!["batch-7".into()],
            ..Default::default()
        };
        let report = resolver.resolve(&person("c1", "John", "Smith"), &existing, &options);

        let item_id = report.queued_item_id.expect("queued");
        let stored = queue.find_queue_item_by_id(&item_id).unwrap().unwrap();
        // Only the potential match is offered for review.
        assert_eq!(stored.potential_matches.len(), 1);
        assert_eq!(
            kindred_core::value::record_id(&stored.potential_matches[0].record, "id").unwrap(),
            "r2"
        );
        assert_eq!(stored.tags, vec!["batch-7"]);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn auto_queue_failure_is_swallowed_and_emitted() {
        struct RefusingQueue;
        impl crate::adapter::QueueAdapter for RefusingQueue {
            fn insert_queue_item(&self, _: &QueueItem) -> Result<(), KindredError> {
                Err(KindredError::Connection("store offline".into()))
            }
            fn update_queue_item(
                &self,
                id: &str,
                _: &crate::queue::QueueItemPatch,
            ) -> Result<QueueItem, KindredError> {
                Err(KindredError::NotFound { entity: "queue item".into(), id: id.into() })
            }
            fn find_queue_items(
                &self,
                _: &crate::adapter::QueueFilter,
            ) -> Result<Vec<QueueItem>, KindredError> {
                Ok(Vec::new())
            }
            fn find_queue_item_by_id(&self, _: &str) -> Result<Option<QueueItem>, KindredError> {
                Ok(None)
            }
            fn delete_queue_item(&self, _: &str) -> Result<(), KindredError> {
                Ok(())
            }
            fn count_queue_items(
                &self,
                _: &crate::adapter::QueueFilter,
            ) -> Result<usize, KindredError> {
                Ok(0)
            }
            fn batch_insert_queue_items(&self, _: &[QueueItem]) -> Result<(), KindredError> {
                Ok(())
            }
        }

        let collector = EventCollector::new();
        let mut resolver = Resolver::new(scoring())
            .unwrap()
            .with_queue_adapter(Arc::new(RefusingQueue))
            .with_event_sink(collector.sink());

        let existing = vec![person("r2", "Johnny", "Smith")];
        let options = ResolveOptions { auto_queue: true, ..Default::default() };
        let report = resolver.resolve(&person("c1", "John", "Smith"), &existing, &options);

        // The resolve call still returns normally with its scores.
        assert_eq!(report.potential_matches, 1);
        assert!(report.queued_item_id.is_none());
        assert_eq!(collector.insert_failures().len(), 1);
    }

    #[test]
    fn queue_accessor_requires_adapter() {
        let resolver = Resolver::new(scoring()).unwrap();
        match resolver.queue() {
            Err(KindredError::Queue(msg)) => assert!(msg.contains("no queue adapter")),
            other => panic!("expected queue error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn deduplicate_batch_groups_definites() {
        let mut resolver = Resolver::new(scoring()).unwrap();
        let records = vec![
            person("r1", "John", "Smith"),
            person("r2", "john", "smith"),
            person("r3", "Greta", "Klein"),
            person("r4", "greta", "klein"),
            person("r5", "Omar", "Haddad"),
        ];
        let report = resolver.deduplicate_batch(&records, &ResolveOptions::default());

        assert_eq!(report.total_records, 5);
        assert_eq!(report.pairs_compared, 10);
        assert_eq!(report.groups, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(report.definite_matches, 2);
    }
}
