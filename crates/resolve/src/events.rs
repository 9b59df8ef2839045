//! Event types for resolution and queue notifications.
//!
//! Queue insertion from `resolve()` is fire-and-forget: failures are logged
//! and emitted here rather than returned. Callers that need to observe
//! queue activity attach a sink; the test harness uses `EventCollector` to
//! verify emission ordering and the best-effort failure paths.

use serde::Serialize;

/// Events emitted by the resolver and review queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResolveEvent {
    /// A queue item was created for a candidate's potential matches.
    PotentialMatchQueued {
        queue_item_id: String,
        candidate_id: Option<String>,
        match_count: usize,
    },

    /// Fire-and-forget queue insertion failed; the resolve call itself
    /// already returned.
    QueueInsertFailed {
        candidate_id: Option<String>,
        error: String,
    },

    /// Golden record and provenance exist; the merge is committed.
    MergeCommitted {
        golden_record_id: String,
        queue_item_id: Option<String>,
        source_record_ids: Vec<String>,
    },

    /// Post-merge queue bookkeeping failed; the merge stays committed.
    QueueUpdateFailed { queue_item_id: String, error: String },

    /// Archived sources were restored and the provenance row flagged.
    Unmerged { golden_record_id: String, restored: usize },
}

/// Callback type for receiving resolve events.
pub type EventSink = Box<dyn FnMut(ResolveEvent) + Send>;

/// A sink that drops every event.
pub fn noop_sink() -> EventSink {
    Box::new(|_| {})
}

/// Simple shareable event collector for testing.
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    events: std::sync::Arc<std::sync::Mutex<Vec<ResolveEvent>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records into this collector.
    pub fn sink(&self) -> EventSink {
        let events = self.events.clone();
        Box::new(move |event| events.lock().unwrap().push(event))
    }

    pub fn events(&self) -> Vec<ResolveEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    /// Filter to only QueueInsertFailed events.
    pub fn insert_failures(&self) -> Vec<ResolveEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, ResolveEvent::QueueInsertFailed { .. }))
            .collect()
    }

    /// Filter to only MergeCommitted events.
    pub fn merges(&self) -> Vec<ResolveEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, ResolveEvent::MergeCommitted { .. }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_records_through_sink() {
        let collector = EventCollector::new();
        let mut sink = collector.sink();
        sink(ResolveEvent::Unmerged { golden_record_id: "g1".into(), restored: 2 });
        sink(ResolveEvent::QueueUpdateFailed { queue_item_id: "q1".into(), error: "io".into() });

        assert_eq!(collector.len(), 2);
        assert!(collector.insert_failures().is_empty());
        match &collector.events()[0] {
            ResolveEvent::Unmerged { restored, .. } => assert_eq!(*restored, 2),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
