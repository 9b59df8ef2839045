//! `kindred-resolve` — resolver facade, review queue and adapter contracts.
//!
//! Orchestrates blocking → scoring → classification, routes ambiguous pairs
//! to the review queue, and executes confirmed merges with provenance and
//! unmerge support. Persistence is behind the adapter traits; in-memory
//! implementations back the test suites.

pub mod adapter;
pub mod config;
pub mod events;
pub mod ingest;
pub mod memory;
pub mod queue;
pub mod resolver;

pub use adapter::{
    ArchiveMeta, DatabaseAdapter, FilterCriteria, FilterOp, FilterValue, MergeAdapter, OrderBy,
    PriorityRange, ProvenanceAdapter, QueryOptions, QueueAdapter, QueueFilter, SortDirection,
};
pub use config::ResolverConfig;
pub use events::{EventCollector, EventSink, ResolveEvent};
pub use ingest::{load_csv_records, ColumnKind, ColumnSpec, IngestSpec};
pub use memory::{
    MemoryDatabaseAdapter, MemoryMergeAdapter, MemoryProvenanceAdapter, MemoryQueueAdapter,
};
pub use queue::{
    CanMerge, MergeDecision, MergeDecisionOutcome, PotentialMatch, QueueItem, QueueStatus,
    ReviewQueue, UnmergeOptions, UnmergeReport,
};
pub use resolver::{BatchReport, ResolveOptions, ResolveReport, Resolver, ScoredCandidate};
