//! `kindred-merge` — golden-record merge executor.
//!
//! Applies per-field strategies to N source records, producing a golden
//! record plus field-level provenance, conflict entries and stats. Pure and
//! deterministic given stable source ordering; persistence is the caller's
//! concern.

pub mod config;
pub mod executor;
pub mod provenance;

pub use config::{ConflictResolution, CustomMergeFn, CustomRegistry, MergeConfig, MergeStrategy};
pub use executor::merge;
pub use provenance::{
    Conflict, FieldContribution, FieldProvenance, MergeResult, MergeStats, Provenance,
    SourceRecord,
};
