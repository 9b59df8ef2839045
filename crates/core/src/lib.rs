//! `kindred-core` — record model, field comparators, blocking and scoring.
//!
//! Pure engine crate: no adapter or IO dependencies. Comparators, blocking
//! and scoring are synchronous and deterministic.

pub mod blocking;
pub mod compare;
pub mod error;
pub mod model;
pub mod scoring;
pub mod value;

pub use blocking::{BlockingStrategy, CompositeMode, KeyTransform, SortKeySpec};
pub use compare::ComparatorKind;
pub use error::KindredError;
pub use model::{BlockingKey, FieldScore, MatchOutcome, MatchResult};
pub use scoring::{score, FieldRule, ScoringConfig};
pub use value::{FieldValue, Record};
