use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Blocking
// ---------------------------------------------------------------------------

/// Field name → normalized value, derived from a record by a blocking
/// strategy. Used only to group candidates, never persisted as identity.
pub type BlockingKey = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Per-field comparator outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldScore {
    pub field: String,
    /// Raw comparator score in [0, 1].
    pub score: f64,
    /// Comparator name that produced the score.
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Classification of a scored pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    NoMatch,
    PotentialMatch,
    DefiniteMatch,
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatch => write!(f, "no_match"),
            Self::PotentialMatch => write!(f, "potential_match"),
            Self::DefiniteMatch => write!(f, "definite_match"),
        }
    }
}

/// Result of scoring one candidate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Weighted, normalized total in [0, 1].
    pub total_score: f64,
    pub field_scores: Vec<FieldScore>,
    pub outcome: MatchOutcome,
}

impl MatchResult {
    /// One-line human summary of the per-field contributions.
    pub fn explanation(&self) -> String {
        let parts: Vec<String> = self
            .field_scores
            .iter()
            .map(|fs| format!("{}: {:.3} ({})", fs.field, fs.score, fs.method))
            .collect();
        format!("total {:.3} [{}]", self.total_score, parts.join("; "))
    }
}
