//! Pair scoring: run each configured field comparator, combine by weight,
//! classify against the match thresholds.

use serde::{Deserialize, Serialize};

use crate::compare::{self, ComparatorKind};
use crate::error::KindredError;
use crate::model::{FieldScore, MatchOutcome, MatchResult};
use crate::value::{FieldValue, Record};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub fields: Vec<FieldRule>,
    /// Below this total the pair is a no-match.
    #[serde(default = "default_no_match")]
    pub no_match_threshold: f64,
    /// At or above this total the pair is a definite match.
    #[serde(default = "default_definite_match")]
    pub definite_match_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field: String,
    pub comparator: ComparatorKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Raw scores below this contribute zero; the field's weight still
    /// counts toward the normalization denominator.
    #[serde(default)]
    pub threshold: Option<f64>,
}

fn default_no_match() -> f64 {
    0.4
}

fn default_definite_match() -> f64 {
    0.85
}

fn default_weight() -> f64 {
    1.0
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), KindredError> {
        if self.fields.is_empty() {
            return Err(KindredError::Validation(
                "scoring requires at least one field rule".into(),
            ));
        }
        for rule in &self.fields {
            if rule.field.is_empty() {
                return Err(KindredError::Validation("field rule with empty name".into()));
            }
            if rule.weight <= 0.0 || !rule.weight.is_finite() {
                return Err(KindredError::Validation(format!(
                    "field '{}': weight must be positive, got {}",
                    rule.field, rule.weight
                )));
            }
            if let Some(t) = rule.threshold {
                if !(0.0..=1.0).contains(&t) {
                    return Err(KindredError::Validation(format!(
                        "field '{}': threshold must be in [0, 1], got {t}",
                        rule.field
                    )));
                }
            }
        }
        for (name, t) in [
            ("no_match_threshold", self.no_match_threshold),
            ("definite_match_threshold", self.definite_match_threshold),
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(KindredError::Validation(format!(
                    "{name} must be in [0, 1], got {t}"
                )));
            }
        }
        if self.no_match_threshold >= self.definite_match_threshold {
            return Err(KindredError::Validation(format!(
                "no_match_threshold ({}) must be below definite_match_threshold ({})",
                self.no_match_threshold, self.definite_match_threshold
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score one candidate pair. Pure and deterministic: identical inputs always
/// yield an identical result.
pub fn score(a: &Record, b: &Record, config: &ScoringConfig) -> MatchResult {
    let mut field_scores = Vec::with_capacity(config.fields.len());
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for rule in &config.fields {
        let va = a.get(&rule.field).unwrap_or(&FieldValue::Null);
        let vb = b.get(&rule.field).unwrap_or(&FieldValue::Null);
        let (raw, mut detail) = compare::compare_detailed(va, vb, &rule.comparator);

        let contribution = match rule.threshold {
            Some(t) if raw < t => {
                detail = Some(match detail {
                    Some(d) => format!("{d}; below field threshold {t}"),
                    None => format!("below field threshold {t}"),
                });
                0.0
            }
            _ => raw,
        };

        numerator += contribution * rule.weight;
        denominator += rule.weight;

        field_scores.push(FieldScore {
            field: rule.field.clone(),
            score: raw,
            method: rule.comparator.method_name().into(),
            detail,
        });
    }

    let total_score = if denominator > 0.0 {
        (numerator / denominator).clamp(0.0, 1.0)
    } else {
        0.0
    };

    MatchResult {
        total_score,
        field_scores,
        outcome: classify(total_score, config),
    }
}

/// Threshold semantics: strict `<` for no-match, inclusive `>=` for
/// definite-match, potential-match between.
pub fn classify(total_score: f64, config: &ScoringConfig) -> MatchOutcome {
    if total_score < config.no_match_threshold {
        MatchOutcome::NoMatch
    } else if total_score >= config.definite_match_threshold {
        MatchOutcome::DefiniteMatch
    } else {
        MatchOutcome::PotentialMatch
    }
}
