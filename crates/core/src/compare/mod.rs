//! Field-level similarity comparators.
//!
//! Pure functions `(a, b, options) -> score in [0, 1]`. All comparators share
//! one null policy: both null ⇒ 1 (0 when `null_matches_null` is off),
//! exactly one null ⇒ 0. A missing record field is passed in as `Null`.

mod edit;
mod jaro;
mod phonetic;

pub use edit::{edit_distance, levenshtein};
pub use jaro::{jaro, jaro_winkler};
pub use phonetic::{metaphone_encode, soundex_encode};

use serde::{Deserialize, Serialize};

use crate::value::FieldValue;

// ---------------------------------------------------------------------------
// Comparator selection
// ---------------------------------------------------------------------------

/// Structured comparator descriptor: kind plus typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparatorKind {
    Exact(ExactOptions),
    Levenshtein(LevenshteinOptions),
    JaroWinkler(JaroWinklerOptions),
    Soundex(SoundexOptions),
    Metaphone(MetaphoneOptions),
}

impl ComparatorKind {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::Levenshtein(_) => "levenshtein",
            Self::JaroWinkler(_) => "jaro_winkler",
            Self::Soundex(_) => "soundex",
            Self::Metaphone(_) => "metaphone",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExactOptions {
    pub case_insensitive: bool,
    pub null_matches_null: bool,
}

impl Default for ExactOptions {
    fn default() -> Self {
        Self { case_insensitive: false, null_matches_null: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevenshteinOptions {
    pub case_insensitive: bool,
    pub collapse_whitespace: bool,
    pub null_matches_null: bool,
}

impl Default for LevenshteinOptions {
    fn default() -> Self {
        Self { case_insensitive: true, collapse_whitespace: true, null_matches_null: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JaroWinklerOptions {
    /// Prefix bonus scale, valid range 0–0.25.
    pub prefix_scale: f64,
    /// Common-prefix length cap for the bonus.
    pub max_prefix_length: usize,
    pub case_insensitive: bool,
    pub null_matches_null: bool,
}

impl Default for JaroWinklerOptions {
    fn default() -> Self {
        Self {
            prefix_scale: 0.1,
            max_prefix_length: 4,
            case_insensitive: true,
            null_matches_null: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundexOptions {
    pub null_matches_null: bool,
}

impl Default for SoundexOptions {
    fn default() -> Self {
        Self { null_matches_null: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaphoneOptions {
    /// Encoding length cap.
    pub max_length: usize,
    pub null_matches_null: bool,
}

impl Default for MetaphoneOptions {
    fn default() -> Self {
        Self { max_length: 4, null_matches_null: true }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Compare two field values with the given comparator.
pub fn compare(a: &FieldValue, b: &FieldValue, kind: &ComparatorKind) -> f64 {
    compare_detailed(a, b, kind).0
}

/// Compare and also return a short human-readable detail (edit distance,
/// phonetic encodings) for score explanations.
pub fn compare_detailed(a: &FieldValue, b: &FieldValue, kind: &ComparatorKind) -> (f64, Option<String>) {
    match kind {
        ComparatorKind::Exact(opts) => (exact_match(a, b, opts), None),
        ComparatorKind::Levenshtein(opts) => {
            if let Some(score) = null_score(a, b, opts.null_matches_null) {
                return (score, None);
            }
            match (a.coerce_text(), b.coerce_text()) {
                (Some(sa), Some(sb)) => {
                    let score = levenshtein(&sa, &sb, opts);
                    let detail = format!(
                        "distance {}",
                        edit_distance(&normalize_for(opts, &sa), &normalize_for(opts, &sb))
                    );
                    (score, Some(detail))
                }
                _ => (0.0, None),
            }
        }
        ComparatorKind::JaroWinkler(opts) => {
            if let Some(score) = null_score(a, b, opts.null_matches_null) {
                return (score, None);
            }
            match (a.coerce_text(), b.coerce_text()) {
                (Some(sa), Some(sb)) => (jaro_winkler(&sa, &sb, opts), None),
                _ => (0.0, None),
            }
        }
        ComparatorKind::Soundex(opts) => {
            if let Some(score) = null_score(a, b, opts.null_matches_null) {
                return (score, None);
            }
            match (a.coerce_text(), b.coerce_text()) {
                (Some(sa), Some(sb)) => {
                    let ea = soundex_encode(&sa);
                    let eb = soundex_encode(&sb);
                    let score = if ea == eb { 1.0 } else { 0.0 };
                    (score, Some(format!("{ea} vs {eb}")))
                }
                _ => (0.0, None),
            }
        }
        ComparatorKind::Metaphone(opts) => {
            if let Some(score) = null_score(a, b, opts.null_matches_null) {
                return (score, None);
            }
            match (a.coerce_text(), b.coerce_text()) {
                (Some(sa), Some(sb)) => {
                    let ea = metaphone_encode(&sa, opts.max_length);
                    let eb = metaphone_encode(&sb, opts.max_length);
                    let score = if ea == eb { 1.0 } else { 0.0 };
                    (score, Some(format!("{ea} vs {eb}")))
                }
                _ => (0.0, None),
            }
        }
    }
}

fn normalize_for(opts: &LevenshteinOptions, s: &str) -> String {
    edit::normalize(s, opts.case_insensitive, opts.collapse_whitespace)
}

/// Shared null policy. `None` means both sides are present.
pub(crate) fn null_score(a: &FieldValue, b: &FieldValue, null_matches_null: bool) -> Option<f64> {
    match (a.is_null(), b.is_null()) {
        (true, true) => Some(if null_matches_null { 1.0 } else { 0.0 }),
        (true, false) | (false, true) => Some(0.0),
        (false, false) => None,
    }
}

// ---------------------------------------------------------------------------
// Exact match
// ---------------------------------------------------------------------------

/// 1 iff equal after optional case-folding. Type mismatch scores 0, except
/// timestamps which compare by millisecond equality. No cross-type coercion.
pub fn exact_match(a: &FieldValue, b: &FieldValue, opts: &ExactOptions) -> f64 {
    if let Some(score) = null_score(a, b, opts.null_matches_null) {
        return score;
    }

    let equal = match (a, b) {
        (FieldValue::Text(sa), FieldValue::Text(sb)) => {
            if opts.case_insensitive {
                sa.to_lowercase() == sb.to_lowercase()
            } else {
                sa == sb
            }
        }
        (FieldValue::Number(na), FieldValue::Number(nb)) => na == nb,
        (FieldValue::Bool(ba), FieldValue::Bool(bb)) => ba == bb,
        (FieldValue::Timestamp(ta), FieldValue::Timestamp(tb)) => {
            ta.timestamp_millis() == tb.timestamp_millis()
        }
        (FieldValue::Array(aa), FieldValue::Array(ab)) => aa == ab,
        _ => false,
    };

    if equal {
        1.0
    } else {
        0.0
    }
}
