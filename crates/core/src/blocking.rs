//! Blocking strategies: derive candidate-grouping keys so pairwise scoring
//! stays tractable.
//!
//! A record missing a blocking field is excluded from that block, never
//! dropped from the overall universe and never an error.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::compare::{metaphone_encode, soundex_encode};
use crate::model::BlockingKey;
use crate::value::{field_value, Record};

// ---------------------------------------------------------------------------
// Strategy descriptors
// ---------------------------------------------------------------------------

/// Structured blocking descriptor: kind plus typed parameters. The display
/// name from [`BlockingStrategy::describe`] is cosmetic only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockingStrategy {
    /// One or more fields form an exact/normalized composite key.
    Standard {
        fields: Vec<String>,
        #[serde(default = "default_true")]
        case_insensitive: bool,
    },
    /// Records sorted by derived keys; pairs within a sliding window of
    /// size `window` in sort order are candidates.
    SortedNeighbourhood { keys: Vec<SortKeySpec>, window: usize },
    /// Combine sub-strategies: `Union` = candidate if any part matches,
    /// `Intersection` = candidate only if all parts match.
    Composite {
        mode: CompositeMode,
        parts: Vec<BlockingStrategy>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKeySpec {
    pub field: String,
    #[serde(default)]
    pub transform: KeyTransform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyTransform {
    None,
    Soundex,
    Metaphone,
    /// First `n` characters of the normalized value.
    Prefix(usize),
}

impl Default for KeyTransform {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    Union,
    Intersection,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Key generation
// ---------------------------------------------------------------------------

impl BlockingStrategy {
    /// Derive the blocking key for one record.
    ///
    /// `None` means the record lacks a required field and does not take part
    /// in this block.
    pub fn generate(&self, record: &Record) -> Option<BlockingKey> {
        match self {
            Self::Standard { fields, case_insensitive } => {
                let mut key = BTreeMap::new();
                for field in fields {
                    let value = field_value(record, field)?.coerce_text()?;
                    key.insert(field.clone(), normalize(&value, *case_insensitive));
                }
                Some(key)
            }
            Self::SortedNeighbourhood { keys, .. } => {
                let mut key = BTreeMap::new();
                for spec in keys {
                    let value = field_value(record, &spec.field)?.coerce_text()?;
                    key.insert(spec.field.clone(), apply_transform(&value, &spec.transform));
                }
                Some(key)
            }
            Self::Composite { mode, parts } => {
                let mut merged = BTreeMap::new();
                let mut any = false;
                for part in parts {
                    match part.generate(record) {
                        Some(part_key) => {
                            merged.extend(part_key);
                            any = true;
                        }
                        None => {
                            if *mode == CompositeMode::Intersection {
                                return None;
                            }
                        }
                    }
                }
                if any {
                    Some(merged)
                } else {
                    None
                }
            }
        }
    }

    /// Candidate indexes in `existing` for one probe record.
    pub fn candidates_for(&self, probe: &Record, existing: &[Record]) -> Vec<usize> {
        match self {
            Self::Standard { .. } => {
                let Some(probe_key) = self.generate(probe) else {
                    return Vec::new();
                };
                existing
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| self.generate(r).as_ref() == Some(&probe_key))
                    .map(|(i, _)| i)
                    .collect()
            }
            Self::SortedNeighbourhood { window, .. } => {
                let Some(probe_key) = self.generate(probe).map(|k| flatten(&k)) else {
                    return Vec::new();
                };
                let mut keyed: Vec<(String, usize)> = existing
                    .iter()
                    .enumerate()
                    .filter_map(|(i, r)| self.generate(r).map(|k| (flatten(&k), i)))
                    .collect();
                keyed.sort();
                // The probe would land at `pos`; everything within
                // `window - 1` sort positions of it is a candidate.
                let reach = window.saturating_sub(1);
                let pos = keyed.partition_point(|(k, _)| *k < probe_key);
                let lo = pos.saturating_sub(reach);
                let hi = (pos + reach).min(keyed.len());
                let mut out: Vec<usize> = keyed[lo..hi].iter().map(|(_, i)| *i).collect();
                out.sort_unstable();
                out
            }
            Self::Composite { mode, parts } => {
                let sets: Vec<BTreeSet<usize>> = parts
                    .iter()
                    .map(|p| p.candidates_for(probe, existing).into_iter().collect())
                    .collect();
                combine(sets, *mode)
            }
        }
    }

    /// All candidate pairs `(i, j)` with `i < j` within a record slice.
    pub fn candidate_pairs(&self, records: &[Record]) -> Vec<(usize, usize)> {
        match self {
            Self::Standard { .. } => {
                let mut blocks: BTreeMap<String, Vec<usize>> = BTreeMap::new();
                for (i, record) in records.iter().enumerate() {
                    if let Some(key) = self.generate(record) {
                        blocks.entry(flatten(&key)).or_default().push(i);
                    }
                }
                let mut pairs = Vec::new();
                for members in blocks.values() {
                    for (a, &i) in members.iter().enumerate() {
                        for &j in &members[a + 1..] {
                            pairs.push((i, j));
                        }
                    }
                }
                pairs.sort_unstable();
                pairs
            }
            Self::SortedNeighbourhood { window, .. } => {
                let mut keyed: Vec<(String, usize)> = records
                    .iter()
                    .enumerate()
                    .filter_map(|(i, r)| self.generate(r).map(|k| (flatten(&k), i)))
                    .collect();
                keyed.sort();
                let mut pairs = BTreeSet::new();
                for (a, (_, i)) in keyed.iter().enumerate() {
                    for (_, j) in keyed.iter().skip(a + 1).take(window.saturating_sub(1)) {
                        pairs.insert((*i.min(j), *i.max(j)));
                    }
                }
                pairs.into_iter().collect()
            }
            Self::Composite { mode, parts } => {
                let sets: Vec<BTreeSet<(usize, usize)>> = parts
                    .iter()
                    .map(|p| p.candidate_pairs(records).into_iter().collect())
                    .collect();
                match mode {
                    CompositeMode::Union => {
                        let mut union = BTreeSet::new();
                        for s in sets {
                            union.extend(s);
                        }
                        union.into_iter().collect()
                    }
                    CompositeMode::Intersection => {
                        let mut iter = sets.into_iter();
                        let Some(mut acc) = iter.next() else {
                            return Vec::new();
                        };
                        for s in iter {
                            acc = acc.intersection(&s).copied().collect();
                        }
                        acc.into_iter().collect()
                    }
                }
            }
        }
    }

    /// Reject structurally unusable descriptors (empty field lists, zero
    /// windows, empty composites).
    pub fn validate(&self) -> Result<(), crate::error::KindredError> {
        use crate::error::KindredError;
        match self {
            Self::Standard { fields, .. } => {
                if fields.is_empty() || fields.iter().any(String::is_empty) {
                    return Err(KindredError::Validation(
                        "standard blocking requires non-empty field names".into(),
                    ));
                }
            }
            Self::SortedNeighbourhood { keys, window } => {
                if keys.is_empty() || keys.iter().any(|k| k.field.is_empty()) {
                    return Err(KindredError::Validation(
                        "sorted neighbourhood blocking requires non-empty key fields".into(),
                    ));
                }
                if *window < 2 {
                    return Err(KindredError::Validation(format!(
                        "sorted neighbourhood window must be at least 2, got {window}"
                    )));
                }
                if keys.iter().any(|k| matches!(k.transform, KeyTransform::Prefix(0))) {
                    return Err(KindredError::Validation(
                        "prefix transform length must be at least 1".into(),
                    ));
                }
            }
            Self::Composite { parts, .. } => {
                if parts.is_empty() {
                    return Err(KindredError::Validation(
                        "composite blocking requires at least one part".into(),
                    ));
                }
                for part in parts {
                    part.validate()?;
                }
            }
        }
        Ok(())
    }

    /// Cosmetic display name.
    pub fn describe(&self) -> String {
        match self {
            Self::Standard { fields, .. } => format!("standard({})", fields.join(",")),
            Self::SortedNeighbourhood { keys, window } => {
                let names: Vec<&str> = keys.iter().map(|k| k.field.as_str()).collect();
                format!("sorted_neighbourhood({}; window={window})", names.join(","))
            }
            Self::Composite { mode, parts } => {
                let names: Vec<String> = parts.iter().map(|p| p.describe()).collect();
                let tag = match mode {
                    CompositeMode::Union => "union",
                    CompositeMode::Intersection => "intersection",
                };
                format!("composite[{tag}]({})", names.join(" + "))
            }
        }
    }
}

fn combine(sets: Vec<BTreeSet<usize>>, mode: CompositeMode) -> Vec<usize> {
    match mode {
        CompositeMode::Union => {
            let mut union = BTreeSet::new();
            for s in sets {
                union.extend(s);
            }
            union.into_iter().collect()
        }
        CompositeMode::Intersection => {
            let mut iter = sets.into_iter();
            let Some(mut acc) = iter.next() else {
                return Vec::new();
            };
            for s in iter {
                acc = acc.intersection(&s).copied().collect();
            }
            acc.into_iter().collect()
        }
    }
}

fn normalize(value: &str, case_insensitive: bool) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if case_insensitive {
        collapsed.to_lowercase()
    } else {
        collapsed
    }
}

fn apply_transform(value: &str, transform: &KeyTransform) -> String {
    let base = normalize(value, true);
    match transform {
        KeyTransform::None => base,
        KeyTransform::Soundex => soundex_encode(&base),
        KeyTransform::Metaphone => metaphone_encode(&base, 4),
        KeyTransform::Prefix(n) => base.chars().take(*n).collect(),
    }
}

/// Stable single-string form of a blocking key, for grouping and sorting.
fn flatten(key: &BlockingKey) -> String {
    let parts: Vec<String> = key.iter().map(|(f, v)| format!("{f}={v}")).collect();
    parts.join("\u{1f}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    fn person(id: &str, last: &str, zip: &str) -> Record {
        let mut r = Record::new();
        r.insert("id".into(), FieldValue::Text(id.into()));
        r.insert("last_name".into(), FieldValue::Text(last.into()));
        r.insert("zip".into(), FieldValue::Text(zip.into()));
        r
    }

    fn standard(fields: &[&str]) -> BlockingStrategy {
        BlockingStrategy::Standard {
            fields: fields.iter().map(|s| s.to_string()).collect(),
            case_insensitive: true,
        }
    }

    #[test]
    fn standard_key_is_normalized() {
        let strategy = standard(&["last_name"]);
        let key = strategy.generate(&person("1", "  SMITH  ", "02139")).unwrap();
        assert_eq!(key["last_name"], "smith");
    }

    #[test]
    fn missing_field_excludes_record_without_error() {
        let strategy = standard(&["email"]);
        assert!(strategy.generate(&person("1", "Smith", "02139")).is_none());

        let pairs = strategy.candidate_pairs(&[person("1", "a", "b"), person("2", "a", "b")]);
        assert!(pairs.is_empty());
    }

    #[test]
    fn null_field_excludes_record() {
        let strategy = standard(&["last_name"]);
        let mut r = person("1", "Smith", "02139");
        r.insert("last_name".into(), FieldValue::Null);
        assert!(strategy.generate(&r).is_none());
    }

    #[test]
    fn standard_pairs_within_blocks_only() {
        let records = vec![
            person("1", "Smith", "02139"),
            person("2", "smith", "02139"),
            person("3", "Jones", "02139"),
            person("4", "SMITH", "02139"),
        ];
        let pairs = standard(&["last_name"]).candidate_pairs(&records);
        assert_eq!(pairs, vec![(0, 1), (0, 3), (1, 3)]);
    }

    #[test]
    fn composite_key_uses_all_fields() {
        let records = vec![
            person("1", "Smith", "02139"),
            person("2", "Smith", "90210"),
        ];
        let pairs = standard(&["last_name", "zip"]).candidate_pairs(&records);
        assert!(pairs.is_empty());
    }

    #[test]
    fn sorted_neighbourhood_window_pairs() {
        let strategy = BlockingStrategy::SortedNeighbourhood {
            keys: vec![SortKeySpec { field: "last_name".into(), transform: KeyTransform::None }],
            window: 2,
        };
        let records = vec![
            person("1", "adams", "x"),
            person("2", "baker", "x"),
            person("3", "clark", "x"),
            person("4", "davis", "x"),
        ];
        // Window 2: only neighbours in sort order pair up.
        let pairs = strategy.candidate_pairs(&records);
        assert_eq!(pairs, vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn sorted_neighbourhood_phonetic_transform_groups_variants() {
        let strategy = BlockingStrategy::SortedNeighbourhood {
            keys: vec![SortKeySpec { field: "last_name".into(), transform: KeyTransform::Soundex }],
            window: 3,
        };
        let records = vec![
            person("1", "Robert", "x"),
            person("2", "Zzz", "x"),
            person("3", "Rupert", "x"),
        ];
        let pairs = strategy.candidate_pairs(&records);
        assert!(pairs.contains(&(0, 2)));
    }

    #[test]
    fn composite_union_and_intersection() {
        let by_last = standard(&["last_name"]);
        let by_zip = standard(&["zip"]);
        let records = vec![
            person("1", "Smith", "02139"),
            person("2", "Smith", "90210"),
            person("3", "Jones", "02139"),
        ];

        let union = BlockingStrategy::Composite {
            mode: CompositeMode::Union,
            parts: vec![by_last.clone(), by_zip.clone()],
        };
        assert_eq!(union.candidate_pairs(&records), vec![(0, 1), (0, 2)]);

        let intersection = BlockingStrategy::Composite {
            mode: CompositeMode::Intersection,
            parts: vec![by_last, by_zip],
        };
        assert!(intersection.candidate_pairs(&records).is_empty());
    }

    #[test]
    fn candidates_for_standard_probe() {
        let strategy = standard(&["last_name"]);
        let existing = vec![
            person("1", "Smith", "02139"),
            person("2", "Jones", "02139"),
            person("3", "smith", "90210"),
        ];
        let probe = person("9", "SMITH", "11111");
        assert_eq!(strategy.candidates_for(&probe, &existing), vec![0, 2]);
    }

    #[test]
    fn candidates_for_sorted_neighbourhood_probe() {
        let strategy = BlockingStrategy::SortedNeighbourhood {
            keys: vec![SortKeySpec { field: "last_name".into(), transform: KeyTransform::None }],
            window: 2,
        };
        let existing = vec![
            person("1", "adams", "x"),
            person("2", "clark", "x"),
            person("3", "evans", "x"),
        ];
        let probe = person("9", "baker", "x");
        // Probe lands between adams and clark; window 2 reaches one each way.
        assert_eq!(strategy.candidates_for(&probe, &existing), vec![0, 1]);
    }

    #[test]
    fn describe_is_cosmetic() {
        let s = standard(&["last_name", "zip"]);
        assert_eq!(s.describe(), "standard(last_name,zip)");
    }
}
