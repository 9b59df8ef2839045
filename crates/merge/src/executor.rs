//! The merge executor: applies per-field strategies to N source records,
//! producing a golden record plus field-level provenance.
//!
//! Deterministic given stable source ordering: fields are processed in
//! sorted name order and every tie-break falls back to source order.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use ordered_float::OrderedFloat;

use kindred_core::error::KindredError;
use kindred_core::value::{FieldValue, Record};

use crate::config::{is_empty_value, ConflictResolution, MergeConfig, MergeStrategy};
use crate::provenance::{
    Conflict, FieldContribution, FieldProvenance, MergeResult, MergeStats, Provenance,
    SourceRecord,
};

/// Merge source records into a golden record.
///
/// The golden record keeps the first source's id; the id field itself is not
/// strategy-merged. Under `ConflictResolution::Error` the first unresolvable
/// field aborts the whole merge and no partial golden record is produced.
pub fn merge(sources: &[SourceRecord], config: &MergeConfig) -> Result<MergeResult, KindredError> {
    config.validate()?;
    if sources.is_empty() {
        return Err(KindredError::Validation("merge requires at least one source record".into()));
    }
    let mut seen = BTreeSet::new();
    for source in sources {
        if source.id.is_empty() {
            return Err(KindredError::Validation("source record with empty id".into()));
        }
        if !seen.insert(&source.id) {
            return Err(KindredError::Validation(format!(
                "duplicate source record id '{}'",
                source.id
            )));
        }
    }

    // Union of field names across all sources, sorted for determinism.
    let mut fields: BTreeSet<&str> = BTreeSet::new();
    for source in sources {
        fields.extend(source.record.keys().map(String::as_str));
    }
    fields.remove(config.id_field.as_str());

    let mut golden = Record::new();
    let mut field_sources: BTreeMap<String, FieldProvenance> = BTreeMap::new();
    let mut conflicts: Vec<Conflict> = Vec::new();
    let mut conflicts_detected = 0usize;

    for field in fields {
        let contributions: Vec<FieldContribution> = sources
            .iter()
            .filter_map(|s| {
                s.record.get(field).map(|v| FieldContribution {
                    source_record_id: s.id.clone(),
                    value: v.clone(),
                })
            })
            .collect();

        let non_null: Vec<(usize, &FieldValue)> = sources
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.record.get(field).filter(|v| !v.is_null()).map(|v| (i, v)))
            .collect();

        let had_conflict = distinct_non_null(&non_null) >= 2;
        if had_conflict {
            conflicts_detected += 1;
        }

        let strategy = config.strategy_for(field);
        let mut applied = strategy.name();
        let mut conflict_resolution = None;

        let (value, winner) = match apply(strategy, &non_null, sources, config) {
            Ok(resolved) => resolved,
            Err(message) => {
                conflict_resolution = Some(config.conflict_resolution);
                match config.conflict_resolution {
                    ConflictResolution::Error => {
                        return Err(KindredError::Conflict { field: field.into(), message });
                    }
                    ConflictResolution::UseDefault | ConflictResolution::MarkConflict => {
                        let fallback = &config.default_strategy;
                        let (resolved, note) = if fallback == strategy {
                            ((FieldValue::Null, None), None)
                        } else {
                            match apply(fallback, &non_null, sources, config) {
                                Ok(resolved) => {
                                    applied = fallback.name();
                                    (resolved, Some(fallback.name()))
                                }
                                Err(_) => ((FieldValue::Null, None), None),
                            }
                        };
                        if config.conflict_resolution == ConflictResolution::MarkConflict {
                            conflicts.push(Conflict {
                                field: field.into(),
                                strategy: strategy.name(),
                                message,
                                resolved_with: note,
                            });
                        }
                        resolved
                    }
                }
            }
        };

        if !value.is_null() {
            golden.insert(field.to_string(), value);
        }

        if config.track_provenance {
            field_sources.insert(
                field.to_string(),
                FieldProvenance {
                    source_record_id: winner.map(|i| sources[i].id.clone()),
                    strategy_applied: applied,
                    all_values: contributions,
                    had_conflict,
                    conflict_resolution,
                },
            );
        }
    }

    let golden_record_id = sources[0].id.clone();
    let provenance = Provenance {
        golden_record_id: golden_record_id.clone(),
        source_record_ids: sources.iter().map(|s| s.id.clone()).collect(),
        merged_at: Utc::now(),
        merged_by: None,
        queue_item_id: None,
        field_sources,
        strategy_used: config.default_strategy.name(),
        unmerged: false,
        unmerged_at: None,
        unmerged_by: None,
        unmerge_reason: None,
    };

    let stats = MergeStats {
        fields_merged: golden.len(),
        conflicts_detected,
        sources_merged: sources.len(),
    };

    Ok(MergeResult {
        golden_record: golden,
        golden_record_id,
        provenance,
        source_records: sources.to_vec(),
        conflicts,
        stats,
    })
}

fn distinct_non_null(non_null: &[(usize, &FieldValue)]) -> usize {
    let mut distinct: Vec<&FieldValue> = Vec::new();
    for (_, v) in non_null {
        if !distinct.contains(v) {
            distinct.push(v);
        }
    }
    distinct.len()
}

/// Apply one strategy to a field's non-null values. `Err` means the strategy
/// is inapplicable here (type violation, missing timestamp, no numeric
/// input) and the conflict-resolution policy decides what happens next.
fn apply(
    strategy: &MergeStrategy,
    non_null: &[(usize, &FieldValue)],
    sources: &[SourceRecord],
    config: &MergeConfig,
) -> Result<(FieldValue, Option<usize>), String> {
    if non_null.is_empty() {
        return Ok((FieldValue::Null, None));
    }

    match strategy {
        MergeStrategy::PreferFirst => {
            let (i, v) = non_null[0];
            Ok(((*v).clone(), Some(i)))
        }
        MergeStrategy::PreferLast => {
            let (i, v) = non_null[non_null.len() - 1];
            Ok(((*v).clone(), Some(i)))
        }
        MergeStrategy::PreferNonNull => {
            let (i, v) = non_null
                .iter()
                .find(|(_, v)| !is_empty_value(v))
                .copied()
                .unwrap_or(non_null[0]);
            Ok((v.clone(), Some(i)))
        }
        MergeStrategy::PreferNewer | MergeStrategy::PreferOlder => {
            let newer = matches!(strategy, MergeStrategy::PreferNewer);
            let mut best: Option<(chrono::DateTime<Utc>, usize, &FieldValue)> = None;
            for &(i, v) in non_null {
                let ts = config.timestamp_of(&sources[i])?;
                let replace = match &best {
                    None => true,
                    // Strictly better only: ties keep the earliest source.
                    Some((best_ts, _, _)) => {
                        if newer {
                            ts > *best_ts
                        } else {
                            ts < *best_ts
                        }
                    }
                };
                if replace {
                    best = Some((ts, i, v));
                }
            }
            let (_, i, v) = best.expect("non-empty input");
            Ok((v.clone(), Some(i)))
        }
        MergeStrategy::PreferLonger | MergeStrategy::PreferShorter => {
            let longer = matches!(strategy, MergeStrategy::PreferLonger);
            let mut best: Option<(usize, usize, &FieldValue)> = None;
            for &(i, v) in non_null {
                let text = v
                    .coerce_text()
                    .ok_or_else(|| format!("{} value is not text-comparable", v.type_name()))?;
                let len = text.chars().count();
                let replace = match &best {
                    None => true,
                    Some((best_len, _, _)) => {
                        if longer {
                            len > *best_len
                        } else {
                            len < *best_len
                        }
                    }
                };
                if replace {
                    best = Some((len, i, v));
                }
            }
            let (_, i, v) = best.expect("non-empty input");
            Ok((v.clone(), Some(i)))
        }
        MergeStrategy::Concatenate { separator, dedup } => {
            let mut parts: Vec<String> = Vec::new();
            for &(_, v) in non_null {
                let text = v
                    .coerce_text()
                    .ok_or_else(|| format!("cannot concatenate {} value", v.type_name()))?;
                if *dedup && parts.contains(&text) {
                    continue;
                }
                parts.push(text);
            }
            Ok((FieldValue::Text(parts.join(separator)), None))
        }
        MergeStrategy::Union => {
            let mut seen: BTreeSet<String> = BTreeSet::new();
            let mut items: Vec<FieldValue> = Vec::new();
            for &(_, v) in non_null {
                let array = v
                    .as_array()
                    .ok_or_else(|| format!("union requires arrays, got {}", v.type_name()))?;
                for item in array {
                    if seen.insert(item.canonical()) {
                        items.push(item.clone());
                    }
                }
            }
            Ok((FieldValue::Array(items), None))
        }
        MergeStrategy::MostFrequent => {
            let mut counts: Vec<(String, usize, usize, &FieldValue)> = Vec::new();
            for &(i, v) in non_null {
                let key = v.canonical();
                match counts.iter_mut().find(|(k, _, _, _)| *k == key) {
                    Some(entry) => entry.1 += 1,
                    None => counts.push((key, 1, i, v)),
                }
            }
            // Highest count wins; ties keep the first-occurring value.
            let (_, _, i, v) = counts
                .iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
                .expect("non-empty input");
            Ok(((*v).clone(), Some(*i)))
        }
        MergeStrategy::Average | MergeStrategy::Sum | MergeStrategy::Min | MergeStrategy::Max => {
            let mut numbers: Vec<f64> = Vec::with_capacity(non_null.len());
            for &(_, v) in non_null {
                numbers.push(
                    v.as_number()
                        .ok_or_else(|| format!("numeric strategy on {} value", v.type_name()))?,
                );
            }
            if numbers.is_empty() {
                return Err("no numeric value to aggregate".into());
            }
            let value = match strategy {
                MergeStrategy::Average => numbers.iter().sum::<f64>() / numbers.len() as f64,
                MergeStrategy::Sum => numbers.iter().sum(),
                MergeStrategy::Min => {
                    numbers.iter().copied().map(OrderedFloat).min().map(|n| n.0).unwrap()
                }
                _ => numbers.iter().copied().map(OrderedFloat).max().map(|n| n.0).unwrap(),
            };
            Ok((FieldValue::Number(value), None))
        }
        MergeStrategy::Custom(name) => {
            let f = config
                .custom
                .get(name)
                .ok_or_else(|| format!("custom strategy '{name}' is not registered"))?;
            let values: Vec<FieldValue> = non_null.iter().map(|(_, v)| (*v).clone()).collect();
            f(&values, sources).map(|v| (v, None))
        }
    }
}
