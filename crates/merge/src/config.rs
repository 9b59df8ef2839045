use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kindred_core::error::KindredError;
use kindred_core::value::FieldValue;

use crate::provenance::SourceRecord;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Per-field merge strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// First non-null value by source order.
    PreferFirst,
    /// Last non-null value by source order.
    PreferLast,
    /// Value from the newest source; tie falls back to source order.
    PreferNewer,
    /// Value from the oldest source; tie falls back to source order.
    PreferOlder,
    /// First non-null, non-empty value by source order.
    PreferNonNull,
    /// Longest text value; tie falls back to source order.
    PreferLonger,
    /// Shortest text value; tie falls back to source order.
    PreferShorter,
    /// Join non-null values with a separator.
    Concatenate {
        #[serde(default = "default_separator")]
        separator: String,
        #[serde(default)]
        dedup: bool,
    },
    /// Order-stable set union of array values (first occurrence kept).
    Union,
    /// Highest-occurrence value; tie goes to the first occurring.
    MostFrequent,
    Average,
    Sum,
    Min,
    Max,
    /// Caller-registered function, looked up by name in the config registry.
    Custom(String),
}

impl MergeStrategy {
    /// Strategy name as recorded in field provenance.
    pub fn name(&self) -> String {
        match self {
            Self::PreferFirst => "prefer_first".into(),
            Self::PreferLast => "prefer_last".into(),
            Self::PreferNewer => "prefer_newer".into(),
            Self::PreferOlder => "prefer_older".into(),
            Self::PreferNonNull => "prefer_non_null".into(),
            Self::PreferLonger => "prefer_longer".into(),
            Self::PreferShorter => "prefer_shorter".into(),
            Self::Concatenate { .. } => "concatenate".into(),
            Self::Union => "union".into(),
            Self::MostFrequent => "most_frequent".into(),
            Self::Average => "average".into(),
            Self::Sum => "sum".into(),
            Self::Min => "min".into(),
            Self::Max => "max".into(),
            Self::Custom(name) => format!("custom:{name}"),
        }
    }
}

fn default_separator() -> String {
    ", ".into()
}

/// What to do when a strategy cannot resolve a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Abort the whole merge; no partial golden record.
    Error,
    /// Silently resolve via the default strategy.
    UseDefault,
    /// Resolve via the default strategy and record a conflict entry.
    MarkConflict,
}

impl Default for ConflictResolution {
    fn default() -> Self {
        Self::MarkConflict
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::UseDefault => write!(f, "use_default"),
            Self::MarkConflict => write!(f, "mark_conflict"),
        }
    }
}

// ---------------------------------------------------------------------------
// Custom strategy registry
// ---------------------------------------------------------------------------

/// Caller-supplied merge function: non-null field values in source order,
/// plus the full source records for context.
pub type CustomMergeFn =
    dyn Fn(&[FieldValue], &[SourceRecord]) -> Result<FieldValue, String> + Send + Sync;

#[derive(Clone, Default)]
pub struct CustomRegistry {
    fns: BTreeMap<String, Arc<CustomMergeFn>>,
}

impl CustomRegistry {
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[FieldValue], &[SourceRecord]) -> Result<FieldValue, String>
            + Send
            + Sync
            + 'static,
    {
        self.fns.insert(name.to_string(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CustomMergeFn>> {
        self.fns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fns.contains_key(name)
    }
}

impl fmt::Debug for CustomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fns.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// Merge config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Field name → strategy override.
    pub field_strategies: BTreeMap<String, MergeStrategy>,
    /// Strategy for fields without an override, and the fallback when an
    /// override cannot resolve.
    pub default_strategy: MergeStrategy,
    /// Record field carrying the per-source timestamp for the temporal
    /// strategies. Unset ⇒ the source snapshot's `updated_at` is used.
    pub timestamp_field: Option<String>,
    pub track_provenance: bool,
    pub conflict_resolution: ConflictResolution,
    /// Stable-id field, excluded from per-field merging; the golden record
    /// keeps the first source's id.
    pub id_field: String,
    #[serde(skip)]
    pub custom: CustomRegistry,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            field_strategies: BTreeMap::new(),
            default_strategy: MergeStrategy::PreferFirst,
            timestamp_field: None,
            track_provenance: true,
            conflict_resolution: ConflictResolution::default(),
            id_field: "id".into(),
            custom: CustomRegistry::default(),
        }
    }
}

impl MergeConfig {
    pub fn validate(&self) -> Result<(), KindredError> {
        if self.id_field.is_empty() {
            return Err(KindredError::Validation("id_field must not be empty".into()));
        }
        let check = |strategy: &MergeStrategy, context: &str| {
            if let MergeStrategy::Custom(name) = strategy {
                if !self.custom.contains(name) {
                    return Err(KindredError::Validation(format!(
                        "{context}: custom strategy '{name}' is not registered"
                    )));
                }
            }
            Ok(())
        };
        check(&self.default_strategy, "default_strategy")?;
        for (field, strategy) in &self.field_strategies {
            check(strategy, &format!("field '{field}'"))?;
        }
        Ok(())
    }

    /// The strategy configured for `field`.
    pub fn strategy_for(&self, field: &str) -> &MergeStrategy {
        self.field_strategies.get(field).unwrap_or(&self.default_strategy)
    }

    /// Per-source timestamp for the temporal strategies.
    pub fn timestamp_of(&self, source: &SourceRecord) -> Result<chrono::DateTime<chrono::Utc>, String> {
        match &self.timestamp_field {
            None => Ok(source.updated_at),
            Some(field) => match source.record.get(field) {
                Some(FieldValue::Timestamp(t)) => Ok(*t),
                Some(FieldValue::Text(s)) => chrono::DateTime::parse_from_rfc3339(s)
                    .map(|t| t.with_timezone(&chrono::Utc))
                    .map_err(|_| {
                        format!("source '{}': field '{field}' is not a timestamp", source.id)
                    }),
                _ => Err(format!(
                    "source '{}': no resolvable timestamp in field '{field}'",
                    source.id
                )),
            },
        }
    }
}

/// Convenience: true when a value should be skipped by `prefer_non_null`.
pub(crate) fn is_empty_value(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::Text(s) => s.trim().is_empty(),
        FieldValue::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_from_toml_strings_and_tables() {
        #[derive(Deserialize)]
        struct Wrap {
            a: MergeStrategy,
            b: MergeStrategy,
        }
        let wrap: Wrap = toml::from_str(
            r#"
a = "prefer_longer"
[b.concatenate]
separator = " | "
dedup = true
"#,
        )
        .unwrap();
        assert_eq!(wrap.a, MergeStrategy::PreferLonger);
        assert_eq!(
            wrap.b,
            MergeStrategy::Concatenate { separator: " | ".into(), dedup: true }
        );
    }

    #[test]
    fn validate_rejects_unregistered_custom() {
        let mut config = MergeConfig::default();
        config
            .field_strategies
            .insert("score".into(), MergeStrategy::Custom("median".into()));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("median"));
    }

    #[test]
    fn validate_accepts_registered_custom() {
        let mut config = MergeConfig::default();
        config.custom.register("median", |values, _| {
            Ok(values.first().cloned().unwrap_or(FieldValue::Null))
        });
        config
            .field_strategies
            .insert("score".into(), MergeStrategy::Custom("median".into()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn conflict_resolution_defaults_to_mark() {
        assert_eq!(ConflictResolution::default(), ConflictResolution::MarkConflict);
    }
}
