use serde::Deserialize;

use kindred_core::blocking::BlockingStrategy;
use kindred_core::compare::ComparatorKind;
use kindred_core::error::KindredError;
use kindred_core::scoring::ScoringConfig;
use kindred_merge::config::MergeConfig;

use crate::resolver::Resolver;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Declarative resolver configuration, parsed from TOML.
///
/// Custom merge strategies cannot be declared here; register them on the
/// [`MergeConfig`] before building a resolver.
#[derive(Debug, Deserialize)]
pub struct ResolverConfig {
    pub name: String,
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub blocking: Option<BlockingStrategy>,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub queue: QueueDefaults,
    #[serde(default = "default_max_fetch")]
    pub max_fetch_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueDefaults {
    pub priority: i64,
    pub tags: Vec<String>,
}

fn default_max_fetch() -> usize {
    1_000
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl ResolverConfig {
    pub fn from_toml(input: &str) -> Result<Self, KindredError> {
        let config: ResolverConfig = toml::from_str(input)
            .map_err(|e| KindredError::Validation(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), KindredError> {
        if self.name.is_empty() {
            return Err(KindredError::Validation("config name must not be empty".into()));
        }
        self.scoring.validate()?;
        for rule in &self.scoring.fields {
            if let ComparatorKind::JaroWinkler(opts) = &rule.comparator {
                if !(0.0..=0.25).contains(&opts.prefix_scale) {
                    return Err(KindredError::Validation(format!(
                        "field '{}': prefix_scale must be in [0, 0.25], got {}",
                        rule.field, opts.prefix_scale
                    )));
                }
            }
        }
        if let Some(blocking) = &self.blocking {
            blocking.validate()?;
        }
        self.merge.validate()?;
        if self.max_fetch_size == 0 {
            return Err(KindredError::Validation("max_fetch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Build a resolver from this config; adapters attach afterwards.
    pub fn into_resolver(self) -> Result<Resolver, KindredError> {
        let mut resolver = Resolver::new(self.scoring)?
            .with_merge_config(self.merge)
            .with_max_fetch_size(self.max_fetch_size);
        if let Some(blocking) = self.blocking {
            resolver = resolver.with_blocking(blocking)?;
        }
        Ok(resolver)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
