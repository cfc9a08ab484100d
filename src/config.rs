//! Run configuration.
//!
//! Layered as: optional JSON file, then `RAGSORT_TIMEOUT_SECONDS` from the
//! environment, then CLI flags, then [`RunConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::prompts::PromptLanguage;
use crate::rerank::AmbiguityPolicy;
use crate::scoring::{BudgetUnit, ContextBudget};

pub const DEFAULT_SORT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_GROUND_TRUTH_MODEL: &str = "gpt-4-turbo";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundTruthModeKind {
    #[default]
    Fast,
    Exhaustive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundTruthSettings {
    pub mode: GroundTruthModeKind,
    pub group_size: usize,
    pub seed: Option<u64>,
}

impl Default for GroundTruthSettings {
    fn default() -> Self {
        Self {
            mode: GroundTruthModeKind::Fast,
            group_size: 20,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub budget_unit: BudgetUnit,
    pub budget_limit: usize,
    /// Scoring service endpoint; falls back to `RAGSORT_SCORER_URL`.
    pub scorer_url: Option<String>,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            budget_unit: BudgetUnit::Chars,
            budget_limit: 13_000,
            scorer_url: None,
        }
    }
}

impl ScoringSettings {
    pub fn budget(&self) -> ContextBudget {
        ContextBudget {
            unit: self.budget_unit,
            limit: self.budget_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run the answerability pre-filter before sorting.
    pub prefilter: bool,
    /// Overlap window size, also the scoring context count.
    pub k: usize,
    /// Overlap window from the top (true) or the bottom of the ranking.
    pub from_top: bool,
    /// Oracle model used for sorting.
    pub model: String,
    pub ground_truth_model: String,
    /// Questions processed concurrently.
    pub parallel: usize,
    pub oracle_timeout_secs: u64,
    pub ambiguity: AmbiguityPolicy,
    pub language: PromptLanguage,
    pub cache_path: Option<PathBuf>,
    pub ground_truth: GroundTruthSettings,
    pub scoring: ScoringSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            prefilter: true,
            k: 10,
            from_top: true,
            model: DEFAULT_SORT_MODEL.to_string(),
            ground_truth_model: DEFAULT_GROUND_TRUTH_MODEL.to_string(),
            parallel: 1,
            oracle_timeout_secs: 60,
            ambiguity: AmbiguityPolicy::default(),
            language: PromptLanguage::default(),
            cache_path: None,
            ground_truth: GroundTruthSettings::default(),
            scoring: ScoringSettings::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply `RAGSORT_TIMEOUT_SECONDS` when set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("RAGSORT_TIMEOUT_SECONDS") {
            self.oracle_timeout_secs = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("RAGSORT_TIMEOUT_SECONDS is not an integer: {raw}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::Invalid("k must be >= 1".into()));
        }
        if self.parallel == 0 {
            return Err(ConfigError::Invalid("parallel must be >= 1".into()));
        }
        if self.oracle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("oracle_timeout_secs must be >= 1".into()));
        }
        if self.ground_truth.group_size == 0 {
            return Err(ConfigError::Invalid("ground_truth.group_size must be >= 1".into()));
        }
        if self.scoring.budget_limit == 0 {
            return Err(ConfigError::Invalid("scoring.budget_limit must be >= 1".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }
}
