// src/config.rs
//! Pipeline configuration: TOML file, then env overrides, then validation.
//!
//! Resolution:
//! 1) `$TRIAGE_CONFIG_PATH`, else `config/triage.toml` (missing file = defaults)
//! 2) `TRIAGE_WINDOW_DAYS`, `TRIAGE_MIN_CONFIDENCE`, `TRIAGE_FAILURE_THRESHOLD`,
//!    `TRIAGE_RECOVERY_HOURS`, `TRIAGE_MIN_IMPORTANCE` override the file
//! 3) every value is range-checked; nothing is clamped

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::dedup::{validate_similarity_threshold, DEFAULT_SIMILARITY_THRESHOLD};
use crate::error::ConfigError;
use crate::filter::{validate_min_confidence, validate_window_days, DEFAULT_MIN_CONFIDENCE, DEFAULT_WINDOW_DAYS};
use crate::health::{HealthPolicy, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_HOURS};
use crate::orchestrator::RunSettings;
use crate::score::balance::{
    BalancePolicy, DEFAULT_MAX_WEIGHT, DEFAULT_MIN_WEIGHT, DEFAULT_TARGET_PER_SOURCE,
};
use crate::score::{validate_threshold, DEFAULT_IMPORTANCE_THRESHOLD};
use crate::types::SourceType;

pub const DEFAULT_CONFIG_PATH: &str = "config/triage.toml";
pub const ENV_CONFIG_PATH: &str = "TRIAGE_CONFIG_PATH";
pub const ENV_WINDOW_DAYS: &str = "TRIAGE_WINDOW_DAYS";
pub const ENV_MIN_CONFIDENCE: &str = "TRIAGE_MIN_CONFIDENCE";
pub const ENV_FAILURE_THRESHOLD: &str = "TRIAGE_FAILURE_THRESHOLD";
pub const ENV_RECOVERY_HOURS: &str = "TRIAGE_RECOVERY_HOURS";
pub const ENV_MIN_IMPORTANCE: &str = "TRIAGE_MIN_IMPORTANCE";

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// One configured source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: id.into(),
            source_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    pub window_days: i64,
    pub min_confidence: f64,
    /// Only keep items of this type (all types when unset).
    pub source_type: Option<SourceType>,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            window_days: i64::from(DEFAULT_WINDOW_DAYS),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            source_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub failure_threshold: i64,
    pub recovery_hours: i64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            failure_threshold: i64::from(DEFAULT_FAILURE_THRESHOLD),
            recovery_hours: i64::from(DEFAULT_RECOVERY_HOURS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub similarity_threshold: f64,
    /// History and persisted items older than this are purged at the start of a run.
    pub retention_days: Option<u32>,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            retention_days: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub threshold: f64,
    /// JSON rule tables, hot-reloaded; built-in tables when unset.
    pub tables_path: Option<PathBuf>,
}

impl Default for ScoringSection {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_IMPORTANCE_THRESHOLD,
            tables_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceSection {
    pub target_per_source: i64,
    pub min_weight: f64,
    pub max_weight: f64,
    /// Survivors selected per run, spread across sources; all when unset.
    pub max_items: Option<usize>,
}

impl Default for BalanceSection {
    fn default() -> Self {
        Self {
            target_per_source: i64::from(DEFAULT_TARGET_PER_SOURCE),
            min_weight: DEFAULT_MIN_WEIGHT,
            max_weight: DEFAULT_MAX_WEIGHT,
            max_items: None,
        }
    }
}

impl BalanceSection {
    fn policy(&self) -> Result<BalancePolicy, ConfigError> {
        BalancePolicy::new(self.target_per_source, self.min_weight, self.max_weight)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub max_concurrent_fetches: usize,
    pub run_timeout_secs: Option<u64>,
    pub fixtures_dir: PathBuf,
    pub state_path: PathBuf,
    /// Repeat runs on this interval; a single run when unset.
    pub interval_secs: Option<u64>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            run_timeout_secs: None,
            fixtures_dir: PathBuf::from("fixtures"),
            state_path: PathBuf::from("state/triage.json"),
            interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub filter: FilterSection,
    pub health: HealthSection,
    pub dedup: DedupSection,
    pub scoring: ScoringSection,
    pub balance: BalanceSection,
    pub run: RunSection,
    pub sources: Vec<SourceConfig>,
}

impl TriageConfig {
    /// Load using `$TRIAGE_CONFIG_PATH` (or the default path) plus env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut cfg = match fs::read_to_string(path) {
            Ok(s) => toml::from_str::<TriageConfig>(&s)
                .with_context(|| format!("parsing triage config {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                TriageConfig::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading triage config {}", path.display()))
            }
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse + validate, no env involved.
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let cfg: TriageConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_parse::<i64>(ENV_WINDOW_DAYS)? {
            self.filter.window_days = v;
        }
        if let Some(v) = env_parse::<f64>(ENV_MIN_CONFIDENCE)? {
            self.filter.min_confidence = v;
        }
        if let Some(v) = env_parse::<i64>(ENV_FAILURE_THRESHOLD)? {
            self.health.failure_threshold = v;
        }
        if let Some(v) = env_parse::<i64>(ENV_RECOVERY_HOURS)? {
            self.health.recovery_hours = v;
        }
        if let Some(v) = env_parse::<f64>(ENV_MIN_IMPORTANCE)? {
            self.scoring.threshold = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_window_days(self.filter.window_days)?;
        validate_min_confidence(self.filter.min_confidence)?;
        HealthPolicy::new(self.health.failure_threshold, self.health.recovery_hours)?;
        validate_similarity_threshold(self.dedup.similarity_threshold)?;
        validate_threshold(self.scoring.threshold)?;
        self.balance.policy()?;
        if self.balance.max_items == Some(0) {
            return Err(ConfigError::MaxItems);
        }
        if self.run.max_concurrent_fetches == 0 {
            return Err(ConfigError::Concurrency(0));
        }
        let mut seen = HashSet::new();
        for s in &self.sources {
            if !seen.insert(s.id.as_str()) {
                return Err(ConfigError::DuplicateSource(s.id.clone()));
            }
        }
        Ok(())
    }

    /// Tunables for the orchestrator. Call on a validated config; an invalid
    /// balance section falls back to the default policy.
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            window_days: self.filter.window_days,
            min_confidence: self.filter.min_confidence,
            source_type: self.filter.source_type,
            failure_threshold: self.health.failure_threshold,
            recovery_hours: self.health.recovery_hours,
            similarity_threshold: self.dedup.similarity_threshold,
            importance_threshold: self.scoring.threshold,
            max_concurrent_fetches: self.run.max_concurrent_fetches,
            run_timeout: self.run.run_timeout_secs.map(Duration::from_secs),
            retention_days: self.dedup.retention_days,
            balance: self.balance.policy().unwrap_or_default(),
            max_items: self.balance.max_items,
        }
    }
}

/// `Ok(None)` when unset or blank, `Err` when set but unparsable.
fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    let Ok(raw) = env::var(var) else {
        return Ok(None);
    };
    let t = raw.trim();
    if t.is_empty() {
        return Ok(None);
    }
    t.parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::Env { var, value: raw })
}
