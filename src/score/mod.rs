// src/score/mod.rs
//! Rule-based importance scoring.
//!
//! Evaluation over lowercased `"title body"`, in this order:
//! 1) base 0.5
//! 2) body length: < 50 words -0.2, > 5000 words +0.1
//! 3) positive keywords: +min(count * 0.1 * w, 0.3) each
//! 4) negative keywords: -count * 0.05 * w each
//! 5) entity patterns: +min(matches * 0.05 * w, 0.2) each
//! 6) freshness: age < 24h +0.1, < 72h +0.05
//! 7) clamp to [0, 1]
//!
//! Keyword counts are non-overlapping substring occurrences. Every
//! contributing factor appends one reason.

pub mod balance;
pub mod entities;
pub mod tables;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::text;
use crate::types::{ContentItem, ScoreResult};

use self::tables::{CompiledTables, HotReloadTables, ScoringTables};

pub const DEFAULT_IMPORTANCE_THRESHOLD: f64 = 0.5;

const BASE_SCORE: f64 = 0.5;
const SHORT_WORDS: usize = 50;
const LONG_WORDS: usize = 5000;
const SHORT_PENALTY: f64 = 0.2;
const LONG_BONUS: f64 = 0.1;
const KEYWORD_STEP: f64 = 0.1;
const KEYWORD_CAP: f64 = 0.3;
const NOISE_STEP: f64 = 0.05;
const ENTITY_STEP: f64 = 0.05;
const ENTITY_CAP: f64 = 0.2;
const FRESH_BONUS: f64 = 0.1;
const RECENT_BONUS: f64 = 0.05;

/// Pure evaluation of one item against compiled tables.
pub fn evaluate(item: &ContentItem, tables: &CompiledTables, now: DateTime<Utc>) -> ScoreResult {
    let title = item.title.as_deref().unwrap_or_default();
    let body = item.body.as_deref().unwrap_or_default();
    let combined = format!("{title} {body}").to_lowercase();

    let mut score = BASE_SCORE;
    let mut r = ScoreResult::default();

    // 1) Length (body only)
    let words = text::word_count(body);
    if words < SHORT_WORDS {
        score -= SHORT_PENALTY;
        r.reasons.push(format!("short content: {words} words (-{SHORT_PENALTY})"));
    } else if words > LONG_WORDS {
        score += LONG_BONUS;
        r.reasons.push(format!("long content: {words} words (+{LONG_BONUS})"));
    }

    // 2) Positive keywords
    for rule in &tables.positive {
        let count = combined.matches(rule.keyword.as_str()).count();
        if count == 0 {
            continue;
        }
        score += (count as f64 * KEYWORD_STEP * rule.weight).min(KEYWORD_CAP);
        r.matched_keywords.insert(rule.keyword.clone());
        r.reasons
            .push(format!("keyword '{}' x{count} (weight {})", rule.keyword, rule.weight));
    }

    // 3) Noise keywords
    for rule in &tables.negative {
        let count = combined.matches(rule.keyword.as_str()).count();
        if count == 0 {
            continue;
        }
        score -= count as f64 * NOISE_STEP * rule.weight;
        r.reasons
            .push(format!("noise '{}' x{count} (penalty {})", rule.keyword, rule.weight));
    }

    // 4) Entities
    for ent in &tables.entities {
        let found = ent.find_all(&combined);
        if found.is_empty() {
            continue;
        }
        score += (found.len() as f64 * ENTITY_STEP * ent.weight).min(ENTITY_CAP);
        r.reasons
            .push(format!("{} {} entities ({})", found.len(), ent.label, found.join(", ")));
        r.matched_entities.extend(found);
    }

    // 5) Freshness; future dates count as fresh
    if let Some(published) = item.published_at.datetime() {
        let age = now - published;
        if age < Duration::hours(24) {
            score += FRESH_BONUS;
            r.reasons.push(format!("very recent (<24h, +{FRESH_BONUS})"));
        } else if age < Duration::hours(72) {
            score += RECENT_BONUS;
            r.reasons.push(format!("recent (<72h, +{RECENT_BONUS})"));
        }
    }

    r.score = if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    };
    r
}

pub(crate) fn validate_threshold(t: f64) -> Result<f64, ConfigError> {
    if !(0.0..=1.0).contains(&t) {
        return Err(ConfigError::ImportanceThreshold(t));
    }
    Ok(t)
}

enum TableSource {
    Fixed(Arc<CompiledTables>),
    Hot(HotReloadTables),
}

impl TableSource {
    fn current(&self) -> Arc<CompiledTables> {
        match self {
            TableSource::Fixed(t) => t.clone(),
            TableSource::Hot(h) => h.current(),
        }
    }
}

pub struct ImportanceScorer {
    threshold: RwLock<f64>,
    tables: RwLock<TableSource>,
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self {
            threshold: RwLock::new(DEFAULT_IMPORTANCE_THRESHOLD),
            tables: RwLock::new(TableSource::Fixed(Arc::new(CompiledTables::builtin()))),
        }
    }
}

impl ImportanceScorer {
    pub fn new(threshold: f64) -> Result<Self, ConfigError> {
        let s = Self::default();
        s.update_threshold(threshold)?;
        Ok(s)
    }

    /// Scorer whose tables follow `path` (built-in tables until the file exists).
    pub fn with_tables_file(threshold: f64, path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let s = Self::new(threshold)?;
        *s.tables.write().expect("scorer tables lock poisoned") =
            TableSource::Hot(HotReloadTables::new(path));
        Ok(s)
    }

    pub fn threshold(&self) -> f64 {
        *self.threshold.read().expect("scorer threshold lock poisoned")
    }

    pub fn update_threshold(&self, t: f64) -> Result<(), ConfigError> {
        let v = validate_threshold(t)?;
        let mut g = self.threshold.write().expect("scorer threshold lock poisoned");
        if *g != v {
            info!(from = *g, to = v, "updated importance threshold");
        }
        *g = v;
        Ok(())
    }

    /// Replace the rule tables (stops following any tables file).
    pub fn set_tables(&self, tables: ScoringTables) -> Result<(), ConfigError> {
        let compiled = tables.compile()?;
        *self.tables.write().expect("scorer tables lock poisoned") =
            TableSource::Fixed(Arc::new(compiled));
        Ok(())
    }

    pub fn tables(&self) -> Arc<CompiledTables> {
        self.tables
            .read()
            .expect("scorer tables lock poisoned")
            .current()
    }

    pub fn score(&self, item: &ContentItem) -> ScoreResult {
        self.score_at(item, Utc::now())
    }

    pub fn score_at(&self, item: &ContentItem, now: DateTime<Utc>) -> ScoreResult {
        let result = evaluate(item, &self.tables(), now);
        debug!(
            item = %item.log_id(),
            score = result.score,
            keywords = result.matched_keywords.len(),
            entities = result.matched_entities.len(),
            "scored item"
        );
        result
    }

    pub fn meets_threshold(&self, result: &ScoreResult) -> bool {
        result.score >= self.threshold()
    }

    /// `threshold = None` uses the current threshold.
    pub fn is_major(&self, item: &ContentItem, threshold: Option<f64>) -> bool {
        let t = threshold.unwrap_or_else(|| self.threshold());
        self.score(item).score >= t
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreStatistics {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Buckets `"0.0"` .. `"1.0"`, 0.1 wide.
    pub distribution: BTreeMap<String, usize>,
    /// Up to ten keywords by number of items matching them.
    pub top_keywords: Vec<(String, usize)>,
}

pub fn score_statistics(results: &[ScoreResult]) -> ScoreStatistics {
    if results.is_empty() {
        return ScoreStatistics::default();
    }

    let mut scores: Vec<f64> = results.iter().map(|r| r.score).collect();
    scores.sort_by(|a, b| a.total_cmp(b));

    let n = scores.len();
    let median = if n % 2 == 1 {
        scores[n / 2]
    } else {
        (scores[n / 2 - 1] + scores[n / 2]) / 2.0
    };

    let mut distribution = BTreeMap::new();
    for s in &scores {
        let bucket = ((s * 10.0).floor() as i64).clamp(0, 10);
        *distribution
            .entry(format!("{:.1}", bucket as f64 / 10.0))
            .or_insert(0) += 1;
    }

    let mut kw: HashMap<&str, usize> = HashMap::new();
    for r in results {
        for k in &r.matched_keywords {
            *kw.entry(k.as_str()).or_insert(0) += 1;
        }
    }
    let mut top: Vec<(String, usize)> = kw.into_iter().map(|(k, c)| (k.to_string(), c)).collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(10);

    ScoreStatistics {
        count: n,
        average: scores.iter().sum::<f64>() / n as f64,
        min: scores[0],
        max: scores[n - 1],
        median,
        distribution,
        top_keywords: top,
    }
}
