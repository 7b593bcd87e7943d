// src/dedup.rs
//! # Deduplication
//!
//! Multi-signal duplicate detection over one batch, plus a lookup against the
//! historical fingerprints loaded by the orchestrator.
//!
//! Signals run cheapest first and stop at the first hit:
//! 1. normalized URL identity
//! 2. normalized title identity
//! 3. SHA-256 of the normalized body
//! 4. Jaccard token-set similarity (within the batch only)
//!
//! History (URL, title, hash) is consulted before the batch. Inside a batch the
//! first occurrence wins. The engine never writes: fingerprints of kept items
//! come back as `new_records` for the caller to append.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::text;
use crate::types::{ContentItem, DuplicateRecord, HistoryKey};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupSignal {
    Url,
    Title,
    Hash,
    Similarity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    HistoricalDuplicate { signal: DedupSignal },
    /// `original` is the earlier item's id, else its content hash, else its
    /// normalized URL, else `#<batch index>`.
    DuplicateOf {
        original: String,
        signal: DedupSignal,
    },
}

impl DropReason {
    pub fn signal(&self) -> DedupSignal {
        match self {
            DropReason::HistoricalDuplicate { signal } | DropReason::DuplicateOf { signal, .. } => {
                *signal
            }
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::HistoricalDuplicate { .. } => f.write_str("historical_duplicate"),
            DropReason::DuplicateOf { original, .. } => write!(f, "duplicate_of={original}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub total: usize,
    pub kept: usize,
    pub dropped: usize,
    pub historical: usize,
    pub by_url: usize,
    pub by_title: usize,
    pub by_hash: usize,
    pub by_similarity: usize,
    pub history_available: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupOutcome {
    pub kept: Vec<ContentItem>,
    pub dropped: Vec<(ContentItem, DropReason)>,
    pub stats: DedupStats,
    pub new_records: Vec<DuplicateRecord>,
}

/// Fingerprints already seen in earlier runs.
#[derive(Debug, Clone, Default)]
pub struct HistoryIndex {
    keys: HashSet<HistoryKey>,
    available: bool,
}

impl HistoryIndex {
    pub fn new(keys: HashSet<HistoryKey>) -> Self {
        Self {
            keys,
            available: true,
        }
    }

    /// History reachable but holding nothing.
    pub fn empty() -> Self {
        Self::new(HashSet::new())
    }

    /// History could not be loaded; only within-batch checks apply.
    pub fn unavailable() -> Self {
        Self {
            keys: HashSet::new(),
            available: false,
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DuplicateRecord>) -> Self {
        Self::new(records.into_iter().flat_map(|r| r.keys()).collect())
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn contains(&self, key: &HistoryKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Distinct history lookup keys for a batch (sorted).
pub fn fingerprint_keys(items: &[ContentItem]) -> Vec<HistoryKey> {
    let mut set = BTreeSet::new();
    for item in items {
        if let Some(u) = item.normalized_url() {
            set.insert(HistoryKey::Url(u));
        }
        if let Some(t) = item.normalized_title() {
            set.insert(HistoryKey::Title(t));
        }
        if let Some(h) = item.content_hash() {
            set.insert(HistoryKey::Hash(h));
        }
    }
    set.into_iter().collect()
}

pub(crate) fn validate_similarity_threshold(t: f64) -> Result<f64, ConfigError> {
    if t > 0.0 && t <= 1.0 {
        Ok(t)
    } else {
        Err(ConfigError::SimilarityThreshold(t))
    }
}

struct Fingerprint {
    url: Option<String>,
    title: Option<String>,
    hash: Option<String>,
}

impl Fingerprint {
    fn of(item: &ContentItem) -> Self {
        Self {
            url: item.normalized_url(),
            title: item.normalized_title(),
            hash: item.content_hash(),
        }
    }

    fn historical_match(&self, history: &HistoryIndex) -> Option<DedupSignal> {
        if !history.is_available() || history.is_empty() {
            return None;
        }
        if let Some(u) = &self.url {
            if history.contains(&HistoryKey::Url(u.clone())) {
                return Some(DedupSignal::Url);
            }
        }
        if let Some(t) = &self.title {
            if history.contains(&HistoryKey::Title(t.clone())) {
                return Some(DedupSignal::Title);
            }
        }
        if let Some(h) = &self.hash {
            if history.contains(&HistoryKey::Hash(h.clone())) {
                return Some(DedupSignal::Hash);
            }
        }
        None
    }
}

/// An item already kept in this batch.
struct Retained {
    label: String,
    tokens: HashSet<String>,
}

#[derive(Default)]
struct BatchIndex {
    retained: Vec<Retained>,
    urls: HashMap<String, usize>,
    titles: HashMap<String, usize>,
    hashes: HashMap<String, usize>,
}

impl BatchIndex {
    fn exact_match(&self, fp: &Fingerprint) -> Option<(usize, DedupSignal)> {
        if let Some(i) = fp.url.as_ref().and_then(|u| self.urls.get(u)) {
            return Some((*i, DedupSignal::Url));
        }
        if let Some(i) = fp.title.as_ref().and_then(|t| self.titles.get(t)) {
            return Some((*i, DedupSignal::Title));
        }
        if let Some(i) = fp.hash.as_ref().and_then(|h| self.hashes.get(h)) {
            return Some((*i, DedupSignal::Hash));
        }
        None
    }

    fn similar(&self, tokens: &HashSet<String>, threshold: f64) -> Option<usize> {
        if tokens.is_empty() {
            return None;
        }
        self.retained
            .iter()
            .position(|r| text::jaccard(tokens, &r.tokens) >= threshold)
    }

    fn insert(&mut self, fp: &Fingerprint, label: String, tokens: HashSet<String>) {
        let i = self.retained.len();
        if let Some(u) = &fp.url {
            self.urls.insert(u.clone(), i);
        }
        if let Some(t) = &fp.title {
            self.titles.insert(t.clone(), i);
        }
        if let Some(h) = &fp.hash {
            self.hashes.insert(h.clone(), i);
        }
        self.retained.push(Retained { label, tokens });
    }
}

fn label_for(item: &ContentItem, fp: &Fingerprint, index: usize) -> String {
    if let Some(id) = item.id {
        return id.to_string();
    }
    if let Some(h) = &fp.hash {
        return h.clone();
    }
    if let Some(u) = &fp.url {
        return u.clone();
    }
    format!("#{index}")
}

#[derive(Debug)]
pub struct DedupEngine {
    similarity_threshold: RwLock<f64>,
}

impl Default for DedupEngine {
    fn default() -> Self {
        Self {
            similarity_threshold: RwLock::new(DEFAULT_SIMILARITY_THRESHOLD),
        }
    }
}

impl DedupEngine {
    pub fn new(similarity_threshold: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            similarity_threshold: RwLock::new(validate_similarity_threshold(similarity_threshold)?),
        })
    }

    pub fn similarity_threshold(&self) -> f64 {
        *self
            .similarity_threshold
            .read()
            .expect("dedup threshold lock poisoned")
    }

    pub fn update_similarity_threshold(&self, t: f64) -> Result<(), ConfigError> {
        let v = validate_similarity_threshold(t)?;
        let mut g = self
            .similarity_threshold
            .write()
            .expect("dedup threshold lock poisoned");
        info!(from = *g, to = v, "updated similarity threshold");
        *g = v;
        Ok(())
    }

    pub fn filter_batch(&self, items: Vec<ContentItem>, history: &HistoryIndex) -> DedupOutcome {
        self.filter_batch_at(items, history, Utc::now())
    }

    /// Same as [`filter_batch`](Self::filter_batch) with an explicit
    /// `first_seen_at` for the new records.
    pub fn filter_batch_at(
        &self,
        items: Vec<ContentItem>,
        history: &HistoryIndex,
        now: DateTime<Utc>,
    ) -> DedupOutcome {
        let threshold = self.similarity_threshold();
        let mut out = DedupOutcome {
            stats: DedupStats {
                total: items.len(),
                history_available: history.is_available(),
                ..Default::default()
            },
            ..Default::default()
        };
        if items.is_empty() {
            return out;
        }

        let mut batch = BatchIndex::default();

        for (index, item) in items.into_iter().enumerate() {
            let fp = Fingerprint::of(&item);

            // 1) History first
            if let Some(signal) = fp.historical_match(history) {
                out.stats.historical += 1;
                debug!(item = %item.log_id(), ?signal, "historical duplicate");
                out.dropped
                    .push((item, DropReason::HistoricalDuplicate { signal }));
                continue;
            }

            // 2) Exact signals within the batch
            if let Some((i, signal)) = batch.exact_match(&fp) {
                let original = batch.retained[i].label.clone();
                debug!(item = %item.log_id(), ?signal, %original, "batch duplicate");
                out.dropped
                    .push((item, DropReason::DuplicateOf { original, signal }));
                continue;
            }

            // 3) Similarity against items kept so far
            let tokens = item
                .body
                .as_deref()
                .map(text::token_set)
                .unwrap_or_default();
            if let Some(i) = batch.similar(&tokens, threshold) {
                let original = batch.retained[i].label.clone();
                debug!(item = %item.log_id(), %original, "near duplicate");
                out.dropped.push((
                    item,
                    DropReason::DuplicateOf {
                        original,
                        signal: DedupSignal::Similarity,
                    },
                ));
                continue;
            }

            let label = label_for(&item, &fp, index);
            out.new_records.push(DuplicateRecord {
                content_hash: fp.hash.clone(),
                normalized_url: fp.url.clone(),
                normalized_title: fp.title.clone(),
                first_seen_at: now,
            });
            batch.insert(&fp, label, tokens);
            out.kept.push(item);
        }

        for (_, reason) in &out.dropped {
            if let DropReason::DuplicateOf { signal, .. } = reason {
                match signal {
                    DedupSignal::Url => out.stats.by_url += 1,
                    DedupSignal::Title => out.stats.by_title += 1,
                    DedupSignal::Hash => out.stats.by_hash += 1,
                    DedupSignal::Similarity => out.stats.by_similarity += 1,
                }
            }
        }
        out.stats.kept = out.kept.len();
        out.stats.dropped = out.dropped.len();

        info!(
            total = out.stats.total,
            kept = out.stats.kept,
            historical = out.stats.historical,
            batch_dups = out.stats.dropped - out.stats.historical,
            history = history.is_available(),
            "deduplicated batch"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;

    fn item(title: &str, body: &str) -> ContentItem {
        ContentItem::new("n1", SourceType::Newsletter)
            .with_title(title)
            .with_body(body)
    }

    #[test]
    fn empty_batch_yields_zero_stats() {
        let out = DedupEngine::default().filter_batch(vec![], &HistoryIndex::empty());
        assert!(out.kept.is_empty() && out.dropped.is_empty() && out.new_records.is_empty());
        assert_eq!(out.stats.total, 0);
        assert_eq!(out.stats.dropped, 0);
    }

    #[test]
    fn title_variants_collapse_to_first() {
        let out = DedupEngine::default().filter_batch(
            vec![item("AI Launches!", "first body"), item("ai launches", "other words")],
            &HistoryIndex::empty(),
        );
        assert_eq!(out.kept.len(), 1);
        let (_, reason) = &out.dropped[0];
        assert_eq!(reason.signal(), DedupSignal::Title);
        let expected = format!("duplicate_of={}", text::content_hash("first body").unwrap());
        assert_eq!(reason.to_string(), expected);
    }

    #[test]
    fn url_signal_wins_over_title() {
        let a = item("One", "x").with_url("https://site.io/a?ref=1");
        let b = item("One", "y").with_url("https://SITE.io/a/");
        let out = DedupEngine::default().filter_batch(vec![a, b], &HistoryIndex::empty());
        assert_eq!(out.dropped[0].1.signal(), DedupSignal::Url);
        assert_eq!(out.stats.by_url, 1);
    }

    #[test]
    fn near_duplicate_bodies_are_dropped() {
        let a = item("A", "the quick brown fox jumps over the lazy dog today");
        let b = item("B", "the quick brown fox jumps over the lazy dog");
        let out = DedupEngine::default().filter_batch(vec![a, b], &HistoryIndex::empty());
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.dropped[0].1.signal(), DedupSignal::Similarity);
    }

    #[test]
    fn label_falls_back_to_batch_index() {
        let a = ContentItem::new("n", SourceType::Newsletter).with_title("Only title");
        let b = ContentItem::new("n", SourceType::Newsletter).with_title("only TITLE");
        let out = DedupEngine::default().filter_batch(vec![a, b], &HistoryIndex::empty());
        assert_eq!(out.dropped[0].1.to_string(), "duplicate_of=#0");
    }

    #[test]
    fn history_hit_is_historical() {
        let a = item("Seen before", "body");
        let history = HistoryIndex::new(
            [HistoryKey::Title("seen before".into())].into_iter().collect(),
        );
        let out = DedupEngine::default().filter_batch(vec![a], &history);
        assert!(out.kept.is_empty());
        assert_eq!(out.dropped[0].1.to_string(), "historical_duplicate");
        assert_eq!(out.stats.historical, 1);
    }

    #[test]
    fn items_without_signals_are_kept() {
        let a = ContentItem::new("n", SourceType::Newsletter);
        let b = ContentItem::new("n", SourceType::Newsletter);
        let out = DedupEngine::default().filter_batch(vec![a, b], &HistoryIndex::empty());
        assert_eq!(out.kept.len(), 2);
    }

    #[test]
    fn threshold_validation() {
        let e = DedupEngine::default();
        assert!(e.update_similarity_threshold(0.0).is_err());
        assert!(e.update_similarity_threshold(1.01).is_err());
        e.update_similarity_threshold(1.0).unwrap();
        assert_eq!(e.similarity_threshold(), 1.0);
    }
}
