// src/orchestrator.rs
//! # Collection Orchestrator
//!
//! One run, in order:
//! 1) health check over the configured sources
//! 2) concurrent fetch of the collectable ones (bounded by a semaphore);
//!    outcomes are applied to the health tracker one source at a time
//! 3) time/confidence filter
//! 4) dedup against history (loaded once) and within the batch
//! 5) score, rank, balance across sources, persist (one store batch)
//! 6) report
//!
//! A failing source, store or adapter never aborts the run; it becomes a
//! [`RunError`] in the report. Only the orchestrator holds state that spans
//! components.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{SourceConfig, TriageConfig, DEFAULT_MAX_CONCURRENT_FETCHES};
use crate::dedup::{
    fingerprint_keys, validate_similarity_threshold, DedupEngine, DedupStats, HistoryIndex,
    DEFAULT_SIMILARITY_THRESHOLD,
};
use crate::error::{ConfigError, FetchError};
use crate::filter::{
    validate_min_confidence, validate_window_days, ContentFilter, FilterSettings,
    DEFAULT_MIN_CONFIDENCE, DEFAULT_WINDOW_DAYS,
};
use crate::health::{
    HealthPolicy, HealthReport, HealthTracker, DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_HOURS,
};
use crate::ingest::AdapterRegistry;
use crate::score::balance::{balanced_selection, source_weights, BalancePolicy};
use crate::score::{validate_threshold, ImportanceScorer, DEFAULT_IMPORTANCE_THRESHOLD};
use crate::store::TriageStore;
use crate::telemetry;
use crate::types::{ContentItem, DuplicateRecord, ScoreResult, SourceType};

/// Every runtime tunable in one place; applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSettings {
    pub window_days: i64,
    pub min_confidence: f64,
    pub source_type: Option<SourceType>,
    pub failure_threshold: i64,
    pub recovery_hours: i64,
    pub similarity_threshold: f64,
    pub importance_threshold: f64,
    pub max_concurrent_fetches: usize,
    pub run_timeout: Option<Duration>,
    /// Duplicate history and persisted items older than this are purged.
    pub retention_days: Option<u32>,
    pub balance: BalancePolicy,
    /// Cap on `selected` survivors per run; every survivor is selected when unset.
    pub max_items: Option<usize>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            window_days: i64::from(DEFAULT_WINDOW_DAYS),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            source_type: None,
            failure_threshold: i64::from(DEFAULT_FAILURE_THRESHOLD),
            recovery_hours: i64::from(DEFAULT_RECOVERY_HOURS),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            importance_threshold: DEFAULT_IMPORTANCE_THRESHOLD,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            run_timeout: None,
            retention_days: None,
            balance: BalancePolicy::default(),
            max_items: None,
        }
    }
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_window_days(self.window_days)?;
        validate_min_confidence(self.min_confidence)?;
        HealthPolicy::new(self.failure_threshold, self.recovery_hours)?;
        validate_similarity_threshold(self.similarity_threshold)?;
        validate_threshold(self.importance_threshold)?;
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::Concurrency(0));
        }
        BalancePolicy::new(
            i64::from(self.balance.target_per_source),
            self.balance.min_weight,
            self.balance.max_weight,
        )?;
        if self.max_items == Some(0) {
            return Err(ConfigError::MaxItems);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Health,
    Fetch,
    Cancelled,
    Config,
    Retention,
    Dedup,
    Persist,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    /// `None` for run-wide failures (e.g. the history store).
    pub source_id: Option<String>,
    pub stage: RunStage,
    pub message: String,
}

impl RunError {
    fn source(source_id: &str, stage: RunStage, message: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.to_string()),
            stage,
            message: message.into(),
        }
    }

    fn global(stage: RunStage, message: impl Into<String>) -> Self {
        Self {
            source_id: None,
            stage,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Produced,
    NoContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredItem {
    pub item: ContentItem,
    pub score: ScoreResult,
    pub is_major: bool,
    /// Inverse weight of the item's source in this run.
    pub source_weight: f64,
    /// Picked by the per-source balanced selection.
    pub selected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageCounts {
    pub filter_total: usize,
    pub filter_kept: usize,
    pub filter_excluded: usize,
    pub exclusion_reasons: BTreeMap<String, usize>,
    pub dedup: DedupStats,
    pub scored: usize,
    pub below_threshold: usize,
    pub selected: usize,
    pub selected_by_source: BTreeMap<String, usize>,
    pub persisted: usize,
    pub history_purged: usize,
    pub content_purged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub sources_total: usize,
    pub sources_collectable: usize,
    /// In recovery, cancelled by the deadline, or without an adapter.
    pub sources_skipped: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub total_fetched: usize,
    pub stages: StageCounts,
    /// Survivors, highest score first.
    pub items: Vec<ScoredItem>,
    pub errors: Vec<RunError>,
    pub outcome: RunOutcome,
}

impl PipelineReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            elapsed_ms: 0,
            sources_total: 0,
            sources_collectable: 0,
            sources_skipped: 0,
            sources_succeeded: 0,
            sources_failed: 0,
            total_fetched: 0,
            stages: StageCounts::default(),
            items: Vec::new(),
            errors: Vec::new(),
            outcome: RunOutcome::NoContent,
        }
    }
}

enum FetchOutcome {
    Items(Vec<ContentItem>),
    Failed(FetchError),
    Cancelled,
    NoAdapter(SourceType),
}

#[derive(Debug, Clone, Copy)]
struct RunControl {
    max_concurrent_fetches: usize,
    run_timeout: Option<Duration>,
    retention_days: Option<u32>,
    balance: BalancePolicy,
    max_items: Option<usize>,
}

impl RunControl {
    fn from_settings(settings: &RunSettings) -> Self {
        Self {
            max_concurrent_fetches: settings.max_concurrent_fetches,
            run_timeout: settings.run_timeout,
            retention_days: settings.retention_days,
            balance: settings.balance,
            max_items: settings.max_items,
        }
    }
}

pub struct Orchestrator {
    sources: Vec<SourceConfig>,
    adapters: AdapterRegistry,
    store: Arc<dyn TriageStore>,
    health: HealthTracker,
    filter: ContentFilter,
    dedup: DedupEngine,
    scorer: ImportanceScorer,
    control: RwLock<RunControl>,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<SourceConfig>,
        adapters: AdapterRegistry,
        store: Arc<dyn TriageStore>,
        settings: &RunSettings,
    ) -> Result<Self, ConfigError> {
        Self::with_scorer(
            sources,
            adapters,
            store,
            settings,
            ImportanceScorer::new(settings.importance_threshold)?,
        )
    }

    /// Like [`new`](Self::new) with a preconfigured scorer (custom or
    /// file-backed tables). The scorer threshold is taken from `settings`.
    pub fn with_scorer(
        sources: Vec<SourceConfig>,
        adapters: AdapterRegistry,
        store: Arc<dyn TriageStore>,
        settings: &RunSettings,
        scorer: ImportanceScorer,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        scorer.update_threshold(settings.importance_threshold)?;
        Ok(Self {
            sources,
            adapters,
            health: HealthTracker::new(
                store.clone(),
                HealthPolicy::new(settings.failure_threshold, settings.recovery_hours)?,
            ),
            store,
            filter: ContentFilter::new(FilterSettings::new(
                settings.window_days,
                settings.min_confidence,
                settings.source_type,
            )?),
            dedup: DedupEngine::new(settings.similarity_threshold)?,
            scorer,
            control: RwLock::new(RunControl::from_settings(settings)),
        })
    }

    pub fn from_config(
        cfg: &TriageConfig,
        adapters: AdapterRegistry,
        store: Arc<dyn TriageStore>,
    ) -> Result<Self, ConfigError> {
        let settings = cfg.run_settings();
        let scorer = match &cfg.scoring.tables_path {
            Some(p) => ImportanceScorer::with_tables_file(settings.importance_threshold, p)?,
            None => ImportanceScorer::new(settings.importance_threshold)?,
        };
        Self::with_scorer(cfg.sources.clone(), adapters, store, &settings, scorer)
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn filter(&self) -> &ContentFilter {
        &self.filter
    }

    pub fn dedup(&self) -> &DedupEngine {
        &self.dedup
    }

    pub fn scorer(&self) -> &ImportanceScorer {
        &self.scorer
    }

    fn control(&self) -> RunControl {
        *self.control.read().expect("run control lock poisoned")
    }

    fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id.clone()).collect()
    }

    /// Validates every value first; on error nothing is applied.
    pub fn reconfigure(&self, settings: &RunSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        self.filter.update_window_days(settings.window_days)?;
        self.filter.update_min_confidence(settings.min_confidence)?;
        self.filter.set_source_type(settings.source_type);
        self.health.update_failure_threshold(settings.failure_threshold)?;
        self.health.update_recovery_hours(settings.recovery_hours)?;
        self.dedup
            .update_similarity_threshold(settings.similarity_threshold)?;
        self.scorer.update_threshold(settings.importance_threshold)?;
        *self.control.write().expect("run control lock poisoned") =
            RunControl::from_settings(settings);
        Ok(())
    }

    pub fn update_window_days(&self, days: i64) -> Result<(), ConfigError> {
        self.filter.update_window_days(days)
    }

    pub fn update_min_confidence(&self, min_confidence: f64) -> Result<(), ConfigError> {
        self.filter.update_min_confidence(min_confidence)
    }

    pub fn update_failure_threshold(&self, threshold: i64) -> Result<(), ConfigError> {
        self.health.update_failure_threshold(threshold)
    }

    pub fn update_recovery_hours(&self, hours: i64) -> Result<(), ConfigError> {
        self.health.update_recovery_hours(hours)
    }

    pub fn update_importance_threshold(&self, threshold: f64) -> Result<(), ConfigError> {
        self.scorer.update_threshold(threshold)
    }

    /// Health of every configured source at `now`.
    pub fn collection_status(&self, now: DateTime<Utc>) -> HealthReport {
        let statuses = self.health.statuses(&self.source_ids());
        self.health.check_all(&statuses, now)
    }

    pub async fn run(&self) -> PipelineReport {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> PipelineReport {
        let t0 = Instant::now();
        let control = self.control();
        let mut report = PipelineReport::new(now);

        // 0) Retention
        if let Some(days) = control.retention_days {
            let cutoff = now - ChronoDuration::days(i64::from(days));
            match self.store.purge_duplicate_records_before(cutoff) {
                Ok(n) => report.stages.history_purged = n,
                Err(e) => {
                    warn!(error = %e, "history retention purge failed");
                    report
                        .errors
                        .push(RunError::global(RunStage::Retention, format!("{e:#}")));
                }
            }
            match self.store.purge_content_before(cutoff) {
                Ok(n) => report.stages.content_purged = n,
                Err(e) => {
                    warn!(error = %e, "content retention purge failed");
                    report
                        .errors
                        .push(RunError::global(RunStage::Retention, format!("{e:#}")));
                }
            }
        }

        // 1) Health check
        let statuses = self.health.statuses(&self.source_ids());
        let plan = self.health.collectable_sources(&statuses, now);
        report.sources_total = plan.total;
        report.sources_collectable = plan.collectable.len();
        report.sources_skipped = plan.skipped.len();
        for id in &plan.skipped {
            debug!(source_id = %id, "skipped: in recovery");
        }

        let collectable: Vec<SourceConfig> = self
            .sources
            .iter()
            .filter(|s| plan.collectable.contains(&s.id))
            .cloned()
            .collect();

        // 2) Fetch, then apply outcomes serially in source order
        let deadline = control.run_timeout.and_then(|d| t0.checked_add(d));
        let outcomes = self.fetch_all(&collectable, control, deadline).await;

        let mut fetched: Vec<ContentItem> = Vec::new();
        for (source, outcome) in collectable.iter().zip(outcomes) {
            match outcome {
                FetchOutcome::Items(items) => {
                    report.sources_succeeded += 1;
                    report.total_fetched += items.len();
                    if let Err(e) = self.health.record_success_at(&source.id, now) {
                        report.errors.push(RunError::source(
                            &source.id,
                            RunStage::Health,
                            format!("{e:#}"),
                        ));
                    }
                    debug!(source_id = %source.id, items = items.len(), "source fetched");
                    fetched.extend(items);
                }
                FetchOutcome::Failed(err) => {
                    report.sources_failed += 1;
                    let message = err.to_string();
                    warn!(source_id = %source.id, error = %message, "source fetch failed");
                    if let Err(e) = self.health.record_failure_at(&source.id, &message, now) {
                        report.errors.push(RunError::source(
                            &source.id,
                            RunStage::Health,
                            format!("{e:#}"),
                        ));
                    }
                    report
                        .errors
                        .push(RunError::source(&source.id, RunStage::Fetch, message));
                }
                FetchOutcome::Cancelled => {
                    report.sources_skipped += 1;
                    report.errors.push(RunError::source(
                        &source.id,
                        RunStage::Cancelled,
                        "cancelled: run deadline reached before fetch started",
                    ));
                }
                FetchOutcome::NoAdapter(t) => {
                    report.sources_skipped += 1;
                    report.errors.push(RunError::source(
                        &source.id,
                        RunStage::Config,
                        format!("no fetch adapter registered for source type `{t}`"),
                    ));
                }
            }
        }

        // 3) Filter
        let filtered = self.filter.filter_batch(fetched, now);
        report.stages.filter_total = filtered.total;
        report.stages.filter_kept = filtered.kept.len();
        report.stages.filter_excluded = filtered.excluded.len();
        report.stages.exclusion_reasons = filtered.exclusion_reasons;

        // 4) Dedup; history loaded once for the whole batch
        let history = if filtered.kept.is_empty() {
            HistoryIndex::empty()
        } else {
            match self
                .store
                .load_duplicate_records(&fingerprint_keys(&filtered.kept))
            {
                Ok(keys) => HistoryIndex::new(keys),
                Err(e) => {
                    warn!(error = %e, "history unavailable, deduplicating within batch only");
                    report.errors.push(RunError::global(
                        RunStage::Dedup,
                        format!("history unavailable: {e:#}"),
                    ));
                    HistoryIndex::unavailable()
                }
            }
        };
        let deduped = self.dedup.filter_batch_at(filtered.kept, &history, now);
        report.stages.dedup = deduped.stats.clone();

        // 5) Score and rank (stable: equal scores keep batch order)
        let mut scored: Vec<(ScoredItem, DuplicateRecord)> = deduped
            .kept
            .into_iter()
            .zip(deduped.new_records)
            .map(|(item, record)| {
                let score = self.scorer.score_at(&item, now);
                let is_major = self.scorer.meets_threshold(&score);
                (
                    ScoredItem {
                        item,
                        score,
                        is_major,
                        source_weight: 1.0,
                        selected: true,
                    },
                    record,
                )
            })
            .collect();
        scored.sort_by(|a, b| b.0.score.score.total_cmp(&a.0.score.score));
        report.stages.scored = scored.len();
        report.stages.below_threshold = scored.iter().filter(|(s, _)| !s.is_major).count();

        // Balance across sources; ranking order is unchanged
        let ranked_sources: Vec<&str> = scored
            .iter()
            .map(|(s, _)| s.item.source_id.as_str())
            .collect();
        let weights = source_weights(ranked_sources.iter().copied(), &control.balance);
        let selection = balanced_selection(
            &ranked_sources,
            control.max_items.unwrap_or(ranked_sources.len()),
            &weights,
        );
        let mut picked = selection.indices.iter().peekable();
        for (i, (s, _)) in scored.iter_mut().enumerate() {
            s.source_weight = weights
                .get(&s.item.source_id)
                .map_or(1.0, |w| w.weight);
            s.selected = picked.next_if_eq(&&i).is_some();
        }
        report.stages.selected = selection.indices.len();
        report.stages.selected_by_source = selection.distribution;

        // Persist as one store batch: content with its fingerprint
        let (mut ranked, batch): (Vec<ScoredItem>, Vec<(ContentItem, DuplicateRecord)>) = scored
            .into_iter()
            .map(|(s, record)| {
                let item = s.item.clone();
                (s, (item, record))
            })
            .unzip();
        if !batch.is_empty() {
            match self.store.persist_batch(&batch, now) {
                Ok(ids) => {
                    report.stages.persisted = ids.len();
                    for (s, id) in ranked.iter_mut().zip(ids) {
                        s.item.id = Some(id);
                    }
                }
                Err(e) => {
                    warn!(items = batch.len(), error = %e, "persist failed");
                    report
                        .errors
                        .push(RunError::global(RunStage::Persist, format!("{e:#}")));
                }
            }
        }
        report.items = ranked;

        // 6) Report
        report.outcome = if report.items.is_empty() {
            RunOutcome::NoContent
        } else {
            RunOutcome::Produced
        };
        report.elapsed_ms = t0.elapsed().as_millis() as u64;
        telemetry::record_run(&report);

        info!(
            target: "triage",
            sources = report.sources_total,
            skipped = report.sources_skipped,
            failed = report.sources_failed,
            fetched = report.total_fetched,
            filtered_out = report.stages.filter_excluded,
            deduped = report.stages.dedup.dropped,
            kept = report.items.len(),
            selected = report.stages.selected,
            errors = report.errors.len(),
            outcome = ?report.outcome,
            elapsed_ms = report.elapsed_ms,
            "pipeline run finished"
        );
        report
    }

    /// One outcome per source, in input order. A source whose turn comes after
    /// `deadline` is not fetched.
    async fn fetch_all(
        &self,
        sources: &[SourceConfig],
        control: RunControl,
        deadline: Option<Instant>,
    ) -> Vec<FetchOutcome> {
        let sem = Arc::new(Semaphore::new(control.max_concurrent_fetches.max(1)));
        let mut set = JoinSet::new();
        let mut slots: Vec<Option<FetchOutcome>> = Vec::with_capacity(sources.len());

        for (i, source) in sources.iter().enumerate() {
            let Some(adapter) = self.adapters.get(source.source_type) else {
                slots.push(Some(FetchOutcome::NoAdapter(source.source_type)));
                continue;
            };
            slots.push(None);
            let sem = sem.clone();
            let source = source.clone();
            set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (i, FetchOutcome::Cancelled);
                };
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return (i, FetchOutcome::Cancelled);
                }
                match adapter.fetch(&source).await {
                    Ok(items) => (i, FetchOutcome::Items(items)),
                    Err(e) => (i, FetchOutcome::Failed(e)),
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, outcome)) => slots[i] = Some(outcome),
                Err(e) => warn!(error = %e, "fetch task aborted"),
            }
        }

        slots
            .into_iter()
            .map(|s| {
                s.unwrap_or_else(|| {
                    FetchOutcome::Failed(FetchError::Other(anyhow::anyhow!("fetch task panicked")))
                })
            })
            .collect()
    }
}
