// src/health.rs
//! # Source Health
//!
//! Per-source circuit breaker. A source's state is derived on demand from
//! `(consecutive_failures, last_error_at, now, policy)`; nothing but the counters
//! is stored:
//!
//! - **Healthy**: failures below the threshold. Always collectable.
//! - **InRecovery**: at/over the threshold and the last error is younger than
//!   the recovery period. Skipped without a fetch.
//! - **PastRecovery**: at/over the threshold, recovery period elapsed. Collectable
//!   for a retry, still reported unhealthy until a success is recorded.
//!
//! Counters move only through [`HealthTracker::record_success`] and
//! [`HealthTracker::record_failure`]. Every failure restamps `last_error_at`, so
//! a source that keeps failing keeps pushing its recovery window forward.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::store::TriageStore;
use crate::types::SourceStatus;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_HOURS: u32 = 24;

/// Thresholds that turn counters into a health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthPolicy {
    pub failure_threshold: u32,
    pub recovery_hours: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_hours: DEFAULT_RECOVERY_HOURS,
        }
    }
}

impl HealthPolicy {
    pub fn new(failure_threshold: i64, recovery_hours: i64) -> Result<Self, ConfigError> {
        Ok(Self {
            failure_threshold: validate_threshold(failure_threshold)?,
            recovery_hours: validate_recovery_hours(recovery_hours)?,
        })
    }

    pub fn recovery_period(&self) -> Duration {
        Duration::hours(i64::from(self.recovery_hours))
    }

    pub fn is_healthy(&self, status: &SourceStatus) -> bool {
        status.consecutive_failures < self.failure_threshold
    }

    /// End of the recovery window, if the source is unhealthy and has an error
    /// timestamp to count from.
    pub fn recovery_until(&self, status: &SourceStatus) -> Option<DateTime<Utc>> {
        if self.is_healthy(status) {
            return None;
        }
        status.last_error_at.map(|at| at + self.recovery_period())
    }

    pub fn is_in_recovery(&self, status: &SourceStatus, now: DateTime<Utc>) -> bool {
        self.recovery_until(status).is_some_and(|until| now < until)
    }

    pub fn state(&self, status: &SourceStatus, now: DateTime<Utc>) -> HealthState {
        if self.is_healthy(status) {
            return HealthState::Healthy;
        }
        match self.recovery_until(status) {
            Some(until) if now < until => HealthState::InRecovery { until },
            _ => HealthState::PastRecovery,
        }
    }

    pub fn can_collect(&self, status: &SourceStatus, now: DateTime<Utc>) -> bool {
        self.state(status, now).is_collectable()
    }
}

fn validate_threshold(v: i64) -> Result<u32, ConfigError> {
    if v < 1 || v > i64::from(u32::MAX) {
        return Err(ConfigError::FailureThreshold(v));
    }
    Ok(v as u32)
}

fn validate_recovery_hours(v: i64) -> Result<u32, ConfigError> {
    if v < 1 || v > i64::from(u32::MAX) {
        return Err(ConfigError::RecoveryHours(v));
    }
    Ok(v as u32)
}

/// Derived health state. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    InRecovery { until: DateTime<Utc> },
    PastRecovery,
}

impl HealthState {
    pub fn is_collectable(&self) -> bool {
        !matches!(self, HealthState::InRecovery { .. })
    }
}

/// Detailed view of one source at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub state: HealthState,
    pub is_healthy: bool,
    pub is_in_recovery: bool,
    pub can_collect: bool,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub recovery_until: Option<DateTime<Utc>>,
}

/// Aggregate over a status set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthReport {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub in_recovery: usize,
    pub collectable: usize,
    pub sources: Vec<SourceHealth>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectableSources {
    pub total: usize,
    pub collectable: Vec<String>,
    /// Sources inside their recovery window.
    pub skipped: Vec<String>,
}

/// Owns the per-source counters. Each mutation updates exactly one entry under
/// the map lock and is written through to the store before the lock is released.
pub struct HealthTracker {
    policy: RwLock<HealthPolicy>,
    statuses: Mutex<HashMap<String, SourceStatus>>,
    store: Arc<dyn TriageStore>,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn TriageStore>, policy: HealthPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            statuses: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn policy(&self) -> HealthPolicy {
        *self.policy.read().expect("health policy lock poisoned")
    }

    pub fn is_healthy(&self, status: &SourceStatus) -> bool {
        self.policy().is_healthy(status)
    }

    pub fn is_in_recovery(&self, status: &SourceStatus, now: DateTime<Utc>) -> bool {
        self.policy().is_in_recovery(status, now)
    }

    pub fn can_collect(&self, status: &SourceStatus, now: DateTime<Utc>) -> bool {
        let policy = self.policy();
        let state = policy.state(status, now);
        match state {
            HealthState::InRecovery { until } => {
                debug!(
                    source_id = %status.source_id,
                    failures = status.consecutive_failures,
                    %until,
                    "source in recovery, skipping"
                );
            }
            HealthState::PastRecovery => {
                info!(
                    source_id = %status.source_id,
                    failures = status.consecutive_failures,
                    "recovery period expired, probing source"
                );
            }
            HealthState::Healthy => {}
        }
        state.is_collectable()
    }

    pub fn health_state(&self, status: &SourceStatus, now: DateTime<Utc>) -> HealthState {
        self.policy().state(status, now)
    }

    pub fn health_detail(&self, status: &SourceStatus, now: DateTime<Utc>) -> SourceHealth {
        detail(&self.policy(), status, now)
    }

    /// Current counters for `source_id`. Never-seen sources (or a store that
    /// cannot answer) yield the optimistic default.
    pub fn status(&self, source_id: &str) -> SourceStatus {
        let mut map = self.statuses.lock().expect("health map lock poisoned");
        self.cached_or_loaded(&mut map, source_id)
    }

    /// Statuses for a list of configured sources, in the given order.
    pub fn statuses(&self, source_ids: &[String]) -> Vec<SourceStatus> {
        let mut map = self.statuses.lock().expect("health map lock poisoned");
        source_ids
            .iter()
            .map(|id| self.cached_or_loaded(&mut map, id))
            .collect()
    }

    fn cached_or_loaded(
        &self,
        map: &mut HashMap<String, SourceStatus>,
        source_id: &str,
    ) -> SourceStatus {
        if let Some(s) = map.get(source_id) {
            return s.clone();
        }
        match self.store.load_source_status(source_id) {
            Ok(Some(s)) => {
                map.insert(source_id.to_string(), s.clone());
                s
            }
            Ok(None) => {
                let s = SourceStatus::new(source_id);
                map.insert(source_id.to_string(), s.clone());
                s
            }
            Err(e) => {
                warn!(source_id, error = %e, "source status unavailable, assuming healthy");
                SourceStatus::new(source_id)
            }
        }
    }

    pub fn record_success(&self, source_id: &str) -> anyhow::Result<SourceStatus> {
        self.record_success_at(source_id, Utc::now())
    }

    /// Success signal: counter back to zero, error cleared.
    pub fn record_success_at(
        &self,
        source_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<SourceStatus> {
        self.mutate(source_id, |s| {
            let previous = s.consecutive_failures;
            s.consecutive_failures = 0;
            s.last_error = None;
            s.last_success_at = Some(now);
            if previous > 0 {
                info!(source_id = %s.source_id, previous, "source recovered, failures reset");
            }
        })
    }

    pub fn record_failure(&self, source_id: &str, error: &str) -> anyhow::Result<SourceStatus> {
        self.record_failure_at(source_id, error, Utc::now())
    }

    /// Failure signal: counter incremented, error and timestamp restamped.
    pub fn record_failure_at(
        &self,
        source_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<SourceStatus> {
        let threshold = self.policy().failure_threshold;
        self.mutate(source_id, |s| {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            s.last_error = Some(error.to_string());
            s.last_error_at = Some(now);
            warn!(
                source_id = %s.source_id,
                failures = s.consecutive_failures,
                threshold,
                error,
                "source failure recorded"
            );
        })
    }

    fn mutate<F>(&self, source_id: &str, f: F) -> anyhow::Result<SourceStatus>
    where
        F: FnOnce(&mut SourceStatus),
    {
        let mut map = self.statuses.lock().expect("health map lock poisoned");
        let mut status = self.cached_or_loaded(&mut map, source_id);
        f(&mut status);
        map.insert(source_id.to_string(), status.clone());
        // Write-through while still holding the lock: one writer per tracker.
        self.store.save_source_status(&status)?;
        Ok(status)
    }

    /// Success signal for every listed source that has failures. Returns how
    /// many were reset.
    pub fn reset_all_failures(&self, source_ids: &[String]) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut reset = 0usize;
        for id in source_ids {
            if self.status(id).consecutive_failures > 0 {
                self.record_success_at(id, now)?;
                reset += 1;
            }
        }
        info!(total = source_ids.len(), reset, "reset source failure counters");
        Ok(reset)
    }

    /// Pure aggregate over `statuses` at `now`.
    pub fn check_all(&self, statuses: &[SourceStatus], now: DateTime<Utc>) -> HealthReport {
        let policy = self.policy();
        let mut report = HealthReport {
            total: statuses.len(),
            ..Default::default()
        };
        for s in statuses {
            let d = detail(&policy, s, now);
            if d.is_healthy {
                report.healthy += 1;
            } else {
                report.unhealthy += 1;
            }
            if d.is_in_recovery {
                report.in_recovery += 1;
            }
            if d.can_collect {
                report.collectable += 1;
            }
            report.sources.push(d);
        }
        debug!(
            total = report.total,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            in_recovery = report.in_recovery,
            collectable = report.collectable,
            "source health check"
        );
        report
    }

    /// Pure split of `statuses` into collectable and skipped ids.
    pub fn collectable_sources(
        &self,
        statuses: &[SourceStatus],
        now: DateTime<Utc>,
    ) -> CollectableSources {
        let mut out = CollectableSources {
            total: statuses.len(),
            ..Default::default()
        };
        for s in statuses {
            if self.can_collect(s, now) {
                out.collectable.push(s.source_id.clone());
            } else {
                out.skipped.push(s.source_id.clone());
            }
        }
        out
    }

    pub fn update_failure_threshold(&self, threshold: i64) -> Result<(), ConfigError> {
        let v = validate_threshold(threshold)?;
        let mut p = self.policy.write().expect("health policy lock poisoned");
        info!(from = p.failure_threshold, to = v, "updated failure threshold");
        p.failure_threshold = v;
        Ok(())
    }

    pub fn update_recovery_hours(&self, hours: i64) -> Result<(), ConfigError> {
        let v = validate_recovery_hours(hours)?;
        let mut p = self.policy.write().expect("health policy lock poisoned");
        info!(from = p.recovery_hours, to = v, "updated recovery period (hours)");
        p.recovery_hours = v;
        Ok(())
    }
}

fn detail(policy: &HealthPolicy, status: &SourceStatus, now: DateTime<Utc>) -> SourceHealth {
    let state = policy.state(status, now);
    SourceHealth {
        source_id: status.source_id.clone(),
        state,
        is_healthy: matches!(state, HealthState::Healthy),
        is_in_recovery: matches!(state, HealthState::InRecovery { .. }),
        can_collect: state.is_collectable(),
        consecutive_failures: status.consecutive_failures,
        failure_threshold: policy.failure_threshold,
        last_error: status.last_error.clone(),
        last_error_at: status.last_error_at,
        recovery_until: match state {
            HealthState::InRecovery { until } => Some(until),
            _ => None,
        },
    }
}
