// src/filter.rs
//! Time/confidence gate. Stateless apart from its settings: every criterion is
//! checked independently and every failing one is reported.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::types::{ContentItem, PublishedAt, SourceType};

pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    OutsideWindow,
    LowConfidence,
    InvalidDate,
    WrongSourceType,
}

impl ExclusionReason {
    pub const ALL: [ExclusionReason; 4] = [
        ExclusionReason::OutsideWindow,
        ExclusionReason::LowConfidence,
        ExclusionReason::InvalidDate,
        ExclusionReason::WrongSourceType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::OutsideWindow => "outside_window",
            ExclusionReason::LowConfidence => "low_confidence",
            ExclusionReason::InvalidDate => "invalid_date",
            ExclusionReason::WrongSourceType => "wrong_source_type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inclusion {
    pub included: bool,
    pub reasons: Vec<ExclusionReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterOutcome {
    pub total: usize,
    pub kept: Vec<ContentItem>,
    pub excluded: Vec<(ContentItem, Vec<ExclusionReason>)>,
    /// Always carries every reason key, zero when unused.
    pub exclusion_reasons: BTreeMap<String, usize>,
}

fn empty_histogram() -> BTreeMap<String, usize> {
    ExclusionReason::ALL
        .iter()
        .map(|r| (r.as_str().to_string(), 0))
        .collect()
}

/// `true` only for a parsed date at or after `cutoff`. Missing and unparsable
/// dates are never within the window.
pub fn is_within_window(published_at: &PublishedAt, cutoff: DateTime<Utc>) -> bool {
    match published_at {
        PublishedAt::At(dt) => *dt >= cutoff,
        _ => false,
    }
}

pub fn cutoff_for(window_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(i64::from(window_days))
}

pub fn should_include(
    item: &ContentItem,
    window_days: u32,
    min_confidence: f64,
    source_type_filter: Option<SourceType>,
    now: DateTime<Utc>,
) -> Inclusion {
    let mut reasons = Vec::new();

    // 1) Date: unusable dates are their own reason, not "outside window"
    match &item.published_at {
        PublishedAt::At(_) => {
            if !is_within_window(&item.published_at, cutoff_for(window_days, now)) {
                reasons.push(ExclusionReason::OutsideWindow);
            }
        }
        PublishedAt::Missing | PublishedAt::Unparsable(_) => {
            reasons.push(ExclusionReason::InvalidDate);
        }
    }

    // 2) Confidence
    if item.effective_confidence() < min_confidence {
        reasons.push(ExclusionReason::LowConfidence);
    }

    // 3) Source type
    if let Some(want) = source_type_filter {
        if item.source_type != want {
            reasons.push(ExclusionReason::WrongSourceType);
        }
    }

    Inclusion {
        included: reasons.is_empty(),
        reasons,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterSettings {
    pub window_days: u32,
    pub min_confidence: f64,
    pub source_type: Option<SourceType>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            source_type: None,
        }
    }
}

impl FilterSettings {
    pub fn new(
        window_days: i64,
        min_confidence: f64,
        source_type: Option<SourceType>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            window_days: validate_window_days(window_days)?,
            min_confidence: validate_min_confidence(min_confidence)?,
            source_type,
        })
    }
}

pub(crate) fn validate_window_days(d: i64) -> Result<u32, ConfigError> {
    if d < 1 || d > i64::from(u32::MAX) {
        return Err(ConfigError::WindowDays(d));
    }
    Ok(d as u32)
}

pub(crate) fn validate_min_confidence(c: f64) -> Result<f64, ConfigError> {
    if !(0.0..=1.0).contains(&c) {
        return Err(ConfigError::MinConfidence(c));
    }
    Ok(c)
}

#[derive(Debug, Default)]
pub struct ContentFilter {
    settings: RwLock<FilterSettings>,
}

impl ContentFilter {
    pub fn new(settings: FilterSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn settings(&self) -> FilterSettings {
        *self.settings.read().expect("filter settings lock poisoned")
    }

    /// `(cutoff, now)` for the current window.
    pub fn window_dates(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (cutoff_for(self.settings().window_days, now), now)
    }

    pub fn should_include(&self, item: &ContentItem, now: DateTime<Utc>) -> Inclusion {
        let s = self.settings();
        should_include(item, s.window_days, s.min_confidence, s.source_type, now)
    }

    pub fn filter_batch(&self, items: Vec<ContentItem>, now: DateTime<Utc>) -> FilterOutcome {
        let s = self.settings();
        let total = items.len();
        let mut kept = Vec::with_capacity(total);
        let mut excluded = Vec::new();
        let mut hist = empty_histogram();

        for item in items {
            let verdict = should_include(&item, s.window_days, s.min_confidence, s.source_type, now);
            if verdict.included {
                kept.push(item);
                continue;
            }
            for r in &verdict.reasons {
                *hist.entry(r.as_str().to_string()).or_insert(0) += 1;
            }
            debug!(item = %item.log_id(), reasons = ?verdict.reasons, "item excluded");
            excluded.push((item, verdict.reasons));
        }

        info!(
            total,
            kept = kept.len(),
            excluded = excluded.len(),
            window_days = s.window_days,
            "filtered batch"
        );

        FilterOutcome {
            total,
            kept,
            excluded,
            exclusion_reasons: hist,
        }
    }

    pub fn update_window_days(&self, days: i64) -> Result<(), ConfigError> {
        let v = validate_window_days(days)?;
        let mut s = self.settings.write().expect("filter settings lock poisoned");
        info!(from = s.window_days, to = v, "updated filter window (days)");
        s.window_days = v;
        Ok(())
    }

    pub fn update_min_confidence(&self, min_confidence: f64) -> Result<(), ConfigError> {
        let v = validate_min_confidence(min_confidence)?;
        let mut s = self.settings.write().expect("filter settings lock poisoned");
        info!(from = s.min_confidence, to = v, "updated minimum confidence");
        s.min_confidence = v;
        Ok(())
    }

    pub fn set_source_type(&self, source_type: Option<SourceType>) {
        self.settings
            .write()
            .expect("filter settings lock poisoned")
            .source_type = source_type;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_aged(days: i64, now: DateTime<Utc>) -> ContentItem {
        ContentItem::new("n1", SourceType::Newsletter).with_published_at(now - Duration::days(days))
    }

    #[test]
    fn ten_day_old_item_is_outside_seven_day_window() {
        let now = Utc::now();
        let v = should_include(&item_aged(10, now), 7, 0.0, None, now);
        assert!(!v.included);
        assert_eq!(v.reasons, vec![ExclusionReason::OutsideWindow]);
    }

    #[test]
    fn all_failing_criteria_are_reported() {
        let now = Utc::now();
        let item = ContentItem::new("yt", SourceType::Video).with_confidence(0.2);
        let v = should_include(&item, 7, 0.5, Some(SourceType::Newsletter), now);
        assert_eq!(
            v.reasons,
            vec![
                ExclusionReason::InvalidDate,
                ExclusionReason::LowConfidence,
                ExclusionReason::WrongSourceType
            ]
        );
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let now = Utc::now();
        let cutoff = cutoff_for(7, now);
        assert!(is_within_window(&PublishedAt::At(cutoff), cutoff));
        assert!(!is_within_window(&PublishedAt::Missing, cutoff));
    }

    #[test]
    fn batch_histogram_has_every_key() {
        let now = Utc::now();
        let f = ContentFilter::default();
        let out = f.filter_batch(
            vec![
                item_aged(1, now),
                item_aged(30, now),
                ContentItem::new("n", SourceType::Newsletter)
                    .with_published_at(PublishedAt::Unparsable("soon".into())),
            ],
            now,
        );
        assert_eq!(out.total, 3);
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.excluded.len(), 2);
        assert_eq!(out.exclusion_reasons["outside_window"], 1);
        assert_eq!(out.exclusion_reasons["invalid_date"], 1);
        assert_eq!(out.exclusion_reasons["low_confidence"], 0);
        assert_eq!(out.exclusion_reasons["wrong_source_type"], 0);
    }

    #[test]
    fn invalid_updates_leave_settings_untouched() {
        let f = ContentFilter::default();
        assert_eq!(f.update_window_days(0), Err(ConfigError::WindowDays(0)));
        assert_eq!(
            f.update_min_confidence(1.2),
            Err(ConfigError::MinConfidence(1.2))
        );
        assert!(f.update_min_confidence(f64::NAN).is_err());
        assert_eq!(f.settings(), FilterSettings::default());
        f.update_window_days(3).unwrap();
        assert_eq!(f.settings().window_days, 3);
    }
}
