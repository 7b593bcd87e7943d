// src/score/balance.rs
//! Per-source balancing of ranked survivors.
//!
//! Each source gets an inverse weight `target_per_source / max(1, count)`,
//! clamped to `[min_weight, max_weight]`, so one prolific source cannot fill
//! a capped selection. The selection takes items round-robin across sources
//! (heaviest source first, each source's items in rank order) and hands back
//! indices in rank order.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::error::ConfigError;

pub const DEFAULT_TARGET_PER_SOURCE: u32 = 5;
pub const DEFAULT_MIN_WEIGHT: f64 = 0.1;
pub const DEFAULT_MAX_WEIGHT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BalancePolicy {
    pub target_per_source: u32,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for BalancePolicy {
    fn default() -> Self {
        Self {
            target_per_source: DEFAULT_TARGET_PER_SOURCE,
            min_weight: DEFAULT_MIN_WEIGHT,
            max_weight: DEFAULT_MAX_WEIGHT,
        }
    }
}

impl BalancePolicy {
    pub fn new(target_per_source: i64, min_weight: f64, max_weight: f64) -> Result<Self, ConfigError> {
        let target_per_source = u32::try_from(target_per_source)
            .ok()
            .filter(|t| *t >= 1)
            .ok_or(ConfigError::TargetPerSource(target_per_source))?;
        let valid = min_weight.is_finite()
            && max_weight.is_finite()
            && min_weight > 0.0
            && min_weight <= max_weight;
        if !valid {
            return Err(ConfigError::BalanceWeights {
                min: min_weight,
                max: max_weight,
            });
        }
        Ok(Self {
            target_per_source,
            min_weight,
            max_weight,
        })
    }

    /// Inverse weight for a source contributing `count` items.
    pub fn weight_for(&self, count: usize) -> f64 {
        let base = f64::from(self.target_per_source) / count.max(1) as f64;
        base.clamp(self.min_weight, self.max_weight)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceWeight {
    pub content_count: usize,
    pub weight: f64,
}

pub fn source_weights<'a>(
    source_ids: impl IntoIterator<Item = &'a str>,
    policy: &BalancePolicy,
) -> BTreeMap<String, SourceWeight> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for id in source_ids {
        *counts.entry(id.to_string()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(id, n)| {
            (
                id,
                SourceWeight {
                    content_count: n,
                    weight: policy.weight_for(n),
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Selection {
    /// Positions in the ranked input, ascending.
    pub indices: Vec<usize>,
    pub distribution: BTreeMap<String, usize>,
    pub sources_represented: usize,
    /// Selected share of `target_count`, in percent.
    pub coverage: f64,
}

/// Picks up to `target_count` of `ranked_sources` (one source id per ranked
/// item) spread across sources.
pub fn balanced_selection(
    ranked_sources: &[&str],
    target_count: usize,
    weights: &BTreeMap<String, SourceWeight>,
) -> Selection {
    if target_count == 0 || ranked_sources.is_empty() {
        return Selection::default();
    }

    // Sources in order of their best-ranked item
    let mut queues: Vec<(&str, VecDeque<usize>)> = Vec::new();
    for (i, source) in ranked_sources.iter().enumerate() {
        match queues.iter_mut().find(|(id, _)| *id == *source) {
            Some((_, q)) => q.push_back(i),
            None => queues.push((*source, VecDeque::from([i]))),
        }
    }
    let weight = |id: &str| weights.get(id).map_or(1.0, |w| w.weight);
    // Stable: equal weights keep best-rank order.
    queues.sort_by(|a, b| weight(b.0).total_cmp(&weight(a.0)));

    let mut picked = Vec::with_capacity(target_count.min(ranked_sources.len()));
    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    'rounds: loop {
        let mut progressed = false;
        for (id, q) in queues.iter_mut() {
            if picked.len() >= target_count {
                break 'rounds;
            }
            if let Some(i) = q.pop_front() {
                picked.push(i);
                *distribution.entry((*id).to_string()).or_default() += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    picked.sort_unstable();

    Selection {
        coverage: picked.len() as f64 / target_count as f64 * 100.0,
        sources_represented: distribution.len(),
        indices: picked,
        distribution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_inverse_and_clamped() {
        let p = BalancePolicy::default();
        assert_eq!(p.weight_for(0), 5.0);
        assert_eq!(p.weight_for(1), 5.0);
        assert_eq!(p.weight_for(10), 0.5);
        assert_eq!(p.weight_for(1000), 0.1);

        let w = source_weights(["a", "a", "b"], &p);
        assert_eq!(w["a"].content_count, 2);
        assert_eq!(w["a"].weight, 2.5);
        assert_eq!(w["b"].weight, 5.0);
    }

    #[test]
    fn invalid_policy_is_rejected() {
        assert_eq!(
            BalancePolicy::new(0, 0.1, 5.0),
            Err(ConfigError::TargetPerSource(0))
        );
        assert!(BalancePolicy::new(5, 0.0, 5.0).is_err());
        assert!(BalancePolicy::new(5, 2.0, 1.0).is_err());
        assert!(BalancePolicy::new(5, 0.5, 0.5).is_ok());
    }

    #[test]
    fn prolific_source_does_not_crowd_out_others() {
        let ranked = ["big", "big", "big", "big", "small", "other"];
        let w = source_weights(ranked.iter().copied(), &BalancePolicy::default());
        let sel = balanced_selection(&ranked, 3, &w);
        assert_eq!(sel.indices, vec![0, 4, 5]);
        assert_eq!(sel.sources_represented, 3);
        assert_eq!(sel.distribution["big"], 1);
        assert_eq!(sel.coverage, 100.0);
    }

    #[test]
    fn short_supply_reports_partial_coverage() {
        let ranked = ["a", "b"];
        let w = source_weights(ranked.iter().copied(), &BalancePolicy::default());
        let sel = balanced_selection(&ranked, 4, &w);
        assert_eq!(sel.indices, vec![0, 1]);
        assert_eq!(sel.coverage, 50.0);
        assert_eq!(balanced_selection(&[], 4, &w), Selection::default());
    }
}
