// src/error.rs
//! Typed errors for the two boundaries that callers branch on: configuration
//! updates (rejected, never clamped) and fetch adapters (recorded, never
//! propagated). Storage and everything else use `anyhow`.

/// Raised when a configuration value is out of range. The update that carried
/// it is rejected as a whole.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("window_days must be at least 1, got {0}")]
    WindowDays(i64),

    #[error("min_confidence must be within [0.0, 1.0], got {0}")]
    MinConfidence(f64),

    #[error("failure_threshold must be at least 1, got {0}")]
    FailureThreshold(i64),

    #[error("recovery_hours must be at least 1, got {0}")]
    RecoveryHours(i64),

    #[error("importance threshold must be within [0.0, 1.0], got {0}")]
    ImportanceThreshold(f64),

    #[error("similarity threshold must be within (0.0, 1.0], got {0}")]
    SimilarityThreshold(f64),

    #[error("max_concurrent_fetches must be at least 1, got {0}")]
    Concurrency(usize),

    #[error("target_per_source must be at least 1, got {0}")]
    TargetPerSource(i64),

    #[error("balance weights need 0 < min_weight <= max_weight, got [{min}, {max}]")]
    BalanceWeights { min: f64, max: f64 },

    #[error("max_items must be at least 1 when set")]
    MaxItems,

    #[error("entity pattern `{pattern}` does not compile: {message}")]
    EntityPattern { pattern: String, message: String },

    #[error("duplicate source id `{0}` in [[sources]]")]
    DuplicateSource(String),

    #[error("invalid value for {var}: `{value}`")]
    Env { var: &'static str, value: String },
}

/// Error returned by a fetch adapter. The orchestrator turns it into a health
/// failure signal plus a report entry.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("source not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_render_the_offending_value() {
        assert_eq!(
            ConfigError::WindowDays(-3).to_string(),
            "window_days must be at least 1, got -3"
        );
        assert!(ConfigError::MinConfidence(1.5).to_string().contains("1.5"));
    }

    #[test]
    fn fetch_error_wraps_anyhow() {
        let e: FetchError = anyhow::anyhow!("boom").into();
        assert_eq!(e.to_string(), "boom");
    }
}
