// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Pipeline gates
pub mod dedup;
pub mod filter;
pub mod health;
pub mod score;

// Composition + I/O boundaries
pub mod ingest;
pub mod orchestrator;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::{SourceConfig, TriageConfig};
pub use crate::dedup::{DedupEngine, DedupOutcome, DropReason, HistoryIndex};
pub use crate::error::{ConfigError, FetchError};
pub use crate::filter::{ContentFilter, ExclusionReason, FilterOutcome};
pub use crate::health::{HealthPolicy, HealthReport, HealthState, HealthTracker};
pub use crate::ingest::{AdapterRegistry, FetchAdapter, FileFetchAdapter};
pub use crate::orchestrator::{Orchestrator, PipelineReport, RunOutcome, RunSettings};
pub use crate::score::ImportanceScorer;
pub use crate::store::{InMemoryStore, JsonFileStore, TriageStore};
pub use crate::types::{ContentItem, PublishedAt, ScoreResult, SourceStatus, SourceType};
