// src/ingest/types.rs
use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::types::{ContentItem, SourceType};

/// Collects raw items for one configured source. Implementations do I/O only;
/// health tracking, filtering and dedup happen downstream.
#[async_trait::async_trait]
pub trait FetchAdapter: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<ContentItem>, FetchError>;
    fn source_type(&self) -> SourceType;
}
