// src/ingest/mod.rs
pub mod file;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

pub use self::file::FileFetchAdapter;
pub use self::types::FetchAdapter;
use crate::types::SourceType;

/// Fetch adapters keyed by the source type they serve.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceType, Arc<dyn FetchAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` for its own `source_type()`, replacing any previous one.
    pub fn register(mut self, adapter: Arc<dyn FetchAdapter>) -> Self {
        self.adapters.insert(adapter.source_type(), adapter);
        self
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn FetchAdapter>> {
        self.adapters.get(&source_type).cloned()
    }

    /// File adapters for every source type, all reading from `dir`.
    pub fn from_fixture_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        let dir = dir.into();
        Self::new()
            .register(Arc::new(FileFetchAdapter::new(dir.clone(), SourceType::Newsletter)))
            .register(Arc::new(FileFetchAdapter::new(dir, SourceType::Video)))
    }
}
