// src/ingest/file.rs
//! Fixture adapter: reads `<dir>/<source_id>.json`.
//!
//! Accepted shapes are a bare array of items or `{ "items": [...] }`. Items may
//! omit `source_id` / `source_type`; the configured source fills them in.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::FetchError;
use crate::ingest::types::FetchAdapter;
use crate::types::{ContentItem, SourceType};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FixtureDoc {
    List(Vec<Value>),
    Wrapped { items: Vec<Value> },
}

#[derive(Debug, Clone)]
pub struct FileFetchAdapter {
    dir: PathBuf,
    source_type: SourceType,
}

impl FileFetchAdapter {
    pub fn new(dir: impl Into<PathBuf>, source_type: SourceType) -> Self {
        Self {
            dir: dir.into(),
            source_type,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, source: &SourceConfig) -> PathBuf {
        self.dir.join(format!("{}.json", source.id))
    }
}

/// Parse a fixture document for `source`. Only an unreadable document is an
/// error; items that are not objects or do not deserialize are skipped.
pub fn parse_fixture(raw: &str, source: &SourceConfig) -> Result<Vec<ContentItem>, FetchError> {
    let doc: FixtureDoc =
        serde_json::from_str(raw).map_err(|e| FetchError::Parse(e.to_string()))?;
    let values = match doc {
        FixtureDoc::List(v) | FixtureDoc::Wrapped { items: v } => v,
    };

    let total = values.len();
    let items: Vec<ContentItem> = values
        .into_iter()
        .enumerate()
        .filter_map(|(i, mut v)| {
            let Value::Object(map) = &mut v else {
                warn!(source_id = %source.id, index = i, "skipping non-object fixture item");
                return None;
            };
            map.entry("source_id")
                .or_insert_with(|| Value::String(source.id.clone()));
            map.entry("source_type")
                .or_insert_with(|| Value::String(source.source_type.as_str().to_string()));
            match serde_json::from_value::<ContentItem>(v) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(source_id = %source.id, index = i, error = %e, "skipping malformed fixture item");
                    None
                }
            }
        })
        .collect();
    if items.len() < total {
        debug!(source_id = %source.id, kept = items.len(), skipped = total - items.len(), "fixture items skipped");
    }
    Ok(items)
}

#[async_trait::async_trait]
impl FetchAdapter for FileFetchAdapter {
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<ContentItem>, FetchError> {
        let path = self.path_for(source);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("reading fixture {}", path.display()))
                    .into())
            }
        };
        let items = parse_fixture(&raw, source)?;
        debug!(source_id = %source.id, items = items.len(), path = %path.display(), "fixture loaded");
        Ok(items)
    }

    fn source_type(&self) -> SourceType {
        self.source_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_missing_source_fields() {
        let src = SourceConfig::new("tldr", SourceType::Newsletter);
        let items = parse_fixture(r#"[{"title":"A"},{"title":"B","source_id":"other"}]"#, &src).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_id, "tldr");
        assert_eq!(items[1].source_id, "other");
        assert_eq!(items[0].source_type, SourceType::Newsletter);
    }

    #[test]
    fn accepts_wrapped_items() {
        let src = SourceConfig::new("yt", SourceType::Video);
        let items = parse_fixture(r#"{"items":[{"title":"clip"}]}"#, &src).unwrap();
        assert_eq!(items[0].source_type, SourceType::Video);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let src = SourceConfig::new("yt", SourceType::Video);
        assert!(matches!(parse_fixture("<rss/>", &src), Err(FetchError::Parse(_))));
    }

    #[test]
    fn malformed_items_are_skipped_not_fatal() {
        let src = SourceConfig::new("tldr", SourceType::Newsletter);
        let items = parse_fixture(
            r#"[{"title":"Good"}, 42, {"title":5}, "text", {"title":"Also good","url":"https://a.io/x"}]"#,
            &src,
        )
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title.as_deref(), Some("Good"));
        assert_eq!(items[1].title.as_deref(), Some("Also good"));
    }

    #[test]
    fn only_bad_items_is_an_empty_fetch() {
        let src = SourceConfig::new("tldr", SourceType::Newsletter);
        let items = parse_fixture(r#"{"items":[null, [1, 2]]}"#, &src).unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileFetchAdapter::new(dir.path(), SourceType::Newsletter);
        let err = a
            .fetch(&SourceConfig::new("nope", SourceType::Newsletter))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }
}
