// src/store.rs
//! Persistence boundary for the pipeline: source health counters, the
//! append-only duplicate history and the content that survived all gates.
//!
//! The trait is synchronous; every implementation here keeps its state behind a
//! single `Mutex` so each call is atomic on its own.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::{ContentItem, DuplicateRecord, HistoryKey, SourceStatus};

pub trait TriageStore: Send + Sync {
    fn load_source_status(&self, source_id: &str) -> Result<Option<SourceStatus>>;
    fn save_source_status(&self, status: &SourceStatus) -> Result<()>;
    fn list_source_statuses(&self) -> Result<Vec<SourceStatus>>;

    /// Subset of `keys` already present in history.
    fn load_duplicate_records(&self, keys: &[HistoryKey]) -> Result<HashSet<HistoryKey>>;
    fn append_duplicate_record(&self, record: &DuplicateRecord) -> Result<()>;

    /// Stores a surviving item and returns its id (existing ids are kept).
    fn persist_content(&self, item: &ContentItem) -> Result<u64>;

    /// Stores a run's survivors together with their fingerprints and returns
    /// one id per item, in input order. On `Err` callers treat the whole
    /// batch as not stored.
    fn persist_batch(
        &self,
        batch: &[(ContentItem, DuplicateRecord)],
        _collected_at: DateTime<Utc>,
    ) -> Result<Vec<u64>> {
        batch
            .iter()
            .map(|(item, record)| {
                let id = self.persist_content(item)?;
                self.append_duplicate_record(record)?;
                Ok(id)
            })
            .collect()
    }

    fn load_recent_history(&self, since: DateTime<Utc>) -> Result<Vec<DuplicateRecord>>;

    /// Retention cleanup. Returns how many records were removed.
    fn purge_duplicate_records_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Retention cleanup for persisted items, by collection time.
    fn purge_content_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// A persisted item and when it was collected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredContent {
    collected_at: DateTime<Utc>,
    item: ContentItem,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    sources: BTreeMap<String, SourceStatus>,
    #[serde(default)]
    duplicates: Vec<DuplicateRecord>,
    #[serde(default)]
    content: Vec<StoredContent>,
    #[serde(default)]
    next_id: u64,
}

impl StoreState {
    fn matching_keys(&self, keys: &[HistoryKey]) -> HashSet<HistoryKey> {
        if keys.is_empty() {
            return HashSet::new();
        }
        let wanted: HashSet<&HistoryKey> = keys.iter().collect();
        let mut out = HashSet::new();
        for rec in &self.duplicates {
            for k in rec.keys() {
                if wanted.contains(&k) {
                    out.insert(k);
                }
            }
        }
        out
    }

    fn persist(&mut self, item: &ContentItem, collected_at: DateTime<Utc>) -> u64 {
        let id = match item.id {
            Some(id) => {
                self.next_id = self.next_id.max(id);
                id
            }
            None => {
                self.next_id += 1;
                self.next_id
            }
        };
        let mut stored = item.clone();
        stored.id = Some(id);
        self.content.push(StoredContent {
            collected_at,
            item: stored,
        });
        id
    }

    fn persist_batch(
        &mut self,
        batch: &[(ContentItem, DuplicateRecord)],
        collected_at: DateTime<Utc>,
    ) -> Vec<u64> {
        batch
            .iter()
            .map(|(item, record)| {
                let id = self.persist(item, collected_at);
                self.duplicates.push(record.clone());
                id
            })
            .collect()
    }

    fn recent(&self, since: DateTime<Utc>) -> Vec<DuplicateRecord> {
        self.duplicates
            .iter()
            .filter(|r| r.first_seen_at >= since)
            .cloned()
            .collect()
    }

    fn purge_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.duplicates.len();
        self.duplicates.retain(|r| r.first_seen_at >= cutoff);
        before - self.duplicates.len()
    }

    fn purge_content_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.content.len();
        self.content.retain(|c| c.collected_at >= cutoff);
        before - self.content.len()
    }
}

/// Process-local store; state is lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items persisted so far, in persistence order.
    pub fn content(&self) -> Vec<ContentItem> {
        let g = self.state.lock().expect("store mutex poisoned");
        g.content.iter().map(|c| c.item.clone()).collect()
    }

    pub fn duplicate_records(&self) -> Vec<DuplicateRecord> {
        self.state.lock().expect("store mutex poisoned").duplicates.clone()
    }
}

impl TriageStore for InMemoryStore {
    fn load_source_status(&self, source_id: &str) -> Result<Option<SourceStatus>> {
        let g = self.state.lock().expect("store mutex poisoned");
        Ok(g.sources.get(source_id).cloned())
    }

    fn save_source_status(&self, status: &SourceStatus) -> Result<()> {
        let mut g = self.state.lock().expect("store mutex poisoned");
        g.sources.insert(status.source_id.clone(), status.clone());
        Ok(())
    }

    fn list_source_statuses(&self) -> Result<Vec<SourceStatus>> {
        let g = self.state.lock().expect("store mutex poisoned");
        Ok(g.sources.values().cloned().collect())
    }

    fn load_duplicate_records(&self, keys: &[HistoryKey]) -> Result<HashSet<HistoryKey>> {
        let g = self.state.lock().expect("store mutex poisoned");
        Ok(g.matching_keys(keys))
    }

    fn append_duplicate_record(&self, record: &DuplicateRecord) -> Result<()> {
        let mut g = self.state.lock().expect("store mutex poisoned");
        g.duplicates.push(record.clone());
        Ok(())
    }

    fn persist_content(&self, item: &ContentItem) -> Result<u64> {
        let mut g = self.state.lock().expect("store mutex poisoned");
        Ok(g.persist(item, Utc::now()))
    }

    fn persist_batch(
        &self,
        batch: &[(ContentItem, DuplicateRecord)],
        collected_at: DateTime<Utc>,
    ) -> Result<Vec<u64>> {
        let mut g = self.state.lock().expect("store mutex poisoned");
        Ok(g.persist_batch(batch, collected_at))
    }

    fn load_recent_history(&self, since: DateTime<Utc>) -> Result<Vec<DuplicateRecord>> {
        let g = self.state.lock().expect("store mutex poisoned");
        Ok(g.recent(since))
    }

    fn purge_duplicate_records_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut g = self.state.lock().expect("store mutex poisoned");
        Ok(g.purge_before(cutoff))
    }

    fn purge_content_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut g = self.state.lock().expect("store mutex poisoned");
        Ok(g.purge_content_before(cutoff))
    }
}

/// Store backed by a single JSON state file. The file is rewritten (temp file
/// + rename) after every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parsing state file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading state file {}", path.display()))
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_state(&self, state: &StoreState) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating state dir {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state).context("serializing store state")?;
        fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing state file {}", self.path.display()))?;
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> Result<T> {
        let mut g = self.state.lock().expect("store mutex poisoned");
        // Apply to a copy so a failed write leaves memory and disk in agreement.
        let mut next = g.clone();
        let out = f(&mut next);
        self.write_state(&next)?;
        *g = next;
        Ok(out)
    }
}

impl TriageStore for JsonFileStore {
    fn load_source_status(&self, source_id: &str) -> Result<Option<SourceStatus>> {
        let g = self.state.lock().expect("store mutex poisoned");
        Ok(g.sources.get(source_id).cloned())
    }

    fn save_source_status(&self, status: &SourceStatus) -> Result<()> {
        self.mutate(|s| {
            s.sources.insert(status.source_id.clone(), status.clone());
        })
    }

    fn list_source_statuses(&self) -> Result<Vec<SourceStatus>> {
        let g = self.state.lock().expect("store mutex poisoned");
        Ok(g.sources.values().cloned().collect())
    }

    fn load_duplicate_records(&self, keys: &[HistoryKey]) -> Result<HashSet<HistoryKey>> {
        let g = self.state.lock().expect("store mutex poisoned");
        Ok(g.matching_keys(keys))
    }

    fn append_duplicate_record(&self, record: &DuplicateRecord) -> Result<()> {
        self.mutate(|s| s.duplicates.push(record.clone()))
    }

    fn persist_content(&self, item: &ContentItem) -> Result<u64> {
        self.mutate(|s| s.persist(item, Utc::now()))
    }

    /// One state-file rewrite for the whole batch.
    fn persist_batch(
        &self,
        batch: &[(ContentItem, DuplicateRecord)],
        collected_at: DateTime<Utc>,
    ) -> Result<Vec<u64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.mutate(|s| s.persist_batch(batch, collected_at))
    }

    fn load_recent_history(&self, since: DateTime<Utc>) -> Result<Vec<DuplicateRecord>> {
        let g = self.state.lock().expect("store mutex poisoned");
        Ok(g.recent(since))
    }

    fn purge_duplicate_records_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.mutate(|s| s.purge_before(cutoff))
    }

    fn purge_content_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.mutate(|s| s.purge_content_before(cutoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;
    use chrono::Duration;

    fn record(url: &str, at: DateTime<Utc>) -> DuplicateRecord {
        DuplicateRecord {
            content_hash: None,
            normalized_url: Some(url.into()),
            normalized_title: Some("t".into()),
            first_seen_at: at,
        }
    }

    #[test]
    fn duplicate_lookup_returns_only_known_keys() {
        let s = InMemoryStore::new();
        s.append_duplicate_record(&record("https://a.com/1", Utc::now()))
            .unwrap();
        let hits = s
            .load_duplicate_records(&[
                HistoryKey::Url("https://a.com/1".into()),
                HistoryKey::Url("https://a.com/2".into()),
                HistoryKey::Title("t".into()),
            ])
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&HistoryKey::Title("t".into())));
    }

    #[test]
    fn persist_assigns_increasing_ids() {
        let s = InMemoryStore::new();
        let item = ContentItem::new("n1", SourceType::Newsletter);
        assert_eq!(s.persist_content(&item).unwrap(), 1);
        assert_eq!(s.persist_content(&item).unwrap(), 2);
        assert_eq!(s.content()[1].id, Some(2));
    }

    #[test]
    fn purge_and_recent_respect_cutoff() {
        let s = InMemoryStore::new();
        let now = Utc::now();
        s.append_duplicate_record(&record("old", now - Duration::days(40)))
            .unwrap();
        s.append_duplicate_record(&record("new", now)).unwrap();
        assert_eq!(s.load_recent_history(now - Duration::days(1)).unwrap().len(), 1);
        assert_eq!(
            s.purge_duplicate_records_before(now - Duration::days(30)).unwrap(),
            1
        );
        assert_eq!(s.duplicate_records().len(), 1);
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("triage.json");

        let store = JsonFileStore::open(&path).unwrap();
        let mut st = SourceStatus::new("yt-1");
        st.consecutive_failures = 3;
        store.save_source_status(&st).unwrap();
        store
            .persist_content(&ContentItem::new("yt-1", SourceType::Video))
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        let loaded = reopened.load_source_status("yt-1").unwrap().unwrap();
        assert_eq!(loaded.consecutive_failures, 3);
        let next = reopened
            .persist_content(&ContentItem::new("yt-1", SourceType::Video))
            .unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn batch_persists_items_and_fingerprints_together() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.json");
        let now = Utc::now();
        let store = JsonFileStore::open(&path).unwrap();
        let batch = vec![
            (
                ContentItem::new("n1", SourceType::Newsletter),
                record("https://a.com/1", now),
            ),
            (
                ContentItem::new("n1", SourceType::Newsletter),
                record("https://a.com/2", now),
            ),
        ];
        assert_eq!(store.persist_batch(&batch, now).unwrap(), vec![1, 2]);
        assert!(store.persist_batch(&[], now).unwrap().is_empty());
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        let hits = reopened
            .load_duplicate_records(&[HistoryKey::Url("https://a.com/2".into())])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn content_retention_uses_collection_time() {
        let s = InMemoryStore::new();
        let now = Utc::now();
        let item = ContentItem::new("n1", SourceType::Newsletter);
        s.persist_batch(
            &[(item.clone(), record("old", now - Duration::days(40)))],
            now - Duration::days(40),
        )
        .unwrap();
        s.persist_batch(&[(item, record("new", now))], now).unwrap();

        let cutoff = now - Duration::days(30);
        assert_eq!(s.purge_content_before(cutoff).unwrap(), 1);
        assert_eq!(s.content().len(), 1);
        assert_eq!(s.content()[0].id, Some(2));
    }

    #[test]
    fn json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
    }
}
