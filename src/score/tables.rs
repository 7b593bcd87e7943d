// src/score/tables.rs
//! Scoring rule tables with hot-reload from a JSON file.
//!
//! JSON shape:
//! {
//!   "positive": [{ "keyword": "announce", "weight": 2.0 }],
//!   "negative": [{ "keyword": "rumor", "weight": 0.3 }],
//!   "entities": [{ "label": "company", "pattern": "\\bopenai\\b", "weight": 1.5 }]
//! }
//!
//! Missing sections fall back to the built-in tables. Rules are evaluated in
//! file order. On each `current()` call the file mtime is checked and the
//! tables are recompiled if it changed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};

use crate::error::ConfigError;
use crate::score::entities::{compile_all, CompiledEntity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRule {
    pub label: String,
    pub pattern: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringTables {
    #[serde(default = "default_positive")]
    pub positive: Vec<KeywordRule>,
    #[serde(default = "default_negative")]
    pub negative: Vec<KeywordRule>,
    #[serde(default = "default_entities")]
    pub entities: Vec<EntityRule>,
}

impl Default for ScoringTables {
    fn default() -> Self {
        Self {
            positive: default_positive(),
            negative: default_negative(),
            entities: default_entities(),
        }
    }
}

fn kw(table: &[(&str, f64)]) -> Vec<KeywordRule> {
    table
        .iter()
        .map(|(k, w)| KeywordRule {
            keyword: (*k).to_string(),
            weight: *w,
        })
        .collect()
}

fn default_positive() -> Vec<KeywordRule> {
    kw(&[
        ("announce", 2.0),
        ("release", 1.8),
        ("launch", 1.8),
        ("breakthrough", 2.0),
        ("major", 1.5),
        ("new", 1.2),
        ("introduce", 1.5),
        ("unveil", 1.8),
        ("acquire", 1.8),
        ("acquisition", 1.8),
        ("partnership", 1.6),
        ("collaborate", 1.3),
        ("funding", 1.8),
        ("series", 1.7),
        ("investment", 1.6),
        ("first", 1.3),
        ("record", 1.4),
        ("milestone", 1.6),
        ("achievement", 1.4),
        ("innovation", 1.5),
        ("revolutionary", 1.9),
        ("game-changing", 1.9),
        ("discovery", 1.7),
        ("research", 1.2),
        ("study", 1.0),
    ])
}

fn default_negative() -> Vec<KeywordRule> {
    kw(&[
        ("opinion", 0.5),
        ("rumor", 0.3),
        ("speculation", 0.3),
        ("alleged", 0.4),
        ("claim", 0.5),
        ("report", 0.6),
        ("could", 0.7),
        ("may", 0.7),
        ("might", 0.7),
        ("possible", 0.7),
        ("subscribe", 0.2),
        ("click here", 0.2),
        ("read more", 0.3),
        ("sponsored", 0.1),
        ("advertisement", 0.1),
    ])
}

fn default_entities() -> Vec<EntityRule> {
    let rule = |label: &str, pattern: &str, weight: f64| EntityRule {
        label: label.to_string(),
        pattern: pattern.to_string(),
        weight,
    };
    vec![
        rule(
            "company",
            r"\b(?:google|microsoft|apple|amazon|meta|openai|anthropic|tesla|ibm)\b",
            1.5,
        ),
        rule("organization", r"\b[a-z][a-z]+\s+(?:inc|corp|ltd|llc|ai)\b", 0.8),
        rule(
            "money",
            r"\$\d+(?:\s*(?:million|billion|trillion|m|b|t)\b)?",
            1.0,
        ),
        rule("percentage", r"\d{1,3}(?:,\d{3})*(?:\.\d+)?%", 0.7),
    ]
}

impl ScoringTables {
    /// Lowercases keywords, drops blank ones, compiles entity patterns.
    pub fn compile(&self) -> Result<CompiledTables, ConfigError> {
        let clean = |rules: &[KeywordRule]| -> Vec<KeywordRule> {
            rules
                .iter()
                .filter(|r| !r.keyword.trim().is_empty())
                .map(|r| KeywordRule {
                    keyword: r.keyword.to_lowercase(),
                    weight: r.weight,
                })
                .collect()
        };
        Ok(CompiledTables {
            positive: clean(&self.positive),
            negative: clean(&self.negative),
            entities: compile_all(&self.entities)?,
        })
    }
}

/// Tables ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledTables {
    pub positive: Vec<KeywordRule>,
    pub negative: Vec<KeywordRule>,
    pub entities: Vec<CompiledEntity>,
}

impl CompiledTables {
    pub fn builtin() -> Self {
        // Built-in patterns are constants; a failure here is a programming error.
        ScoringTables::default()
            .compile()
            .expect("built-in scoring tables compile")
    }
}

/// Load and compile tables directly (no caching).
pub fn load_tables_file(path: &Path) -> Result<CompiledTables> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let tables: ScoringTables = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing scoring tables {}", path.display()))?;
    Ok(tables.compile()?)
}

/// Hot-reload wrapper: recompiles when the tables file mtime changes. A file
/// that fails to load keeps the previous tables in place.
#[derive(Debug)]
pub struct HotReloadTables {
    path: PathBuf,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    tables: Arc<CompiledTables>,
    last_modified: Option<SystemTime>,
}

impl HotReloadTables {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: RwLock::new(State {
                tables: Arc::new(CompiledTables::builtin()),
                last_modified: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest tables, reloading if the file changed.
    pub fn current(&self) -> Arc<CompiledTables> {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(m) => m,
            // No file: keep whatever we have.
            Err(_) => return self.inner.read().expect("tables lock poisoned").tables.clone(),
        };

        {
            let guard = self.inner.read().expect("tables lock poisoned");
            if guard.last_modified == Some(mtime) {
                return guard.tables.clone();
            }
        }

        let mut guard = self.inner.write().expect("tables lock poisoned");
        // Double-check in case of races.
        if guard.last_modified != Some(mtime) {
            match load_tables_file(&self.path) {
                Ok(t) => {
                    tracing::info!(
                        path = %self.path.display(),
                        positive = t.positive.len(),
                        negative = t.negative.len(),
                        entities = t.entities.len(),
                        "scoring tables reloaded"
                    );
                    guard.tables = Arc::new(t);
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "scoring tables reload failed, keeping previous");
                }
            }
            // Remember the mtime either way so a broken file is not re-parsed on every call.
            guard.last_modified = Some(mtime);
        }
        guard.tables.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, thread, time::Duration};

    #[test]
    fn missing_sections_use_builtin() {
        let t: ScoringTables =
            serde_json::from_str(r#"{"positive":[{"keyword":"Ship","weight":1.0}]}"#).unwrap();
        assert_eq!(t.positive.len(), 1);
        assert_eq!(t.negative, default_negative());
        let c = t.compile().unwrap();
        assert_eq!(c.positive[0].keyword, "ship");
        assert_eq!(c.entities.len(), 4);
    }

    #[test]
    fn loads_and_hot_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.json");

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"positive":[{{"keyword":"ship","weight":1.0}}]}}"#).unwrap();
            f.sync_all().unwrap();
        }

        let hot = HotReloadTables::new(&path);
        assert_eq!(hot.current().positive[0].keyword, "ship");

        // Ensure a different mtime on coarse filesystems.
        thread::sleep(Duration::from_millis(1100));

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"positive":[{{"keyword":"merge","weight":2.0}}]}}"#).unwrap();
            f.sync_all().unwrap();
        }
        assert_eq!(hot.current().positive[0].keyword, "merge");

        thread::sleep(Duration::from_millis(1100));
        fs::write(&path, "{ broken").unwrap();
        assert_eq!(hot.current().positive[0].keyword, "merge");
    }

    #[test]
    fn no_file_means_builtin() {
        let hot = HotReloadTables::new("__no_such_tables__.json");
        assert_eq!(hot.current().positive.len(), default_positive().len());
    }
}
