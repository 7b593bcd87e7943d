// src/score/entities.rs
//! Entity extraction from `{ label, pattern, weight }` rules.
//!
//! Patterns must compile with the `regex` crate (no lookarounds). They run
//! against lowercased text, so they are written in lowercase.

use regex::Regex;

use crate::error::ConfigError;
use crate::score::tables::EntityRule;

#[derive(Debug, Clone)]
pub struct CompiledEntity {
    pub label: String,
    pub weight: f64,
    regex: Regex,
}

impl CompiledEntity {
    pub fn compile(rule: &EntityRule) -> Result<Self, ConfigError> {
        let regex = Regex::new(&rule.pattern).map_err(|e| ConfigError::EntityPattern {
            pattern: rule.pattern.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            label: rule.label.clone(),
            weight: rule.weight,
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Non-overlapping matches in `text`, in order of appearance.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        self.regex
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

pub fn compile_all(rules: &[EntityRule]) -> Result<Vec<CompiledEntity>, ConfigError> {
    rules.iter().map(CompiledEntity::compile).collect()
}
