// src/types.rs
//! Records that flow through the triage pipeline.
//!
//! Missing or malformed fields are explicit states here (`Option`,
//! [`PublishedAt`]) so the gates can turn them into documented defaults or
//! exclusion reasons instead of failing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::text;

/// Kind of origin an item was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Newsletter,
    #[serde(alias = "youtube")]
    Video,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Newsletter => "newsletter",
            SourceType::Video => "video",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publication timestamp as delivered by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublishedAt {
    #[default]
    Missing,
    /// Raw value that none of the accepted formats could read.
    Unparsable(String),
    At(DateTime<Utc>),
}

impl PublishedAt {
    /// Parse a raw timestamp. Tries RFC 3339, RFC 2822, then the two naive
    /// formats feeds commonly emit (read as UTC). Never fails.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() {
            return PublishedAt::Missing;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return PublishedAt::At(dt.with_timezone(&Utc));
        }
        if let Some(dt) = parse_rfc2822(s) {
            return PublishedAt::At(dt);
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return PublishedAt::At(Utc.from_utc_datetime(&naive));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return PublishedAt::At(Utc.from_utc_datetime(&naive));
        }
        if let Some(naive) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return PublishedAt::At(Utc.from_utc_datetime(&naive));
        }
        PublishedAt::Unparsable(s.to_string())
    }

    pub fn from_unix(secs: i64) -> Self {
        match Utc.timestamp_opt(secs, 0).single() {
            Some(dt) => PublishedAt::At(dt),
            None => PublishedAt::Unparsable(secs.to_string()),
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            PublishedAt::At(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl From<DateTime<Utc>> for PublishedAt {
    fn from(dt: DateTime<Utc>) -> Self {
        PublishedAt::At(dt)
    }
}

fn parse_rfc2822(s: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(s, &Rfc2822).ok()?;
    Utc.timestamp_opt(odt.unix_timestamp(), odt.nanosecond())
        .single()
}

impl Serialize for PublishedAt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PublishedAt::Missing => serializer.serialize_none(),
            PublishedAt::Unparsable(raw) => serializer.serialize_str(raw),
            PublishedAt::At(dt) => serializer.serialize_str(&dt.to_rfc3339()),
        }
    }
}

impl<'de> Deserialize<'de> for PublishedAt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unix(i64),
            Other(serde_json::Value),
        }
        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => PublishedAt::Missing,
            Some(Raw::Text(s)) => PublishedAt::parse(&s),
            Some(Raw::Unix(secs)) => PublishedAt::from_unix(secs),
            Some(Raw::Other(v)) => PublishedAt::Unparsable(v.to_string()),
        })
    }
}

/// Accepts a number, a numeric string, or anything else (which degrades to
/// `None` and therefore to the default confidence).
fn lenient_confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let v = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match v {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Confidence assumed when an adapter gives none.
pub const DEFAULT_CONFIDENCE: f64 = 1.0;

/// The unit flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Assigned by storage on first persistence.
    #[serde(default)]
    pub id: Option<u64>,
    pub source_id: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: PublishedAt,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: Option<f64>,
}

impl ContentItem {
    pub fn new(source_id: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id: None,
            source_id: source_id.into(),
            source_type,
            title: None,
            body: None,
            url: None,
            published_at: PublishedAt::Missing,
            confidence: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_published_at(mut self, published_at: impl Into<PublishedAt>) -> Self {
        self.published_at = published_at.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Confidence used by the filter: absent, non-finite or out-of-range
    /// (outside [0, 1]) values fall back to [`DEFAULT_CONFIDENCE`].
    pub fn effective_confidence(&self) -> f64 {
        match self.confidence {
            Some(c) if (0.0..=1.0).contains(&c) => c,
            _ => DEFAULT_CONFIDENCE,
        }
    }

    pub fn normalized_url(&self) -> Option<String> {
        self.url.as_deref().and_then(text::normalize_url)
    }

    pub fn normalized_title(&self) -> Option<String> {
        self.title.as_deref().and_then(text::normalize_title)
    }

    /// Stable digest over the normalized body; `None` when there is no body text.
    pub fn content_hash(&self) -> Option<String> {
        self.body.as_deref().and_then(text::content_hash)
    }

    /// Short anonymized id for logs (never log raw text).
    pub fn log_id(&self) -> String {
        let seed = format!(
            "{}|{}|{}",
            self.source_id,
            self.url.as_deref().unwrap_or_default(),
            self.title.as_deref().unwrap_or_default()
        );
        text::anon_hash(&seed)
    }
}

/// Per-source health counters. Mutated only by the health tracker's success
/// and failure signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: String,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
}

impl SourceStatus {
    /// Status of a never-seen source: healthy, no failures.
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            consecutive_failures: 0,
            last_error: None,
            last_error_at: None,
            last_success_at: None,
        }
    }
}

/// One identity signal used to look an item up in history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HistoryKey {
    Url(String),
    Title(String),
    Hash(String),
}

/// Historical fingerprint of an item that made it through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub content_hash: Option<String>,
    pub normalized_url: Option<String>,
    pub normalized_title: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

impl DuplicateRecord {
    pub fn from_item(item: &ContentItem, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            content_hash: item.content_hash(),
            normalized_url: item.normalized_url(),
            normalized_title: item.normalized_title(),
            first_seen_at,
        }
    }

    pub fn keys(&self) -> Vec<HistoryKey> {
        let mut out = Vec::with_capacity(3);
        if let Some(u) = &self.normalized_url {
            out.push(HistoryKey::Url(u.clone()));
        }
        if let Some(t) = &self.normalized_title {
            out.push(HistoryKey::Title(t.clone()));
        }
        if let Some(h) = &self.content_hash {
            out.push(HistoryKey::Hash(h.clone()));
        }
        out
    }
}

/// Output of the importance scorer for one item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub matched_keywords: BTreeSet<String>,
    pub matched_entities: BTreeSet<String>,
    /// Every contributing factor, in evaluation order.
    pub reasons: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn published_at_accepts_common_formats() {
        let rfc3339 = PublishedAt::parse("2024-05-01T10:00:00+02:00");
        assert_eq!(rfc3339.datetime().unwrap().hour(), 8);

        let rfc2822 = PublishedAt::parse("Wed, 01 May 2024 10:00:00 GMT");
        assert_eq!(rfc2822.datetime().unwrap().day(), 1);

        let naive = PublishedAt::parse("2024-05-01 10:00:00");
        assert_eq!(naive.datetime().unwrap().hour(), 10);

        let date_only = PublishedAt::parse("2024-05-01");
        assert_eq!(date_only.datetime().unwrap().month(), 5);
    }

    #[test]
    fn published_at_keeps_garbage_as_distinct_state() {
        assert_eq!(
            PublishedAt::parse("last tuesday"),
            PublishedAt::Unparsable("last tuesday".into())
        );
        assert_eq!(PublishedAt::parse("   "), PublishedAt::Missing);
    }

    #[test]
    fn item_deserializes_leniently() {
        let json = r#"{
            "source_id": "yt-1",
            "source_type": "youtube",
            "title": "Hello",
            "published_at": 1700000000,
            "confidence": "not a number"
        }"#;
        let item: ContentItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.source_type, SourceType::Video);
        assert!(item.published_at.datetime().is_some());
        assert_eq!(item.confidence, None);
        assert_eq!(item.effective_confidence(), 1.0);
        assert!(item.id.is_none());
    }

    #[test]
    fn numeric_string_confidence_is_read() {
        let json = r#"{"source_id":"n","source_type":"newsletter","confidence":"0.4"}"#;
        let item: ContentItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.confidence, Some(0.4));
        assert_eq!(item.published_at, PublishedAt::Missing);
    }

    #[test]
    fn nan_confidence_falls_back_to_default() {
        let item = ContentItem::new("s", SourceType::Newsletter).with_confidence(f64::NAN);
        assert_eq!(item.effective_confidence(), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn out_of_range_confidence_falls_back_to_default() {
        let high = ContentItem::new("s", SourceType::Newsletter).with_confidence(5.0);
        let low = ContentItem::new("s", SourceType::Newsletter).with_confidence(-1.0);
        let edge = ContentItem::new("s", SourceType::Newsletter).with_confidence(0.0);
        assert_eq!(high.effective_confidence(), DEFAULT_CONFIDENCE);
        assert_eq!(low.effective_confidence(), DEFAULT_CONFIDENCE);
        assert_eq!(edge.effective_confidence(), 0.0);
    }

    #[test]
    fn duplicate_record_keys_skip_missing_signals() {
        let item = ContentItem::new("s", SourceType::Newsletter).with_url("https://A.com/x/");
        let rec = DuplicateRecord::from_item(&item, Utc::now());
        assert_eq!(rec.keys(), vec![HistoryKey::Url("https://a.com/x".into())]);
    }
}
