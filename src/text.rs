// src/text.rs
//! Text normalization shared by the dedup engine and the scorer:
//! body cleanup, URL/title identity forms, content digests and token sets.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use url::Url;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").expect("token regex"));

/// Normalize free text: decode HTML entities, strip tags, fold typographic
/// quotes to ASCII, collapse whitespace and trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    let out = RE_TAGS.replace_all(&out, " ");

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    let out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// Identity form of a URL: lowercase scheme and host, no query, no fragment,
/// no trailing slash. Unparseable input falls back to a lowercased string cut
/// at the first `?` or `#`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let out = match Url::parse(s) {
        Ok(mut u) if u.has_host() => {
            u.set_query(None);
            u.set_fragment(None);
            u.to_string()
        }
        _ => {
            let cut = s.find(['?', '#']).map(|i| &s[..i]).unwrap_or(s);
            cut.to_lowercase()
        }
    };

    let out = out.trim_end_matches('/');
    if out.is_empty() {
        None
    } else {
        Some(out.to_string())
    }
}

/// Identity form of a title: lowercase, punctuation removed, whitespace
/// collapsed. `"AI Launches!"` and `"ai   launches"` both become `"ai launches"`.
pub fn normalize_title(raw: &str) -> Option<String> {
    let decoded = html_escape::decode_html_entities(raw);
    let stripped: String = decoded
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    let out = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Body text in the form that is hashed and tokenized.
pub fn normalize_body(raw: &str) -> String {
    normalize_text(raw).to_lowercase()
}

/// SHA-256 hex digest of the normalized body; `None` for blank bodies.
pub fn content_hash(body: &str) -> Option<String> {
    let norm = normalize_body(body);
    if norm.is_empty() {
        return None;
    }
    let digest = Sha256::digest(norm.as_bytes());
    Some(to_hex(&digest))
}

/// Short, anonymized id (first 6 bytes of SHA-256) for log lines.
pub fn anon_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    to_hex(&digest[..6])
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Distinct word tokens of the normalized body.
pub fn token_set(body: &str) -> HashSet<String> {
    let norm = normalize_body(body);
    RE_TOKEN
        .find_iter(&norm)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Number of whitespace-separated words.
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Jaccard index |A ∩ B| / |A ∪ B|. Empty sets never match anything.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}
