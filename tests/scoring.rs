// tests/scoring.rs
use chrono::{Duration, Utc};
use content_triage::score::{score_statistics, ImportanceScorer};
use content_triage::types::{ContentItem, SourceType};
use rand::{rngs::StdRng, seq::IndexedRandom, Rng, SeedableRng};

#[test]
fn openai_announcement_is_major() {
    let scorer = ImportanceScorer::default();
    let item = ContentItem::new("tldr", SourceType::Newsletter)
        .with_body("OpenAI announces breakthrough model, $10 billion valuation");
    let r = scorer.score(&item);

    assert!(r.score > 0.5, "score was {}", r.score);
    assert!(r.matched_keywords.contains("announce"));
    assert!(r.matched_keywords.contains("breakthrough"));
    assert!(r.matched_entities.contains("$10 billion"));
    assert!(r.matched_entities.contains("openai"));
    assert!(scorer.is_major(&item, None));
    // Every factor leaves a reason: short body, two keywords, two entity kinds.
    assert_eq!(r.reasons.len(), 5, "{:?}", r.reasons);
}

#[test]
fn long_fresh_body_outranks_short_stale_one() {
    let scorer = ImportanceScorer::default();
    let now = Utc::now();
    let long_body = "engineers described the system in detail ".repeat(1000);
    let long = ContentItem::new("yt", SourceType::Video)
        .with_title("Deep dive")
        .with_body(long_body)
        .with_published_at(now - Duration::hours(3));
    let short = ContentItem::new("yt", SourceType::Video)
        .with_title("Deep dive")
        .with_published_at(now - Duration::days(5));
    let a = scorer.score_at(&long, now);
    let b = scorer.score_at(&short, now);
    assert!(a.score > b.score);
    assert!(a.reasons.iter().any(|r| r.starts_with("long content")));
    assert!(a.reasons.iter().any(|r| r.starts_with("very recent")));
}

#[test]
fn random_text_always_scores_within_unit_interval() {
    let vocab = [
        "announce", "launch", "rumor", "may", "click here", "openai", "$5 billion", "12%",
        "acme inc", "the", "model", "sponsored", "record", "game-changing", "might", "ÄÖÜ", "🚀",
        "<b>", "&amp;", "subscribe",
    ];
    let mut rng = StdRng::seed_from_u64(42);
    let scorer = ImportanceScorer::default();
    let now = Utc::now();

    for _ in 0..300 {
        let title_len = rng.random_range(0..12);
        let body_len = rng.random_range(0..400);
        let title: Vec<&str> = (0..title_len)
            .map(|_| *vocab.choose(&mut rng).unwrap())
            .collect();
        let body: Vec<&str> = (0..body_len)
            .map(|_| *vocab.choose(&mut rng).unwrap())
            .collect();
        let mut item = ContentItem::new("rand", SourceType::Newsletter)
            .with_title(title.join(" "))
            .with_body(body.join(" "));
        if rng.random_bool(0.5) {
            item = item.with_published_at(now - Duration::hours(rng.random_range(-48..400)));
        }
        let r = scorer.score_at(&item, now);
        assert!((0.0..=1.0).contains(&r.score), "out of range: {}", r.score);
    }
}

#[test]
fn tables_file_is_followed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scoring_tables.json");
    std::fs::write(
        &path,
        r#"{"positive":[{"keyword":"rustacean","weight":3.0}],"negative":[],"entities":[]}"#,
    )
    .unwrap();

    let scorer = ImportanceScorer::with_tables_file(0.5, &path).unwrap();
    let item = ContentItem::new("n", SourceType::Newsletter).with_title("Rustacean announce");
    let r = scorer.score(&item);
    assert!(r.matched_keywords.contains("rustacean"));
    assert!(!r.matched_keywords.contains("announce"));
}

#[test]
fn statistics_over_a_batch() {
    let scorer = ImportanceScorer::default();
    let results: Vec<_> = [
        "OpenAI announces breakthrough model",
        "Weekly roundup",
        "New release: record funding round",
    ]
    .iter()
    .map(|t| scorer.score(&ContentItem::new("n", SourceType::Newsletter).with_title(*t)))
    .collect();
    let stats = score_statistics(&results);
    assert_eq!(stats.count, 3);
    assert!(stats.min <= stats.median && stats.median <= stats.max);
    assert_eq!(stats.distribution.values().sum::<usize>(), 3);
    assert!(!stats.top_keywords.is_empty());
}
