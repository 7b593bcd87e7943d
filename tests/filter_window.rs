// tests/filter_window.rs
use chrono::{Duration, Utc};
use content_triage::filter::{should_include, ContentFilter, ExclusionReason, FilterSettings};
use content_triage::types::{ContentItem, PublishedAt, SourceType};

fn newsletter(days_old: i64) -> ContentItem {
    ContentItem::new("tldr", SourceType::Newsletter)
        .with_title("Weekly digest")
        .with_published_at(Utc::now() - Duration::days(days_old))
}

#[test]
fn ten_days_old_is_outside_seven_day_window() {
    let now = Utc::now();
    let item = ContentItem::new("tldr", SourceType::Newsletter)
        .with_published_at(now - Duration::days(10));
    let v = should_include(&item, 7, 0.0, None, now);
    assert!(!v.included);
    assert!(v.reasons.contains(&ExclusionReason::OutsideWindow));
}

#[test]
fn widening_the_window_readmits_items() {
    let f = ContentFilter::default();
    let now = Utc::now();
    let item = newsletter(10);
    assert!(!f.should_include(&item, now).included);
    f.update_window_days(14).unwrap();
    assert!(f.should_include(&item, now).included);

    let (cutoff, end) = f.window_dates(now);
    assert_eq!(end - cutoff, Duration::days(14));
}

#[test]
fn confidence_and_source_type_gates() {
    let f = ContentFilter::new(FilterSettings::new(7, 0.5, Some(SourceType::Video)).unwrap());
    let now = Utc::now();
    let out = f.filter_batch(
        vec![
            newsletter(1).with_confidence(0.9),
            ContentItem::new("yt", SourceType::Video)
                .with_published_at(now)
                .with_confidence(0.3),
            ContentItem::new("yt", SourceType::Video).with_published_at(now),
        ],
        now,
    );
    assert_eq!(out.kept.len(), 1);
    assert_eq!(out.kept[0].source_type, SourceType::Video);
    assert_eq!(out.exclusion_reasons["wrong_source_type"], 1);
    assert_eq!(out.exclusion_reasons["low_confidence"], 1);
    assert_eq!(out.exclusion_reasons["outside_window"], 0);
}

#[test]
fn bad_dates_never_error() {
    let f = ContentFilter::default();
    let now = Utc::now();
    let missing = ContentItem::new("n", SourceType::Newsletter);
    let garbage = ContentItem::new("n", SourceType::Newsletter)
        .with_published_at(PublishedAt::parse("next friday-ish"));
    let out = f.filter_batch(vec![missing, garbage], now);
    assert_eq!(out.total, 2);
    assert!(out.kept.is_empty());
    assert_eq!(out.exclusion_reasons["invalid_date"], 2);
    for (_, reasons) in &out.excluded {
        assert_eq!(reasons, &vec![ExclusionReason::InvalidDate]);
    }
}

#[test]
fn rejected_updates_change_nothing() {
    let f = ContentFilter::default();
    assert!(f.update_window_days(-1).is_err());
    assert!(f.update_min_confidence(-0.1).is_err());
    assert_eq!(f.settings(), FilterSettings::default());
}
