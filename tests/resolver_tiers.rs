/// Integration tests for the tiered source resolver.
///
/// Each test drives `SourceResolver` against a scripted pollen feed and a
/// temporary cache directory, and checks which tier answered.
///
/// Run with: cargo test --test resolver_tiers

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

use common::{Reply, ScriptedPollenFeed, key, pollen_csv, resolver, tokyo_baseline};
use pollen_service::ingest::baseline::StaticBaseline;
use pollen_service::model::{DailyEntry, DateKey, Provenance, Resolution};

fn disk_entry(code: &str, region: &str, day: DateKey, pollen: f64) -> DailyEntry {
    DailyEntry {
        citycode: code.to_string(),
        region_id: Some(region.to_string()),
        pollen,
        date: format!("{}T00:00:00+09:00", day.iso()),
        source_date: day,
        provenance: Provenance::Live,
        raw: BTreeMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Disk and stale tiers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disk_cache_served_verbatim_when_live_disabled() {
    let dir = TempDir::new().unwrap();
    let feed = Arc::new(ScriptedPollenFeed::new());
    let resolver = resolver(dir.path(), feed.clone(), StaticBaseline::empty(), false);
    let day = key("20240310");

    let stored = vec![
        disk_entry("13101", "tokyo", day, 12.0),
        disk_entry("27128", "osaka", day, 3.5),
    ];
    resolver.store().write(day, &stored).await.unwrap();

    let resolved = resolver.resolve_date(day, false).await;
    assert_eq!(resolved.resolution, Resolution::DiskHit);
    assert_eq!(feed.calls(), 0);
    for entry in &stored {
        assert_eq!(resolved.record.get(&entry.citycode).map(|e| e.as_ref()), Some(entry));
    }
    assert_eq!(resolved.record.get("osaka").map(|e| e.pollen), Some(3.5));
}

#[tokio::test]
async fn test_stale_fallback_prefers_later_date_on_tie() {
    let dir = TempDir::new().unwrap();
    let resolver = resolver(
        dir.path(),
        Arc::new(ScriptedPollenFeed::new()),
        StaticBaseline::empty(),
        false,
    );
    let day = key("20240310");
    let before = day.offset_days(-2);
    let after = day.offset_days(2);

    resolver.store().write(before, &[disk_entry("13101", "tokyo", before, 5.0)]).await.unwrap();
    resolver.store().write(after, &[disk_entry("13101", "tokyo", after, 9.0)]).await.unwrap();

    let resolved = resolver.resolve_date(day, false).await;
    assert_eq!(resolved.resolution, Resolution::StaleFallback);
    assert_eq!(resolved.record.source_key, after);
    assert_eq!(resolved.record.date, day);

    let tokyo = resolved.record.get("tokyo").unwrap();
    assert_eq!(tokyo.pollen, 9.0);
    assert_eq!(tokyo.provenance, Provenance::Stale);

    // Stale data is never written under the requested date.
    assert!(!resolver.store().exists(day).await);
}

#[tokio::test]
async fn test_nothing_anywhere_yields_empty_record() {
    let dir = TempDir::new().unwrap();
    let resolver = resolver(
        dir.path(),
        Arc::new(ScriptedPollenFeed::new()),
        StaticBaseline::empty(),
        true,
    );

    let resolved = resolver.resolve(["tokyo", "osaka"], key("20240310"), false).await;
    assert!(resolved.is_empty());
}

// ---------------------------------------------------------------------------
// Live tier
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_repeated_resolution_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let day = key("20240310");
    let feed = Arc::new(
        ScriptedPollenFeed::new()
            .reply(
                "13101",
                day,
                Reply::Csv(pollen_csv("13101", day, 37.0)),
            )
            .reply("27128", day, Reply::Csv(pollen_csv("27128", day, 4.0))),
    );
    let resolver = resolver(dir.path(), feed.clone(), StaticBaseline::empty(), true);

    let first = resolver.resolve_date(day, false).await;
    let calls = feed.calls();
    let second = resolver.resolve_date(day, false).await;

    assert_eq!(first.resolution, Resolution::LiveFetched);
    assert_eq!(second.resolution, Resolution::MemoryHit);
    assert_eq!(feed.calls(), calls);
    assert_eq!(*first.record, *second.record);

    // Reloading from disk gives the same content.
    resolver.evict(day);
    let third = resolver.resolve_date(day, false).await;
    assert_eq!(third.resolution, Resolution::DiskHit);
    assert_eq!(third.record.get("tokyo"), first.record.get("tokyo"));
    assert_eq!(third.record.get("osaka"), first.record.get("osaka"));
}

#[tokio::test]
async fn test_aliases_share_one_entry() {
    let dir = TempDir::new().unwrap();
    let day = key("20240310");
    let feed = Arc::new(
        ScriptedPollenFeed::new().reply("13101", day, Reply::Csv(pollen_csv("13101", day, 37.0))),
    );
    let resolver = resolver(dir.path(), feed, StaticBaseline::empty(), true);

    let aliases = ["13101", "130010", "441321000", "44132", "tokyo"];
    let resolved = resolver.resolve(aliases, day, false).await;
    assert_eq!(resolved.len(), aliases.len());

    let first = &resolved["tokyo"];
    for alias in aliases {
        assert!(Arc::ptr_eq(first, &resolved[alias]), "alias {} diverged", alias);
    }
}

#[tokio::test]
async fn test_lookback_reaches_earlier_day() {
    let dir = TempDir::new().unwrap();
    let day = key("20240310");
    let earlier = day.offset_days(-2);
    let feed = Arc::new(
        ScriptedPollenFeed::new().reply("13101", earlier, Reply::Csv(pollen_csv("13101", earlier, 21.0))),
    );
    let resolver = resolver(dir.path(), feed, StaticBaseline::empty(), true);

    let resolved = resolver.resolve(["tokyo"], day, false).await;
    let tokyo = &resolved["tokyo"];
    assert_eq!(tokyo.source_date, earlier);
    assert_eq!(tokyo.pollen, 21.0);
    assert_eq!(tokyo.provenance, Provenance::Live);
}

#[tokio::test]
async fn test_one_failing_source_does_not_block_siblings() {
    let dir = TempDir::new().unwrap();
    let day = key("20240310");
    let feed = Arc::new(
        ScriptedPollenFeed::new()
            .reply_any_day("13101", Reply::Timeout)
            .reply("27128", day, Reply::Csv(pollen_csv("27128", day, 8.0))),
    );
    let resolver = resolver(dir.path(), feed, StaticBaseline::empty(), true);

    let resolved = resolver.resolve(["osaka", "tokyo"], day, false).await;
    assert_eq!(resolved.get("osaka").map(|e| e.pollen), Some(8.0));
    assert!(!resolved.contains_key("tokyo"));
}

#[tokio::test]
async fn test_raw_captures_removed_after_live_write() {
    let dir = TempDir::new().unwrap();
    let day = key("20240310");
    let feed = Arc::new(
        ScriptedPollenFeed::new().reply("13101", day, Reply::Csv(pollen_csv("13101", day, 37.0))),
    );
    let resolver = resolver(dir.path(), feed, StaticBaseline::empty(), true);

    resolver.resolve_date(day, false).await;
    assert!(resolver.store().exists(day).await);
    assert!(!resolver.store().raw_dir(day).exists());
}

// ---------------------------------------------------------------------------
// Static tier
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_static_baseline_used_when_feed_is_down() {
    let dir = TempDir::new().unwrap();
    let feed = Arc::new(ScriptedPollenFeed::new().reply_any_day("13101", Reply::Timeout));
    let resolver = resolver(dir.path(), feed, tokyo_baseline(42.0), true);
    let day = key("20240310");

    let resolved = resolver.resolve_date(day, false).await;
    assert_eq!(resolved.resolution, Resolution::StaticFallback);
    let tokyo = resolved.record.get("tokyo").unwrap();
    assert_eq!(tokyo.pollen, 42.0);
    assert_eq!(tokyo.provenance, Provenance::Static);
    assert!(resolver.store().exists(day).await);
}

#[tokio::test]
async fn test_every_reading_is_non_negative() {
    let dir = TempDir::new().unwrap();
    let day = key("20240310");
    let feed = Arc::new(
        ScriptedPollenFeed::new()
            .reply("13101", day, Reply::Csv("citycode,date,pollen\n13101,2024-03-10,-9999\n".to_string()))
            .reply("27128", day, Reply::Csv("citycode,date,pollen\n27128,2024-03-10,-3\n".to_string())),
    );
    let resolver = resolver(dir.path(), feed, tokyo_baseline(42.0), true);

    let resolved = resolver.resolve_date(day, false).await;
    assert!(!resolved.record.is_empty());
    assert!(resolved.record.entries.values().all(|e| e.pollen >= 0.0));
}
