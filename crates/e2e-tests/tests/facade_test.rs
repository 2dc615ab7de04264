//! End-to-end tests for the storage facade over healthy and quota-bound
//! backends.
//!
//! Covers the round trip through the batch queue, typed records, input
//! validation, and quota recovery on the primary tier.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;

use e2e_tests::{
    entries, filled_store, sized_records, sized_value, timestamped, wait_for, TestHarness,
};
use pinmark_storage::{InMemoryStore, MockStore, OpKind, StorageError};
use pinmark_types::{BackendTier, QuotaLevel, Records};

/// A value written through the facade is read back from the same tier.
#[tokio::test(start_paused = true)]
async fn test_set_then_get_round_trip() {
    let harness = TestHarness::new();

    let written = harness
        .facade
        .set(entries(&[("a", json!(1))]))
        .await
        .expect("set should succeed");
    assert_eq!(written.tier, BackendTier::DurableSynced);
    assert!(!written.fallback_used);

    let read = harness.facade.get("a").await.expect("get should succeed");
    assert_eq!(read.value, entries(&[("a", json!(1))]));
    assert_eq!(read.tier, BackendTier::DurableSynced);

    assert_eq!(harness.local.total_calls(), 0);
    assert_eq!(harness.memory.total_calls(), 0);
}

/// Missing keys are simply absent and removal is idempotent.
#[tokio::test(start_paused = true)]
async fn test_missing_keys_and_repeated_remove() {
    let harness = TestHarness::new();

    harness
        .facade
        .set(entries(&[("kept", json!("yes")), ("dropped", json!("no"))]))
        .await
        .unwrap();

    harness.facade.remove("dropped").await.unwrap();
    harness.facade.remove("dropped").await.unwrap();

    let read = harness.facade.get(["kept", "dropped", "never"]).await.unwrap();
    assert_eq!(read.value, entries(&[("kept", json!("yes"))]));
}

/// Typed records are encoded on write and decoded on read.
#[tokio::test(start_paused = true)]
async fn test_typed_bookmark_record() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Bookmark {
        url: String,
        title: String,
        tags: Vec<String>,
        timestamp: i64,
    }

    let harness = TestHarness::new();
    let bookmark = Bookmark {
        url: "https://example.org/rust".to_string(),
        title: "Rust".to_string(),
        tags: vec!["lang".to_string()],
        timestamp: 1_700_000_000_000,
    };

    harness.facade.set_record("bm:1", &bookmark).await.unwrap();

    let loaded = harness.facade.get_record::<Bookmark>("bm:1").await.unwrap();
    assert_eq!(loaded.value, Some(bookmark));
    assert!(loaded.durable);
}

/// Malformed requests fail fast and never reach any backend.
#[tokio::test(start_paused = true)]
async fn test_invalid_requests_never_reach_backends() {
    let harness = TestHarness::new();

    let empty_keys = harness.facade.get(Vec::<String>::new()).await;
    assert!(matches!(empty_keys, Err(StorageError::Validation(_))));

    let empty_key = harness.facade.remove("").await;
    assert!(matches!(empty_key, Err(StorageError::Validation(_))));

    let no_entries = harness.facade.set(Records::new()).await;
    assert!(matches!(no_entries, Err(StorageError::Validation(_))));

    assert_eq!(harness.primary.total_calls(), 0);
    assert_eq!(harness.local.total_calls(), 0);
    assert_eq!(harness.memory.total_calls(), 0);
}

/// A write rejected for quota evicts five records, then succeeds on the
/// single follow-up attempt.
#[tokio::test(start_paused = true)]
async fn test_quota_rejection_evicts_and_retries_once() {
    // Ten 96-byte records in a 1000-byte store: 96% full
    let primary = filled_store(
        "primary",
        BackendTier::DurableSynced,
        1000,
        sized_records("seed", 10, 96),
    );
    let harness = TestHarness::builder().primary(primary).direct().build();

    let served = harness
        .facade
        .set(entries(&[("new", sized_value("new", 65))]))
        .await
        .expect("set should succeed after eviction");

    assert!(!served.fallback_used);
    assert_eq!(served.tier, BackendTier::DurableSynced);

    assert_eq!(harness.primary.calls(OpKind::Set), 2);
    assert_eq!(harness.primary.calls(OpKind::Remove), 5);
    assert_eq!(harness.primary.inner().len(), 6);
    assert!(harness.primary.inner().contains_key("new"));
    assert_eq!(harness.primary.inner().used_bytes(), 5 * 96 + 65);
    assert_eq!(harness.local.total_calls(), 0);

    let usage = harness.facade.get_usage(true).await;
    assert_eq!(usage.used_bytes, 545);
    assert!(harness.observer.events().is_empty());
}

/// The refresh after a successful write finds the store critical and
/// evicts the largest records in the background.
#[tokio::test(start_paused = true)]
async fn test_background_refresh_evicts_when_critical() {
    let primary = filled_store(
        "primary",
        BackendTier::DurableSynced,
        1000,
        sized_records("seed", 10, 96),
    );
    let harness = TestHarness::builder().primary(primary).direct().build();

    harness
        .facade
        .set(entries(&[("tiny", json!(1))]))
        .await
        .expect("small write fits under the quota");

    let evicted = wait_for(Duration::from_secs(5), || {
        harness.primary.calls(OpKind::Remove) == 5
    })
    .await;
    assert!(evicted, "background eviction did not run");

    assert_eq!(harness.observer.events(), vec![QuotaLevel::Critical]);
    assert_eq!(harness.primary.inner().len(), 6);
    assert!(harness.primary.inner().contains_key("tiny"));

    let usage = harness.facade.get_usage(false).await;
    assert!(usage.usage_percent < 50.0);
}

/// Large writes that cannot fit even after eviction land in the fallback
/// tier.
#[tokio::test(start_paused = true)]
async fn test_oversized_write_falls_back_after_eviction() {
    let primary = filled_store(
        "primary",
        BackendTier::DurableSynced,
        1000,
        sized_records("seed", 10, 96),
    );
    let harness = TestHarness::builder().primary(primary).direct().build();

    let served = harness
        .facade
        .set(entries(&[("huge", sized_value("huge", 2000))]))
        .await
        .unwrap();

    assert!(served.fallback_used);
    assert_eq!(served.tier, BackendTier::DurableLocal);
    assert!(harness.local.inner().contains_key("huge"));
    assert_eq!(harness.primary.calls(OpKind::Set), 2);
}

/// Among equally sized records, quota recovery evicts the oldest first.
#[tokio::test(start_paused = true)]
async fn test_quota_recovery_evicts_oldest() {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let hour_ms = 3_600_000;
    let seed: Records = (0..6)
        .map(|i| (format!("bm-{i}"), timestamped("page", now_ms, i * hour_ms)))
        .collect();
    let primary = MockStore::wrap(
        InMemoryStore::new("primary", BackendTier::DurableSynced).with_records(seed),
    )
    .with_quota_rejections(1);
    let harness = TestHarness::builder().primary(primary).direct().build();

    harness
        .facade
        .set(entries(&[("bm-new", timestamped("page", now_ms, 0))]))
        .await
        .unwrap();

    let mut remaining: Vec<String> = harness.primary.inner().snapshot().into_keys().collect();
    remaining.sort();
    assert_eq!(remaining, vec!["bm-0".to_string(), "bm-new".to_string()]);
}
