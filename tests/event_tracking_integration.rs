//! Integration tests for the event tracking engine
//!
//! These tests drive the public `EventEngine` surface against the in-memory
//! store:
//! - Tracking and untracking in daily buckets
//! - Counts and membership across bucket boundaries
//! - Event discovery through the key space
//! - Concurrent identifier allocation

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use kuba_bitevents::{Bit, EventEngine, InMemoryBitmapStore, Interval};

// ============================================================================
// Helper Functions
// ============================================================================

fn engine() -> (EventEngine, Arc<InMemoryBitmapStore>) {
    let store = Arc::new(InMemoryBitmapStore::new());
    let engine = EventEngine::builder()
        .with_store(store.clone())
        .with_namespace("it")
        .with_tracking_interval(Interval::Day)
        .build()
        .expect("engine builds");
    (engine, store)
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

// ============================================================================
// Tracking scenarios
// ============================================================================

#[tokio::test]
async fn test_track_single_user_daily() {
    let (engine, _) = engine();
    engine.track_event("login", "alice", at(2024, 1, 1, 10)).await.unwrap();

    assert_eq!(engine.count_event("login", at(2024, 1, 1, 15), Interval::Day).await.unwrap(), 1);
    assert!(engine.did_event("login", "alice", at(2024, 1, 1, 20), Interval::Day).await.unwrap());
    // Next day is a different bucket
    assert!(!engine.did_event("login", "alice", at(2024, 1, 2, 1), Interval::Day).await.unwrap());
}

#[tokio::test]
async fn test_track_two_users_same_day() {
    let (engine, _) = engine();
    engine.track_event("login", "alice", at(2024, 1, 1, 10)).await.unwrap();
    engine.track_event("login", "bob", at(2024, 1, 1, 11)).await.unwrap();

    assert_eq!(engine.count_event("login", at(2024, 1, 1, 0), Interval::Day).await.unwrap(), 2);
}

#[tokio::test]
async fn test_untrack() {
    let (engine, _) = engine();
    engine.track_event("login", "alice", at(2024, 1, 1, 10)).await.unwrap();
    engine.track_event("login", "bob", at(2024, 1, 1, 11)).await.unwrap();
    engine.untrack_event("login", "alice", at(2024, 1, 1, 18)).await.unwrap();

    assert_eq!(engine.count_event("login", at(2024, 1, 1, 0), Interval::Day).await.unwrap(), 1);
    assert!(!engine.did_event("login", "alice", at(2024, 1, 1, 12), Interval::Day).await.unwrap());
    assert!(engine.did_event("login", "bob", at(2024, 1, 1, 12), Interval::Day).await.unwrap());
}

#[tokio::test]
async fn test_track_is_idempotent() {
    let (engine, _) = engine();
    engine.track_event("login", "alice", at(2024, 1, 1, 10)).await.unwrap();
    let once = engine.count_event("login", at(2024, 1, 1, 10), Interval::Day).await.unwrap();
    engine.track_event("login", "alice", at(2024, 1, 1, 12)).await.unwrap();
    let twice = engine.count_event("login", at(2024, 1, 1, 10), Interval::Day).await.unwrap();

    assert_eq!(once, twice);
    assert!(engine.did_event("login", "alice", at(2024, 1, 1, 0), Interval::Day).await.unwrap());
}

#[tokio::test]
async fn test_never_tracked_is_zero_and_false() {
    let (engine, store) = engine();
    assert_eq!(engine.count_event("ghost", at(2024, 1, 1, 0), Interval::Day).await.unwrap(), 0);
    assert!(!engine.did_event("ghost", "nobody", at(2024, 1, 1, 0), Interval::Day).await.unwrap());
    assert!(store.is_empty());
    assert_eq!(engine.known_users().await.unwrap(), 0);
}

#[tokio::test]
async fn test_did_event_or_register_allocates_offset() {
    let (engine, _) = engine();
    assert!(!engine
        .did_event_or_register("login", "newcomer", at(2024, 1, 1, 0), Interval::Day)
        .await
        .unwrap());
    assert_eq!(engine.known_users().await.unwrap(), 1);
    assert_eq!(engine.resolve_user("newcomer").await.unwrap(), 0);
}

#[tokio::test]
async fn test_explicit_intervals_are_independent() {
    let (engine, _) = engine();
    let t = at(2024, 2, 14, 9);
    engine.set_event_bit("purchase", "alice", t, Interval::Hour, Bit::On).await.unwrap();
    engine.set_event_bit("purchase", "alice", t, Interval::Month, Bit::On).await.unwrap();

    assert_eq!(engine.count_event("purchase", t, Interval::Hour).await.unwrap(), 1);
    assert_eq!(engine.count_event("purchase", at(2024, 2, 1, 0), Interval::Month).await.unwrap(), 1);
    // Tracking interval (day) was never written
    assert_eq!(engine.count_event("purchase", t, Interval::Day).await.unwrap(), 0);
}

#[tokio::test]
async fn test_count_event_range() {
    let (engine, _) = engine();
    engine.track_event("open", "a", at(2024, 1, 1, 1)).await.unwrap();
    engine.track_event("open", "b", at(2024, 1, 1, 2)).await.unwrap();
    engine.track_event("open", "a", at(2024, 1, 3, 3)).await.unwrap();

    let counts: Vec<u64> = engine
        .count_event_range("open", at(2024, 1, 1, 0), at(2024, 1, 3, 23), Interval::Day)
        .await
        .unwrap()
        .into_iter()
        .map(|bucket| bucket.count)
        .collect();
    assert_eq!(counts, vec![2, 0, 1]);
}

#[tokio::test]
async fn test_invalid_event_name_rejected() {
    let (engine, store) = engine();
    let err = engine.track_event("login:day", "alice", at(2024, 1, 1, 0)).await.unwrap_err();
    assert!(matches!(err, kuba_bitevents::Error::InvalidEventName { .. }));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_extreme_timestamps_are_errors() {
    let (engine, store) = engine();
    let min = DateTime::<Utc>::MIN_UTC;
    for interval in Interval::ALL {
        let err = engine.count_event("login", min, interval).await.unwrap_err();
        assert!(matches!(err, kuba_bitevents::Error::TimestampOutOfRange(_)), "{}", interval);
    }
    assert!(engine.did_event("login", "alice", min, Interval::Week).await.is_err());
    assert!(engine.track_event("login", "alice", DateTime::<Utc>::MAX_UTC).await.is_err());
    assert!(engine
        .count_event_range("login", min, min, Interval::Week)
        .await
        .is_err());
    assert!(store.is_empty());
}

// ============================================================================
// Event catalog
// ============================================================================

#[tokio::test]
async fn test_list_events_exact_set() {
    let (engine, _) = engine();
    engine.track_event("login", "alice", at(2024, 1, 1, 0)).await.unwrap();
    engine.track_event("login", "bob", at(2024, 1, 2, 0)).await.unwrap();
    engine.track_event("signup", "carol", at(2024, 1, 2, 0)).await.unwrap();
    engine
        .set_event_bit("login", "alice", at(2024, 1, 2, 0), Interval::Hour, Bit::On)
        .await
        .unwrap();

    let events = engine.list_events("").await.unwrap();
    let unique: HashSet<&str> = events.iter().map(String::as_str).collect();
    assert_eq!(events.len(), unique.len(), "duplicates in {:?}", events);
    assert_eq!(unique, HashSet::from(["login", "signup"]));
}

#[tokio::test]
async fn test_list_events_ignores_other_namespaces() {
    let store = Arc::new(InMemoryBitmapStore::new());
    let first = EventEngine::builder()
        .with_store(store.clone())
        .with_namespace("app1")
        .build()
        .unwrap();
    let second = EventEngine::builder()
        .with_store(store.clone())
        .with_namespace("app2")
        .build()
        .unwrap();

    first.track_event("login", "alice", at(2024, 1, 1, 0)).await.unwrap();
    second.track_event("export", "alice", at(2024, 1, 1, 0)).await.unwrap();

    assert_eq!(first.list_events("").await.unwrap(), vec!["login"]);
    assert_eq!(second.list_events("").await.unwrap(), vec!["export"]);
    // Offsets are scoped to the namespace
    assert_eq!(first.known_users().await.unwrap(), 1);
    assert_eq!(second.known_users().await.unwrap(), 1);
}

#[tokio::test]
async fn test_list_events_after_untrack_still_known() {
    let (engine, _) = engine();
    engine.track_event("login", "alice", at(2024, 1, 1, 0)).await.unwrap();
    engine.untrack_event("login", "alice", at(2024, 1, 1, 0)).await.unwrap();

    // The bitmap still exists, only its bit is cleared
    assert_eq!(engine.list_events("").await.unwrap(), vec!["login"]);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tracking() {
    let (engine, _) = engine();
    let mut handles = Vec::new();

    for i in 0..100 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("user-{}", i % 50);
            engine.track_event("visit", &user, at(2024, 6, 1, (i % 24) as u32)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(engine.count_event("visit", at(2024, 6, 1, 0), Interval::Day).await.unwrap(), 50);

    let mut offsets = HashSet::new();
    for i in 0..50 {
        offsets.insert(engine.resolve_user(&format!("user-{}", i)).await.unwrap());
    }
    assert_eq!(offsets.len(), 50);
}
