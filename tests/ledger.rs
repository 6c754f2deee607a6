use std::sync::Arc;

use flocus::store::TEMPORARY_ACCESS_KEY;
use flocus::{ManualClock, MemorySettingsStore, SettingsStore, TemporaryAccessLedger, MINUTE_MS};
use serde_json::json;

const T0: i64 = 1_704_067_200_000;

fn ledger() -> (TemporaryAccessLedger, Arc<MemorySettingsStore>, ManualClock) {
    let settings = Arc::new(MemorySettingsStore::new());
    let clock = ManualClock::new(T0);
    let ledger = TemporaryAccessLedger::new(settings.clone(), Arc::new(clock.clone()));
    (ledger, settings, clock)
}

#[tokio::test]
async fn grant_expires_ten_minutes_from_now() {
    let (ledger, settings, _) = ledger();
    let expires = ledger.grant("youtube.com").await.unwrap();
    assert_eq!(expires, T0 + 10 * MINUTE_MS);
    assert_eq!(
        settings.get(TEMPORARY_ACCESS_KEY).await.unwrap(),
        Some(json!({"youtube.com": T0 + 10 * MINUTE_MS}))
    );
}

#[tokio::test]
async fn regranting_overwrites_with_later_expiry() {
    let (ledger, _, clock) = ledger();
    ledger.grant("youtube.com").await.unwrap();
    clock.advance_minutes(3);
    let second = ledger.grant("youtube.com").await.unwrap();

    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.expires_at("youtube.com"), Some(second));
    assert_eq!(second, T0 + 13 * MINUTE_MS);
}

#[tokio::test]
async fn unknown_domain_has_no_access() {
    let (ledger, _, _) = ledger();
    assert!(!ledger.has_valid_access("reddit.com").await.unwrap());
}

#[tokio::test]
async fn access_is_valid_until_expiry_then_lazily_removed() {
    let (ledger, settings, clock) = ledger();
    let expires = ledger.grant_for("reddit.com", 5 * MINUTE_MS).await.unwrap();

    clock.set(expires - 1);
    assert!(ledger.has_valid_access("reddit.com").await.unwrap());
    clock.set(expires);
    assert!(ledger.has_valid_access("reddit.com").await.unwrap());

    clock.set(expires + 1);
    // Still physically present until a check observes the expiry.
    assert_eq!(
        ledger.snapshot().await.unwrap().expires_at("reddit.com"),
        Some(expires)
    );
    assert!(!ledger.has_valid_access("reddit.com").await.unwrap());
    assert_eq!(
        settings.get(TEMPORARY_ACCESS_KEY).await.unwrap(),
        Some(json!({}))
    );
}

#[tokio::test]
async fn expiry_check_leaves_other_domains_alone() {
    let (ledger, _, clock) = ledger();
    ledger.grant_for("a.com", MINUTE_MS).await.unwrap();
    ledger.grant_for("b.com", 30 * MINUTE_MS).await.unwrap();
    clock.advance_minutes(2);

    assert!(!ledger.has_valid_access("a.com").await.unwrap());
    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.expires_at("a.com"), None);
    assert!(snapshot.is_live("b.com", clock_now(&clock)));
}

#[tokio::test]
async fn sweep_removes_only_expired_grants() {
    let (ledger, _, clock) = ledger();
    ledger.grant_for("a.com", MINUTE_MS).await.unwrap();
    ledger.grant_for("b.com", 2 * MINUTE_MS).await.unwrap();
    ledger.grant_for("c.com", 30 * MINUTE_MS).await.unwrap();
    clock.advance_minutes(5);

    assert_eq!(ledger.sweep_expired().await.unwrap(), 2);
    assert_eq!(ledger.sweep_expired().await.unwrap(), 0);
    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.expires_at("c.com").is_some());
}

#[tokio::test]
async fn malformed_ledger_reads_as_empty() {
    let (ledger, settings, _) = ledger();
    settings
        .set(TEMPORARY_ACCESS_KEY, json!(["youtube.com"]))
        .await
        .unwrap();
    assert!(ledger.snapshot().await.unwrap().is_empty());
    assert!(!ledger.has_valid_access("youtube.com").await.unwrap());
}

#[tokio::test]
async fn persistence_failures_surface_as_errors() {
    let (ledger, settings, _) = ledger();
    settings.set_failing(true);
    assert!(ledger.grant("youtube.com").await.is_err());
    assert!(ledger.has_valid_access("youtube.com").await.is_err());
}

fn clock_now(clock: &ManualClock) -> i64 {
    use flocus::Clock;
    clock.now_ms()
}
