mod common;

use std::time::Duration;

use carelink_core::cache::{LocalCache, MemoryBackup};
use carelink_core::config::FeatureConfig;
use carelink_core::remote::RemoteStore;
use carelink_core::sync::{ChangeEvent, ReadSource, RetryPolicy, SyncCoordinator};
use carelink_core::SyncStatus;
use chrono::{TimeZone, Utc};
use common::{Harness, Mode};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_write_keeps_one_local_entry() {
    let harness = Harness::new(FeatureConfig::notes()).await;
    let value = json!({"body": "follow up Tuesday"});

    let first = harness.coordinator.write("n1", value.clone()).await.unwrap();
    let second = harness.coordinator.write("n1", value.clone()).await.unwrap();

    assert_eq!(first, SyncStatus::Synced);
    assert_eq!(second, SyncStatus::Synced);
    assert_eq!(harness.local_entries("notes:").await, 1);
    let record = harness.coordinator.local_record("n1").await.unwrap().unwrap();
    assert_eq!(record.value, value);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_upsert_still_persists_locally_as_pending() {
    let harness = Harness::new(FeatureConfig::notes()).await;
    harness.remote.set_mode(Mode::Down);

    let status = harness
        .coordinator
        .write("n1", json!({"body": "offline"}))
        .await
        .unwrap();

    assert_eq!(status, SyncStatus::Pending);
    let record = harness.coordinator.local_record("n1").await.unwrap().unwrap();
    assert_eq!(record.value, json!({"body": "offline"}));
    assert_eq!(record.sync_status, SyncStatus::Pending);
    assert_eq!(harness.remote.len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconcile_converges_when_remote_accepts() {
    let harness = Harness::new(FeatureConfig::notes()).await;
    harness.remote.set_mode(Mode::Down);
    for index in 0..5 {
        harness
            .coordinator
            .write(&format!("n{index}"), json!({"index": index}))
            .await
            .unwrap();
    }
    assert_eq!(harness.coordinator.pending_records().await.unwrap().len(), 5);

    harness.remote.set_mode(Mode::Up);
    let mut events = harness.coordinator.subscribe();
    let report = harness.coordinator.background_reconcile().await.unwrap();

    assert_eq!(report.attempted, 5);
    assert_eq!(report.synced, 5);
    assert_eq!(report.still_pending, 0);
    assert!(harness.coordinator.pending_records().await.unwrap().is_empty());
    assert_eq!(
        harness
            .coordinator
            .records_with_status(SyncStatus::Synced)
            .await
            .unwrap()
            .len(),
        5
    );
    for index in 0..5 {
        let row = harness.remote.row("notes", &format!("n{index}")).unwrap();
        assert_eq!(row.value, json!({"index": index}));
    }
    assert!(matches!(
        events.try_recv().unwrap(),
        ChangeEvent::Upserted { record, .. } if record.sync_status == SyncStatus::Synced
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_permission_denied_marks_failed_and_is_not_retried() {
    let harness = Harness::new(FeatureConfig::profile()).await;
    harness.remote.set_mode(Mode::Deny);

    let status = harness
        .coordinator
        .write("p1", json!({"display_name": "Sam"}))
        .await
        .unwrap();
    assert_eq!(status, SyncStatus::Failed);

    harness.remote.set_mode(Mode::Up);
    let upserts_before = harness.remote.upserts();
    let report = harness.coordinator.background_reconcile().await.unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(harness.remote.upserts(), upserts_before);

    assert!(harness.coordinator.retry_failed("p1").await.unwrap());
    let report = harness.coordinator.background_reconcile().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(!harness.coordinator.retry_failed("p1").await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconcile_reports_permanent_failures() {
    let harness = Harness::new(FeatureConfig::notes()).await;
    harness.remote.set_mode(Mode::Down);
    harness.coordinator.write("n1", json!(1)).await.unwrap();

    harness.remote.set_mode(Mode::Deny);
    let report = harness.coordinator.background_reconcile().await.unwrap();
    assert_eq!(report.permanently_failed, 1);
    assert_eq!(
        harness
            .coordinator
            .local_record("n1")
            .await
            .unwrap()
            .unwrap()
            .sync_status,
        SyncStatus::Failed
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_errors_fail_but_rate_limits_stay_pending() {
    let harness = Harness::new(FeatureConfig::notes()).await;

    harness.remote.set_mode(Mode::Reject(400));
    let status = harness.coordinator.write("n1", json!(1)).await.unwrap();
    assert_eq!(status, SyncStatus::Failed);

    harness.remote.set_mode(Mode::Reject(429));
    let status = harness.coordinator.write("n2", json!(2)).await.unwrap();
    assert_eq!(status, SyncStatus::Pending);

    let report = harness.coordinator.background_reconcile().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.still_pending, 1);

    harness.remote.set_mode(Mode::Up);
    let report = harness.coordinator.background_reconcile().await.unwrap();
    assert_eq!(report.synced, 1);
    assert!(harness.remote.row("notes", "n1").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hanging_remote_times_out_to_pending() {
    let feature = FeatureConfig::new(
        "settings",
        "user_settings",
        Duration::from_secs(300),
        Duration::from_millis(50),
    );
    let harness = Harness::new(feature).await;
    harness.remote.set_mode(Mode::Hang);

    let status = tokio::time::timeout(
        Duration::from_secs(5),
        harness.coordinator.write("theme", json!("dark")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(status, SyncStatus::Pending);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_read_walks_the_tiers() {
    let harness = Harness::new(FeatureConfig::settings()).await;
    let remote_record = carelink_core::SyncRecord::new("theme", json!("light"), "device-remote");
    harness
        .remote
        .insert("user_settings", (&remote_record).into());

    let outcome = harness.coordinator.read_detailed("theme").await;
    assert_eq!(outcome.source, ReadSource::Remote);
    assert_eq!(outcome.value, Some(json!("light")));
    assert_eq!(harness.local_entries("settings:").await, 1);

    let outcome = harness.coordinator.read_detailed("theme").await;
    assert_eq!(outcome.source, ReadSource::Memory);

    assert_eq!(harness.coordinator.read("missing").await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_read_prefers_unsynced_local_over_remote() {
    let feature = FeatureConfig::new(
        "notes",
        "notes",
        Duration::ZERO,
        Duration::from_secs(5),
    );
    let harness = Harness::new(feature).await;
    harness.remote.set_mode(Mode::Down);
    harness.coordinator.write("n1", json!("local edit")).await.unwrap();

    harness.remote.set_mode(Mode::Up);
    let remote_record = carelink_core::SyncRecord::new("n1", json!("older remote"), "other");
    harness.remote.insert("notes", (&remote_record).into());

    let outcome = harness.coordinator.read_detailed("n1").await;
    assert_eq!(outcome.source, ReadSource::Local);
    assert_eq!(outcome.value, Some(json!("local edit")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_read_falls_back_to_local_then_stale_backup() {
    let feature = FeatureConfig::new(
        "notes",
        "notes",
        Duration::ZERO,
        Duration::from_secs(5),
    );
    let harness = Harness::new(feature).await;
    harness.coordinator.write("n1", json!("saved")).await.unwrap();
    harness.remote.set_mode(Mode::Down);

    let outcome = harness.coordinator.read_detailed("n1").await;
    assert_eq!(outcome.source, ReadSource::Local);

    harness.cache.remove("notes:n1").await.unwrap();
    let outcome = harness.coordinator.read_detailed("n1").await;
    assert_eq!(outcome.source, ReadSource::Backup);
    assert_eq!(outcome.value, Some(json!("saved")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupt_local_entry_reads_as_absent() {
    let harness = Harness::new(FeatureConfig::notes()).await;
    harness.remote.set_mode(Mode::Down);
    harness.cache.set("notes:n9", "{truncated").await.unwrap();

    assert_eq!(harness.coordinator.read("n9").await, None);
    assert_eq!(harness.cache.get("notes:n9").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_clears_every_tier() {
    let harness = Harness::new(FeatureConfig::notes()).await;
    harness.coordinator.write("n1", json!("bye")).await.unwrap();
    let mut events = harness.coordinator.subscribe();

    assert!(harness.coordinator.delete("n1").await.unwrap());
    assert!(harness.remote.row("notes", "n1").is_none());
    assert!(harness.memory.any("notes:n1").is_none());
    assert_eq!(harness.coordinator.read("n1").await, None);
    assert_eq!(
        events.try_recv().unwrap(),
        ChangeEvent::Deleted {
            feature: "notes".to_string(),
            key: "n1".to_string()
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_policy_retries_transient_upserts() {
    let harness = Harness::new(FeatureConfig::notes()).await;
    let coordinator = SyncCoordinator::new(
        FeatureConfig::notes(),
        "device-local",
        Some(harness.remote.clone() as std::sync::Arc<dyn RemoteStore>),
        harness.cache.clone(),
        std::sync::Arc::new(MemoryBackup::new()),
    )
    .with_retry_policy(RetryPolicy::new(3, Duration::from_secs(1)));
    harness.remote.set_mode(Mode::Down);

    let status = coordinator.write("n1", json!(1)).await.unwrap();
    assert_eq!(status, SyncStatus::Pending);
    assert_eq!(harness.remote.upserts(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_timestamps_survive_round_trip() {
    let harness = Harness::new(FeatureConfig::notes()).await;
    let mut record = carelink_core::SyncRecord::new("n1", json!("x"), "tablet");
    record.last_modified = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    harness.remote.insert("notes", (&record).into());

    harness.coordinator.read("n1").await.unwrap();
    let local = harness.coordinator.local_record("n1").await.unwrap().unwrap();
    assert_eq!(local.last_modified, record.last_modified);
    assert_eq!(local.origin_device_id, "tablet");
    assert_eq!(local.sync_status, SyncStatus::Synced);
}
