mod common;

use carelink_core::config::FeatureConfig;
use carelink_core::identity::{RoleOverridePolicy, UserDirectory};
use carelink_core::SyncRecord;
use common::{Harness, Mode};
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_email_lookup_is_cached_locally() {
    let harness = Harness::new(FeatureConfig::users()).await;
    let remote_user = SyncRecord::new(
        "u-77",
        json!({"email": "coordinator@clinic.example", "role": "staff"}),
        "admin-console",
    );
    harness.remote.insert("users", (&remote_user).into());

    let directory = UserDirectory::new(
        harness.coordinator.clone(),
        RoleOverridePolicy::new([("coordinator@clinic.example", "admin")]),
    );

    let user = directory
        .resolve(None, Some("coordinator@clinic.example"))
        .await
        .unwrap();
    assert_eq!(user.layer, "remote-email");
    assert_eq!(user.key, "u-77");
    assert_eq!(user.value["role"], json!("admin"));

    harness.remote.set_mode(Mode::Down);
    let again = directory
        .resolve(None, Some("COORDINATOR@clinic.example"))
        .await
        .unwrap();
    assert_eq!(again.layer, "local-email");
    assert_eq!(again.value["role"], json!("admin"));

    let stored = harness.coordinator.local_record("u-77").await.unwrap().unwrap();
    assert_eq!(stored.value["role"], json!("staff"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remote_id_lookup_precedes_email_scan() {
    let harness = Harness::new(FeatureConfig::users()).await;
    let by_id = SyncRecord::new("u-1", json!({"email": "a@clinic.example"}), "d");
    harness.remote.insert("users", (&by_id).into());

    let directory = UserDirectory::new(harness.coordinator.clone(), RoleOverridePolicy::default());
    let user = directory
        .resolve(Some("u-1"), Some("someone-else@clinic.example"))
        .await
        .unwrap();
    assert_eq!(user.layer, "remote");
    assert_eq!(user.key, "u-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_remote_resolves_to_none() {
    let harness = Harness::new(FeatureConfig::users()).await;
    harness.remote.set_mode(Mode::Down);

    let directory = UserDirectory::new(harness.coordinator.clone(), RoleOverridePolicy::default());
    assert!(directory
        .resolve(Some("u-1"), Some("a@clinic.example"))
        .await
        .is_none());
}
