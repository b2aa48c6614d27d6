//! Field-level divergence detection

use std::collections::BTreeSet;

use serde_json::Value;

use crate::config::DEFAULT_SENSITIVE_FIELDS;
use crate::models::{ConflictId, ConflictPriority, ConflictRecord, ConflictType, SyncRecord};
use crate::util::{is_primitive, json_kind};

/// Bookkeeping fields that never count as a conflict.
pub const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "created_at",
    "updated_at",
    "tenant_id",
    "last_modified",
    "origin_device_id",
    "sync_status",
];

/// Pseudo-field used when a record's value is not an object.
pub const WHOLE_VALUE_FIELD: &str = "value";

/// Compares two versions of a record field by field.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    sensitive_fields: Vec<String>,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS.iter().copied())
    }
}

impl ConflictDetector {
    /// Build a detector; field names containing any of `sensitive_fields`
    /// (case-insensitive) are never auto-resolved.
    pub fn new<I, S>(sensitive_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            sensitive_fields: sensitive_fields
                .into_iter()
                .map(|field| field.as_ref().trim().to_ascii_lowercase())
                .filter(|field| !field.is_empty())
                .collect(),
        }
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        let field = field.to_ascii_lowercase();
        self.sensitive_fields
            .iter()
            .any(|sensitive| field.contains(sensitive.as_str()))
    }

    /// One `ConflictRecord` per differing field of `local` and `remote`.
    pub fn detect(
        &self,
        table_name: &str,
        local: &SyncRecord,
        remote: &SyncRecord,
    ) -> Vec<ConflictRecord> {
        match (&local.value, &remote.value) {
            (Value::Object(local_fields), Value::Object(remote_fields)) => {
                let names: BTreeSet<&String> =
                    local_fields.keys().chain(remote_fields.keys()).collect();
                names
                    .into_iter()
                    .filter(|name| !SYSTEM_FIELDS.contains(&name.as_str()))
                    .filter_map(|name| {
                        self.compare(
                            table_name,
                            name,
                            (local, local_fields.get(name)),
                            (remote, remote_fields.get(name)),
                            false,
                        )
                    })
                    .collect()
            }
            (local_value, remote_value) => self
                .compare(
                    table_name,
                    WHOLE_VALUE_FIELD,
                    (local, Some(local_value)),
                    (remote, Some(remote_value)),
                    true,
                )
                .into_iter()
                .collect(),
        }
    }

    /// An absent field and an explicit `null` count as different values.
    fn compare(
        &self,
        table_name: &str,
        field_name: &str,
        (local, local_value): (&SyncRecord, Option<&Value>),
        (remote, remote_value): (&SyncRecord, Option<&Value>),
        whole_value: bool,
    ) -> Option<ConflictRecord> {
        if local_value == remote_value {
            return None;
        }
        let local_value = local_value.unwrap_or(&Value::Null);
        let remote_value = remote_value.unwrap_or(&Value::Null);

        let conflict_type = classify(local_value, remote_value);
        let sensitive = self.is_sensitive(field_name);
        let primitive = is_primitive(local_value) && is_primitive(remote_value);
        let priority = if sensitive {
            ConflictPriority::Critical
        } else if !primitive {
            ConflictPriority::High
        } else if conflict_type == ConflictType::UpdateDelete {
            ConflictPriority::Medium
        } else {
            ConflictPriority::Low
        };

        Some(ConflictRecord {
            id: ConflictId::new(),
            table_name: table_name.to_string(),
            record_id: local.key.clone(),
            field_name: field_name.to_string(),
            conflict_type,
            local_value: local_value.clone(),
            remote_value: remote_value.clone(),
            local_timestamp: local.last_modified,
            remote_timestamp: remote.last_modified,
            local_device_id: local.origin_device_id.clone(),
            remote_device_id: remote.origin_device_id.clone(),
            priority,
            auto_resolvable: primitive && !sensitive,
            whole_value,
        })
    }
}

fn classify(local: &Value, remote: &Value) -> ConflictType {
    if local.is_null() || remote.is_null() {
        ConflictType::UpdateDelete
    } else if json_kind(local) == json_kind(remote) {
        ConflictType::ConcurrentUpdate
    } else {
        ConflictType::TypeMismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn record(value: Value, day: u32, device: &str) -> SyncRecord {
        let mut record = SyncRecord::new("42", value, device);
        record.last_modified = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        record
    }

    #[test]
    fn test_single_field_divergence() {
        let detector = ConflictDetector::default();
        let local = record(json!({"id": 42, "name": "A"}), 1, "laptop");
        let remote = record(json!({"id": 42, "name": "B"}), 2, "phone");

        let conflicts = detector.detect("users", &local, &remote);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.field_name, "name");
        assert_eq!(conflict.record_id, "42");
        assert_eq!(conflict.conflict_type, ConflictType::ConcurrentUpdate);
        assert_eq!(conflict.priority, ConflictPriority::Low);
        assert!(conflict.auto_resolvable);
        assert_eq!(conflict.remote_device_id, "phone");
    }

    #[test]
    fn test_system_fields_are_ignored() {
        let detector = ConflictDetector::default();
        let local = record(json!({"updated_at": "x", "tenant_id": "a"}), 1, "d");
        let remote = record(json!({"updated_at": "y", "tenant_id": "b"}), 2, "d");
        assert!(detector.detect("notes", &local, &remote).is_empty());
    }

    #[test]
    fn test_sensitive_fields_are_critical() {
        let detector = ConflictDetector::default();
        let local = record(json!({"Patient_Name": "Ann"}), 1, "d");
        let remote = record(json!({"Patient_Name": "Anne"}), 2, "d");

        let conflicts = detector.detect("patients", &local, &remote);
        assert_eq!(conflicts[0].priority, ConflictPriority::Critical);
        assert!(!conflicts[0].auto_resolvable);
    }

    #[test]
    fn test_missing_and_mismatched_fields() {
        let detector = ConflictDetector::new(["notes_private"]);
        let local = record(json!({"phone": "555", "tags": ["a"], "age": 3}), 1, "d");
        let remote = record(json!({"tags": ["b"], "age": "3"}), 2, "d");

        let conflicts = detector.detect("contacts", &local, &remote);
        let by_field = |name: &str| {
            conflicts
                .iter()
                .find(|conflict| conflict.field_name == name)
                .unwrap()
        };
        assert_eq!(conflicts.len(), 3);
        assert_eq!(by_field("phone").conflict_type, ConflictType::UpdateDelete);
        assert_eq!(by_field("phone").priority, ConflictPriority::Medium);
        assert_eq!(by_field("tags").priority, ConflictPriority::High);
        assert!(!by_field("tags").auto_resolvable);
        assert_eq!(by_field("age").conflict_type, ConflictType::TypeMismatch);
    }

    #[test]
    fn test_scalar_values_use_whole_value_field() {
        let detector = ConflictDetector::default();
        let local = record(json!("dark"), 1, "d");
        let remote = record(json!("light"), 2, "d");

        let conflicts = detector.detect("user_settings", &local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field_name, WHOLE_VALUE_FIELD);
        assert!(conflicts[0].whole_value);
    }

    #[test]
    fn test_field_named_value_is_not_whole_value() {
        let detector = ConflictDetector::default();
        let local = record(json!({"value": 1}), 1, "d");
        let remote = record(json!({"value": 2}), 2, "d");

        let conflicts = detector.detect("metrics", &local, &remote);
        assert_eq!(conflicts[0].field_name, WHOLE_VALUE_FIELD);
        assert!(!conflicts[0].whole_value);
    }

    #[test]
    fn test_absent_field_differs_from_explicit_null() {
        let detector = ConflictDetector::default();
        let local = record(json!({"nickname": null}), 1, "d");
        let remote = record(json!({}), 2, "d");

        let conflicts = detector.detect("contacts", &local, &remote);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field_name, "nickname");
        assert_eq!(conflicts[0].conflict_type, ConflictType::UpdateDelete);

        let both_absent = detector.detect("contacts", &remote, &remote);
        assert!(both_absent.is_empty());
    }
}
