//! Integration tests for backup filtering and derivation rules
//!
//! These tests exercise the pure decision logic of the query and creation
//! engines against hand-built Velero objects, without a cluster.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use kube::ResourceExt;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use velero_backup_manager::config::InProgressPolicy;
use velero_backup_manager::crd::{Backup, Schedule, SCHEDULE_NAME_LABEL};
use velero_backup_manager::services::creation::{
    backup_from_schedule, build_backup, scheduled_backup_name,
};
use velero_backup_manager::services::query::{filter_backups, is_in_progress};
use velero_backup_manager::services::{BackupQuery, CreateBackupRequest};

// ============================================================================
// Test Helpers
// ============================================================================

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn backup(name: &str, schedule: Option<&str>, created: DateTime<Utc>, status: Value) -> Backup {
    let labels = match schedule {
        Some(s) => json!({ SCHEDULE_NAME_LABEL: s }),
        None => json!({}),
    };
    serde_json::from_value(json!({
        "apiVersion": "velero.io/v1",
        "kind": "Backup",
        "metadata": {
            "name": name,
            "namespace": "velero",
            "labels": labels,
            "creationTimestamp": rfc3339(created)
        },
        "spec": {},
        "status": status
    }))
    .unwrap()
}

fn completed(name: &str, schedule: Option<&str>, created: DateTime<Utc>) -> Backup {
    backup(
        name,
        schedule,
        created,
        json!({"phase": "Completed", "completionTimestamp": "2024-01-01T00:00:00Z"}),
    )
}

fn completed_ago(name: &str, seconds: i64) -> Backup {
    backup(
        name,
        None,
        now() - Duration::hours(1),
        json!({
            "phase": "Completed",
            "completionTimestamp": rfc3339(now() - Duration::seconds(seconds))
        }),
    )
}

fn names(backups: &[Backup]) -> Vec<String> {
    backups.iter().map(|b| b.name_any()).collect()
}

fn schedule(value: Value) -> Schedule {
    serde_json::from_value(value).unwrap()
}

fn request(value: Value) -> CreateBackupRequest {
    serde_json::from_value(value).unwrap()
}

// ============================================================================
// Query Filtering Tests
// ============================================================================

#[test]
fn schedule_filter_keeps_only_matching_label() {
    let backups = vec![
        completed("daily-1", Some("daily"), now()),
        completed("weekly-1", Some("weekly"), now()),
        completed("manual", None, now()),
    ];
    let query = BackupQuery {
        schedule_name: Some("daily".to_string()),
        ..Default::default()
    };

    let selected = filter_backups(backups, &query, now(), &InProgressPolicy::default());
    assert_eq!(names(&selected), vec!["daily-1"]);
}

#[test]
fn latest_per_schedule_keeps_newest_of_each_group() {
    let t0 = now() - Duration::days(3);
    let backups = vec![
        completed("daily-1", Some("daily"), t0),
        completed("weekly-1", Some("weekly"), t0),
        completed("daily-3", Some("daily"), t0 + Duration::days(2)),
        completed("daily-2", Some("daily"), t0 + Duration::days(1)),
        completed("manual-a", None, t0),
        completed("manual-b", None, t0),
    ];
    let query = BackupQuery {
        latest_per_schedule: true,
        ..Default::default()
    };

    let selected = filter_backups(backups, &query, now(), &InProgressPolicy::default());
    assert_eq!(
        names(&selected),
        vec!["daily-3", "weekly-1", "manual-a", "manual-b"]
    );
}

#[test]
fn latest_per_schedule_keeps_first_on_equal_timestamps() {
    let backups = vec![
        completed("daily-a", Some("daily"), now()),
        completed("daily-b", Some("daily"), now()),
    ];
    let query = BackupQuery {
        latest_per_schedule: true,
        ..Default::default()
    };

    let selected = filter_backups(backups, &query, now(), &InProgressPolicy::default());
    assert_eq!(names(&selected), vec!["daily-a"]);
}

#[test]
fn empty_schedule_filter_keeps_everything() {
    let backups = vec![
        completed("daily-1", Some("daily"), now()),
        completed("manual", None, now()),
    ];
    let query = BackupQuery {
        schedule_name: Some(String::new()),
        ..Default::default()
    };

    let selected = filter_backups(backups, &query, now(), &InProgressPolicy::default());
    assert_eq!(names(&selected), vec!["daily-1", "manual"]);
}

#[test]
fn empty_schedule_label_is_never_deduplicated() {
    let backups = vec![
        completed("unlabelled-a", Some(""), now() - Duration::days(1)),
        completed("unlabelled-b", Some(""), now()),
    ];
    let query = BackupQuery {
        latest_per_schedule: true,
        ..Default::default()
    };

    let selected = filter_backups(backups, &query, now(), &InProgressPolicy::default());
    assert_eq!(names(&selected), vec!["unlabelled-a", "unlabelled-b"]);
    assert!(selected.iter().all(|b| b.schedule_name().is_none()));
}

#[test]
fn in_progress_window_boundaries() {
    let policy = InProgressPolicy::default();

    assert!(!is_in_progress(&completed_ago("old", 200), now(), &policy));
    assert!(is_in_progress(&completed_ago("recent", 60), now(), &policy));

    let running = backup(
        "running",
        None,
        now() - Duration::days(30),
        json!({"phase": "InProgress", "completionTimestamp": "2020-01-01T00:00:00Z"}),
    );
    assert!(is_in_progress(&running, now(), &policy));
}

#[test]
fn in_progress_matches_active_phase_suffix() {
    let policy = InProgressPolicy::default();
    let finalizing = backup("finalizing", None, now(), json!({"phase": "Finalizing"}));
    let failed = backup("failed", None, now(), json!({"phase": "Failed"}));
    let unknown = backup("unknown", None, now(), json!({}));

    assert!(is_in_progress(&finalizing, now(), &policy));
    assert!(!is_in_progress(&failed, now(), &policy));
    assert!(!is_in_progress(&unknown, now(), &policy));
}

#[test]
fn in_progress_treats_future_completion_as_recent() {
    let policy = InProgressPolicy::default();
    let skewed = completed_ago("skewed", -30);
    assert!(is_in_progress(&skewed, now(), &policy));
}

#[test]
fn filters_apply_before_dedup() {
    let backups = vec![
        backup(
            "daily-running",
            Some("daily"),
            now() - Duration::minutes(5),
            json!({"phase": "InProgress"}),
        ),
        completed("daily-newest", Some("daily"), now()),
    ];
    let query = BackupQuery {
        in_progress: true,
        latest_per_schedule: true,
        ..Default::default()
    };

    let selected = filter_backups(backups, &query, now(), &InProgressPolicy::default());
    assert_eq!(names(&selected), vec!["daily-running"]);
}

// ============================================================================
// Direct Creation Tests
// ============================================================================

#[test]
fn label_selector_is_wrapped_without_leaking() {
    let backup = assert_ok!(build_backup(
        request(json!({
            "name": "prod-1",
            "labelSelector": {"env": "prod"},
            "includedNamespaces": ["shop"]
        })),
        "velero",
    ));

    assert_eq!(
        backup.spec.get("labelSelector"),
        Some(&json!({"matchLabels": {"env": "prod"}}))
    );
    assert_eq!(backup.spec.get("includedNamespaces"), Some(&json!(["shop"])));
    assert!(backup.spec.get("name").is_none());
    assert_eq!(backup.namespace().as_deref(), Some("velero"));
}

#[test]
fn transport_fields_never_reach_spec() {
    let backup = assert_ok!(build_backup(
        request(json!({
            "name": "prod-2",
            "namespace": "team-a",
            "orLabelSelectors": [{"tier": "db"}],
            "parallelFilesUpload": 4,
            "resourcePolicy": "skip-volumes",
            "uploaderConfig": {"writeSparseFiles": true}
        })),
        "velero",
    ));

    assert!(backup.spec.get("namespace").is_none());
    assert!(backup.spec.get("orLabelSelectors").is_none());
    assert!(backup.spec.get("parallelFilesUpload").is_none());
    assert_eq!(
        backup.spec.get("uploaderConfig"),
        Some(&json!({"writeSparseFiles": true, "parallelFilesUpload": 4}))
    );
    assert_eq!(
        backup.spec.get("resourcePolicy"),
        Some(&json!({"kind": "configmap", "name": "skip-volumes"}))
    );
    assert_eq!(backup.namespace().as_deref(), Some("team-a"));
}

#[test]
fn blank_backup_name_is_rejected() {
    assert_err!(build_backup(request(json!({"name": "  "})), "velero"));
}

// ============================================================================
// Schedule Derivation Tests
// ============================================================================

#[test]
fn schedule_labels_used_when_template_has_none() {
    let daily = schedule(json!({
        "apiVersion": "velero.io/v1",
        "kind": "Schedule",
        "metadata": {"name": "daily", "uid": "uid-daily", "labels": {"team": "x"}},
        "spec": {"schedule": "0 2 * * *", "template": {"ttl": "720h0m0s"}}
    }));

    let backup = assert_ok!(backup_from_schedule(&daily, "velero", now()));

    let expected: BTreeMap<String, String> = [
        ("team".to_string(), "x".to_string()),
        (SCHEDULE_NAME_LABEL.to_string(), "daily".to_string()),
    ]
    .into_iter()
    .collect();
    assert_eq!(backup.labels(), &expected);
    assert_eq!(backup.name_any(), "daily-20240601120000");
    assert!(backup.owner_references().is_empty());
}

#[test]
fn template_labels_win_and_schedule_label_is_forced() {
    let daily = schedule(json!({
        "apiVersion": "velero.io/v1",
        "kind": "Schedule",
        "metadata": {
            "name": "daily",
            "labels": {"team": "x"},
            "annotations": {"owner": "platform"}
        },
        "spec": {
            "template": {
                "metadata": {"labels": {"app": "shop", SCHEDULE_NAME_LABEL: "stale"}}
            }
        }
    }));

    let backup = assert_ok!(backup_from_schedule(&daily, "velero", now()));

    assert_eq!(backup.labels().get("app").map(String::as_str), Some("shop"));
    assert!(backup.labels().get("team").is_none());
    assert_eq!(backup.schedule_name(), Some("daily"));
    assert_eq!(
        backup.annotations().get("owner").map(String::as_str),
        Some("platform")
    );
}

#[test]
fn owner_reference_points_at_schedule() {
    let daily = schedule(json!({
        "apiVersion": "velero.io/v1",
        "kind": "Schedule",
        "metadata": {"name": "daily", "uid": "uid-daily"},
        "spec": {"useOwnerReferencesInBackup": true, "template": {}}
    }));

    let backup = assert_ok!(backup_from_schedule(&daily, "velero", now()));
    let owners = backup.owner_references();

    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "Schedule");
    assert_eq!(owners[0].name, "daily");
    assert_eq!(owners[0].uid, "uid-daily");
    assert_eq!(owners[0].controller, Some(true));
}

#[test]
fn owner_reference_requires_schedule_uid() {
    let daily = schedule(json!({
        "apiVersion": "velero.io/v1",
        "kind": "Schedule",
        "metadata": {"name": "daily"},
        "spec": {"useOwnerReferencesInBackup": true, "template": {}}
    }));

    assert_err!(backup_from_schedule(&daily, "velero", now()));
}

#[test]
fn schedule_resource_policy_drops_kind() {
    let daily = schedule(json!({
        "apiVersion": "velero.io/v1",
        "kind": "Schedule",
        "metadata": {"name": "daily"},
        "spec": {
            "template": {
                "resourcePolicy": {"kind": "configmap", "name": "skip-volumes"},
                "includedNamespaces": ["shop"]
            }
        }
    }));

    let backup = assert_ok!(backup_from_schedule(&daily, "velero", now()));

    assert_eq!(
        backup.spec.get("resourcePolicy"),
        Some(&json!({"name": "skip-volumes"}))
    );
    assert_eq!(backup.spec.get("includedNamespaces"), Some(&json!(["shop"])));
    // The schedule keeps its own template untouched
    assert_eq!(
        daily.spec.template.get("resourcePolicy"),
        Some(&json!({"kind": "configmap", "name": "skip-volumes"}))
    );
}

#[test]
fn scheduled_names_use_utc_timestamp() {
    let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 5).unwrap();
    assert_eq!(scheduled_backup_name("weekly", at), "weekly-20241231235905");
}
