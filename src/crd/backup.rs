//! Velero Backup resource

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::SCHEDULE_NAME_LABEL;

/// Backup specification
///
/// The document is provider specific and passed through as-is; helpers below
/// read the few keys the manager cares about.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    namespaced,
    status = "BackupStatus"
)]
pub struct BackupSpec {
    /// Raw spec fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BackupSpec {
    /// Wrap an existing spec document
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Read a top-level spec field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a top-level spec field, replacing any previous value
    pub fn set(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    /// Name of the resource policy referenced by `resourcePolicy.name`
    pub fn resource_policy_name(&self) -> Option<&str> {
        self.fields
            .get("resourcePolicy")
            .and_then(|policy| policy.get("name"))
            .and_then(Value::as_str)
    }

    /// Labels from `metadata.labels`, the labels a backup built from this
    /// template should carry
    pub fn metadata_labels(&self) -> BTreeMap<String, String> {
        self.fields
            .get("metadata")
            .and_then(|meta| meta.get("labels"))
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Backup status as written by Velero
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// Current phase (New, InProgress, Finalizing, Completed, PartiallyFailed, Failed, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// When Velero started processing the backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,

    /// When Velero finished processing the backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,

    /// When the backup becomes eligible for garbage collection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,

    /// Remaining status fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Backup {
    /// Name of the schedule that produced this backup, from its labels only
    ///
    /// An empty label value counts as no schedule.
    pub fn schedule_name(&self) -> Option<&str> {
        self.labels()
            .get(SCHEDULE_NAME_LABEL)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Phase reported by Velero, empty when unknown
    pub fn phase(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or_default()
    }

    /// Completion timestamp reported by Velero
    pub fn completion_timestamp(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.completion_timestamp)
    }

    /// Expiration reported by Velero
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.expiration)
    }
}
