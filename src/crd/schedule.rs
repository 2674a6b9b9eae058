//! Velero Schedule resource

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::BackupSpec;

/// Schedule specification
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "Schedule",
    plural = "schedules",
    singular = "schedule",
    namespaced,
    status = "ScheduleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    /// Template of every backup this schedule creates
    #[serde(default)]
    pub template: BackupSpec,

    /// Cron expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Whether the schedule is paused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    /// Make created backups owned by the schedule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_owner_references_in_backup: Option<bool>,

    /// Remaining spec fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Schedule status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    /// Current phase (New, Enabled, FailedValidation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// When the schedule last produced a backup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<DateTime<Utc>>,

    /// Remaining status fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Schedule {
    /// Whether backups created from this schedule get an owner reference to it
    pub fn owns_backups(&self) -> bool {
        self.spec.use_owner_references_in_backup.unwrap_or(false)
    }
}
