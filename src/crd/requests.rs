//! Velero request resources
//!
//! DownloadRequest, DeleteBackupRequest and ServerStatusRequest are one-shot
//! objects: the manager creates them and Velero answers through their status.

use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase of a request Velero has not handled yet
pub const REQUEST_PHASE_NEW: &str = "New";

/// Phase of a request Velero has answered
pub const REQUEST_PHASE_PROCESSED: &str = "Processed";

/// DownloadRequest specification
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "DownloadRequest",
    plural = "downloadrequests",
    singular = "downloadrequest",
    namespaced,
    status = "DownloadRequestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequestSpec {
    /// What to download
    pub target: DownloadTarget,
}

/// Artifact a DownloadRequest asks for
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTarget {
    /// Artifact kind (BackupContents, BackupLog, ...)
    pub kind: String,
    /// Name of the backup or restore the artifact belongs to
    pub name: String,
}

/// Artifact kinds the manager requests from Velero's download controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadTargetKind {
    BackupContents,
}

impl DownloadTargetKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadTargetKind::BackupContents => "BackupContents",
        }
    }
}

impl fmt::Display for DownloadTargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DownloadRequest status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequestStatus {
    /// New or Processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Pre-signed URL of the artifact
    #[serde(rename = "downloadURL", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// When the URL stops working
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

/// DeleteBackupRequest specification
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "DeleteBackupRequest",
    plural = "deletebackuprequests",
    singular = "deletebackuprequest",
    namespaced,
    status = "DeleteBackupRequestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBackupRequestSpec {
    /// Backup to delete
    pub backup_name: String,
}

/// DeleteBackupRequest status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBackupRequestStatus {
    /// New, InProgress or Processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Errors Velero hit while deleting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// ServerStatusRequest specification (intentionally empty)
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "ServerStatusRequest",
    plural = "serverstatusrequests",
    singular = "serverstatusrequest",
    namespaced,
    status = "ServerStatusRequestStatus"
)]
pub struct ServerStatusRequestSpec {}

/// ServerStatusRequest status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusRequestStatus {
    /// New or Processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// When Velero answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_timestamp: Option<DateTime<Utc>>,

    /// Version of the Velero server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,

    /// Plugins registered with the server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginInfo>,
}

/// Plugin registered with the Velero server
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_download_url_wire_name() {
        let status: DownloadRequestStatus = serde_json::from_value(json!({
            "phase": "Processed",
            "downloadURL": "https://bucket.example/backup.tar.gz"
        }))
        .unwrap();

        assert_eq!(
            status.download_url.as_deref(),
            Some("https://bucket.example/backup.tar.gz")
        );
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"downloadURL\""));
    }

    #[test]
    fn test_download_target_wire_name() {
        let target = DownloadTarget {
            kind: DownloadTargetKind::BackupContents.to_string(),
            name: "nightly".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&target).unwrap(),
            json!({"kind": "BackupContents", "name": "nightly"})
        );
    }

    #[test]
    fn test_delete_request_serialization() {
        let request = DeleteBackupRequest::new(
            "nightly-delete-20240501-101500",
            DeleteBackupRequestSpec {
                backup_name: "nightly".to_string(),
            },
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["apiVersion"], "velero.io/v1");
        assert_eq!(value["kind"], "DeleteBackupRequest");
        assert_eq!(value["spec"]["backupName"], "nightly");
    }
}
