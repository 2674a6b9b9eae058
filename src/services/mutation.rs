//! Backup mutation operations
//!
//! Deletion and downloads go through Velero request objects; expiration
//! updates rewrite the Backup object itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::adapters::{get_typed, replace_typed, ClusterObjectGateway};
use crate::crd::{Backup, BackupStatus, DeleteBackupRequest, DownloadTargetKind};
use crate::error::{Error, Result};
use crate::metrics::OperationTimer;

use super::RequestCorrelator;

/// Download link of a backup's contents
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DownloadLink {
    pub url: String,
}

/// Delete, expire and download backups
pub struct BackupMutations {
    gateway: Arc<dyn ClusterObjectGateway>,
    namespace: String,
    requests: Arc<RequestCorrelator>,
}

impl BackupMutations {
    /// Create the mutation operations over the given namespace
    pub fn new(
        gateway: Arc<dyn ClusterObjectGateway>,
        namespace: impl Into<String>,
        requests: Arc<RequestCorrelator>,
    ) -> Self {
        Self {
            gateway,
            namespace: namespace.into(),
            requests,
        }
    }

    /// Ask Velero to delete a backup
    ///
    /// Only the DeleteBackupRequest is created here; whether the backup exists
    /// is for Velero to decide.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn delete_backup(&self, name: &str) -> Result<DeleteBackupRequest> {
        let timer = OperationTimer::start("delete_backup");
        let result = self.requests.submit_delete_backup(name).await;
        timer.finish(result)
    }

    /// Set a backup's expiration
    ///
    /// Read-modify-replace without a conflict retry: a concurrent writer
    /// between the read and the replace makes the API server reject the
    /// replace with a conflict, which is returned to the caller.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn update_backup_expiration(
        &self,
        name: &str,
        expiration: DateTime<Utc>,
    ) -> Result<Backup> {
        let timer = OperationTimer::start("update_backup_expiration");
        let result: Result<Backup> = async {
            let mut backup: Backup = get_typed(self.gateway.as_ref(), &self.namespace, name).await?;
            backup
                .status
                .get_or_insert_with(BackupStatus::default)
                .expiration = Some(expiration);

            let updated = replace_typed(self.gateway.as_ref(), &self.namespace, name, &backup).await?;
            info!(name = %updated.name_any(), %expiration, "Updated backup expiration");
            Ok(updated)
        }
        .await;
        timer.finish(result)
    }

    /// Current expiration of a backup, `None` when Velero has not set one
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn get_backup_expiration(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let timer = OperationTimer::start("get_backup_expiration");
        let result = get_typed::<Backup>(self.gateway.as_ref(), &self.namespace, name)
            .await
            .map(|backup| backup.expiration());
        timer.finish(result)
    }

    /// Obtain a download URL for a backup's contents
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn download_backup(&self, name: &str) -> Result<DownloadLink> {
        let timer = OperationTimer::start("download_backup");
        let result = self
            .requests
            .download_url(name, DownloadTargetKind::BackupContents)
            .await
            .and_then(|url| {
                url.filter(|u| !u.is_empty())
                    .map(|url| DownloadLink { url })
                    .ok_or_else(|| {
                        Error::bad_request(format!(
                            "Velero produced no download URL for backup '{}'",
                            name
                        ))
                    })
            });
        timer.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockClusterObjectGateway;
    use crate::config::PollingConfig;
    use chrono::TimeZone;
    use kube::api::DynamicObject;
    use serde_json::json;
    use std::time::Duration;

    fn mutations(gateway: MockClusterObjectGateway) -> BackupMutations {
        let gateway: Arc<dyn ClusterObjectGateway> = Arc::new(gateway);
        let polling = PollingConfig {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        };
        let requests = Arc::new(RequestCorrelator::new(gateway.clone(), "velero", polling));
        BackupMutations::new(gateway, "velero", requests)
    }

    fn backup_object(status: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "velero.io/v1",
            "kind": "Backup",
            "metadata": {"name": "nightly", "namespace": "velero", "resourceVersion": "42"},
            "spec": {"ttl": "720h0m0s"},
            "status": status
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_delete_backup_creates_request_only() {
        let mut gateway = MockClusterObjectGateway::new();
        gateway
            .expect_create()
            .withf(|resource, namespace, body| {
                resource.plural == "deletebackuprequests"
                    && namespace == "velero"
                    && body.data["spec"]["backupName"] == "nightly"
                    && body
                        .metadata
                        .name
                        .as_deref()
                        .unwrap_or_default()
                        .starts_with("nightly-delete-")
            })
            .times(1)
            .returning(|_, _, body| Ok(body.clone()));
        gateway.expect_delete().never();
        gateway.expect_get().never();

        let request = mutations(gateway).delete_backup("nightly").await.unwrap();
        assert_eq!(request.spec.backup_name, "nightly");
    }

    #[tokio::test]
    async fn test_update_expiration_replaces_whole_object() {
        let expiration = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        let mut gateway = MockClusterObjectGateway::new();
        gateway
            .expect_get()
            .returning(|_, _, _| Ok(backup_object(json!({"phase": "Completed", "version": 1}))));
        gateway
            .expect_replace()
            .withf(|resource, _, name, body| {
                resource.plural == "backups"
                    && name == "nightly"
                    && body.data["status"]["expiration"] == "2030-01-01T00:00:00Z"
                    && body.data["status"]["version"] == 1
                    && body.data["spec"]["ttl"] == "720h0m0s"
                    && body.metadata.resource_version.as_deref() == Some("42")
            })
            .times(1)
            .returning(|_, _, _, body| Ok(body.clone()));

        let updated = mutations(gateway)
            .update_backup_expiration("nightly", expiration)
            .await
            .unwrap();
        assert_eq!(updated.expiration(), Some(expiration));
    }

    #[tokio::test]
    async fn test_get_expiration_absent() {
        let mut gateway = MockClusterObjectGateway::new();
        gateway
            .expect_get()
            .returning(|_, _, _| Ok(backup_object(json!({"phase": "InProgress"}))));

        let expiration = mutations(gateway)
            .get_backup_expiration("nightly")
            .await
            .unwrap();
        assert_eq!(expiration, None);
    }

    #[tokio::test]
    async fn test_download_without_url_is_bad_request() {
        let mut gateway = MockClusterObjectGateway::new();
        gateway
            .expect_create()
            .returning(|_, _, body| Ok(body.clone()));
        gateway.expect_get().returning(|_, _, name| {
            Ok(serde_json::from_value(json!({
                "apiVersion": "velero.io/v1",
                "kind": "DownloadRequest",
                "metadata": {"name": name},
                "spec": {"target": {"kind": "BackupContents", "name": "nightly"}},
                "status": {"phase": "Processed"}
            }))
            .unwrap())
        });

        let result = mutations(gateway).download_backup("nightly").await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_download_returns_url() {
        let mut gateway = MockClusterObjectGateway::new();
        gateway
            .expect_create()
            .returning(|_, _, body| Ok(body.clone()));
        gateway.expect_get().returning(|_, _, name| {
            Ok(serde_json::from_value(json!({
                "apiVersion": "velero.io/v1",
                "kind": "DownloadRequest",
                "metadata": {"name": name},
                "spec": {"target": {"kind": "BackupContents", "name": "nightly"}},
                "status": {"phase": "Processed", "downloadURL": "https://example/nightly.tgz"}
            }))
            .unwrap())
        });

        let link = mutations(gateway).download_backup("nightly").await.unwrap();
        assert_eq!(link.url, "https://example/nightly.tgz");
    }
}
