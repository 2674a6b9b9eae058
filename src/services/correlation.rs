//! Request correlation engine
//!
//! Velero answers download, delete and status requests out-of-band: the
//! manager creates a request object, then polls its status until Velero marks
//! it processed or the wait budget runs out.
//!
//! ```text
//! Created -> Pending (polled) -> Succeeded | Failed | TimedOut
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{api_resource, create_typed, get_typed, ClusterObjectGateway};
use crate::config::PollingConfig;
use crate::crd::{
    DeleteBackupRequest, DeleteBackupRequestSpec, DownloadRequest, DownloadRequestSpec,
    DownloadTarget, DownloadTargetKind, ServerStatusRequest, ServerStatusRequestSpec,
    ServerStatusRequestStatus, REQUEST_PHASE_NEW, REQUEST_PHASE_PROCESSED,
};
use crate::error::{Error, Result};
use crate::metrics::{OperationTimer, REQUESTS_SUBMITTED, REQUEST_OUTCOMES};

/// Target used in the names of server status requests
const SERVER_STATUS_TARGET: &str = "velero-backup-manager";

/// Phase Velero reports while a delete request is being worked on
const REQUEST_PHASE_IN_PROGRESS: &str = "InProgress";

/// Kinds of asynchronous Velero requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RequestKind {
    #[serde(rename = "DownloadRequest")]
    Download,
    #[serde(rename = "DeleteBackupRequest")]
    DeleteBackup,
    #[serde(rename = "ServerStatusRequest")]
    ServerStatus,
}

impl RequestKind {
    /// Every request kind
    pub const ALL: [RequestKind; 3] = [
        RequestKind::Download,
        RequestKind::DeleteBackup,
        RequestKind::ServerStatus,
    ];

    /// API resource of the kind
    pub fn api_resource(&self) -> ApiResource {
        match self {
            RequestKind::Download => api_resource::<DownloadRequest>(),
            RequestKind::DeleteBackup => api_resource::<DeleteBackupRequest>(),
            RequestKind::ServerStatus => api_resource::<ServerStatusRequest>(),
        }
    }

    /// Verb used in generated request names
    fn verb(&self) -> &'static str {
        match self {
            RequestKind::Download => "download",
            RequestKind::DeleteBackup => "delete",
            RequestKind::ServerStatus => "status",
        }
    }

    /// Timestamp layout used in generated request names
    fn timestamp_format(&self) -> &'static str {
        match self {
            RequestKind::DeleteBackup => "%Y%m%d-%H%M%S",
            RequestKind::Download | RequestKind::ServerStatus => "%Y%m%d%H%M%S",
        }
    }

    /// Path segment identifying the kind in the HTTP API
    pub fn slug(&self) -> &'static str {
        match self {
            RequestKind::Download => "download",
            RequestKind::DeleteBackup => "delete-backup",
            RequestKind::ServerStatus => "server-status",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.api_resource().kind)
    }
}

impl FromStr for RequestKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        let slug = lowered.strip_suffix("-requests").unwrap_or(lowered.as_str());
        RequestKind::ALL
            .into_iter()
            .find(|kind| kind.slug() == slug)
            .ok_or_else(|| {
                Error::bad_request(format!(
                    "unknown request kind '{}': must be one of download, delete-backup, server-status",
                    s
                ))
            })
    }
}

/// Name of a request of `kind` targeting `target`, created at `now`
///
/// Two requests for the same target within one second collide; the API server
/// then rejects the second one.
pub fn request_name(kind: RequestKind, target: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        target,
        kind.verb(),
        now.format(kind.timestamp_format())
    )
}

/// Terminal state of an awaited request
#[derive(Clone, Debug, PartialEq)]
pub enum RequestOutcome<T> {
    /// Velero processed the request
    Succeeded(T),
    /// Velero reported something other than success
    Failed(String),
    /// The wait budget ran out first
    TimedOut,
}

impl<T> RequestOutcome<T> {
    fn label(&self) -> &'static str {
        match self {
            RequestOutcome::Succeeded(_) => "succeeded",
            RequestOutcome::Failed(_) => "failed",
            RequestOutcome::TimedOut => "timed_out",
        }
    }
}

/// Progress of a request derived from its phase
#[derive(Clone, Debug, PartialEq)]
pub enum RequestProgress {
    Pending,
    Processed,
    Unexpected(String),
}

/// Classify a request phase; an absent phase means Velero has not seen it yet
pub fn request_progress(phase: Option<&str>) -> RequestProgress {
    match phase.unwrap_or_default() {
        "" | REQUEST_PHASE_NEW | REQUEST_PHASE_IN_PROGRESS => RequestProgress::Pending,
        REQUEST_PHASE_PROCESSED => RequestProgress::Processed,
        other => RequestProgress::Unexpected(other.to_string()),
    }
}

/// Kind-independent view of a request object, as listed to operators
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncRequest {
    pub kind: RequestKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(rename = "downloadURL", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl AsyncRequest {
    /// Summarize a raw request object of the given kind
    pub fn from_object(kind: RequestKind, obj: &DynamicObject) -> Self {
        let text = |pointer: &str| {
            obj.data
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let (target, artifact) = match kind {
            RequestKind::Download => (text("/spec/target/name"), text("/spec/target/kind")),
            RequestKind::DeleteBackup => (text("/spec/backupName"), None),
            RequestKind::ServerStatus => (None, None),
        };

        let errors = obj
            .data
            .pointer("/status/errors")
            .and_then(Value::as_array)
            .map(|errs| {
                errs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            kind,
            name: obj.name_any(),
            target,
            artifact,
            phase: text("/status/phase"),
            created: obj.metadata.creation_timestamp.as_ref().map(|t| t.0),
            download_url: text("/status/downloadURL"),
            errors,
        }
    }
}

/// Creates request objects and correlates them with Velero's answer
pub struct RequestCorrelator {
    gateway: Arc<dyn ClusterObjectGateway>,
    namespace: String,
    polling: PollingConfig,
}

impl RequestCorrelator {
    /// Create a correlator over the given namespace
    pub fn new(
        gateway: Arc<dyn ClusterObjectGateway>,
        namespace: impl Into<String>,
        polling: PollingConfig,
    ) -> Self {
        Self {
            gateway,
            namespace: namespace.into(),
            polling,
        }
    }

    async fn submit<K>(&self, kind: RequestKind, request: K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let created = create_typed(self.gateway.as_ref(), &self.namespace, &request).await?;
        REQUESTS_SUBMITTED
            .with_label_values(&[&kind.to_string()])
            .inc();
        info!(kind = %kind, name = %created.name_any(), "Submitted request");
        Ok(created)
    }

    /// Ask Velero for a download URL of an artifact
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn submit_download(
        &self,
        target: &str,
        artifact: DownloadTargetKind,
    ) -> Result<DownloadRequest> {
        let kind = RequestKind::Download;
        let mut request = DownloadRequest::new(
            &request_name(kind, target, Utc::now()),
            DownloadRequestSpec {
                target: DownloadTarget {
                    kind: artifact.to_string(),
                    name: target.to_string(),
                },
            },
        );
        request.metadata.namespace = Some(self.namespace.clone());
        self.submit(kind, request).await
    }

    /// Ask Velero to delete a backup
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn submit_delete_backup(&self, backup_name: &str) -> Result<DeleteBackupRequest> {
        let kind = RequestKind::DeleteBackup;
        let mut request = DeleteBackupRequest::new(
            &request_name(kind, backup_name, Utc::now()),
            DeleteBackupRequestSpec {
                backup_name: backup_name.to_string(),
            },
        );
        request.metadata.namespace = Some(self.namespace.clone());
        self.submit(kind, request).await
    }

    /// Ask Velero to report its server status
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn submit_server_status(&self) -> Result<ServerStatusRequest> {
        let kind = RequestKind::ServerStatus;
        let mut request = ServerStatusRequest::new(
            &request_name(kind, SERVER_STATUS_TARGET, Utc::now()),
            ServerStatusRequestSpec::default(),
        );
        request.metadata.namespace = Some(self.namespace.clone());
        self.submit(kind, request).await
    }

    /// Poll a request until `classify` reports a terminal outcome or the
    /// configured timeout elapses
    pub async fn await_outcome<K, T, F>(
        &self,
        kind: RequestKind,
        name: &str,
        classify: F,
    ) -> Result<RequestOutcome<T>>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
        F: Fn(K) -> Option<RequestOutcome<T>>,
    {
        let poll = async {
            loop {
                tokio::time::sleep(self.polling.interval).await;
                let current: K = get_typed(self.gateway.as_ref(), &self.namespace, name).await?;
                if let Some(outcome) = classify(current) {
                    return Ok::<_, Error>(outcome);
                }
                debug!(kind = %kind, name, "Request still pending");
            }
        };

        let outcome = match tokio::time::timeout(self.polling.timeout, poll).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(kind = %kind, name, timeout = ?self.polling.timeout, "Request timed out");
                RequestOutcome::TimedOut
            }
        };

        REQUEST_OUTCOMES
            .with_label_values(&[&kind.to_string(), outcome.label()])
            .inc();
        Ok(outcome)
    }

    fn timed_out(&self, kind: RequestKind, name: &str) -> Error {
        Error::TimedOut {
            kind: kind.to_string(),
            name: name.to_string(),
            waited: self.polling.timeout,
        }
    }

    /// Create a download request and wait for its URL
    ///
    /// `Ok(None)` means Velero processed the request without producing a URL.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn download_url(
        &self,
        target: &str,
        artifact: DownloadTargetKind,
    ) -> Result<Option<String>> {
        let kind = RequestKind::Download;
        let request = self.submit_download(target, artifact).await?;
        let name = request.name_any();

        let outcome = self
            .await_outcome(kind, &name, |current: DownloadRequest| {
                let status = current.status.unwrap_or_default();
                match request_progress(status.phase.as_deref()) {
                    RequestProgress::Pending => None,
                    RequestProgress::Processed => Some(RequestOutcome::Succeeded(status.download_url)),
                    RequestProgress::Unexpected(phase) => Some(RequestOutcome::Failed(format!(
                        "download request ended in phase '{}'",
                        phase
                    ))),
                }
            })
            .await?;

        match outcome {
            RequestOutcome::Succeeded(url) => Ok(url),
            RequestOutcome::Failed(reason) => Err(Error::bad_request(reason)),
            RequestOutcome::TimedOut => Err(self.timed_out(kind, &name)),
        }
    }

    /// Create a server status request and wait for Velero's answer
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn request_server_status(&self) -> Result<ServerStatusRequestStatus> {
        let timer = OperationTimer::start("request_server_status");
        let result: Result<ServerStatusRequestStatus> = async {
            let kind = RequestKind::ServerStatus;
            let request = self.submit_server_status().await?;
            let name = request.name_any();

            let outcome = self
                .await_outcome(kind, &name, |current: ServerStatusRequest| {
                    let status = current.status.unwrap_or_default();
                    match request_progress(status.phase.as_deref()) {
                        RequestProgress::Pending => None,
                        RequestProgress::Processed => Some(RequestOutcome::Succeeded(status)),
                        RequestProgress::Unexpected(phase) => Some(RequestOutcome::Failed(
                            format!("server status request ended in phase '{}'", phase),
                        )),
                    }
                })
                .await?;

            match outcome {
                RequestOutcome::Succeeded(status) => Ok(status),
                RequestOutcome::Failed(reason) => Err(Error::bad_request(reason)),
                RequestOutcome::TimedOut => Err(self.timed_out(kind, &name)),
            }
        }
        .await;
        timer.finish(result)
    }

    /// List requests of one kind
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn list_requests(&self, kind: RequestKind) -> Result<Vec<AsyncRequest>> {
        let timer = OperationTimer::start("list_requests");
        let result = self
            .gateway
            .list(&kind.api_resource(), &self.namespace)
            .await
            .map(|objects| {
                objects
                    .iter()
                    .map(|obj| AsyncRequest::from_object(kind, obj))
                    .collect()
            });
        timer.finish(result)
    }

    /// Delete one request, typically one Velero never processed
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn delete_request(&self, kind: RequestKind, name: &str) -> Result<()> {
        let timer = OperationTimer::start("delete_request");
        let result = self
            .gateway
            .delete(&kind.api_resource(), &self.namespace, name)
            .await;
        if result.is_ok() {
            info!(kind = %kind, name, "Deleted request");
        }
        timer.finish(result)
    }
}
