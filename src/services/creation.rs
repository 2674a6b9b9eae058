//! Backup creation engine
//!
//! Builds Backup objects either from a client request or from the template
//! of an existing Velero Schedule, then submits them through the gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use crate::adapters::{create_typed, get_typed, ClusterObjectGateway};
use crate::crd::{Backup, BackupSpec, Schedule, SCHEDULE_NAME_LABEL, VELERO_API_VERSION};
use crate::error::{Error, Result};
use crate::metrics::OperationTimer;

/// Request fields that describe the transport or need reshaping; they never
/// reach the backup spec as-is
const TRANSPORT_FIELDS: [&str; 6] = [
    "name",
    "namespace",
    "labelSelector",
    "orLabelSelectors",
    "parallelFilesUpload",
    "resourcePolicy",
];

/// Resource policies referenced by a direct backup request are config maps
const RESOURCE_POLICY_KIND: &str = "configmap";

/// Client request to create a backup
///
/// Every field not listed here is passed to the backup spec unchanged.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBackupRequest {
    /// Backup name
    pub name: String,

    /// Target namespace, the manager's namespace when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Labels the backed-up resources must carry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<BTreeMap<String, String>>,

    /// Accepted for compatibility; not forwarded to Velero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or_label_selectors: Option<Vec<BTreeMap<String, String>>>,

    /// Number of parallel file uploads for file-system backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_files_upload: Option<u32>,

    /// Name of a resource policy config map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<String>,

    /// Remaining spec fields (includedNamespaces, ttl, storageLocation, ...)
    #[serde(flatten)]
    pub spec: Map<String, Value>,
}

/// Build the Backup described by a client request
pub fn build_backup(request: CreateBackupRequest, default_namespace: &str) -> Result<Backup> {
    if request.name.trim().is_empty() {
        return Err(Error::bad_request("backup name must not be empty"));
    }

    let mut fields = request.spec;
    for field in TRANSPORT_FIELDS {
        fields.remove(field);
    }
    let mut spec = BackupSpec::from_fields(fields);

    if let Some(selector) = request.label_selector.filter(|s| !s.is_empty()) {
        spec.set("labelSelector", json!({ "matchLabels": selector }));
    }

    if let Some(parallel) = request.parallel_files_upload.filter(|n| *n > 0) {
        let mut uploader = spec
            .get("uploaderConfig")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        uploader.insert("parallelFilesUpload".to_string(), json!(parallel));
        spec.set("uploaderConfig", Value::Object(uploader));
    }

    if let Some(policy) = request.resource_policy.filter(|p| !p.is_empty()) {
        spec.set(
            "resourcePolicy",
            json!({ "kind": RESOURCE_POLICY_KIND, "name": policy }),
        );
    }

    let namespace = request
        .namespace
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| default_namespace.to_string());

    let mut backup = Backup::new(&request.name, spec);
    backup.metadata.namespace = Some(namespace);
    Ok(backup)
}

/// Name of a backup triggered from a schedule at `now`
pub fn scheduled_backup_name(schedule_name: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", schedule_name, now.format("%Y%m%d%H%M%S"))
}

/// Build the Backup a schedule would create at `now`
///
/// Labels come from the template metadata when it defines any, otherwise
/// from the schedule itself; the schedule-name label always wins.
///
/// A schedule asking for owner references must carry a uid.
pub fn backup_from_schedule(
    schedule: &Schedule,
    namespace: &str,
    now: DateTime<Utc>,
) -> Result<Backup> {
    let schedule_name = schedule.name_any();
    let template = &schedule.spec.template;

    let template_labels = template.metadata_labels();
    let mut labels = if template_labels.is_empty() {
        debug!(schedule = %schedule_name, "Using schedule labels for backup");
        schedule.metadata.labels.clone().unwrap_or_default()
    } else {
        debug!(schedule = %schedule_name, "Using template labels for backup");
        template_labels
    };
    labels.insert(SCHEDULE_NAME_LABEL.to_string(), schedule_name.clone());

    let mut spec = template.clone();
    if let Some(policy) = template.resource_policy_name() {
        spec.set("resourcePolicy", json!({ "name": policy }));
    }

    let mut backup = Backup::new(&scheduled_backup_name(&schedule_name, now), spec);
    backup.metadata.namespace = Some(namespace.to_string());
    backup.metadata.labels = Some(labels);
    backup.metadata.annotations = schedule.metadata.annotations.clone();

    if schedule.owns_backups() {
        let uid = schedule
            .metadata
            .uid
            .clone()
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| {
                Error::bad_request(format!(
                    "schedule '{}' requests owner references but has no uid",
                    schedule_name
                ))
            })?;
        backup.metadata.owner_references = Some(vec![OwnerReference {
            api_version: VELERO_API_VERSION.to_string(),
            kind: Schedule::kind(&()).to_string(),
            name: schedule_name,
            uid,
            controller: Some(true),
            ..Default::default()
        }]);
    }

    Ok(backup)
}

/// Write side of backup management
pub struct BackupCreationEngine {
    gateway: Arc<dyn ClusterObjectGateway>,
    namespace: String,
}

impl BackupCreationEngine {
    /// Create an engine submitting to the given namespace
    pub fn new(gateway: Arc<dyn ClusterObjectGateway>, namespace: impl Into<String>) -> Self {
        Self {
            gateway,
            namespace: namespace.into(),
        }
    }

    /// Create a backup from a client request
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_backup(&self, request: CreateBackupRequest) -> Result<Backup> {
        let timer = OperationTimer::start("create_backup");
        let result: Result<Backup> = async {
            let backup = build_backup(request, &self.namespace)?;
            let namespace = backup.namespace().unwrap_or_else(|| self.namespace.clone());
            let created = create_typed(self.gateway.as_ref(), &namespace, &backup).await?;
            info!(name = %created.name_any(), namespace = %namespace, "Created backup");
            Ok(created)
        }
        .await;
        timer.finish(result)
    }

    /// Trigger a backup from a schedule's template
    ///
    /// Fails with `Error::NotFound` before creating anything when the schedule
    /// does not exist.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn create_backup_from_schedule(&self, schedule_name: &str) -> Result<Backup> {
        let timer = OperationTimer::start("create_backup_from_schedule");
        let result: Result<Backup> = async {
            let schedule: Schedule =
                get_typed(self.gateway.as_ref(), &self.namespace, schedule_name).await?;
            let backup = backup_from_schedule(&schedule, &self.namespace, Utc::now())?;
            let created = create_typed(self.gateway.as_ref(), &self.namespace, &backup).await?;
            info!(
                name = %created.name_any(),
                schedule = schedule_name,
                "Created backup from schedule"
            );
            Ok(created)
        }
        .await;
        timer.finish(result)
    }
}
