//! Backup query engine
//!
//! Lists Velero backups and narrows them down by schedule, by the
//! in-progress heuristic, and to the latest backup of each schedule.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::adapters::{get_typed, list_typed, ClusterObjectGateway};
use crate::config::InProgressPolicy;
use crate::crd::Backup;
use crate::error::Result;
use crate::metrics::OperationTimer;

/// Phase Velero uses while a backup runs, compared lowercased
const IN_PROGRESS_PHASE: &str = "inprogress";

/// Filters applied when listing backups
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupQuery {
    /// Only backups created by this schedule
    #[serde(default)]
    pub schedule_name: Option<String>,
    /// Only the newest backup of each schedule
    #[serde(default)]
    pub latest_per_schedule: bool,
    /// Only running or just finished backups
    #[serde(default)]
    pub in_progress: bool,
}

/// Whether a backup should be reported as in progress at `now`
///
/// Backups that completed within the policy window still count, so that a
/// backup does not vanish from an "in progress" view the moment it ends.
pub fn is_in_progress(backup: &Backup, now: DateTime<Utc>, policy: &InProgressPolicy) -> bool {
    let phase = backup.phase().to_lowercase();
    if phase.ends_with(&policy.active_phase_suffix) || phase == IN_PROGRESS_PHASE {
        return true;
    }

    match backup.completion_timestamp() {
        // A completion in the future yields a negative age, which counts as recent
        Some(completed) => (now - completed)
            .to_std()
            .map(|age| age < policy.recent_completion_window)
            .unwrap_or(true),
        None => false,
    }
}

fn creation_time(backup: &Backup) -> Option<DateTime<Utc>> {
    backup.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

/// Apply schedule filter, in-progress filter and per-schedule dedup, in that order
///
/// Records keep their listing order; a deduplicated schedule stays at the
/// position of its first surviving record. Backups without a schedule label
/// are never deduplicated, and an empty `schedule_name` filters nothing.
pub fn filter_backups(
    backups: Vec<Backup>,
    query: &BackupQuery,
    now: DateTime<Utc>,
    policy: &InProgressPolicy,
) -> Vec<Backup> {
    let mut selected: Vec<Backup> = Vec::with_capacity(backups.len());
    let mut latest_by_schedule: HashMap<String, usize> = HashMap::new();
    let wanted_schedule = query.schedule_name.as_deref().filter(|s| !s.is_empty());

    for backup in backups {
        let schedule = backup.schedule_name().map(str::to_string);

        if let Some(wanted) = wanted_schedule {
            if schedule.as_deref() != Some(wanted) {
                continue;
            }
        }

        if query.in_progress && !is_in_progress(&backup, now, policy) {
            continue;
        }

        if let (true, Some(schedule)) = (query.latest_per_schedule, schedule) {
            match latest_by_schedule.get(&schedule) {
                Some(&index) => {
                    if creation_time(&backup) > creation_time(&selected[index]) {
                        selected[index] = backup;
                    }
                }
                None => {
                    latest_by_schedule.insert(schedule, selected.len());
                    selected.push(backup);
                }
            }
            continue;
        }

        selected.push(backup);
    }

    selected
}

/// Read side of backup management
pub struct BackupQueryEngine {
    gateway: Arc<dyn ClusterObjectGateway>,
    namespace: String,
    policy: InProgressPolicy,
}

impl BackupQueryEngine {
    /// Create a query engine over the given namespace
    pub fn new(
        gateway: Arc<dyn ClusterObjectGateway>,
        namespace: impl Into<String>,
        policy: InProgressPolicy,
    ) -> Self {
        Self {
            gateway,
            namespace: namespace.into(),
            policy,
        }
    }

    /// List backups matching the query
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn list_backups(&self, query: &BackupQuery) -> Result<Vec<Backup>> {
        let timer = OperationTimer::start("list_backups");
        let result: Result<Vec<Backup>> = async {
            let backups: Vec<Backup> = list_typed(self.gateway.as_ref(), &self.namespace).await?;
            let total = backups.len();
            let selected = filter_backups(backups, query, Utc::now(), &self.policy);
            debug!(total, selected = selected.len(), "Filtered backups");
            Ok(selected)
        }
        .await;
        timer.finish(result)
    }

    /// Fetch a single backup; `Error::NotFound` when absent
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn get_backup_details(&self, name: &str) -> Result<Backup> {
        let timer = OperationTimer::start("get_backup_details");
        let result = get_typed::<Backup>(self.gateway.as_ref(), &self.namespace, name).await;
        if let Ok(backup) = &result {
            debug!(name = %backup.name_any(), phase = backup.phase(), "Fetched backup");
        }
        timer.finish(result)
    }
}
