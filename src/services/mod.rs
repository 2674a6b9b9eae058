//! Backup management services
//!
//! This module contains the decision logic of the manager:
//! - Querying and filtering backups
//! - Creating backups directly or from schedules
//! - Deleting, expiring and downloading backups
//! - Correlating Velero request objects with their results

pub mod correlation;
pub mod creation;
pub mod mutation;
pub mod query;

pub use correlation::{AsyncRequest, RequestCorrelator, RequestKind, RequestOutcome};
pub use creation::{BackupCreationEngine, CreateBackupRequest};
pub use mutation::{BackupMutations, DownloadLink};
pub use query::{BackupQuery, BackupQueryEngine};

use std::sync::Arc;

use crate::adapters::ClusterObjectGateway;
use crate::config::Config;

/// Shared state of all request handlers
pub struct Services {
    pub query: BackupQueryEngine,
    pub creation: BackupCreationEngine,
    pub mutations: BackupMutations,
    pub requests: Arc<RequestCorrelator>,
}

impl Services {
    /// Wire every engine to the same gateway
    pub fn new(gateway: Arc<dyn ClusterObjectGateway>, config: &Config) -> Self {
        let namespace = config.namespace.as_str();
        let requests = Arc::new(RequestCorrelator::new(
            gateway.clone(),
            namespace,
            config.polling(),
        ));

        Self {
            query: BackupQueryEngine::new(gateway.clone(), namespace, config.in_progress_policy()),
            creation: BackupCreationEngine::new(gateway.clone(), namespace),
            mutations: BackupMutations::new(gateway, namespace, requests.clone()),
            requests,
        }
    }
}
