//! Velero custom resources used by the backup manager
//!
//! Velero owns these CRDs. Only the fields this service reads or writes are
//! typed; everything else is carried through untouched so that replacing an
//! object never drops data Velero wrote.

mod backup;
mod requests;
mod schedule;

pub use backup::*;
pub use requests::*;
pub use schedule::*;

/// `apiVersion` string of Velero resources
pub const VELERO_API_VERSION: &str = "velero.io/v1";

/// Label Velero sets on backups created by a schedule
pub const SCHEDULE_NAME_LABEL: &str = "velero.io/schedule-name";
