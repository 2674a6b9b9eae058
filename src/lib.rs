//! Velero Backup Manager
//!
//! HTTP service that lists, creates, expires, downloads and deletes Velero
//! backups by reading and writing the Velero custom resources in a cluster.

pub mod adapters;
pub mod api;
pub mod config;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod services;

pub use error::{Error, Result};
