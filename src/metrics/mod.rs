//! Prometheus metrics for the Velero backup manager
//!
//! This module exposes metrics for monitoring service health and performance.

mod prometheus;

pub use prometheus::*;
