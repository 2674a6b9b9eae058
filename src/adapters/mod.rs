//! Adapters between the services and the Kubernetes API

mod cluster_gateway;
mod typed;

pub use cluster_gateway::*;
pub use typed::*;
