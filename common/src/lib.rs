//! Shared types, errors, and the resource-store adapter used by every
//! component of the cluster gateway's control plane.

pub mod age;
pub mod crd;
pub mod duration;
pub mod error;
pub mod kubeconfig;
pub mod labels;
pub mod resource_store;
pub mod sanitize;
pub mod tracing_telemetry;
