//! Sync Kubernetes manifests from a source cluster and apply them to a target
//! cluster.
//!
//! Local manifests are the list of objects to sync. For each one the object of
//! the same name is fetched from the source cluster, a per-kind
//! [`policy::MergePolicy`] decides which fields are carried over, and the
//! result is written to the target cluster.

pub mod commands;
pub mod config;
pub mod k8s;
pub mod manifest;
pub mod policy;
pub mod report;
pub mod sync;
pub mod telemetry;
pub mod yaml;
