//! Kubernetes access for the sync and apply steps.
//!
//! Everything here talks to the API server through kube-rs typed APIs; the
//! six supported kinds are described by [`ResourceKind`].

use std::fmt;

pub mod apply;
pub mod client;
pub mod resource;

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, Service).
	Namespaced,

	/// Resource is cluster-wide (e.g., ClusterRole).
	ClusterWide,
}

/// The resource kinds kubesync knows how to load, sync and apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
	Deployment,
	Service,
	CronJob,
	ServiceAccount,
	ClusterRole,
	ClusterRoleBinding,
}

impl ResourceKind {
	/// Every kind, in CLI flag precedence order.
	pub const ALL: [ResourceKind; 6] = [
		ResourceKind::Deployment,
		ResourceKind::Service,
		ResourceKind::CronJob,
		ResourceKind::ServiceAccount,
		ResourceKind::ClusterRole,
		ResourceKind::ClusterRoleBinding,
	];

	/// The `kind` field value.
	pub fn kind(self) -> &'static str {
		match self {
			ResourceKind::Deployment => "Deployment",
			ResourceKind::Service => "Service",
			ResourceKind::CronJob => "CronJob",
			ResourceKind::ServiceAccount => "ServiceAccount",
			ResourceKind::ClusterRole => "ClusterRole",
			ResourceKind::ClusterRoleBinding => "ClusterRoleBinding",
		}
	}

	/// The `apiVersion` field value.
	pub fn api_version(self) -> &'static str {
		match self {
			ResourceKind::Deployment => "apps/v1",
			ResourceKind::Service | ResourceKind::ServiceAccount => "v1",
			ResourceKind::CronJob => "batch/v1",
			ResourceKind::ClusterRole | ResourceKind::ClusterRoleBinding => {
				"rbac.authorization.k8s.io/v1"
			}
		}
	}

	pub fn scope(self) -> ResourceScope {
		match self {
			ResourceKind::ClusterRole | ResourceKind::ClusterRoleBinding => {
				ResourceScope::ClusterWide
			}
			_ => ResourceScope::Namespaced,
		}
	}

	/// Look up a kind from a manifest's `apiVersion` and `kind`.
	pub fn from_type_meta(api_version: &str, kind: &str) -> Option<Self> {
		Self::ALL
			.into_iter()
			.find(|k| k.api_version() == api_version && k.kind() == kind)
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.kind())
	}
}
