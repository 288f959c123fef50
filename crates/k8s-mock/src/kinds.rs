//! Kinds the mock server knows how to route.

/// REST mapping for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockKind {
	pub api_version: &'static str,
	pub kind: &'static str,
	pub plural: &'static str,
	pub namespaced: bool,
}

pub const KINDS: &[MockKind] = &[
	MockKind::new("v1", "Namespace", "namespaces", false),
	MockKind::new("v1", "Service", "services", true),
	MockKind::new("v1", "ServiceAccount", "serviceaccounts", true),
	MockKind::new("apps/v1", "Deployment", "deployments", true),
	MockKind::new("batch/v1", "CronJob", "cronjobs", true),
	MockKind::new("rbac.authorization.k8s.io/v1", "ClusterRole", "clusterroles", false),
	MockKind::new(
		"rbac.authorization.k8s.io/v1",
		"ClusterRoleBinding",
		"clusterrolebindings",
		false,
	),
];

impl MockKind {
	const fn new(
		api_version: &'static str,
		kind: &'static str,
		plural: &'static str,
		namespaced: bool,
	) -> Self {
		Self {
			api_version,
			kind,
			plural,
			namespaced,
		}
	}

	/// Collection path, e.g. `/apis/apps/v1/namespaces/default/deployments`.
	///
	/// Namespaced kinds without a namespace are placed in `default`.
	pub fn collection_path(&self, namespace: Option<&str>) -> String {
		let prefix = if self.api_version.contains('/') {
			format!("/apis/{}", self.api_version)
		} else {
			format!("/api/{}", self.api_version)
		};
		if self.namespaced {
			format!(
				"{prefix}/namespaces/{}/{}",
				namespace.unwrap_or("default"),
				self.plural
			)
		} else {
			format!("{prefix}/{}", self.plural)
		}
	}
}

pub fn lookup(api_version: &str, kind: &str) -> Option<&'static MockKind> {
	KINDS
		.iter()
		.find(|k| k.api_version == api_version && k.kind == kind)
}

/// Where a request path points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
	Collection(String),
	Item { collection: String, name: String },
}

/// Classify an API path by its segment count after the group/version prefix.
pub fn classify(path: &str) -> Option<RequestTarget> {
	let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
	let prefix_len = match segments.first() {
		Some(&"api") => 2,
		Some(&"apis") => 3,
		_ => return None,
	};
	if segments.len() <= prefix_len {
		return None;
	}
	let rest = &segments[prefix_len..];

	let collection_len = match rest {
		[_] | [_, _] => 1,
		["namespaces", _, _] | ["namespaces", _, _, _] => 3,
		_ => return None,
	};
	let collection = format!("/{}", segments[..prefix_len + collection_len].join("/"));
	match rest.get(collection_len) {
		None => Some(RequestTarget::Collection(collection)),
		Some(name) => Some(RequestTarget::Item {
			collection,
			name: (*name).to_string(),
		}),
	}
}

/// Namespace encoded in a collection path, if any.
pub fn namespace_of(collection: &str) -> Option<&str> {
	let mut segments = collection.split('/');
	segments.find(|s| *s == "namespaces")?;
	let namespace = segments.next()?;
	segments.next().map(|_| namespace)
}
