//! The sync step: merge local manifests with their source cluster counterparts.

use std::{collections::BTreeSet, future::Future};

use tracing::{error, info, instrument, warn};

use crate::{
	k8s::{
		resource::{object_name, ClientError, ResourceClient, SyncKind},
		ResourceScope,
	},
	manifest::LoadedManifest,
	policy::MergePolicy,
	report::error_chain,
};

/// Where the sync step looks up the current state of an object.
pub trait ObjectSource<K> {
	fn fetch(
		&self,
		namespace: Option<&str>,
		name: &str,
	) -> impl Future<Output = Result<K, ClientError>> + Send;
}

impl<K: SyncKind> ObjectSource<K> for ResourceClient<K> {
	fn fetch(
		&self,
		namespace: Option<&str>,
		name: &str,
	) -> impl Future<Output = Result<K, ClientError>> + Send {
		self.get(namespace, name)
	}
}

/// Merge every manifest with the object of the same name from `source`.
///
/// Manifests without a name, or whose lookup fails, are logged and left out of
/// the result. Order is preserved for the rest.
#[instrument(skip_all, fields(kind = %K::KIND, count = manifests.len()))]
pub async fn sync_manifests<K, S, P>(
	source: &S,
	policy: &P,
	manifests: Vec<LoadedManifest<K>>,
) -> Vec<K>
where
	K: SyncKind,
	S: ObjectSource<K>,
	P: MergePolicy<K>,
{
	let mut synced = Vec::with_capacity(manifests.len());

	for LoadedManifest { path, object: mut local } in manifests {
		let name = match object_name(&local) {
			Ok(name) => name.to_string(),
			Err(e) => {
				warn!(path = %path.display(), error = %e, "skipping manifest");
				continue;
			}
		};
		let namespace = local.meta().namespace.clone();

		match source.fetch(namespace.as_deref(), &name).await {
			Ok(mut remote) => {
				policy.merge_from_source(&mut local, &mut remote);
				info!(name = %name, "synced from source cluster");
				synced.push(local);
			}
			Err(e) => {
				error!(
					name = %name,
					path = %path.display(),
					error = %error_chain(&e),
					"failed to get object from source cluster"
				);
			}
		}
	}

	synced
}

/// Objects on the source cluster that no local manifest tracks, as sorted
/// `namespace/name` keys (bare names for cluster-wide kinds).
///
/// Namespaced kinds are listed in the client's default namespace and in every
/// namespace a manifest names.
#[instrument(skip_all, fields(kind = %K::KIND))]
pub async fn untracked_objects<K: SyncKind>(
	source: &ResourceClient<K>,
	manifests: &[LoadedManifest<K>],
) -> Result<Vec<String>, ClientError> {
	let default_namespace = source.default_namespace();
	let tracked: BTreeSet<String> = manifests
		.iter()
		.filter_map(|m| object_key(&m.object, default_namespace))
		.collect();

	let mut listed = Vec::new();
	match K::KIND.scope() {
		ResourceScope::ClusterWide => listed.extend(source.list(None).await?),
		ResourceScope::Namespaced => {
			let namespaces: BTreeSet<&str> = manifests
				.iter()
				.filter_map(|m| m.object.meta().namespace.as_deref())
				.chain(std::iter::once(default_namespace))
				.collect();
			for namespace in namespaces {
				listed.extend(source.list(Some(namespace)).await?);
			}
		}
	}

	let untracked = untracked_keys(&listed, &tracked, default_namespace);
	for key in &untracked {
		warn!(object = %key, "object on source cluster has no local manifest");
	}
	Ok(untracked)
}

/// `namespace/name` for namespaced kinds, `name` for cluster-wide ones.
fn object_key<K: SyncKind>(obj: &K, default_namespace: &str) -> Option<String> {
	let meta = obj.meta();
	let name = meta.name.as_deref()?;
	Some(match K::KIND.scope() {
		ResourceScope::ClusterWide => name.to_string(),
		ResourceScope::Namespaced => {
			let namespace = meta.namespace.as_deref().unwrap_or(default_namespace);
			format!("{namespace}/{name}")
		}
	})
}

fn untracked_keys<K: SyncKind>(
	objects: &[K],
	tracked: &BTreeSet<String>,
	default_namespace: &str,
) -> Vec<String> {
	let mut keys: Vec<String> = objects
		.iter()
		.filter_map(|o| object_key(o, default_namespace))
		.filter(|key| !tracked.contains(key))
		.collect();
	keys.sort();
	keys.dedup();
	keys
}

#[cfg(test)]
mod tests {
	use std::{collections::HashMap, path::PathBuf};

	use k8s_openapi::{
		api::{
			apps::v1::Deployment,
			core::v1::{Service, ServiceAccount},
		},
		apimachinery::pkg::apis::meta::v1::ObjectMeta,
	};

	use super::*;
	use crate::policy::{DeploymentPolicy, ServiceAccountPolicy, ServicePolicy};

	/// In-memory source keyed by object name.
	struct MapSource<K>(HashMap<String, K>);

	impl<K: SyncKind> ObjectSource<K> for MapSource<K> {
		fn fetch(
			&self,
			_namespace: Option<&str>,
			name: &str,
		) -> impl Future<Output = Result<K, ClientError>> + Send {
			let result = self.0.get(name).cloned().ok_or_else(|| ClientError::NotFound {
				kind: K::KIND,
				name: name.to_string(),
			});
			std::future::ready(result)
		}
	}

	impl<K: SyncKind> MapSource<K> {
		fn of(objects: impl IntoIterator<Item = K>) -> Self {
			Self(
				objects
					.into_iter()
					.map(|o| (o.meta().name.clone().unwrap_or_default(), o))
					.collect(),
			)
		}
	}

	fn loaded<K>(object: K) -> LoadedManifest<K> {
		LoadedManifest {
			path: PathBuf::from("app/manifest.yaml"),
			object,
		}
	}

	fn deployment(yaml: &str) -> Deployment {
		serde_yaml::from_str(yaml).unwrap()
	}

	#[tokio::test]
	async fn test_deployment_takes_image_and_replicas_from_source() {
		let local = deployment(indoc::indoc! {"
			apiVersion: apps/v1
			kind: Deployment
			metadata:
			  name: foo
			  labels:
			    app: foo
			    tier: web
			spec:
			  replicas: 2
			  selector:
			    matchLabels:
			      app: foo
			  template:
			    spec:
			      containers:
			        - name: foo
			          image: foo:v1
		"});
		let remote = deployment(indoc::indoc! {"
			apiVersion: apps/v1
			kind: Deployment
			metadata:
			  name: foo
			  labels:
			    app: something-else
			spec:
			  replicas: 5
			  selector:
			    matchLabels:
			      app: foo
			  template:
			    spec:
			      containers:
			        - name: foo
			          image: foo:v2
		"});

		let synced = sync_manifests(
			&MapSource::of([remote]),
			&DeploymentPolicy,
			vec![loaded(local.clone())],
		)
		.await;

		assert_eq!(synced.len(), 1);
		let merged = &synced[0];
		let spec = merged.spec.as_ref().unwrap();
		assert_eq!(spec.replicas, Some(5));
		assert_eq!(
			spec.template.spec.as_ref().unwrap().containers[0].image.as_deref(),
			Some("foo:v2")
		);
		assert_eq!(merged.metadata.name, local.metadata.name);
		assert_eq!(merged.metadata.labels, local.metadata.labels);
	}

	#[tokio::test]
	async fn test_missing_source_object_is_skipped() {
		let named = |name: &str| ServiceAccount {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				..Default::default()
			},
			..Default::default()
		};

		let synced = sync_manifests(
			&MapSource::of([named("present")]),
			&ServiceAccountPolicy,
			vec![
				loaded(named("absent")),
				loaded(named("present")),
				loaded(ServiceAccount::default()),
			],
		)
		.await;

		let names: Vec<_> = synced.iter().map(|sa| sa.metadata.name.as_deref()).collect();
		assert_eq!(names, vec![Some("present")]);
	}

	#[tokio::test]
	async fn test_service_only_needs_source_to_exist() {
		let service = Service {
			metadata: ObjectMeta {
				name: Some("api".to_string()),
				annotations: Some(
					[(
						crate::policy::DNS_HOSTNAME_ANNOTATION.to_string(),
						"api.example.com".to_string(),
					)]
					.into(),
				),
				..Default::default()
			},
			..Default::default()
		};
		let remote = Service {
			metadata: ObjectMeta {
				name: Some("api".to_string()),
				..Default::default()
			},
			..Default::default()
		};

		let synced = sync_manifests(
			&MapSource::of([remote]),
			&ServicePolicy::new("blue", Vec::new()),
			vec![loaded(service)],
		)
		.await;

		let annotations = synced[0].metadata.annotations.as_ref().unwrap();
		assert_eq!(
			annotations[crate::policy::DNS_HOSTNAME_ANNOTATION],
			"api.blue.example.com"
		);
	}

	fn service_account(namespace: Option<&str>, name: &str) -> ServiceAccount {
		ServiceAccount {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				namespace: namespace.map(str::to_string),
				..Default::default()
			},
			..Default::default()
		}
	}

	#[test]
	fn test_untracked_keys_compare_namespace_and_name() {
		let objects = vec![
			service_account(Some("default"), "zeta"),
			service_account(Some("jobs"), "tracked"),
			service_account(Some("default"), "tracked"),
			service_account(Some("default"), "alpha"),
		];
		let tracked = BTreeSet::from(["jobs/tracked".to_string()]);

		assert_eq!(
			untracked_keys(&objects, &tracked, "default"),
			vec!["default/alpha", "default/tracked", "default/zeta"]
		);
	}

	#[test]
	fn test_object_key_by_scope() {
		assert_eq!(
			object_key(&service_account(None, "deployer"), "apps").as_deref(),
			Some("apps/deployer")
		);
		let role = k8s_openapi::api::rbac::v1::ClusterRole {
			metadata: ObjectMeta {
				name: Some("reader".to_string()),
				..Default::default()
			},
			..Default::default()
		};
		assert_eq!(object_key(&role, "apps").as_deref(), Some("reader"));
	}
}
