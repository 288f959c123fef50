//! Generic typed client shared by every supported kind.
//!
//! A single [`ResourceClient`] replaces per-kind CRUD wrappers: the kind only
//! decides how its [`Api`] is scoped, via [`SyncKind`].

use std::{fmt::Debug, marker::PhantomData};

use k8s_openapi::api::{
	apps::v1::Deployment,
	batch::v1::CronJob,
	core::v1::{Service, ServiceAccount},
	rbac::v1::{ClusterRole, ClusterRoleBinding},
};
use kube::{
	api::{Api, ListParams, Patch, PatchParams, PostParams},
	Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::instrument;

use super::ResourceKind;
use crate::manifest::AnyManifest;

/// A Kubernetes kind that kubesync can load, sync and apply.
pub trait SyncKind:
	Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
	const KIND: ResourceKind;

	/// Typed API for this kind. `namespace` is ignored for cluster-wide kinds.
	fn api(client: Client, namespace: &str) -> Api<Self>;

	/// Narrow a decoded manifest down to this kind.
	fn from_any(manifest: AnyManifest) -> Option<Self>;
}

macro_rules! impl_sync_kind {
	($kind:ident, |$client:ident, $namespace:ident| $api:expr) => {
		impl SyncKind for $kind {
			const KIND: ResourceKind = ResourceKind::$kind;

			fn api($client: Client, $namespace: &str) -> Api<Self> {
				$api
			}

			fn from_any(manifest: AnyManifest) -> Option<Self> {
				match manifest {
					AnyManifest::$kind(obj) => Some(obj),
					_ => None,
				}
			}
		}
	};
}

impl_sync_kind!(Deployment, |client, namespace| Api::namespaced(client, namespace));
impl_sync_kind!(Service, |client, namespace| Api::namespaced(client, namespace));
impl_sync_kind!(CronJob, |client, namespace| Api::namespaced(client, namespace));
impl_sync_kind!(ServiceAccount, |client, namespace| Api::namespaced(client, namespace));
impl_sync_kind!(ClusterRole, |client, _namespace| Api::all(client));
impl_sync_kind!(ClusterRoleBinding, |client, _namespace| Api::all(client));

/// Errors returned by [`ResourceClient`] calls.
#[derive(Debug, Error)]
pub enum ClientError {
	#[error("{kind}/{name} not found")]
	NotFound { kind: ResourceKind, name: String },

	#[error("{kind} object has no metadata.name")]
	MissingName { kind: ResourceKind },

	#[error("{verb} {kind}/{name}")]
	Request {
		verb: &'static str,
		kind: ResourceKind,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},
}

impl ClientError {
	fn request(verb: &'static str, kind: ResourceKind, name: &str, source: kube::Error) -> Self {
		Self::Request {
			verb,
			kind,
			name: name.to_string(),
			source: Box::new(source),
		}
	}
}

fn is_not_found(err: &kube::Error) -> bool {
	matches!(err, kube::Error::Api(status) if status.code == 404)
}

/// Name of an object, required for every by-name call.
pub fn object_name<K: SyncKind>(obj: &K) -> Result<&str, ClientError> {
	obj.meta()
		.name
		.as_deref()
		.ok_or(ClientError::MissingName { kind: K::KIND })
}

/// Drop metadata the API server owns so the object can be created or
/// server-side applied on another cluster.
pub fn strip_server_metadata<K: Resource>(obj: &mut K) {
	let meta = obj.meta_mut();
	meta.uid = None;
	meta.resource_version = None;
	meta.creation_timestamp = None;
	meta.generation = None;
	meta.managed_fields = None;
	meta.self_link = None;
}

/// Typed CRUD access to one kind on one cluster.
pub struct ResourceClient<K> {
	client: Client,
	default_namespace: String,
	_kind: PhantomData<fn() -> K>,
}

impl<K> Clone for ResourceClient<K> {
	fn clone(&self) -> Self {
		Self {
			client: self.client.clone(),
			default_namespace: self.default_namespace.clone(),
			_kind: PhantomData,
		}
	}
}

impl<K: SyncKind> ResourceClient<K> {
	/// Objects without `metadata.namespace` are addressed in `default_namespace`.
	pub fn new(client: Client, default_namespace: impl Into<String>) -> Self {
		Self {
			client,
			default_namespace: default_namespace.into(),
			_kind: PhantomData,
		}
	}

	/// Namespace used for objects and calls that do not name one.
	pub fn default_namespace(&self) -> &str {
		&self.default_namespace
	}

	fn api(&self, namespace: Option<&str>) -> Api<K> {
		K::api(
			self.client.clone(),
			namespace.unwrap_or(&self.default_namespace),
		)
	}

	fn api_for(&self, obj: &K) -> Api<K> {
		self.api(obj.meta().namespace.as_deref())
	}

	/// List every object of this kind in `namespace` (or cluster-wide).
	#[instrument(skip(self), fields(kind = %K::KIND))]
	pub async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>, ClientError> {
		let list = self
			.api(namespace)
			.list(&ListParams::default())
			.await
			.map_err(|e| ClientError::request("listing", K::KIND, "*", e))?;
		Ok(list.items)
	}

	/// Fetch an object, mapping 404 to [`ClientError::NotFound`].
	#[instrument(skip(self), fields(kind = %K::KIND))]
	pub async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, ClientError> {
		self.get_opt(namespace, name)
			.await?
			.ok_or_else(|| ClientError::NotFound {
				kind: K::KIND,
				name: name.to_string(),
			})
	}

	/// Fetch an object, returning `None` when it does not exist.
	#[instrument(skip(self), fields(kind = %K::KIND))]
	pub async fn get_opt(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, ClientError> {
		match self.api(namespace).get(name).await {
			Ok(obj) => Ok(Some(obj)),
			Err(e) if is_not_found(&e) => Ok(None),
			Err(e) => Err(ClientError::request("getting", K::KIND, name, e)),
		}
	}

	#[instrument(skip_all, fields(kind = %K::KIND, name = %obj.name_any()))]
	pub async fn create(&self, obj: &K) -> Result<K, ClientError> {
		let name = object_name(obj)?;
		self.api_for(obj)
			.create(&PostParams::default(), obj)
			.await
			.map_err(|e| ClientError::request("creating", K::KIND, name, e))
	}

	/// Replace the live object. `obj` must carry the live `resourceVersion`.
	#[instrument(skip_all, fields(kind = %K::KIND, name = %obj.name_any()))]
	pub async fn update(&self, obj: &K) -> Result<K, ClientError> {
		let name = object_name(obj)?;
		self.api_for(obj)
			.replace(name, &PostParams::default(), obj)
			.await
			.map_err(|e| ClientError::request("updating", K::KIND, name, e))
	}

	/// Server-side apply `obj`, taking ownership of conflicting fields.
	#[instrument(skip_all, fields(kind = %K::KIND, name = %obj.name_any()))]
	pub async fn server_side_apply(&self, obj: &K, field_manager: &str) -> Result<K, ClientError> {
		let name = object_name(obj)?;
		let params = PatchParams::apply(field_manager).force();
		self.api_for(obj)
			.patch(name, &params, &Patch::Apply(obj))
			.await
			.map_err(|e| ClientError::request("applying", K::KIND, name, e))
	}
}

#[cfg(test)]
mod tests {
	use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

	use super::*;

	#[test]
	fn test_strip_server_metadata_keeps_identity() {
		let mut role = ClusterRole {
			metadata: ObjectMeta {
				name: Some("reader".to_string()),
				labels: Some([("team".to_string(), "infra".to_string())].into()),
				uid: Some("1234".to_string()),
				resource_version: Some("99".to_string()),
				generation: Some(3),
				..Default::default()
			},
			..Default::default()
		};

		strip_server_metadata(&mut role);

		assert_eq!(role.metadata.name.as_deref(), Some("reader"));
		assert!(role.metadata.labels.is_some());
		assert!(role.metadata.uid.is_none());
		assert!(role.metadata.resource_version.is_none());
		assert!(role.metadata.generation.is_none());
	}

	#[test]
	fn test_object_name_missing() {
		let sa = ServiceAccount::default();
		assert!(matches!(
			object_name(&sa),
			Err(ClientError::MissingName {
				kind: ResourceKind::ServiceAccount
			})
		));
	}

	#[test]
	fn test_from_any_narrows_by_kind() {
		let manifest = AnyManifest::Service(Service::default());
		assert!(<Service as SyncKind>::from_any(manifest.clone()).is_some());
		assert!(<Deployment as SyncKind>::from_any(manifest).is_none());
	}
}
