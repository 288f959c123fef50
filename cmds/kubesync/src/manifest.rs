//! Loading manifests from a directory tree.
//!
//! Every `.yml`/`.yaml` file under the root is read and split into YAML
//! documents. Each document is matched against the supported kinds by its
//! `apiVersion`/`kind`; documents of other kinds are ignored, and documents
//! that fail to decode are logged and skipped.

use std::{
	fs,
	path::{Path, PathBuf},
};

use k8s_openapi::api::{
	apps::v1::Deployment,
	batch::v1::CronJob,
	core::v1::{Service, ServiceAccount},
	rbac::v1::{ClusterRole, ClusterRoleBinding},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::k8s::{resource::SyncKind, ResourceKind};

/// A decoded manifest of one of the supported kinds.
#[derive(Debug, Clone)]
pub enum AnyManifest {
	Deployment(Deployment),
	Service(Service),
	CronJob(CronJob),
	ServiceAccount(ServiceAccount),
	ClusterRole(ClusterRole),
	ClusterRoleBinding(ClusterRoleBinding),
}

impl AnyManifest {
	pub fn kind(&self) -> ResourceKind {
		match self {
			AnyManifest::Deployment(_) => ResourceKind::Deployment,
			AnyManifest::Service(_) => ResourceKind::Service,
			AnyManifest::CronJob(_) => ResourceKind::CronJob,
			AnyManifest::ServiceAccount(_) => ResourceKind::ServiceAccount,
			AnyManifest::ClusterRole(_) => ResourceKind::ClusterRole,
			AnyManifest::ClusterRoleBinding(_) => ResourceKind::ClusterRoleBinding,
		}
	}

	/// Decode a single YAML document.
	///
	/// Returns `Ok(None)` when the document is not one of the supported kinds.
	pub fn from_document(doc: serde_yaml::Value) -> Result<Option<Self>, serde_yaml::Error> {
		let api_version = doc.get("apiVersion").and_then(serde_yaml::Value::as_str);
		let kind = doc.get("kind").and_then(serde_yaml::Value::as_str);
		let Some(kind) = api_version
			.zip(kind)
			.and_then(|(api_version, kind)| ResourceKind::from_type_meta(api_version, kind))
		else {
			return Ok(None);
		};

		let manifest = match kind {
			ResourceKind::Deployment => AnyManifest::Deployment(serde_yaml::from_value(doc)?),
			ResourceKind::Service => AnyManifest::Service(serde_yaml::from_value(doc)?),
			ResourceKind::CronJob => AnyManifest::CronJob(serde_yaml::from_value(doc)?),
			ResourceKind::ServiceAccount => AnyManifest::ServiceAccount(serde_yaml::from_value(doc)?),
			ResourceKind::ClusterRole => AnyManifest::ClusterRole(serde_yaml::from_value(doc)?),
			ResourceKind::ClusterRoleBinding => {
				AnyManifest::ClusterRoleBinding(serde_yaml::from_value(doc)?)
			}
		};
		Ok(Some(manifest))
	}
}

/// A typed manifest together with the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedManifest<K> {
	pub path: PathBuf,
	pub object: K,
}

#[derive(Debug, Error)]
pub enum LoadError {
	#[error("manifest root {} does not exist", .0.display())]
	RootNotFound(PathBuf),

	#[error("manifest root {} is not a directory", .0.display())]
	RootNotDirectory(PathBuf),
}

/// Whether a path has a YAML extension (case-insensitive).
fn is_yaml_file(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// Load every supported manifest under `root`, in file name order.
#[instrument]
pub fn load_all(root: &Path) -> Result<Vec<LoadedManifest<AnyManifest>>, LoadError> {
	if !root.exists() {
		return Err(LoadError::RootNotFound(root.to_path_buf()));
	}
	if !root.is_dir() {
		return Err(LoadError::RootNotDirectory(root.to_path_buf()));
	}

	let mut manifests = Vec::new();
	for entry in WalkDir::new(root).sort_by_file_name() {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => {
				warn!(error = %e, "skipping unreadable path");
				continue;
			}
		};
		if !entry.file_type().is_file() || !is_yaml_file(entry.path()) {
			continue;
		}
		load_file(entry.path(), &mut manifests);
	}

	debug!(count = manifests.len(), "loaded manifests");
	Ok(manifests)
}

/// Load the manifests of kind `K` under `root`.
pub fn load<K: SyncKind>(root: &Path) -> Result<Vec<LoadedManifest<K>>, LoadError> {
	let manifests = load_all(root)?
		.into_iter()
		.filter_map(|m| {
			K::from_any(m.object).map(|object| LoadedManifest {
				path: m.path,
				object,
			})
		})
		.collect();
	Ok(manifests)
}

fn load_file(path: &Path, out: &mut Vec<LoadedManifest<AnyManifest>>) {
	let content = match fs::read_to_string(path) {
		Ok(content) => content,
		Err(e) => {
			warn!(path = %path.display(), error = %e, "failed to read YAML file");
			return;
		}
	};

	for document in serde_yaml::Deserializer::from_str(&content) {
		let value = match serde_yaml::Value::deserialize(document) {
			Ok(serde_yaml::Value::Null) => continue,
			Ok(value) => value,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "failed to parse YAML file");
				return;
			}
		};

		match AnyManifest::from_document(value) {
			Ok(Some(object)) => out.push(LoadedManifest {
				path: path.to_path_buf(),
				object,
			}),
			Ok(None) => debug!(path = %path.display(), "ignoring document of unsupported kind"),
			Err(e) => warn!(path = %path.display(), error = %e, "failed to decode manifest"),
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use indoc::indoc;
	use tempfile::TempDir;

	use super::*;

	const DEPLOYMENT: &str = indoc! {"
		apiVersion: apps/v1
		kind: Deployment
		metadata:
		  name: billing
		  labels:
		    app: billing
		spec:
		  replicas: 2
		  selector:
		    matchLabels:
		      app: billing
		  template:
		    metadata:
		      labels:
		        app: billing
		    spec:
		      containers:
		        - name: billing
		          image: billing:v1
	"};

	const SERVICE: &str = indoc! {"
		apiVersion: v1
		kind: Service
		metadata:
		  name: billing
		spec:
		  ports:
		    - port: 80
		      targetPort: http
	"};

	fn write(dir: &Path, name: &str, content: &str) {
		let path = dir.join(name);
		fs::create_dir_all(path.parent().unwrap()).unwrap();
		fs::write(path, content).unwrap();
	}

	#[test]
	fn test_load_walks_nested_directories() {
		let temp = TempDir::new().unwrap();
		write(temp.path(), "billing/deployment-billing.yaml", DEPLOYMENT);
		write(temp.path(), "billing/service.yml", SERVICE);

		let all = load_all(temp.path()).unwrap();
		let kinds: Vec<_> = all.iter().map(|m| m.object.kind()).collect();
		assert_eq!(kinds, vec![ResourceKind::Deployment, ResourceKind::Service]);

		let deployments = load::<Deployment>(temp.path()).unwrap();
		assert_eq!(deployments.len(), 1);
		assert_eq!(deployments[0].object.metadata.name.as_deref(), Some("billing"));
		assert!(deployments[0].path.ends_with("billing/deployment-billing.yaml"));
	}

	#[test]
	fn test_load_ignores_other_extensions_and_kinds() {
		let temp = TempDir::new().unwrap();
		write(temp.path(), "notes.txt", DEPLOYMENT);
		write(
			temp.path(),
			"configmap.yaml",
			"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n",
		);

		assert!(load_all(temp.path()).unwrap().is_empty());
	}

	#[test]
	fn test_load_uppercase_extension() {
		let temp = TempDir::new().unwrap();
		write(temp.path(), "SERVICE.YAML", SERVICE);

		assert_eq!(load::<Service>(temp.path()).unwrap().len(), 1);
	}

	#[test]
	fn test_load_multi_document_file() {
		let temp = TempDir::new().unwrap();
		write(
			temp.path(),
			"bundle.yaml",
			&format!("{DEPLOYMENT}---\n{SERVICE}---\n"),
		);

		let all = load_all(temp.path()).unwrap();
		assert_eq!(all.len(), 2);
	}

	#[test]
	fn test_load_skips_undecodable_manifest() {
		let temp = TempDir::new().unwrap();
		write(
			temp.path(),
			"broken.yaml",
			"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: broken\nspec:\n  replicas: many\n",
		);
		write(temp.path(), "invalid.yaml", "kind: [unterminated\n");
		write(temp.path(), "service.yaml", SERVICE);

		let all = load_all(temp.path()).unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(all[0].object.kind(), ResourceKind::Service);
	}

	#[test]
	fn test_load_missing_root() {
		let temp = TempDir::new().unwrap();
		let missing = temp.path().join("nope");
		assert_matches!(load_all(&missing), Err(LoadError::RootNotFound(path)) if path == missing);
	}
}
