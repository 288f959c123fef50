//! Configuration for environments and merge behavior.
//!
//! Built-in defaults cover the `alpha`, `qa` and `prod` environments. A
//! `.kubesync.yaml` file (searched from the working directory upward, or given
//! with `--config`) can override or add environments:
//!
//! ```yaml
//! dnsSegment: blue
//! fieldManager: k8s-resources-sync
//! environments:
//!   alpha:
//!     manifestRoot: ~/backup/eks/dev/alphaeks/app-services
//!     privateSubnets: [subnet-0a1b, subnet-2c3d]
//! ```

use std::{
	collections::BTreeMap,
	fs, io,
	path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

/// The name of the config file kubesync looks for
pub const CONFIG_FILE_NAME: &str = ".kubesync.yaml";

/// Label inserted into external-dns hostnames after their first label.
pub const DEFAULT_DNS_SEGMENT: &str = "blue";

/// Field manager used for server-side apply.
pub const DEFAULT_FIELD_MANAGER: &str = "k8s-resources-sync";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("failed to parse config file: {}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("unknown environment `{name}` (known: {known}); pass --path to sync an explicit directory")]
	UnknownEnvironment { name: String, known: String },

	#[error("environment `{0}` has no manifestRoot; pass --path")]
	MissingManifestRoot(String),
}

/// Per-environment settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentConfig {
	/// Directory holding the environment's manifests.
	pub manifest_root: Option<PathBuf>,
	/// Subnets written to the load balancer subnet annotation of internal services.
	pub private_subnets: Vec<String>,
}

/// Effective configuration after merging defaults with an optional file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
	pub dns_segment: String,
	pub field_manager: String,
	pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl Default for SyncConfig {
	fn default() -> Self {
		let environments = [
			("alpha", "/home/ssm-user/backup/eks/dev/alphaeks/app-services"),
			("qa", "/home/ssm-user/backup/eks/qa/qaeks/app-services"),
			("prod", "/home/ssm-user/backup/eks/prod/prodeks/app-services"),
		]
		.into_iter()
		.map(|(name, root)| {
			(
				name.to_string(),
				EnvironmentConfig {
					manifest_root: Some(PathBuf::from(root)),
					private_subnets: Vec::new(),
				},
			)
		})
		.collect();

		Self {
			dns_segment: DEFAULT_DNS_SEGMENT.to_string(),
			field_manager: DEFAULT_FIELD_MANAGER.to_string(),
			environments,
		}
	}
}

/// On-disk shape of `.kubesync.yaml`; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
	#[serde(default)]
	pub dns_segment: Option<String>,
	#[serde(default)]
	pub field_manager: Option<String>,
	#[serde(default)]
	pub environments: BTreeMap<String, FileEnvironment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileEnvironment {
	#[serde(default)]
	pub manifest_root: Option<PathBuf>,
	#[serde(default)]
	pub private_subnets: Option<Vec<String>>,
}

/// An environment resolved against CLI overrides, ready for a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
	pub name: String,
	pub manifest_root: PathBuf,
	pub private_subnets: Vec<String>,
}

impl FileConfig {
	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}
}

impl SyncConfig {
	/// Defaults, overlaid with `explicit` if given, otherwise with the nearest
	/// `.kubesync.yaml` above `start_dir`.
	pub fn load(explicit: Option<&Path>, start_dir: &Path) -> Result<Self, ConfigError> {
		let mut config = Self::default();
		let path = match explicit {
			Some(path) => Some(path.to_path_buf()),
			None => find_config_file(start_dir),
		};
		if let Some(path) = path {
			tracing::debug!(path = %path.display(), "loading config file");
			config.merge_from(FileConfig::load_from_file(&path)?);
		}
		Ok(config)
	}

	/// Overlay values set in a config file.
	pub fn merge_from(&mut self, file: FileConfig) {
		if let Some(segment) = file.dns_segment {
			self.dns_segment = segment;
		}
		if let Some(manager) = file.field_manager {
			self.field_manager = manager;
		}
		for (name, env) in file.environments {
			let target = self.environments.entry(name).or_default();
			if env.manifest_root.is_some() {
				target.manifest_root = env.manifest_root;
			}
			if let Some(subnets) = env.private_subnets {
				target.private_subnets = subnets;
			}
		}
	}

	/// Resolve the manifest root and subnets for `name`.
	///
	/// `path_override` wins over the configured root and also allows
	/// environments that are not configured at all.
	pub fn resolve(
		&self,
		name: &str,
		path_override: Option<&Path>,
	) -> Result<ResolvedEnvironment, ConfigError> {
		let env = match (self.environments.get(name), path_override) {
			(Some(env), _) => env.clone(),
			(None, Some(_)) => EnvironmentConfig::default(),
			(None, None) => {
				return Err(ConfigError::UnknownEnvironment {
					name: name.to_string(),
					known: self.environments.keys().cloned().collect::<Vec<_>>().join(", "),
				})
			}
		};

		let root = path_override
			.map(Path::to_path_buf)
			.or(env.manifest_root)
			.ok_or_else(|| ConfigError::MissingManifestRoot(name.to_string()))?;

		Ok(ResolvedEnvironment {
			name: name.to_string(),
			manifest_root: expand_home(&root),
			private_subnets: env.private_subnets,
		})
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());
	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.is_file())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
	let Ok(rest) = path.strip_prefix("~") else {
		return path.to_path_buf();
	};
	match dirs::home_dir() {
		Some(home) => home.join(rest),
		None => path.to_path_buf(),
	}
}
