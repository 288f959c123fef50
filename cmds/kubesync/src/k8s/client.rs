//! Kubernetes cluster connection management.

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context or cluster named `{0}` was found. Please check your kubeconfig")]
	ContextNotFound(String),

	#[error("kubeconfig has no current context and none was given")]
	NoCurrentContext,

	#[error("reading kubeconfig {}", .path.display())]
	ReadKubeconfig {
		path: PathBuf,
		#[source]
		source: KubeconfigError,
	},

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Read a kubeconfig from an explicit path, or from `$KUBECONFIG` / `~/.kube/config`.
pub fn load_kubeconfig(path: Option<&Path>) -> Result<Kubeconfig, ConnectionError> {
	match path {
		Some(path) => Kubeconfig::read_from(path).map_err(|source| ConnectionError::ReadKubeconfig {
			path: path.to_path_buf(),
			source,
		}),
		None => Ok(Kubeconfig::read()?),
	}
}

/// Represents a connection to a Kubernetes cluster.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	/// Context the connection was built from.
	context: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("context", &self.context)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect to a cluster described by `kubeconfig`.
	///
	/// `name` is matched against context names first, then against cluster
	/// names referenced by some context. With no name the kubeconfig's current
	/// context is used.
	#[instrument(skip(kubeconfig))]
	pub async fn connect(kubeconfig: Kubeconfig, name: Option<&str>) -> Result<Self, ConnectionError> {
		let context = match name {
			Some(name) => resolve_context(&kubeconfig, name)?,
			None => kubeconfig
				.current_context
				.clone()
				.ok_or(ConnectionError::NoCurrentContext)?,
		};

		tracing::debug!(context = %context, "building client config");

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: Some(context.clone()),
				..Default::default()
			},
		)
		.await?;

		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let client = Client::try_from(config)?;
		let server_version = client.apiserver_version().await?;

		tracing::debug!(
			context = %context,
			server_version = %format!("{}.{}", server_version.major, server_version.minor),
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			context,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// The kubeconfig context this connection uses.
	pub fn context(&self) -> &str {
		&self.context
	}
}

/// Resolve a context by its own name, or by the name of the cluster it points at.
fn resolve_context(kubeconfig: &Kubeconfig, name: &str) -> Result<String, ConnectionError> {
	if kubeconfig.contexts.iter().any(|c| c.name == name) {
		return Ok(name.to_string());
	}

	kubeconfig
		.contexts
		.iter()
		.find(|c| c.context.as_ref().is_some_and(|ctx| ctx.cluster == name))
		.map(|c| c.name.clone())
		.ok_or_else(|| ConnectionError::ContextNotFound(name.to_string()))
}
