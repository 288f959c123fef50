//! Writing synced objects to the target cluster.
//!
//! Client-side apply reads the live object, folds in the fields owned by the
//! kind's [`MergePolicy`] and replaces it, or creates the object when it does
//! not exist. Server-side apply sends the whole object under a field manager.

use std::fmt;

use clap::ValueEnum;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::resource::{object_name, strip_server_metadata, ClientError, ResourceClient, SyncKind};
use crate::{policy::MergePolicy, report::{error_chain, RunSummary}};

/// How objects are written to the target cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ApplyStrategy {
	/// Get, merge policy-owned fields, then update or create.
	#[default]
	Client,
	/// Server-side apply with forced ownership.
	Server,
}

impl fmt::Display for ApplyStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApplyStrategy::Client => f.write_str("client"),
			ApplyStrategy::Server => f.write_str("server"),
		}
	}
}

#[derive(Debug, Error)]
pub enum ApplyError {
	#[error("reading live object")]
	Lookup(#[source] ClientError),

	#[error(transparent)]
	Write(ClientError),
}

/// What happened to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
	Created,
	Updated,
	Applied,
}

/// Applies objects of one kind to the target cluster.
pub struct ApplyEngine<K, P> {
	client: ResourceClient<K>,
	policy: P,
	strategy: ApplyStrategy,
	field_manager: String,
}

impl<K: SyncKind, P: MergePolicy<K>> ApplyEngine<K, P> {
	pub fn new(
		client: ResourceClient<K>,
		policy: P,
		strategy: ApplyStrategy,
		field_manager: impl Into<String>,
	) -> Self {
		Self {
			client,
			policy,
			strategy,
			field_manager: field_manager.into(),
		}
	}

	/// Apply a single object.
	#[instrument(skip_all, fields(kind = %K::KIND, name = ?desired.meta().name, strategy = %self.strategy))]
	pub async fn apply(&self, desired: &K) -> Result<ApplyOutcome, ApplyError> {
		match self.strategy {
			ApplyStrategy::Server => {
				let mut obj = desired.clone();
				strip_server_metadata(&mut obj);
				self.client
					.server_side_apply(&obj, &self.field_manager)
					.await
					.map_err(ApplyError::Write)?;
				Ok(ApplyOutcome::Applied)
			}
			ApplyStrategy::Client => {
				let name = object_name(desired).map_err(ApplyError::Write)?;
				let live = self
					.client
					.get_opt(desired.meta().namespace.as_deref(), name)
					.await
					.map_err(ApplyError::Lookup)?;

				match live {
					Some(mut live) => {
						self.policy.merge_into_live(&mut live, desired);
						self.client.update(&live).await.map_err(ApplyError::Write)?;
						Ok(ApplyOutcome::Updated)
					}
					None => {
						let mut obj = desired.clone();
						strip_server_metadata(&mut obj);
						self.client.create(&obj).await.map_err(ApplyError::Write)?;
						Ok(ApplyOutcome::Created)
					}
				}
			}
		}
	}

	/// Apply every object in order. Failures are logged and counted; they
	/// never stop the remaining objects.
	pub async fn apply_all(&self, objects: &[K], summary: &mut RunSummary) {
		for obj in objects {
			let name = obj.meta().name.as_deref().unwrap_or("<unnamed>");
			match self.apply(obj).await {
				Ok(outcome) => {
					match outcome {
						ApplyOutcome::Created => summary.created += 1,
						ApplyOutcome::Updated => summary.updated += 1,
						ApplyOutcome::Applied => summary.applied += 1,
					}
					info!(kind = %K::KIND, name = %name, ?outcome, "applied to target cluster");
				}
				Err(e @ ApplyError::Lookup(_)) => {
					summary.failed += 1;
					warn!(kind = %K::KIND, name = %name, error = %error_chain(&e), "skipping object");
				}
				Err(e) => {
					summary.failed += 1;
					error!(kind = %K::KIND, name = %name, error = %error_chain(&e), "failed to apply object");
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_strategy_parses_from_cli_value() {
		assert_eq!(
			ApplyStrategy::from_str("server", true).unwrap(),
			ApplyStrategy::Server
		);
		assert_eq!(ApplyStrategy::default(), ApplyStrategy::Client);
		assert_eq!(ApplyStrategy::Server.to_string(), "server");
	}

	#[test]
	fn test_lookup_error_keeps_source() {
		let err = ApplyError::Lookup(ClientError::NotFound {
			kind: crate::k8s::ResourceKind::Deployment,
			name: "web".to_string(),
		});
		assert_eq!(error_chain(&err), "reading live object: Deployment/web not found");
	}
}
