//! Run bookkeeping and error formatting for log output.

use std::error::Error;

use tracing::info;

use crate::k8s::ResourceKind;

/// Counts for one sync run. Only logged; the exit status never depends on it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
	/// Manifests of the selected kind found under the manifest root.
	pub loaded: usize,
	/// Manifests merged with their source cluster counterpart.
	pub synced: usize,
	/// Manifests dropped because the source lookup failed.
	pub skipped: usize,
	pub created: usize,
	pub updated: usize,
	/// Objects written with server-side apply.
	pub applied: usize,
	pub failed: usize,
}

impl RunSummary {
	pub fn log(&self, kind: ResourceKind) {
		info!(
			kind = %kind,
			loaded = self.loaded,
			synced = self.synced,
			skipped = self.skipped,
			created = self.created,
			updated = self.updated,
			applied = self.applied,
			failed = self.failed,
			"sync finished"
		);
	}
}

/// Render an error and all of its sources as `outer: inner: root`.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
	std::iter::successors(Some(err), |&e| e.source())
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join(": ")
}

#[cfg(test)]
mod tests {
	use std::io;

	use super::*;
	use crate::k8s::resource::ClientError;

	#[test]
	fn test_error_chain_includes_sources() {
		#[derive(Debug, thiserror::Error)]
		#[error("applying Service/api")]
		struct Outer(#[source] io::Error);

		let err = Outer(io::Error::new(io::ErrorKind::Other, "connection reset"));
		assert_eq!(error_chain(&err), "applying Service/api: connection reset");
	}

	#[test]
	fn test_error_chain_single() {
		let err = ClientError::NotFound {
			kind: ResourceKind::CronJob,
			name: "report".to_string(),
		};
		assert_eq!(error_chain(&err), "CronJob/report not found");
	}
}
