//! In-process Kubernetes API server for integration tests.
//!
//! Serves get, list, create, replace and patch for a fixed set of kinds over a
//! real HTTP port, backed by an in-memory store that tests can inspect.

pub mod http;
pub mod kinds;
pub mod store;

pub use http::{merge_kubeconfigs, HttpMockK8sServer, RunningHttpMockK8sServer};
pub use store::{ObjectStore, StoreError};
