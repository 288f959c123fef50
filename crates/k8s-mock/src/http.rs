//! HTTP front end for the mock API server, built on wiremock.
//!
//! The server listens on a real port, so clients connect through an ordinary
//! kubeconfig returned by [`RunningHttpMockK8sServer::kubeconfig`].

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use crate::{
	kinds::{classify, lookup, RequestTarget},
	store::{ObjectStore, StoreError},
};

/// Store shared between the request handlers and the test.
#[derive(Clone, Default)]
pub struct SharedStore(Arc<RwLock<ObjectStore>>);

impl SharedStore {
	pub fn read(&self) -> RwLockReadGuard<'_, ObjectStore> {
		self.0.read().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn write(&self) -> RwLockWriteGuard<'_, ObjectStore> {
		self.0.write().unwrap_or_else(PoisonError::into_inner)
	}
}

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// Objects present when the server starts, as full manifests.
	#[builder(default)]
	resources: Vec<Value>,
	/// Path prefixes answered with `500 Internal Server Error`.
	#[builder(default)]
	failing_paths: Vec<String>,
	/// Minor version reported by `/version`.
	#[builder(default = 31)]
	minor_version: u32,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	store: SharedStore,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "started mock API server");

		let store = SharedStore::default();
		{
			let mut objects = store.write();
			let default_ns = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "default"}});
			for manifest in std::iter::once(default_ns).chain(self.resources) {
				match collection_for(&manifest) {
					Some(collection) => {
						trace!(collection = %collection, "seeding object");
						if let Err(e) = objects.seed(&collection, manifest) {
							warn!(error = ?e, "skipping seed object");
						}
					}
					None => warn!("skipping seed object of unknown kind"),
				}
			}
		}

		mount_failures(&server, &self.failing_paths).await;
		mount_version(&server, self.minor_version).await;
		mount_objects(&server, &store).await;

		RunningHttpMockK8sServer { server, store }
	}
}

fn collection_for(manifest: &Value) -> Option<String> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let namespace = manifest.pointer("/metadata/namespace").and_then(Value::as_str);
	Some(lookup(api_version, kind)?.collection_path(namespace))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Current state of an object, looked up by kind.
	pub fn object(
		&self,
		api_version: &str,
		kind: &str,
		namespace: Option<&str>,
		name: &str,
	) -> Option<Value> {
		let collection = lookup(api_version, kind)?.collection_path(namespace);
		self.store.read().get(&collection, name).cloned()
	}

	/// Number of stored objects, the default namespace included.
	pub fn object_count(&self) -> usize {
		self.store.read().len()
	}

	/// Requests received so far with the given HTTP method.
	pub async fn requests_with_method(&self, verb: &str) -> usize {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.iter()
			.filter(|r| r.method.as_str().eq_ignore_ascii_case(verb))
			.count()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Kubeconfig whose context, cluster and user names derive from `context_name`.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = format!("{context_name}-cluster");
		let user_name = format!("{context_name}-user");

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.clone(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name,
					user: Some(user_name.clone()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name,
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}
}

/// Combine several single-server kubeconfigs into one. The current context is
/// taken from the first.
pub fn merge_kubeconfigs(configs: impl IntoIterator<Item = Kubeconfig>) -> Kubeconfig {
	let mut merged = Kubeconfig::default();
	for config in configs {
		if merged.current_context.is_none() {
			merged.current_context = config.current_context;
		}
		merged.clusters.extend(config.clusters);
		merged.contexts.extend(config.contexts);
		merged.auth_infos.extend(config.auth_infos);
	}
	merged
}

async fn mount_failures(server: &MockServer, prefixes: &[String]) {
	for prefix in prefixes {
		Mock::given(path_regex(format!("^{}", regex::escape(prefix))))
			.respond_with(ResponseTemplate::new(500).set_body_json(json!({
				"kind": "Status",
				"apiVersion": "v1",
				"metadata": {},
				"status": "Failure",
				"message": "injected failure",
				"reason": "InternalError",
				"code": 500
			})))
			.with_priority(1)
			.mount(server)
			.await;
	}
}

async fn mount_version(server: &MockServer, minor: u32) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": "1",
			"minor": minor.to_string(),
			"gitVersion": format!("v1.{minor}.0"),
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.22.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn respond(result: Result<Value, StoreError>, success: u16) -> ResponseTemplate {
	match result {
		Ok(body) => ResponseTemplate::new(success).set_body_json(body),
		Err(e) => ResponseTemplate::new(e.code()).set_body_json(e.status()),
	}
}

fn not_routable(path: &str) -> ResponseTemplate {
	respond(
		Err(StoreError::NotFound {
			name: path.to_string(),
		}),
		200,
	)
}

fn body_of(req: &Request) -> Result<Value, StoreError> {
	serde_json::from_slice(&req.body).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn query_param(req: &Request, key: &str) -> Option<String> {
	req.url
		.query_pairs()
		.find(|(k, _)| k == key)
		.map(|(_, v)| v.into_owned())
}

async fn mount_objects(server: &MockServer, store: &SharedStore) {
	let get_store = store.clone();
	Mock::given(method("GET"))
		.and(path_regex(r"^/apis?/"))
		.respond_with(move |req: &Request| match classify(req.url.path()) {
			Some(RequestTarget::Item { collection, name }) => {
				let found = get_store.read().get(&collection, &name).cloned();
				respond(found.ok_or(StoreError::NotFound { name }), 200)
			}
			Some(RequestTarget::Collection(collection)) => {
				let items = get_store.read().list(&collection);
				ResponseTemplate::new(200).set_body_json(json!({
					"kind": "List",
					"apiVersion": "v1",
					"metadata": {"resourceVersion": "1"},
					"items": items
				}))
			}
			None => not_routable(req.url.path()),
		})
		.mount(server)
		.await;

	let post_store = store.clone();
	Mock::given(method("POST"))
		.and(path_regex(r"^/apis?/"))
		.respond_with(move |req: &Request| match classify(req.url.path()) {
			Some(RequestTarget::Collection(collection)) => {
				let result = body_of(req).and_then(|body| post_store.write().create(&collection, body));
				respond(result, 201)
			}
			_ => not_routable(req.url.path()),
		})
		.mount(server)
		.await;

	let put_store = store.clone();
	Mock::given(method("PUT"))
		.and(path_regex(r"^/apis?/"))
		.respond_with(move |req: &Request| match classify(req.url.path()) {
			Some(RequestTarget::Item { collection, name }) => {
				let result =
					body_of(req).and_then(|body| put_store.write().replace(&collection, &name, body));
				respond(result, 200)
			}
			_ => not_routable(req.url.path()),
		})
		.mount(server)
		.await;

	let patch_store = store.clone();
	Mock::given(method("PATCH"))
		.and(path_regex(r"^/apis?/"))
		.respond_with(move |req: &Request| match classify(req.url.path()) {
			Some(RequestTarget::Item { collection, name }) => {
				let is_apply = req
					.headers
					.get("content-type")
					.and_then(|v| v.to_str().ok())
					.is_some_and(|v| v.contains("apply-patch"));
				let field_manager = query_param(req, "fieldManager");
				let result = body_of(req).and_then(|body| {
					patch_store.write().patch(
						&collection,
						&name,
						body,
						field_manager.as_deref().filter(|_| is_apply),
						is_apply,
					)
				});
				respond(result, 200)
			}
			_ => not_routable(req.url.path()),
		})
		.mount(server)
		.await;
}
