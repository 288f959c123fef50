//! Integration tests for ClusterConnection and ResourceClient against the HTTP mock server.

use assert_matches::assert_matches;
use k8s_mock::{merge_kubeconfigs, HttpMockK8sServer};
use k8s_openapi::api::{apps::v1::Deployment, rbac::v1::ClusterRole};
use kubesync::k8s::{
	client::{ClusterConnection, ConnectionError},
	resource::{ClientError, ResourceClient},
};
use serde_json::json;

fn deployment(name: &str, namespace: &str) -> serde_json::Value {
	json!({
		"apiVersion": "apps/v1",
		"kind": "Deployment",
		"metadata": {"name": name, "namespace": namespace},
		"spec": {
			"replicas": 1,
			"selector": {"matchLabels": {"app": name}},
			"template": {
				"metadata": {"labels": {"app": name}},
				"spec": {"containers": [{"name": name, "image": format!("{name}:v1")}]}
			}
		}
	})
}

#[tokio::test]
async fn test_connect_current_context() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let conn = ClusterConnection::connect(server.kubeconfig(), None)
		.await
		.expect("connection should succeed");

	assert_eq!(conn.context(), "mock-context");
	assert_eq!(conn.server_version().major, "1");
	assert_eq!(conn.server_version().minor, "31");
}

#[tokio::test]
async fn test_connect_by_context_or_cluster_name() {
	let source = HttpMockK8sServer::builder().minor_version(30).build().start().await;
	let target = HttpMockK8sServer::builder().build().start().await;
	let kubeconfig = merge_kubeconfigs([
		target.kubeconfig_with_context("target"),
		source.kubeconfig_with_context("source"),
	]);

	let by_context = ClusterConnection::connect(kubeconfig.clone(), Some("source"))
		.await
		.unwrap();
	assert_eq!(by_context.server_version().minor, "30");

	let by_cluster = ClusterConnection::connect(kubeconfig.clone(), Some("source-cluster"))
		.await
		.unwrap();
	assert_eq!(by_cluster.context(), "source");

	let current = ClusterConnection::connect(kubeconfig, None).await.unwrap();
	assert_eq!(current.context(), "target");
	assert_eq!(current.server_version().minor, "31");
}

#[tokio::test]
async fn test_connect_unknown_cluster() {
	let server = HttpMockK8sServer::builder().build().start().await;

	let result = ClusterConnection::connect(server.kubeconfig(), Some("nowhere")).await;
	assert_matches!(result, Err(ConnectionError::ContextNotFound(name)) if name == "nowhere");
}

#[tokio::test]
async fn test_get_list_and_not_found() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![
			deployment("web", "default"),
			deployment("worker", "default"),
			deployment("batch", "jobs"),
		])
		.build()
		.start()
		.await;
	let conn = ClusterConnection::connect(server.kubeconfig(), None).await.unwrap();
	let client = ResourceClient::<Deployment>::new(conn.client().clone(), "default");

	let web = client.get(None, "web").await.unwrap();
	assert_eq!(web.metadata.namespace.as_deref(), Some("default"));
	assert!(web.metadata.resource_version.is_some());

	let batch = client.get(Some("jobs"), "batch").await.unwrap();
	assert_eq!(batch.metadata.name.as_deref(), Some("batch"));

	let names: Vec<_> = client
		.list(None)
		.await
		.unwrap()
		.into_iter()
		.filter_map(|d| d.metadata.name)
		.collect();
	assert_eq!(names, vec!["web", "worker"]);

	assert_matches!(
		client.get(None, "missing").await,
		Err(ClientError::NotFound { name, .. }) if name == "missing"
	);
	assert!(client.get_opt(None, "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cluster_scoped_kind_ignores_namespace() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![json!({
			"apiVersion": "rbac.authorization.k8s.io/v1",
			"kind": "ClusterRole",
			"metadata": {"name": "reader"},
			"rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}]
		})])
		.build()
		.start()
		.await;
	let conn = ClusterConnection::connect(server.kubeconfig(), None).await.unwrap();
	let client = ResourceClient::<ClusterRole>::new(conn.client().clone(), "some-namespace");

	let role = client.get(None, "reader").await.unwrap();
	assert_eq!(role.rules.unwrap()[0].verbs, vec!["get"]);
}

#[tokio::test]
async fn test_server_error_is_not_not_found() {
	let server = HttpMockK8sServer::builder()
		.failing_paths(vec!["/apis/apps/v1/namespaces/default/deployments".to_string()])
		.build()
		.start()
		.await;
	let conn = ClusterConnection::connect(server.kubeconfig(), None).await.unwrap();
	let client = ResourceClient::<Deployment>::new(conn.client().clone(), "default");

	assert_matches!(
		client.get_opt(None, "web").await,
		Err(ClientError::Request { verb: "getting", .. })
	);
}
