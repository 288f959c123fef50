//! In-memory object storage with API server write semantics.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::kinds::namespace_of;

/// Timestamp stamped on every created object.
pub const CREATION_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
	NotFound { name: String },
	AlreadyExists { name: String },
	Conflict { name: String },
	Invalid(String),
}

impl StoreError {
	pub fn code(&self) -> u16 {
		match self {
			StoreError::NotFound { .. } => 404,
			StoreError::AlreadyExists { .. } | StoreError::Conflict { .. } => 409,
			StoreError::Invalid(_) => 422,
		}
	}

	/// Body of a `Status` response the client can decode.
	pub fn status(&self) -> Value {
		let (reason, message) = match self {
			StoreError::NotFound { name } => ("NotFound", format!("\"{name}\" not found")),
			StoreError::AlreadyExists { name } => {
				("AlreadyExists", format!("\"{name}\" already exists"))
			}
			StoreError::Conflict { name } => (
				"Conflict",
				format!("the object \"{name}\" has been modified; please apply your changes to the latest version"),
			),
			StoreError::Invalid(message) => ("Invalid", message.clone()),
		};
		json!({
			"kind": "Status",
			"apiVersion": "v1",
			"metadata": {},
			"status": "Failure",
			"message": message,
			"reason": reason,
			"code": self.code(),
		})
	}
}

/// Objects keyed by collection path and name.
#[derive(Debug, Default)]
pub struct ObjectStore {
	objects: BTreeMap<(String, String), Value>,
	resource_version: u64,
}

impl ObjectStore {
	pub fn get(&self, collection: &str, name: &str) -> Option<&Value> {
		self.objects.get(&(collection.to_string(), name.to_string()))
	}

	/// Objects directly under `collection`, ordered by name.
	pub fn list(&self, collection: &str) -> Vec<Value> {
		self.objects
			.iter()
			.filter(|((c, _), _)| c == collection)
			.map(|(_, v)| v.clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.objects.len()
	}

	pub fn is_empty(&self) -> bool {
		self.objects.is_empty()
	}

	/// POST: fails if an object with the same name exists.
	pub fn create(&mut self, collection: &str, mut body: Value) -> Result<Value, StoreError> {
		let name = name_of(&body)?;
		let key = (collection.to_string(), name.clone());
		if self.objects.contains_key(&key) {
			return Err(StoreError::AlreadyExists { name });
		}
		self.stamp(collection, &mut body, None);
		self.objects.insert(key, body.clone());
		Ok(body)
	}

	/// PUT: the object must exist; a stale `resourceVersion` is a conflict.
	pub fn replace(&mut self, collection: &str, name: &str, mut body: Value) -> Result<Value, StoreError> {
		let key = (collection.to_string(), name.to_string());
		let Some(existing) = self.objects.get(&key) else {
			return Err(StoreError::NotFound {
				name: name.to_string(),
			});
		};
		let current = resource_version(existing);
		if let Some(sent) = resource_version(&body) {
			if Some(sent) != current {
				return Err(StoreError::Conflict {
					name: name.to_string(),
				});
			}
		}
		let preserved = preserved_metadata(existing);
		self.stamp(collection, &mut body, Some(preserved));
		self.objects.insert(key, body.clone());
		Ok(body)
	}

	/// PATCH: merge `patch` into the existing object, or create it when
	/// `create_missing` is set (server-side apply).
	pub fn patch(
		&mut self,
		collection: &str,
		name: &str,
		patch: Value,
		field_manager: Option<&str>,
		create_missing: bool,
	) -> Result<Value, StoreError> {
		let key = (collection.to_string(), name.to_string());
		let (mut merged, preserved) = match self.objects.get(&key) {
			Some(existing) => (
				merge_json(existing.clone(), patch),
				Some(preserved_metadata(existing)),
			),
			None if create_missing => (patch, None),
			None => {
				return Err(StoreError::NotFound {
					name: name.to_string(),
				})
			}
		};
		if let Some(manager) = field_manager {
			merged["metadata"]["managedFields"] = json!([{
				"manager": manager,
				"operation": "Apply",
			}]);
		}
		self.stamp(collection, &mut merged, preserved);
		self.objects.insert(key, merged.clone());
		Ok(merged)
	}

	/// Insert an object as if it had been created earlier.
	pub fn seed(&mut self, collection: &str, body: Value) -> Result<(), StoreError> {
		self.create(collection, body).map(|_| ())
	}

	/// Assign server-owned metadata. `preserved` carries uid and creation
	/// timestamp over from the previous version of the object.
	fn stamp(&mut self, collection: &str, body: &mut Value, preserved: Option<Value>) {
		self.resource_version += 1;
		let version = self.resource_version;
		let Some(metadata) = body
			.as_object_mut()
			.map(|o| o.entry("metadata").or_insert_with(|| json!({})))
			.and_then(Value::as_object_mut)
		else {
			return;
		};

		if let Some(namespace) = namespace_of(collection) {
			metadata.insert("namespace".to_string(), json!(namespace));
		}
		metadata.insert("resourceVersion".to_string(), json!(version.to_string()));
		match preserved {
			Some(Value::Object(previous)) => {
				for (key, value) in previous {
					metadata.insert(key, value);
				}
			}
			_ => {
				metadata.insert("uid".to_string(), json!(format!("00000000-0000-0000-0000-{version:012}")));
				metadata.insert("creationTimestamp".to_string(), json!(CREATION_TIMESTAMP));
			}
		}
	}
}

fn name_of(body: &Value) -> Result<String, StoreError> {
	body.pointer("/metadata/name")
		.and_then(Value::as_str)
		.map(str::to_string)
		.ok_or_else(|| StoreError::Invalid("metadata.name: Required value".to_string()))
}

fn resource_version(obj: &Value) -> Option<&str> {
	obj.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn preserved_metadata(existing: &Value) -> Value {
	let mut preserved = serde_json::Map::new();
	for key in ["uid", "creationTimestamp"] {
		if let Some(value) = existing.pointer(&format!("/metadata/{key}")) {
			preserved.insert(key.to_string(), value.clone());
		}
	}
	Value::Object(preserved)
}

/// Deep merge `patch` into `base`. Objects merge key by key, anything else
/// (arrays included) is replaced.
pub fn merge_json(base: Value, patch: Value) -> Value {
	match (base, patch) {
		(Value::Object(mut base), Value::Object(patch)) => {
			for (key, value) in patch {
				let merged = match base.remove(&key) {
					Some(existing) => merge_json(existing, value),
					None => value,
				};
				base.insert(key, merged);
			}
			Value::Object(base)
		}
		(_, patch) => patch,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SERVICES: &str = "/api/v1/namespaces/default/services";

	fn service(name: &str) -> Value {
		json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": name}})
	}

	#[test]
	fn test_create_stamps_metadata() {
		let mut store = ObjectStore::default();
		let created = store.create(SERVICES, service("api")).unwrap();
		assert_eq!(created["metadata"]["namespace"], "default");
		assert_eq!(created["metadata"]["resourceVersion"], "1");
		assert_eq!(created["metadata"]["creationTimestamp"], CREATION_TIMESTAMP);

		assert_eq!(
			store.create(SERVICES, service("api")),
			Err(StoreError::AlreadyExists {
				name: "api".to_string()
			})
		);
	}

	#[test]
	fn test_replace_checks_resource_version() {
		let mut store = ObjectStore::default();
		let created = store.create(SERVICES, service("api")).unwrap();

		let mut stale = created.clone();
		stale["metadata"]["resourceVersion"] = json!("0");
		assert_eq!(
			store.replace(SERVICES, "api", stale).unwrap_err().code(),
			409
		);

		let replaced = store.replace(SERVICES, "api", created.clone()).unwrap();
		assert_eq!(replaced["metadata"]["resourceVersion"], "2");
		assert_eq!(replaced["metadata"]["uid"], created["metadata"]["uid"]);

		assert_eq!(
			store.replace(SERVICES, "missing", service("missing")).unwrap_err().code(),
			404
		);
	}

	#[test]
	fn test_apply_creates_and_records_manager() {
		let mut store = ObjectStore::default();
		let applied = store
			.patch(SERVICES, "api", service("api"), Some("sync"), true)
			.unwrap();
		assert_eq!(applied["metadata"]["managedFields"][0]["manager"], "sync");
		assert_eq!(store.len(), 1);

		assert!(store
			.patch(SERVICES, "other", service("other"), None, false)
			.is_err());
	}

	#[test]
	fn test_merge_json_replaces_arrays() {
		let merged = merge_json(
			json!({"spec": {"replicas": 1, "ports": [1, 2]}, "keep": true}),
			json!({"spec": {"ports": [3]}}),
		);
		assert_eq!(
			merged,
			json!({"spec": {"replicas": 1, "ports": [3]}, "keep": true})
		);
	}
}
