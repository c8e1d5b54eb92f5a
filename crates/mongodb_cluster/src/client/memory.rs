use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Object, ResourceClient};
use crate::util::errors::{Error, Result, StdError};

/// (kind, namespace, name)
type ObjectKey = (String, String, String);

/// [`ResourceClient`] keeping objects in a map, with the API server's
/// optimistic concurrency on `resourceVersion`.
///
/// Like the API server, `update` ignores the status of the object it is given
/// and `update_status` ignores everything but the status.
#[derive(Default)]
pub struct InMemoryClient {
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    resource_version: AtomicU64,
    defaulting: Option<fn(&mut Value)>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        InMemoryClient::default()
    }

    /// Runs `defaulting` over every object written by `create` or `update`, the way
    /// the API server defaults fields and drops zero values before storing.
    pub fn with_defaulting(defaulting: fn(&mut Value)) -> Self {
        InMemoryClient {
            defaulting: Some(defaulting),
            ..Default::default()
        }
    }

    fn apply_defaults(&self, value: &mut Value) {
        if let Some(defaulting) = self.defaulting {
            defaulting(value);
        }
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> u64 {
        self.resource_version.load(Ordering::SeqCst)
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn key<K: Object>(namespace: &str, name: &str) -> ObjectKey {
        (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
    }

    fn describe(key: &ObjectKey) -> String {
        format!("{} {}/{}", key.0, key.1, key.2)
    }
}

fn decode<K: Object>(value: &Value) -> Result<K> {
    Ok(serde_json::from_value(value.clone())?)
}

fn set_metadata(value: &mut Value, field: &str, content: &str) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert(field.to_string(), Value::String(content.to_string()));
    }
}

#[async_trait]
impl ResourceClient for InMemoryClient {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        let key = Self::key::<K>(namespace, name);
        let objects = self.objects.lock().await;
        match objects.get(&key) {
            Some(value) => decode(value),
            None => Err(Error::StdError(StdError::NotFound(Self::describe(&key)))),
        }
    }

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        let key = Self::key::<K>(namespace, &obj.name_any());
        let mut objects = self.objects.lock().await;
        if objects.contains_key(&key) {
            return Err(Error::StdError(StdError::AlreadyExists(Self::describe(&key))));
        }

        let mut value = serde_json::to_value(obj)?;
        self.apply_defaults(&mut value);
        set_metadata(&mut value, "namespace", namespace);
        set_metadata(&mut value, "resourceVersion", &self.next_resource_version());
        objects.insert(key, value.clone());
        decode(&value)
    }

    async fn update<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        let key = Self::key::<K>(namespace, &obj.name_any());
        let mut objects = self.objects.lock().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| Error::StdError(StdError::NotFound(Self::describe(&key))))?;

        let stored_version = stored["metadata"]["resourceVersion"].as_str();
        if let Some(version) = obj.resource_version() {
            if Some(version.as_str()) != stored_version {
                return Err(Error::StdError(StdError::Conflict(format!(
                    "{} has resourceVersion {:?}, update was based on {}",
                    Self::describe(&key),
                    stored_version,
                    version
                ))));
            }
        }

        let mut value = serde_json::to_value(obj)?;
        self.apply_defaults(&mut value);
        if let Some(object) = value.as_object_mut() {
            match stored.get("status") {
                Some(status) => object.insert("status".to_string(), status.clone()),
                None => object.remove("status"),
            };
        }
        set_metadata(&mut value, "namespace", namespace);
        set_metadata(&mut value, "resourceVersion", &self.next_resource_version());
        objects.insert(key, value.clone());
        decode(&value)
    }

    async fn update_status<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        let key = Self::key::<K>(namespace, &obj.name_any());
        let mut objects = self.objects.lock().await;
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| Error::StdError(StdError::NotFound(Self::describe(&key))))?;

        if let Some(object) = stored.as_object_mut() {
            object.insert("status".to_string(), status);
        }
        set_metadata(stored, "resourceVersion", &self.next_resource_version());
        decode(stored)
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        let key = Self::key::<K>(namespace, name);
        let mut objects = self.objects.lock().await;
        match objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(Error::StdError(StdError::NotFound(Self::describe(&key)))),
        }
    }

    async fn list<K: Object>(&self, namespace: &str) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let objects = self.objects.lock().await;
        objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, value)| decode(value))
            .collect()
    }
}

/// A subset of what the API server does to a written StatefulSet: `false` booleans
/// are dropped and unset fields get their defaults.
#[cfg(test)]
pub(crate) fn statefulset_server_defaults(value: &mut Value) {
    fn drop_false(value: &mut Value) {
        match value {
            Value::Object(map) => {
                map.retain(|_, v| *v != Value::Bool(false));
                map.values_mut().for_each(drop_false);
            }
            Value::Array(values) => values.iter_mut().for_each(drop_false),
            _ => {}
        }
    }

    if value.get("kind").and_then(Value::as_str) != Some("StatefulSet") {
        return;
    }
    drop_false(value);
    let Some(spec) = value.get_mut("spec").and_then(Value::as_object_mut) else {
        return;
    };
    spec.entry("podManagementPolicy").or_insert_with(|| "OrderedReady".into());
    spec.entry("revisionHistoryLimit").or_insert_with(|| 10.into());
    if let Some(strategy) = spec.get_mut("updateStrategy").and_then(Value::as_object_mut) {
        if strategy.get("type").and_then(Value::as_str) == Some("RollingUpdate") {
            strategy
                .entry("rollingUpdate")
                .or_insert_with(|| serde_json::json!({ "partition": 0 }));
        }
    }
    let containers = spec
        .get_mut("template")
        .and_then(|t| t.get_mut("spec"))
        .and_then(|p| p.get_mut("containers"))
        .and_then(Value::as_array_mut);
    for container in containers.into_iter().flatten() {
        if let Some(container) = container.as_object_mut() {
            container.entry("imagePullPolicy").or_insert_with(|| "IfNotPresent".into());
            container
                .entry("terminationMessagePath")
                .or_insert_with(|| "/dev/termination-log".into());
        }
    }
}
