//! Typed access to the objects the reconciler reads and writes.
//!
//! [`ResourceClient`] is implemented against a live cluster by [`KubeResourceClient`]
//! and in process by [`InMemoryClient`], which the reconciler tests run against.

mod kubernetes;
mod memory;

pub use self::kubernetes::KubeResourceClient;
pub use self::memory::InMemoryClient;
#[cfg(test)]
pub(crate) use self::memory::statefulset_server_defaults;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::util::errors::Result;

/// Any namespaced object with a static type, e.g. `ConfigMap` or `MongoDB`.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + DeserializeOwned
    + Serialize
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fails with `NotFound` if the object does not exist.
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K>;

    /// Fails with `AlreadyExists` if an object with the same name exists.
    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replaces the object. A stale `resourceVersion` fails with `Conflict`.
    async fn update<K: Object>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Writes only the status of the object.
    async fn update_status<K: Object>(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()>;

    async fn list<K: Object>(&self, namespace: &str) -> Result<Vec<K>>;

    /// Like `get`, with a missing object mapped to `None`.
    async fn get_opt<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        match self.get(namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates the object, or replaces the live one carrying over its `resourceVersion`.
    async fn create_or_update<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        match self.get_opt::<K>(namespace, &obj.name_any()).await? {
            None => self.create(namespace, obj).await,
            Some(existing) => {
                let mut obj = obj.clone();
                obj.meta_mut().resource_version = existing.meta().resource_version.clone();
                self.update(namespace, &obj).await
            }
        }
    }
}
