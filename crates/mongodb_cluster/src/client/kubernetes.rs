use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;

use super::{Object, ResourceClient};
use crate::util::errors::{Error, Result, StdError};

/// [`ResourceClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        KubeResourceClient { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error<K: Object>(e: kube::Error, namespace: &str, name: &str) -> Error {
    let object = format!("{} {}/{}", K::kind(&()), namespace, name);
    match e {
        kube::Error::Api(api_err) if api_err.code == 404 => {
            Error::StdError(StdError::NotFound(object))
        }
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            Error::StdError(StdError::AlreadyExists(object))
        }
        kube::Error::Api(api_err) if api_err.code == 409 => {
            Error::StdError(StdError::Conflict(format!("{}: {}", object, api_err.message)))
        }
        e => Error::StdError(StdError::KubeError(e)),
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn create<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, &obj.name_any()))
    }

    async fn update<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api::<K>(namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, &name))
    }

    async fn update_status<K: Object>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = Patch::Merge(json!({ "status": status }));
        self.api::<K>(namespace)
            .patch_status(&name, &PatchParams::default(), &patch)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, &name))
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn list<K: Object>(&self, namespace: &str) -> Result<Vec<K>> {
        self.api::<K>(namespace)
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| map_kube_error::<K>(e, namespace, ""))
    }
}
