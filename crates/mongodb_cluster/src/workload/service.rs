use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use tracing::info;

use super::statefulset::labels;
use crate::api::v1::mongodb::MONGODB_PORT;
use crate::api::v1::MongoDB;
use crate::client::ResourceClient;
use crate::util::errors::Result;

/// Headless service giving every member a stable DNS name.
pub fn desired_service(mdb: &MongoDB) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(mdb.service_name()),
            namespace: mdb.namespace(),
            labels: Some(labels(mdb)),
            owner_references: mdb.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some("None".to_string()),
            selector: Some(labels(mdb)),
            ports: Some(vec![ServicePort {
                name: Some("mongodb".to_string()),
                port: MONGODB_PORT,
                target_port: Some(IntOrString::Int(MONGODB_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Creates the service. An existing one is left as it is.
pub async fn ensure_service<C: ResourceClient>(client: &C, mdb: &MongoDB) -> Result<()> {
    let namespace = mdb.namespace_or_err()?;
    let service = desired_service(mdb);
    match client.create(&namespace, &service).await {
        Ok(_) => {
            info!("Created Service '{}' in namespace '{}'", service.name_any(), namespace);
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            info!("Service '{}' already exists, moving forward", service.name_any());
            Ok(())
        }
        Err(e) => Err(e),
    }
}
