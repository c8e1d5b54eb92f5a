use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, ExecAction,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecretVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};
use tracing::info;

use super::merge::{contains_json, merge_json, merge_typed};
use crate::api::v1::MongoDB;
use crate::automation_config::AUTOMATION_CONFIG_KEY;
use crate::client::ResourceClient;
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, Result, StdError};

pub const AGENT_CONTAINER_NAME: &str = "mongodb-agent";
pub const MONGOD_CONTAINER_NAME: &str = "mongod";
pub const VERSION_UPGRADE_HOOK_NAME: &str = "mongod-posthook";
pub const TLS_INIT_CONTAINER_NAME: &str = "tls-init";
pub const DATA_VOLUME_NAME: &str = "data-volume";
pub const OPERATOR_SERVICE_ACCOUNT_NAME: &str = "mongodb-kubernetes-operator";

pub const TLS_CA_MOUNT_PATH: &str = "/var/lib/tls/ca/";
pub const TLS_CA_CERT_NAME: &str = "ca.crt";
pub const TLS_SECRET_MOUNT_PATH: &str = "/var/lib/tls/secret/";
pub const TLS_SECRET_CERT_NAME: &str = "tls.crt";
pub const TLS_SECRET_KEY_NAME: &str = "tls.key";
pub const TLS_SERVER_MOUNT_PATH: &str = "/var/lib/tls/server/";
pub const TLS_SERVER_FILE_NAME: &str = "server.pem";

const AUTOMATION_CONFIG_MOUNT_PATH: &str = "/var/lib/automation/config";
const AGENT_HEALTH_STATUS_ENV: &str = "AGENT_STATUS_FILEPATH";
const AGENT_HEALTH_STATUS_DIR: &str = "/var/log/mongodb-mms-automation/healthstatus";
const READINESS_PROBE_PATH: &str = "/var/lib/mongodb-mms-automation/probes/readinessprobe";
const KEYFILE_MOUNT_PATH: &str = "/var/lib/mongodb-mms-automation/authentication";
const DEFAULT_STORAGE: &str = "10G";

const MONGOD_COMMAND: &str = r#"
# run post-start hook to handle version changes
/hooks/version-upgrade

# wait for config to be created by the agent
while [ ! -f /data/automation-mongod.conf ]; do sleep 3 ; done ; sleep 2 ;

# start mongod with this configuration
exec mongod -f /data/automation-mongod.conf ;
"#;

/// How the StatefulSet controller rolls out template changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategyType {
    RollingUpdate,
    /// Pods only pick up a new template once deleted; the agents restart them one by one.
    OnDelete,
}

impl UpdateStrategyType {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStrategyType::RollingUpdate => "RollingUpdate",
            UpdateStrategyType::OnDelete => "OnDelete",
        }
    }

    pub fn of(sts: &StatefulSet) -> Option<UpdateStrategyType> {
        let strategy = sts.spec.as_ref()?.update_strategy.as_ref()?.type_.as_deref()?;
        match strategy {
            "RollingUpdate" => Some(UpdateStrategyType::RollingUpdate),
            "OnDelete" => Some(UpdateStrategyType::OnDelete),
            _ => None,
        }
    }
}

pub fn labels(mdb: &MongoDB) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), mdb.service_name())])
}

/// The StatefulSet running one agent and one mongod per member, with the user's
/// `spec.statefulSet.spec` overrides merged on top.
pub fn desired_statefulset(
    mdb: &MongoDB,
    config: &OperatorConfig,
    strategy: UpdateStrategyType,
) -> Result<StatefulSet> {
    let labels = labels(mdb);

    let mut volumes = vec![
        empty_dir_volume("healthstatus"),
        empty_dir_volume("hooks"),
        Volume {
            name: "automation-config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: mdb.config_map_name(),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let data_mount = volume_mount(DATA_VOLUME_NAME, "/data", false);
    let mut agent_mounts = vec![
        volume_mount("healthstatus", AGENT_HEALTH_STATUS_DIR, false),
        volume_mount("automation-config", AUTOMATION_CONFIG_MOUNT_PATH, true),
        data_mount.clone(),
    ];
    let mut mongod_mounts = vec![
        volume_mount("healthstatus", "/healthstatus", false),
        data_mount,
        volume_mount("hooks", "/hooks", false),
    ];
    let mut init_containers = vec![version_upgrade_hook(config)];

    if mdb.is_scram_enabled() {
        volumes.push(empty_dir_volume("keyfile"));
        let keyfile_mount = volume_mount("keyfile", KEYFILE_MOUNT_PATH, false);
        agent_mounts.push(keyfile_mount.clone());
        mongod_mounts.push(keyfile_mount);
    }

    if mdb.is_tls_enabled() {
        let tls = &mdb.spec.security.tls;
        volumes.push(Volume {
            name: "tls-ca".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: tls.ca_config_map_ref.name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        volumes.push(Volume {
            name: "tls-secret".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(tls.certificate_key_secret_ref.name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        volumes.push(empty_dir_volume("tls"));

        for mounts in [&mut agent_mounts, &mut mongod_mounts] {
            mounts.push(volume_mount("tls-ca", TLS_CA_MOUNT_PATH, true));
            mounts.push(volume_mount("tls", TLS_SERVER_MOUNT_PATH, true));
        }
        init_containers.push(tls_init(config));
    }

    let sts = StatefulSet {
        metadata: ObjectMeta {
            name: Some(mdb.name_any()),
            namespace: mdb.namespace(),
            labels: Some(labels.clone()),
            owner_references: mdb.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            service_name: Some(mdb.service_name()),
            replicas: Some(mdb.spec.members),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some(strategy.as_str().to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(OPERATOR_SERVICE_ACCOUNT_NAME.to_string()),
                    volumes: Some(volumes),
                    containers: vec![
                        agent_container(config, agent_mounts),
                        mongod_container(mdb, config, mongod_mounts),
                    ],
                    init_containers: Some(init_containers),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![data_volume_claim()]),
            ..Default::default()
        }),
        ..Default::default()
    };

    match &mdb.spec.stateful_set {
        Some(overrides) => apply_overrides(sts, &overrides.spec),
        None => Ok(sts),
    }
}

fn apply_overrides(sts: StatefulSet, overrides: &serde_json::Value) -> Result<StatefulSet> {
    let mut value = serde_json::to_value(&sts)?;
    match value.get_mut("spec") {
        Some(spec) => merge_json(spec, overrides),
        None => {
            return Err(Error::StdError(StdError::SerializationError(
                "StatefulSet serialized without a spec".to_string(),
            )))
        }
    }
    let mut merged: StatefulSet = serde_json::from_value(value)?;
    normalize_update_strategy(&mut merged);
    Ok(merged)
}

/// The API server rejects `rollingUpdate` settings on an OnDelete StatefulSet.
fn normalize_update_strategy(sts: &mut StatefulSet) {
    if UpdateStrategyType::of(sts) == Some(UpdateStrategyType::OnDelete) {
        if let Some(strategy) = sts.spec.as_mut().and_then(|s| s.update_strategy.as_mut()) {
            strategy.rolling_update = None;
        }
    }
}

/// `desired` merged onto the live object, keeping whatever the API server defaulted.
pub fn merge_onto_existing(existing: &StatefulSet, desired: &StatefulSet) -> Result<StatefulSet> {
    let mut merged = merge_typed(existing, desired)?;
    normalize_update_strategy(&mut merged);
    Ok(merged)
}

/// Creates the StatefulSet or updates it when the live one is missing part of `desired`.
pub async fn ensure_statefulset<C: ResourceClient>(client: &C, desired: &StatefulSet) -> Result<StatefulSet> {
    let name = desired.name_any();
    let namespace = desired.namespace().ok_or_else(|| {
        Error::StdError(StdError::MetadataMissing(format!("StatefulSet {name} has no namespace")))
    })?;

    match client.get_opt::<StatefulSet>(&namespace, &name).await? {
        None => {
            info!("Creating StatefulSet '{}' in namespace '{}'", name, namespace);
            client.create(&namespace, desired).await
        }
        Some(existing) => {
            if is_spec_current(&existing, desired)? {
                info!("StatefulSet '{}' is up to date", name);
                Ok(existing)
            } else {
                info!("Updating StatefulSet '{}'", name);
                client.update(&namespace, &merge_onto_existing(&existing, desired)?).await
            }
        }
    }
}

/// Switches the update strategy of the live StatefulSet, writing only on change.
pub async fn set_update_strategy<C: ResourceClient>(
    client: &C,
    namespace: &str,
    name: &str,
    strategy: UpdateStrategyType,
) -> Result<()> {
    let mut sts = client.get::<StatefulSet>(namespace, name).await?;
    if UpdateStrategyType::of(&sts) == Some(strategy) {
        return Ok(());
    }

    info!("Setting update strategy of StatefulSet '{}' to {}", name, strategy.as_str());
    if let Some(spec) = sts.spec.as_mut() {
        spec.update_strategy = Some(StatefulSetUpdateStrategy {
            type_: Some(strategy.as_str().to_string()),
            ..spec.update_strategy.take().unwrap_or_default()
        });
    }
    normalize_update_strategy(&mut sts);
    client.update(namespace, &sts).await?;
    Ok(())
}

/// Every member runs the current template and reports ready.
pub fn is_ready(sts: &StatefulSet, members: i32) -> bool {
    let Some(status) = sts.status.as_ref() else {
        return false;
    };
    status.updated_replicas.unwrap_or(0) == members && status.ready_replicas.unwrap_or(0) == members
}

/// The live object already contains everything in `desired`, up to what the API
/// server defaults or drops on write.
pub fn is_spec_current(live: &StatefulSet, desired: &StatefulSet) -> Result<bool> {
    Ok(contains_json(&serde_json::to_value(live)?, &serde_json::to_value(desired)?))
}

fn agent_container(config: &OperatorConfig, volume_mounts: Vec<VolumeMount>) -> Container {
    let health_status_file = format!("{AGENT_HEALTH_STATUS_DIR}/agent-health-status.json");
    Container {
        name: AGENT_CONTAINER_NAME.to_string(),
        image: Some(config.agent_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec![
            "agent/mongodb-agent".to_string(),
            format!("-cluster={AUTOMATION_CONFIG_MOUNT_PATH}/{AUTOMATION_CONFIG_KEY}"),
            "-skipMongoStart".to_string(),
            "-noDaemonize".to_string(),
            format!("-healthCheckFilePath={health_status_file}"),
            "-serveStatusPort=5000".to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: AGENT_HEALTH_STATUS_ENV.to_string(),
            value: Some(health_status_file),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![READINESS_PROBE_PATH.to_string()]),
            }),
            failure_threshold: Some(240),
            initial_delay_seconds: Some(5),
            ..Default::default()
        }),
        resources: Some(default_resources()),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn mongod_container(mdb: &MongoDB, config: &OperatorConfig, volume_mounts: Vec<VolumeMount>) -> Container {
    Container {
        name: MONGOD_CONTAINER_NAME.to_string(),
        image: Some(format!("{}:{}", config.mongodb_image, mdb.spec.version)),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            MONGOD_COMMAND.to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: AGENT_HEALTH_STATUS_ENV.to_string(),
            value: Some("/healthstatus/agent-health-status.json".to_string()),
            ..Default::default()
        }]),
        resources: Some(default_resources()),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn version_upgrade_hook(config: &OperatorConfig) -> Container {
    Container {
        name: VERSION_UPGRADE_HOOK_NAME.to_string(),
        image: Some(config.version_upgrade_hook_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec![
            "cp".to_string(),
            "version-upgrade-hook".to_string(),
            "/hooks/version-upgrade".to_string(),
        ]),
        volume_mounts: Some(vec![volume_mount("hooks", "/hooks", false)]),
        ..Default::default()
    }
}

/// Concatenates certificate and key into the single PEM file mongod expects.
fn tls_init(config: &OperatorConfig) -> Container {
    Container {
        name: TLS_INIT_CONTAINER_NAME.to_string(),
        image: Some(config.agent_image.clone()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "cat {dir}{cert} {dir}{key} > {TLS_SERVER_MOUNT_PATH}{TLS_SERVER_FILE_NAME}",
                dir = TLS_SECRET_MOUNT_PATH,
                cert = TLS_SECRET_CERT_NAME,
                key = TLS_SECRET_KEY_NAME,
            ),
        ]),
        volume_mounts: Some(vec![
            volume_mount("tls-secret", TLS_SECRET_MOUNT_PATH, true),
            volume_mount("tls", TLS_SERVER_MOUNT_PATH, false),
        ]),
        ..Default::default()
    }
}

fn data_volume_claim() -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(DEFAULT_STORAGE.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn default_resources() -> ResourceRequirements {
    let quantities = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };
    ResourceRequirements {
        limits: Some(quantities("1", "500M")),
        requests: Some(quantities("500m", "400M")),
        ..Default::default()
    }
}

fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn volume_mount(name: &str, mount_path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::mongodb::{AuthMode, StatefulSetConfiguration};
    use crate::api::v1::MongoDBSpec;
    use crate::client::{statefulset_server_defaults, InMemoryClient};
    use assert_json_diff::assert_json_include;
    use k8s_openapi::api::apps::v1::{RollingUpdateStatefulSetStrategy, StatefulSetStatus};
    use serde_json::json;

    fn mdb() -> MongoDB {
        MongoDB {
            metadata: ObjectMeta {
                name: Some("example-mongodb".to_string()),
                namespace: Some("mongodb".to_string()),
                ..Default::default()
            },
            spec: MongoDBSpec {
                members: 3,
                version: "4.2.6".to_string(),
                ..Default::default()
            },
            status: None,
        }
    }

    fn container<'a>(sts: &'a StatefulSet, name: &str) -> &'a Container {
        sts.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.iter().find(|c| c.name == name))
            .unwrap()
    }

    #[test]
    fn test_desired_statefulset_shape() {
        let sts = desired_statefulset(&mdb(), &OperatorConfig::default(), UpdateStrategyType::RollingUpdate).unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&sts).unwrap(),
            expected: json!({
                "metadata": { "name": "example-mongodb", "namespace": "mongodb", "labels": { "app": "example-mongodb-svc" } },
                "spec": {
                    "replicas": 3,
                    "serviceName": "example-mongodb-svc",
                    "updateStrategy": { "type": "RollingUpdate" },
                    "template": { "spec": {
                        "serviceAccountName": "mongodb-kubernetes-operator",
                        "initContainers": [{ "name": "mongod-posthook" }]
                    }},
                    "volumeClaimTemplates": [{
                        "metadata": { "name": "data-volume" },
                        "spec": { "accessModes": ["ReadWriteOnce"], "resources": { "requests": { "storage": "10G" } } }
                    }]
                }
            })
        );
        assert_eq!(container(&sts, MONGOD_CONTAINER_NAME).image.as_deref(), Some("mongo:4.2.6"));
        assert!(container(&sts, AGENT_CONTAINER_NAME).readiness_probe.is_some());
    }

    #[test]
    fn test_tls_and_keyfile_volumes() {
        let mut mdb = mdb();
        mdb.spec.security.tls.enabled = true;
        mdb.spec.security.tls.ca_config_map_ref.name = "ca-cm".to_string();
        mdb.spec.security.tls.certificate_key_secret_ref.name = "cert-secret".to_string();
        mdb.spec.security.authentication.modes = vec![AuthMode::Scram];

        let sts = desired_statefulset(&mdb, &OperatorConfig::default(), UpdateStrategyType::RollingUpdate).unwrap();
        let pod = sts.spec.as_ref().and_then(|s| s.template.spec.as_ref()).unwrap();
        let volumes: Vec<&str> = pod.volumes.as_ref().unwrap().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            volumes,
            vec!["healthstatus", "hooks", "automation-config", "keyfile", "tls-ca", "tls-secret", "tls"]
        );

        let init: Vec<&str> = pod.init_containers.as_ref().unwrap().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(init, vec![VERSION_UPGRADE_HOOK_NAME, TLS_INIT_CONTAINER_NAME]);

        let mongod_mounts: Vec<&str> = container(&sts, MONGOD_CONTAINER_NAME)
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert!(mongod_mounts.contains(&TLS_CA_MOUNT_PATH));
        assert!(mongod_mounts.contains(&TLS_SERVER_MOUNT_PATH));
        assert!(mongod_mounts.contains(&KEYFILE_MOUNT_PATH));
    }

    #[test]
    fn test_overrides_are_merged() {
        let mut mdb = mdb();
        mdb.spec.stateful_set = Some(StatefulSetConfiguration {
            spec: json!({
                "template": { "spec": { "containers": [
                    { "name": "mongod", "resources": { "limits": { "memory": "2G" } } }
                ]}},
                "volumeClaimTemplates": [
                    { "metadata": { "name": "data-volume" }, "spec": { "resources": { "requests": { "storage": "50G" } } } }
                ]
            }),
        });

        let sts = desired_statefulset(&mdb, &OperatorConfig::default(), UpdateStrategyType::RollingUpdate).unwrap();
        let limits = container(&sts, MONGOD_CONTAINER_NAME).resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits["memory"], Quantity("2G".to_string()));
        assert_eq!(limits["cpu"], Quantity("1".to_string()));
        assert_eq!(container(&sts, MONGOD_CONTAINER_NAME).image.as_deref(), Some("mongo:4.2.6"));

        let claim = &sts.spec.as_ref().unwrap().volume_claim_templates.as_ref().unwrap()[0];
        let requests = claim.spec.as_ref().and_then(|s| s.resources.as_ref()).and_then(|r| r.requests.as_ref()).unwrap();
        assert_eq!(requests["storage"], Quantity("50G".to_string()));
    }

    #[test]
    fn test_on_delete_drops_rolling_update_settings() {
        let mut existing = desired_statefulset(&mdb(), &OperatorConfig::default(), UpdateStrategyType::RollingUpdate).unwrap();
        if let Some(strategy) = existing.spec.as_mut().and_then(|s| s.update_strategy.as_mut()) {
            strategy.rolling_update = Some(RollingUpdateStatefulSetStrategy {
                partition: Some(0),
                ..Default::default()
            });
        }
        let desired = desired_statefulset(&mdb(), &OperatorConfig::default(), UpdateStrategyType::OnDelete).unwrap();

        let merged = merge_onto_existing(&existing, &desired).unwrap();
        let strategy = merged.spec.unwrap().update_strategy.unwrap();
        assert_eq!(strategy.type_.as_deref(), Some("OnDelete"));
        assert!(strategy.rolling_update.is_none());
    }

    #[test]
    fn test_readiness_counts_updated_and_ready() {
        let mut sts = StatefulSet::default();
        assert!(!is_ready(&sts, 3));

        sts.status = Some(StatefulSetStatus {
            replicas: 3,
            ready_replicas: Some(3),
            updated_replicas: Some(2),
            ..Default::default()
        });
        assert!(!is_ready(&sts, 3));

        sts.status.as_mut().unwrap().updated_replicas = Some(3);
        assert!(is_ready(&sts, 3));
    }

    #[tokio::test]
    async fn test_ensure_writes_only_on_change() {
        let client = InMemoryClient::new();
        let config = OperatorConfig::default();
        let desired = desired_statefulset(&mdb(), &config, UpdateStrategyType::RollingUpdate).unwrap();

        ensure_statefulset(&client, &desired).await.unwrap();
        ensure_statefulset(&client, &desired).await.unwrap();
        assert_eq!(client.writes(), 1);

        let live: StatefulSet = client.get("mongodb", "example-mongodb").await.unwrap();
        assert!(is_spec_current(&live, &desired).unwrap());

        let mut upgraded = mdb();
        upgraded.spec.version = "4.4.0".to_string();
        let desired = desired_statefulset(&upgraded, &config, UpdateStrategyType::OnDelete).unwrap();
        assert!(!is_spec_current(&live, &desired).unwrap());

        let updated = ensure_statefulset(&client, &desired).await.unwrap();
        assert_eq!(client.writes(), 2);
        assert_eq!(UpdateStrategyType::of(&updated), Some(UpdateStrategyType::OnDelete));
        assert_eq!(container(&updated, MONGOD_CONTAINER_NAME).image.as_deref(), Some("mongo:4.4.0"));
    }

    #[tokio::test]
    async fn test_defaulted_live_object_is_current() {
        let client = InMemoryClient::with_defaulting(statefulset_server_defaults);
        let config = OperatorConfig::default();
        let desired = desired_statefulset(&mdb(), &config, UpdateStrategyType::RollingUpdate).unwrap();

        ensure_statefulset(&client, &desired).await.unwrap();
        let live: StatefulSet = client.get("mongodb", "example-mongodb").await.unwrap();
        let live_json = serde_json::to_value(&live).unwrap();
        assert_eq!(live_json["spec"]["updateStrategy"]["rollingUpdate"]["partition"], 0);
        assert!(!live_json.to_string().contains("\"readOnly\":false"));

        assert!(is_spec_current(&live, &desired).unwrap());
        ensure_statefulset(&client, &desired).await.unwrap();
        ensure_statefulset(&client, &desired).await.unwrap();
        assert_eq!(client.writes(), 1);

        let mut upgraded = mdb();
        upgraded.spec.version = "4.4.0".to_string();
        let desired = desired_statefulset(&upgraded, &config, UpdateStrategyType::OnDelete).unwrap();
        assert!(!is_spec_current(&live, &desired).unwrap());
        let updated = ensure_statefulset(&client, &desired).await.unwrap();
        assert_eq!(client.writes(), 2);
        assert!(updated.spec.as_ref().unwrap().update_strategy.as_ref().unwrap().rolling_update.is_none());
        assert!(is_spec_current(&updated, &desired).unwrap());
    }

    #[tokio::test]
    async fn test_ensure_without_namespace_is_an_error() {
        let client = InMemoryClient::new();
        let mut desired = desired_statefulset(&mdb(), &OperatorConfig::default(), UpdateStrategyType::RollingUpdate).unwrap();
        desired.metadata.namespace = None;

        let err = ensure_statefulset(&client, &desired).await.unwrap_err();
        assert_eq!(err.metric_label(), "metadata_missing");
        assert_eq!(client.writes(), 0);
    }

    #[tokio::test]
    async fn test_set_update_strategy_is_a_no_op_when_unchanged() {
        let client = InMemoryClient::new();
        let desired = desired_statefulset(&mdb(), &OperatorConfig::default(), UpdateStrategyType::OnDelete).unwrap();
        ensure_statefulset(&client, &desired).await.unwrap();

        set_update_strategy(&client, "mongodb", "example-mongodb", UpdateStrategyType::OnDelete).await.unwrap();
        assert_eq!(client.writes(), 1);

        set_update_strategy(&client, "mongodb", "example-mongodb", UpdateStrategyType::RollingUpdate).await.unwrap();
        let live: StatefulSet = client.get("mongodb", "example-mongodb").await.unwrap();
        assert_eq!(UpdateStrategyType::of(&live), Some(UpdateStrategyType::RollingUpdate));
        assert_eq!(client.writes(), 2);
    }
}
