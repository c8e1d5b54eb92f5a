use core::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::util::errors::{Error, Result, StdError};

/// Engine version that was last rolled out successfully
pub const LAST_VERSION_ANNOTATION: &str = "mongodb.com/v1.lastVersion";
/// Set while the workload is held on the OnDelete strategy for a version change
pub const VERSION_CHANGE_IN_PROGRESS_ANNOTATION: &str = "mongodb.com/v1.versionChangeInProgress";
/// Set once the workload was seen not ready during a version change
pub const HAS_LEFT_READY_STATE_ANNOTATION: &str = "mongodb.com/v1.hasLeftReadyStateAnnotationKey";
/// Set once every member has been restarted with the TLS material mounted
pub const TLS_ROLLED_OUT_ANNOTATION: &str = "mongodb.com/v1.tlsRolledOut";

pub const TRUE_ANNOTATION: &str = "true";
pub const FALSE_ANNOTATION: &str = "false";

pub const MONGODB_PORT: i32 = 27017;

/// Generate the Kubernetes wrapper struct `MongoDB` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(kind = "MongoDB", group = "mongodb.com", version = "v1", namespaced)]
#[kube(status = "MongoDBStatus", shortname = "mdb")]
#[serde(rename_all = "camelCase")]
pub struct MongoDBSpec {
    /// Number of members of the replica set
    #[serde(default = "default_members")]
    pub members: i32,
    #[serde(default, rename = "type")]
    pub resource_type: ResourceType,
    /// MongoDB version run by every member
    pub version: String,
    /// Defaults to the major.minor of `version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_compatibility_version: Option<String>,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub users: Vec<MongoDBUser>,
    /// Overrides merged onto the StatefulSet generated by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful_set: Option<StatefulSetConfiguration>,
}

fn default_members() -> i32 {
    3
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum ResourceType {
    #[default]
    ReplicaSet,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    #[serde(default)]
    pub tls: TlsSpec,
    #[serde(default)]
    pub authentication: Authentication,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Members accept clients without TLS while still using it between themselves
    #[serde(default)]
    pub optional: bool,
    /// Secret holding `tls.crt` and `tls.key`
    #[serde(default)]
    pub certificate_key_secret_ref: LocalObjectReference,
    /// ConfigMap holding `ca.crt`
    #[serde(default)]
    pub ca_config_map_ref: LocalObjectReference,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct LocalObjectReference {
    #[serde(default)]
    pub name: String,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct Authentication {
    #[serde(default)]
    pub modes: Vec<AuthMode>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum AuthMode {
    #[serde(rename = "SCRAM")]
    Scram,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBUser {
    pub name: String,
    #[serde(default = "default_user_db")]
    pub db: String,
    pub password_secret_ref: SecretKeyReference,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Prefix of the secret the derived SCRAM credentials are stored in
    pub scram_credentials_secret_name: String,
}

fn default_user_db() -> String {
    "admin".to_string()
}

impl MongoDBUser {
    pub fn scram_credentials_secret_name(&self) -> String {
        format!("{}-scram-credentials", self.scram_credentials_secret_name)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct SecretKeyReference {
    pub name: String,
    #[serde(default = "default_password_key")]
    pub key: String,
}

fn default_password_key() -> String {
    "password".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct Role {
    pub name: String,
    pub db: String,
}

#[derive(Default, Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct StatefulSetConfiguration {
    #[schemars(schema_with = "preserve_unknown_fields_schema")]
    pub spec: serde_json::Value,
}

/// The status object of `MongoDB`
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MongoDBStatus {
    #[serde(default)]
    pub mongo_uri: String,
    #[serde(default)]
    pub phase: Phase,
    /// Version of the last fully converged rollout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Running => write!(f, "Running"),
            Phase::Failed => write!(f, "Failed"),
        }
    }
}

impl MongoDB {
    pub fn namespace_or_err(&self) -> Result<String> {
        self.namespace().ok_or_else(|| {
            Error::StdError(StdError::MetadataMissing(format!(
                "MongoDB {} has no namespace",
                self.name_any()
            )))
        })
    }

    /// Name of the headless service giving members stable network identities
    pub fn service_name(&self) -> String {
        format!("{}-svc", self.name_any())
    }

    /// Name of the ConfigMap holding the automation config
    pub fn config_map_name(&self) -> String {
        format!("{}-config", self.name_any())
    }

    pub fn agent_credentials_secret_name(&self) -> String {
        format!("{}-agent-scram-credentials", self.name_any())
    }

    pub fn feature_compatibility_version(&self) -> String {
        if let Some(fcv) = &self.spec.feature_compatibility_version {
            return fcv.clone();
        }
        let mut parts = self.spec.version.split('.');
        match (parts.next(), parts.next()) {
            (Some(major), Some(minor)) => format!("{major}.{minor}"),
            _ => self.spec.version.clone(),
        }
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.spec.security.tls.enabled
    }

    pub fn is_scram_enabled(&self) -> bool {
        self.spec.security.authentication.modes.contains(&AuthMode::Scram)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn has_rolled_out_tls(&self) -> bool {
        self.annotation(TLS_ROLLED_OUT_ANNOTATION) == Some(TRUE_ANNOTATION)
    }

    /// Connection string listing every member through the headless service
    pub fn mongo_uri(&self, cluster_domain: &str) -> String {
        let namespace = self.namespace().unwrap_or_default();
        let members: Vec<String> = (0..self.spec.members)
            .map(|i| {
                format!(
                    "{}-{}.{}.{}.svc.{}:{}",
                    self.name_any(),
                    i,
                    self.service_name(),
                    namespace,
                    cluster_domain,
                    MONGODB_PORT
                )
            })
            .collect();
        format!("mongodb://{}", members.join(","))
    }
}

fn preserve_unknown_fields_schema(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut extensions = schemars::Map::new();
    extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        extensions,
        ..Default::default()
    })
}
