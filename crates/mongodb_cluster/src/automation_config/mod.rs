//! The automation config: the versioned document every automation agent reads
//! to learn which processes to run and how they form the replica set.
//!
//! Field order and omission rules are part of the format. Two documents are
//! compared by their serialized bytes, so empty auth collections are left out
//! instead of being written as `[]`.

mod builder;

pub use builder::{AuthEnabler, AutomationConfigBuilder, TlsSettings};

use serde::{Deserialize, Serialize};

use crate::scram::credentials::ScramCreds;
use crate::util::errors::{Error, Result, StdError};

/// Key of the config map entry holding the serialized document
pub const AUTOMATION_CONFIG_KEY: &str = "automation-config";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_AGENT_LOG_PATH: &str = "/var/log/mongodb-mms-automation";
pub const DEFAULT_DOWNLOAD_BASE: &str = "/var/lib/mongodb-mms-automation";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    pub version: i64,
    #[serde(default)]
    pub processes: Vec<Process>,
    #[serde(default)]
    pub replica_sets: Vec<ReplicaSet>,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub versions: Vec<MongoDbVersionConfig>,
    #[serde(default)]
    pub options: Options,
}

impl AutomationConfig {
    /// Reads a document back from its config map entry
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            Error::StdError(StdError::DecodingError(format!(
                "automation config is not valid JSON: {e}"
            )))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::StdError(StdError::SerializationError(e.to_string())))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub name: String,
    #[serde(rename = "hostname")]
    pub host_name: String,
    #[serde(rename = "args2_6")]
    pub args: ProcessArgs,
    pub feature_compatibility_version: String,
    pub process_type: ProcessType,
    pub version: String,
    pub auth_schema_version: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub enum ProcessType {
    #[default]
    #[serde(rename = "mongod")]
    Mongod,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessArgs {
    pub net: Net,
    pub replication: Replication,
    pub storage: Storage,
    pub system_log: SystemLog,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Net {
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<Ssl>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Ssl {
    pub mode: SslMode,
    #[serde(rename = "PEMKeyFile")]
    pub pem_key_file: String,
    #[serde(rename = "allowConnectionsWithoutCertificates")]
    pub allow_connections_without_certificates: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SslMode {
    #[serde(rename = "requireSSL")]
    Require,
    /// TLS between members, optional for clients
    #[serde(rename = "preferSSL")]
    Prefer,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Replication {
    #[serde(rename = "replSetName")]
    pub repl_set_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Storage {
    #[serde(rename = "dbPath")]
    pub db_path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemLog {
    pub destination: String,
    pub path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    #[serde(rename = "_id")]
    pub id: String,
    pub members: Vec<ReplicaSetMember>,
    pub protocol_version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetMember {
    #[serde(rename = "_id")]
    pub id: i32,
    pub host: String,
    pub priority: i32,
    pub votes: i32,
    pub arbiter_only: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users_wanted: Vec<User>,
    pub disabled: bool,
    pub authoritative_set: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_auth_mechanisms: Vec<String>,
    pub auto_auth_mechanism: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployment_auth_mechanisms: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auto_user: String,
    /// Contents of the keyfile the agent writes to `key_file`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, rename = "keyfile", skip_serializing_if = "String::is_empty")]
    pub key_file: String,
    #[serde(default, rename = "keyfileWindows", skip_serializing_if = "String::is_empty")]
    pub key_file_windows: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auto_pwd: String,
}

impl Auth {
    /// The agent only configures authentication when these markers say so.
    pub fn disabled() -> Self {
        Auth {
            users_wanted: Vec::new(),
            disabled: true,
            authoritative_set: false,
            auto_auth_mechanisms: Vec::new(),
            auto_auth_mechanism: "MONGODB-CR".to_string(),
            deployment_auth_mechanisms: Vec::new(),
            auto_user: String::new(),
            key: String::new(),
            key_file: String::new(),
            key_file_windows: String::new(),
            auto_pwd: String::new(),
        }
    }
}

impl Default for Auth {
    fn default() -> Self {
        Auth::disabled()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "user")]
    pub username: String,
    #[serde(rename = "db")]
    pub database: String,
    pub roles: Vec<Role>,
    #[serde(default)]
    pub mechanisms: Vec<String>,
    #[serde(default)]
    pub authentication_restrictions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scram_sha1_creds: Option<ScramCreds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scram_sha256_creds: Option<ScramCreds>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Role {
    pub role: String,
    #[serde(rename = "db")]
    pub database: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(rename = "CAFilePath")]
    pub ca_file_path: String,
    pub client_certificate_mode: ClientCertificateMode,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientCertificateMode {
    #[serde(rename = "OPTIONAL")]
    Optional,
    #[serde(rename = "REQUIRE")]
    Require,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MongoDbVersionConfig {
    pub name: String,
    pub builds: Vec<BuildConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub platform: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub git_version: String,
    pub architecture: String,
    pub flavor: String,
    #[serde(default)]
    pub min_os_version: String,
    #[serde(default)]
    pub max_os_version: String,
    #[serde(default)]
    pub modules: Vec<String>,
}

impl MongoDbVersionConfig {
    /// Linux builds the agent accepts for any version. Agents never download
    /// mongod since the image ships the binaries, so no manifest is consulted.
    pub fn any_linux(version: &str) -> Self {
        let build = |flavor: &str| BuildConfig {
            platform: "linux".to_string(),
            architecture: "amd64".to_string(),
            flavor: flavor.to_string(),
            ..Default::default()
        };
        MongoDbVersionConfig {
            name: version.to_string(),
            builds: vec![build("rhel"), build("ubuntu")],
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    #[serde(default)]
    pub download_base: String,
}
