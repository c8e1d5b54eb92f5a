use super::{
    Auth, AutomationConfig, ClientCertificateMode, MongoDbVersionConfig, Net, Options, Process,
    ProcessArgs, ProcessType, ReplicaSet, ReplicaSetMember, Replication, Ssl, SslMode, Storage,
    SystemLog, TlsConfig, DEFAULT_AGENT_LOG_PATH, DEFAULT_DATA_DIR, DEFAULT_DOWNLOAD_BASE,
};
use crate::api::v1::mongodb::MONGODB_PORT;
use crate::util::errors::{Error, Result, StdError};

/// Fills the auth section of a document that is being built.
///
/// Without an enabler the document carries the disabled markers only.
pub trait AuthEnabler: Send + Sync {
    fn enable_auth(&self, auth: &mut Auth) -> Result<()>;
}

/// Where the agent finds the TLS material mounted into every member.
#[derive(Clone, Debug)]
pub struct TlsSettings {
    pub ca_file_path: String,
    pub pem_key_file: String,
    pub mode: SslMode,
}

pub struct AutomationConfigBuilder<'a> {
    name: String,
    domain: String,
    members: i32,
    mongodb_version: String,
    fcv: String,
    previous: AutomationConfig,
    versions: Vec<MongoDbVersionConfig>,
    tls: Option<TlsSettings>,
    enabler: Option<&'a dyn AuthEnabler>,
}

impl<'a> AutomationConfigBuilder<'a> {
    /// `name` is both the replica set name and the prefix of every process name.
    pub fn new(name: &str) -> Self {
        AutomationConfigBuilder {
            name: name.to_string(),
            domain: String::new(),
            members: 0,
            mongodb_version: String::new(),
            fcv: String::new(),
            previous: AutomationConfig::default(),
            versions: Vec::new(),
            tls: None,
            enabler: None,
        }
    }

    /// Suffix appended to `{name}-{i}` to form each member's hostname.
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn members(mut self, members: i32) -> Self {
        self.members = members;
        self
    }

    pub fn mongodb_version(mut self, version: &str) -> Self {
        self.mongodb_version = version.to_string();
        self
    }

    pub fn feature_compatibility_version(mut self, fcv: &str) -> Self {
        self.fcv = fcv.to_string();
        self
    }

    /// The document currently persisted. Its version is the base of the new one.
    pub fn previous(mut self, previous: AutomationConfig) -> Self {
        self.previous = previous;
        self
    }

    pub fn add_version(mut self, version: MongoDbVersionConfig) -> Self {
        self.versions.push(version);
        self
    }

    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn auth_enabler(mut self, enabler: &'a dyn AuthEnabler) -> Self {
        self.enabler = Some(enabler);
        self
    }

    fn process(&self, index: i32) -> Process {
        let name = format!("{}-{}", self.name, index);
        let ssl = self.tls.as_ref().map(|tls| Ssl {
            mode: tls.mode,
            pem_key_file: tls.pem_key_file.clone(),
            allow_connections_without_certificates: true,
        });
        Process {
            host_name: format!("{}.{}", name, self.domain),
            name,
            args: ProcessArgs {
                net: Net {
                    port: MONGODB_PORT,
                    ssl,
                },
                replication: Replication {
                    repl_set_name: self.name.clone(),
                },
                storage: Storage {
                    db_path: DEFAULT_DATA_DIR.to_string(),
                },
                system_log: SystemLog {
                    destination: "file".to_string(),
                    path: format!("{DEFAULT_AGENT_LOG_PATH}/mongodb.log"),
                },
            },
            feature_compatibility_version: self.fcv.clone(),
            process_type: ProcessType::Mongod,
            version: self.mongodb_version.clone(),
            auth_schema_version: 5,
        }
    }

    /// Builds the document, bumping the version of the previous one by exactly one
    /// if and only if the serialized content changed.
    pub fn build(self) -> Result<AutomationConfig> {
        if self.members < 0 {
            return Err(Error::StdError(StdError::InvalidArgument(format!(
                "replica set {} cannot have {} members",
                self.name, self.members
            ))));
        }

        let processes: Vec<Process> = (0..self.members).map(|i| self.process(i)).collect();
        let members = processes
            .iter()
            .zip(0..)
            .map(|(process, id)| ReplicaSetMember {
                id,
                host: process.name.clone(),
                priority: 1,
                votes: 1,
                arbiter_only: false,
            })
            .collect();

        let mut auth = Auth::disabled();
        if let Some(enabler) = self.enabler {
            enabler.enable_auth(&mut auth)?;
        }

        let versions = if self.versions.is_empty() {
            vec![MongoDbVersionConfig::any_linux(&self.mongodb_version)]
        } else {
            self.versions
        };

        let tls = self.tls.map(|tls| TlsConfig {
            ca_file_path: tls.ca_file_path,
            client_certificate_mode: ClientCertificateMode::Optional,
        });

        let mut candidate = AutomationConfig {
            version: self.previous.version,
            processes,
            replica_sets: vec![ReplicaSet {
                id: self.name,
                members,
                protocol_version: "1".to_string(),
            }],
            auth,
            tls,
            versions,
            options: Options {
                download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            },
        };

        let serialize = |doc: &AutomationConfig| {
            serde_json::to_vec(doc)
                .map_err(|e| Error::StdError(StdError::SerializationError(e.to_string())))
        };
        if serialize(&self.previous)? != serialize(&candidate)? {
            candidate.version += 1;
        }
        Ok(candidate)
    }
}
