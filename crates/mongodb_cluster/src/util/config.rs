use std::net::SocketAddr;

/// Output format of the log lines written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Operator configuration, read from flags or the environment of the operator pod
#[derive(Debug, Clone, clap::Parser)]
#[clap(name = "mongodb-operator", about = "Reconciles MongoDB replica sets")]
pub struct OperatorConfig {
    /// Image of the automation agent sidecar running next to every mongod
    #[clap(long, env = "AGENT_IMAGE", default_value = "quay.io/mongodb/mongodb-agent:10.19.0.6562-1")]
    pub agent_image: String,

    /// Image of the init container that installs the version upgrade hook
    #[clap(
        long,
        env = "VERSION_UPGRADE_HOOK_IMAGE",
        default_value = "quay.io/mongodb/mongodb-kubernetes-operator-version-upgrade-post-start-hook:1.0.2"
    )]
    pub version_upgrade_hook_image: String,

    /// Repository of the mongod image, tagged with the requested version
    #[clap(long, env = "MONGODB_IMAGE", default_value = "mongo")]
    pub mongodb_image: String,

    #[clap(long, env = "CLUSTER_DOMAIN", default_value = "cluster.local")]
    pub cluster_domain: String,

    #[clap(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[clap(long, env = "HTTP_BIND", default_value = "0.0.0.0:8080")]
    pub http_bind: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        use clap::Parser;
        OperatorConfig::parse_from(["mongodb-operator"])
    }
}
