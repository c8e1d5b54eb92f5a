//! SCRAM credentials for the database users and for the automation agent.
//!
//! Derived credentials are kept in secrets and read back on every pass. They are
//! only derived again when the user's password changed, since new salts would
//! change the automation config and make every agent reconfigure authentication.

pub mod credentials;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::Resource;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use tracing::{debug, info};

use crate::api::v1::{MongoDB, MongoDBUser};
use crate::automation_config::{Auth, AuthEnabler, Role, User};
use crate::client::ResourceClient;
use crate::util::errors::{Error, Result, StdError};
use crate::util::secret::{secret_data, secret_string};

use self::credentials::{compute_credentials, generate_salt, recompute_with_salt, Mechanism, ScramCreds};

pub const AGENT_NAME: &str = "mms-automation";
pub const AGENT_PASSWORD_KEY: &str = "password";
pub const AGENT_KEYFILE_KEY: &str = "keyfile";

const AGENT_PASSWORD_LEN: usize = 20;
const AGENT_KEYFILE_BYTES: usize = 500;

pub const AUTOMATION_AGENT_KEYFILE_PATH: &str = "/var/lib/mongodb-mms-automation/authentication/keyfile";
const AUTOMATION_AGENT_WINDOWS_KEYFILE_PATH: &str = "%SystemDrive%\\MMSAutomation\\versions\\keyfile";

pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Material the automation agent authenticates with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCredentials {
    pub password: String,
    pub keyfile: String,
}

/// A database user together with its credentials for both mechanisms.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: MongoDBUser,
    pub sha1: ScramCreds,
    pub sha256: ScramCreds,
}

/// Enables SCRAM-SHA-256 in the automation config for the agent and every user.
#[derive(Debug, Clone)]
pub struct ScramEnabler {
    pub agent: AgentCredentials,
    pub users: Vec<UserCredentials>,
}

impl AuthEnabler for ScramEnabler {
    fn enable_auth(&self, auth: &mut Auth) -> Result<()> {
        auth.disabled = false;
        auth.authoritative_set = true;
        auth.key_file = AUTOMATION_AGENT_KEYFILE_PATH.to_string();
        auth.key_file_windows = AUTOMATION_AGENT_WINDOWS_KEYFILE_PATH.to_string();
        auth.auto_user = AGENT_NAME.to_string();
        auth.auto_pwd = self.agent.password.clone();
        auth.key = self.agent.keyfile.clone();
        auth.auto_auth_mechanism = SCRAM_SHA_256.to_string();
        auth.auto_auth_mechanisms = vec![SCRAM_SHA_256.to_string()];
        auth.deployment_auth_mechanisms = vec![SCRAM_SHA_256.to_string()];
        auth.users_wanted = self.users.iter().map(UserCredentials::to_automation_user).collect();
        Ok(())
    }
}

impl UserCredentials {
    fn to_automation_user(&self) -> User {
        User {
            username: self.user.name.clone(),
            database: self.user.db.clone(),
            roles: self
                .user
                .roles
                .iter()
                .map(|role| Role {
                    role: role.name.clone(),
                    database: role.db.clone(),
                })
                .collect(),
            mechanisms: Vec::new(),
            authentication_restrictions: Vec::new(),
            scram_sha1_creds: Some(self.sha1.clone()),
            scram_sha256_creds: Some(self.sha256.clone()),
        }
    }
}

/// Ensures the agent secret and every user's credential secret, then returns the
/// enabler that writes them into the automation config.
pub async fn ensure_scram_enabler<C: ResourceClient>(client: &C, mdb: &MongoDB) -> Result<ScramEnabler> {
    let agent = ensure_agent_credentials(client, mdb).await?;
    let mut users = Vec::with_capacity(mdb.spec.users.len());
    for user in &mdb.spec.users {
        let (sha1, sha256) = ensure_user_credentials(client, mdb, user).await?;
        users.push(UserCredentials {
            user: user.clone(),
            sha1,
            sha256,
        });
    }
    Ok(ScramEnabler { agent, users })
}

/// Returns the credentials of `user`, deriving and storing new ones only when none
/// are stored yet or the password no longer matches them.
pub async fn ensure_user_credentials<C: ResourceClient>(
    client: &C,
    mdb: &MongoDB,
    user: &MongoDBUser,
) -> Result<(ScramCreds, ScramCreds)> {
    let namespace = mdb.namespace_or_err()?;
    let password = client
        .get_opt::<Secret>(&namespace, &user.password_secret_ref.name)
        .await?
        .and_then(|secret| secret_string(&secret, &user.password_secret_ref.key));
    let existing = client
        .get_opt::<Secret>(&namespace, &user.scram_credentials_secret_name())
        .await?
        .and_then(|secret| read_credentials(&secret));

    let password = match (password, existing) {
        (Some(password), Some(existing)) => {
            if password_matches(&user.name, &password, &existing)? {
                debug!(user = %user.name, "stored SCRAM credentials are current");
                return Ok(existing);
            }
            info!(user = %user.name, "password changed, deriving new SCRAM credentials");
            password
        }
        (Some(password), None) => {
            info!(user = %user.name, "deriving SCRAM credentials");
            password
        }
        (None, Some(existing)) => {
            debug!(user = %user.name, "password secret missing, reusing stored SCRAM credentials");
            return Ok(existing);
        }
        (None, None) => {
            return Err(Error::StdError(StdError::CredentialsUnavailable(format!(
                "no password in secret {}/{} key {} and no stored credentials in {} for user {}",
                namespace,
                user.password_secret_ref.name,
                user.password_secret_ref.key,
                user.scram_credentials_secret_name(),
                user.name
            ))));
        }
    };

    let sha1 = compute_credentials(
        Mechanism::ScramSha1,
        &user.name,
        &password,
        &generate_salt(Mechanism::ScramSha1),
    )?;
    let sha256 = compute_credentials(
        Mechanism::ScramSha256,
        &user.name,
        &password,
        &generate_salt(Mechanism::ScramSha256),
    )?;

    let secret = owned_secret(
        mdb,
        &namespace,
        &user.scram_credentials_secret_name(),
        [
            ("sha1-salt", sha1.salt.clone()),
            ("sha1-stored-key", sha1.stored_key.clone()),
            ("sha1-server-key", sha1.server_key.clone()),
            ("sha256-salt", sha256.salt.clone()),
            ("sha256-stored-key", sha256.stored_key.clone()),
            ("sha256-server-key", sha256.server_key.clone()),
        ],
    );
    client.create_or_update(&namespace, &secret).await?;
    Ok((sha1, sha256))
}

/// Returns the agent's password and keyfile, generating whichever is missing.
pub async fn ensure_agent_credentials<C: ResourceClient>(client: &C, mdb: &MongoDB) -> Result<AgentCredentials> {
    let namespace = mdb.namespace_or_err()?;
    let name = mdb.agent_credentials_secret_name();
    let existing = client.get_opt::<Secret>(&namespace, &name).await?;

    let password = existing.as_ref().and_then(|s| secret_string(s, AGENT_PASSWORD_KEY));
    let keyfile = existing.as_ref().and_then(|s| secret_string(s, AGENT_KEYFILE_KEY));
    if let (Some(password), Some(keyfile)) = (&password, &keyfile) {
        return Ok(AgentCredentials {
            password: password.clone(),
            keyfile: keyfile.clone(),
        });
    }

    info!(secret = %name, "generating automation agent credentials");
    let credentials = AgentCredentials {
        password: password.unwrap_or_else(random_password),
        keyfile: keyfile.unwrap_or_else(random_keyfile),
    };
    let secret = owned_secret(
        mdb,
        &namespace,
        &name,
        [
            (AGENT_PASSWORD_KEY, credentials.password.clone()),
            (AGENT_KEYFILE_KEY, credentials.keyfile.clone()),
        ],
    );
    client.create_or_update(&namespace, &secret).await?;
    Ok(credentials)
}

fn password_matches(username: &str, password: &str, existing: &(ScramCreds, ScramCreds)) -> Result<bool> {
    let sha1 = recompute_with_salt(Mechanism::ScramSha1, username, password, &existing.0)?;
    let sha256 = recompute_with_salt(Mechanism::ScramSha256, username, password, &existing.1)?;
    Ok(sha1 == existing.0 && sha256 == existing.1)
}

/// Credentials from a secret written by `ensure_user_credentials`. Incomplete or
/// malformed secrets read as absent.
fn read_credentials(secret: &Secret) -> Option<(ScramCreds, ScramCreds)> {
    let read_base64 = |key: String| -> Option<String> {
        let value = secret_string(secret, &key)?;
        STANDARD.decode(&value).ok()?;
        Some(value)
    };
    let read = |mechanism: Mechanism| -> Option<ScramCreds> {
        let prefix = mechanism.secret_prefix();
        Some(ScramCreds {
            iteration_count: mechanism.iterations(),
            salt: read_base64(format!("{prefix}-salt"))?,
            server_key: read_base64(format!("{prefix}-server-key"))?,
            stored_key: read_base64(format!("{prefix}-stored-key"))?,
        })
    };
    Some((read(Mechanism::ScramSha1)?, read(Mechanism::ScramSha256)?))
}

fn owned_secret<'a>(
    mdb: &MongoDB,
    namespace: &str,
    name: &str,
    entries: impl IntoIterator<Item = (&'a str, String)>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: mdb.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..Default::default()
        },
        data: Some(secret_data(entries)),
        ..Default::default()
    }
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AGENT_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn random_keyfile() -> String {
    let mut bytes = vec![0u8; AGENT_KEYFILE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::mongodb::{Role as MongoDBRole, SecretKeyReference};
    use crate::api::v1::MongoDBSpec;
    use crate::automation_config::AutomationConfigBuilder;
    use crate::client::InMemoryClient;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    const NS: &str = "mongodb";

    fn user() -> MongoDBUser {
        MongoDBUser {
            name: "mdb-0-user".to_string(),
            db: "admin".to_string(),
            password_secret_ref: SecretKeyReference {
                name: "mdb-0-user-password".to_string(),
                key: "password".to_string(),
            },
            roles: vec![MongoDBRole {
                name: "readWrite".to_string(),
                db: "app".to_string(),
            }],
            scram_credentials_secret_name: "mdb-0-user".to_string(),
        }
    }

    fn mdb() -> MongoDB {
        MongoDB {
            metadata: ObjectMeta {
                name: Some("mdb".to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            spec: MongoDBSpec {
                members: 3,
                version: "4.2.6".to_string(),
                users: vec![user()],
                ..Default::default()
            },
            status: None,
        }
    }

    fn secret(name: &str, entries: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: Some(secret_data(entries.iter().map(|(k, v)| (*k, v.to_string())))),
            ..Default::default()
        }
    }

    async fn set_password(client: &InMemoryClient, password: &str) {
        client
            .create_or_update(NS, &secret("mdb-0-user-password", &[("password", password)]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_credentials_are_stable() {
        let client = InMemoryClient::new();
        set_password(&client, "X6oSVAfD1la8fJwhfN").await;

        let first = ensure_user_credentials(&client, &mdb(), &user()).await.unwrap();
        let writes = client.writes();
        let second = ensure_user_credentials(&client, &mdb(), &user()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.writes(), writes);
        assert_eq!(first.0.iteration_count, 10000);
        assert_eq!(first.1.iteration_count, 15000);
    }

    #[tokio::test]
    async fn test_password_change_regenerates_credentials() {
        let client = InMemoryClient::new();
        set_password(&client, "X6oSVAfD1la8fJwhfN").await;
        let before = ensure_user_credentials(&client, &mdb(), &user()).await.unwrap();

        set_password(&client, "a-completely-new-password").await;
        let after = ensure_user_credentials(&client, &mdb(), &user()).await.unwrap();

        assert_ne!(before.0.salt, after.0.salt);
        assert_ne!(before.1.salt, after.1.salt);
        assert_ne!(before.1.stored_key, after.1.stored_key);
        assert_eq!(after.0.iteration_count, 10000);
        assert_eq!(after.1.iteration_count, 15000);

        let stored: Secret = client.get(NS, "mdb-0-user-scram-credentials").await.unwrap();
        assert_eq!(read_credentials(&stored), Some(after));
    }

    #[tokio::test]
    async fn test_stored_credentials_used_without_password() {
        let client = InMemoryClient::new();
        client
            .create(
                NS,
                &secret(
                    "mdb-0-user-scram-credentials",
                    &[
                        ("sha1-salt", "zEt5uDSnr/l9paFPsQzhAA=="),
                        ("sha1-server-key", "LEm/fv4gM0Y/XizbUoz/hULRnX0="),
                        ("sha1-stored-key", "0HzXK7NtK40HXVn6zOqrNKVl+MY="),
                        ("sha256-salt", "qRr+7VgicfVcFjwZhu8u5JSE5ZeVBUP1A+lM4A=="),
                        ("sha256-server-key", "C9FIUhP6mqwe/2SJIheGBpOIqlxuq9Nh3fs+t+R/3zk="),
                        ("sha256-stored-key", "7M7dUSY0sHTOXdNnoPSVbXg9Flon1b3t8MINGI8Tst0="),
                    ],
                ),
            )
            .await
            .unwrap();

        let (sha1, sha256) = ensure_user_credentials(&client, &mdb(), &user()).await.unwrap();
        assert_eq!(sha1.server_key, "LEm/fv4gM0Y/XizbUoz/hULRnX0=");
        assert_eq!(sha256.stored_key, "7M7dUSY0sHTOXdNnoPSVbXg9Flon1b3t8MINGI8Tst0=");
        assert_eq!(client.writes(), 1);
    }

    #[tokio::test]
    async fn test_incomplete_stored_credentials_are_regenerated() {
        let client = InMemoryClient::new();
        set_password(&client, "X6oSVAfD1la8fJwhfN").await;
        client
            .create(
                NS,
                &secret("mdb-0-user-scram-credentials", &[("sha1-salt", "zEt5uDSnr/l9paFPsQzhAA==")]),
            )
            .await
            .unwrap();

        let (_, sha256) = ensure_user_credentials(&client, &mdb(), &user()).await.unwrap();
        let stored: Secret = client.get(NS, "mdb-0-user-scram-credentials").await.unwrap();
        assert_eq!(secret_string(&stored, "sha256-salt"), Some(sha256.salt));
    }

    #[tokio::test]
    async fn test_malformed_stored_keys_are_not_reused() {
        let client = InMemoryClient::new();
        client
            .create(
                NS,
                &secret(
                    "mdb-0-user-scram-credentials",
                    &[
                        ("sha1-salt", "zEt5uDSnr/l9paFPsQzhAA=="),
                        ("sha1-server-key", "not base64!"),
                        ("sha1-stored-key", "0HzXK7NtK40HXVn6zOqrNKVl+MY="),
                        ("sha256-salt", "qRr+7VgicfVcFjwZhu8u5JSE5ZeVBUP1A+lM4A=="),
                        ("sha256-server-key", "C9FIUhP6mqwe/2SJIheGBpOIqlxuq9Nh3fs+t+R/3zk="),
                        ("sha256-stored-key", "7M7dUSY0sHTOXdNnoPSVbXg9Flon1b3t8MINGI8Tst0="),
                    ],
                ),
            )
            .await
            .unwrap();

        let stored: Secret = client.get(NS, "mdb-0-user-scram-credentials").await.unwrap();
        assert_eq!(read_credentials(&stored), None);

        let err = ensure_user_credentials(&client, &mdb(), &user()).await.unwrap_err();
        assert_eq!(err.metric_label(), "credentials_unavailable");
    }

    #[tokio::test]
    async fn test_no_password_and_no_credentials_is_unavailable() {
        let client = InMemoryClient::new();
        let err = ensure_user_credentials(&client, &mdb(), &user()).await.unwrap_err();
        assert_eq!(err.metric_label(), "credentials_unavailable");
        assert_eq!(client.writes(), 0);
    }

    #[tokio::test]
    async fn test_agent_credentials_generated_once() {
        let client = InMemoryClient::new();
        let first = ensure_agent_credentials(&client, &mdb()).await.unwrap();
        let second = ensure_agent_credentials(&client, &mdb()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.password.len(), 20);
        assert!(STANDARD.decode(&first.keyfile).is_ok());
        assert_eq!(client.writes(), 1);
    }

    #[tokio::test]
    async fn test_agent_keyfile_kept_when_password_missing() {
        let client = InMemoryClient::new();
        client
            .create(NS, &secret("mdb-agent-scram-credentials", &[("keyfile", "a2V5ZmlsZQ==")]))
            .await
            .unwrap();

        let credentials = ensure_agent_credentials(&client, &mdb()).await.unwrap();
        assert_eq!(credentials.keyfile, "a2V5ZmlsZQ==");
        assert_eq!(credentials.password.len(), 20);
    }

    #[tokio::test]
    async fn test_enabler_fills_auth_section() {
        let client = InMemoryClient::new();
        set_password(&client, "X6oSVAfD1la8fJwhfN").await;
        let enabler = ensure_scram_enabler(&client, &mdb()).await.unwrap();

        let doc = AutomationConfigBuilder::new("mdb")
            .members(3)
            .mongodb_version("4.2.6")
            .auth_enabler(&enabler)
            .build()
            .unwrap();

        assert_json_include!(
            actual: serde_json::to_value(&doc.auth).unwrap(),
            expected: json!({
                "disabled": false,
                "authoritativeSet": true,
                "autoUser": "mms-automation",
                "autoAuthMechanism": "SCRAM-SHA-256",
                "autoAuthMechanisms": ["SCRAM-SHA-256"],
                "deploymentAuthMechanisms": ["SCRAM-SHA-256"],
                "keyfile": "/var/lib/mongodb-mms-automation/authentication/keyfile",
                "keyfileWindows": "%SystemDrive%\\MMSAutomation\\versions\\keyfile",
                "usersWanted": [{
                    "user": "mdb-0-user",
                    "db": "admin",
                    "roles": [{ "role": "readWrite", "db": "app" }],
                    "scramSha1Creds": { "iterationCount": 10000 },
                    "scramSha256Creds": { "iterationCount": 15000 }
                }]
            })
        );
        assert_eq!(doc.auth.auto_pwd, enabler.agent.password);
        assert_eq!(doc.auth.key, enabler.agent.keyfile);
    }
}
