use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use tracing::{info, warn};

use super::annotations::set_annotations;
use crate::api::v1::mongodb::{TLS_ROLLED_OUT_ANNOTATION, TRUE_ANNOTATION};
use crate::api::v1::MongoDB;
use crate::automation_config::{SslMode, TlsSettings};
use crate::client::ResourceClient;
use crate::util::errors::Result;
use crate::util::secret::secret_string;
use crate::workload::statefulset::{
    TLS_CA_CERT_NAME, TLS_CA_MOUNT_PATH, TLS_SECRET_CERT_NAME, TLS_SECRET_KEY_NAME, TLS_SERVER_FILE_NAME,
    TLS_SERVER_MOUNT_PATH,
};

/// Whether the referenced CA config map and certificate secret exist with the
/// expected entries. Always true when TLS is disabled.
pub async fn validate_tls<C: ResourceClient>(client: &C, mdb: &MongoDB) -> Result<bool> {
    if !mdb.is_tls_enabled() {
        return Ok(true);
    }
    let namespace = mdb.namespace_or_err()?;
    let tls = &mdb.spec.security.tls;

    let ca = client.get_opt::<ConfigMap>(&namespace, &tls.ca_config_map_ref.name).await?;
    let has_ca = ca
        .as_ref()
        .and_then(|cm| cm.data.as_ref())
        .and_then(|data| data.get(TLS_CA_CERT_NAME))
        .is_some_and(|cert| !cert.is_empty());
    if !has_ca {
        warn!(
            mongodb = %mdb.name_any(),
            "CA config map {} is missing or has no {}", tls.ca_config_map_ref.name, TLS_CA_CERT_NAME
        );
        return Ok(false);
    }

    let secret = client.get_opt::<Secret>(&namespace, &tls.certificate_key_secret_ref.name).await?;
    let has_pair = secret.as_ref().is_some_and(|s| {
        secret_string(s, TLS_SECRET_CERT_NAME).is_some() && secret_string(s, TLS_SECRET_KEY_NAME).is_some()
    });
    if !has_pair {
        warn!(
            mongodb = %mdb.name_any(),
            "certificate secret {} is missing {} or {}",
            tls.certificate_key_secret_ref.name,
            TLS_SECRET_CERT_NAME,
            TLS_SECRET_KEY_NAME
        );
        return Ok(false);
    }
    Ok(true)
}

/// TLS settings for the automation config. Only present once the certificates were
/// mounted into every member, so that agents never reference files that do not exist.
pub fn automation_config_tls(mdb: &MongoDB) -> Option<TlsSettings> {
    if !mdb.is_tls_enabled() || !mdb.has_rolled_out_tls() {
        return None;
    }
    let mode = if mdb.spec.security.tls.optional {
        SslMode::Prefer
    } else {
        SslMode::Require
    };
    Some(TlsSettings {
        ca_file_path: format!("{TLS_CA_MOUNT_PATH}{TLS_CA_CERT_NAME}"),
        pem_key_file: format!("{TLS_SERVER_MOUNT_PATH}{TLS_SERVER_FILE_NAME}"),
        mode,
    })
}

/// Records that every member has the certificates mounted.
pub async fn complete_tls_rollout<C: ResourceClient>(client: &C, mdb: &MongoDB) -> Result<()> {
    if !mdb.is_tls_enabled() || mdb.has_rolled_out_tls() {
        return Ok(());
    }
    info!(mongodb = %mdb.name_any(), "TLS certificates rolled out to every member");
    let namespace = mdb.namespace_or_err()?;
    set_annotations(
        client,
        &namespace,
        &mdb.name_any(),
        &[(TLS_ROLLED_OUT_ANNOTATION, TRUE_ANNOTATION)],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::MongoDBSpec;
    use crate::client::InMemoryClient;
    use crate::util::secret::secret_data;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    const NS: &str = "mongodb";

    fn mdb() -> MongoDB {
        let mut mdb = MongoDB {
            metadata: ObjectMeta {
                name: Some("mdb".to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            spec: MongoDBSpec {
                members: 3,
                version: "4.2.6".to_string(),
                ..Default::default()
            },
            status: None,
        };
        mdb.spec.security.tls.enabled = true;
        mdb.spec.security.tls.ca_config_map_ref.name = "ca-cm".to_string();
        mdb.spec.security.tls.certificate_key_secret_ref.name = "cert-secret".to_string();
        mdb
    }

    fn ca(cert: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("ca-cm".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(TLS_CA_CERT_NAME.to_string(), cert.to_string())])),
            ..Default::default()
        }
    }

    fn cert_secret(entries: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("cert-secret".to_string()),
                ..Default::default()
            },
            data: Some(secret_data(entries.iter().map(|(k, v)| (*k, v.to_string())))),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_validation_requires_ca_and_key_pair() {
        let client = InMemoryClient::new();
        assert!(!validate_tls(&client, &mdb()).await.unwrap());

        client.create(NS, &ca("")).await.unwrap();
        assert!(!validate_tls(&client, &mdb()).await.unwrap());

        client.create_or_update(NS, &ca("-----BEGIN CERTIFICATE-----")).await.unwrap();
        client.create(NS, &cert_secret(&[("tls.crt", "cert")])).await.unwrap();
        assert!(!validate_tls(&client, &mdb()).await.unwrap());

        client
            .create_or_update(NS, &cert_secret(&[("tls.crt", "cert"), ("tls.key", "key")]))
            .await
            .unwrap();
        assert!(validate_tls(&client, &mdb()).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_tls_is_always_valid() {
        let client = InMemoryClient::new();
        let mut mdb = mdb();
        mdb.spec.security.tls.enabled = false;
        assert!(validate_tls(&client, &mdb).await.unwrap());
        assert!(automation_config_tls(&mdb).is_none());
    }

    #[test]
    fn test_settings_only_after_rollout() {
        let mut mdb = mdb();
        assert!(automation_config_tls(&mdb).is_none());

        mdb.metadata.annotations = Some(BTreeMap::from([(
            TLS_ROLLED_OUT_ANNOTATION.to_string(),
            TRUE_ANNOTATION.to_string(),
        )]));
        let settings = automation_config_tls(&mdb).unwrap();
        assert_eq!(settings.ca_file_path, "/var/lib/tls/ca/ca.crt");
        assert_eq!(settings.pem_key_file, "/var/lib/tls/server/server.pem");
        assert_eq!(settings.mode, SslMode::Require);

        mdb.spec.security.tls.optional = true;
        assert_eq!(automation_config_tls(&mdb).unwrap().mode, SslMode::Prefer);
    }
}
