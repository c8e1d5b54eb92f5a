//! One reconcile pass over a MongoDB replica set.
//!
//! Every pass re-reads live state and commits each object before moving on, so a
//! pass that stops early (or fails) leaves the cluster in a state the next pass
//! picks up from. The automation config is always written before the StatefulSet,
//! since agents must see a new document before their member is restarted.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use super::tls::{automation_config_tls, complete_tls_rollout, validate_tls};
use super::upgrade::{evaluate, mark_in_progress, mark_left_ready_state, reset, UpgradeState};
use crate::api::v1::{MongoDB, MongoDBStatus, Phase};
use crate::automation_config::{
    AutomationConfig, AutomationConfigBuilder, MongoDbVersionConfig, AUTOMATION_CONFIG_KEY,
};
use crate::client::ResourceClient;
use crate::scram::ensure_scram_enabler;
use crate::util::config::OperatorConfig;
use crate::util::errors::Result;
use crate::workload::statefulset::is_spec_current;
use crate::workload::{desired_statefulset, ensure_service, ensure_statefulset};

pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

/// Why a pass stopped before the replica set converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    TlsNotReady,
    StatefulSetNotReady,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryReason::TlsNotReady => "tls_not_ready",
            RetryReason::StatefulSetNotReady => "statefulset_not_ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged, or the resource is gone.
    Done,
    RetryAfter { delay: Duration, reason: RetryReason },
}

impl ReconcileOutcome {
    fn retry(reason: RetryReason) -> Self {
        ReconcileOutcome::RetryAfter {
            delay: NOT_READY_REQUEUE,
            reason,
        }
    }
}

impl From<ReconcileOutcome> for Action {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::RetryAfter { delay, .. } => Action::requeue(delay),
        }
    }
}

pub struct ReplicaSetReconciler<C: ResourceClient> {
    client: C,
    config: OperatorConfig,
}

impl<C: ResourceClient> ReplicaSetReconciler<C> {
    pub fn new(client: C, config: OperatorConfig) -> Self {
        ReplicaSetReconciler { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let mdb = match self.client.get_opt::<MongoDB>(namespace, name).await? {
            Some(mdb) => mdb,
            None => {
                debug!(mongodb = %name, namespace = %namespace, "MongoDB no longer exists");
                return Ok(ReconcileOutcome::Done);
            }
        };
        let state = UpgradeState::of(&mdb);
        debug!(mongodb = %name, ?state, "reconciling replica set");

        self.ensure_automation_config(&mdb).await?;
        ensure_service(&self.client, &mdb).await?;

        if !validate_tls(&self.client, &mdb).await? {
            info!(mongodb = %name, "TLS material not available yet");
            return Ok(ReconcileOutcome::retry(RetryReason::TlsNotReady));
        }

        let desired = desired_statefulset(&mdb, &self.config, state.update_strategy())?;
        if state.is_upgrading() {
            mark_in_progress(&self.client, &mdb).await?;
        }
        ensure_statefulset(&self.client, &desired).await?;

        let live = self.client.get::<StatefulSet>(namespace, name).await?;
        let readiness = evaluate(&state, &live, mdb.spec.members, is_spec_current(&live, &desired)?);
        if readiness.left_ready_state && !state.has_left_ready_state() {
            info!(mongodb = %name, "StatefulSet left the ready state");
            mark_left_ready_state(&self.client, &mdb).await?;
        }
        if !readiness.ready {
            info!(mongodb = %name, "StatefulSet is not ready yet");
            return Ok(ReconcileOutcome::retry(RetryReason::StatefulSetNotReady));
        }

        reset(&self.client, &mdb, &state).await?;
        complete_tls_rollout(&self.client, &mdb).await?;
        self.update_status(&mdb).await?;
        Ok(ReconcileOutcome::Done)
    }

    /// Builds the automation config on top of the stored one and writes it when
    /// its version moved or it was never stored.
    async fn ensure_automation_config(&self, mdb: &MongoDB) -> Result<AutomationConfig> {
        let namespace = mdb.namespace_or_err()?;
        let existing = self.client.get_opt::<ConfigMap>(&namespace, &mdb.config_map_name()).await?;
        let previous = match existing
            .as_ref()
            .and_then(|cm| cm.data.as_ref())
            .and_then(|data| data.get(AUTOMATION_CONFIG_KEY))
        {
            Some(raw) => AutomationConfig::from_json(raw)?,
            None => AutomationConfig::default(),
        };
        let previous_version = previous.version;

        let enabler = if mdb.is_scram_enabled() {
            Some(ensure_scram_enabler(&self.client, mdb).await?)
        } else {
            None
        };

        let domain = format!("{}.{}.svc.{}", mdb.service_name(), namespace, self.config.cluster_domain);
        let mut builder = AutomationConfigBuilder::new(&mdb.name_any())
            .domain(&domain)
            .members(mdb.spec.members)
            .mongodb_version(&mdb.spec.version)
            .feature_compatibility_version(&mdb.feature_compatibility_version())
            .previous(previous)
            .add_version(MongoDbVersionConfig::any_linux(&mdb.spec.version));
        if let Some(tls) = automation_config_tls(mdb) {
            builder = builder.tls(tls);
        }
        if let Some(enabler) = &enabler {
            builder = builder.auth_enabler(enabler);
        }
        let config = builder.build()?;

        if existing.is_some() && config.version == previous_version {
            debug!(mongodb = %mdb.name_any(), version = config.version, "automation config is current");
            return Ok(config);
        }

        info!(
            mongodb = %mdb.name_any(),
            version = config.version,
            "writing automation config"
        );
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(mdb.config_map_name()),
                namespace: Some(namespace.clone()),
                owner_references: mdb.controller_owner_ref(&()).map(|oref| vec![oref]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(AUTOMATION_CONFIG_KEY.to_string(), config.to_json()?)])),
            ..Default::default()
        };
        self.client.create_or_update(&namespace, &cm).await?;
        Ok(config)
    }

    async fn update_status(&self, mdb: &MongoDB) -> Result<()> {
        let status = MongoDBStatus {
            mongo_uri: mdb.mongo_uri(&self.config.cluster_domain),
            phase: Phase::Running,
            version: Some(mdb.spec.version.clone()),
        };
        if mdb.status.as_ref() == Some(&status) {
            return Ok(());
        }
        info!(mongodb = %mdb.name_any(), phase = %status.phase, "updating status");
        let mut updated = mdb.clone();
        updated.status = Some(status);
        self.client
            .update_status(&mdb.namespace_or_err()?, &updated)
            .await?;
        Ok(())
    }
}
