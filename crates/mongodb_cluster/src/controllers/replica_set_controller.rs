use super::replica_set::{ReconcileOutcome, ReplicaSetReconciler};
use crate::api::v1::MongoDB;
use crate::client::KubeResourceClient;
use crate::util::config::OperatorConfig;
use crate::util::errors::{Error, ErrorWithRequeue, Result, StdError};
use crate::util::metrics;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    core::v1::{ConfigMap, Service},
};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        watcher::{self, Config},
    },
    Resource,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

/// Requeue after a write lost an optimistic concurrency race.
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, config: OperatorConfig) -> Result<Arc<Context>> {
        Ok(Arc::new(Context {
            reconciler: ReplicaSetReconciler::new(KubeResourceClient::new(client.clone()), config),
            client,
            metrics: metrics::Metrics::new()?.register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
        }))
    }
}

// Context for our reconciler
pub struct Context {
    /// Kubernetes client, used for events
    pub client: Client,
    pub reconciler: ReplicaSetReconciler<KubeResourceClient>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
}

pub async fn reconcile(mdb: Arc<MongoDB>, ctx: Arc<Context>) -> Result<Action> {
    let name = mdb.name_any();
    let _timer = ctx.metrics.count_and_measure(&name);
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = mdb.namespace_or_err()?;
    info!("Reconciling MongoDB \"{}\" in {}", name, ns);

    match ctx.reconciler.reconcile(&ns, &name).await {
        Ok(outcome) => {
            if let ReconcileOutcome::RetryAfter { reason, delay } = outcome {
                info!("MongoDB \"{}\" not ready ({}), retrying in {:?}", name, reason.as_str(), delay);
                ctx.metrics.not_ready_requeue(&name, reason.as_str());
            }
            Ok(outcome.into())
        }
        Err(e) => {
            publish_failure(&mdb, &ctx, &e).await;
            match e {
                Error::StdError(conflict @ StdError::Conflict(_)) => Err(Error::ErrorWithRequeue(
                    ErrorWithRequeue::new(conflict, CONFLICT_REQUEUE),
                )),
                e => Err(e),
            }
        }
    }
}

/// Surfaces a failed pass as a Warning event on the MongoDB resource.
async fn publish_failure(mdb: &MongoDB, ctx: &Context, error: &Error) {
    let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
    let event = Event {
        type_: EventType::Warning,
        reason: "ReconcileFailed".into(),
        note: Some(error.to_string()),
        action: "Reconciling".into(),
        secondary: None,
    };
    if let Err(e) = recorder.publish(&event, &mdb.object_ref(&())).await {
        warn!("failed to publish event for MongoDB \"{}\": {}", mdb.name_any(), e);
    }
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "mongodb-controller".into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

fn error_policy(mdb: Arc<MongoDB>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&mdb, error);
    match error {
        Error::ErrorWithRequeue(e) => Action::requeue(e.duration),
        Error::StdError(_) => Action::requeue(ERROR_REQUEUE),
    }
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State, config: OperatorConfig) -> Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| Error::StdError(StdError::KubeError(e)))?;

    let mongodbs = Api::<MongoDB>::all(client.clone());
    if let Err(e) = mongodbs.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        return Err(Error::StdError(StdError::KubeError(e)));
    }

    Controller::new(mongodbs, Config::default().any_semantic())
        .owns(Api::<StatefulSet>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client, config)?)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}
