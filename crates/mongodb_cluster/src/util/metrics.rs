use crate::api::v1::MongoDB;
use crate::util::errors::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use tokio::time::Instant;
use tracing::warn;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub requeues: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "mongodb_controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds",
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["instance"],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "mongodb_controller_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["instance", "error"],
        )?;
        let requeues = IntCounterVec::new(
            opts!(
                "mongodb_controller_not_ready_requeues_total",
                "passes that stopped early waiting for the replica set",
            ),
            &["instance", "reason"],
        )?;
        let reconciliations = IntCounter::new(
            "mongodb_controller_reconciliations_total",
            "reconciliations",
        )?;
        Ok(Metrics {
            reconciliations,
            failures,
            requeues,
            reconcile_duration,
        })
    }

    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.requeues.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure(&self, mdb: &MongoDB, e: &Error) {
        warn!(
            mongodb = %mdb.name_any(),
            error = %e.metric_label(),
            "reconcile failure recorded"
        );
        self.failures
            .with_label_values(&[mdb.name_any().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    pub fn not_ready_requeue(&self, mdb_name: &str, reason: &str) {
        self.requeues.with_label_values(&[mdb_name, reason]).inc()
    }

    pub fn count_and_measure(&self, mdb_name: &str) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            instance: mdb_name.to_string(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
    instance: String,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[self.instance.as_str()])
            .observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_count() {
        let registry = Registry::new();
        let metrics = Metrics::new().unwrap().register(&registry).unwrap();

        {
            let _timer = metrics.count_and_measure("mdb");
        }
        metrics.not_ready_requeue("mdb", "statefulset_not_ready");

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"mongodb_controller_reconciliations_total"));
        assert!(names.contains(&"mongodb_controller_reconcile_duration_seconds"));
        assert!(names.contains(&"mongodb_controller_not_ready_requeues_total"));
        assert_eq!(metrics.reconciliations.get(), 1);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        Metrics::new().unwrap().register(&registry).unwrap();
        assert!(Metrics::new().unwrap().register(&registry).is_err());
    }
}
