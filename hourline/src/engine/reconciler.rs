use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, IntGauge, Opts};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

use super::registry::WorkerRegistry;
use super::worker::Worker;
use crate::error::MetricLabel;
use crate::model::{EntityPair, MetricKind};
use crate::publish::EventPublisher;
use crate::rollup::Aggregator;
use crate::settings::EngineSettings;
use crate::store::{EntityEnumerator, StoreError};

/// Changes applied by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<EntityPair>,
    pub stopped: Vec<EntityPair>,
    pub running: usize,
}

/// Result of the latest reconciliation pass, as reported by the health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReconcileStatus {
    Starting,
    Ready { reconciled_at: DateTime<Utc>, running: usize },
    Degraded { failed_at: DateTime<Utc>, running: usize, error: String },
}

/// Keeps exactly one worker running for every active (host, metric) pair.
pub struct Reconciler {
    enumerator: Arc<dyn EntityEnumerator>,
    aggregator: Aggregator,
    publisher: Arc<dyn EventPublisher>,
    reconcile_interval: Duration,
    backoff_interval: Duration,
    registry: Mutex<WorkerRegistry>,
    tx_status: watch::Sender<ReconcileStatus>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("enumerator", &self.enumerator)
            .field("publisher", &self.publisher)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("backoff_interval", &self.backoff_interval)
            .finish()
    }
}

impl Reconciler {
    pub fn new(
        enumerator: Arc<dyn EntityEnumerator>, aggregator: Aggregator, publisher: Arc<dyn EventPublisher>,
        settings: &EngineSettings,
    ) -> Self {
        let (tx_status, _) = watch::channel(ReconcileStatus::Starting);
        Self {
            enumerator,
            aggregator,
            publisher,
            reconcile_interval: settings.reconcile_interval,
            backoff_interval: settings.backoff_interval,
            registry: Mutex::new(WorkerRegistry::default()),
            tx_status,
        }
    }

    pub fn rx_status(&self) -> watch::Receiver<ReconcileStatus> {
        self.tx_status.subscribe()
    }

    pub async fn running(&self) -> HashSet<EntityPair> {
        self.registry.lock().await.pairs()
    }

    /// Brings the running workers in line with the currently active hosts and metrics. When
    /// either enumeration fails the pass is abandoned and running workers are left untouched.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let desired = match self.desired_pairs().await {
            Ok(desired) => desired,
            Err(error) => {
                tracing::error!(?error, "failed to enumerate active hosts and metrics - abandoning reconciliation pass");
                RECONCILE_ERRORS.with_label_values(&[error.label().as_ref()]).inc();
                RECONCILE_PASSES.with_label_values(&["abandoned"]).inc();
                let running = self.registry.lock().await.len();
                self.tx_status.send_replace(ReconcileStatus::Degraded {
                    failed_at: Utc::now(),
                    running,
                    error: error.to_string(),
                });
                return Err(error);
            },
        };

        let mut registry = self.registry.lock().await;
        if registry.is_closed() {
            tracing::warn!("rollup engine is shutting down - skipping reconciliation pass");
            return Ok(ReconcileReport::default());
        }

        for pair in registry.remove_finished() {
            tracing::warn!(%pair, "rollup worker ended without being stopped - will restart if still active");
        }

        let running = registry.pairs();
        let stopped: Vec<_> = running.difference(&desired).cloned().sorted().collect();
        let started: Vec<_> = desired.difference(&running).cloned().sorted().collect();

        for pair in stopped.iter() {
            registry.retire(pair);
        }

        for pair in started.iter() {
            // a previous worker for the pair may still be committing its last window
            if let Some(previous) = registry.take_stopping(pair) {
                tracing::info!(%pair, "waiting for previous rollup worker to stop before restarting pair");
                previous.stop().await;
            }

            let worker = Worker::new(
                pair.clone(),
                self.aggregator.clone(),
                self.publisher.clone(),
                self.backoff_interval,
            );
            if let Err(rejected) = registry.register(worker.spawn()) {
                rejected.cancel();
            }
        }

        let report = ReconcileReport { started, stopped, running: registry.len() };
        drop(registry);

        RECONCILE_RUNNING_WORKERS.set(report.running as i64);
        RECONCILE_PASSES.with_label_values(&["completed"]).inc();
        self.tx_status.send_replace(ReconcileStatus::Ready { reconciled_at: Utc::now(), running: report.running });
        tracing::info!(
            nr_started=%report.started.len(), nr_stopped=%report.stopped.len(), running=%report.running,
            "reconciliation pass completed"
        );
        Ok(report)
    }

    async fn desired_pairs(&self) -> Result<HashSet<EntityPair>, StoreError> {
        let (hosts, metrics) =
            futures::try_join!(self.enumerator.active_hosts(), self.enumerator.active_metrics())?;

        for metric in metrics.iter() {
            if let Err(error) = MetricKind::from_id(metric.as_str()) {
                tracing::warn!(%metric, ?error, "active metric has no hourly rollup - its workers will report errors");
            }
        }

        Ok(hosts
            .iter()
            .cartesian_product(metrics.iter())
            .map(|(host, metric)| EntityPair::new(host.clone(), metric.clone()))
            .collect())
    }

    /// Reconciles immediately and then on every interval until shutdown is signalled, after which
    /// every worker is stopped.
    #[tracing::instrument(level = "info", skip(self, rx_shutdown))]
    pub async fn run(&self, mut rx_shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.reconcile_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // failures are logged and counted by the pass itself
                    let _ = self.reconcile().await;
                },

                _ = shutdown_signalled(&mut rx_shutdown) => {
                    tracing::info!("reconciler received shutdown");
                    break;
                },
            }
        }

        self.shutdown().await;
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn shutdown(&self) {
        let handles = self.registry.lock().await.close();
        tracing::info!(nr_workers=%handles.len(), "stopping all rollup workers");
        futures::future::join_all(handles.into_iter().map(|h| h.stop())).await;
        RECONCILE_RUNNING_WORKERS.set(0);
    }
}

async fn shutdown_signalled(rx_shutdown: &mut watch::Receiver<bool>) {
    while !*rx_shutdown.borrow() {
        if rx_shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub static RECONCILE_PASSES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reconcile_passes", "Number of worker reconciliation passes by outcome"),
        &["outcome"],
    )
    .expect("failed creating reconcile_passes metric")
});

pub static RECONCILE_RUNNING_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "reconcile_running_workers",
        "Number of rollup workers running after the latest reconciliation",
    )
    .expect("failed creating reconcile_running_workers metric")
});

pub static RECONCILE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("reconcile_errors", "Number of abandoned reconciliation passes"),
        &["error_type"],
    )
    .expect("failed creating reconcile_errors metric")
});
