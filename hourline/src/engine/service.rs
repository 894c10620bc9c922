use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use prometheus::{Registry, TextEncoder};
use tokio::sync::{mpsc, watch};

use super::reconciler::{Reconciler, ReconcileStatus};

pub use protocol::{EngineApiError, EngineCmd, EngineServiceApi, MetricsReport, MetricsSpan};

mod protocol {
    use std::collections::HashMap;

    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use once_cell::sync::Lazy;
    use regex::RegexSet;
    use serde::Deserialize;
    use strum_macros::{Display, EnumIter};
    use thiserror::Error;
    use tokio::sync::{mpsc, oneshot};

    use crate::engine::reconciler::{ReconcileReport, ReconcileStatus};
    use crate::store::StoreError;

    pub type EngineServiceApi = mpsc::UnboundedSender<EngineCmd>;

    #[derive(Debug)]
    pub enum EngineCmd {
        GatherMetrics {
            domain: MetricsSpan,
            tx: oneshot::Sender<Result<MetricsReport, EngineApiError>>,
        },
        CheckHealth {
            tx: oneshot::Sender<ReconcileStatus>,
        },
        Reconcile {
            tx: oneshot::Sender<Result<ReconcileReport, EngineApiError>>,
        },
    }

    impl EngineCmd {
        #[inline]
        pub fn gather_metrics(domain: MetricsSpan) -> (Self, oneshot::Receiver<Result<MetricsReport, EngineApiError>>) {
            let (tx, rx) = oneshot::channel();
            (Self::GatherMetrics { domain, tx }, rx)
        }

        #[inline]
        pub fn check_health() -> (Self, oneshot::Receiver<ReconcileStatus>) {
            let (tx, rx) = oneshot::channel();
            (Self::CheckHealth { tx }, rx)
        }

        #[inline]
        pub fn reconcile() -> (Self, oneshot::Receiver<Result<ReconcileReport, EngineApiError>>) {
            let (tx, rx) = oneshot::channel();
            (Self::Reconcile { tx }, rx)
        }
    }

    #[derive(Debug, Default)]
    pub struct MetricsReport(pub String);

    /// Engine API failed to satisfy request.
    #[derive(Debug, Error)]
    pub enum EngineApiError {
        #[error("Failed to start rollup engine API: {0}")]
        BootstrapError(#[from] hyper::Error),

        #[error("Could not connect to rollup engine API: {0}")]
        EngineSendError(#[from] mpsc::error::SendError<EngineCmd>),

        #[error("Could not receive response from rollup engine: {0}")]
        EngineRecvError(#[from] oneshot::error::RecvError),

        #[error("Failure in prometheus: {0}")]
        PrometheusError(#[from] prometheus::Error),

        #[error("Reconciliation pass failed: {0}")]
        ReconcileError(#[from] StoreError),

        #[error("Could not open or bind to a TCP address for the rollup engine's API: {0}")]
        IOError(#[from] std::io::Error),
    }

    impl IntoResponse for EngineApiError {
        fn into_response(self) -> Response {
            tracing::error!(error=?self, "failure in rollup engine API");
            let status = match self {
                Self::ReconcileError(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, self.to_string()).into_response()
        }
    }

    #[derive(Debug, Display, EnumIter, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
    #[strum(serialize_all = "lowercase")]
    #[serde(rename_all(deserialize = "lowercase"))]
    pub enum MetricsSpan {
        All,
        Reconcile,
        Worker,
        Aggregate,
        Store,
        Publish,
    }

    impl Default for MetricsSpan {
        fn default() -> Self {
            Self::All
        }
    }

    static METRIC_REGEX: Lazy<HashMap<MetricsSpan, RegexSet>> = Lazy::new(|| {
        let patterns: [(MetricsSpan, &[&str]); 6] = [
            (MetricsSpan::All, &[r".*"]),
            (MetricsSpan::Reconcile, &[r"(?i)reconcile"]),
            (MetricsSpan::Worker, &[r"(?i)worker"]),
            (MetricsSpan::Aggregate, &[r"(?i)aggregate"]),
            (MetricsSpan::Store, &[r"(?i)store"]),
            (MetricsSpan::Publish, &[r"(?i)publish"]),
        ];

        patterns
            .into_iter()
            .filter_map(|(span, ps)| match RegexSet::new(ps) {
                Ok(rs) => Some((span, rs)),
                Err(error) => {
                    tracing::error!(?error, %span, "invalid metrics span pattern");
                    None
                },
            })
            .collect()
    });

    impl MetricsSpan {
        pub fn regex(&self) -> Option<&'static RegexSet> {
            METRIC_REGEX.get(self)
        }
    }
}

pub struct Service<'r> {
    tx_api: EngineServiceApi,
    rx_api: mpsc::UnboundedReceiver<EngineCmd>,
    reconciler: Arc<Reconciler>,
    rx_status: watch::Receiver<ReconcileStatus>,
    metrics_registry: Option<&'r Registry>,
}

impl<'r> fmt::Debug for Service<'r> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("metrics_registry", &self.metrics_registry)
            .finish()
    }
}

impl<'r> Service<'r> {
    pub fn new(reconciler: Arc<Reconciler>, metrics_registry: Option<&'r Registry>) -> Self {
        let (tx_api, rx_api) = mpsc::unbounded_channel();
        let rx_status = reconciler.rx_status();
        Self {
            tx_api,
            rx_api,
            reconciler,
            rx_status,
            metrics_registry,
        }
    }

    pub fn tx_api(&self) -> EngineServiceApi {
        self.tx_api.clone()
    }

    /// Serves commands until every outside copy of the api sender is dropped.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn run(self) {
        let Self { tx_api, mut rx_api, reconciler, rx_status, metrics_registry } = self;
        drop(tx_api);

        while let Some(cmd) = rx_api.recv().await {
            match cmd {
                EngineCmd::GatherMetrics { domain, tx } => {
                    let report = Self::get_metrics_report(metrics_registry, &domain);
                    if report.is_ok() {
                        tracing::info!(?domain, "reporting on metrics domain.");
                    } else {
                        tracing::warn!(?domain, ?report, "failed to gather metrics report");
                    }
                    let _ = tx.send(report);
                },

                EngineCmd::CheckHealth { tx } => {
                    let status = rx_status.borrow().clone();
                    tracing::debug!(?status, "reporting engine health.");
                    let _ = tx.send(status);
                },

                EngineCmd::Reconcile { tx } => {
                    let report = reconciler.reconcile().await.map_err(EngineApiError::from);
                    let _ = tx.send(report);
                },
            }
        }

        tracing::info!("hourline engine service stopping...");
    }

    #[tracing::instrument(level = "info", skip(metrics_registry))]
    fn get_metrics_report(
        metrics_registry: Option<&Registry>, span: &MetricsSpan,
    ) -> Result<MetricsReport, EngineApiError> {
        fn filter_report(original: String, span: &MetricsSpan) -> String {
            match span.regex() {
                Some(rs) => original.lines().filter(|ln| rs.is_match(ln)).join("\n"),
                None => original,
            }
        }

        if let Some(registry) = metrics_registry {
            let metrics = registry.gather();
            let encoder = TextEncoder::default();
            let report = encoder.encode_to_string(&metrics)?;
            let report = filter_report(report, span);
            Ok(MetricsReport(report))
        } else {
            Ok(MetricsReport::default())
        }
    }
}
