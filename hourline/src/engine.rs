pub mod http;
pub mod reconciler;
mod registry;
pub mod service;
pub mod worker;

use std::fmt;
use std::sync::Arc;

use prometheus::Registry;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use http::run_http_server;
pub use reconciler::{ReconcileReport, ReconcileStatus, Reconciler};
pub use registry::WorkerRegistry;
pub use worker::{Worker, WorkerHandle};

use crate::clock::{Clock, SystemClock};
use crate::engine::service::{EngineServiceApi, Service};
use crate::publish::{self, EventPublisher};
use crate::rollup::Aggregator;
use crate::settings::Settings;
use crate::store::{self, Storage};
use crate::{metrics, Result};

pub struct Hourline;
impl Hourline {
    pub fn builder() -> RollupEngine<Building> {
        RollupEngine::default()
    }
}

#[derive(Debug)]
pub struct RollupEngine<S: EngineState> {
    pub inner: S,
}

impl Default for RollupEngine<Building> {
    fn default() -> Self {
        Self { inner: Building::default() }
    }
}

/// Represents rollup engine state.
pub trait EngineState {}

#[derive(Default)]
pub struct Building {
    storage: Option<Storage>,
    publisher: Option<Arc<dyn EventPublisher>>,
    clock: Option<Arc<dyn Clock>>,
    metrics_registry: Option<&'static Registry>,
}
impl EngineState for Building {}

impl fmt::Debug for Building {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Building")
            .field("storage", &self.storage)
            .field("publisher", &self.publisher)
            .field("clock", &self.clock)
            .field("metrics_registry", &self.metrics_registry)
            .finish()
    }
}

impl RollupEngine<Building> {
    /// Overrides the storage configured in settings.
    pub fn with_storage(self, storage: Storage) -> Self {
        tracing::info!(?storage, "setting storage on rollup engine builder.");
        Self {
            inner: Building { storage: Some(storage), ..self.inner },
        }
    }

    /// Overrides the publisher configured in settings.
    pub fn with_publisher(self, publisher: Arc<dyn EventPublisher>) -> Self {
        tracing::info!(?publisher, "setting publisher on rollup engine builder.");
        Self {
            inner: Building { publisher: Some(publisher), ..self.inner },
        }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { inner: Building { clock: Some(clock), ..self.inner } }
    }

    pub fn with_metrics_registry(self, registry: &'static Registry) -> Self {
        tracing::info!(?registry, "added metrics registry to rollup engine.");
        Self {
            inner: Building { metrics_registry: Some(registry), ..self.inner },
        }
    }

    #[tracing::instrument(level = "info", skip(self, settings))]
    pub async fn finish(self, settings: &Settings) -> Result<RollupEngine<Ready>> {
        if let Some(registry) = self.inner.metrics_registry {
            metrics::register_metrics(registry)?;
        }

        let storage = match self.inner.storage {
            Some(storage) => storage,
            None => store::make_storage(&settings.storage).await?,
        };

        let publisher = match self.inner.publisher {
            Some(publisher) => publisher,
            None => publish::make_publisher(&settings.publisher)?,
        };

        let clock = self.inner.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let aggregator = Aggregator::new(&storage, clock);
        let reconciler = Reconciler::new(storage.enumerator.clone(), aggregator, publisher, &settings.engine);

        Ok(RollupEngine {
            inner: Ready {
                reconciler: Arc::new(reconciler),
                metrics_registry: self.inner.metrics_registry,
            },
        })
    }
}

pub struct Ready {
    reconciler: Arc<Reconciler>,
    metrics_registry: Option<&'static Registry>,
}

impl EngineState for Ready {}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ready").field("reconciler", &self.reconciler).finish()
    }
}

impl RollupEngine<Ready> {
    #[tracing::instrument(level = "info", skip(self))]
    pub fn run(self) -> RollupEngine<Running> {
        let (tx_shutdown, rx_shutdown) = watch::channel(false);

        let reconciler = self.inner.reconciler.clone();
        let reconciler_handle = tokio::spawn(async move { reconciler.run(rx_shutdown).await });

        let service = Service::new(self.inner.reconciler.clone(), self.inner.metrics_registry);
        let tx_service_api = service.tx_api();
        let service_handle = tokio::spawn(service.run());

        RollupEngine {
            inner: Running {
                tx_service_api,
                tx_shutdown,
                reconciler: self.inner.reconciler,
                reconciler_handle,
                service_handle,
            },
        }
    }
}

pub struct Running {
    pub tx_service_api: EngineServiceApi,
    tx_shutdown: watch::Sender<bool>,
    reconciler: Arc<Reconciler>,
    reconciler_handle: JoinHandle<()>,
    service_handle: JoinHandle<()>,
}

impl EngineState for Running {}

impl fmt::Debug for Running {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Running")
    }
}

impl RollupEngine<Running> {
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.inner.reconciler
    }

    /// Stops the engine API, then reconciliation and every worker, waiting for in-flight
    /// aggregations to finish.
    #[tracing::instrument(level = "info")]
    pub async fn shutdown(self) -> Result<()> {
        let Running {
            tx_service_api,
            tx_shutdown,
            reconciler_handle,
            service_handle,
            ..
        } = self.inner;

        drop(tx_service_api);
        service_handle.abort();
        let _ = service_handle.await;

        let _ = tx_shutdown.send(true);
        reconciler_handle.await?;
        tracing::info!("rollup engine stopped.");
        Ok(())
    }
}
