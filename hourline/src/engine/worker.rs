use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::MetricLabel;
use crate::model::EntityPair;
use crate::publish::{self, EventPublisher};
use crate::rollup::{Aggregator, ProcessOutcome};

/// Owner's side of a running worker. Cancelling is idempotent, and dropping the handle cancels
/// the worker as well.
#[derive(Debug)]
pub struct WorkerHandle {
    pair: EntityPair,
    tx_cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn pair(&self) -> &EntityPair {
        &self.pair
    }

    pub fn cancel(&self) {
        let _ = self.tx_cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancels the worker and waits for its loop to end. An in-flight aggregation completes first.
    pub async fn stop(self) {
        self.cancel();
        if let Err(error) = self.join.await {
            tracing::error!(?error, pair=%self.pair, "rollup worker ended abnormally");
        }
    }
}

/// Sequential processing loop for one entity pair.
#[derive(Debug)]
pub struct Worker {
    pair: EntityPair,
    aggregator: Aggregator,
    publisher: Arc<dyn EventPublisher>,
    backoff: Duration,
}

impl Worker {
    pub fn new(
        pair: EntityPair, aggregator: Aggregator, publisher: Arc<dyn EventPublisher>, backoff: Duration,
    ) -> Self {
        Self { pair, aggregator, publisher, backoff }
    }

    pub fn spawn(self) -> WorkerHandle {
        let (tx_cancel, rx_cancel) = watch::channel(false);
        let pair = self.pair.clone();
        let join = tokio::spawn(self.run(rx_cancel));
        WorkerHandle { pair, tx_cancel, join }
    }

    #[tracing::instrument(level = "info", name = "rollup_worker", skip(self, rx_cancel), fields(pair=%self.pair))]
    async fn run(self, mut rx_cancel: watch::Receiver<bool>) {
        tracing::info!(backoff=?self.backoff, "rollup worker started");

        loop {
            if *rx_cancel.borrow() || rx_cancel.has_changed().is_err() {
                break;
            }

            match self.aggregator.process(&self.pair).await {
                Ok(outcome @ ProcessOutcome::Processed { .. }) => {
                    WORKER_OUTCOMES.with_label_values(&[outcome.label()]).inc();
                    publish::notify_processed(self.publisher.as_ref(), &self.pair);
                    continue;
                },
                Ok(outcome) => {
                    WORKER_OUTCOMES.with_label_values(&[outcome.label()]).inc();
                    tracing::debug!(%outcome, "nothing to roll up - backing off");
                },
                Err(error) => {
                    WORKER_OUTCOMES.with_label_values(&["error"]).inc();
                    WORKER_ERRORS.with_label_values(&[error.label().as_ref()]).inc();
                    tracing::error!(?error, backoff=?self.backoff, "rollup attempt failed - backing off");
                },
            }

            tokio::select! {
                _ = tokio::time::sleep(self.backoff) => {},
                _ = cancelled(&mut rx_cancel) => break,
            }
        }

        tracing::info!("rollup worker stopped");
    }
}

/// Resolves once cancellation is signalled or the handle is dropped.
async fn cancelled(rx_cancel: &mut watch::Receiver<bool>) {
    while !*rx_cancel.borrow() {
        if rx_cancel.changed().await.is_err() {
            return;
        }
    }
}

pub static WORKER_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("worker_outcomes", "Number of rollup worker iterations by outcome"),
        &["outcome"],
    )
    .expect("failed creating worker_outcomes metric")
});

pub static WORKER_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("worker_errors", "Number of failed rollup attempts"),
        &["error_type"],
    )
    .expect("failed creating worker_errors metric")
});
