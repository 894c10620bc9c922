use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::{automock, predicate::*};
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts};

use crate::error::MetricLabel;
use crate::model::{EntityPair, HostId, HourWindow, MetricId, MetricKind, RollupRow};
use crate::settings::{StorageKind, StorageSettings};

mod error;
#[cfg(test)]
pub(crate) mod gated;
pub mod memory;
pub mod postgres;

pub use error::StoreError;
pub use memory::{MemoryStore, RawSample, StoredRollup};
pub use postgres::PostgresStore;

/// Read-only view of which hosts and metrics are currently enabled.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EntityEnumerator: Debug + Sync + Send {
    async fn active_hosts(&self) -> Result<HashSet<HostId>, StoreError>;
    async fn active_metrics(&self) -> Result<HashSet<MetricId>, StoreError>;
}

/// Persistent watermark per entity pair: the exclusive upper bound of data already rolled up.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProgressStore: Debug + Sync + Send {
    async fn get(&self, pair: &EntityPair) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Unconditionally sets the pointer. Rollup processing advances the pointer through
    /// [`RollupWriter::commit`] so the write and the advance land together.
    async fn advance(&self, pair: &EntityPair, next_hour: DateTime<Utc>) -> Result<(), StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RawSampleReader: Debug + Sync + Send {
    /// Timestamp of the earliest raw sample collected at or after `since`.
    async fn earliest_since(
        &self, pair: &EntityPair, kind: MetricKind, since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Aggregates the raw samples inside the closed window, one row per sub-key.
    async fn aggregate_window(
        &self, pair: &EntityPair, kind: MetricKind, window: &HourWindow,
    ) -> Result<Vec<RollupRow>, StoreError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RollupWriter: Debug + Sync + Send {
    /// Upserts the rollup rows for the window, replacing rows with the same key, and advances the
    /// pair's progress pointer to the window's next start in the same atomic unit.
    async fn commit(
        &self, pair: &EntityPair, kind: MetricKind, window: &HourWindow, rows: &[RollupRow],
    ) -> Result<(), StoreError>;
}

/// The storage collaborators the engine is assembled from. Each handle may point at the same
/// underlying store.
#[derive(Debug, Clone)]
pub struct Storage {
    pub enumerator: Arc<dyn EntityEnumerator>,
    pub progress: Arc<dyn ProgressStore>,
    pub reader: Arc<dyn RawSampleReader>,
    pub writer: Arc<dyn RollupWriter>,
}

impl Storage {
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: EntityEnumerator + ProgressStore + RawSampleReader + RollupWriter + 'static,
    {
        Self {
            enumerator: store.clone(),
            progress: store.clone(),
            reader: store.clone(),
            writer: store,
        }
    }
}

#[tracing::instrument(level = "info", skip(settings), fields(kind=?settings.kind))]
pub async fn make_storage(settings: &StorageSettings) -> Result<Storage, StoreError> {
    match settings.kind {
        StorageKind::Memory => {
            tracing::warn!("using in-memory rollup storage - progress will not survive a restart.");
            Ok(Storage::from_shared(Arc::new(MemoryStore::default())))
        },
        StorageKind::Postgres => {
            let store = PostgresStore::connect(&settings.database);
            if let Err(error) = store.check().await {
                tracing::warn!(
                    ?error,
                    "rollup database not reachable at startup - workers will retry on their backoff."
                );
            }
            Ok(Storage::from_shared(Arc::new(store)))
        },
    }
}

pub static STORE_QUERY_TIME: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("store_query_time", "Time spent in rollup storage operations in seconds")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["action"],
    )
    .expect("failed creating store_query_time metric")
});

#[inline]
pub(crate) fn start_store_query_timer(action: &str) -> HistogramTimer {
    STORE_QUERY_TIME.with_label_values(&[action]).start_timer()
}

pub static STORE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("store_errors", "Number of errors calling rollup storage"),
        &["action", "error_type"],
    )
    .expect("failed creating store_errors metric")
});

#[inline]
pub(crate) fn track_result<T>(action: &str, result: Result<T, StoreError>) -> Result<T, StoreError> {
    if let Err(ref err) = result {
        tracing::error!(error=?err, %action, "rollup storage operation failed");
        STORE_ERRORS.with_label_values(&[action, err.label().as_ref()]).inc();
    }

    result
}
