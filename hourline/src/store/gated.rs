use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{MemoryStore, RawSampleReader, RollupWriter, Storage, StoreError};
use crate::model::{EntityPair, HourWindow, MetricKind, RollupRow};

/// Memory store whose first window aggregation blocks until released, holding its caller in
/// flight. Records the pointer value of every commit in order.
#[derive(Debug, Clone)]
pub struct GatedStore {
    inner: MemoryStore,
    gate: Arc<Notify>,
    nr_aggregations: Arc<AtomicUsize>,
    commits: Arc<Mutex<Vec<DateTime<Utc>>>>,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            gate: Arc::new(Notify::new()),
            nr_aggregations: Arc::new(AtomicUsize::new(0)),
            commits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn storage(&self) -> Storage {
        let inner = Arc::new(self.inner.clone());
        let gated = Arc::new(self.clone());
        Storage {
            enumerator: inner.clone(),
            progress: inner,
            reader: gated.clone(),
            writer: gated,
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn nr_aggregations(&self) -> usize {
        self.nr_aggregations.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> Vec<DateTime<Utc>> {
        self.commits.lock().clone()
    }
}

#[async_trait]
impl RawSampleReader for GatedStore {
    async fn earliest_since(
        &self, pair: &EntityPair, kind: MetricKind, since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.inner.earliest_since(pair, kind, since).await
    }

    async fn aggregate_window(
        &self, pair: &EntityPair, kind: MetricKind, window: &HourWindow,
    ) -> Result<Vec<RollupRow>, StoreError> {
        if self.nr_aggregations.fetch_add(1, Ordering::SeqCst) == 0 {
            self.gate.notified().await;
        }
        self.inner.aggregate_window(pair, kind, window).await
    }
}

#[async_trait]
impl RollupWriter for GatedStore {
    async fn commit(
        &self, pair: &EntityPair, kind: MetricKind, window: &HourWindow, rows: &[RollupRow],
    ) -> Result<(), StoreError> {
        self.inner.commit(pair, kind, window, rows).await?;
        self.commits.lock().push(window.next_start());
        Ok(())
    }
}
