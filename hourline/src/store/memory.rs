use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{EntityEnumerator, ProgressStore, RawSampleReader, RollupWriter, StoreError};
use crate::model::{EntityPair, HostId, HourWindow, MetricId, MetricKind, RollupRow};
use crate::rollup::RollupAccumulator;

/// One raw measurement as the ingestion side would have written it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub host: HostId,
    pub kind: MetricKind,
    pub sub_key: Option<String>,
    pub collected_at: DateTime<Utc>,
    pub values: Vec<f64>,
    pub totals: Vec<i64>,
}

impl RawSample {
    pub fn new(host: impl Into<HostId>, kind: MetricKind, collected_at: DateTime<Utc>) -> Self {
        Self {
            host: host.into(),
            kind,
            sub_key: None,
            collected_at,
            values: Vec::new(),
            totals: Vec::new(),
        }
    }

    pub fn with_sub_key(self, sub_key: impl Into<String>) -> Self {
        Self { sub_key: Some(sub_key.into()), ..self }
    }

    pub fn with_values(self, values: impl IntoIterator<Item = f64>) -> Self {
        Self { values: values.into_iter().collect(), ..self }
    }

    pub fn with_totals(self, totals: impl IntoIterator<Item = i64>) -> Self {
        Self { totals: totals.into_iter().collect(), ..self }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRollup {
    pub row: RollupRow,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RollupKey {
    pair: EntityPair,
    sub_key: Option<String>,
    start: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    hosts: HashMap<HostId, bool>,
    metrics: HashMap<MetricId, bool>,
    samples: HashMap<(HostId, MetricKind), Vec<RawSample>>,
    pointers: HashMap<EntityPair, DateTime<Utc>>,
    rollups: BTreeMap<RollupKey, StoredRollup>,
}

/// Process-local store implementing every storage collaborator over a single lock, so a commit
/// is atomic with respect to every other operation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<Mutex<MemoryState>>);

impl MemoryStore {
    pub fn set_host_active(&self, host: impl Into<HostId>, active: bool) {
        self.0.lock().hosts.insert(host.into(), active);
    }

    pub fn set_metric_active(&self, metric: impl Into<MetricId>, active: bool) {
        self.0.lock().metrics.insert(metric.into(), active);
    }

    pub fn insert_sample(&self, sample: RawSample) {
        let mut state = self.0.lock();
        state
            .samples
            .entry((sample.host.clone(), sample.kind))
            .or_default()
            .push(sample);
    }

    pub fn pointer(&self, pair: &EntityPair) -> Option<DateTime<Utc>> {
        self.0.lock().pointers.get(pair).copied()
    }

    pub fn rollup(&self, pair: &EntityPair, sub_key: Option<&str>, start: DateTime<Utc>) -> Option<StoredRollup> {
        let key = RollupKey {
            pair: pair.clone(),
            sub_key: sub_key.map(str::to_string),
            start,
        };
        self.0.lock().rollups.get(&key).cloned()
    }

    /// Rollups for the pair ordered by window start, then sub-key.
    pub fn rollups_for(&self, pair: &EntityPair) -> Vec<(DateTime<Utc>, StoredRollup)> {
        let state = self.0.lock();
        let mut rollups: Vec<_> = state
            .rollups
            .iter()
            .filter(|(k, _)| &k.pair == pair)
            .map(|(k, v)| ((k.start, k.sub_key.clone()), v.clone()))
            .collect();
        rollups.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));
        rollups.into_iter().map(|((start, _), v)| (start, v)).collect()
    }
}

#[async_trait]
impl EntityEnumerator for MemoryStore {
    async fn active_hosts(&self) -> Result<HashSet<HostId>, StoreError> {
        let state = self.0.lock();
        Ok(state.hosts.iter().filter(|(_, active)| **active).map(|(h, _)| h.clone()).collect())
    }

    async fn active_metrics(&self) -> Result<HashSet<MetricId>, StoreError> {
        let state = self.0.lock();
        Ok(state.metrics.iter().filter(|(_, active)| **active).map(|(m, _)| m.clone()).collect())
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn get(&self, pair: &EntityPair) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.pointer(pair))
    }

    async fn advance(&self, pair: &EntityPair, next_hour: DateTime<Utc>) -> Result<(), StoreError> {
        self.0.lock().pointers.insert(pair.clone(), next_hour);
        Ok(())
    }
}

#[async_trait]
impl RawSampleReader for MemoryStore {
    async fn earliest_since(
        &self, pair: &EntityPair, kind: MetricKind, since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.0.lock();
        let earliest = state
            .samples
            .get(&(pair.host.clone(), kind))
            .and_then(|samples| {
                samples
                    .iter()
                    .map(|s| s.collected_at)
                    .filter(|at| since <= *at)
                    .min()
            });
        Ok(earliest)
    }

    async fn aggregate_window(
        &self, pair: &EntityPair, kind: MetricKind, window: &HourWindow,
    ) -> Result<Vec<RollupRow>, StoreError> {
        let state = self.0.lock();
        let mut acc = RollupAccumulator::new(kind);
        if let Some(samples) = state.samples.get(&(pair.host.clone(), kind)) {
            samples
                .iter()
                .filter(|s| window.contains(s.collected_at))
                .for_each(|s| acc.push(s.sub_key.as_deref(), &s.values, &s.totals));
        }
        Ok(acc.finish())
    }
}

#[async_trait]
impl RollupWriter for MemoryStore {
    async fn commit(
        &self, pair: &EntityPair, _kind: MetricKind, window: &HourWindow, rows: &[RollupRow],
    ) -> Result<(), StoreError> {
        let inserted_at = Utc::now();
        let mut state = self.0.lock();
        for row in rows {
            let key = RollupKey {
                pair: pair.clone(),
                sub_key: row.sub_key.clone(),
                start: window.start,
            };
            state.rollups.insert(key, StoredRollup { row: row.clone(), inserted_at });
        }
        state.pointers.insert(pair.clone(), window.next_start());
        Ok(())
    }
}
