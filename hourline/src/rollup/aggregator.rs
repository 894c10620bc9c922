use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts};

use crate::clock::Clock;
use crate::error::RollupError;
use crate::model::{truncate_to_hour, EntityPair, HourWindow, MetricKind};
use crate::store::{ProgressStore, RawSampleReader, RollupWriter, Storage};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// One closed hour was rolled up and the pair's pointer now sits at `window.next_start()`.
    Processed { window: HourWindow, nr_rows: usize },
    NoData,
}

impl ProcessOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::NoData => "no_data",
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processed { window, nr_rows } => write!(f, "processed {window} into {nr_rows} rows"),
            Self::NoData => f.write_str("no data"),
        }
    }
}

/// Computes at most one closed hourly rollup per call for an entity pair, resuming from the
/// pair's progress pointer.
#[derive(Debug, Clone)]
pub struct Aggregator {
    progress: Arc<dyn ProgressStore>,
    reader: Arc<dyn RawSampleReader>,
    writer: Arc<dyn RollupWriter>,
    clock: Arc<dyn Clock>,
}

impl Aggregator {
    pub fn new(storage: &Storage, clock: Arc<dyn Clock>) -> Self {
        Self::from_parts(
            storage.progress.clone(),
            storage.reader.clone(),
            storage.writer.clone(),
            clock,
        )
    }

    pub fn from_parts(
        progress: Arc<dyn ProgressStore>, reader: Arc<dyn RawSampleReader>, writer: Arc<dyn RollupWriter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { progress, reader, writer, clock }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(%pair))]
    pub async fn process(&self, pair: &EntityPair) -> Result<ProcessOutcome, RollupError> {
        let kind = pair.kind()?;
        let _timer = start_aggregate_timer(kind);

        let since = self.progress.get(pair).await?.unwrap_or_else(epoch);
        let earliest = match self.reader.earliest_since(pair, kind, since).await? {
            Some(ts) => ts,
            None => {
                tracing::debug!(%since, "no raw samples since progress pointer");
                return Ok(ProcessOutcome::NoData);
            },
        };

        let window = HourWindow::containing(earliest);
        let current_hour = truncate_to_hour(self.clock.now());
        if window.start == current_hour {
            tracing::debug!(%window, "earliest pending hour is still open");
            return Ok(ProcessOutcome::NoData);
        } else if current_hour < window.start {
            tracing::warn!(%window, %current_hour, "raw samples found ahead of wall clock - skipping until hour closes");
            return Ok(ProcessOutcome::NoData);
        }

        let rows = self.reader.aggregate_window(pair, kind, &window).await?;
        self.writer.commit(pair, kind, &window, &rows).await?;

        let nr_rows = rows.len();
        AGGREGATE_ROWS.with_label_values(&[kind.as_ref()]).inc_by(nr_rows as u64);
        tracing::info!(%window, %nr_rows, next_pointer=%window.next_start(), "hourly rollup committed");
        Ok(ProcessOutcome::Processed { window, nr_rows })
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

pub static AGGREGATE_TIME: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("aggregate_time", "Time spent computing one hourly rollup in seconds")
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["metric_kind"],
    )
    .expect("failed creating aggregate_time metric")
});

#[inline]
fn start_aggregate_timer(kind: MetricKind) -> HistogramTimer {
    AGGREGATE_TIME.with_label_values(&[kind.as_ref()]).start_timer()
}

pub static AGGREGATE_ROWS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("aggregate_rows", "Number of hourly rollup rows written"),
        &["metric_kind"],
    )
    .expect("failed creating aggregate_rows metric")
});
