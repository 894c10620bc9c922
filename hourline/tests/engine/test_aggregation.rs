use std::sync::Arc;
use std::time::Duration;

use claim::*;
use hourline::clock::FixedClock;
use hourline::engine::service::{EngineCmd, MetricsSpan};
use hourline::model::{EntityPair, MeasureStats, MetricKind};
use hourline::store::{MemoryStore, RawSample};
use pretty_assertions::assert_eq;

use crate::fixtures::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_rolls_up_closed_hours_and_notifies() -> anyhow::Result<()> {
    once_cell::sync::Lazy::force(&hourline::logging::TEST_TRACING);
    let store = MemoryStore::default();
    store.set_host_active("h1", true);
    store.set_metric_active("cpu_usage", true);
    store.insert_sample(RawSample::new("h1", MetricKind::CpuUsage, ts(3, 10, 5)).with_values([20.0]));
    store.insert_sample(RawSample::new("h1", MetricKind::CpuUsage, ts(3, 10, 40)).with_values([40.0]));
    store.insert_sample(RawSample::new("h1", MetricKind::CpuUsage, ts(3, 11, 10)).with_values([90.0]));

    let clock = FixedClock::new(ts(3, 11, 50));
    let publisher = Arc::new(RecordingPublisher::default());
    let settings = settings(Duration::from_secs(3600), Duration::from_millis(20));
    let test = start_engine(store, clock, publisher, &settings).await?;
    let pair = EntityPair::new("h1", "cpu_usage");

    assert!(eventually(|| test.store.pointer(&pair) == Some(ts(3, 11, 0))).await);
    let rollups = test.store.rollups_for(&pair);
    assert_eq!(rollups.len(), 1);
    let (start, rollup) = &rollups[0];
    assert_eq!(*start, ts(3, 10, 0));
    assert_eq!(rollup.row.row_count, 2);
    assert_eq!(rollup.row.measures, vec![MeasureStats { avg: 30.0, min: 20.0, max: 40.0 }]);
    assert_eq!(test.publisher.events(), vec![pair.clone()]);

    // the 11:00 hour stays open until the clock moves past it
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(test.store.pointer(&pair), Some(ts(3, 11, 0)));

    test.clock.set(ts(3, 12, 5));
    assert!(eventually(|| test.store.pointer(&pair) == Some(ts(3, 12, 0))).await);
    let rollup = assert_some!(test.store.rollup(&pair, None, ts(3, 11, 0)));
    assert_eq!(rollup.row.row_count, 1);
    assert_eq!(rollup.row.measures, vec![MeasureStats { avg: 90.0, min: 90.0, max: 90.0 }]);
    assert_eq!(test.publisher.events(), vec![pair.clone(), pair.clone()]);

    let (cmd, rx) = EngineCmd::gather_metrics(MetricsSpan::Worker);
    assert_ok!(test.engine.inner.tx_service_api.send(cmd));
    let report = assert_ok!(settle(rx).await)?;
    assert!(report.0.contains("worker_outcomes"));
    assert!(!report.0.contains("reconcile_passes"));

    test.engine.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sub_keyed_rollups_skip_empty_hours() -> anyhow::Result<()> {
    once_cell::sync::Lazy::force(&hourline::logging::TEST_TRACING);
    let store = MemoryStore::default();
    store.set_host_active("h1", true);
    store.set_metric_active("disk", true);
    for (at, sda, sdb) in [(ts(3, 8, 15), 40.0, 10.0), (ts(3, 8, 45), 60.0, 30.0), (ts(3, 13, 30), 70.0, 35.0)] {
        store.insert_sample(
            RawSample::new("h1", MetricKind::Disk, at)
                .with_sub_key("sda")
                .with_values([sda])
                .with_totals([500]),
        );
        store.insert_sample(
            RawSample::new("h1", MetricKind::Disk, at)
                .with_sub_key("sdb")
                .with_values([sdb])
                .with_totals([250]),
        );
    }

    let clock = FixedClock::new(ts(3, 15, 0));
    let publisher = Arc::new(RecordingPublisher::default());
    let settings = settings(Duration::from_secs(3600), Duration::from_millis(20));
    let test = start_engine(store, clock, publisher, &settings).await?;
    let pair = EntityPair::new("h1", "disk");

    assert!(eventually(|| test.store.pointer(&pair) == Some(ts(3, 14, 0))).await);
    let starts: Vec<_> = test.store.rollups_for(&pair).into_iter().map(|(start, _)| start).collect();
    assert_eq!(starts, vec![ts(3, 8, 0), ts(3, 8, 0), ts(3, 13, 0), ts(3, 13, 0)]);

    let sda = assert_some!(test.store.rollup(&pair, Some("sda"), ts(3, 8, 0)));
    assert_eq!(sda.row.row_count, 2);
    assert_eq!(sda.row.measures, vec![MeasureStats { avg: 50.0, min: 40.0, max: 60.0 }]);
    assert_eq!(sda.row.totals, vec![1000]);

    let sdb = assert_some!(test.store.rollup(&pair, Some("sdb"), ts(3, 13, 0)));
    assert_eq!(sdb.row.row_count, 1);
    assert_eq!(sdb.row.totals, vec![250]);

    // one notification per processed window, none for the skipped hours
    assert_eq!(test.publisher.events().len(), 2);

    test.engine.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_failure_does_not_hold_back_progress() -> anyhow::Result<()> {
    once_cell::sync::Lazy::force(&hourline::logging::TEST_TRACING);
    let store = MemoryStore::default();
    store.set_host_active("h1", true);
    store.set_metric_active("ram", true);
    store.insert_sample(
        RawSample::new("h1", MetricKind::Ram, ts(3, 9, 10))
            .with_values([55.5])
            .with_totals([16_384]),
    );
    store.insert_sample(
        RawSample::new("h1", MetricKind::Ram, ts(3, 10, 10))
            .with_values([44.5])
            .with_totals([16_384]),
    );

    let clock = FixedClock::new(ts(3, 12, 0));
    let publisher = Arc::new(RecordingPublisher::failing());
    let settings = settings(Duration::from_secs(3600), Duration::from_millis(20));
    let test = start_engine(store, clock, publisher, &settings).await?;
    let pair = EntityPair::new("h1", "ram");

    assert!(eventually(|| test.store.pointer(&pair) == Some(ts(3, 11, 0))).await);
    assert_eq!(test.store.rollups_for(&pair).len(), 2);
    assert_eq!(test.publisher.events().len(), 2);

    test.engine.shutdown().await?;
    Ok(())
}
