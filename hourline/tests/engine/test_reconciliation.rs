use std::sync::Arc;
use std::time::Duration;

use claim::*;
use hourline::clock::FixedClock;
use hourline::engine::service::EngineCmd;
use hourline::engine::ReconcileStatus;
use hourline::model::{EntityPair, MetricKind};
use hourline::store::{MemoryStore, RawSample};
use pretty_assertions::assert_eq;

use crate::fixtures::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deactivated_pair_resumes_from_its_pointer() -> anyhow::Result<()> {
    once_cell::sync::Lazy::force(&hourline::logging::TEST_TRACING);
    let store = MemoryStore::default();
    store.set_host_active("h1", true);
    store.set_metric_active("cpu_temp", true);
    store.insert_sample(
        RawSample::new("h1", MetricKind::CpuTemp, ts(3, 10, 5))
            .with_sub_key("core0")
            .with_values([61.0]),
    );

    let clock = FixedClock::new(ts(3, 11, 30));
    let publisher = Arc::new(RecordingPublisher::default());
    let settings = settings(Duration::from_secs(3600), Duration::from_millis(20));
    let test = start_engine(store, clock, publisher, &settings).await?;
    let pair = EntityPair::new("h1", "cpu_temp");
    let reconciler = test.engine.reconciler().clone();

    assert!(eventually(|| test.store.pointer(&pair) == Some(ts(3, 11, 0))).await);
    let first = assert_some!(test.store.rollup(&pair, Some("core0"), ts(3, 10, 0)));

    test.store.set_host_active("h1", false);
    let report = settle(reconciler.reconcile()).await?;
    assert_eq!(report.stopped, vec![pair.clone()]);
    assert_eq!(report.running, 0);

    test.store.insert_sample(
        RawSample::new("h1", MetricKind::CpuTemp, ts(3, 11, 20))
            .with_sub_key("core0")
            .with_values([65.0]),
    );
    test.clock.set(ts(3, 12, 10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(test.store.pointer(&pair), Some(ts(3, 11, 0)));

    test.store.set_host_active("h1", true);
    let report = settle(reconciler.reconcile()).await?;
    assert_eq!(report.started, vec![pair.clone()]);

    assert!(eventually(|| test.store.pointer(&pair) == Some(ts(3, 12, 0))).await);
    let resumed = assert_some!(test.store.rollup(&pair, Some("core0"), ts(3, 11, 0)));
    assert_eq!(resumed.row.row_count, 1);

    // the earlier window was not reprocessed
    let unchanged = assert_some!(test.store.rollup(&pair, Some("core0"), ts(3, 10, 0)));
    assert_eq!(unchanged, first);

    test.engine.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_api_reports_health_and_reconciles_on_demand() -> anyhow::Result<()> {
    once_cell::sync::Lazy::force(&hourline::logging::TEST_TRACING);
    let store = MemoryStore::default();
    store.set_host_active("h1", true);
    store.set_metric_active("load_average", true);

    let clock = FixedClock::new(ts(3, 11, 30));
    let publisher = Arc::new(RecordingPublisher::default());
    let settings = settings(Duration::from_secs(3600), Duration::from_secs(3600));
    let test = start_engine(store, clock, publisher, &settings).await?;
    let tx_api = test.engine.inner.tx_service_api.clone();

    let rx_status = test.engine.reconciler().rx_status();
    assert!(eventually(|| matches!(*rx_status.borrow(), ReconcileStatus::Ready { .. })).await);

    let (cmd, rx) = EngineCmd::check_health();
    assert_ok!(tx_api.send(cmd));
    let status = settle(rx).await?;
    assert!(matches!(status, ReconcileStatus::Ready { running: 1, .. }));

    test.store.set_host_active("h2", true);
    test.store.set_metric_active("uptime", true);
    let (cmd, rx) = EngineCmd::reconcile();
    assert_ok!(tx_api.send(cmd));
    let report = settle(rx).await??;
    assert_eq!(
        report.started,
        vec![
            EntityPair::new("h1", "uptime"),
            EntityPair::new("h2", "load_average"),
            EntityPair::new("h2", "uptime"),
        ]
    );
    assert_eq!(report.running, 4);

    test.engine.shutdown().await?;
    assert!(test.store.rollups_for(&EntityPair::new("h1", "load_average")).is_empty());
    Ok(())
}
