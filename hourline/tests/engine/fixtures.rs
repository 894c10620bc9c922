use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hourline::clock::FixedClock;
use hourline::engine::{Hourline, RollupEngine, Running};
use hourline::model::EntityPair;
use hourline::publish::{EventPublisher, PublishError};
use hourline::settings::{EngineSettings, Settings};
use hourline::store::{MemoryStore, Storage};
use parking_lot::Mutex;
use prometheus::Registry;
use settings_loader::common::http::HttpServerSettings;

pub fn ts(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 11, day, hour, minute, 0).unwrap()
}

pub fn settings(reconcile_interval: Duration, backoff_interval: Duration) -> Settings {
    Settings {
        http: HttpServerSettings { host: "127.0.0.1".to_string(), port: 8000 },
        engine: EngineSettings { reconcile_interval, backoff_interval },
        storage: Default::default(),
        publisher: Default::default(),
    }
}

/// Publisher that remembers every notification it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<EntityPair>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn events(&self) -> Vec<EntityPair> {
        self.events.lock().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn notify(&self, pair: &EntityPair) -> Result<(), PublishError> {
        self.events.lock().push(pair.clone());
        if self.fail {
            Err(PublishError::MissingMqttSettings)
        } else {
            Ok(())
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub struct TestEngine {
    pub store: MemoryStore,
    pub clock: FixedClock,
    pub publisher: Arc<RecordingPublisher>,
    pub registry: &'static Registry,
    pub engine: RollupEngine<Running>,
}

pub async fn start_engine(
    store: MemoryStore, clock: FixedClock, publisher: Arc<RecordingPublisher>, settings: &Settings,
) -> anyhow::Result<TestEngine> {
    let registry: &'static Registry = Box::leak(Box::new(Registry::new()));
    let engine = Hourline::builder()
        .with_storage(Storage::from_shared(Arc::new(store.clone())))
        .with_publisher(publisher.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_metrics_registry(registry)
        .finish(settings)
        .await?
        .run();

    Ok(TestEngine { store, clock, publisher, registry, engine })
}

/// Polls `condition` until it holds or the timeout elapses.
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

pub async fn settle<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation did not settle in time")
}
