use std::fmt::Debug;
use std::sync::Arc;

use either::{Either, Left};
#[cfg(test)]
use mockall::automock;
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, Opts};
use serde::Serialize;
use thiserror::Error;

use crate::error::{MetricLabel, SharedString};
use crate::model::EntityPair;
use crate::settings::{PublisherKind, PublisherSettings};

mod mqtt;

pub use mqtt::MqttPublisher;

/// Notifies downstream consumers that an entity pair has a newly committed hourly rollup.
#[cfg_attr(test, automock)]
pub trait EventPublisher: Debug + Sync + Send {
    /// Must not block the caller; delivery is best effort.
    fn notify(&self, pair: &EntityPair) -> Result<(), PublishError>;

    fn name(&self) -> &'static str;
}

/// Notification payload consumed by the threshold alerting side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedEvent<'p> {
    #[serde(rename = "DeviceID")]
    pub device_id: &'p str,
    #[serde(rename = "Param")]
    pub param: &'p str,
}

impl<'p> From<&'p EntityPair> for ProcessedEvent<'p> {
    fn from(pair: &'p EntityPair) -> Self {
        Self { device_id: pair.host.as_str(), param: pair.metric.as_str() }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode processed event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mqtt client refused publish: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("mqtt publisher selected but no mqtt settings provided")]
    MissingMqttSettings,
}

impl MetricLabel for PublishError {
    fn slug(&self) -> SharedString {
        "publish".into()
    }

    fn next(&self) -> Either<SharedString, Box<&dyn MetricLabel>> {
        match self {
            Self::Json(_) => Left("json".into()),
            Self::Mqtt(_) => Left("mqtt".into()),
            Self::MissingMqttSettings => Left("settings".into()),
        }
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct LogPublisher;

impl EventPublisher for LogPublisher {
    fn notify(&self, pair: &EntityPair) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&ProcessedEvent::from(pair))?;
        tracing::info!(%pair, %payload, "hourly rollup processed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Must be called within a tokio runtime when the mqtt publisher is selected.
#[tracing::instrument(level = "info", skip(settings), fields(kind=?settings.kind))]
pub fn make_publisher(settings: &PublisherSettings) -> Result<Arc<dyn EventPublisher>, PublishError> {
    match (settings.kind, settings.mqtt.as_ref()) {
        (PublisherKind::Log, _) => Ok(Arc::new(LogPublisher)),
        (PublisherKind::Mqtt, Some(mqtt)) => Ok(Arc::new(MqttPublisher::connect(mqtt))),
        (PublisherKind::Mqtt, None) => Err(PublishError::MissingMqttSettings),
    }
}

/// Fires the notification; failures are logged and counted but never surface to the caller.
pub fn notify_processed(publisher: &dyn EventPublisher, pair: &EntityPair) {
    if let Err(error) = publisher.notify(pair) {
        tracing::warn!(?error, %pair, publisher=%publisher.name(), "failed to publish processed notification");
        PUBLISH_ERRORS
            .with_label_values(&[publisher.name(), error.label().as_ref()])
            .inc();
    }
}

pub static PUBLISH_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("publish_errors", "Number of processed notifications that could not be published"),
        &["publisher", "error_type"],
    )
    .expect("failed creating publish_errors metric")
});
