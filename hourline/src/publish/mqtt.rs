use std::fmt;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use tokio::task::JoinHandle;

use super::{EventPublisher, ProcessedEvent, PublishError};
use crate::model::EntityPair;
use crate::settings::MqttSettings;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Publishes processed notifications to an MQTT topic. Publishing only enqueues the request; a
/// background task drives the client's event loop and reconnects after broker failures.
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    event_loop: JoinHandle<()>,
}

impl fmt::Debug for MqttPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttPublisher").field("topic", &self.topic).finish()
    }
}

impl MqttPublisher {
    #[tracing::instrument(level = "info", skip(settings), fields(host=%settings.host, port=%settings.port, topic=%settings.topic))]
    pub fn connect(settings: &MqttSettings) -> Self {
        let mut options = MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(settings.keep_alive);
        let (client, mut event_loop) = AsyncClient::new(options, settings.capacity);

        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        tracing::trace!(%pkid, "processed notification sent to broker");
                    },
                    Ok(_) => {},
                    Err(error) => {
                        tracing::warn!(?error, "mqtt event loop failed - reconnecting");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    },
                }
            }
        });

        Self { client, topic: settings.topic.clone(), event_loop }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl EventPublisher for MqttPublisher {
    fn notify(&self, pair: &EntityPair) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&ProcessedEvent::from(pair))?;
        self.client.try_publish(&self.topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}
