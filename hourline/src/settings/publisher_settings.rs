use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    /// Notifications are only logged.
    Log,
    Mqtt,
}

impl Default for PublisherKind {
    fn default() -> Self {
        Self::Log
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherSettings {
    #[serde(default)]
    pub kind: PublisherKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttSettings>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttSettings {
    pub host: String,

    #[serde(default = "MqttSettings::default_port")]
    pub port: u16,

    #[serde(default = "MqttSettings::default_client_id")]
    pub client_id: String,

    /// Topic receiving a notification each time an entity pair's hourly rollup is committed.
    #[serde(default = "MqttSettings::default_topic")]
    pub topic: String,

    #[serde(default = "MqttSettings::default_keep_alive", rename = "keep_alive_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub keep_alive: Duration,

    /// Bound on requests queued for the event loop before publishing starts to be refused.
    #[serde(default = "MqttSettings::default_capacity")]
    pub capacity: usize,
}

impl MqttSettings {
    pub const fn default_port() -> u16 {
        1883
    }

    pub fn default_client_id() -> String {
        "hourline".to_string()
    }

    pub fn default_topic() -> String {
        "new-device-processed-data".to_string()
    }

    pub const fn default_keep_alive() -> Duration {
        Duration::from_secs(15)
    }

    pub const fn default_capacity() -> usize {
        100
    }
}
