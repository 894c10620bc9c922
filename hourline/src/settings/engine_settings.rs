use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DeserializeAs, DurationSeconds, SerializeAs};
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Interval between reconciliations of running workers against the active hosts and metrics.
    /// Defaults to 15 minutes.
    #[serde(
        default = "EngineSettings::default_reconcile_interval",
        rename = "reconcile_interval_secs"
    )]
    #[serde_as(as = "NonZeroDurationSeconds")]
    pub reconcile_interval: Duration,

    /// Time a worker sleeps after finding no closed hour to roll up, or after a failed attempt.
    /// Defaults to 1 hour.
    #[serde(
        default = "EngineSettings::default_backoff_interval",
        rename = "backoff_interval_secs"
    )]
    #[serde_as(as = "NonZeroDurationSeconds")]
    pub backoff_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Self::default_reconcile_interval(),
            backoff_interval: Self::default_backoff_interval(),
        }
    }
}

impl EngineSettings {
    pub const fn default_reconcile_interval() -> Duration {
        Duration::from_secs(15 * 60)
    }

    pub const fn default_backoff_interval() -> Duration {
        Duration::from_secs(60 * 60)
    }
}

/// Whole seconds, like `DurationSeconds<u64>`, but a zero interval is rejected when loading.
pub struct NonZeroDurationSeconds;

impl SerializeAs<Duration> for NonZeroDurationSeconds {
    fn serialize_as<S: Serializer>(source: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        DurationSeconds::<u64>::serialize_as(source, serializer)
    }
}

impl<'de> DeserializeAs<'de, Duration> for NonZeroDurationSeconds {
    fn deserialize_as<D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let duration: Duration = DurationSeconds::<u64>::deserialize_as(deserializer)?;
        if duration.is_zero() {
            return Err(D::Error::custom("interval must be at least one second"));
        }
        Ok(duration)
    }
}
