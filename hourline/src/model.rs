mod metric_kind;
mod window;

pub use metric_kind::{Measure, MetricKind, RollupShape, Total};
pub use window::{truncate_to_hour, HourWindow, ONE_HOUR};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<&str> for HostId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for HostId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct MetricId(String);

impl MetricId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<&str> for MetricId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MetricId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<MetricKind> for MetricId {
    fn from(kind: MetricKind) -> Self {
        Self::new(kind.as_ref())
    }
}

/// One independently scheduled processing stream. Keys both a worker and a progress pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityPair {
    pub host: HostId,
    pub metric: MetricId,
}

impl EntityPair {
    pub fn new(host: impl Into<HostId>, metric: impl Into<MetricId>) -> Self {
        Self { host: host.into(), metric: metric.into() }
    }

    /// Resolves the pair's metric against the closed set of supported kinds.
    pub fn kind(&self) -> Result<MetricKind, crate::error::RollupError> {
        MetricKind::from_id(self.metric.as_str())
    }
}

impl fmt::Display for EntityPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.metric)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Aggregate statistics for one (pair, sub-key, hour window). `measures` and `totals` follow the
/// column order of the metric kind's [`RollupShape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_key: Option<String>,
    pub row_count: i64,
    pub measures: Vec<MeasureStats>,
    pub totals: Vec<i64>,
}
