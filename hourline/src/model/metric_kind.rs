use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::RollupError;

/// The closed set of metric kinds the aggregator knows how to roll up. Each kind carries the
/// shape of its raw table and its hourly rollup table.
#[derive(
    Debug,
    Display,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    CpuTemp,
    LoadAverage,
    Disk,
    Ram,
    CpuUsage,
}

/// A measured column rolled up into `AVG_`, `MIN_` and `MAX_` prefixed rollup columns.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Measure {
    pub raw: &'static str,
    pub rollup: &'static str,
}

/// A capacity column summed across the window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Total {
    pub raw: &'static str,
    pub rollup: &'static str,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RollupShape {
    pub raw_table: &'static str,
    pub rollup_table: &'static str,
    pub sub_key: Option<&'static str>,
    pub measures: &'static [Measure],
    pub totals: &'static [Total],
}

const CPU_TEMP_SHAPE: RollupShape = RollupShape {
    raw_table: "CPU_TEMPERATURE",
    rollup_table: "CPU_TEMPERATURE_HOURLY",
    sub_key: Some("SENSOR_KEY"),
    measures: &[Measure { raw: "TEMPERATURE", rollup: "TEMPERATURE" }],
    totals: &[],
};

const LOAD_AVERAGE_SHAPE: RollupShape = RollupShape {
    raw_table: "LOAD_AVERAGE",
    rollup_table: "LOAD_AVERAGE_HOURLY",
    sub_key: None,
    measures: &[
        Measure { raw: "LOAD_AVERAGE_1M", rollup: "LOAD_AVERAGE_1M" },
        Measure { raw: "LOAD_AVERAGE_5M", rollup: "LOAD_AVERAGE_5M" },
        Measure { raw: "LOAD_AVERAGE_15M", rollup: "LOAD_AVERAGE_15M" },
    ],
    totals: &[],
};

const DISK_SHAPE: RollupShape = RollupShape {
    raw_table: "DISK_USAGE",
    rollup_table: "DISK_USAGE_HOURLY",
    sub_key: Some("DISK_NAME"),
    measures: &[Measure { raw: "USED_PERCENT_DISK", rollup: "USED_PERCENT" }],
    totals: &[Total { raw: "TOTAL_DISK", rollup: "TOTAL_DISK" }],
};

const RAM_SHAPE: RollupShape = RollupShape {
    raw_table: "RAM_USAGE",
    rollup_table: "RAM_USAGE_HOURLY",
    sub_key: None,
    measures: &[Measure { raw: "USED_PERCENT_RAM", rollup: "USED_PERCENT_RAM" }],
    totals: &[Total { raw: "TOTAL_RAM", rollup: "TOTAL_RAM" }],
};

const CPU_USAGE_SHAPE: RollupShape = RollupShape {
    raw_table: "CPU_USAGE",
    rollup_table: "CPU_USAGE_HOURLY",
    sub_key: None,
    measures: &[Measure { raw: "CPU_USAGE", rollup: "CPU_USAGE" }],
    totals: &[],
};

impl MetricKind {
    pub fn from_id(id: &str) -> Result<Self, RollupError> {
        Self::from_str(id).map_err(|_| RollupError::UnsupportedMetric(id.to_string()))
    }

    pub const fn shape(&self) -> &'static RollupShape {
        match self {
            Self::CpuTemp => &CPU_TEMP_SHAPE,
            Self::LoadAverage => &LOAD_AVERAGE_SHAPE,
            Self::Disk => &DISK_SHAPE,
            Self::Ram => &RAM_SHAPE,
            Self::CpuUsage => &CPU_USAGE_SHAPE,
        }
    }

    pub const fn has_sub_key(&self) -> bool {
        self.shape().sub_key.is_some()
    }
}
