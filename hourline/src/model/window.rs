use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ONE_HOUR: i64 = 60 * 60;

/// Truncates a timestamp down to the start of its hour.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1))
        .unwrap_or_else(|_| ts - Duration::seconds(ts.timestamp().rem_euclid(ONE_HOUR)))
}

/// A closed one-hour interval `[start, start + 1h - 1s]`. A sample landing exactly on the next
/// hour boundary belongs to the following window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HourWindow {
    pub fn containing(ts: DateTime<Utc>) -> Self {
        let start = truncate_to_hour(ts);
        Self { start, end: start + Duration::hours(1) - Duration::seconds(1) }
    }

    /// Exclusive upper bound of the window, which is also the next progress pointer.
    pub fn next_start(&self) -> DateTime<Utc> {
        self.start + Duration::hours(1)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

impl fmt::Display for HourWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start.format("%FT%T"), self.end.format("%FT%T"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 11, 3, h, m, s).unwrap()
    }

    #[test]
    fn test_truncate_to_hour() {
        assert_eq!(truncate_to_hour(ts(10, 5, 0)), ts(10, 0, 0));
        assert_eq!(truncate_to_hour(ts(10, 59, 59)), ts(10, 0, 0));
        assert_eq!(truncate_to_hour(ts(11, 0, 0)), ts(11, 0, 0));
    }

    #[test]
    fn test_hour_window_bounds() {
        let window = HourWindow::containing(ts(10, 40, 12));
        assert_eq!(window.start, ts(10, 0, 0));
        assert_eq!(window.end, ts(10, 59, 59));
        assert_eq!(window.next_start(), ts(11, 0, 0));
        assert_eq!(format!("{window}"), "[2022-11-03T10:00:00, 2022-11-03T10:59:59]");
    }

    #[test]
    fn test_hour_window_excludes_next_boundary() {
        let window = HourWindow::containing(ts(10, 0, 0));
        assert!(window.contains(ts(10, 0, 0)));
        assert!(window.contains(ts(10, 59, 59)));
        assert!(!window.contains(ts(11, 0, 0)));
        assert!(!window.contains(ts(9, 59, 59)));
    }
}
