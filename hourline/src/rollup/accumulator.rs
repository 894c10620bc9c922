use std::collections::BTreeMap;

use crate::model::{MeasureStats, MetricKind, RollupRow};

#[derive(Debug, Clone, PartialEq)]
struct MeasureAcc {
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for MeasureAcc {
    fn default() -> Self {
        Self { sum: 0.0, min: f64::INFINITY, max: f64::NEG_INFINITY }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GroupAcc {
    count: i64,
    measures: Vec<MeasureAcc>,
    totals: Vec<i64>,
}

impl GroupAcc {
    fn new(kind: MetricKind) -> Self {
        let shape = kind.shape();
        Self {
            count: 0,
            measures: vec![MeasureAcc::default(); shape.measures.len()],
            totals: vec![0; shape.totals.len()],
        }
    }
}

/// Folds raw sample values into per sub-key rollup rows; the in-process counterpart of the SQL
/// `GROUP BY` aggregation.
#[derive(Debug, Clone)]
pub struct RollupAccumulator {
    kind: MetricKind,
    groups: BTreeMap<Option<String>, GroupAcc>,
}

impl RollupAccumulator {
    pub fn new(kind: MetricKind) -> Self {
        Self { kind, groups: BTreeMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Adds one sample. Values missing for a column of the kind's shape count as zero.
    pub fn push(&mut self, sub_key: Option<&str>, values: &[f64], totals: &[i64]) {
        let sub_key = if self.kind.has_sub_key() { sub_key.map(str::to_string) } else { None };
        let kind = self.kind;
        let group = self.groups.entry(sub_key).or_insert_with(|| GroupAcc::new(kind));

        group.count += 1;
        for (i, acc) in group.measures.iter_mut().enumerate() {
            let v = values.get(i).copied().unwrap_or_default();
            acc.sum += v;
            acc.min = acc.min.min(v);
            acc.max = acc.max.max(v);
        }
        for (i, total) in group.totals.iter_mut().enumerate() {
            *total += totals.get(i).copied().unwrap_or_default();
        }
    }

    /// Rows ordered by sub-key.
    pub fn finish(self) -> Vec<RollupRow> {
        self.groups
            .into_iter()
            .map(|(sub_key, group)| {
                let count = group.count;
                RollupRow {
                    sub_key,
                    row_count: count,
                    measures: group
                        .measures
                        .into_iter()
                        .map(|m| MeasureStats { avg: m.sum / count as f64, min: m.min, max: m.max })
                        .collect(),
                    totals: group.totals,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_accumulate_single_group() {
        let mut acc = RollupAccumulator::new(MetricKind::CpuUsage);
        assert!(acc.is_empty());
        acc.push(None, &[20.0], &[]);
        acc.push(None, &[40.0], &[]);
        acc.push(None, &[30.0], &[]);

        let rows = acc.finish();
        assert_eq!(
            rows,
            vec![RollupRow {
                sub_key: None,
                row_count: 3,
                measures: vec![MeasureStats { avg: 30.0, min: 20.0, max: 40.0 }],
                totals: vec![],
            }]
        );
    }

    #[test]
    fn test_accumulate_groups_by_sub_key() {
        let mut acc = RollupAccumulator::new(MetricKind::Disk);
        acc.push(Some("sdb"), &[50.0], &[1_000]);
        acc.push(Some("sda"), &[10.0], &[500]);
        acc.push(Some("sda"), &[30.0], &[500]);

        let rows = acc.finish();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sub_key.as_deref(), Some("sda"));
        assert_eq!(rows[0].row_count, 2);
        assert_eq!(rows[0].measures[0], MeasureStats { avg: 20.0, min: 10.0, max: 30.0 });
        assert_eq!(rows[0].totals, vec![1_000]);
        assert_eq!(rows[1].sub_key.as_deref(), Some("sdb"));
        assert_eq!(rows[1].totals, vec![1_000]);
    }

    #[test]
    fn test_sub_key_ignored_for_unkeyed_kinds() {
        let mut acc = RollupAccumulator::new(MetricKind::LoadAverage);
        acc.push(Some("ignored"), &[1.0, 2.0, 3.0], &[]);
        acc.push(None, &[3.0, 4.0, 5.0], &[]);

        let rows = acc.finish();
        let row = assert_some!(rows.first());
        assert_eq!(rows.len(), 1);
        assert_none!(&row.sub_key);
        assert_eq!(
            row.measures,
            vec![
                MeasureStats { avg: 2.0, min: 1.0, max: 3.0 },
                MeasureStats { avg: 3.0, min: 2.0, max: 4.0 },
                MeasureStats { avg: 4.0, min: 3.0, max: 5.0 },
            ]
        );
    }
}
