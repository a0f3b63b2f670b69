//! Differential profiling types and computation
//!
//! Compares two range reports (baseline vs comparison) and computes
//! per-(range, metric) deltas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::profile::{RangeReport, ReductionMode};

/// Diff of two range reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDiff {
    pub baseline_reduction: ReductionMode,
    pub comparison_reduction: ReductionMode,
    /// Per-metric diffs sorted by |delta| descending; pairs missing data on
    /// either side sort last.
    pub metrics: Vec<MetricDiff>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDiff {
    pub range_name: String,
    pub metric_name: String,
    pub baseline: Option<f64>,
    pub comparison: Option<f64>,
    /// comparison - baseline, when both sides have data
    pub delta: Option<f64>,
    /// delta / baseline * 100 (0.0 if baseline is 0 or missing)
    pub delta_pct: f64,
}

impl ReportDiff {
    /// Whether the two reports were reduced the same way
    pub fn is_comparable(&self) -> bool {
        self.baseline_reduction == self.comparison_reduction
    }
}

/// Compare two reports metric-by-metric.
pub fn diff_reports(baseline: &RangeReport, comparison: &RangeReport) -> ReportDiff {
    let all_keys: BTreeSet<(&str, &str)> = baseline
        .results()
        .chain(comparison.results())
        .map(|r| (r.range_name.as_str(), r.metric_name.as_str()))
        .collect();

    let mut metrics: Vec<MetricDiff> = all_keys
        .into_iter()
        .map(|(range, metric)| {
            let b = baseline.metric(range, metric).and_then(|r| r.reduced_value);
            let c = comparison.metric(range, metric).and_then(|r| r.reduced_value);
            let delta = match (b, c) {
                (Some(b), Some(c)) => Some(c - b),
                _ => None,
            };
            let delta_pct = match (b, delta) {
                (Some(b), Some(d)) if b != 0.0 => d / b * 100.0,
                _ => 0.0,
            };
            MetricDiff {
                range_name: range.to_string(),
                metric_name: metric.to_string(),
                baseline: b,
                comparison: c,
                delta,
                delta_pct,
            }
        })
        .collect();

    metrics.sort_by(|a, b| {
        let ka = a.delta.map(f64::abs).unwrap_or(-1.0);
        let kb = b.delta.map(f64::abs).unwrap_or(-1.0);
        kb.total_cmp(&ka)
    });

    ReportDiff {
        baseline_reduction: baseline.reduction,
        comparison_reduction: comparison.reduction,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::profile::{AggregatedResult, RangeSummary};
    use crate::types::range::RangeKind;

    fn report(values: &[(&str, &str, Option<f64>)]) -> RangeReport {
        let mut report = RangeReport::new(ReductionMode::Sum);
        for (range, metric, value) in values {
            if report.range(range).is_none() {
                report
                    .ranges
                    .push(RangeSummary::new(*range, RangeKind::ConcurrentKernel));
            }
            let summary = report
                .ranges
                .iter_mut()
                .find(|r| r.name == *range)
                .unwrap();
            summary.metrics.push(AggregatedResult {
                range_name: range.to_string(),
                metric_name: metric.to_string(),
                reduced_value: *value,
                sample_count: value.map_or(0, |_| 1),
            });
        }
        report
    }

    #[test]
    fn test_diff_reports_basic() {
        let baseline = report(&[
            ("conv1", "cycles", Some(100.0)),
            ("conv1", "dram_bytes", Some(50.0)),
        ]);
        let comparison = report(&[
            ("conv1", "cycles", Some(70.0)),
            ("conv1", "dram_bytes", Some(60.0)),
        ]);

        let diff = diff_reports(&baseline, &comparison);
        assert!(diff.is_comparable());
        assert_eq!(diff.metrics.len(), 2);

        // Sorted by |delta| descending: cycles (-30) before dram_bytes (+10)
        assert_eq!(diff.metrics[0].metric_name, "cycles");
        assert_eq!(diff.metrics[0].delta, Some(-30.0));
        assert!((diff.metrics[0].delta_pct - (-30.0)).abs() < 0.01);
        assert_eq!(diff.metrics[1].delta, Some(10.0));
        assert!((diff.metrics[1].delta_pct - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_diff_missing_side() {
        let baseline = report(&[("conv1", "cycles", Some(10.0))]);
        let comparison = report(&[
            ("conv1", "cycles", Some(10.0)),
            ("fc", "cycles", Some(5.0)),
        ]);

        let diff = diff_reports(&baseline, &comparison);
        assert_eq!(diff.metrics.len(), 2);

        let fc = diff.metrics.iter().find(|m| m.range_name == "fc").unwrap();
        assert_eq!(fc.baseline, None);
        assert_eq!(fc.comparison, Some(5.0));
        assert_eq!(fc.delta, None);
        assert_eq!(fc.delta_pct, 0.0);

        // Pairs with data on both sides come first
        assert_eq!(diff.metrics[0].range_name, "conv1");
    }
}
