//! Aggregated profile data structures
//!
//! These types are derived from recorded samples on demand and are what
//! reports, snapshots and diffs are built from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::events::{KernelLaunch, MemoryEvent, MemoryOperationKind};
use super::range::{InvalidCode, RangeKind, SequenceId};

/// How repeated samples of the same range and metric are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReductionMode {
    #[default]
    Sum,
    Max,
    Mean,
}

impl ReductionMode {
    pub fn code(self) -> i32 {
        match self {
            ReductionMode::Sum => 0,
            ReductionMode::Max => 1,
            ReductionMode::Mean => 2,
        }
    }

    /// Lenient conversion: unknown codes fall back to `Sum`.
    pub fn from_code(code: i64) -> Self {
        Self::try_from(code).unwrap_or(ReductionMode::Sum)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReductionMode::Sum => "SUM",
            ReductionMode::Max => "MAX",
            ReductionMode::Mean => "MEAN",
        }
    }
}

impl TryFrom<i64> for ReductionMode {
    type Error = InvalidCode;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ReductionMode::Sum),
            1 => Ok(ReductionMode::Max),
            2 => Ok(ReductionMode::Mean),
            _ => Err(InvalidCode {
                kind: "reduction",
                code,
            }),
        }
    }
}

/// Lenient parse: unknown names fall back to `Sum`.
impl FromStr for ReductionMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "MAX" => ReductionMode::Max,
            "MEAN" => ReductionMode::Mean,
            _ => ReductionMode::Sum,
        })
    }
}

impl fmt::Display for ReductionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reduced (range, metric) value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub range_name: String,
    pub metric_name: String,

    /// `None` when there were no samples to reduce
    pub reduced_value: Option<f64>,

    pub sample_count: u64,
}

impl AggregatedResult {
    /// Result for a (range, metric) pair that has no samples
    pub fn empty(range_name: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            range_name: range_name.into(),
            metric_name: metric_name.into(),
            reduced_value: None,
            sample_count: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.reduced_value.is_some()
    }
}

/// Distinct kernel launch configuration seen inside a range, with its count.
/// `launch.duration_ns` is the total over all `count` launches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSummary {
    pub launch: KernelLaunch,
    pub count: u64,
}

/// Everything known about one range name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSummary {
    pub name: String,
    pub kind: RangeKind,

    /// Closed instances
    pub instances: u64,

    /// Instances that were pushed but never popped
    pub open_instances: u64,

    /// Closed kernel instances still waiting for replay passes
    pub pending_instances: u64,

    pub kernels: Vec<KernelSummary>,
    pub metrics: Vec<AggregatedResult>,
}

impl RangeSummary {
    pub fn new(name: impl Into<String>, kind: RangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            instances: 0,
            open_instances: 0,
            pending_instances: 0,
            kernels: Vec::new(),
            metrics: Vec::new(),
        }
    }

    /// An open or pass-pending instance means the numbers are partial
    pub fn is_incomplete(&self) -> bool {
        self.open_instances > 0 || self.pending_instances > 0
    }

    pub fn metric(&self, metric_name: &str) -> Option<&AggregatedResult> {
        self.metrics.iter().find(|m| m.metric_name == metric_name)
    }
}

/// Aggregated view over all ranges under one reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeReport {
    pub reduction: ReductionMode,
    pub all_passes_submitted: bool,

    /// Ordered by first appearance of the range name
    pub ranges: Vec<RangeSummary>,
}

impl RangeReport {
    pub fn new(reduction: ReductionMode) -> Self {
        Self {
            reduction,
            all_passes_submitted: true,
            ranges: Vec::new(),
        }
    }

    pub fn range(&self, name: &str) -> Option<&RangeSummary> {
        self.ranges.iter().find(|r| r.name == name)
    }

    pub fn metric(&self, range_name: &str, metric_name: &str) -> Option<&AggregatedResult> {
        self.range(range_name).and_then(|r| r.metric(metric_name))
    }

    /// Every aggregated value in the report
    pub fn results(&self) -> impl Iterator<Item = &AggregatedResult> {
        self.ranges.iter().flat_map(|r| r.metrics.iter())
    }
}

/// Memory activity of one MEMORY range instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRangeRecord {
    pub name: String,
    pub sequence_id: SequenceId,
    pub operation_counts: BTreeMap<MemoryOperationKind, u64>,
    pub total_bytes: u64,
    pub events: Vec<MemoryEvent>,
}

impl MemoryRangeRecord {
    /// Build a record, computing per-kind counts and total bytes
    pub fn from_events(name: impl Into<String>, sequence_id: SequenceId, events: Vec<MemoryEvent>) -> Self {
        let mut operation_counts = BTreeMap::new();
        let mut total_bytes = 0u64;
        for event in &events {
            *operation_counts.entry(event.operation.kind()).or_insert(0) += 1;
            total_bytes = total_bytes.saturating_add(event.bytes);
        }
        Self {
            name: name.into(),
            sequence_id,
            operation_counts,
            total_bytes,
            events,
        }
    }

    pub fn count(&self, kind: MemoryOperationKind) -> u64 {
        self.operation_counts.get(&kind).copied().unwrap_or(0)
    }
}
