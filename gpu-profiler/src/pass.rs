//! Replay-pass bookkeeping
//!
//! A metric set needs `required_passes` replays of every kernel range
//! attributed to it before its counter values mean anything. The
//! coordinator keeps one ledger entry per such range and only reports a
//! range complete once every pass index has been seen.

use crate::driver::{MetricSetId, MetricSetSpec, PassPolicy};
use crate::error::ProfilerError;
use gpuprof_shared::types::range::SequenceId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Passes recorded for one kernel range
#[derive(Debug, Clone)]
struct PassLedger {
    range_name: String,
    passes: BTreeSet<u32>,
}

/// Metrics collected together, and the ranges still waiting on replays
#[derive(Debug, Clone)]
pub struct MetricSet {
    pub id: MetricSetId,
    metric_names: Vec<String>,
    required_passes: u32,
    pending: BTreeMap<SequenceId, PassLedger>,

    /// Ranges attributed over the set's lifetime
    attributed: u64,
}

impl MetricSet {
    fn new(id: MetricSetId) -> Self {
        Self {
            id,
            metric_names: Vec::new(),
            required_passes: 0,
            pending: BTreeMap::new(),
            attributed: 0,
        }
    }

    pub fn metric_names(&self) -> &[String] {
        &self.metric_names
    }

    pub fn required_passes(&self) -> u32 {
        self.required_passes
    }

    /// Passes submitted for every range of the set so far
    pub fn submitted_passes(&self) -> u32 {
        self.pending
            .values()
            .map(|l| l.passes.len() as u32)
            .min()
            .unwrap_or(self.required_passes)
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Ranges with passes outstanding (open ranges included)
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn has_been_used(&self) -> bool {
        self.attributed > 0
    }

    pub fn spec(&self) -> MetricSetSpec {
        MetricSetSpec {
            id: self.id,
            metrics: self.metric_names.clone(),
        }
    }
}

/// Outcome of recording one pass buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// No pending range with that sequence id
    Unknown,
    /// Pass index outside `0..required_passes`
    OutOfRange,
    /// That pass was already recorded
    Duplicate,
    /// Recorded; more passes to come
    Pending { submitted: u32, required: u32 },
    /// Recorded; the range has every pass
    Complete,
}

impl PassStatus {
    pub fn is_accepted(self) -> bool {
        matches!(self, PassStatus::Pending { .. } | PassStatus::Complete)
    }

    pub fn is_complete(self) -> bool {
        self == PassStatus::Complete
    }
}

/// Tracks metric sets and per-range pass submissions
#[derive(Debug)]
pub struct PassCoordinator {
    /// Every set since the last reset; the last one is current
    sets: Vec<MetricSet>,
    next_id: MetricSetId,
}

impl Default for PassCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PassCoordinator {
    pub fn new() -> Self {
        Self {
            sets: vec![MetricSet::new(0)],
            next_id: 1,
        }
    }

    pub fn current(&self) -> &MetricSet {
        // `sets` is never empty
        &self.sets[self.sets.len() - 1]
    }

    fn current_mut(&mut self) -> &mut MetricSet {
        let last = self.sets.len() - 1;
        &mut self.sets[last]
    }

    pub fn metric_sets(&self) -> &[MetricSet] {
        &self.sets
    }

    /// Add a metric to the current set.
    ///
    /// Returns `true` when the current set changed. A set that has already
    /// been used and has drained completely is kept as history; the new
    /// metric and the old set's metrics form a new set.
    pub fn register_metric(
        &mut self,
        name: &str,
        policy: &dyn PassPolicy,
    ) -> Result<bool, ProfilerError> {
        let current = self.current();

        let outstanding = current.outstanding();
        if outstanding > 0 {
            return Err(ProfilerError::MetricSetConflict { outstanding });
        }

        if current.metric_names.iter().any(|m| m == name) {
            return Ok(false);
        }

        let fresh_set = current.has_been_used();
        let mut names = current.metric_names.clone();
        names.push(name.to_string());
        let required = policy.required_passes(&names)?;

        if fresh_set {
            let id = self.next_id;
            self.next_id += 1;
            self.sets.push(MetricSet::new(id));
            debug!("Starting metric set {}", id);
        }

        let set = self.current_mut();
        set.metric_names = names;
        set.required_passes = required;
        debug!(
            "Metric set {}: {} metric(s), {} pass(es)",
            set.id,
            set.metric_names.len(),
            set.required_passes
        );
        Ok(true)
    }

    /// Replace the pass count of the current set with the driver's answer
    pub fn confirm_passes(&mut self, id: MetricSetId, passes: u32) {
        let set = self.current_mut();
        if set.id == id && set.required_passes != passes {
            warn!(
                "Driver configured {} pass(es) for metric set {}, policy predicted {}",
                passes, id, set.required_passes
            );
            set.required_passes = passes;
        }
    }

    /// Attribute a collecting kernel range to the current set
    pub fn begin_range(&mut self, sequence_id: SequenceId, range_name: &str) -> MetricSetId {
        let set = self.current_mut();
        set.attributed += 1;
        set.pending.insert(
            sequence_id,
            PassLedger {
                range_name: range_name.to_string(),
                passes: BTreeSet::new(),
            },
        );
        set.id
    }

    fn set_of(&self, sequence_id: SequenceId) -> Option<&MetricSet> {
        self.sets
            .iter()
            .rev()
            .find(|s| s.pending.contains_key(&sequence_id))
    }

    fn set_of_mut(&mut self, sequence_id: SequenceId) -> Option<&mut MetricSet> {
        self.sets
            .iter_mut()
            .rev()
            .find(|s| s.pending.contains_key(&sequence_id))
    }

    /// Name of a range still waiting on passes
    pub fn range_name(&self, sequence_id: SequenceId) -> Option<&str> {
        self.set_of(sequence_id)
            .and_then(|s| s.pending.get(&sequence_id))
            .map(|l| l.range_name.as_str())
    }

    pub fn is_pending(&self, sequence_id: SequenceId) -> bool {
        self.set_of(sequence_id).is_some()
    }

    /// Record pass `pass_index` of a range
    pub fn submit_pass(&mut self, sequence_id: SequenceId, pass_index: u32) -> PassStatus {
        let Some(set) = self.set_of_mut(sequence_id) else {
            return PassStatus::Unknown;
        };
        let required = set.required_passes;
        if pass_index >= required {
            return PassStatus::OutOfRange;
        }

        let Some(ledger) = set.pending.get_mut(&sequence_id) else {
            return PassStatus::Unknown;
        };
        if !ledger.passes.insert(pass_index) {
            return PassStatus::Duplicate;
        }

        let submitted = ledger.passes.len() as u32;
        if submitted < required {
            return PassStatus::Pending {
                submitted,
                required,
            };
        }

        set.pending.remove(&sequence_id);
        debug!("Range {} has all {} pass(es)", sequence_id, required);
        PassStatus::Complete
    }

    /// Forget a range that will never receive passes
    pub fn abandon(&mut self, sequence_id: SequenceId) -> bool {
        match self.set_of_mut(sequence_id) {
            Some(set) => {
                set.pending.remove(&sequence_id);
                true
            }
            None => false,
        }
    }

    /// Every metric set has every pass of every range
    pub fn all_submitted(&self) -> bool {
        self.sets.iter().all(MetricSet::is_complete)
    }

    pub fn outstanding(&self) -> usize {
        self.sets.iter().map(MetricSet::outstanding).sum()
    }

    /// Ranges still waiting on passes, across all sets
    pub fn pending_ranges(&self) -> BTreeSet<SequenceId> {
        self.sets
            .iter()
            .flat_map(|s| s.pending.keys().copied())
            .collect()
    }

    /// Drop all sets and ledgers
    pub fn reset(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        self.sets = vec![MetricSet::new(id)];
    }
}
