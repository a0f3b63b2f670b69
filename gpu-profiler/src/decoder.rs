//! Counter buffer decoding
//!
//! Pass buffers arrive in any order and may be delivered more than once.
//! Values are staged per range until the pass coordinator reports the range
//! complete; only then do they become `CounterSample`s.

use crate::driver::RawCounterBuffer;
use crate::pass::{PassCoordinator, PassStatus};
use gpuprof_shared::types::events::{CounterSample, KernelLaunch};
use gpuprof_shared::types::range::SequenceId;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct StagedRange {
    /// Metric values in first-seen order, summed across buffers
    values: Vec<(String, f64)>,
    kernels: Vec<KernelLaunch>,
}

impl StagedRange {
    fn add(&mut self, metric: &str, value: f64) {
        match self.values.iter_mut().find(|(m, _)| m == metric) {
            Some((_, total)) => *total += value,
            None => self.values.push((metric.to_string(), value)),
        }
    }
}

/// What one `decode` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Buffers whose values were staged
    pub decoded: usize,
    /// Buffers skipped because their id was already decoded
    pub duplicates: usize,
    /// Buffers dropped (unknown range, bad pass index, repeated pass)
    pub discarded: usize,
    /// Ranges whose samples became visible
    pub completed: usize,
}

impl DecodeStats {
    pub fn merge(&mut self, other: DecodeStats) {
        self.decoded += other.decoded;
        self.duplicates += other.duplicates;
        self.discarded += other.discarded;
        self.completed += other.completed;
    }
}

#[derive(Debug, Default)]
pub struct CounterDecoder {
    seen_buffers: HashSet<u64>,
    staged: BTreeMap<SequenceId, StagedRange>,
    samples: Vec<CounterSample>,
    kernels: BTreeMap<SequenceId, Vec<KernelLaunch>>,
}

impl CounterDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage every buffer and publish ranges that became complete
    pub fn decode(
        &mut self,
        buffers: Vec<RawCounterBuffer>,
        coordinator: &mut PassCoordinator,
    ) -> DecodeStats {
        let mut stats = DecodeStats::default();

        for buffer in buffers {
            if !self.seen_buffers.insert(buffer.buffer_id) {
                debug!("Skipping already decoded buffer {}", buffer.buffer_id);
                stats.duplicates += 1;
                continue;
            }

            let sequence_id = buffer.sequence_id;
            let Some(range_name) = coordinator.range_name(sequence_id).map(String::from) else {
                warn!(
                    "Discarding buffer {}: range {} is not waiting for passes",
                    buffer.buffer_id, sequence_id
                );
                stats.discarded += 1;
                continue;
            };

            let status = coordinator.submit_pass(sequence_id, buffer.pass_index);
            if !status.is_accepted() {
                warn!(
                    "Discarding buffer {} for range {} pass {}: {:?}",
                    buffer.buffer_id, sequence_id, buffer.pass_index, status
                );
                stats.discarded += 1;
                continue;
            }

            let staged = self.staged.entry(sequence_id).or_default();
            for (metric, value) in &buffer.values {
                staged.add(metric, *value);
            }
            // Replays re-run the same kernels; keep the first pass only
            if buffer.pass_index == 0 {
                staged.kernels = buffer.kernels;
            }
            stats.decoded += 1;

            if let PassStatus::Pending {
                submitted,
                required,
            } = status
            {
                debug!(
                    "Range {} ({}): {}/{} pass(es) decoded",
                    range_name, sequence_id, submitted, required
                );
            }

            if status.is_complete() {
                self.commit(sequence_id, &range_name);
                stats.completed += 1;
            }
        }

        stats
    }

    fn commit(&mut self, sequence_id: SequenceId, range_name: &str) {
        let Some(staged) = self.staged.remove(&sequence_id) else {
            return;
        };

        debug!(
            "Range {} ({}) complete: {} metric value(s), {} kernel(s)",
            range_name,
            sequence_id,
            staged.values.len(),
            staged.kernels.len()
        );

        self.samples
            .extend(staged.values.into_iter().map(|(metric_name, value)| CounterSample {
                range_name: range_name.to_string(),
                sequence_id,
                metric_name,
                value,
            }));
        if !staged.kernels.is_empty() {
            self.kernels.insert(sequence_id, staged.kernels);
        }
    }

    /// Drop staged values of a range that will never complete
    pub fn discard(&mut self, sequence_id: SequenceId) {
        self.staged.remove(&sequence_id);
    }

    /// Published samples, in completion order
    pub fn samples(&self) -> &[CounterSample] {
        &self.samples
    }

    pub fn samples_for(&self, sequence_id: SequenceId) -> impl Iterator<Item = &CounterSample> {
        self.samples
            .iter()
            .filter(move |s| s.sequence_id == sequence_id)
    }

    /// Kernels of completed ranges
    pub fn kernels(&self) -> &BTreeMap<SequenceId, Vec<KernelLaunch>> {
        &self.kernels
    }

    pub fn staged_ranges(&self) -> usize {
        self.staged.len()
    }

    pub fn clear(&mut self) {
        self.seen_buffers.clear();
        self.staged.clear();
        self.samples.clear();
        self.kernels.clear();
    }
}
