//! Memory activity attribution
//!
//! Events go to the innermost open MEMORY range. With no MEMORY range open
//! they are dropped; there is no global bucket.

use crate::driver::RawMemoryEvent;
use gpuprof_shared::types::events::MemoryEvent;
use gpuprof_shared::types::profile::MemoryRangeRecord;
use gpuprof_shared::types::range::SequenceId;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug)]
struct OpenMemoryRange {
    sequence_id: SequenceId,
    name: String,
    events: Vec<MemoryEvent>,
}

#[derive(Debug, Default)]
pub struct MemoryActivityTracker {
    /// Outermost first
    open: Vec<OpenMemoryRange>,
    records: BTreeMap<SequenceId, MemoryRangeRecord>,
    discarded: u64,
}

impl MemoryActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, sequence_id: SequenceId, name: &str) {
        self.open.push(OpenMemoryRange {
            sequence_id,
            name: name.to_string(),
            events: Vec::new(),
        });
    }

    pub fn has_open_range(&self) -> bool {
        !self.open.is_empty()
    }

    pub fn is_open(&self, sequence_id: SequenceId) -> bool {
        self.open.iter().any(|r| r.sequence_id == sequence_id)
    }

    /// Attribute one event; returns `false` if it was discarded
    pub fn record(&mut self, event: RawMemoryEvent) -> bool {
        match self.open.last_mut() {
            Some(range) => {
                let event = event.attribute(&range.name, range.sequence_id);
                range.events.push(event);
                true
            }
            None => {
                self.discarded += 1;
                false
            }
        }
    }

    pub fn record_all(&mut self, events: impl IntoIterator<Item = RawMemoryEvent>) {
        for event in events {
            self.record(event);
        }
    }

    /// Finalize a range into a record
    pub fn close(&mut self, sequence_id: SequenceId) -> Option<&MemoryRangeRecord> {
        let index = self
            .open
            .iter()
            .rposition(|r| r.sequence_id == sequence_id)?;
        let range = self.open.remove(index);

        let record = MemoryRangeRecord::from_events(range.name, range.sequence_id, range.events);
        debug!(
            "Memory range {} ({}) closed: {} event(s), {} byte(s)",
            record.name,
            sequence_id,
            record.events.len(),
            record.total_bytes
        );
        self.records.insert(sequence_id, record);
        self.records.get(&sequence_id)
    }

    /// Drop open ranges without producing records
    pub fn abandon_open(&mut self) -> usize {
        let dropped = self.open.len();
        self.open.clear();
        dropped
    }

    /// Finalized records ordered by sequence id
    pub fn records(&self) -> impl Iterator<Item = &MemoryRangeRecord> {
        self.records.values()
    }

    pub fn discarded_events(&self) -> u64 {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.open.clear();
        self.records.clear();
        self.discarded = 0;
    }
}
