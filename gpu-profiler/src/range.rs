//! Range stack
//!
//! Tracks open ranges in push order and enforces strict LIFO pops. Sequence
//! ids come from a counter that lives as long as the stack and is never
//! rewound.

use crate::error::ProfilerError;
use gpuprof_shared::types::range::{Range, RangeKind, RangeState, SequenceId};
use tracing::debug;

#[derive(Debug)]
pub struct RangeStack {
    open: Vec<Range>,
    next_sequence_id: SequenceId,
}

impl Default for RangeStack {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(name: &str, kind: RangeKind) -> String {
    format!("{} ({})", name, kind)
}

impl RangeStack {
    pub fn new() -> Self {
        Self {
            open: Vec::new(),
            next_sequence_id: 1,
        }
    }

    /// Open a range on top of the stack with a fresh sequence id
    pub fn push(&mut self, name: &str, kind: RangeKind) -> &mut Range {
        let sequence_id = self.next_sequence_id;
        self.next_sequence_id += 1;

        let depth = self.open.len() + 1;
        debug!("push {} seq={} depth={}", describe(name, kind), sequence_id, depth);

        self.open.push(Range::open(name, kind, sequence_id, depth));
        let last = self.open.len() - 1;
        &mut self.open[last]
    }

    /// Close the innermost range if it matches `(name, kind)`.
    ///
    /// On error the stack is left untouched.
    pub fn pop(&mut self, name: &str, kind: RangeKind) -> Result<Range, ProfilerError> {
        let top = self.open.last().ok_or(ProfilerError::EmptyStack)?;

        if !top.matches(name, kind) {
            return Err(ProfilerError::MismatchedRange {
                expected: describe(&top.name, top.kind),
                found: describe(name, kind),
            });
        }

        let mut range = self.open.pop().ok_or(ProfilerError::EmptyStack)?;
        range.state = RangeState::Closed;
        debug!("pop {} seq={}", describe(name, kind), range.sequence_id);
        Ok(range)
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn top(&self) -> Option<&Range> {
        self.open.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Range> {
        self.open.last_mut()
    }

    /// Open ranges, outermost first
    pub fn open_ranges(&self) -> &[Range] {
        &self.open
    }

    /// Innermost open range of the given kind
    pub fn innermost(&self, kind: RangeKind) -> Option<&Range> {
        self.open.iter().rev().find(|r| r.kind == kind)
    }

    /// Sequence id the next push will receive
    pub fn next_sequence_id(&self) -> SequenceId {
        self.next_sequence_id
    }

    /// Drop every open range, returning them outermost first.
    /// The sequence counter keeps counting.
    pub fn clear(&mut self) -> Vec<Range> {
        std::mem::take(&mut self.open)
    }
}
