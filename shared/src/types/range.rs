//! Profiling range definitions
//!
//! A range brackets a unit of GPU work (kernel launches) or memory activity.
//! Ranges are identified by a name that may repeat and by a sequence id that
//! never does.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Process-unique, monotonically increasing range instance id
pub type SequenceId = u64;

/// Error for strict integer conversions of the wire-level enum codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid {kind} code: {code}")]
pub struct InvalidCode {
    pub kind: &'static str,
    pub code: i64,
}

/// What a range measures
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeKind {
    /// Kernel work measured with hardware counters
    #[default]
    ConcurrentKernel,
    /// Allocation / release / copy activity
    Memory,
}

impl RangeKind {
    /// Integer code used by foreign callers
    pub fn code(self) -> i32 {
        match self {
            RangeKind::ConcurrentKernel => 0,
            RangeKind::Memory => 1,
        }
    }

    /// Lenient conversion: unknown codes fall back to `ConcurrentKernel`.
    pub fn from_code(code: i64) -> Self {
        Self::try_from(code).unwrap_or(RangeKind::ConcurrentKernel)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RangeKind::ConcurrentKernel => "CONCURRENT_KERNEL",
            RangeKind::Memory => "MEMORY",
        }
    }
}

impl TryFrom<i64> for RangeKind {
    type Error = InvalidCode;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RangeKind::ConcurrentKernel),
            1 => Ok(RangeKind::Memory),
            _ => Err(InvalidCode {
                kind: "range kind",
                code,
            }),
        }
    }
}

/// Lenient parse: unknown names fall back to `ConcurrentKernel`.
impl FromStr for RangeKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Ok(match normalized.as_str() {
            "MEMORY" | "MEM" => RangeKind::Memory,
            _ => RangeKind::ConcurrentKernel,
        })
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a range instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeState {
    Open,
    Closed,
}

/// One pushed range instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub name: String,
    pub kind: RangeKind,
    pub sequence_id: SequenceId,
    pub state: RangeState,

    /// Nesting level, 1 for a range pushed onto an empty stack
    pub depth: usize,

    /// Whether hardware counters are gathered for this instance
    pub collecting: bool,
}

impl Range {
    /// Create a new open range
    pub fn open(name: impl Into<String>, kind: RangeKind, sequence_id: SequenceId, depth: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            sequence_id,
            state: RangeState::Open,
            depth,
            collecting: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == RangeState::Open
    }

    /// Whether this instance matches a pop request
    pub fn matches(&self, name: &str, kind: RangeKind) -> bool {
        self.name == name && self.kind == kind
    }
}
