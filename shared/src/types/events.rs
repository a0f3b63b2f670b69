//! Event type definitions for profiling data
//!
//! These types represent what the engine records for a range instance:
//! decoded counter values, the kernels launched inside it and the memory
//! operations observed while it was open.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::range::SequenceId;

/// Timestamp in nanoseconds
pub type Timestamp = u64;

/// Launch configuration triple (x, y, z)
pub type Dim3 = (u32, u32, u32);

/// A decoded hardware-counter value for one range instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSample {
    pub range_name: String,
    pub sequence_id: SequenceId,
    pub metric_name: String,
    pub value: f64,
}

/// A kernel launched inside a CONCURRENT_KERNEL range
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelLaunch {
    pub name: String,
    pub grid: Dim3,
    pub block: Dim3,
    pub stream_id: u32,
    pub duration_ns: u64,
}

impl KernelLaunch {
    /// `name<<<{gx, gy, gz}, {bx, by, bz}>>>`
    pub fn signature(&self) -> String {
        format!(
            "{}<<<{{{}, {}, {}}}, {{{}, {}, {}}}>>>",
            self.name,
            self.grid.0,
            self.grid.1,
            self.grid.2,
            self.block.0,
            self.block.1,
            self.block.2
        )
    }

    /// Total number of threads in the launch
    pub fn thread_count(&self) -> u64 {
        let (gx, gy, gz) = self.grid;
        let (bx, by, bz) = self.block;
        [gx, gy, gz, bx, by, bz]
            .iter()
            .map(|&d| d as u64)
            .product()
    }
}

/// Direction of a memory copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CopyDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
    HostToHost,
    PeerToPeer,
}

impl fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CopyDirection::HostToDevice => "HtoD",
            CopyDirection::DeviceToHost => "DtoH",
            CopyDirection::DeviceToDevice => "DtoD",
            CopyDirection::HostToHost => "HtoH",
            CopyDirection::PeerToPeer => "PtoP",
        };
        f.write_str(s)
    }
}

/// A single memory operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryOperation {
    Allocation,
    Release,
    Copy(CopyDirection),
    Set,
}

impl MemoryOperation {
    pub fn kind(&self) -> MemoryOperationKind {
        match self {
            MemoryOperation::Allocation => MemoryOperationKind::Allocation,
            MemoryOperation::Release => MemoryOperationKind::Release,
            MemoryOperation::Copy(_) => MemoryOperationKind::Copy,
            MemoryOperation::Set => MemoryOperationKind::Set,
        }
    }
}

impl fmt::Display for MemoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryOperation::Copy(direction) => write!(f, "COPY({})", direction),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Operation category used for per-range counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryOperationKind {
    Allocation,
    Release,
    Copy,
    Set,
}

impl fmt::Display for MemoryOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryOperationKind::Allocation => "ALLOCATION",
            MemoryOperationKind::Release => "RELEASE",
            MemoryOperationKind::Copy => "COPY",
            MemoryOperationKind::Set => "SET",
        };
        f.write_str(s)
    }
}

/// Where the memory lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryKind {
    #[default]
    Unknown,
    Pageable,
    Pinned,
    Device,
    Array,
    Managed,
}

impl MemoryKind {
    /// Activity-API compatible integer code
    pub fn code(self) -> i32 {
        match self {
            MemoryKind::Unknown => 0,
            MemoryKind::Pageable => 1,
            MemoryKind::Pinned => 2,
            MemoryKind::Device => 3,
            MemoryKind::Array => 4,
            MemoryKind::Managed => 5,
        }
    }
}

/// A memory operation attributed to an open MEMORY range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub range_name: String,
    pub sequence_id: SequenceId,
    pub operation: MemoryOperation,
    pub memory_kind: MemoryKind,
    pub bytes: u64,
    pub address: u64,
    pub timestamp: Timestamp,
    pub correlation_id: u32,
    pub process_id: u32,
    pub device_id: u32,
    pub context_id: u32,
    pub stream_id: u32,
    pub is_async: bool,

    /// Allocation name, if the runtime provided one
    #[serde(default)]
    pub name: Option<String>,

    /// Originating API or call site
    #[serde(default)]
    pub source: Option<String>,
}
