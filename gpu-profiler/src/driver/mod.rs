//! Counter-collection driver capability
//!
//! The engine never talks to hardware directly. Everything device-specific
//! (range profiler sessions, replay, activity buffers) sits behind
//! [`CounterDriver`]. A CUPTI or rocProfiler backend would implement this
//! trait outside the engine; [`SimulatedDriver`] is the in-process device
//! used by tests and the CLI.

pub mod policy;
pub mod simulated;

pub use policy::{CounterBankPolicy, PassPolicy};
pub use simulated::{DriverOp, MetricSource, MetricSpec, SimulatedConfig, SimulatedDriver};

use gpuprof_shared::types::events::{
    KernelLaunch, MemoryEvent, MemoryKind, MemoryOperation, Timestamp,
};
use gpuprof_shared::types::range::SequenceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a driver implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("device {0} is not available")]
    DeviceUnavailable(u32),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("driver is not initialized")]
    NotInitialized,

    #[error("no counter collection is active")]
    NoCollection,

    #[error("unknown range sequence id {0}")]
    UnknownRange(SequenceId),

    #[error("{0}")]
    Failure(String),
}

/// Settings handed to [`CounterDriver::initialize`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSettings {
    pub device_index: u32,

    /// Upper bound on profiled ranges per collection (None = unlimited)
    pub max_ranges: Option<usize>,

    /// First nesting level that is profiled (1 = outermost)
    pub min_nesting_level: u32,

    /// Number of nesting levels profiled starting at `min_nesting_level`
    pub nesting_levels: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            device_index: 0,
            max_ranges: None,
            min_nesting_level: 1,
            nesting_levels: 16,
        }
    }
}

/// Identifier of a metric set within one engine lifetime
pub type MetricSetId = u32;

/// The metric set a collection is configured for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSetSpec {
    pub id: MetricSetId,
    pub metrics: Vec<String>,
}

/// Counter values produced by one replay pass of one range
#[derive(Debug, Clone, PartialEq)]
pub struct RawCounterBuffer {
    /// Unique per driver; the decoder skips ids it has already seen
    pub buffer_id: u64,
    pub sequence_id: SequenceId,
    pub pass_index: u32,
    pub values: Vec<(String, f64)>,

    /// Kernels executed during this pass
    pub kernels: Vec<KernelLaunch>,
}

/// Result of a non-blocking buffer poll
#[derive(Debug, Clone, PartialEq)]
pub enum BufferPoll {
    Ready(Vec<RawCounterBuffer>),
    NotReady,
}

/// A memory operation observed by the driver, before range attribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMemoryEvent {
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
    pub name: Option<String>,
    pub source: Option<String>,
}

impl RawMemoryEvent {
    /// Tag the event with the range it is attributed to
    pub fn attribute(self, range_name: &str, sequence_id: SequenceId) -> MemoryEvent {
        MemoryEvent {
            range_name: range_name.to_string(),
            sequence_id,
            operation: self.operation,
            memory_kind: self.memory_kind,
            bytes: self.bytes,
            address: self.address,
            timestamp: self.timestamp,
            correlation_id: self.correlation_id,
            process_id: self.process_id,
            device_id: self.device_id,
            context_id: self.context_id,
            stream_id: self.stream_id,
            is_async: self.is_async,
            name: self.name,
            source: self.source,
        }
    }
}

/// Device-side counter and activity collection.
///
/// Calls arrive from a single instrumentation thread. `pop_range` only
/// marks the boundary; counter buffers for the range show up later through
/// `poll_buffers`, one per replay pass.
pub trait CounterDriver {
    /// Bind to the device and allocate collection buffers
    fn initialize(&mut self, settings: &DriverSettings) -> Result<(), DriverError>;

    /// Release everything acquired by `initialize`
    fn shutdown(&mut self) -> Result<(), DriverError>;

    /// Number of replay passes the given metric combination needs
    fn required_passes(&self, metrics: &[String]) -> Result<u32, DriverError>;

    /// Configure the counter bank for a metric set; returns the pass count
    fn begin_collection(&mut self, spec: &MetricSetSpec) -> Result<u32, DriverError>;

    /// Stop accepting new ranges. Passes already scheduled are still delivered.
    fn end_collection(&mut self) -> Result<(), DriverError>;

    fn push_range(&mut self, sequence_id: SequenceId, name: &str) -> Result<(), DriverError>;

    fn pop_range(&mut self, sequence_id: SequenceId) -> Result<(), DriverError>;

    /// Non-blocking: hand over every buffer that is ready
    fn poll_buffers(&mut self) -> Result<BufferPoll, DriverError>;

    /// Start recording memory activity on behalf of a MEMORY range
    fn begin_memory_watch(&mut self, sequence_id: SequenceId) -> Result<(), DriverError>;

    /// Stop watching for `sequence_id` and return events not yet drained
    fn end_memory_watch(&mut self, sequence_id: SequenceId)
        -> Result<Vec<RawMemoryEvent>, DriverError>;

    /// Return events recorded since the last drain without ending any watch
    fn drain_memory_events(&mut self) -> Result<Vec<RawMemoryEvent>, DriverError>;
}

/// Adapts a driver's pass query to the [`PassPolicy`] seam
pub struct DriverPassPolicy<'a, D: ?Sized>(pub &'a D);

impl<D: CounterDriver + ?Sized> PassPolicy for DriverPassPolicy<'_, D> {
    fn required_passes(&self, metrics: &[String]) -> Result<u32, DriverError> {
        self.0.required_passes(metrics)
    }
}
