//! Deterministic in-process device
//!
//! `SimulatedDriver` behaves like a range-profiler backend with kernel
//! replay: each popped range is replayed once per pass and every pass
//! produces a counter buffer that becomes ready a configurable number of
//! polls later. Metric values are `scale * work`, so tests can predict them.
//!
//! The driver is a cheap cloneable handle. One clone goes into the
//! `Profiler`, another stays with the workload to launch kernels and issue
//! memory operations.

use super::policy::{CounterBankPolicy, PassPolicy};
use super::{
    BufferPoll, CounterDriver, DriverError, DriverSettings, MetricSetSpec, RawCounterBuffer,
    RawMemoryEvent,
};
use gpuprof_shared::types::events::{
    CopyDirection, Dim3, KernelLaunch, MemoryKind, MemoryOperation, Timestamp,
};
use gpuprof_shared::types::range::SequenceId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// What a simulated metric counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// Threads launched
    #[default]
    Threads,
    /// Kernel duration in nanoseconds
    Duration,
    /// Kernel launches
    Launches,
}

/// Catalog entry for one simulated metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub bank: String,
    #[serde(default)]
    pub source: MetricSource,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// Device description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    pub device_count: u32,

    /// Polls before the first pass buffer of a popped range is ready.
    /// Pass `i` becomes ready `i` polls after pass 0.
    pub buffer_latency_polls: u32,

    /// Physical counters per bank per pass
    pub bank_capacity: usize,

    /// Base for the device clock (ns)
    pub clock_origin_ns: Timestamp,

    pub process_id: u32,

    /// Keep delivered buffers so `redeliver_all` can hand them out again.
    /// Off by default; the history grows with every pass.
    pub record_deliveries: bool,

    pub metrics: BTreeMap<String, MetricSpec>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        let mut metrics = BTreeMap::new();
        let mut add = |name: &str, bank: &str, source: MetricSource, scale: f64| {
            metrics.insert(
                name.to_string(),
                MetricSpec {
                    bank: bank.to_string(),
                    source,
                    scale,
                },
            );
        };
        add("gpu__time_duration.sum", "gpu", MetricSource::Duration, 1.0);
        add("sm__cycles_elapsed.avg", "sm", MetricSource::Duration, 1.5);
        add("sm__inst_executed.sum", "sm", MetricSource::Threads, 4.0);
        add("smsp__warps_launched.sum", "smsp", MetricSource::Threads, 1.0 / 32.0);
        add("dram__bytes_read.sum", "dram", MetricSource::Threads, 16.0);
        add("dram__bytes_write.sum", "dram", MetricSource::Threads, 8.0);
        add("l1tex__t_bytes.sum", "l1tex", MetricSource::Threads, 32.0);
        add("lts__t_sectors.sum", "lts", MetricSource::Threads, 2.0);
        add("launch__grid_count.sum", "launch", MetricSource::Launches, 1.0);

        Self {
            device_count: 1,
            buffer_latency_polls: 1,
            bank_capacity: 1,
            clock_origin_ns: 0,
            process_id: std::process::id(),
            record_deliveries: false,
            metrics,
        }
    }
}

impl SimulatedConfig {
    pub fn policy(&self) -> CounterBankPolicy {
        let mut policy = CounterBankPolicy::new(self.bank_capacity);
        for (name, spec) in &self.metrics {
            policy.add_metric(name.clone(), spec.bank.clone());
        }
        policy
    }
}

/// Driver entry points that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DriverOp {
    Initialize,
    BeginCollection,
    PushRange,
    PopRange,
    PollBuffers,
    BeginMemoryWatch,
    EndMemoryWatch,
}

#[derive(Debug)]
struct OpenKernelRange {
    sequence_id: SequenceId,
    kernels: Vec<KernelLaunch>,
}

#[derive(Debug)]
struct ScheduledBuffer {
    polls_left: u32,
    buffer: RawCounterBuffer,
}

struct MemoryOp {
    operation: MemoryOperation,
    memory_kind: MemoryKind,
    bytes: u64,
    address: u64,
    stream_id: u32,
    is_async: bool,
    source: &'static str,
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
    bytes: u64,
    kind: MemoryKind,
}

#[derive(Debug)]
struct DeviceState {
    config: SimulatedConfig,
    policy: CounterBankPolicy,
    settings: Option<DriverSettings>,

    /// Metric groups per pass for the active collection
    collection: Option<(MetricSetSpec, Vec<Vec<String>>)>,
    open_ranges: Vec<OpenKernelRange>,
    scheduled: Vec<ScheduledBuffer>,
    delivered: Vec<RawCounterBuffer>,
    next_buffer_id: u64,

    watches: BTreeSet<SequenceId>,
    memory_events: VecDeque<RawMemoryEvent>,
    allocations: HashMap<u64, Allocation>,
    next_address: u64,
    next_correlation_id: u32,

    clock: Timestamp,
    failures: BTreeSet<DriverOp>,
    kernel_launches: u64,
    polls: u64,
}

impl DeviceState {
    fn new(config: SimulatedConfig) -> Self {
        Self {
            policy: config.policy(),
            clock: config.clock_origin_ns,
            config,
            settings: None,
            collection: None,
            open_ranges: Vec::new(),
            scheduled: Vec::new(),
            delivered: Vec::new(),
            next_buffer_id: 1,
            watches: BTreeSet::new(),
            memory_events: VecDeque::new(),
            allocations: HashMap::new(),
            next_address: 0x7000_0000_0000,
            next_correlation_id: 1,
            failures: BTreeSet::new(),
            kernel_launches: 0,
            polls: 0,
        }
    }

    fn check(&mut self, op: DriverOp) -> Result<(), DriverError> {
        if self.failures.remove(&op) {
            return Err(DriverError::Failure(format!("injected failure in {:?}", op)));
        }
        if op != DriverOp::Initialize {
            self.ensure_initialized()?;
        }
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), DriverError> {
        if self.settings.is_none() {
            return Err(DriverError::NotInitialized);
        }
        Ok(())
    }

    fn device_id(&self) -> u32 {
        self.settings.as_ref().map_or(0, |s| s.device_index)
    }

    fn tick(&mut self, ns: u64) -> Timestamp {
        let now = self.clock;
        self.clock = self.clock.saturating_add(ns.max(1));
        now
    }

    fn record_memory(&mut self, op: MemoryOp) {
        let timestamp = self.tick(op.bytes / 64 + 1);
        let correlation_id = self.next_correlation_id;
        self.next_correlation_id = self.next_correlation_id.wrapping_add(1);

        // Only observed while some MEMORY range is watching
        if self.watches.is_empty() {
            return;
        }

        let event = RawMemoryEvent {
            operation: op.operation,
            memory_kind: op.memory_kind,
            bytes: op.bytes,
            address: op.address,
            timestamp,
            correlation_id,
            process_id: self.config.process_id,
            device_id: self.device_id(),
            context_id: 1,
            stream_id: op.stream_id,
            is_async: op.is_async,
            name: None,
            source: Some(op.source.to_string()),
        };
        self.memory_events.push_back(event);
    }

    fn metric_value(&self, metric: &str, kernels: &[KernelLaunch]) -> f64 {
        let Some(spec) = self.config.metrics.get(metric) else {
            return 0.0;
        };
        let work: f64 = match spec.source {
            MetricSource::Threads => kernels.iter().map(|k| k.thread_count() as f64).sum(),
            MetricSource::Duration => kernels.iter().map(|k| k.duration_ns as f64).sum(),
            MetricSource::Launches => kernels.len() as f64,
        };
        spec.scale * work
    }
}

/// Cloneable handle to a simulated device
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    state: Arc<Mutex<DeviceState>>,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl SimulatedDriver {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::new(config))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next call to `op` fail
    pub fn fail_next(&self, op: DriverOp) {
        self.lock().failures.insert(op);
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().settings.is_some()
    }

    pub fn is_collecting(&self) -> bool {
        self.lock().collection.is_some()
    }

    /// Pass buffers scheduled but not yet handed out
    pub fn pending_buffers(&self) -> usize {
        self.lock().scheduled.len()
    }

    pub fn kernel_launches(&self) -> u64 {
        self.lock().kernel_launches
    }

    /// Calls to `poll_buffers` since creation or the last shutdown
    pub fn poll_count(&self) -> u64 {
        self.lock().polls
    }

    /// Queue every buffer delivered so far for delivery again. Needs
    /// `record_deliveries`; without it nothing is queued.
    pub fn redeliver_all(&self) {
        let mut state = self.lock();
        let again: Vec<ScheduledBuffer> = state
            .delivered
            .iter()
            .cloned()
            .map(|buffer| ScheduledBuffer {
                polls_left: 0,
                buffer,
            })
            .collect();
        state.scheduled.extend(again);
    }

    /// Launch a kernel; it counts toward every open range
    pub fn launch_kernel(&self, name: &str, grid: Dim3, block: Dim3, duration_ns: u64) -> KernelLaunch {
        self.launch_kernel_on(name, grid, block, 0, duration_ns)
    }

    pub fn launch_kernel_on(
        &self,
        name: &str,
        grid: Dim3,
        block: Dim3,
        stream_id: u32,
        duration_ns: u64,
    ) -> KernelLaunch {
        let mut state = self.lock();
        state.tick(duration_ns);
        state.kernel_launches += 1;

        let launch = KernelLaunch {
            name: name.to_string(),
            grid,
            block,
            stream_id,
            duration_ns,
        };
        for range in state.open_ranges.iter_mut() {
            range.kernels.push(launch.clone());
        }
        launch
    }

    /// Allocate device-visible memory and return its address
    pub fn malloc(&self, bytes: u64, kind: MemoryKind) -> u64 {
        let mut state = self.lock();
        let address = state.next_address;
        // Keep allocations 256-byte aligned
        state.next_address += (bytes.max(1) + 255) & !255;
        state.allocations.insert(address, Allocation { bytes, kind });
        let source = match kind {
            MemoryKind::Pinned => "cudaMallocHost",
            MemoryKind::Managed => "cudaMallocManaged",
            _ => "cudaMalloc",
        };
        state.record_memory(MemoryOp {
            operation: MemoryOperation::Allocation,
            memory_kind: kind,
            bytes,
            address,
            stream_id: 0,
            is_async: false,
            source,
        });
        address
    }

    /// Release an allocation. Unknown addresses are ignored and reported as `false`.
    pub fn free(&self, address: u64) -> bool {
        let mut state = self.lock();
        let Some(allocation) = state.allocations.remove(&address) else {
            return false;
        };
        state.record_memory(MemoryOp {
            operation: MemoryOperation::Release,
            memory_kind: allocation.kind,
            bytes: allocation.bytes,
            address,
            stream_id: 0,
            is_async: false,
            source: "cudaFree",
        });
        true
    }

    pub fn memcpy(&self, direction: CopyDirection, address: u64, bytes: u64, stream_id: u32, is_async: bool) {
        let mut state = self.lock();
        let kind = state
            .allocations
            .get(&address)
            .map_or(MemoryKind::Pageable, |a| a.kind);
        let source = if is_async { "cudaMemcpyAsync" } else { "cudaMemcpy" };
        state.record_memory(MemoryOp {
            operation: MemoryOperation::Copy(direction),
            memory_kind: kind,
            bytes,
            address,
            stream_id,
            is_async,
            source,
        });
    }

    pub fn memset(&self, address: u64, bytes: u64) {
        let mut state = self.lock();
        let kind = state
            .allocations
            .get(&address)
            .map_or(MemoryKind::Device, |a| a.kind);
        state.record_memory(MemoryOp {
            operation: MemoryOperation::Set,
            memory_kind: kind,
            bytes,
            address,
            stream_id: 0,
            is_async: false,
            source: "cudaMemset",
        });
    }
}

impl CounterDriver for SimulatedDriver {
    fn initialize(&mut self, settings: &DriverSettings) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check(DriverOp::Initialize)?;
        if settings.device_index >= state.config.device_count {
            return Err(DriverError::DeviceUnavailable(settings.device_index));
        }
        debug!("Simulated device {} initialized", settings.device_index);
        state.settings = Some(settings.clone());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), DriverError> {
        let mut state = self.lock();
        let config = state.config.clone();
        // Allocations outlive profiling sessions
        let allocations = std::mem::take(&mut state.allocations);
        let next_address = state.next_address;
        let clock = state.clock;
        *state = DeviceState::new(config);
        state.allocations = allocations;
        state.next_address = next_address;
        state.clock = clock;
        Ok(())
    }

    fn required_passes(&self, metrics: &[String]) -> Result<u32, DriverError> {
        self.lock().policy.required_passes(metrics)
    }

    fn begin_collection(&mut self, spec: &MetricSetSpec) -> Result<u32, DriverError> {
        let mut state = self.lock();
        state.check(DriverOp::BeginCollection)?;
        let groups = state.policy.group(&spec.metrics)?;
        let passes = groups.len() as u32;
        debug!(
            "Collection for metric set {} configured: {} metric(s), {} pass(es)",
            spec.id,
            spec.metrics.len(),
            passes
        );
        state.collection = Some((spec.clone(), groups));
        Ok(passes)
    }

    fn end_collection(&mut self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.ensure_initialized()?;
        state.collection = None;
        state.open_ranges.clear();
        Ok(())
    }

    fn push_range(&mut self, sequence_id: SequenceId, _name: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check(DriverOp::PushRange)?;
        if state.collection.is_none() {
            return Err(DriverError::NoCollection);
        }
        state.open_ranges.push(OpenKernelRange {
            sequence_id,
            kernels: Vec::new(),
        });
        Ok(())
    }

    fn pop_range(&mut self, sequence_id: SequenceId) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check(DriverOp::PopRange)?;

        let index = state
            .open_ranges
            .iter()
            .rposition(|r| r.sequence_id == sequence_id)
            .ok_or(DriverError::UnknownRange(sequence_id))?;
        let range = state.open_ranges.remove(index);

        let groups = match &state.collection {
            Some((_, groups)) => groups.clone(),
            None => return Err(DriverError::NoCollection),
        };

        let latency = state.config.buffer_latency_polls;
        for (pass_index, metrics) in groups.iter().enumerate() {
            let values: Vec<(String, f64)> = metrics
                .iter()
                .map(|m| (m.clone(), state.metric_value(m, &range.kernels)))
                .collect();
            let buffer_id = state.next_buffer_id;
            state.next_buffer_id += 1;
            state.scheduled.push(ScheduledBuffer {
                polls_left: latency + pass_index as u32,
                buffer: RawCounterBuffer {
                    buffer_id,
                    sequence_id,
                    pass_index: pass_index as u32,
                    values,
                    kernels: range.kernels.clone(),
                },
            });
        }
        debug!(
            "Range {} scheduled for {} replay pass(es)",
            sequence_id,
            groups.len()
        );
        Ok(())
    }

    fn poll_buffers(&mut self) -> Result<BufferPoll, DriverError> {
        let mut state = self.lock();
        state.check(DriverOp::PollBuffers)?;
        state.polls += 1;

        let mut ready = Vec::new();
        let mut waiting = Vec::new();
        for mut scheduled in std::mem::take(&mut state.scheduled) {
            if scheduled.polls_left == 0 {
                ready.push(scheduled.buffer);
            } else {
                scheduled.polls_left -= 1;
                waiting.push(scheduled);
            }
        }
        state.scheduled = waiting;

        if ready.is_empty() {
            return Ok(BufferPoll::NotReady);
        }
        if state.config.record_deliveries {
            state.delivered.extend(ready.iter().cloned());
        }
        Ok(BufferPoll::Ready(ready))
    }

    fn begin_memory_watch(&mut self, sequence_id: SequenceId) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check(DriverOp::BeginMemoryWatch)?;
        state.watches.insert(sequence_id);
        Ok(())
    }

    fn end_memory_watch(&mut self, sequence_id: SequenceId) -> Result<Vec<RawMemoryEvent>, DriverError> {
        let mut state = self.lock();
        state.check(DriverOp::EndMemoryWatch)?;
        state.watches.remove(&sequence_id);
        Ok(state.memory_events.drain(..).collect())
    }

    fn drain_memory_events(&mut self) -> Result<Vec<RawMemoryEvent>, DriverError> {
        let mut state = self.lock();
        state.ensure_initialized()?;
        Ok(state.memory_events.drain(..).collect())
    }
}
