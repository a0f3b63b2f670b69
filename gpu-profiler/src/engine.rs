//! The profiler handle
//!
//! `Profiler` owns every component and the driver. It is an explicit value
//! rather than a process-wide singleton; callers hold it by `&mut`.

use crate::config::ProfilerConfig;
use crate::decoder::{CounterDecoder, DecodeStats};
use crate::driver::{BufferPoll, CounterDriver, DriverError, DriverPassPolicy, MetricSetId, RawCounterBuffer};
use crate::error::{ProfilerError, ResultCode};
use crate::memory::MemoryActivityTracker;
use crate::pass::PassCoordinator;
use crate::poll::poll_with_backoff;
use crate::range::RangeStack;
use crate::reduction;
use crate::report::{self, ReportSource};
use gpuprof_shared::protocol::snapshot::Snapshot;
use gpuprof_shared::types::events::CounterSample;
use gpuprof_shared::types::profile::{AggregatedResult, MemoryRangeRecord, RangeReport, ReductionMode};
use gpuprof_shared::types::range::{Range, RangeKind, SequenceId};
use std::collections::BTreeSet;
use std::io::{self, Write};
use tracing::{debug, info, warn};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Enabled,
    Disabled,
}

/// Result of one `decode_counter_data` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Decoded(DecodeStats),
    /// Nothing became ready within the bounded wait
    NotReady,
    /// Profiling is disabled or not initialized; nothing was polled
    Disabled,
}

impl DecodeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, DecodeOutcome::Decoded(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveCollection {
    set_id: MetricSetId,
    metric_count: usize,
}

pub struct Profiler<D: CounterDriver> {
    config: ProfilerConfig,
    driver: D,
    state: EngineState,

    ranges: RangeStack,
    passes: PassCoordinator,
    decoder: CounterDecoder,
    memory: MemoryActivityTracker,

    /// Popped ranges in pop order
    closed: Vec<Range>,
    collection: Option<ActiveCollection>,

    /// Kernel ranges profiled since the last reset, for `max_ranges`
    profiled_ranges: usize,
}

impl<D: CounterDriver> Profiler<D> {
    pub fn new(config: ProfilerConfig, driver: D) -> Self {
        Self {
            config,
            driver,
            state: EngineState::Uninitialized,
            ranges: RangeStack::new(),
            passes: PassCoordinator::new(),
            decoder: CounterDecoder::new(),
            memory: MemoryActivityTracker::new(),
            closed: Vec::new(),
            collection: None,
            profiled_ranges: 0,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    // ---- lifecycle ----

    /// Bind to the driver and register the configured metrics. Idempotent.
    pub fn init(&mut self) -> Result<(), ProfilerError> {
        if self.state != EngineState::Uninitialized {
            debug!("Profiler already initialized");
            return Ok(());
        }

        self.config
            .validate()
            .map_err(|e| ProfilerError::Config(format!("{:#}", e)))?;
        self.driver.initialize(&self.config.driver_settings())?;
        self.state = EngineState::Enabled;

        if let Err(e) = self.register_configured_metrics() {
            self.teardown();
            return Err(e);
        }

        info!(
            "Profiler initialized on device {} ({} metric(s), {} pass(es))",
            self.config.device_index,
            self.passes.current().metric_names().len(),
            self.passes.current().required_passes()
        );
        Ok(())
    }

    fn register_configured_metrics(&mut self) -> Result<(), ProfilerError> {
        let metrics = self.config.metrics.clone();
        for metric in &metrics {
            self.add_metrics(metric)?;
        }
        Ok(())
    }

    pub fn enable(&mut self) {
        match self.state {
            EngineState::Uninitialized => warn!("enable() called before init(); ignoring"),
            EngineState::Disabled => {
                self.state = EngineState::Enabled;
                info!("Profiling enabled");
            }
            EngineState::Enabled => {}
        }
    }

    pub fn disable(&mut self) {
        if self.state == EngineState::Enabled {
            self.state = EngineState::Disabled;
            info!("Profiling disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state == EngineState::Enabled
    }

    /// Tear down the driver. Recorded results stay readable.
    pub fn shutdown(&mut self) -> Result<(), ProfilerError> {
        if self.state == EngineState::Uninitialized {
            return Ok(());
        }
        self.clear_all_ranges();
        self.stop_collection();
        self.state = EngineState::Uninitialized;
        self.driver.shutdown()?;
        info!("Profiler shut down");
        Ok(())
    }

    fn teardown(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Driver shutdown failed: {}", e);
        }
    }

    /// Drop samples, metric sets and memory records. Sequence ids keep
    /// counting; configured metrics are registered again.
    pub fn reset(&mut self) {
        self.clear_all_ranges();
        self.stop_collection();
        self.passes.reset();
        self.decoder.clear();
        self.memory.clear();
        self.closed.clear();
        self.profiled_ranges = 0;

        if self.state != EngineState::Uninitialized {
            if let Err(e) = self.register_configured_metrics() {
                warn!("Re-registering configured metrics after reset failed: {}", e);
            }
        }
        info!("Profiler reset");
    }

    // ---- metrics and collection ----

    /// Add a metric to the current metric set
    pub fn add_metrics(&mut self, name: &str) -> Result<(), ProfilerError> {
        if self.state == EngineState::Uninitialized {
            return Err(ProfilerError::NotInitialized);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ProfilerError::Config("metric name must not be empty".to_string()));
        }

        let changed = self
            .passes
            .register_metric(name, &DriverPassPolicy(&self.driver))?;
        if changed {
            // The counter bank is configured for the old set
            self.stop_collection();
            debug!("Metric {} registered", name);
        }
        Ok(())
    }

    /// Metrics of the current set
    pub fn metrics(&self) -> &[String] {
        self.passes.current().metric_names()
    }

    /// Replay passes the current metric set needs per range
    pub fn required_passes(&self) -> u32 {
        self.passes.current().required_passes()
    }

    /// Ranges still waiting on replay passes (open collecting ranges included)
    pub fn outstanding_ranges(&self) -> usize {
        self.passes.outstanding()
    }

    /// Configure the counter bank for the current metric set. Pushing a
    /// profiled kernel range does this implicitly.
    pub fn start_range_profiling(&mut self) -> Result<(), ProfilerError> {
        if self.state == EngineState::Uninitialized {
            return Err(ProfilerError::NotInitialized);
        }
        self.ensure_collection()?;
        Ok(())
    }

    /// Stop collecting for new ranges. Passes already scheduled still arrive.
    pub fn stop_range_profiling(&mut self) -> Result<(), ProfilerError> {
        if self.state == EngineState::Uninitialized {
            return Err(ProfilerError::NotInitialized);
        }
        self.stop_collection();
        Ok(())
    }

    fn ensure_collection(&mut self) -> Result<bool, ProfilerError> {
        let current = self.passes.current();
        if current.metric_names().is_empty() {
            return Ok(false);
        }
        let wanted = ActiveCollection {
            set_id: current.id,
            metric_count: current.metric_names().len(),
        };
        if self.collection == Some(wanted) {
            return Ok(true);
        }

        let spec = current.spec();
        self.stop_collection();
        let passes = self.driver.begin_collection(&spec)?;
        self.passes.confirm_passes(spec.id, passes);
        self.collection = Some(wanted);
        info!(
            "Range profiling started: metric set {} ({} metric(s), {} pass(es))",
            spec.id,
            spec.metrics.len(),
            passes
        );
        Ok(true)
    }

    fn stop_collection(&mut self) {
        if self.collection.take().is_some() {
            if let Err(e) = self.driver.end_collection() {
                warn!("Ending counter collection failed: {}", e);
            }
            debug!("Range profiling stopped");
        }
    }

    // ---- ranges ----

    /// `push_range` for callers that want the `Result`. `Ok(None)` means the
    /// call was ignored because profiling is off.
    pub fn try_push_range(&mut self, name: &str, kind: RangeKind) -> Result<Option<Range>, ProfilerError> {
        if !self.accepts_range_calls()? {
            return Ok(None);
        }

        let depth = self.ranges.depth() + 1;
        let profile = kind == RangeKind::ConcurrentKernel && self.should_profile(depth);

        // Activity so far belongs to the enclosing MEMORY range
        if kind == RangeKind::Memory && self.memory.has_open_range() {
            self.flush_memory_events();
        }

        let sequence_id = self.ranges.push(name, kind).sequence_id;
        let collecting = profile && self.begin_kernel_range(sequence_id, name);
        if let Some(top) = self.ranges.top_mut() {
            top.collecting = collecting;
        }

        if kind == RangeKind::Memory {
            match self.driver.begin_memory_watch(sequence_id) {
                Ok(()) => self.memory.open(sequence_id, name),
                Err(e) => warn!(
                    "Memory watch for {} ({}) failed, its activity is not recorded: {}",
                    name, sequence_id, e
                ),
            }
        }

        Ok(self.ranges.top().cloned())
    }

    /// `pop_range` for callers that want the `Result`
    pub fn try_pop_range(&mut self, name: &str, kind: RangeKind) -> Result<Option<Range>, ProfilerError> {
        if !self.accepts_range_calls()? {
            return Ok(None);
        }

        let range = self.ranges.pop(name, kind)?;
        let sequence_id = range.sequence_id;

        match range.kind {
            RangeKind::ConcurrentKernel if range.collecting => {
                if let Err(e) = self.driver.pop_range(sequence_id) {
                    warn!(
                        "Driver pop for {} ({}) failed, range has no counter data: {}",
                        name, sequence_id, e
                    );
                    self.passes.abandon(sequence_id);
                    self.decoder.discard(sequence_id);
                }
            }
            RangeKind::Memory => self.finish_memory_range(sequence_id),
            RangeKind::ConcurrentKernel => {}
        }

        self.closed.push(range.clone());
        Ok(Some(range))
    }

    /// Open a range. Returns `Success` when ignored because profiling is off.
    pub fn push_range(&mut self, name: &str, kind: RangeKind) -> ResultCode {
        match self.try_push_range(name, kind) {
            Ok(_) => ResultCode::Success,
            Err(e) => {
                warn!("push_range({}, {}) failed: {}", name, kind, e);
                e.code()
            }
        }
    }

    /// Close the innermost range; `(name, kind)` must match it
    pub fn pop_range(&mut self, name: &str, kind: RangeKind) -> ResultCode {
        match self.try_pop_range(name, kind) {
            Ok(_) => ResultCode::Success,
            Err(e) => {
                warn!("pop_range({}, {}) failed: {}", name, kind, e);
                e.code()
            }
        }
    }

    fn accepts_range_calls(&self) -> Result<bool, ProfilerError> {
        match self.state {
            EngineState::Enabled => Ok(true),
            EngineState::Disabled => Ok(false),
            EngineState::Uninitialized if self.config.strict_lifecycle => {
                Err(ProfilerError::NotInitialized)
            }
            EngineState::Uninitialized => Ok(false),
        }
    }

    fn should_profile(&self, depth: usize) -> bool {
        if self.passes.current().metric_names().is_empty() {
            return false;
        }
        if !self.config.profiles_depth(depth) {
            debug!("Nesting level {} outside profiled levels, not collecting", depth);
            return false;
        }
        if let Some(max) = self.config.max_ranges {
            if self.profiled_ranges >= max {
                debug!("max_ranges ({}) reached, not collecting", max);
                return false;
            }
        }
        true
    }

    fn begin_kernel_range(&mut self, sequence_id: SequenceId, name: &str) -> bool {
        if let Err(e) = self.ensure_collection() {
            warn!("Counter collection unavailable for {} ({}): {}", name, sequence_id, e);
            return false;
        }
        if let Err(e) = self.driver.push_range(sequence_id, name) {
            warn!(
                "Driver push for {} ({}) failed, range has no counter data: {}",
                name, sequence_id, e
            );
            return false;
        }
        self.passes.begin_range(sequence_id, name);
        self.profiled_ranges += 1;
        true
    }

    fn flush_memory_events(&mut self) {
        match self.driver.drain_memory_events() {
            Ok(events) => self.memory.record_all(events),
            Err(e) => warn!("Draining memory activity failed: {}", e),
        }
    }

    fn finish_memory_range(&mut self, sequence_id: SequenceId) {
        if !self.memory.is_open(sequence_id) {
            return;
        }
        match self.driver.end_memory_watch(sequence_id) {
            Ok(events) => self.memory.record_all(events),
            Err(e) => warn!("Ending memory watch for {} failed: {}", sequence_id, e),
        }
        self.memory.close(sequence_id);
    }

    /// Number of open ranges
    pub fn active_range_count(&self) -> usize {
        self.ranges.depth()
    }

    pub fn open_ranges(&self) -> &[Range] {
        self.ranges.open_ranges()
    }

    /// Abandon every open range. They never receive counter data or
    /// memory records. Returns how many were dropped.
    pub fn clear_all_ranges(&mut self) -> usize {
        let abandoned = self.ranges.clear();
        if abandoned.is_empty() {
            return 0;
        }

        let mut kernel_ranges = false;
        for range in &abandoned {
            match range.kind {
                RangeKind::ConcurrentKernel if range.collecting => {
                    self.passes.abandon(range.sequence_id);
                    self.decoder.discard(range.sequence_id);
                    kernel_ranges = true;
                }
                RangeKind::Memory if self.memory.is_open(range.sequence_id) => {
                    if let Err(e) = self.driver.end_memory_watch(range.sequence_id) {
                        warn!("Ending memory watch for {} failed: {}", range.sequence_id, e);
                    }
                }
                _ => {}
            }
        }
        self.memory.abandon_open();
        if kernel_ranges {
            // The driver still holds the open ranges; restart the collection
            self.stop_collection();
        }

        warn!("Cleared {} open range(s)", abandoned.len());
        abandoned.len()
    }

    // ---- decoding ----

    /// Drain ready counter buffers. Waits a bounded time when passes are
    /// outstanding; call it repeatedly until `is_all_pass_submitted`.
    pub fn decode_counter_data(&mut self) -> DecodeOutcome {
        if self.state != EngineState::Enabled {
            return DecodeOutcome::Disabled;
        }

        // Open ranges produce no buffers until popped; only wait for closed ones
        let attempts = if self.awaiting_replay() {
            self.config.decode_poll_attempts
        } else {
            1
        };
        let interval = self.config.decode_poll_interval;
        let driver = &mut self.driver;

        let polled = poll_with_backoff(
            "decode_counter_data",
            attempts,
            interval,
            || -> Result<Option<Vec<RawCounterBuffer>>, DriverError> {
                match driver.poll_buffers()? {
                    BufferPoll::Ready(buffers) if !buffers.is_empty() => Ok(Some(buffers)),
                    _ => Ok(None),
                }
            },
        );

        match polled {
            Ok(Some(buffers)) => {
                let stats = self.decoder.decode(buffers, &mut self.passes);
                debug!(
                    "Decoded {} buffer(s), {} range(s) complete, {} outstanding",
                    stats.decoded,
                    stats.completed,
                    self.passes.outstanding()
                );
                DecodeOutcome::Decoded(stats)
            }
            Ok(None) => DecodeOutcome::NotReady,
            Err(e) => {
                warn!("Polling counter buffers failed: {}", e);
                DecodeOutcome::NotReady
            }
        }
    }

    /// Some popped kernel range is still waiting on replay passes
    fn awaiting_replay(&self) -> bool {
        let open: BTreeSet<SequenceId> = self
            .ranges
            .open_ranges()
            .iter()
            .map(|r| r.sequence_id)
            .collect();
        self.passes
            .pending_ranges()
            .iter()
            .any(|seq| !open.contains(seq))
    }

    /// True when every pass of every metric set is in, or profiling is off
    pub fn is_all_pass_submitted(&self) -> bool {
        self.state != EngineState::Enabled || self.passes.all_submitted()
    }

    // ---- results ----

    pub fn counter_samples(&self) -> &[CounterSample] {
        self.decoder.samples()
    }

    pub fn reduce(&self, range_name: &str, metric_name: &str, mode: ReductionMode) -> AggregatedResult {
        reduction::reduce(self.decoder.samples(), range_name, metric_name, mode)
    }

    pub fn profiler_ranges(&self, mode: ReductionMode) -> RangeReport {
        let pending = self.passes.pending_ranges();
        let source = ReportSource {
            closed: &self.closed,
            open: self.ranges.open_ranges(),
            samples: self.decoder.samples(),
            kernels: self.decoder.kernels(),
            pending: &pending,
            all_passes_submitted: self.passes.all_submitted(),
        };
        report::build_report(&source, mode)
    }

    /// Report using the configured default reduction
    pub fn report(&self) -> RangeReport {
        self.profiler_ranges(self.config.default_reduction)
    }

    pub fn write_profiler_ranges<W: Write>(&self, writer: &mut W, mode: ReductionMode) -> io::Result<()> {
        report::write_ranges(writer, &self.profiler_ranges(mode))
    }

    pub fn print_profiler_ranges(&self, mode: ReductionMode) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        if let Err(e) = self.write_profiler_ranges(&mut handle, mode) {
            warn!("Printing profiler ranges failed: {}", e);
        }
    }

    /// Memory records per sequence id; empty while profiling is off
    pub fn get_memory_activity(&self) -> Vec<MemoryRangeRecord> {
        if self.state != EngineState::Enabled {
            return Vec::new();
        }
        self.memory.records().cloned().collect()
    }

    pub fn write_memory_activity<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        report::write_memory(writer, &self.get_memory_activity())
    }

    pub fn print_memory_activity(&self) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        if let Err(e) = self.write_memory_activity(&mut handle) {
            warn!("Printing memory activity failed: {}", e);
        }
    }

    /// Everything recorded so far, for export
    pub fn snapshot(&self, mode: ReductionMode) -> Snapshot {
        Snapshot::new(
            self.profiler_ranges(mode),
            self.memory.records().cloned().collect(),
            self.decoder.samples().to_vec(),
        )
    }
}

impl<D: CounterDriver> Drop for Profiler<D> {
    fn drop(&mut self) {
        if self.state != EngineState::Uninitialized {
            self.teardown();
        }
    }
}
