//! Range-based GPU profiling engine
//!
//! Instruments named regions of GPU work, coordinates multi-pass hardware
//! counter collection through a [`CounterDriver`], attributes memory
//! activity to MEMORY ranges and reduces repeated measurements.
//!
//! ```no_run
//! use gpuprof_engine::{Profiler, ProfilerConfig, RangeKind, ReductionMode, SimulatedDriver};
//!
//! let device = SimulatedDriver::default();
//! let mut profiler = Profiler::new(ProfilerConfig::default(), device.clone());
//! profiler.init()?;
//! profiler.add_metrics("sm__cycles_elapsed.avg")?;
//!
//! profiler.push_range("conv1", RangeKind::ConcurrentKernel);
//! device.launch_kernel("conv2d", (64, 1, 1), (256, 1, 1), 12_000);
//! profiler.pop_range("conv1", RangeKind::ConcurrentKernel);
//!
//! while !profiler.is_all_pass_submitted() {
//!     profiler.decode_counter_data();
//! }
//! profiler.print_profiler_ranges(ReductionMode::Sum);
//! # Ok::<(), gpuprof_engine::ProfilerError>(())
//! ```

pub mod config;
pub mod decoder;
pub mod driver;
pub mod engine;
pub mod error;
pub mod memory;
pub mod pass;
pub mod poll;
pub mod range;
pub mod reduction;
pub mod report;

pub use config::ProfilerConfig;
pub use decoder::DecodeStats;
pub use driver::{CounterDriver, DriverError, SimulatedConfig, SimulatedDriver};
pub use engine::{DecodeOutcome, EngineState, Profiler};
pub use error::{ProfilerError, ResultCode};
pub use gpuprof_shared::types::profile::{AggregatedResult, RangeReport, ReductionMode};
pub use gpuprof_shared::types::range::{Range, RangeKind};
