//! Workload scripts for the simulated device
//!
//! A workload is a TOML file listing range pushes/pops, kernel launches and
//! memory operations. `run` replays it against a `Profiler` backed by a
//! `SimulatedDriver`:
//!
//! ```toml
//! name = "conv-block"
//! repeat = 2
//! metrics = ["sm__cycles_elapsed.avg", "dram__bytes_read.sum"]
//!
//! [[steps]]
//! op = "push"
//! name = "conv1"
//!
//! [[steps]]
//! op = "kernel"
//! name = "conv2d"
//! grid = [64, 1, 1]
//! block = [256, 1, 1]
//! duration_ns = 12000
//!
//! [[steps]]
//! op = "pop"
//! name = "conv1"
//! ```

use anyhow::{bail, Context, Result};
use gpuprof_engine::{Profiler, RangeKind, ResultCode, SimulatedDriver};
use gpuprof_shared::types::events::{CopyDirection, Dim3, MemoryKind};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Used when `run` is given no workload file
pub const BUILTIN_WORKLOAD: &str = r#"
name = "builtin-conv-block"
repeat = 3
metrics = [
    "gpu__time_duration.sum",
    "sm__cycles_elapsed.avg",
    "sm__inst_executed.sum",
    "dram__bytes_read.sum",
]

[[steps]]
op = "push"
name = "upload"
kind = "MEMORY"

[[steps]]
op = "malloc"
buffer = "weights"
bytes = 4194304

[[steps]]
op = "memcpy"
buffer = "weights"
direction = "HostToDevice"
bytes = 4194304

[[steps]]
op = "pop"
name = "upload"
kind = "MEMORY"

[[steps]]
op = "push"
name = "conv1"

[[steps]]
op = "kernel"
name = "implicit_gemm"
grid = [128, 1, 1]
block = [256, 1, 1]
duration_ns = 18000

[[steps]]
op = "kernel"
name = "bias_relu"
grid = [64, 1, 1]
block = [128, 1, 1]
duration_ns = 2500

[[steps]]
op = "pop"
name = "conv1"

[[steps]]
op = "push"
name = "download"
kind = "MEMORY"

[[steps]]
op = "memcpy"
buffer = "weights"
direction = "DeviceToHost"
bytes = 65536

[[steps]]
op = "free"
buffer = "weights"

[[steps]]
op = "pop"
name = "download"
kind = "MEMORY"
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,

    /// How many times the step list is replayed
    #[serde(default = "default_repeat")]
    pub repeat: u32,

    /// Metrics registered before the first step
    #[serde(default)]
    pub metrics: Vec<String>,

    pub steps: Vec<Step>,
}

fn default_repeat() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Push {
        name: String,
        #[serde(default, deserialize_with = "lenient_kind")]
        kind: RangeKind,
    },
    Pop {
        name: String,
        #[serde(default, deserialize_with = "lenient_kind")]
        kind: RangeKind,
    },
    Kernel {
        name: String,
        grid: Dim3,
        block: Dim3,
        #[serde(default)]
        stream: u32,
        duration_ns: u64,
    },
    Malloc {
        buffer: String,
        bytes: u64,
        #[serde(default = "device_memory")]
        kind: MemoryKind,
    },
    Free {
        buffer: String,
    },
    Memcpy {
        buffer: String,
        direction: CopyDirection,
        bytes: u64,
        #[serde(default)]
        stream: u32,
        #[serde(default, rename = "async")]
        is_async: bool,
    },
    Memset {
        buffer: String,
        bytes: u64,
    },
}

fn device_memory() -> MemoryKind {
    MemoryKind::Device
}

/// Range kinds accept any spelling; unknown names mean CONCURRENT_KERNEL
fn lenient_kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RangeKind, D::Error> {
    let text = String::deserialize(deserializer)?;
    Ok(text.parse().unwrap_or_default())
}

/// What happened while replaying a workload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub steps: usize,
    pub kernels: usize,
    pub memory_ops: usize,

    /// Push/pop calls that returned a non-success code
    pub failed_range_calls: usize,
}

impl Workload {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_WORKLOAD).context("Built-in workload is invalid")
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let workload: Self = toml::from_str(s).context("Failed to parse workload")?;
        workload.validate()?;
        Ok(workload)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workload: {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("In workload {}", path.display()))
    }

    /// Buffers must be allocated by an earlier step
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            bail!("workload '{}' has no steps", self.name);
        }
        if self.repeat == 0 {
            bail!("repeat must be at least 1");
        }

        let mut allocated: Vec<&str> = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Malloc { buffer, .. } => allocated.push(buffer),
                Step::Free { buffer }
                | Step::Memcpy { buffer, .. }
                | Step::Memset { buffer, .. } => {
                    if !allocated.contains(&buffer.as_str()) {
                        bail!("step {}: buffer '{}' is used before malloc", index + 1, buffer);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Replay every step `repeat` times
    pub fn execute(
        &self,
        profiler: &mut Profiler<SimulatedDriver>,
        device: &SimulatedDriver,
    ) -> Result<ExecutionSummary> {
        let mut summary = ExecutionSummary::default();
        let mut buffers: HashMap<&str, u64> = HashMap::new();

        for iteration in 0..self.repeat {
            debug!("Workload {} iteration {}", self.name, iteration + 1);
            for step in &self.steps {
                summary.steps += 1;
                match step {
                    Step::Push { name, kind } => {
                        let code = profiler.push_range(name, *kind);
                        summary.failed_range_calls += record_code("push", name, code);
                    }
                    Step::Pop { name, kind } => {
                        let code = profiler.pop_range(name, *kind);
                        summary.failed_range_calls += record_code("pop", name, code);
                    }
                    Step::Kernel {
                        name,
                        grid,
                        block,
                        stream,
                        duration_ns,
                    } => {
                        device.launch_kernel_on(name, *grid, *block, *stream, *duration_ns);
                        summary.kernels += 1;
                    }
                    Step::Malloc { buffer, bytes, kind } => {
                        let address = device.malloc(*bytes, *kind);
                        buffers.insert(buffer, address);
                        summary.memory_ops += 1;
                    }
                    Step::Free { buffer } => {
                        let address = lookup(&buffers, buffer)?;
                        if !device.free(address) {
                            warn!("Buffer {} was already released", buffer);
                        }
                        summary.memory_ops += 1;
                    }
                    Step::Memcpy {
                        buffer,
                        direction,
                        bytes,
                        stream,
                        is_async,
                    } => {
                        let address = lookup(&buffers, buffer)?;
                        device.memcpy(*direction, address, *bytes, *stream, *is_async);
                        summary.memory_ops += 1;
                    }
                    Step::Memset { buffer, bytes } => {
                        let address = lookup(&buffers, buffer)?;
                        device.memset(address, *bytes);
                        summary.memory_ops += 1;
                    }
                }
            }
        }

        Ok(summary)
    }
}

fn record_code(call: &str, name: &str, code: ResultCode) -> usize {
    if code.is_success() {
        0
    } else {
        warn!("{}({}) returned {:?}", call, name, code);
        1
    }
}

fn lookup(buffers: &HashMap<&str, u64>, buffer: &str) -> Result<u64> {
    buffers
        .get(buffer)
        .copied()
        .with_context(|| format!("buffer '{}' is not allocated", buffer))
}
