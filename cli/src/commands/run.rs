//! Run command implementation

use crate::output;
use crate::workload::{ExecutionSummary, Workload};
use anyhow::{Context, Result};
use clap::Args;
use gpuprof_engine::{
    DecodeOutcome, Profiler, ProfilerConfig, ReductionMode, SimulatedConfig, SimulatedDriver,
};
use gpuprof_shared::utils::time::system_time_nanos;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workload file (TOML); the built-in workload is used when omitted
    #[arg(short, long)]
    pub workload: Option<PathBuf>,

    /// Profiler configuration file (TOML)
    #[arg(short, long, env = "GPUPROF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Extra metrics to collect (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub metrics: Vec<String>,

    /// Reduction for the printed report: sum, max or mean
    #[arg(short, long)]
    pub reduction: Option<String>,

    /// Polls before a replay pass buffer is ready on the simulated device
    #[arg(long, default_value = "1")]
    pub buffer_latency: u32,

    /// Save a snapshot (.json for JSON, anything else for binary)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also print memory activity
    #[arg(long)]
    pub memory: bool,

    /// Give up decoding after this many rounds
    #[arg(long, default_value = "1000")]
    pub max_decode_rounds: u32,
}

pub fn run(args: RunArgs) -> Result<()> {
    let workload = match &args.workload {
        Some(path) => Workload::from_file(path)?,
        None => Workload::builtin()?,
    };

    let mut config = match &args.config {
        Some(path) => ProfilerConfig::from_toml_file(path)?,
        None => ProfilerConfig::default(),
    };
    for metric in workload.metrics.iter().chain(&args.metrics) {
        if !config.metrics.contains(metric) {
            config.metrics.push(metric.clone());
        }
    }
    let reduction = args
        .reduction
        .as_deref()
        .map(|r| r.parse::<ReductionMode>().unwrap_or_default())
        .unwrap_or(config.default_reduction);

    let device = SimulatedDriver::new(SimulatedConfig {
        buffer_latency_polls: args.buffer_latency,
        clock_origin_ns: system_time_nanos(),
        ..SimulatedConfig::default()
    });
    let mut profiler = Profiler::new(config, device.clone());
    profiler
        .init()
        .context("Failed to initialize the profiler")?;

    output::info(&format!(
        "Running workload '{}' ({} step(s) x {}), {} metric(s) in {} pass(es)",
        workload.name,
        workload.steps.len(),
        workload.repeat,
        profiler.metrics().len(),
        profiler.required_passes()
    ));

    let summary = workload.execute(&mut profiler, &device)?;
    report_execution(&summary);

    decode_all(&mut profiler, args.max_decode_rounds)?;

    profiler.print_profiler_ranges(reduction);
    if args.memory {
        println!();
        profiler.print_memory_activity();
    }

    if let Some(path) = &args.output {
        profiler
            .snapshot(reduction)
            .with_label(workload.name.clone())
            .save(path)?;
        output::success(&format!("Snapshot written to {}", path.display()));
    }

    profiler.shutdown()?;
    Ok(())
}

fn report_execution(summary: &ExecutionSummary) {
    info!(
        "Executed {} step(s): {} kernel launch(es), {} memory operation(s)",
        summary.steps, summary.kernels, summary.memory_ops
    );
    if summary.failed_range_calls > 0 {
        output::warning(&format!(
            "{} push/pop call(s) failed; see the log for details",
            summary.failed_range_calls
        ));
    }
}

/// Decode until every replay pass is in, with a progress bar over ranges
fn decode_all(profiler: &mut Profiler<SimulatedDriver>, max_rounds: u32) -> Result<()> {
    let total = profiler.outstanding_ranges() as u64;
    if total == 0 {
        return Ok(());
    }

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} ranges {msg}")?
            .progress_chars("█▓▒░  "),
    );
    pb.set_message("decoding");

    let mut rounds = 0;
    while !profiler.is_all_pass_submitted() {
        if rounds >= max_rounds {
            pb.abandon_with_message("gave up");
            output::warning(&format!(
                "{} range(s) still waiting for replay passes after {} decode round(s)",
                profiler.outstanding_ranges(),
                rounds
            ));
            return Ok(());
        }
        rounds += 1;

        if let DecodeOutcome::Decoded(stats) = profiler.decode_counter_data() {
            pb.inc(stats.completed as u64);
        }
    }

    pb.finish_with_message("done");
    Ok(())
}
