//! Diff command implementation

use crate::output;
use anyhow::Result;
use clap::Args;
use gpuprof_shared::protocol::snapshot::Snapshot;
use gpuprof_shared::types::diff::{diff_reports, ReportDiff};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Baseline snapshot
    pub baseline: PathBuf,

    /// Comparison snapshot
    pub comparison: PathBuf,

    /// Rows to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Print the diff as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: DiffArgs) -> Result<()> {
    let baseline = Snapshot::load(&args.baseline)?;
    let comparison = Snapshot::load(&args.comparison)?;
    let diff = diff_reports(&baseline.report, &comparison.report);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    if !diff.is_comparable() {
        output::warning(&format!(
            "Reductions differ (baseline {}, comparison {}); deltas mix aggregates",
            diff.baseline_reduction, diff.comparison_reduction
        ));
    }

    print_diff(&diff, args.limit);
    Ok(())
}

fn print_diff(diff: &ReportDiff, limit: usize) {
    output::header("=== Range Metric Diff ===");
    if diff.metrics.is_empty() {
        println!("No metrics in either snapshot.");
        return;
    }

    println!(
        "  {:<24} {:<40} {:>16} {:>16}  DELTA",
        "RANGE", "METRIC", "BASE", "COMP"
    );
    for m in diff.metrics.iter().take(limit) {
        println!(
            "  {:<24} {:<40} {:>16} {:>16}  {}",
            m.range_name,
            m.metric_name,
            format_value(m.baseline),
            format_value(m.comparison),
            output::delta(m.delta, m.delta_pct)
        );
    }
    if diff.metrics.len() > limit {
        println!("  ... {} more", diff.metrics.len() - limit);
    }
}

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.3}", v))
}
