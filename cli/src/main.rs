//! CLI for gpuprof
//!
//! Commands:
//! - run: Execute a workload on the simulated device and report counters
//! - report: Render a saved snapshot
//! - diff: Compare two saved snapshots

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;
mod workload;

#[derive(Parser)]
#[command(name = "gpuprof")]
#[command(about = "gpuprof - range-based GPU counter profiler", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "GPUPROF_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload under the profiler
    Run(commands::run::RunArgs),

    /// Print a saved snapshot
    Report(commands::report::ReportArgs),

    /// Compare two saved snapshots
    Diff(commands::diff::DiffArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Report(args) => commands::report::run(args),
        Commands::Diff(args) => commands::diff::run(args),
    };

    if let Err(e) = &result {
        output::error(&format!("{:#}", e));
    }
    result
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
