//! Report command implementation

use anyhow::{Context, Result};
use clap::Args;
use gpuprof_engine::report::{write_memory, write_ranges};
use gpuprof_shared::protocol::snapshot::Snapshot;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Snapshot file written by `gpuprof run --output`
    pub snapshot: PathBuf,

    /// Print the snapshot as JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Also print memory activity
    #[arg(long)]
    pub memory: bool,
}

pub fn run(args: ReportArgs) -> Result<()> {
    let snapshot = Snapshot::load(&args.snapshot)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.json {
        writeln!(out, "{}", snapshot.to_json()?)?;
        return Ok(());
    }

    render(&mut out, &snapshot, args.memory).context("Failed to write report")
}

fn render<W: Write>(out: &mut W, snapshot: &Snapshot, memory: bool) -> io::Result<()> {
    writeln!(
        out,
        "Snapshot {} captured {}",
        snapshot.label.as_deref().unwrap_or("(unlabeled)"),
        snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out)?;
    write_ranges(out, &snapshot.report)?;
    if memory {
        writeln!(out)?;
        write_memory(out, &snapshot.memory)?;
    }
    Ok(())
}
