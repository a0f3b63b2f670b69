//! Report building and text rendering
//!
//! Everything here is a read-only view over engine state.

use crate::reduction;
use gpuprof_shared::types::events::{CounterSample, KernelLaunch};
use gpuprof_shared::types::profile::{
    KernelSummary, MemoryRangeRecord, RangeReport, RangeSummary, ReductionMode,
};
use gpuprof_shared::types::range::{Range, RangeKind, SequenceId};
use gpuprof_shared::utils::format_bytes;
use gpuprof_shared::utils::time::format_duration_ns;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

const RULE: &str =
    "--------------------------------------------------------------------------------";
const HEAVY_RULE: &str =
    "================================================================================";

/// Engine state a report is built from
pub struct ReportSource<'a> {
    /// Popped ranges in pop order
    pub closed: &'a [Range],
    /// Still-open ranges, outermost first
    pub open: &'a [Range],
    pub samples: &'a [CounterSample],
    pub kernels: &'a BTreeMap<SequenceId, Vec<KernelLaunch>>,
    /// Closed kernel ranges still waiting on replay passes
    pub pending: &'a BTreeSet<SequenceId>,
    pub all_passes_submitted: bool,
}

/// Aggregate everything known per range name
pub fn build_report(source: &ReportSource<'_>, mode: ReductionMode) -> RangeReport {
    let mut report = RangeReport::new(mode);
    report.all_passes_submitted = source.all_passes_submitted;

    // Summaries appear in order of first push
    let mut instances: Vec<&Range> = source.closed.iter().chain(source.open.iter()).collect();
    instances.sort_by_key(|r| r.sequence_id);

    let mut index: BTreeMap<(String, RangeKind), usize> = BTreeMap::new();
    let mut kernel_groups: Vec<BTreeMap<String, KernelSummary>> = Vec::new();

    for range in instances {
        let slot = *index
            .entry((range.name.clone(), range.kind))
            .or_insert_with(|| {
                report.ranges.push(RangeSummary::new(range.name.clone(), range.kind));
                kernel_groups.push(BTreeMap::new());
                report.ranges.len() - 1
            });
        let summary = &mut report.ranges[slot];

        if range.is_open() {
            summary.open_instances += 1;
            continue;
        }
        summary.instances += 1;
        if source.pending.contains(&range.sequence_id) {
            summary.pending_instances += 1;
        }

        for launch in source.kernels.get(&range.sequence_id).into_iter().flatten() {
            kernel_groups[slot]
                .entry(launch.signature())
                .and_modify(|k| {
                    k.count += 1;
                    k.launch.duration_ns = k.launch.duration_ns.saturating_add(launch.duration_ns);
                })
                .or_insert_with(|| KernelSummary {
                    launch: launch.clone(),
                    count: 1,
                });
        }
    }

    for (summary, kernels) in report.ranges.iter_mut().zip(kernel_groups) {
        summary.kernels = kernels.into_values().collect();

        // Counter samples belong to kernel ranges only, even when a MEMORY
        // range shares the name
        if summary.kind != RangeKind::ConcurrentKernel {
            continue;
        }

        // Metric order follows first appearance in the samples
        let mut metric_names: Vec<&str> = Vec::new();
        for sample in source.samples.iter().filter(|s| s.range_name == summary.name) {
            if !metric_names.contains(&sample.metric_name.as_str()) {
                metric_names.push(&sample.metric_name);
            }
        }
        summary.metrics = metric_names
            .into_iter()
            .map(|metric| reduction::reduce(source.samples, &summary.name, metric, mode))
            .collect();
    }

    report
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3}", v),
        None => "n/a".to_string(),
    }
}

/// Render a range report as a text table
pub fn write_ranges<W: Write>(writer: &mut W, report: &RangeReport) -> io::Result<()> {
    writeln!(writer, "Range Profiling Report (reduction: {})", report.reduction)?;
    writeln!(writer, "{}", HEAVY_RULE)?;

    if !report.all_passes_submitted {
        writeln!(writer, "WARNING: replay passes outstanding, values are partial")?;
    }

    if report.ranges.is_empty() {
        writeln!(writer, "No ranges recorded.")?;
        return Ok(());
    }

    for summary in &report.ranges {
        writeln!(writer)?;
        writeln!(
            writer,
            "Range Name: {} [{}]  instances: {}",
            summary.name, summary.kind, summary.instances
        )?;
        writeln!(writer, "{}", HEAVY_RULE)?;

        if summary.is_incomplete() {
            writeln!(
                writer,
                "INCOMPLETE: {} open, {} awaiting passes",
                summary.open_instances, summary.pending_instances
            )?;
        }

        for kernel in &summary.kernels {
            writeln!(
                writer,
                "Kernel: {}  x{}  ({})",
                kernel.launch.signature(),
                kernel.count,
                format_duration_ns(kernel.launch.duration_ns)
            )?;
        }

        if summary.kind == RangeKind::ConcurrentKernel {
            writeln!(writer, "{}", RULE)?;
            if summary.metrics.is_empty() {
                writeln!(writer, "{:<50}{:>30}", "(no counter data)", "")?;
            }
            for metric in &summary.metrics {
                writeln!(
                    writer,
                    "{:<50}{:>30}",
                    metric.metric_name,
                    format_value(metric.reduced_value)
                )?;
            }
            writeln!(writer, "{}", RULE)?;
        }
    }

    Ok(())
}

/// Render memory activity records
pub fn write_memory<W: Write>(writer: &mut W, records: &[MemoryRangeRecord]) -> io::Result<()> {
    writeln!(writer, "Memory Activity Report")?;
    writeln!(writer, "{}", HEAVY_RULE)?;

    if records.is_empty() {
        writeln!(writer, "No memory activity recorded.")?;
        return Ok(());
    }

    for record in records {
        writeln!(writer)?;
        writeln!(
            writer,
            "Range Name: {} (seq {})  events: {}  total: {}",
            record.name,
            record.sequence_id,
            record.events.len(),
            format_bytes(record.total_bytes)
        )?;
        writeln!(writer, "{}", RULE)?;

        for (kind, count) in &record.operation_counts {
            writeln!(writer, "  {:<12} {:>8}", kind.to_string(), count)?;
        }

        if record.events.is_empty() {
            continue;
        }

        writeln!(
            writer,
            "\n  {:<16} {:<14} {:<10} {:>12} {:<18} {:>6} {:<6}",
            "Timestamp", "Operation", "Kind", "Bytes", "Address", "Stream", "Mode"
        )?;
        for event in &record.events {
            writeln!(
                writer,
                "  {:<16} {:<14} {:<10} {:>12} {:<18} {:>6} {:<6}",
                event.timestamp,
                event.operation.to_string(),
                format!("{:?}", event.memory_kind).to_uppercase(),
                event.bytes,
                format!("{:#x}", event.address),
                event.stream_id,
                if event.is_async { "async" } else { "sync" }
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuprof_shared::types::events::{MemoryEvent, MemoryKind, MemoryOperation};

    fn closed(name: &str, seq: SequenceId) -> Range {
        let mut range = Range::open(name, RangeKind::ConcurrentKernel, seq, 1);
        range.state = gpuprof_shared::types::range::RangeState::Closed;
        range.collecting = true;
        range
    }

    fn closed_memory(name: &str, seq: SequenceId) -> Range {
        let mut range = Range::open(name, RangeKind::Memory, seq, 1);
        range.state = gpuprof_shared::types::range::RangeState::Closed;
        range
    }

    fn sample(range: &str, seq: SequenceId, metric: &str, value: f64) -> CounterSample {
        CounterSample {
            range_name: range.to_string(),
            sequence_id: seq,
            metric_name: metric.to_string(),
            value,
        }
    }

    fn launch(name: &str) -> KernelLaunch {
        KernelLaunch {
            name: name.to_string(),
            grid: (8, 1, 1),
            block: (128, 1, 1),
            stream_id: 0,
            duration_ns: 100,
        }
    }

    #[test]
    fn test_build_report_groups_by_name() {
        let closed_ranges = vec![closed("loop", 1), closed("loop", 2), closed("fc", 3), closed("loop", 4)];
        let open = vec![Range::open("tail", RangeKind::ConcurrentKernel, 5, 1)];
        let samples = vec![
            sample("loop", 1, "cycles", 10.0),
            sample("loop", 2, "cycles", 20.0),
            sample("fc", 3, "cycles", 5.0),
        ];
        let mut kernels = BTreeMap::new();
        kernels.insert(1, vec![launch("sgemm")]);
        kernels.insert(2, vec![launch("sgemm")]);
        let pending: BTreeSet<SequenceId> = [4].into_iter().collect();

        let source = ReportSource {
            closed: &closed_ranges,
            open: &open,
            samples: &samples,
            kernels: &kernels,
            pending: &pending,
            all_passes_submitted: false,
        };
        let report = build_report(&source, ReductionMode::Sum);

        let names: Vec<&str> = report.ranges.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["loop", "fc", "tail"]);

        let lp = report.range("loop").unwrap();
        assert_eq!(lp.instances, 3);
        assert_eq!(lp.pending_instances, 1);
        assert_eq!(lp.kernels.len(), 1);
        assert_eq!(lp.kernels[0].count, 2);
        assert_eq!(lp.kernels[0].launch.duration_ns, 200);
        assert_eq!(report.metric("loop", "cycles").unwrap().reduced_value, Some(30.0));

        let tail = report.range("tail").unwrap();
        assert_eq!(tail.open_instances, 1);
        assert!(tail.is_incomplete());
        assert!(tail.metrics.is_empty());
    }

    #[test]
    fn test_memory_range_sharing_name_has_no_metrics() {
        let closed_ranges = vec![closed("x", 1), closed_memory("x", 2)];
        let samples = vec![sample("x", 1, "gpu__time_duration.sum", 100.0)];
        let kernels = BTreeMap::new();
        let pending = BTreeSet::new();
        let source = ReportSource {
            closed: &closed_ranges,
            open: &[],
            samples: &samples,
            kernels: &kernels,
            pending: &pending,
            all_passes_submitted: true,
        };
        let report = build_report(&source, ReductionMode::Sum);
        assert_eq!(report.ranges.len(), 2);

        let kernel = &report.ranges[0];
        assert_eq!(kernel.kind, RangeKind::ConcurrentKernel);
        assert_eq!(kernel.metrics.len(), 1);

        let memory = &report.ranges[1];
        assert_eq!(memory.kind, RangeKind::Memory);
        assert_eq!(memory.instances, 1);
        assert!(memory.metrics.is_empty());
    }

    #[test]
    fn test_write_ranges_layout() {
        let closed_ranges = vec![closed("conv1", 1)];
        let samples = vec![sample("conv1", 1, "sm__cycles_elapsed.avg", 1234.5)];
        let mut kernels = BTreeMap::new();
        kernels.insert(1, vec![launch("conv")]);
        let pending = BTreeSet::new();
        let source = ReportSource {
            closed: &closed_ranges,
            open: &[],
            samples: &samples,
            kernels: &kernels,
            pending: &pending,
            all_passes_submitted: true,
        };
        let report = build_report(&source, ReductionMode::Max);

        let mut out = Vec::new();
        write_ranges(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("reduction: MAX"));
        assert!(text.contains("Range Name: conv1 [CONCURRENT_KERNEL]"));
        assert!(text.contains("Kernel: conv<<<{8, 1, 1}, {128, 1, 1}>>>  x1"));
        let line = text
            .lines()
            .find(|l| l.starts_with("sm__cycles_elapsed.avg"))
            .unwrap();
        assert_eq!(line.len(), 80);
        assert!(line.ends_with("1234.500"));
        assert!(!text.contains("WARNING"));
    }

    #[test]
    fn test_write_empty_reports() {
        let mut out = Vec::new();
        write_ranges(&mut out, &RangeReport::new(ReductionMode::Sum)).unwrap();
        write_memory(&mut out, &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("No ranges recorded."));
        assert!(text.contains("No memory activity recorded."));
    }

    #[test]
    fn test_write_memory() {
        let event = MemoryEvent {
            range_name: "h2d".to_string(),
            sequence_id: 2,
            operation: MemoryOperation::Allocation,
            memory_kind: MemoryKind::Device,
            bytes: 2048,
            address: 0x7000,
            timestamp: 42,
            correlation_id: 1,
            process_id: 1,
            device_id: 0,
            context_id: 1,
            stream_id: 0,
            is_async: false,
            name: None,
            source: None,
        };
        let record = MemoryRangeRecord::from_events("h2d", 2, vec![event]);

        let mut out = Vec::new();
        write_memory(&mut out, &[record]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Range Name: h2d (seq 2)  events: 1  total: 2.00 KiB"));
        assert!(text.contains("ALLOCATION"));
        assert!(text.contains("0x7000"));
        assert!(text.contains("DEVICE"));
    }
}
