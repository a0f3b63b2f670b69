//! Integration test: profile -> snapshot -> file -> snapshot
//!
//! Runs a small session on the simulated device, saves the snapshot in
//! both encodings and checks the loaded copy still answers queries.

use gpuprof_engine::{Profiler, ProfilerConfig, RangeKind, ReductionMode, SimulatedDriver};
use gpuprof_shared::protocol::snapshot::{Snapshot, SnapshotFormat};
use gpuprof_shared::types::diff::diff_reports;
use gpuprof_shared::types::events::{CopyDirection, MemoryKind};
use std::time::Duration;

fn session(kernel_ns: u64) -> Snapshot {
    let config = ProfilerConfig {
        decode_poll_interval: Duration::ZERO,
        metrics: vec![
            "gpu__time_duration.sum".to_string(),
            "dram__bytes_read.sum".to_string(),
        ],
        ..ProfilerConfig::default()
    };
    let device = SimulatedDriver::default();
    let mut profiler = Profiler::new(config, device.clone());
    profiler.init().unwrap();

    profiler.push_range("upload", RangeKind::Memory);
    let input = device.malloc(1 << 16, MemoryKind::Device);
    device.memcpy(CopyDirection::HostToDevice, input, 1 << 16, 0, false);
    profiler.pop_range("upload", RangeKind::Memory);

    for _ in 0..2 {
        profiler.push_range("forward", RangeKind::ConcurrentKernel);
        device.launch_kernel("conv2d", (8, 8, 1), (16, 16, 1), kernel_ns);
        profiler.pop_range("forward", RangeKind::ConcurrentKernel);
    }

    for _ in 0..64 {
        if profiler.is_all_pass_submitted() {
            break;
        }
        profiler.decode_counter_data();
    }
    assert!(profiler.is_all_pass_submitted());

    profiler.snapshot(ReductionMode::Mean).with_label("forward-pass")
}

#[test]
fn test_snapshot_roundtrip_json_and_binary() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = session(1_000);

    for file in ["run.json", "run.gps"] {
        let path = dir.path().join(file);
        snapshot.save(&path).unwrap();
        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot, "{}", file);
    }

    // The JSON file is readable as plain JSON
    let json = std::fs::read_to_string(dir.path().join("run.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["label"], "forward-pass");
    assert_eq!(value["report"]["reduction"], "MEAN");

    assert_eq!(
        SnapshotFormat::for_path(&dir.path().join("run.gps")),
        SnapshotFormat::Binary
    );
}

#[test]
fn test_snapshot_contents() {
    let snapshot = session(1_000);

    let forward = snapshot.report.range("forward").unwrap();
    assert_eq!(forward.instances, 2);
    assert_eq!(
        forward.metric("gpu__time_duration.sum").unwrap().reduced_value,
        Some(1_000.0)
    );
    assert_eq!(snapshot.samples.len(), 4);

    assert_eq!(snapshot.memory.len(), 1);
    assert_eq!(snapshot.memory[0].name, "upload");
    assert_eq!(snapshot.memory[0].total_bytes, 2 << 16);
}

#[test]
fn test_diff_of_two_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let baseline_path = dir.path().join("baseline.gps");
    let comparison_path = dir.path().join("comparison.json");

    session(1_000).save(&baseline_path).unwrap();
    session(1_500).save(&comparison_path).unwrap();

    let baseline = Snapshot::load(&baseline_path).unwrap();
    let comparison = Snapshot::load(&comparison_path).unwrap();
    let diff = diff_reports(&baseline.report, &comparison.report);

    assert!(diff.is_comparable());
    let duration = diff
        .metrics
        .iter()
        .find(|m| m.metric_name == "gpu__time_duration.sum")
        .unwrap();
    assert_eq!(duration.delta, Some(500.0));
    assert!((duration.delta_pct - 50.0).abs() < 1e-9);

    // Same launch shape, so the byte counts match
    let dram = diff
        .metrics
        .iter()
        .find(|m| m.metric_name == "dram__bytes_read.sum")
        .unwrap();
    assert_eq!(dram.delta, Some(0.0));
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = Snapshot::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(format!("{:#}", err).contains("absent.json"));
}
