//! Integration test: end-to-end profiling sessions against the simulated device
//!
//! Covers the basic range lifecycle, error codes from mismatched pops,
//! reductions over repeated ranges, disabled profiling and collection limits.

use gpuprof_engine::{
    DecodeOutcome, EngineState, Profiler, ProfilerConfig, RangeKind, ReductionMode, ResultCode,
    SimulatedConfig, SimulatedDriver,
};
use gpuprof_shared::types::events::MemoryKind;
use std::time::Duration;

const CYCLES: &str = "sm__cycles_elapsed.avg";
const INST: &str = "sm__inst_executed.sum";
const DRAM: &str = "dram__bytes_read.sum";

fn config() -> ProfilerConfig {
    ProfilerConfig {
        max_ranges: None,
        min_nesting_level: 1,
        nesting_levels: 16,
        decode_poll_attempts: 4,
        decode_poll_interval: Duration::ZERO,
        strict_lifecycle: false,
        default_reduction: ReductionMode::Sum,
        metrics: Vec::new(),
        device_index: 0,
    }
}

fn start(config: ProfilerConfig, metrics: &[&str]) -> (Profiler<SimulatedDriver>, SimulatedDriver) {
    let device = SimulatedDriver::default();
    let mut profiler = Profiler::new(config, device.clone());
    profiler.init().unwrap();
    for metric in metrics {
        profiler.add_metrics(metric).unwrap();
    }
    (profiler, device)
}

/// Decode until every pass is in; returns the number of decode calls
fn drain(profiler: &mut Profiler<SimulatedDriver>) -> usize {
    let mut calls = 0;
    while !profiler.is_all_pass_submitted() {
        calls += 1;
        assert!(calls < 64, "replay passes never completed");
        profiler.decode_counter_data();
    }
    calls
}

#[test]
fn test_single_range_gets_one_sample_per_metric() {
    let (mut profiler, device) = start(config(), &[CYCLES, INST, DRAM]);
    // CYCLES and INST share the "sm" bank
    assert_eq!(profiler.required_passes(), 2);

    assert_eq!(profiler.push_range("conv1", RangeKind::ConcurrentKernel), ResultCode::Success);
    device.launch_kernel("conv2d", (16, 1, 1), (128, 1, 1), 2_000);
    assert_eq!(profiler.pop_range("conv1", RangeKind::ConcurrentKernel), ResultCode::Success);

    // Popping does not make counters ready
    assert!(profiler.counter_samples().is_empty());
    assert!(!profiler.is_all_pass_submitted());

    drain(&mut profiler);

    let samples = profiler.counter_samples();
    assert_eq!(samples.len(), 3);
    for metric in [CYCLES, INST, DRAM] {
        let matching: Vec<_> = samples
            .iter()
            .filter(|s| s.range_name == "conv1" && s.metric_name == metric)
            .collect();
        assert_eq!(matching.len(), 1, "metric {}", metric);
    }

    let threads = 16.0 * 128.0;
    assert_eq!(profiler.reduce("conv1", CYCLES, ReductionMode::Sum).reduced_value, Some(3_000.0));
    assert_eq!(profiler.reduce("conv1", INST, ReductionMode::Sum).reduced_value, Some(4.0 * threads));
    assert_eq!(profiler.reduce("conv1", DRAM, ReductionMode::Sum).reduced_value, Some(16.0 * threads));

    let report = profiler.profiler_ranges(ReductionMode::Sum);
    let conv1 = report.range("conv1").unwrap();
    assert_eq!(conv1.instances, 1);
    assert!(!conv1.is_incomplete());
    assert_eq!(conv1.kernels.len(), 1);
    assert_eq!(conv1.kernels[0].launch.name, "conv2d");
}

#[test]
fn test_pop_on_empty_stack() {
    let (mut profiler, _device) = start(config(), &[CYCLES]);
    assert_eq!(profiler.pop_range("x", RangeKind::ConcurrentKernel), ResultCode::EmptyStack);
    assert_eq!(profiler.active_range_count(), 0);
    assert!(profiler.is_all_pass_submitted());
    assert!(profiler.profiler_ranges(ReductionMode::Sum).ranges.is_empty());
}

#[test]
fn test_out_of_order_pop_is_rejected() {
    let (mut profiler, _device) = start(config(), &[CYCLES]);
    profiler.push_range("A", RangeKind::ConcurrentKernel);
    profiler.push_range("B", RangeKind::ConcurrentKernel);

    assert_eq!(profiler.pop_range("A", RangeKind::ConcurrentKernel), ResultCode::MismatchedRange);

    let open: Vec<&str> = profiler.open_ranges().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(open, vec!["A", "B"]);

    // Correct order still works afterwards
    assert_eq!(profiler.pop_range("B", RangeKind::ConcurrentKernel), ResultCode::Success);
    assert_eq!(profiler.pop_range("A", RangeKind::ConcurrentKernel), ResultCode::Success);
    assert_eq!(profiler.active_range_count(), 0);
}

#[test]
fn test_repeated_range_reductions() {
    let (mut profiler, device) = start(config(), &["gpu__time_duration.sum"]);

    for duration in [10, 20, 30] {
        profiler.push_range("loop", RangeKind::ConcurrentKernel);
        device.launch_kernel("step", (1, 1, 1), (32, 1, 1), duration);
        profiler.pop_range("loop", RangeKind::ConcurrentKernel);
    }
    drain(&mut profiler);

    let metric = "gpu__time_duration.sum";
    assert_eq!(profiler.reduce("loop", metric, ReductionMode::Sum).reduced_value, Some(60.0));
    assert_eq!(profiler.reduce("loop", metric, ReductionMode::Max).reduced_value, Some(30.0));
    assert_eq!(profiler.reduce("loop", metric, ReductionMode::Mean).reduced_value, Some(20.0));

    let report = profiler.profiler_ranges(ReductionMode::Mean);
    let summary = report.range("loop").unwrap();
    assert_eq!(summary.instances, 3);
    assert_eq!(summary.metrics[0].sample_count, 3);
    assert_eq!(summary.kernels[0].count, 3);
}

#[test]
fn test_disabled_profiling_is_a_no_op() {
    let (mut profiler, device) = start(config(), &[CYCLES]);
    profiler.disable();
    assert_eq!(profiler.state(), EngineState::Disabled);

    assert_eq!(profiler.push_range("conv1", RangeKind::ConcurrentKernel), ResultCode::Success);
    assert_eq!(profiler.push_range("h2d", RangeKind::Memory), ResultCode::Success);
    let addr = device.malloc(1 << 20, MemoryKind::Device);
    device.free(addr);
    assert_eq!(profiler.pop_range("h2d", RangeKind::Memory), ResultCode::Success);
    assert_eq!(profiler.pop_range("conv1", RangeKind::ConcurrentKernel), ResultCode::Success);
    // Even a pop with nothing open is ignored
    assert_eq!(profiler.pop_range("none", RangeKind::Memory), ResultCode::Success);

    assert_eq!(profiler.active_range_count(), 0);
    assert!(profiler.get_memory_activity().is_empty());
    assert_eq!(profiler.decode_counter_data(), DecodeOutcome::Disabled);
    assert!(profiler.is_all_pass_submitted());

    profiler.enable();
    assert!(profiler.is_enabled());
    assert!(profiler.profiler_ranges(ReductionMode::Sum).ranges.is_empty());
}

#[test]
fn test_open_range_reported_incomplete() {
    let (mut profiler, _device) = start(config(), &[CYCLES]);
    profiler.push_range("leak", RangeKind::ConcurrentKernel);

    let report = profiler.profiler_ranges(ReductionMode::Sum);
    assert!(!report.all_passes_submitted);
    let leak = report.range("leak").unwrap();
    assert_eq!(leak.open_instances, 1);
    assert!(leak.is_incomplete());
    assert!(leak.metrics.is_empty());

    let mut out = Vec::new();
    profiler.write_profiler_ranges(&mut out, ReductionMode::Sum).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("INCOMPLETE: 1 open"));
}

#[test]
fn test_nested_ranges_outside_levels_not_collected() {
    let mut cfg = config();
    cfg.min_nesting_level = 2;
    cfg.nesting_levels = 1;
    let (mut profiler, device) = start(cfg, &["gpu__time_duration.sum"]);

    let outer = profiler.try_push_range("outer", RangeKind::ConcurrentKernel).unwrap().unwrap();
    let inner = profiler.try_push_range("inner", RangeKind::ConcurrentKernel).unwrap().unwrap();
    let deepest = profiler.try_push_range("deepest", RangeKind::ConcurrentKernel).unwrap().unwrap();
    assert!(!outer.collecting);
    assert!(inner.collecting);
    assert!(!deepest.collecting);

    device.launch_kernel("k", (1, 1, 1), (64, 1, 1), 500);
    profiler.pop_range("deepest", RangeKind::ConcurrentKernel);
    profiler.pop_range("inner", RangeKind::ConcurrentKernel);
    profiler.pop_range("outer", RangeKind::ConcurrentKernel);
    drain(&mut profiler);

    let ranges: Vec<&str> = profiler
        .counter_samples()
        .iter()
        .map(|s| s.range_name.as_str())
        .collect();
    assert_eq!(ranges, vec!["inner"]);

    // Uncollected ranges still appear, without metrics
    let report = profiler.profiler_ranges(ReductionMode::Sum);
    assert_eq!(report.ranges.len(), 3);
    assert!(report.range("outer").unwrap().metrics.is_empty());
}

#[test]
fn test_max_ranges_limits_collection() {
    let mut cfg = config();
    cfg.max_ranges = Some(2);
    // Configured metrics survive a reset
    cfg.metrics = vec!["gpu__time_duration.sum".to_string()];
    let (mut profiler, _device) = start(cfg, &[]);

    for _ in 0..4 {
        profiler.push_range("step", RangeKind::ConcurrentKernel);
        profiler.pop_range("step", RangeKind::ConcurrentKernel);
    }
    drain(&mut profiler);

    assert_eq!(profiler.counter_samples().len(), 2);
    let summary = profiler.profiler_ranges(ReductionMode::Sum).ranges[0].clone();
    assert_eq!(summary.instances, 4);
    assert_eq!(summary.metrics[0].sample_count, 2);

    // The limit is per session; reset starts counting again
    profiler.reset();
    profiler.push_range("step", RangeKind::ConcurrentKernel);
    profiler.pop_range("step", RangeKind::ConcurrentKernel);
    drain(&mut profiler);
    assert_eq!(profiler.counter_samples().len(), 1);
}

#[test]
fn test_decode_not_ready_within_bound() {
    let device = SimulatedDriver::new(SimulatedConfig {
        buffer_latency_polls: 10,
        ..SimulatedConfig::default()
    });
    let mut cfg = config();
    cfg.decode_poll_attempts = 2;
    let mut profiler = Profiler::new(cfg, device.clone());
    profiler.init().unwrap();
    profiler.add_metrics("gpu__time_duration.sum").unwrap();

    profiler.push_range("slow", RangeKind::ConcurrentKernel);
    profiler.pop_range("slow", RangeKind::ConcurrentKernel);

    assert_eq!(profiler.decode_counter_data(), DecodeOutcome::NotReady);
    assert!(!profiler.is_all_pass_submitted());
    assert!(profiler.counter_samples().is_empty());

    // Called repeatedly, it eventually drains
    let calls = drain(&mut profiler);
    assert!(calls >= 4);
    assert_eq!(profiler.counter_samples().len(), 1);
}

#[test]
fn test_redelivered_buffers_are_ignored() {
    let device = SimulatedDriver::new(SimulatedConfig {
        record_deliveries: true,
        ..SimulatedConfig::default()
    });
    let mut profiler = Profiler::new(config(), device.clone());
    profiler.init().unwrap();
    profiler.add_metrics(CYCLES).unwrap();
    profiler.add_metrics(INST).unwrap();
    profiler.push_range("conv1", RangeKind::ConcurrentKernel);
    device.launch_kernel("conv2d", (2, 1, 1), (32, 1, 1), 100);
    profiler.pop_range("conv1", RangeKind::ConcurrentKernel);
    drain(&mut profiler);
    let before = profiler.counter_samples().to_vec();

    device.redeliver_all();
    match profiler.decode_counter_data() {
        DecodeOutcome::Decoded(stats) => {
            assert_eq!(stats.duplicates, 2);
            assert_eq!(stats.decoded, 0);
        }
        other => panic!("expected redelivered buffers, got {:?}", other),
    }
    assert_eq!(profiler.counter_samples(), before.as_slice());
}

#[test]
fn test_is_all_pass_submitted_never_regresses_while_decoding() {
    let (mut profiler, device) = start(config(), &[CYCLES, INST]);

    for i in 0..5 {
        profiler.push_range("layer", RangeKind::ConcurrentKernel);
        device.launch_kernel("gemm", (i + 1, 1, 1), (64, 1, 1), 100);
        profiler.pop_range("layer", RangeKind::ConcurrentKernel);
    }

    let mut seen_true = false;
    for _ in 0..32 {
        profiler.decode_counter_data();
        let now = profiler.is_all_pass_submitted();
        assert!(!(seen_true && !now), "is_all_pass_submitted went back to false");
        seen_true |= now;
    }
    assert!(seen_true);
    assert_eq!(profiler.counter_samples().len(), 10);
}

#[test]
fn test_all_pass_submitted_stays_true_until_next_collecting_range() {
    let (mut profiler, device) = start(config(), &["gpu__time_duration.sum"]);

    profiler.push_range("a", RangeKind::ConcurrentKernel);
    device.launch_kernel("k", (1, 1, 1), (32, 1, 1), 10);
    profiler.pop_range("a", RangeKind::ConcurrentKernel);
    drain(&mut profiler);
    assert!(profiler.is_all_pass_submitted());

    // Decoding and MEMORY ranges never bring it back to false
    for _ in 0..4 {
        profiler.decode_counter_data();
        assert!(profiler.is_all_pass_submitted());
    }
    profiler.push_range("copy", RangeKind::Memory);
    assert!(profiler.is_all_pass_submitted());
    profiler.pop_range("copy", RangeKind::Memory);
    assert!(profiler.is_all_pass_submitted());
    profiler.add_metrics("gpu__time_duration.sum").unwrap();
    assert!(profiler.is_all_pass_submitted());

    // A new collecting kernel range owes replay passes again
    profiler.push_range("b", RangeKind::ConcurrentKernel);
    assert!(!profiler.is_all_pass_submitted());
    profiler.pop_range("b", RangeKind::ConcurrentKernel);
    drain(&mut profiler);
    assert!(profiler.is_all_pass_submitted());
    assert_eq!(profiler.counter_samples().len(), 2);
}

#[test]
fn test_decode_does_not_wait_on_open_ranges() {
    let mut cfg = config();
    cfg.decode_poll_attempts = 8;
    cfg.decode_poll_interval = Duration::from_millis(1);
    let (mut profiler, device) = start(cfg, &["gpu__time_duration.sum"]);

    profiler.push_range("frame", RangeKind::ConcurrentKernel);
    let before = device.poll_count();
    for _ in 0..10 {
        assert_eq!(profiler.decode_counter_data(), DecodeOutcome::NotReady);
    }
    // One poll per call, no backoff
    assert_eq!(device.poll_count() - before, 10);
    assert!(!profiler.is_all_pass_submitted());

    // A popped range is worth waiting for: pass 0 is ready on the second poll
    profiler.pop_range("frame", RangeKind::ConcurrentKernel);
    let before = device.poll_count();
    assert!(profiler.decode_counter_data().is_ready());
    assert_eq!(device.poll_count() - before, 2);
}

#[test]
fn test_memory_range_sharing_kernel_name_gets_no_metrics() {
    let (mut profiler, device) = start(config(), &["gpu__time_duration.sum"]);

    profiler.push_range("x", RangeKind::ConcurrentKernel);
    device.launch_kernel("k", (1, 1, 1), (32, 1, 1), 100);
    profiler.pop_range("x", RangeKind::ConcurrentKernel);
    profiler.push_range("x", RangeKind::Memory);
    profiler.pop_range("x", RangeKind::Memory);
    drain(&mut profiler);

    let report = profiler.profiler_ranges(ReductionMode::Sum);
    assert_eq!(report.ranges.len(), 2);
    for summary in &report.ranges {
        match summary.kind {
            RangeKind::ConcurrentKernel => {
                assert_eq!(summary.metrics[0].reduced_value, Some(100.0));
            }
            RangeKind::Memory => assert!(summary.metrics.is_empty()),
        }
    }
}
