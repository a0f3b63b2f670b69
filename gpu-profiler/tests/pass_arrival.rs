//! Integration test: replay passes arriving in arbitrary order
//!
//! Drives `PassCoordinator` and `CounterDecoder` directly with shuffled,
//! partially duplicated pass buffers and checks that a range publishes
//! samples exactly when its last pass arrives.

use gpuprof_engine::decoder::CounterDecoder;
use gpuprof_engine::driver::{CounterBankPolicy, RawCounterBuffer};
use gpuprof_engine::pass::PassCoordinator;
use gpuprof_shared::types::range::SequenceId;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

fn metric(pass: u32) -> String {
    format!("bank{}__counter.sum", pass)
}

/// One metric per bank, so `passes` metrics need `passes` replay passes
fn coordinator(passes: u32) -> PassCoordinator {
    let mut policy = CounterBankPolicy::new(1);
    for pass in 0..passes {
        policy.add_metric(metric(pass), "shared");
    }
    let mut coordinator = PassCoordinator::new();
    for pass in 0..passes {
        coordinator.register_metric(&metric(pass), &policy).unwrap();
    }
    coordinator
}

fn buffer(buffer_id: u64, sequence_id: SequenceId, pass_index: u32) -> RawCounterBuffer {
    RawCounterBuffer {
        buffer_id,
        sequence_id,
        pass_index,
        values: vec![(metric(pass_index), (sequence_id * 100 + pass_index as u64) as f64)],
        kernels: Vec::new(),
    }
}

fn arrival_order() -> impl Strategy<Value = (u32, Vec<RawCounterBuffer>, usize)> {
    (1u64..6, 1u32..5).prop_flat_map(|(ranges, passes)| {
        let mut buffers = Vec::new();
        let mut next_id = 1;
        for sequence_id in 1..=ranges {
            for pass in 0..passes {
                buffers.push(buffer(next_id, sequence_id, pass));
                next_id += 1;
            }
        }
        let total = buffers.len();
        (Just(passes), Just(buffers).prop_shuffle(), 1..=total)
    })
}

proptest! {
    #[test]
    fn test_samples_appear_only_when_complete((passes, buffers, batch) in arrival_order()) {
        let mut coordinator = coordinator(passes);
        prop_assert_eq!(coordinator.current().required_passes(), passes);

        let ranges: BTreeSet<SequenceId> = buffers.iter().map(|b| b.sequence_id).collect();
        for &sequence_id in &ranges {
            coordinator.begin_range(sequence_id, &format!("range{}", sequence_id));
        }

        let mut decoder = CounterDecoder::new();
        let mut arrived: BTreeMap<SequenceId, u32> = BTreeMap::new();
        let mut was_all_submitted = false;

        for chunk in buffers.chunks(batch) {
            // Deliver the chunk's first buffer twice
            let mut delivery = chunk.to_vec();
            delivery.extend(chunk.first().cloned());
            let stats = decoder.decode(delivery, &mut coordinator);
            prop_assert_eq!(stats.duplicates, 1);
            prop_assert_eq!(stats.decoded, chunk.len());

            for b in chunk {
                *arrived.entry(b.sequence_id).or_default() += 1;
            }

            for &sequence_id in &ranges {
                let complete = arrived.get(&sequence_id).copied().unwrap_or(0) == passes;
                let published = decoder.samples_for(sequence_id).count();
                if complete {
                    prop_assert_eq!(published, passes as usize);
                    prop_assert!(!coordinator.is_pending(sequence_id));
                } else {
                    prop_assert_eq!(published, 0);
                    prop_assert!(coordinator.is_pending(sequence_id));
                }
            }

            let all = coordinator.all_submitted();
            prop_assert!(!(was_all_submitted && !all));
            was_all_submitted = all;
        }

        prop_assert!(coordinator.all_submitted());
        prop_assert_eq!(decoder.staged_ranges(), 0);
        prop_assert_eq!(decoder.samples().len(), ranges.len() * passes as usize);

        // Each sample carries its own pass's value
        for sample in decoder.samples() {
            let pass: u64 = sample.metric_name[4..sample.metric_name.find("__").unwrap()]
                .parse()
                .unwrap();
            prop_assert_eq!(sample.value, (sample.sequence_id * 100 + pass) as f64);
            prop_assert_eq!(&sample.range_name, &format!("range{}", sample.sequence_id));
        }
    }
}

#[test]
fn test_late_pass_after_abandon_is_discarded() {
    let mut coordinator = coordinator(2);
    coordinator.begin_range(1, "dropped");
    let mut decoder = CounterDecoder::new();

    decoder.decode(vec![buffer(1, 1, 0)], &mut coordinator);
    assert!(coordinator.abandon(1));
    decoder.discard(1);

    let stats = decoder.decode(vec![buffer(2, 1, 1)], &mut coordinator);
    assert_eq!(stats.discarded, 1);
    assert!(decoder.samples().is_empty());
    assert!(coordinator.all_submitted());
}

#[test]
fn test_out_of_range_pass_is_discarded() {
    let mut coordinator = coordinator(1);
    coordinator.begin_range(7, "single");
    let mut decoder = CounterDecoder::new();

    let stats = decoder.decode(vec![buffer(1, 7, 3)], &mut coordinator);
    assert_eq!(stats.discarded, 1);
    assert!(coordinator.is_pending(7));

    let stats = decoder.decode(vec![buffer(2, 7, 0)], &mut coordinator);
    assert_eq!(stats.completed, 1);
    assert_eq!(decoder.samples().len(), 1);
}
