//! Reduction of repeated samples
//!
//! A range name that runs many times yields many samples per metric. They
//! are folded into one value with SUM, MAX or MEAN. `combine` folds
//! already-reduced partial results so that reducing partitions separately
//! gives the same answer as reducing everything at once.

use gpuprof_shared::types::events::CounterSample;
use gpuprof_shared::types::profile::{AggregatedResult, ReductionMode};

/// Fold raw values. Returns `None` for an empty input.
pub fn reduce_values<I>(values: I, mode: ReductionMode) -> (Option<f64>, u64)
where
    I: IntoIterator<Item = f64>,
{
    let mut count = 0u64;
    let mut sum = 0.0f64;
    let mut max = f64::NEG_INFINITY;

    for value in values {
        count += 1;
        sum += value;
        max = max.max(value);
    }

    if count == 0 {
        return (None, 0);
    }

    let reduced = match mode {
        ReductionMode::Sum => sum,
        ReductionMode::Max => max,
        ReductionMode::Mean => sum / count as f64,
    };
    (Some(reduced), count)
}

/// Reduce every sample of `(range_name, metric_name)`
pub fn reduce(
    samples: &[CounterSample],
    range_name: &str,
    metric_name: &str,
    mode: ReductionMode,
) -> AggregatedResult {
    let values = samples
        .iter()
        .filter(|s| s.range_name == range_name && s.metric_name == metric_name)
        .map(|s| s.value);
    let (reduced_value, sample_count) = reduce_values(values, mode);

    AggregatedResult {
        range_name: range_name.to_string(),
        metric_name: metric_name.to_string(),
        reduced_value,
        sample_count,
    }
}

/// Combine partial results that were reduced with the same `mode`.
///
/// Partials without data are skipped. Names are taken from the first partial.
pub fn combine(partials: &[AggregatedResult], mode: ReductionMode) -> AggregatedResult {
    let (range_name, metric_name) = partials
        .first()
        .map(|p| (p.range_name.clone(), p.metric_name.clone()))
        .unwrap_or_default();

    let mut any = false;
    let mut sample_count = 0u64;
    let mut sum = 0.0f64;
    let mut weighted = 0.0f64;
    let mut max = f64::NEG_INFINITY;

    for (value, count) in partials
        .iter()
        .filter_map(|p| p.reduced_value.map(|v| (v, p.sample_count)))
    {
        any = true;
        sample_count += count;
        sum += value;
        weighted += value * count as f64;
        max = max.max(value);
    }

    let reduced_value = match mode {
        _ if !any => None,
        ReductionMode::Sum => Some(sum),
        ReductionMode::Max => Some(max),
        ReductionMode::Mean if sample_count == 0 => None,
        ReductionMode::Mean => Some(weighted / sample_count as f64),
    };

    AggregatedResult {
        range_name,
        metric_name,
        reduced_value,
        sample_count,
    }
}
