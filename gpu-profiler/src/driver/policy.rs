//! Pass-count policies
//!
//! Metrics that read counters from the same bank compete for a limited
//! number of physical counters. Whatever does not fit in one collection
//! pass is replayed in another.

use super::DriverError;
use std::collections::BTreeMap;

/// Decides how many replay passes a metric combination needs
pub trait PassPolicy {
    fn required_passes(&self, metrics: &[String]) -> Result<u32, DriverError>;
}

/// First-fit grouping of metrics by counter bank capacity
#[derive(Debug, Clone, Default)]
pub struct CounterBankPolicy {
    /// metric name -> counter bank
    banks: BTreeMap<String, String>,

    /// Counters available per bank in a single pass
    capacity: BTreeMap<String, usize>,

    /// Capacity for banks without an explicit entry
    default_capacity: usize,
}

impl CounterBankPolicy {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            banks: BTreeMap::new(),
            capacity: BTreeMap::new(),
            default_capacity: default_capacity.max(1),
        }
    }

    pub fn with_metric(mut self, metric: impl Into<String>, bank: impl Into<String>) -> Self {
        self.add_metric(metric, bank);
        self
    }

    pub fn with_bank_capacity(mut self, bank: impl Into<String>, capacity: usize) -> Self {
        self.capacity.insert(bank.into(), capacity.max(1));
        self
    }

    pub fn add_metric(&mut self, metric: impl Into<String>, bank: impl Into<String>) {
        self.banks.insert(metric.into(), bank.into());
    }

    pub fn knows(&self, metric: &str) -> bool {
        self.banks.contains_key(metric)
    }

    fn bank_capacity(&self, bank: &str) -> usize {
        self.capacity
            .get(bank)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    /// Split metrics into passes. Pass `i` of the result lists the metrics
    /// collected during replay `i`, in registration order.
    pub fn group(&self, metrics: &[String]) -> Result<Vec<Vec<String>>, DriverError> {
        let mut passes: Vec<(BTreeMap<&str, usize>, Vec<String>)> = Vec::new();

        for metric in metrics {
            let bank = self
                .banks
                .get(metric)
                .ok_or_else(|| DriverError::UnknownMetric(metric.clone()))?;
            let capacity = self.bank_capacity(bank);

            let slot = passes
                .iter_mut()
                .find(|(used, _)| used.get(bank.as_str()).copied().unwrap_or(0) < capacity);

            match slot {
                Some((used, names)) => {
                    *used.entry(bank.as_str()).or_insert(0) += 1;
                    names.push(metric.clone());
                }
                None => {
                    let mut used = BTreeMap::new();
                    used.insert(bank.as_str(), 1);
                    passes.push((used, vec![metric.clone()]));
                }
            }
        }

        Ok(passes.into_iter().map(|(_, names)| names).collect())
    }
}

impl PassPolicy for CounterBankPolicy {
    fn required_passes(&self, metrics: &[String]) -> Result<u32, DriverError> {
        Ok(self.group(metrics)?.len() as u32)
    }
}
