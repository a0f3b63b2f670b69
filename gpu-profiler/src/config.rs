//! Profiler configuration
//!
//! Defaults can be overridden through `GPUPROF_*` environment variables or a
//! TOML file; `validate` is run by `Profiler::init`.

use crate::driver::DriverSettings;
use anyhow::{Context, Result};
use gpuprof_shared::types::profile::ReductionMode;
use gpuprof_shared::utils::parse_duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Maximum number of kernel ranges profiled per collection (None = unlimited)
    pub max_ranges: Option<usize>,

    /// Shallowest nesting level that is profiled (1 = outermost)
    pub min_nesting_level: u32,

    /// Number of nesting levels profiled, starting at `min_nesting_level`
    pub nesting_levels: u32,

    /// Driver polls per `decode_counter_data` call before giving up
    pub decode_poll_attempts: u32,

    /// Initial wait between polls; doubles on each attempt
    #[serde(with = "duration_str")]
    pub decode_poll_interval: Duration,

    /// Return `NotInitialized` from push/pop before `init` instead of ignoring them
    pub strict_lifecycle: bool,

    /// Reduction used when the caller does not name one
    pub default_reduction: ReductionMode,

    /// Metrics registered as part of `init`
    pub metrics: Vec<String>,

    pub device_index: u32,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            max_ranges: env_parse("GPUPROF_MAX_RANGES"),
            min_nesting_level: env_parse("GPUPROF_MIN_NESTING_LEVEL").unwrap_or(1),
            nesting_levels: env_parse("GPUPROF_NESTING_LEVELS").unwrap_or(16),
            decode_poll_attempts: env_parse("GPUPROF_DECODE_POLL_ATTEMPTS").unwrap_or(8),
            decode_poll_interval: std::env::var("GPUPROF_DECODE_POLL_INTERVAL")
                .ok()
                .and_then(|s| parse_duration(&s).ok())
                .unwrap_or(Duration::from_millis(1)),
            strict_lifecycle: std::env::var("GPUPROF_STRICT_LIFECYCLE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            default_reduction: std::env::var("GPUPROF_REDUCTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            metrics: std::env::var("GPUPROF_METRICS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            device_index: env_parse("GPUPROF_DEVICE").unwrap_or(0),
        }
    }
}

impl ProfilerConfig {
    /// Load from a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML config")
    }

    /// Last profiled nesting level (inclusive)
    pub fn max_nesting_level(&self) -> u32 {
        self.min_nesting_level
            .saturating_add(self.nesting_levels)
            .saturating_sub(1)
    }

    /// Whether a range at `depth` (1-based) falls inside the profiled levels
    pub fn profiles_depth(&self, depth: usize) -> bool {
        depth >= self.min_nesting_level as usize && depth <= self.max_nesting_level() as usize
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            device_index: self.device_index,
            max_ranges: self.max_ranges,
            min_nesting_level: self.min_nesting_level,
            nesting_levels: self.nesting_levels,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.decode_poll_attempts == 0 {
            anyhow::bail!("decode_poll_attempts must be greater than 0");
        }

        if self.min_nesting_level == 0 {
            anyhow::bail!("min_nesting_level starts at 1 (outermost range)");
        }

        if self.nesting_levels == 0 {
            anyhow::bail!("nesting_levels must be greater than 0");
        }

        if self.decode_poll_interval > Duration::from_secs(1) {
            anyhow::bail!("decode_poll_interval too long (max 1s)");
        }

        if self.metrics.iter().any(|m| m.trim().is_empty()) {
            anyhow::bail!("metric names must not be empty");
        }

        Ok(())
    }
}

/// Durations as human-readable strings ("1ms", "250us", "1500ns")
mod duration_str {
    use gpuprof_shared::utils::parse_duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        // Coarsest unit that loses nothing
        let nanos = value.as_nanos();
        if nanos % 1_000_000 == 0 {
            serializer.serialize_str(&format!("{}ms", nanos / 1_000_000))
        } else if nanos % 1000 == 0 {
            serializer.serialize_str(&format!("{}us", nanos / 1000))
        } else {
            serializer.serialize_str(&format!("{}ns", nanos))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
