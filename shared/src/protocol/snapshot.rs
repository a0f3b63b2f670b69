//! Snapshot envelope for saved profiling runs.
//!
//! Binary snapshots use bincode with an explicit config (fixint for lengths
//! and enum tags) so files written by one build decode in another. Files
//! written with bincode's default varint encoding are still accepted on load.
//! JSON is offered for tooling that wants to read results directly.

use crate::types::events::CounterSample;
use crate::types::profile::{MemoryRangeRecord, RangeReport};
use anyhow::{Context, Result};
use bincode::Options;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

fn snapshot_bincode() -> impl bincode::config::Options {
    bincode::config::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// On-disk encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Binary,
}

impl SnapshotFormat {
    /// `.json` files are JSON, everything else is binary
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Binary,
        }
    }
}

/// A complete, self-contained profiling result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub captured_at: DateTime<Utc>,

    /// Free-form label, e.g. the workload name
    #[serde(default)]
    pub label: Option<String>,

    pub report: RangeReport,
    pub memory: Vec<MemoryRangeRecord>,
    pub samples: Vec<CounterSample>,
}

impl Snapshot {
    pub fn new(report: RangeReport, memory: Vec<MemoryRangeRecord>, samples: Vec<CounterSample>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            captured_at: Utc::now(),
            label: None,
            report,
            memory,
            samples,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Serialize to bytes (bincode, fixint encoding).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        snapshot_bincode().serialize(self).map_err(Into::into)
    }

    /// Deserialize from bytes, validating the snapshot version.
    ///
    /// Attempts fixint first, then bincode's default varint encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if let Ok(snapshot) = snapshot_bincode().deserialize::<Self>(bytes) {
            if snapshot.version == SNAPSHOT_VERSION {
                return Ok(snapshot);
            }
        }
        if let Ok(snapshot) = bincode::deserialize::<Self>(bytes) {
            if snapshot.version == SNAPSHOT_VERSION {
                return Ok(snapshot);
            }
        }
        anyhow::bail!("failed to decode snapshot: unsupported encoding or version")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize snapshot to JSON")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(json).context("Failed to parse snapshot JSON")?;
        if snapshot.version != SNAPSHOT_VERSION {
            anyhow::bail!("unsupported snapshot version {}", snapshot.version);
        }
        Ok(snapshot)
    }

    /// Write to `path`, picking the encoding from the extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create snapshot file: {}", path.display()))?;
        let writer = BufWriter::new(file);

        match SnapshotFormat::for_path(path) {
            SnapshotFormat::Json => serde_json::to_writer_pretty(writer, self)
                .context("Failed to serialize snapshot to JSON")?,
            SnapshotFormat::Binary => snapshot_bincode()
                .serialize_into(writer, self)
                .context("Failed to serialize snapshot")?,
        }
        Ok(())
    }

    /// Read from `path`, picking the encoding from the extension
    pub fn load(path: &Path) -> Result<Self> {
        match SnapshotFormat::for_path(path) {
            SnapshotFormat::Json => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open snapshot: {}", path.display()))?;
                let snapshot: Self = serde_json::from_reader(BufReader::new(file))
                    .context("Failed to parse snapshot JSON")?;
                if snapshot.version != SNAPSHOT_VERSION {
                    anyhow::bail!("unsupported snapshot version {}", snapshot.version);
                }
                Ok(snapshot)
            }
            SnapshotFormat::Binary => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
                Self::from_bytes(&bytes)
            }
        }
    }
}
