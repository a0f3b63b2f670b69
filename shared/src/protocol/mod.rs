//! Persisted formats
//!
//! Snapshots let a profiling run be saved and re-rendered or diffed later
//! without the device that produced it.

pub mod snapshot;
