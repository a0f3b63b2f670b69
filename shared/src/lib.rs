//! Shared types and utilities for gpuprof
//!
//! This crate contains the data structures exchanged between the profiling
//! engine, its drivers and the command-line front end: ranges, counter
//! samples, memory events, reductions and the report/snapshot formats.

pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::{events::*, profile::*, range::*};
