//! Data model shared by the engine, drivers and reports

pub mod diff;
pub mod events;
pub mod profile;
pub mod range;
