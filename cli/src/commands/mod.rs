pub mod diff;
pub mod report;
pub mod run;
