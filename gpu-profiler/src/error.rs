//! Engine error and result-code types

use crate::driver::DriverError;
use thiserror::Error;

/// Errors raised by profiler operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfilerError {
    #[error("profiler is not initialized")]
    NotInitialized,

    /// Pop arguments do not match the innermost open range
    #[error("mismatched range: innermost open range is {expected}, pop requested {found}")]
    MismatchedRange { expected: String, found: String },

    #[error("no open range to pop")]
    EmptyStack,

    /// The current metric set still has passes outstanding
    #[error("metric set is still collecting: {outstanding} range(s) have passes outstanding")]
    MetricSetConflict { outstanding: usize },

    #[error("driver failure: {0}")]
    Driver(#[from] DriverError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ProfilerError {
    pub fn code(&self) -> ResultCode {
        match self {
            ProfilerError::NotInitialized | ProfilerError::Config(_) => ResultCode::NotInitialized,
            ProfilerError::MismatchedRange { .. } => ResultCode::MismatchedRange,
            ProfilerError::EmptyStack => ResultCode::EmptyStack,
            ProfilerError::MetricSetConflict { .. } => ResultCode::MetricSetConflict,
            ProfilerError::Driver(_) => ResultCode::DriverFailure,
        }
    }
}

/// Integer status returned by `push_range` / `pop_range`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Success = 0,
    NotInitialized = 1,
    MismatchedRange = 2,
    EmptyStack = 3,
    MetricSetConflict = 4,
    DriverFailure = 5,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&ProfilerError> for ResultCode {
    fn from(err: &ProfilerError) -> Self {
        err.code()
    }
}

impl<T> From<&Result<T, ProfilerError>> for ResultCode {
    fn from(result: &Result<T, ProfilerError>) -> Self {
        match result {
            Ok(_) => ResultCode::Success,
            Err(e) => e.code(),
        }
    }
}
