//! Error types for Monitor stream operations.

use thiserror::Error;

/// Errors that can occur in stream operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Gap range with a lower bound above its upper bound
    #[error("Invalid gap range for {group}/{unit}: {min} > {max}")]
    InvalidRange {
        /// Group name
        group: String,
        /// Unit name
        unit: String,
        /// Lower bound
        min: u64,
        /// Upper bound
        max: u64,
    },
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
