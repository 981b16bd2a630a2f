//! Core error types

use thiserror::Error;

/// Core error type for Monitor
#[derive(Debug, Error)]
pub enum CoreError {
    /// Value payload is not valid base64
    #[error("Value decode error: {0}")]
    ValueDecode(#[from] base64::DecodeError),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
