//! Error types for medir
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for medir operations
pub type Result<T> = std::result::Result<T, MedirError>;

/// Error type for all medir operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MedirError {
    /// A request or configuration value is not usable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Measurement or coordination failed inside the client
    #[error("internal error: {0}")]
    Internal(String),

    /// No completed asynchronous request is ready yet
    ///
    /// Returned by non-blocking completion polls; callers treat it as
    /// "come back later", not as a failure.
    #[error("no completed request ready")]
    Unavailable,

    /// The inference service reported an error
    #[error("server error: {0}")]
    Server(String),
}

impl MedirError {
    /// True when the error is the non-blocking "nothing ready" signal
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}
