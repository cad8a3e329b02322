//! Error types for host operations

use thiserror::Error;

/// Errors raised by host operations
///
/// Strategy failures are not errors: they are recorded as
/// [`crate::AttemptStatus`] values inside an [`crate::Outcome`].
#[derive(Debug, Error)]
pub enum HostError {
    /// Delayed action requested with a non-positive delay
    #[error("Delay must be a positive number of seconds, got {0}")]
    InvalidDelay(i64),
    
    /// A recipe placeholder had no value for this invocation
    #[error("Placeholder {{{0}}} has no value in this invocation")]
    Unbound(&'static str),
    
    /// The delayed action could not be started
    #[error("Failed to schedule action: {0}")]
    Schedule(String),
    
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
