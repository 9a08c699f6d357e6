//! Error types for term construction.

use thiserror::Error;

/// Errors raised while building terms or constructing a problem from a
/// request.
#[derive(Error, Debug)]
pub enum TermError {
    /// Term configuration failed validation
    #[error("Invalid term: {0}")]
    Invalid(String),

    /// Inverse kinematics could not produce a seed
    #[error("IK failed: {0}")]
    IkFailure(String),

    /// Problem request was malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error propagated from problem assembly
    #[error(transparent)]
    Core(#[from] sco_core::ScoError),
}

/// Result type for term operations.
pub type TermResult<T> = Result<T, TermError>;
