//! Error types for problem assembly and the QP backend boundary.

use thiserror::Error;

/// Errors that can occur while assembling or updating an SCO problem.
#[derive(Error, Debug)]
pub enum ScoError {
    /// Problem or term construction failed validation
    #[error("Invalid problem: {0}")]
    InvalidProblem(String),

    /// A variable block was misconfigured (sizes, bounds, duplicate names)
    #[error("Invalid variable block: {0}")]
    InvalidVariable(String),

    /// QP backend rejected an update or was used out of order
    #[error("QP backend error: {0}")]
    Backend(String),
}

/// Result type for SCO operations.
pub type ScoResult<T> = Result<T, ScoError>;
