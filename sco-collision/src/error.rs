//! Error types for collision term construction.

use thiserror::Error;

/// Errors raised while building collision evaluators and constraints.
#[derive(Error, Debug)]
pub enum CollisionError {
    /// Evaluator or constraint configuration failed validation
    #[error("Invalid collision term: {0}")]
    Invalid(String),

    /// Error propagated from problem assembly
    #[error(transparent)]
    Core(#[from] sco_core::ScoError),
}

/// Result type for collision operations.
pub type CollisionResult<T> = Result<T, CollisionError>;
