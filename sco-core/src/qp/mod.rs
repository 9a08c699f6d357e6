//! Convex subproblem: assembly, backend contract, built-in ADMM backend.

pub mod admm;
pub mod problem;
pub mod solver;

pub use admm::{AdmmQpSolver, AdmmSettings};
pub use problem::{QpProblem, SqpProblem};
pub use solver::QpSolver;
