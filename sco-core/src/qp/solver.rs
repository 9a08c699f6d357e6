//! QP backend contract.
//!
//! The SQP driver treats the convex backend as a black box behind this
//! trait: upload the convexified problem, solve, read the solution back.
//! `H` is the upper triangle of a PSD matrix in CSC; `A` stacks the
//! linearized constraint rows and the box/bound rows.

use crate::error::ScoResult;
use crate::sparse::SparseCsc;

/// Black-box sparse QP backend:
///
/// ```text
/// minimize    (1/2) x^T H x + g^T x
/// subject to  lo <= A x <= hi
/// ```
pub trait QpSolver {
    /// Prepare for a problem of the given size. Must be called before any
    /// update. Backends may allocate here.
    fn init(&mut self, num_vars: usize, num_constraints: usize) -> ScoResult<()>;

    /// Upload the quadratic cost matrix (upper triangle, CSC, PSD).
    fn update_hessian(&mut self, hessian: &SparseCsc) -> ScoResult<()>;

    /// Upload the linear cost vector.
    fn update_gradient(&mut self, gradient: &[f64]) -> ScoResult<()>;

    /// Upload the constraint matrix (linear constraints + box rows).
    fn update_linear_constraints(&mut self, a: &SparseCsc) -> ScoResult<()>;

    /// Upload constraint bounds. Rows with `lo == hi` are equalities.
    fn update_bounds(&mut self, lower: &[f64], upper: &[f64]) -> ScoResult<()>;

    /// Solve the current problem. Returns false on failure (infeasible,
    /// numerical breakdown, iteration exhaustion).
    fn solve(&mut self) -> bool;

    /// Solution of the most recent successful solve.
    fn solution(&self) -> &[f64];

    /// Drop all problem data; `init` must be called again before reuse.
    fn clear(&mut self);
}
