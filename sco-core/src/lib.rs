//! Sequential convex optimization core for trajectory optimization.
//!
//! This crate implements the solver half of an SCO trajectory optimizer:
//! a trust-region SQP driver that repeatedly linearizes a non-convex NLP,
//! solves the resulting QP inside an axis-aligned trust box, and raises
//! constraint penalties until the NLP is feasible and locally optimal.
//!
//! # Pieces
//!
//! - [`qp::SqpProblem`]: the convex subproblem — sparse Hessian, gradient,
//!   stacked constraint matrix and bounds, rebuilt by `convexify` around
//!   the current iterate, with slack reformulation of non-smooth penalties.
//! - [`qp::QpSolver`]: the backend contract; [`qp::AdmmQpSolver`] is the
//!   built-in operator-splitting implementation.
//! - [`sqp::TrustRegionSqpSolver`]: the driver state machine — penalty,
//!   convexification and trust-region loops with merit-based step
//!   acceptance.
//! - [`term`]: the tagged cost/constraint model over the thin
//!   [`term::TermEval`] evaluator trait.
//!
//! # Example
//!
//! ```ignore
//! use sco_core::qp::{AdmmQpSolver, QpProblem, SqpProblem};
//! use sco_core::sqp::{SqpStatus, TrustRegionSqpSolver};
//! use sco_core::term::{CostTerm, PenaltyKind};
//!
//! let mut problem = SqpProblem::new();
//! let x = problem.add_var_block_unbounded("x", &[0.0, 0.0])?;
//! problem.add_cost(CostTerm::new("reach", PenaltyKind::Squared, my_eval(x)))?;
//! problem.setup()?;
//!
//! let mut solver = TrustRegionSqpSolver::new(AdmmQpSolver::new());
//! let status = solver.solve(&mut problem);
//! assert_eq!(status, SqpStatus::NlpConverged);
//! ```
//!
//! The driver is single threaded and cooperative; the only optional
//! concurrency is block-parallel evaluation inside the problem
//! (`SqpProblem::set_parallel`), which reduces in deterministic block order.

#![warn(clippy::all)]

pub mod error;
pub mod qp;
pub mod sparse;
pub mod sqp;
pub mod term;
pub mod variable;

pub use error::{ScoError, ScoResult};
pub use qp::{AdmmQpSolver, QpProblem, QpSolver, SqpProblem};
pub use sqp::{SqpCallback, SqpParams, SqpResults, SqpStatus, TrustRegionSqpSolver};
pub use term::{ComparisonKind, ConstraintTerm, CostTerm, PenaltyKind, TermEval};
pub use variable::{VarSlice, VariableRegistry};
