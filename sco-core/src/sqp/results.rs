//! Solver status and cross-iteration state.

use std::fmt;

/// Terminal (and transient) states of the trust-region SQP driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqpStatus {
    /// Solve in progress
    Running,
    /// NLP converged: constraints satisfied and no further local progress
    NlpConverged,
    /// Overall iteration budget exhausted
    IterationLimit,
    /// Wall-clock budget exhausted
    OptTimeLimit,
    /// Penalty iteration budget exhausted without reaching feasibility
    PenaltyIterationLimit,
    /// Convex backend failed beyond the retry budget
    QpSolverError,
    /// A callback requested termination
    CallbackStopped,
}

impl fmt::Display for SqpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqpStatus::Running => write!(f, "Running"),
            SqpStatus::NlpConverged => write!(f, "NLP Converged"),
            SqpStatus::IterationLimit => write!(f, "Iteration Limit"),
            SqpStatus::OptTimeLimit => write!(f, "Time Limit"),
            SqpStatus::PenaltyIterationLimit => write!(f, "Penalty Iteration Limit"),
            SqpStatus::QpSolverError => write!(f, "QP Solver Error"),
            SqpStatus::CallbackStopped => write!(f, "Callback Stopped"),
        }
    }
}

/// State carried across the driver's nested loops.
///
/// `best_*` refer to the accepted iterate, `new_*` to the most recent QP
/// candidate, `*_approx_*` to values of the convexified model. The merit
/// identity `best_exact_merit = sum(best_costs) +
/// best_constraint_violations . merit_error_coeffs` holds between driver
/// steps.
#[derive(Debug, Clone, Default)]
pub struct SqpResults {
    pub best_var_vals: Vec<f64>,
    pub new_var_vals: Vec<f64>,

    pub best_exact_merit: f64,
    pub new_exact_merit: f64,
    pub best_approx_merit: f64,
    pub new_approx_merit: f64,

    pub best_costs: Vec<f64>,
    pub new_costs: Vec<f64>,
    pub best_approx_costs: Vec<f64>,
    pub new_approx_costs: Vec<f64>,

    pub best_constraint_violations: Vec<f64>,
    pub new_constraint_violations: Vec<f64>,
    pub best_approx_constraint_violations: Vec<f64>,
    pub new_approx_constraint_violations: Vec<f64>,

    /// Per-constraint-row penalty weights; only ever grow.
    pub merit_error_coeffs: Vec<f64>,

    pub approx_merit_improve: f64,
    pub exact_merit_improve: f64,
    pub merit_improve_ratio: f64,

    /// Per-variable trust-region half-widths.
    pub box_size: Vec<f64>,

    pub overall_iteration: usize,
    pub convexify_iteration: usize,
    pub trust_region_iteration: usize,
    pub penalty_iteration: usize,
}

impl SqpResults {
    pub fn new(num_vars: usize, num_constraints: usize, num_costs: usize) -> Self {
        Self {
            best_var_vals: vec![0.0; num_vars],
            new_var_vals: vec![0.0; num_vars],
            best_costs: vec![0.0; num_costs],
            new_costs: vec![0.0; num_costs],
            best_approx_costs: vec![0.0; num_costs],
            new_approx_costs: vec![0.0; num_costs],
            best_constraint_violations: vec![0.0; num_constraints],
            new_constraint_violations: vec![0.0; num_constraints],
            best_approx_constraint_violations: vec![0.0; num_constraints],
            new_approx_constraint_violations: vec![0.0; num_constraints],
            merit_error_coeffs: vec![0.0; num_constraints],
            box_size: vec![0.0; num_vars],
            ..Default::default()
        }
    }
}

/// `a . b` for merit bookkeeping.
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
