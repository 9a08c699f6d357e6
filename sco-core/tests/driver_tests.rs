//! End-to-end tests for the trust-region SQP driver.
//!
//! These use small analytic problems so every branch of the driver state
//! machine (acceptance, shrink, penalty inflation, failure budgets) can be
//! exercised deterministically.

use sco_core::qp::{AdmmQpSolver, QpProblem, QpSolver, SqpProblem};
use sco_core::sparse::{SparseCsc, Triplet};
use sco_core::sqp::{SqpCallback, SqpParams, SqpResults, SqpStatus, TrustRegionSqpSolver};
use sco_core::term::{ComparisonKind, ConstraintTerm, CostTerm, PenaltyKind, TermEval};
use sco_core::variable::VarSlice;
use sco_core::ScoResult;

/// v(x) = x[slice] - target (identity Jacobian).
struct Offset {
    slice: VarSlice,
    target: Vec<f64>,
}

impl Offset {
    fn boxed(slice: VarSlice, target: Vec<f64>) -> Box<dyn TermEval> {
        Box::new(Self { slice, target })
    }
}

impl TermEval for Offset {
    fn rows(&self) -> usize {
        self.target.len()
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        self.slice
            .get(x)
            .iter()
            .zip(self.target.iter())
            .map(|(v, t)| v - t)
            .collect()
    }

    fn jacobian(&self, _x: &[f64]) -> Vec<Triplet> {
        (0..self.target.len())
            .map(|r| (r, self.slice.start + r, 1.0))
            .collect()
    }
}

/// Exact value grows away from the origin while the claimed Jacobian
/// promises steep descent, so every QP step is rejected. Drives the
/// tiny-trust-region convergence path.
struct Deceptive {
    slice: VarSlice,
}

impl TermEval for Deceptive {
    fn rows(&self) -> usize {
        1
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        let v = self.slice.get(x)[0];
        vec![1.0 + v * v]
    }

    fn jacobian(&self, _x: &[f64]) -> Vec<Triplet> {
        vec![(0, self.slice.start, -10.0)]
    }
}

/// Backend that always reports failure.
struct FailingSolver {
    solve_calls: usize,
}

impl QpSolver for FailingSolver {
    fn init(&mut self, _num_vars: usize, _num_constraints: usize) -> ScoResult<()> {
        Ok(())
    }
    fn update_hessian(&mut self, _hessian: &SparseCsc) -> ScoResult<()> {
        Ok(())
    }
    fn update_gradient(&mut self, _gradient: &[f64]) -> ScoResult<()> {
        Ok(())
    }
    fn update_linear_constraints(&mut self, _a: &SparseCsc) -> ScoResult<()> {
        Ok(())
    }
    fn update_bounds(&mut self, _lower: &[f64], _upper: &[f64]) -> ScoResult<()> {
        Ok(())
    }
    fn solve(&mut self) -> bool {
        self.solve_calls += 1;
        false
    }
    fn solution(&self) -> &[f64] {
        &[]
    }
    fn clear(&mut self) {}
}

fn merit_identity_holds(results: &sco_core::SqpResults) -> bool {
    let expected: f64 = results.best_costs.iter().sum::<f64>()
        + results
            .best_constraint_violations
            .iter()
            .zip(results.merit_error_coeffs.iter())
            .map(|(v, c)| v * c)
            .sum::<f64>();
    (results.best_exact_merit - expected).abs() < 1e-9
}

#[test]
fn test_unconstrained_quadratic_converges() {
    // min (x - [1, -2])^2 from [0, 0]
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0, 0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "reach",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![1.0, -2.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let mut solver = TrustRegionSqpSolver::new(AdmmQpSolver::new());
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");
    let x = prob.variable_values();
    assert!((x[0] - 1.0).abs() < 1e-3, "x0 = {}", x[0]);
    assert!((x[1] + 2.0).abs() < 1e-3, "x1 = {}", x[1]);
    assert!(merit_identity_holds(solver.results()));
}

#[test]
fn test_empty_constraint_list_converges_immediately() {
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[5.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "cost",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![5.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let mut solver = TrustRegionSqpSolver::new(AdmmQpSolver::new());
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::NlpConverged);
    assert!(solver.results().best_constraint_violations.is_empty());
    // Already at the optimum; no penalty rounds needed.
    assert_eq!(solver.results().penalty_iteration, 0);
}

#[test]
fn test_penalty_inflation_reaches_equality_constraint() {
    // min x^2  s.t.  x = 5, starting with a penalty far too small to pull
    // the iterate onto the constraint.
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "origin",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![0.0]),
    ))
    .unwrap();
    prob.add_constraint(ConstraintTerm::new(
        "pin",
        ComparisonKind::Eq,
        Offset::boxed(s, vec![5.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let params = SqpParams {
        initial_merit_error_coeff: 0.1,
        initial_trust_box_size: 10.0,
        max_iterations: 200,
        ..Default::default()
    };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");
    let x = prob.variable_values();
    assert!((x[0] - 5.0).abs() < 1e-3, "x = {}", x[0]);

    let results = solver.results();
    // The coefficient must have been inflated at least once and never shrunk.
    assert!(results.penalty_iteration >= 1);
    assert!(results.merit_error_coeffs.iter().all(|&c| c >= 0.1));
    assert!(results.merit_error_coeffs.iter().any(|&c| c > 0.1));
    let max_viol = results
        .best_constraint_violations
        .iter()
        .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    assert!(max_viol < solver.params.cnt_tolerance);
    assert!(merit_identity_holds(results));
}

#[test]
fn test_inequality_constraint_binds() {
    // min (x - 3)^2  s.t.  x - 1 <= 0  ->  x = 1
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "reach",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![3.0]),
    ))
    .unwrap();
    prob.add_constraint(ConstraintTerm::new(
        "cap",
        ComparisonKind::Ineq,
        Offset::boxed(s, vec![1.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let params = SqpParams { initial_trust_box_size: 1.0, ..Default::default() };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");
    let x = prob.variable_values();
    assert!((x[0] - 1.0).abs() < 1e-3, "x = {}", x[0]);
}

#[test]
fn test_time_limit_aborts_within_one_iteration() {
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "reach",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![1.0]),
    ))
    .unwrap();
    prob.add_constraint(ConstraintTerm::new(
        "pin",
        ComparisonKind::Eq,
        Offset::boxed(s, vec![1.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let params = SqpParams { max_time: 0.0, ..Default::default() };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::OptTimeLimit);
    assert_eq!(solver.results().overall_iteration, 0);
}

#[test]
fn test_iteration_limit() {
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "origin",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![0.0]),
    ))
    .unwrap();
    prob.add_constraint(ConstraintTerm::new(
        "pin",
        ComparisonKind::Eq,
        Offset::boxed(s, vec![50.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    // One QP solve is nowhere near enough to reach x = 50 with a small box.
    let params = SqpParams {
        max_iterations: 1,
        initial_merit_error_coeff: 1000.0,
        ..Default::default()
    };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::IterationLimit);
}

#[test]
fn test_callback_stop() {
    struct StopNow;
    impl SqpCallback for StopNow {
        fn execute(&mut self, _problem: &dyn QpProblem, _results: &SqpResults) -> bool {
            false
        }
    }

    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "reach",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![4.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let mut solver = TrustRegionSqpSolver::new(AdmmQpSolver::new());
    solver.register_callback(Box::new(StopNow));
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::CallbackStopped);
    // Stopped during the very first QP step.
    assert_eq!(solver.results().overall_iteration, 1);
}

#[test]
fn test_callback_observes_restored_variables() {
    struct CheckSnapshot;
    impl SqpCallback for CheckSnapshot {
        fn execute(&mut self, problem: &dyn QpProblem, results: &SqpResults) -> bool {
            // Variables must equal the accepted iterate, not the candidate.
            assert_eq!(problem.variable_values(), results.best_var_vals);
            true
        }
    }

    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "reach",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![2.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let mut solver = TrustRegionSqpSolver::new(AdmmQpSolver::new());
    solver.register_callback(Box::new(CheckSnapshot));
    let status = solver.solve(&mut prob);
    assert_eq!(status, SqpStatus::NlpConverged);
}

#[test]
fn test_qp_failure_budget_exhausted() {
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "reach",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![1.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let mut solver = TrustRegionSqpSolver::new(FailingSolver { solve_calls: 0 });
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::QpSolverError);
}

#[test]
fn test_all_steps_rejected_converges_by_tiny_trust_region() {
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[1.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "deceptive",
        PenaltyKind::Squared,
        Box::new(Deceptive { slice: s }),
    ))
    .unwrap();
    prob.setup().unwrap();

    let params = SqpParams { max_iterations: 200, ..Default::default() };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");
    // No step was ever accepted: the iterate is untouched.
    assert!((prob.variable_values()[0] - 1.0).abs() < 1e-12);
    // The box collapsed below the minimum.
    let max_box = solver
        .results()
        .box_size
        .iter()
        .fold(f64::NEG_INFINITY, |a: f64, &b| a.max(b));
    assert!(max_box < solver.params.min_trust_box_size);
}

#[test]
fn test_merit_is_monotone_at_accepted_steps() {
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[4.0, -3.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "reach",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![0.0, 0.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let recorder = sco_core::sqp::IterationRecorder::new();
    let history = recorder.history();

    let mut solver = TrustRegionSqpSolver::new(AdmmQpSolver::new());
    solver.register_callback(Box::new(recorder));
    let status = solver.solve(&mut prob);
    assert_eq!(status, SqpStatus::NlpConverged);

    // No penalty changes happen in an unconstrained problem, so the merit
    // of the accepted iterate never increases across QP steps.
    let h = history.lock().unwrap();
    assert!(!h.best_merits.is_empty());
    for w in h.best_merits.windows(2) {
        assert!(w[1] <= w[0] + 1e-9, "best merit increased: {} -> {}", w[0], w[1]);
    }
}

#[test]
fn test_absolute_penalty_cost() {
    // min |x - 2| with an L1 cost; slack reformulation must drive x to 2.
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[0.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "l1",
        PenaltyKind::Absolute,
        Offset::boxed(s, vec![2.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let params = SqpParams { initial_trust_box_size: 4.0, ..Default::default() };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");
    assert!((prob.variable_values()[0] - 2.0).abs() < 1e-3);
}

#[test]
fn test_hinge_penalty_cost_only_pushes_down() {
    // min hinge(x - 1): any x <= 1 is optimal, so from x = 3 the iterate
    // must land at or below 1 (within tolerance).
    let mut prob = SqpProblem::new();
    let s = prob.add_var_block_unbounded("x", &[3.0]).unwrap();
    prob.add_cost(CostTerm::new(
        "hinge",
        PenaltyKind::Hinge,
        Offset::boxed(s, vec![1.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let params = SqpParams { initial_trust_box_size: 4.0, ..Default::default() };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");
    assert!(prob.variable_values()[0] <= 1.0 + 1e-3);
}

#[test]
fn test_fixed_variable_stays_fixed() {
    // Zero-width bounds pin a DOF; the cost pulls on both entries but only
    // the free one moves.
    let mut prob = SqpProblem::new();
    let s = prob
        .add_var_block("x", &[0.5, 0.0], &[0.5, -10.0], &[0.5, 10.0])
        .unwrap();
    prob.add_cost(CostTerm::new(
        "reach",
        PenaltyKind::Squared,
        Offset::boxed(s, vec![2.0, 2.0]),
    ))
    .unwrap();
    prob.setup().unwrap();

    let mut solver = TrustRegionSqpSolver::new(AdmmQpSolver::new());
    let status = solver.solve(&mut prob);

    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");
    let x = prob.variable_values();
    assert!((x[0] - 0.5).abs() < 1e-5, "fixed entry moved: {}", x[0]);
    assert!((x[1] - 2.0).abs() < 1e-3, "free entry at {}", x[1]);
}
