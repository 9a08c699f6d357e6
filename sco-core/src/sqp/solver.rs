//! Trust-region SQP driver.
//!
//! Three nested iterations around the convex subproblem:
//!
//! 1. **Penalty loop** — raises merit coefficients until constraints are
//!    satisfied (or the penalty budget runs out).
//! 2. **Convexification loop** — re-linearizes the NLP at the accepted
//!    iterate and re-uploads the QP (internally capped at 100 rounds).
//! 3. **Trust-region loop** — solves the QP, compares exact and
//!    approximate merit improvement, and accepts/expands or
//!    rejects/shrinks until the box collapses.
//!
//! Based on: Schulman et al., "Finding Locally Optimal, Collision-Free
//! Trajectories with Sequential Convex Optimization" (RSS 2013).

use std::time::Instant;

use crate::error::ScoResult;
use crate::qp::problem::QpProblem;
use crate::qp::solver::QpSolver;
use crate::sqp::callback::SqpCallback;
use crate::sqp::results::{dot, SqpResults, SqpStatus};

/// Driver parameters. Defaults follow the reference trajectory-optimization
/// settings: conservative shrink (0.1), mild expansion (1.5), tenfold
/// penalty growth.
#[derive(Debug, Clone)]
pub struct SqpParams {
    /// Penalty applied to each constraint row at `init`
    pub initial_merit_error_coeff: f64,
    /// Multiplier applied on every penalty iteration
    pub merit_coeff_increase_ratio: f64,
    /// Penalty loop budget
    pub max_merit_coeff_increases: usize,
    /// Inflate only the rows violating `cnt_tolerance` instead of all rows
    pub inflate_constraints_individually: bool,

    /// Trust-region half-width applied at `init`
    pub initial_trust_box_size: f64,
    /// Box collapse threshold; below this the NLP counts as converged
    pub min_trust_box_size: f64,
    /// Box multiplier on a rejected step, in (0, 1)
    pub trust_shrink_ratio: f64,
    /// Box multiplier on an accepted step, > 1
    pub trust_expand_ratio: f64,

    /// Minimum exact/approx improvement ratio for a step to be accepted
    pub improve_ratio_threshold: f64,
    /// Approximate improvement below which the NLP counts as converged
    pub min_approx_improve: f64,
    /// Approximate improvement, as a fraction of the current merit, below
    /// which the NLP counts as converged
    pub min_approx_improve_frac: f64,
    /// Constraint satisfaction tolerance
    pub cnt_tolerance: f64,

    /// Overall iteration budget (QP solves)
    pub max_iterations: usize,
    /// Consecutive backend failures tolerated inside one trust-region loop
    pub max_qp_solver_failures: usize,
    /// Wall-clock budget in seconds
    pub max_time: f64,

    /// Print the per-step merit table
    pub verbose: bool,
}

impl Default for SqpParams {
    fn default() -> Self {
        Self {
            initial_merit_error_coeff: 10.0,
            merit_coeff_increase_ratio: 10.0,
            max_merit_coeff_increases: 5,
            inflate_constraints_individually: true,
            initial_trust_box_size: 1e-1,
            min_trust_box_size: 1e-4,
            trust_shrink_ratio: 1e-1,
            trust_expand_ratio: 1.5,
            improve_ratio_threshold: 0.25,
            min_approx_improve: 1e-4,
            min_approx_improve_frac: f64::NEG_INFINITY,
            cnt_tolerance: 1e-4,
            max_iterations: 50,
            max_qp_solver_failures: 3,
            max_time: f64::INFINITY,
            verbose: false,
        }
    }
}

/// Driver trace lines, enabled with `SCO_DEBUG=1`.
#[derive(Debug, Clone, Copy)]
struct ScoDebug {
    enabled: bool,
}

impl ScoDebug {
    fn from_env() -> Self {
        Self {
            enabled: std::env::var("SCO_DEBUG").map(|s| s == "1").unwrap_or(false),
        }
    }
}

macro_rules! trace {
    ($dbg:expr, $($arg:tt)*) => {
        if $dbg.enabled {
            eprintln!($($arg)*);
        }
    };
}

/// The trust-region SQP state machine.
pub struct TrustRegionSqpSolver<S: QpSolver> {
    pub params: SqpParams,
    qp_solver: S,
    callbacks: Vec<Box<dyn SqpCallback>>,
    results: SqpResults,
    status: SqpStatus,
    debug: ScoDebug,
}

impl<S: QpSolver> TrustRegionSqpSolver<S> {
    pub fn new(qp_solver: S) -> Self {
        Self {
            params: SqpParams::default(),
            qp_solver,
            callbacks: Vec::new(),
            results: SqpResults::default(),
            status: SqpStatus::Running,
            debug: ScoDebug::from_env(),
        }
    }

    pub fn with_params(qp_solver: S, params: SqpParams) -> Self {
        Self { params, ..Self::new(qp_solver) }
    }

    pub fn register_callback(&mut self, callback: Box<dyn SqpCallback>) {
        self.callbacks.push(callback);
    }

    pub fn results(&self) -> &SqpResults {
        &self.results
    }

    pub fn status(&self) -> SqpStatus {
        self.status
    }

    /// Run the solver. On return the problem variables are set to the best
    /// iterate and [`Self::results`] holds the final state.
    pub fn solve(&mut self, problem: &mut dyn QpProblem) -> SqpStatus {
        self.status = SqpStatus::Running;
        let start = Instant::now();

        self.init(problem);

        for penalty_iteration in 0..self.params.max_merit_coeff_increases {
            self.results.penalty_iteration = penalty_iteration;
            self.results.convexify_iteration = 0;

            // Convexification loop; capped internally as a safety net
            // regardless of `max_iterations`.
            for _ in 1..100 {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > self.params.max_time {
                    eprintln!(
                        "sqp: elapsed time {:.3}s has exceeded max time {:.3}s",
                        elapsed, self.params.max_time
                    );
                    self.status = SqpStatus::OptTimeLimit;
                    break;
                }

                if self.results.overall_iteration >= self.params.max_iterations {
                    eprintln!("sqp: iteration limit");
                    self.status = SqpStatus::IterationLimit;
                    break;
                }

                if self.step_sqp_solver(problem) {
                    break;
                }
            }

            // Terminal failures first: a user abort or an exhausted backend
            // must not be reinterpreted as convergence.
            if matches!(self.status, SqpStatus::QpSolverError | SqpStatus::CallbackStopped) {
                break;
            }

            // Feasibility check; a converged-but-infeasible problem moves on
            // to penalty adjustment.
            if self.verify_convergence() {
                self.status = SqpStatus::NlpConverged;
                break;
            }

            if matches!(self.status, SqpStatus::IterationLimit | SqpStatus::OptTimeLimit) {
                break;
            }

            self.status = SqpStatus::Running;
            self.adjust_penalty(problem);
        }

        if self.status == SqpStatus::Running {
            self.status = SqpStatus::PenaltyIterationLimit;
            eprintln!("sqp: penalty iteration limit, could not satisfy all constraints");
        }

        problem.set_variables(&self.results.best_var_vals);
        self.status
    }

    /// Reset results and evaluate the exact state at the initial iterate.
    /// Called by [`Self::solve`]; exposed so the initial exact evaluation
    /// can be inspected separately.
    pub fn init(&mut self, problem: &mut dyn QpProblem) {
        self.results = SqpResults::new(
            problem.num_nlp_vars(),
            problem.num_nlp_constraints(),
            problem.num_nlp_costs(),
        );
        self.results.best_var_vals = problem.variable_values();
        self.results.merit_error_coeffs =
            vec![self.params.initial_merit_error_coeff; problem.num_nlp_constraints()];
        self.results.best_costs = problem.exact_costs();
        self.results.best_constraint_violations = problem.exact_constraint_violations();
        self.set_uniform_box_size(problem, self.params.initial_trust_box_size);
        self.constraint_merit_coeff_changed(problem);
    }

    fn set_uniform_box_size(&mut self, problem: &mut dyn QpProblem, size: f64) {
        problem.set_box_size(&vec![size; problem.num_nlp_vars()]);
        self.results.box_size = problem.box_size();
    }

    /// Recompute the best merit under the current coefficients.
    fn constraint_merit_coeff_changed(&mut self, problem: &mut dyn QpProblem) {
        problem.set_constraint_merit_coeff(&self.results.merit_error_coeffs);
        self.results.best_exact_merit = self.results.best_costs.iter().sum::<f64>()
            + dot(
                &self.results.best_constraint_violations,
                &self.results.merit_error_coeffs,
            );
    }

    fn verify_convergence(&self) -> bool {
        if self.results.best_constraint_violations.is_empty() {
            eprintln!("sqp: converged, no constraints");
            return true;
        }
        let max_viol = self
            .results
            .best_constraint_violations
            .iter()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        if max_viol < self.params.cnt_tolerance {
            trace!(self.debug, "sqp: constraints satisfied to tolerance {:.2e}", self.params.cnt_tolerance);
            return true;
        }
        false
    }

    /// Raise merit coefficients and re-open the trust region.
    fn adjust_penalty(&mut self, problem: &mut dyn QpProblem) {
        if self.params.inflate_constraints_individually {
            debug_assert_eq!(
                self.results.best_constraint_violations.len(),
                self.results.merit_error_coeffs.len()
            );
            for idx in 0..self.results.best_constraint_violations.len() {
                if self.results.best_constraint_violations[idx] > self.params.cnt_tolerance {
                    trace!(self.debug, "sqp: raising constraint penalty for row {idx}");
                    self.results.merit_error_coeffs[idx] *= self.params.merit_coeff_increase_ratio;
                }
            }
        } else {
            trace!(self.debug, "sqp: raising constraint penalties uniformly");
            for c in &mut self.results.merit_error_coeffs {
                *c *= self.params.merit_coeff_increase_ratio;
            }
        }

        // Deliberately re-opens the trust region after a penalty change.
        let new_size = self.results.box_size[0]
            .max(self.params.min_trust_box_size / self.params.trust_shrink_ratio * 1.5);
        self.set_uniform_box_size(problem, new_size);
        self.constraint_merit_coeff_changed(problem);
    }

    /// One convexification round. Returns true when the outer loop should
    /// stop iterating (converged or terminal failure).
    fn step_sqp_solver(&mut self, problem: &mut dyn QpProblem) -> bool {
        self.results.convexify_iteration += 1;
        problem.convexify();

        self.qp_solver.clear();
        if let Err(e) = self.upload_problem(problem) {
            eprintln!("sqp: QP upload failed: {e}");
            self.status = SqpStatus::QpSolverError;
            return true;
        }

        self.run_trust_region_loop(problem);

        if self.status == SqpStatus::NlpConverged {
            return true;
        }
        if matches!(self.status, SqpStatus::QpSolverError | SqpStatus::CallbackStopped) {
            return true;
        }

        let max_box = self.results.box_size.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        if max_box < self.params.min_trust_box_size {
            eprintln!("sqp: converged because trust region is tiny");
            self.status = SqpStatus::NlpConverged;
            return true;
        }
        false
    }

    fn upload_problem(&mut self, problem: &dyn QpProblem) -> ScoResult<()> {
        self.qp_solver
            .init(problem.num_qp_vars(), problem.num_qp_constraints())?;
        self.qp_solver.update_hessian(problem.hessian())?;
        self.qp_solver.update_gradient(problem.gradient())?;
        self.qp_solver
            .update_linear_constraints(problem.constraint_matrix())?;
        self.qp_solver
            .update_bounds(problem.bounds_lower(), problem.bounds_upper())
    }

    /// Push the problem's current bounds into the backend after a box change.
    fn sync_box(&mut self, problem: &dyn QpProblem) {
        if let Err(e) = self
            .qp_solver
            .update_bounds(problem.bounds_lower(), problem.bounds_upper())
        {
            eprintln!("sqp: bound update failed: {e}");
            self.status = SqpStatus::QpSolverError;
        }
        self.results.box_size = problem.box_size();
    }

    fn run_trust_region_loop(&mut self, problem: &mut dyn QpProblem) {
        self.results.trust_region_iteration = 0;
        let mut qp_solver_failures = 0usize;

        loop {
            let max_box = self.results.box_size.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            if max_box < self.params.min_trust_box_size {
                return;
            }

            self.results.overall_iteration += 1;
            self.results.trust_region_iteration += 1;

            self.status = self.solve_qp_problem(problem);

            if self.status == SqpStatus::CallbackStopped {
                return;
            }

            if self.status != SqpStatus::Running {
                qp_solver_failures += 1;
                eprintln!(
                    "sqp: convex solver failed ({}/{})",
                    qp_solver_failures, self.params.max_qp_solver_failures
                );

                if qp_solver_failures < self.params.max_qp_solver_failures {
                    problem.scale_box_size(self.params.trust_shrink_ratio);
                    self.sync_box(problem);
                    trace!(self.debug, "sqp: shrunk trust region, box size {:.4}", self.results.box_size[0]);
                    continue;
                }

                if qp_solver_failures == self.params.max_qp_solver_failures {
                    // Last attempt: pin the trust region to the minimum.
                    problem.set_box_size(&vec![
                        self.params.min_trust_box_size;
                        problem.num_nlp_vars()
                    ]);
                    self.sync_box(problem);
                    trace!(self.debug, "sqp: shrunk trust region to minimum, box size {:.4}", self.results.box_size[0]);
                    continue;
                }

                eprintln!("sqp: convex solver failed beyond the retry budget");
                return;
            }

            if self.results.approx_merit_improve < -1e-5 {
                eprintln!(
                    "sqp: approximate merit got worse ({:.3e}); convexification is wrong to zeroth order",
                    self.results.approx_merit_improve
                );
            }

            if self.results.approx_merit_improve < self.params.min_approx_improve {
                trace!(
                    self.debug,
                    "sqp: converged, improvement was small ({:.3e} < {:.3e})",
                    self.results.approx_merit_improve,
                    self.params.min_approx_improve
                );
                self.status = SqpStatus::NlpConverged;
                return;
            }

            if self.results.approx_merit_improve / self.results.best_exact_merit
                < self.params.min_approx_improve_frac
            {
                trace!(
                    self.debug,
                    "sqp: converged, improvement ratio was small ({:.3e} < {:.3e})",
                    self.results.approx_merit_improve / self.results.best_exact_merit,
                    self.params.min_approx_improve_frac
                );
                self.status = SqpStatus::NlpConverged;
                return;
            }

            if self.results.exact_merit_improve < 0.0
                || self.results.merit_improve_ratio < self.params.improve_ratio_threshold
            {
                // Exact got worse, or the QP model deviates too much.
                problem.scale_box_size(self.params.trust_shrink_ratio);
                self.sync_box(problem);
                trace!(self.debug, "sqp: shrunk trust region, box size {:.4}", self.results.box_size[0]);
            } else {
                self.accept_step();
                problem.set_variables(&self.results.best_var_vals);
                problem.scale_box_size(self.params.trust_expand_ratio);
                self.sync_box(problem);
                trace!(self.debug, "sqp: expanded trust region, box size {:.4}", self.results.box_size[0]);
                return;
            }
        }
    }

    fn accept_step(&mut self) {
        let r = &mut self.results;
        r.best_var_vals.clone_from(&r.new_var_vals);
        r.best_exact_merit = r.new_exact_merit;
        r.best_constraint_violations
            .clone_from(&r.new_constraint_violations);
        r.best_costs.clone_from(&r.new_costs);
        r.best_approx_merit = r.new_approx_merit;
        r.best_approx_constraint_violations
            .clone_from(&r.new_approx_constraint_violations);
        r.best_approx_costs.clone_from(&r.new_approx_costs);
    }

    /// Solve the current QP and evaluate the candidate under both the
    /// convex model and the exact NLP.
    fn solve_qp_problem(&mut self, problem: &mut dyn QpProblem) -> SqpStatus {
        if !self.qp_solver.solve() {
            problem.set_variables(&self.results.best_var_vals);
            eprintln!("sqp: convex backend reported failure");
            return SqpStatus::QpSolverError;
        }

        let n = problem.num_nlp_vars();
        let new_vals: Vec<f64> = self.qp_solver.solution()[..n].to_vec();
        self.results.new_var_vals = new_vals;
        problem.set_variables(&self.results.new_var_vals);

        // Convex model at the candidate (cheap).
        self.results.new_approx_constraint_violations =
            problem.evaluate_convex_constraint_violations(&self.results.new_var_vals);
        self.results.new_approx_costs = problem.evaluate_convex_costs(&self.results.new_var_vals);
        self.results.new_approx_merit = self.results.new_approx_costs.iter().sum::<f64>()
            + dot(
                &self.results.new_approx_constraint_violations,
                &self.results.merit_error_coeffs,
            );
        self.results.approx_merit_improve =
            self.results.best_exact_merit - self.results.new_approx_merit;

        // Exact NLP at the candidate (expensive).
        self.results.new_costs = problem.evaluate_exact_costs(&self.results.new_var_vals);
        self.results.new_constraint_violations =
            problem.evaluate_exact_constraint_violations(&self.results.new_var_vals);
        self.results.new_exact_merit = self.results.new_costs.iter().sum::<f64>()
            + dot(
                &self.results.new_constraint_violations,
                &self.results.merit_error_coeffs,
            );
        self.results.exact_merit_improve =
            self.results.best_exact_merit - self.results.new_exact_merit;
        self.results.merit_improve_ratio = if self.results.approx_merit_improve != 0.0 {
            self.results.exact_merit_improve / self.results.approx_merit_improve
        } else if self.results.exact_merit_improve >= 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };

        // Restore the accepted iterate; the candidate is only adopted by the
        // trust-region classification, and callbacks must observe a
        // consistent snapshot.
        problem.set_variables(&self.results.best_var_vals);

        if self.params.verbose {
            self.print_step_info(problem);
        }

        if !self.call_callbacks(problem) {
            return SqpStatus::CallbackStopped;
        }

        SqpStatus::Running
    }

    fn call_callbacks(&mut self, problem: &mut dyn QpProblem) -> bool {
        let mut success = true;
        for callback in &mut self.callbacks {
            success &= callback.execute(&*problem, &self.results);
        }
        success
    }

    fn print_step_info(&self, problem: &dyn QpProblem) {
        let r = &self.results;
        println!("| {} |", "=".repeat(88));
        println!(
            "| iteration: overall {:>4} | convexify {:>4} | trust region {:>3} | penalty {:>3} | box {:.6} |",
            r.overall_iteration,
            r.convexify_iteration,
            r.trust_region_iteration,
            r.penalty_iteration,
            r.box_size[0]
        );
        println!("| {} |", "-".repeat(88));
        println!(
            "| {:>10} | {:>10} | {:>10} | {:>10} | {:>10} | name",
            "oldexact", "new_exact", "new_approx", "dapprox", "dexact"
        );
        let cost_names = problem.cost_names();
        for (i, name) in cost_names.iter().enumerate() {
            println!(
                "| {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e} | COST {}",
                r.best_costs[i],
                r.new_costs[i],
                r.new_approx_costs[i],
                r.best_costs[i] - r.new_approx_costs[i],
                r.best_costs[i] - r.new_costs[i],
                name
            );
        }
        let cnt_names = problem.constraint_names();
        for (i, name) in cnt_names.iter().enumerate() {
            let coeff = r.merit_error_coeffs[i];
            println!(
                "| {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e} | CNT {} (coeff {:.1e})",
                coeff * r.best_constraint_violations[i],
                coeff * r.new_constraint_violations[i],
                coeff * r.new_approx_constraint_violations[i],
                coeff * (r.best_constraint_violations[i] - r.new_approx_constraint_violations[i]),
                coeff * (r.best_constraint_violations[i] - r.new_constraint_violations[i]),
                name,
                coeff
            );
        }
        println!("| {} |", "-".repeat(88));
        println!(
            "| TOTAL merit: old {:.6e} new {:.6e} approx {:.6e} | dapprox {:.3e} dexact {:.3e} ratio {:.3} |",
            r.best_exact_merit,
            r.new_exact_merit,
            r.new_approx_merit,
            r.approx_merit_improve,
            r.exact_merit_improve,
            r.merit_improve_ratio
        );
        println!("| {} |", "=".repeat(88));
    }
}
