//! The convex subproblem maintained by the SQP driver.
//!
//! [`SqpProblem`] owns the variables and the cost/constraint terms, and
//! rebuilds a sparse QP approximation of the NLP around the current iterate
//! on every `convexify` call:
//!
//! ```text
//! minimize    (1/2) x^T H x + g^T x
//! subject to  lo <= A x <= hi
//! ```
//!
//! QP variables are the NLP variables followed by slack variables. Squared
//! costs enter the Hessian directly (Gauss-Newton of the affine model);
//! absolute and hinge penalties, and all constraints, are reformulated with
//! non-negative slacks coupled through linear rows. The constraint matrix
//! stacks, in order: linearized constraint rows, cost slack-coupling rows,
//! and an identity block implementing variable bounds intersected with the
//! trust box plus `[0, inf)` bounds on every slack.

use rayon::prelude::*;

use crate::error::{ScoError, ScoResult};
use crate::sparse::{self, SparseCsc, Triplet};
use crate::term::{ComparisonKind, ConstraintTerm, CostTerm, PenaltyKind};
use crate::variable::{VarSlice, VariableRegistry};

/// Affine model of one term, captured at the convexification iterate.
#[derive(Debug, Clone, Default)]
struct AffineModel {
    v0: Vec<f64>,
    jac: Vec<Triplet>,
    x0: Vec<f64>,
}

impl AffineModel {
    fn eval(&self, x: &[f64]) -> Vec<f64> {
        sparse::affine_eval(&self.v0, &self.jac, &self.x0, x)
    }
}

/// Driver-facing surface of the convex subproblem.
///
/// Object safe so callbacks can observe the problem without knowing the
/// concrete assembly type.
pub trait QpProblem {
    fn num_nlp_vars(&self) -> usize;
    /// Total constraint rows across all blocks (`K_g`).
    fn num_nlp_constraints(&self) -> usize;
    /// Number of cost blocks (`K_c`); each contributes one scalar cost.
    fn num_nlp_costs(&self) -> usize;
    fn num_qp_vars(&self) -> usize;
    fn num_qp_constraints(&self) -> usize;

    /// Current iterate (NLP variables only).
    fn variable_values(&self) -> Vec<f64>;
    /// Overwrite the current iterate (NLP variables only).
    fn set_variables(&mut self, x: &[f64]);

    /// Exact per-block costs at the current iterate.
    fn exact_costs(&self) -> Vec<f64>;
    /// Exact per-block costs at `x`.
    fn evaluate_exact_costs(&self, x: &[f64]) -> Vec<f64>;
    /// Exact per-row constraint violations at the current iterate.
    fn exact_constraint_violations(&self) -> Vec<f64>;
    /// Exact per-row constraint violations at `x`; entries are non-negative.
    fn evaluate_exact_constraint_violations(&self, x: &[f64]) -> Vec<f64>;

    /// Per-block costs of the most recent convexification evaluated at `x`.
    fn evaluate_convex_costs(&self, x: &[f64]) -> Vec<f64>;
    /// Per-row violations of the most recent convexification at `x`.
    fn evaluate_convex_constraint_violations(&self, x: &[f64]) -> Vec<f64>;

    /// Rebuild Hessian, gradient, constraint matrix and bounds by
    /// linearizing every term at the current iterate.
    fn convexify(&mut self);

    /// Per-variable trust-region half-widths, centered on the iterate.
    fn set_box_size(&mut self, box_size: &[f64]);
    fn scale_box_size(&mut self, scale: f64);
    fn box_size(&self) -> Vec<f64>;

    /// Per-row merit coefficients applied to constraint slacks.
    fn set_constraint_merit_coeff(&mut self, coeffs: &[f64]);

    fn hessian(&self) -> &SparseCsc;
    fn gradient(&self) -> &[f64];
    fn constraint_matrix(&self) -> &SparseCsc;
    fn bounds_lower(&self) -> &[f64];
    fn bounds_upper(&self) -> &[f64];

    fn cost_names(&self) -> Vec<String>;
    /// One name per constraint row.
    fn constraint_names(&self) -> Vec<String>;
}

/// Concrete QP problem assembled from variable blocks and terms.
pub struct SqpProblem {
    vars: VariableRegistry,
    costs: Vec<CostTerm>,
    constraints: Vec<ConstraintTerm>,

    // Layout, frozen by `setup`
    ready: bool,
    num_cnt_rows: usize,
    cnt_row_offset: Vec<usize>,
    cnt_slack_col: Vec<usize>,
    cost_slack_col: Vec<usize>,
    cost_coupling_row: Vec<usize>,
    num_qp_vars: usize,
    num_qp_cnts: usize,
    var_lower: Vec<f64>,
    var_upper: Vec<f64>,

    box_size: Vec<f64>,
    merit_coeffs: Vec<f64>,
    parallel: bool,

    // Convexification products
    convexified: bool,
    hessian: SparseCsc,
    gradient: Vec<f64>,
    constraint_matrix: SparseCsc,
    bounds_lower: Vec<f64>,
    bounds_upper: Vec<f64>,
    cost_models: Vec<AffineModel>,
    cnt_models: Vec<AffineModel>,
}

impl Default for SqpProblem {
    fn default() -> Self {
        Self::new()
    }
}

impl SqpProblem {
    pub fn new() -> Self {
        Self {
            vars: VariableRegistry::new(),
            costs: Vec::new(),
            constraints: Vec::new(),
            ready: false,
            num_cnt_rows: 0,
            cnt_row_offset: Vec::new(),
            cnt_slack_col: Vec::new(),
            cost_slack_col: Vec::new(),
            cost_coupling_row: Vec::new(),
            num_qp_vars: 0,
            num_qp_cnts: 0,
            var_lower: Vec::new(),
            var_upper: Vec::new(),
            box_size: Vec::new(),
            merit_coeffs: Vec::new(),
            parallel: false,
            convexified: false,
            hessian: sparse::from_triplets(0, 0, Vec::new()),
            gradient: Vec::new(),
            constraint_matrix: sparse::from_triplets(0, 0, Vec::new()),
            bounds_lower: Vec::new(),
            bounds_upper: Vec::new(),
            cost_models: Vec::new(),
            cnt_models: Vec::new(),
        }
    }

    /// Register a variable block with box bounds. Zero-width bounds pin
    /// entries (fixed timesteps / DOFs).
    pub fn add_var_block(
        &mut self,
        name: impl Into<String>,
        values: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> ScoResult<VarSlice> {
        if self.ready {
            return Err(ScoError::InvalidProblem(
                "cannot add variables after setup".to_string(),
            ));
        }
        self.vars.add(name, values, lower, upper)
    }

    /// Register an unbounded variable block.
    pub fn add_var_block_unbounded(
        &mut self,
        name: impl Into<String>,
        values: &[f64],
    ) -> ScoResult<VarSlice> {
        if self.ready {
            return Err(ScoError::InvalidProblem(
                "cannot add variables after setup".to_string(),
            ));
        }
        self.vars.add_unbounded(name, values)
    }

    pub fn add_cost(&mut self, term: CostTerm) -> ScoResult<()> {
        if self.ready {
            return Err(ScoError::InvalidProblem("cannot add costs after setup".to_string()));
        }
        if term.eval.rows() == 0 {
            return Err(ScoError::InvalidProblem(format!(
                "cost term '{}' has zero rows",
                term.name
            )));
        }
        self.costs.push(term);
        Ok(())
    }

    pub fn add_constraint(&mut self, term: ConstraintTerm) -> ScoResult<()> {
        if self.ready {
            return Err(ScoError::InvalidProblem(
                "cannot add constraints after setup".to_string(),
            ));
        }
        if term.eval.rows() == 0 {
            return Err(ScoError::InvalidProblem(format!(
                "constraint term '{}' has zero rows",
                term.name
            )));
        }
        self.constraints.push(term);
        Ok(())
    }

    /// Enable parallel evaluation of independent blocks. The worker pool is
    /// rayon's fixed global pool; results are reassembled in block order so
    /// outputs are reproducible.
    pub fn set_parallel(&mut self, enabled: bool) {
        self.parallel = enabled;
    }

    pub fn variables(&self) -> &VariableRegistry {
        &self.vars
    }

    /// Freeze the variable/slack layout. Must be called once after all
    /// blocks are registered and before the driver touches the problem.
    pub fn setup(&mut self) -> ScoResult<()> {
        if self.vars.num_vars() == 0 {
            return Err(ScoError::InvalidProblem("no variables registered".to_string()));
        }
        let n = self.vars.num_vars();
        let x0 = self.vars.values();

        // Validate term row counts against an actual evaluation.
        for c in &self.costs {
            let got = c.eval.values(&x0).len();
            if got != c.eval.rows() {
                return Err(ScoError::InvalidProblem(format!(
                    "cost term '{}' reports {} rows but produced {}",
                    c.name,
                    c.eval.rows(),
                    got
                )));
            }
        }
        for c in &self.constraints {
            let got = c.eval.values(&x0).len();
            if got != c.eval.rows() {
                return Err(ScoError::InvalidProblem(format!(
                    "constraint term '{}' reports {} rows but produced {}",
                    c.name,
                    c.eval.rows(),
                    got
                )));
            }
        }

        // Constraint rows and their slack columns.
        let mut col = n;
        let mut row = 0;
        self.cnt_row_offset.clear();
        self.cnt_slack_col.clear();
        for c in &self.constraints {
            self.cnt_row_offset.push(row);
            self.cnt_slack_col.push(col);
            row += c.eval.rows();
            col += c.eval.rows() * c.comparison.slacks_per_row();
        }
        self.num_cnt_rows = row;

        // Cost slack columns and coupling rows.
        self.cost_slack_col.clear();
        self.cost_coupling_row.clear();
        for c in &self.costs {
            self.cost_slack_col.push(col);
            self.cost_coupling_row.push(row);
            if c.penalty != PenaltyKind::Squared {
                col += c.eval.rows() * c.penalty.slacks_per_row();
                row += c.eval.rows();
            }
        }

        self.num_qp_vars = col;
        self.num_qp_cnts = row + self.num_qp_vars;
        self.var_lower = self.vars.lower();
        self.var_upper = self.vars.upper();
        self.box_size = vec![f64::INFINITY; n];
        self.merit_coeffs = vec![1.0; self.num_cnt_rows];
        self.gradient = vec![0.0; self.num_qp_vars];
        self.bounds_lower = vec![0.0; self.num_qp_cnts];
        self.bounds_upper = vec![0.0; self.num_qp_cnts];
        self.ready = true;
        Ok(())
    }

    /// First box row in the stacked constraint matrix.
    fn box_row_offset(&self) -> usize {
        self.num_qp_cnts - self.num_qp_vars
    }

    /// Refresh the box-row section of the bound vectors from the current
    /// iterate, variable bounds and trust box.
    fn update_box_bounds(&mut self) {
        let n = self.vars.num_vars();
        let x0 = self.vars.values();
        let off = self.box_row_offset();
        for j in 0..n {
            self.bounds_lower[off + j] = self.var_lower[j].max(x0[j] - self.box_size[j]);
            self.bounds_upper[off + j] = self.var_upper[j].min(x0[j] + self.box_size[j]);
        }
        for j in n..self.num_qp_vars {
            self.bounds_lower[off + j] = 0.0;
            self.bounds_upper[off + j] = f64::INFINITY;
        }
    }

    /// Write merit coefficients into the gradient entries of the
    /// constraint slacks. Safe to call repeatedly between convexifications.
    fn apply_merit_coeffs_to_gradient(&mut self) {
        for (i, c) in self.constraints.iter().enumerate() {
            let rows = c.eval.rows();
            let slack0 = self.cnt_slack_col[i];
            let per_row = c.comparison.slacks_per_row();
            for r in 0..rows {
                let coeff = self.merit_coeffs[self.cnt_row_offset[i] + r];
                for k in 0..per_row {
                    self.gradient[slack0 + r * per_row + k] = coeff;
                }
            }
        }
    }

    fn compute_models(&self, x0: &[f64]) -> (Vec<AffineModel>, Vec<AffineModel>) {
        let model_of = |rows_v0: Vec<f64>, jac: Vec<Triplet>| AffineModel {
            v0: rows_v0,
            jac,
            x0: x0.to_vec(),
        };
        if self.parallel {
            let cost_models = self
                .costs
                .par_iter()
                .map(|c| model_of(c.eval.values(x0), c.eval.jacobian(x0)))
                .collect();
            let cnt_models = self
                .constraints
                .par_iter()
                .map(|c| model_of(c.eval.values(x0), c.eval.jacobian(x0)))
                .collect();
            (cost_models, cnt_models)
        } else {
            let cost_models = self
                .costs
                .iter()
                .map(|c| model_of(c.eval.values(x0), c.eval.jacobian(x0)))
                .collect();
            let cnt_models = self
                .constraints
                .iter()
                .map(|c| model_of(c.eval.values(x0), c.eval.jacobian(x0)))
                .collect();
            (cost_models, cnt_models)
        }
    }
}

impl QpProblem for SqpProblem {
    fn num_nlp_vars(&self) -> usize {
        self.vars.num_vars()
    }

    fn num_nlp_constraints(&self) -> usize {
        self.num_cnt_rows
    }

    fn num_nlp_costs(&self) -> usize {
        self.costs.len()
    }

    fn num_qp_vars(&self) -> usize {
        self.num_qp_vars
    }

    fn num_qp_constraints(&self) -> usize {
        self.num_qp_cnts
    }

    fn variable_values(&self) -> Vec<f64> {
        self.vars.values()
    }

    fn set_variables(&mut self, x: &[f64]) {
        self.vars.set_values(x);
    }

    fn exact_costs(&self) -> Vec<f64> {
        self.evaluate_exact_costs(&self.vars.values())
    }

    fn evaluate_exact_costs(&self, x: &[f64]) -> Vec<f64> {
        if self.parallel {
            self.costs.par_iter().map(|c| c.exact_cost(x)).collect()
        } else {
            self.costs.iter().map(|c| c.exact_cost(x)).collect()
        }
    }

    fn exact_constraint_violations(&self) -> Vec<f64> {
        self.evaluate_exact_constraint_violations(&self.vars.values())
    }

    fn evaluate_exact_constraint_violations(&self, x: &[f64]) -> Vec<f64> {
        let per_block: Vec<Vec<f64>> = if self.parallel {
            self.constraints.par_iter().map(|c| c.exact_violations(x)).collect()
        } else {
            self.constraints.iter().map(|c| c.exact_violations(x)).collect()
        };
        per_block.into_iter().flatten().collect()
    }

    fn evaluate_convex_costs(&self, x: &[f64]) -> Vec<f64> {
        assert!(self.convexified, "evaluate_convex_costs called before convexify");
        self.costs
            .iter()
            .zip(self.cost_models.iter())
            .map(|(c, m)| c.penalty.apply(&m.eval(x)))
            .collect()
    }

    fn evaluate_convex_constraint_violations(&self, x: &[f64]) -> Vec<f64> {
        assert!(
            self.convexified,
            "evaluate_convex_constraint_violations called before convexify"
        );
        let mut out = Vec::with_capacity(self.num_cnt_rows);
        for (c, m) in self.constraints.iter().zip(self.cnt_models.iter()) {
            out.extend(m.eval(x).iter().map(|&v| c.comparison.violation(v)));
        }
        out
    }

    fn convexify(&mut self) {
        assert!(self.ready, "convexify called before setup");
        let x0 = self.vars.values();
        let (cost_models, cnt_models) = self.compute_models(&x0);

        let mut h_tri: Vec<Triplet> = Vec::new();
        let mut a_tri: Vec<Triplet> = Vec::new();
        let mut grad = vec![0.0; self.num_qp_vars];

        // Cost contributions.
        for (i, cost) in self.costs.iter().enumerate() {
            let model = &cost_models[i];
            let rows = cost.eval.rows();

            // Group Jacobian entries by local row.
            let mut by_row: Vec<Vec<(usize, f64)>> = vec![Vec::new(); rows];
            for &(r, c, v) in &model.jac {
                by_row[r].push((c, v));
            }

            match cost.penalty {
                PenaltyKind::Squared => {
                    // ||v0 + J (x - x0)||^2 = x' (J'J) x + 2 b'J x + b'b,
                    // with b = v0 - J x0. Contributes H += 2 J'J, g += 2 J'b.
                    for r in 0..rows {
                        let entries = &by_row[r];
                        let jx0: f64 = entries.iter().map(|&(c, v)| v * x0[c]).sum();
                        let b = model.v0[r] - jx0;
                        for &(c1, v1) in entries {
                            grad[c1] += 2.0 * b * v1;
                            for &(c2, v2) in entries {
                                if c1 <= c2 {
                                    h_tri.push((c1, c2, 2.0 * v1 * v2));
                                }
                            }
                        }
                    }
                }
                PenaltyKind::Absolute => {
                    // v = s+ - s-, s± >= 0, cost s+ + s-:
                    //   J x + s+ - s- = J x0 - v0
                    let slack0 = self.cost_slack_col[i];
                    let row0 = self.cost_coupling_row[i];
                    for r in 0..rows {
                        let row = row0 + r;
                        let jx0: f64 = by_row[r].iter().map(|&(c, v)| v * x0[c]).sum();
                        for &(c, v) in &by_row[r] {
                            a_tri.push((row, c, v));
                        }
                        a_tri.push((row, slack0 + 2 * r, 1.0));
                        a_tri.push((row, slack0 + 2 * r + 1, -1.0));
                        let rhs = jx0 - model.v0[r];
                        self.bounds_lower[row] = rhs;
                        self.bounds_upper[row] = rhs;
                        grad[slack0 + 2 * r] = 1.0;
                        grad[slack0 + 2 * r + 1] = 1.0;
                    }
                }
                PenaltyKind::Hinge => {
                    // max(0, v) <= s, s >= 0, cost s:  J x - s <= J x0 - v0
                    let slack0 = self.cost_slack_col[i];
                    let row0 = self.cost_coupling_row[i];
                    for r in 0..rows {
                        let row = row0 + r;
                        let jx0: f64 = by_row[r].iter().map(|&(c, v)| v * x0[c]).sum();
                        for &(c, v) in &by_row[r] {
                            a_tri.push((row, c, v));
                        }
                        a_tri.push((row, slack0 + r, -1.0));
                        self.bounds_lower[row] = f64::NEG_INFINITY;
                        self.bounds_upper[row] = jx0 - model.v0[r];
                        grad[slack0 + r] = 1.0;
                    }
                }
            }
        }

        // Constraint rows with slack coupling.
        for (i, cnt) in self.constraints.iter().enumerate() {
            let model = &cnt_models[i];
            let rows = cnt.eval.rows();
            let row0 = self.cnt_row_offset[i];
            let slack0 = self.cnt_slack_col[i];

            let mut by_row: Vec<Vec<(usize, f64)>> = vec![Vec::new(); rows];
            for &(r, c, v) in &model.jac {
                by_row[r].push((c, v));
            }

            for r in 0..rows {
                let row = row0 + r;
                let jx0: f64 = by_row[r].iter().map(|&(c, v)| v * x0[c]).sum();
                for &(c, v) in &by_row[r] {
                    a_tri.push((row, c, v));
                }
                let rhs = jx0 - model.v0[r];
                match cnt.comparison {
                    ComparisonKind::Eq => {
                        a_tri.push((row, slack0 + 2 * r, 1.0));
                        a_tri.push((row, slack0 + 2 * r + 1, -1.0));
                        self.bounds_lower[row] = rhs;
                        self.bounds_upper[row] = rhs;
                    }
                    ComparisonKind::Ineq => {
                        a_tri.push((row, slack0 + r, -1.0));
                        self.bounds_lower[row] = f64::NEG_INFINITY;
                        self.bounds_upper[row] = rhs;
                    }
                }
            }
        }

        // Box rows: identity over every QP variable.
        let box_row0 = self.box_row_offset();
        for j in 0..self.num_qp_vars {
            a_tri.push((box_row0 + j, j, 1.0));
        }

        self.hessian = sparse::from_triplets_upper(self.num_qp_vars, h_tri);
        self.constraint_matrix = sparse::from_triplets(self.num_qp_cnts, self.num_qp_vars, a_tri);
        self.gradient = grad;
        self.cost_models = cost_models;
        self.cnt_models = cnt_models;
        self.convexified = true;
        self.apply_merit_coeffs_to_gradient();
        self.update_box_bounds();
    }

    fn set_box_size(&mut self, box_size: &[f64]) {
        debug_assert_eq!(box_size.len(), self.vars.num_vars());
        self.box_size = box_size.to_vec();
        if self.ready {
            self.update_box_bounds();
        }
    }

    fn scale_box_size(&mut self, scale: f64) {
        for b in &mut self.box_size {
            *b *= scale;
        }
        if self.ready {
            self.update_box_bounds();
        }
    }

    fn box_size(&self) -> Vec<f64> {
        self.box_size.clone()
    }

    fn set_constraint_merit_coeff(&mut self, coeffs: &[f64]) {
        debug_assert_eq!(coeffs.len(), self.num_cnt_rows);
        self.merit_coeffs = coeffs.to_vec();
        if self.convexified {
            self.apply_merit_coeffs_to_gradient();
        }
    }

    fn hessian(&self) -> &SparseCsc {
        &self.hessian
    }

    fn gradient(&self) -> &[f64] {
        &self.gradient
    }

    fn constraint_matrix(&self) -> &SparseCsc {
        &self.constraint_matrix
    }

    fn bounds_lower(&self) -> &[f64] {
        &self.bounds_lower
    }

    fn bounds_upper(&self) -> &[f64] {
        &self.bounds_upper
    }

    fn cost_names(&self) -> Vec<String> {
        self.costs.iter().map(|c| c.name.clone()).collect()
    }

    fn constraint_names(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.num_cnt_rows);
        for c in &self.constraints {
            for r in 0..c.eval.rows() {
                out.push(format!("{}[{}]", c.name, r));
            }
        }
        out
    }
}
