//! Fixed-arity collision constraint blocks.
//!
//! Each block exposes `max_num_cnt` rows with upper bound 0. Values start
//! at `-margin_buffer` (trivially satisfied) and the worst gradient sets
//! overwrite the leading entries with `coeff * max_error`, choosing the
//! endpoint-specific error when one motion endpoint is pinned. The
//! analytic Jacobian combines per-contact gradients by error-weighted
//! averaging; the numerical variant differences the evaluator itself.

use std::sync::Arc;

use sco_core::sparse::Triplet;
use sco_core::term::TermEval;
use sco_core::variable::VarSlice;

use crate::cache::CollisionCacheData;
use crate::error::{CollisionError, CollisionResult};
use crate::evaluators::CollisionEvaluator;
use crate::gradients::{weighted_avg_gradient, GradientResultsSet};

fn validate(
    position_vars: &[VarSlice; 2],
    position_vars_fixed: &[bool; 2],
    max_num_cnt: usize,
) -> CollisionResult<()> {
    if position_vars[0].len == 0 || position_vars[1].len == 0 {
        return Err(CollisionError::Invalid("position variables are empty".to_string()));
    }
    if position_vars[0].len != position_vars[1].len {
        return Err(CollisionError::Invalid(format!(
            "position variables differ in size ({} vs {})",
            position_vars[0].len, position_vars[1].len
        )));
    }
    if position_vars_fixed[0] && position_vars_fixed[1] {
        return Err(CollisionError::Invalid("both position variables are fixed".to_string()));
    }
    if max_num_cnt < 1 {
        return Err(CollisionError::Invalid("max_num_cnt must be at least 1".to_string()));
    }
    Ok(())
}

/// Worst error of a set under the endpoint-fixing pattern.
fn selected_error(set: &GradientResultsSet, position_vars_fixed: &[bool; 2]) -> f64 {
    if !position_vars_fixed[0] && !position_vars_fixed[1] {
        set.max_error()
    } else if !position_vars_fixed[0] {
        set.max_error_t0()
    } else {
        set.max_error_t1()
    }
}

fn constraint_values(
    data: &CollisionCacheData,
    position_vars_fixed: &[bool; 2],
    bounds_size: usize,
    margin_buffer: f64,
) -> Vec<f64> {
    let mut values = vec![-margin_buffer; bounds_size];
    let cnt = bounds_size.min(data.gradient_results_sets.len());
    for i in 0..cnt {
        let set = &data.gradient_results_sets[i];
        values[i] = set.coeff * selected_error(set, position_vars_fixed);
    }
    values
}

/// Collision constraint with analytic (weighted-average) Jacobian.
pub struct CollisionConstraintEval {
    evaluator: Arc<dyn CollisionEvaluator>,
    position_vars: [VarSlice; 2],
    position_vars_fixed: [bool; 2],
    bounds_size: usize,
    fixed_sparsity: bool,
}

impl CollisionConstraintEval {
    pub fn new(
        evaluator: Arc<dyn CollisionEvaluator>,
        position_vars: [VarSlice; 2],
        position_vars_fixed: [bool; 2],
        max_num_cnt: usize,
        fixed_sparsity: bool,
    ) -> CollisionResult<Self> {
        validate(&position_vars, &position_vars_fixed, max_num_cnt)?;
        Ok(Self {
            evaluator,
            position_vars,
            position_vars_fixed,
            bounds_size: max_num_cnt,
            fixed_sparsity,
        })
    }

    fn seed_sparsity(&self, triplets: &mut Vec<Triplet>) {
        // Some backends require an unchanging sparsity pattern; cover every
        // column of the free variables with explicit zeros once per call.
        for row in 0..self.bounds_size {
            for side in 0..2 {
                if self.position_vars_fixed[side] {
                    continue;
                }
                for col in self.position_vars[side].cols() {
                    triplets.push((row, col, 0.0));
                }
            }
        }
    }
}

impl TermEval for CollisionConstraintEval {
    fn rows(&self) -> usize {
        self.bounds_size
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        let x0 = self.position_vars[0].get(x);
        let x1 = self.position_vars[1].get(x);
        let data = self.evaluator.calc_collision_data(
            x0,
            x1,
            self.position_vars_fixed,
            self.bounds_size,
        );
        constraint_values(
            &data,
            &self.position_vars_fixed,
            self.bounds_size,
            self.evaluator.margin_buffer(),
        )
    }

    fn jacobian(&self, x: &[f64]) -> Vec<Triplet> {
        let mut triplets = Vec::new();
        if self.fixed_sparsity {
            self.seed_sparsity(&mut triplets);
        }

        let x0 = self.position_vars[0].get(x);
        let x1 = self.position_vars[1].get(x);
        let n_dof = self.position_vars[0].len;
        let data = self.evaluator.calc_collision_data(
            x0,
            x1,
            self.position_vars_fixed,
            self.bounds_size,
        );

        let cnt = self.bounds_size.min(data.gradient_results_sets.len());
        for i in 0..cnt {
            let set = &data.gradient_results_sets[i];
            for side in 0..2 {
                if self.position_vars_fixed[side] {
                    continue;
                }
                let row_grad = weighted_avg_gradient(set, side, n_dof);
                for (j, &g) in row_grad.iter().enumerate() {
                    if g != 0.0 {
                        triplets.push((i, self.position_vars[side].start + j, set.coeff * g));
                    }
                }
            }
        }
        triplets
    }
}

/// Collision constraint with a forward-difference Jacobian over the
/// evaluator. Used when analytic gradients are unavailable or distrusted;
/// perturbed sets are matched to the baseline by (link pair, subshape)
/// key, and a vanished set differences against the trivially satisfied
/// value.
pub struct CollisionNumericalConstraintEval {
    evaluator: Arc<dyn CollisionEvaluator>,
    position_vars: [VarSlice; 2],
    position_vars_fixed: [bool; 2],
    bounds_size: usize,
    fixed_sparsity: bool,
    delta: f64,
}

impl CollisionNumericalConstraintEval {
    pub fn new(
        evaluator: Arc<dyn CollisionEvaluator>,
        position_vars: [VarSlice; 2],
        position_vars_fixed: [bool; 2],
        max_num_cnt: usize,
        fixed_sparsity: bool,
    ) -> CollisionResult<Self> {
        validate(&position_vars, &position_vars_fixed, max_num_cnt)?;
        Ok(Self {
            evaluator,
            position_vars,
            position_vars_fixed,
            bounds_size: max_num_cnt,
            fixed_sparsity,
            delta: 1e-8,
        })
    }
}

impl TermEval for CollisionNumericalConstraintEval {
    fn rows(&self) -> usize {
        self.bounds_size
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        let x0 = self.position_vars[0].get(x);
        let x1 = self.position_vars[1].get(x);
        let data = self.evaluator.calc_collision_data(
            x0,
            x1,
            self.position_vars_fixed,
            self.bounds_size,
        );
        constraint_values(
            &data,
            &self.position_vars_fixed,
            self.bounds_size,
            self.evaluator.margin_buffer(),
        )
    }

    fn jacobian(&self, x: &[f64]) -> Vec<Triplet> {
        let mut triplets = Vec::new();
        let margin_buffer = self.evaluator.margin_buffer();
        let n_dof = self.position_vars[0].len;

        let x0 = self.position_vars[0].get(x).to_vec();
        let x1 = self.position_vars[1].get(x).to_vec();
        let baseline = self.evaluator.calc_collision_data(
            &x0,
            &x1,
            self.position_vars_fixed,
            self.bounds_size,
        );
        let cnt = self.bounds_size.min(baseline.gradient_results_sets.len());

        if self.fixed_sparsity {
            for row in 0..self.bounds_size {
                for side in 0..2 {
                    if self.position_vars_fixed[side] {
                        continue;
                    }
                    for col in self.position_vars[side].cols() {
                        triplets.push((row, col, 0.0));
                    }
                }
            }
        }
        if cnt == 0 {
            return triplets;
        }

        for side in 0..2 {
            if self.position_vars_fixed[side] {
                continue;
            }
            for j in 0..n_dof {
                let (p0, p1) = if side == 0 {
                    let mut p = x0.clone();
                    p[j] += self.delta;
                    (p, x1.clone())
                } else {
                    let mut p = x1.clone();
                    p[j] += self.delta;
                    (x0.clone(), p)
                };
                let perturbed = self.evaluator.calc_collision_data(
                    &p0,
                    &p1,
                    self.position_vars_fixed,
                    self.bounds_size,
                );

                for i in 0..cnt {
                    let base_set = &baseline.gradient_results_sets[i];
                    let matched = perturbed
                        .gradient_results_sets
                        .iter()
                        .find(|s| s.key == base_set.key && s.shape_key == base_set.shape_key);
                    let delta_err = match matched {
                        Some(s) => {
                            base_set.coeff
                                * (selected_error(s, &self.position_vars_fixed)
                                    - selected_error(base_set, &self.position_vars_fixed))
                        }
                        None => {
                            base_set.coeff
                                * (-margin_buffer
                                    - selected_error(base_set, &self.position_vars_fixed))
                        }
                    };
                    triplets.push((
                        i,
                        self.position_vars[side].start + j,
                        delta_err / self.delta,
                    ));
                }
            }
        }
        triplets
    }
}
