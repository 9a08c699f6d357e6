//! Remaining term families: IK proximity, total time, singularity
//! avoidance, and user-defined black-box errors.

use std::sync::Arc;

use nalgebra::{Isometry3, Point3};

use sco_core::sparse::Triplet;
use sco_core::term::{central_difference, TermEval};
use sco_core::variable::VarSlice;

use crate::error::{TermError, TermResult};
use crate::kin::{InverseKinematics, JointGroup};

/// Distance from an IK-solution seed: `coeff * (q - q_ik)`.
///
/// The IK collaborator is queried once at construction; the seed
/// configuration is then a constant for the rest of the solve.
pub struct IkProximityEval {
    position_var: VarSlice,
    seed_solution: Vec<f64>,
    coeffs: Vec<f64>,
}

impl IkProximityEval {
    pub fn new(
        ik: &dyn InverseKinematics,
        target: &Isometry3<f64>,
        seed: &[f64],
        position_var: VarSlice,
        coeffs: Vec<f64>,
    ) -> TermResult<Self> {
        if coeffs.len() != position_var.len {
            return Err(TermError::Invalid(format!(
                "IK proximity has {} coeffs for {} joints",
                coeffs.len(),
                position_var.len
            )));
        }
        let seed_solution = ik
            .solve(target, seed)
            .ok_or_else(|| TermError::IkFailure("no solution for target pose".to_string()))?;
        if seed_solution.len() != position_var.len {
            return Err(TermError::IkFailure(format!(
                "IK returned {} joints, expected {}",
                seed_solution.len(),
                position_var.len
            )));
        }
        Ok(Self { position_var, seed_solution, coeffs })
    }

    pub fn seed_solution(&self) -> &[f64] {
        &self.seed_solution
    }
}

impl TermEval for IkProximityEval {
    fn rows(&self) -> usize {
        self.position_var.len
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        self.position_var
            .get(x)
            .iter()
            .zip(self.seed_solution.iter())
            .zip(self.coeffs.iter())
            .map(|((q, s), c)| c * (q - s))
            .collect()
    }

    fn jacobian(&self, _x: &[f64]) -> Vec<Triplet> {
        (0..self.position_var.len)
            .map(|j| (j, self.position_var.start + j, self.coeffs[j]))
            .collect()
    }
}

/// Trajectory duration when the decision matrix carries `1/dt` columns:
/// one row `coeff / inv_dt` per timestep.
pub struct TotalTimeEval {
    inv_dt_cols: Vec<usize>,
    coeff: f64,
}

impl TotalTimeEval {
    pub fn new(inv_dt_cols: Vec<usize>, coeff: f64) -> TermResult<Self> {
        if inv_dt_cols.is_empty() {
            return Err(TermError::Invalid("total time term has no 1/dt columns".to_string()));
        }
        if coeff <= 0.0 {
            return Err(TermError::Invalid(format!(
                "total time coeff must be positive, got {coeff}"
            )));
        }
        Ok(Self { inv_dt_cols, coeff })
    }
}

impl TermEval for TotalTimeEval {
    fn rows(&self) -> usize {
        self.inv_dt_cols.len()
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        self.inv_dt_cols.iter().map(|&c| self.coeff / x[c]).collect()
    }

    fn jacobian(&self, x: &[f64]) -> Vec<Triplet> {
        self.inv_dt_cols
            .iter()
            .enumerate()
            .map(|(r, &c)| (r, c, -self.coeff / (x[c] * x[c])))
            .collect()
    }
}

/// Singularity avoidance: `coeff / (sigma_min(J(q)) + lambda)` where
/// `sigma_min` is the smallest singular value of the link Jacobian.
pub struct SingularityEval {
    manip: Arc<dyn JointGroup>,
    position_var: VarSlice,
    link: String,
    lambda: f64,
    coeff: f64,
}

impl SingularityEval {
    pub fn new(
        manip: Arc<dyn JointGroup>,
        position_var: VarSlice,
        link: impl Into<String>,
        lambda: f64,
        coeff: f64,
    ) -> TermResult<Self> {
        let link = link.into();
        if lambda <= 0.0 {
            return Err(TermError::Invalid(format!(
                "singularity damping must be positive, got {lambda}"
            )));
        }
        if position_var.len != manip.num_joints() {
            return Err(TermError::Invalid(
                "singularity variable does not match the joint group".to_string(),
            ));
        }
        if !manip.active_link_names().contains(&link) {
            return Err(TermError::Invalid(format!("link '{link}' is not active in the group")));
        }
        Ok(Self { manip, position_var, link, lambda, coeff })
    }

    fn sigma_min(&self, q: &[f64]) -> f64 {
        let fk = self.manip.calc_fwd_kin(q);
        let point = fk
            .get(&self.link)
            .map(|p| Point3::from(p.translation.vector))
            .unwrap_or_else(Point3::origin);
        let jac = self.manip.calc_jacobian(q, &self.link, &point);
        let svd = jac.svd(false, false);
        svd.singular_values.iter().fold(f64::INFINITY, |a, &b| a.min(b))
    }
}

impl TermEval for SingularityEval {
    fn rows(&self) -> usize {
        1
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        let q = self.position_var.get(x);
        vec![self.coeff / (self.sigma_min(q) + self.lambda)]
    }

    fn jacobian(&self, x: &[f64]) -> Vec<Triplet> {
        let cols: Vec<usize> = self.position_var.cols().collect();
        central_difference(x, &cols, 1e-6, |xp| self.values(xp))
    }
}

/// Black-box error over one variable block, with an optional analytic
/// Jacobian (central differences otherwise). Both closures see only the
/// block's values; columns are offset into the global vector here.
pub struct UserDefinedEval {
    position_var: VarSlice,
    num_rows: usize,
    error_fn: Box<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>,
    jacobian_fn: Option<Box<dyn Fn(&[f64]) -> Vec<Triplet> + Send + Sync>>,
}

impl UserDefinedEval {
    pub fn new(
        position_var: VarSlice,
        num_rows: usize,
        error_fn: Box<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>,
        jacobian_fn: Option<Box<dyn Fn(&[f64]) -> Vec<Triplet> + Send + Sync>>,
    ) -> TermResult<Self> {
        if num_rows == 0 {
            return Err(TermError::Invalid("user-defined term has zero rows".to_string()));
        }
        Ok(Self { position_var, num_rows, error_fn, jacobian_fn })
    }
}

impl TermEval for UserDefinedEval {
    fn rows(&self) -> usize {
        self.num_rows
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        (self.error_fn)(self.position_var.get(x))
    }

    fn jacobian(&self, x: &[f64]) -> Vec<Triplet> {
        match &self.jacobian_fn {
            Some(f) => f(self.position_var.get(x))
                .into_iter()
                .map(|(r, c, v)| (r, self.position_var.start + c, v))
                .collect(),
            None => {
                let cols: Vec<usize> = self.position_var.cols().collect();
                central_difference(x, &cols, 1e-6, |xp| self.values(xp))
            }
        }
    }
}
