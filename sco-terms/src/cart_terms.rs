//! Cartesian-space terms: pose at a timestep, velocity between timesteps.

use std::sync::Arc;

use nalgebra::Isometry3;

use sco_core::sparse::Triplet;
use sco_core::term::{central_difference, TermEval};
use sco_core::variable::VarSlice;

use crate::error::{TermError, TermResult};
use crate::kin::JointGroup;

/// Pose error of `link` against a target, with an optional per-axis
/// tolerance box.
///
/// Rows are `[tx, ty, tz, rx, ry, rz]`: the translation of
/// `target^-1 * fk(q)` followed by its rotation log, each mapped through
/// the tolerance band (values inside the band read zero) and scaled by the
/// axis coefficient. The Jacobian is taken by central differences over the
/// timestep's joints.
pub struct CartPoseEval {
    manip: Arc<dyn JointGroup>,
    position_var: VarSlice,
    link: String,
    target: Isometry3<f64>,
    coeffs: Vec<f64>,
    upper_tols: Vec<f64>,
    lower_tols: Vec<f64>,
}

impl CartPoseEval {
    pub fn new(
        manip: Arc<dyn JointGroup>,
        position_var: VarSlice,
        link: impl Into<String>,
        target: Isometry3<f64>,
        coeffs: Vec<f64>,
    ) -> TermResult<Self> {
        let link = link.into();
        if coeffs.len() != 6 {
            return Err(TermError::Invalid(format!(
                "cart pose term needs 6 coeffs, got {}",
                coeffs.len()
            )));
        }
        if position_var.len != manip.num_joints() {
            return Err(TermError::Invalid(format!(
                "cart pose variable has {} entries for a {}-joint group",
                position_var.len,
                manip.num_joints()
            )));
        }
        if !manip.active_link_names().contains(&link) {
            return Err(TermError::Invalid(format!("link '{link}' is not active in the group")));
        }
        Ok(Self {
            manip,
            position_var,
            link,
            target,
            coeffs,
            upper_tols: vec![0.0; 6],
            lower_tols: vec![0.0; 6],
        })
    }

    /// Per-axis tolerance box; a zero band keeps the exact target.
    pub fn with_tolerances(mut self, upper: Vec<f64>, lower: Vec<f64>) -> TermResult<Self> {
        if upper.len() != 6 || lower.len() != 6 {
            return Err(TermError::Invalid("cart pose tolerances need 6 entries".to_string()));
        }
        for i in 0..6 {
            if lower[i] > upper[i] {
                return Err(TermError::Invalid(format!(
                    "cart pose axis {i} tolerance band is inverted"
                )));
            }
        }
        self.upper_tols = upper;
        self.lower_tols = lower;
        Ok(self)
    }

    fn pose_error(&self, q: &[f64]) -> [f64; 6] {
        let fk = self.manip.calc_fwd_kin(q);
        let cur = fk.get(&self.link).copied().unwrap_or_else(Isometry3::identity);
        let err = self.target.inverse() * cur;
        let t = err.translation.vector;
        let r = err.rotation.scaled_axis();
        [t.x, t.y, t.z, r.x, r.y, r.z]
    }

    fn banded(&self, e: f64, axis: usize) -> f64 {
        if e > self.upper_tols[axis] {
            e - self.upper_tols[axis]
        } else if e < self.lower_tols[axis] {
            e - self.lower_tols[axis]
        } else {
            0.0
        }
    }
}

impl TermEval for CartPoseEval {
    fn rows(&self) -> usize {
        6
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        let err = self.pose_error(self.position_var.get(x));
        (0..6).map(|i| self.coeffs[i] * self.banded(err[i], i)).collect()
    }

    fn jacobian(&self, x: &[f64]) -> Vec<Triplet> {
        let cols: Vec<usize> = self.position_var.cols().collect();
        central_difference(x, &cols, 1e-6, |xp| self.values(xp))
    }
}

/// Two-sided Cartesian displacement bound between consecutive timesteps:
/// `-max_displacement <= p(q1) - p(q0) <= max_displacement`, expressed as
/// six `<= 0` rows.
pub struct CartVelEval {
    manip: Arc<dyn JointGroup>,
    position_var0: VarSlice,
    position_var1: VarSlice,
    link: String,
    max_displacement: f64,
}

impl CartVelEval {
    pub fn new(
        manip: Arc<dyn JointGroup>,
        position_var0: VarSlice,
        position_var1: VarSlice,
        link: impl Into<String>,
        max_displacement: f64,
    ) -> TermResult<Self> {
        let link = link.into();
        if max_displacement <= 0.0 {
            return Err(TermError::Invalid(format!(
                "cart velocity limit must be positive, got {max_displacement}"
            )));
        }
        let n = manip.num_joints();
        if position_var0.len != n || position_var1.len != n {
            return Err(TermError::Invalid(
                "cart velocity variables do not match the joint group".to_string(),
            ));
        }
        if !manip.active_link_names().contains(&link) {
            return Err(TermError::Invalid(format!("link '{link}' is not active in the group")));
        }
        Ok(Self { manip, position_var0, position_var1, link, max_displacement })
    }

    fn displacement(&self, x: &[f64]) -> [f64; 3] {
        let fk0 = self.manip.calc_fwd_kin(self.position_var0.get(x));
        let fk1 = self.manip.calc_fwd_kin(self.position_var1.get(x));
        let p0 = fk0.get(&self.link).map(|p| p.translation.vector).unwrap_or_default();
        let p1 = fk1.get(&self.link).map(|p| p.translation.vector).unwrap_or_default();
        [p1.x - p0.x, p1.y - p0.y, p1.z - p0.z]
    }
}

impl TermEval for CartVelEval {
    fn rows(&self) -> usize {
        6
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        let d = self.displacement(x);
        let mut out = Vec::with_capacity(6);
        for v in d {
            out.push(v - self.max_displacement);
        }
        for v in d {
            out.push(-v - self.max_displacement);
        }
        out
    }

    fn jacobian(&self, x: &[f64]) -> Vec<Triplet> {
        let cols: Vec<usize> = self
            .position_var0
            .cols()
            .chain(self.position_var1.cols())
            .collect();
        central_difference(x, &cols, 1e-6, |xp| self.values(xp))
    }
}
