//! Joint-space motion terms: position, velocity, acceleration, jerk.
//!
//! All four share one evaluator over a finite-difference stencil applied
//! down the timestep axis: velocity uses a forward difference, acceleration
//! and jerk use central differences. With a tolerance band each raw value
//! expands into two rows (`raw - upper <= 0`, `lower - raw <= 0`), which is
//! the form both hinge costs and inequality constraints consume.

use sco_core::sparse::Triplet;
use sco_core::term::TermEval;
use sco_core::variable::VarSlice;

use crate::error::{TermError, TermResult};

/// Finite-difference joint motion evaluator.
pub struct JointMotionEval {
    steps: Vec<VarSlice>,
    stencil: Vec<f64>,
    targets: Vec<f64>,
    coeffs: Vec<f64>,
    upper_tols: Vec<f64>,
    lower_tols: Vec<f64>,
    banded: bool,
}

impl JointMotionEval {
    fn build(
        kind: &str,
        steps: Vec<VarSlice>,
        stencil: Vec<f64>,
        targets: Vec<f64>,
        coeffs: Vec<f64>,
    ) -> TermResult<Self> {
        if steps.len() < stencil.len() {
            return Err(TermError::Invalid(format!(
                "{kind} needs at least {} timesteps, got {}",
                stencil.len(),
                steps.len()
            )));
        }
        let n = targets.len();
        if n == 0 {
            return Err(TermError::Invalid(format!("{kind} has no joints")));
        }
        if coeffs.len() != n {
            return Err(TermError::Invalid(format!(
                "{kind} has {} coeffs for {} joints",
                coeffs.len(),
                n
            )));
        }
        if let Some(bad) = steps.iter().find(|s| s.len != n) {
            return Err(TermError::Invalid(format!(
                "{kind} variable block at column {} has {} entries, expected {}",
                bad.start, bad.len, n
            )));
        }
        Ok(Self {
            steps,
            stencil,
            targets,
            coeffs,
            upper_tols: vec![0.0; n],
            lower_tols: vec![0.0; n],
            banded: false,
        })
    }

    /// Position: raw value is `x_t - target`.
    pub fn position(steps: Vec<VarSlice>, targets: Vec<f64>, coeffs: Vec<f64>) -> TermResult<Self> {
        Self::build("joint position term", steps, vec![1.0], targets, coeffs)
    }

    /// Velocity: forward difference `x_{t+1} - x_t`.
    pub fn velocity(steps: Vec<VarSlice>, targets: Vec<f64>, coeffs: Vec<f64>) -> TermResult<Self> {
        Self::build("joint velocity term", steps, vec![-1.0, 1.0], targets, coeffs)
    }

    /// Acceleration: central difference `x_t - 2 x_{t+1} + x_{t+2}`.
    pub fn acceleration(
        steps: Vec<VarSlice>,
        targets: Vec<f64>,
        coeffs: Vec<f64>,
    ) -> TermResult<Self> {
        Self::build(
            "joint acceleration term",
            steps,
            vec![1.0, -2.0, 1.0],
            targets,
            coeffs,
        )
    }

    /// Jerk: five-point central difference
    /// `(-x_t + 2 x_{t+1} - 2 x_{t+3} + x_{t+4}) / 2`.
    pub fn jerk(steps: Vec<VarSlice>, targets: Vec<f64>, coeffs: Vec<f64>) -> TermResult<Self> {
        Self::build(
            "joint jerk term",
            steps,
            vec![-0.5, 1.0, 0.0, -1.0, 0.5],
            targets,
            coeffs,
        )
    }

    /// Replace the exact target with a `[target + lower, target + upper]`
    /// band; raw values inside the band produce zero rows.
    pub fn with_tolerances(mut self, upper: Vec<f64>, lower: Vec<f64>) -> TermResult<Self> {
        let n = self.targets.len();
        if upper.len() != n || lower.len() != n {
            return Err(TermError::Invalid(format!(
                "tolerance length {}/{} does not match {} joints",
                upper.len(),
                lower.len(),
                n
            )));
        }
        for j in 0..n {
            if lower[j] > upper[j] {
                return Err(TermError::Invalid(format!(
                    "joint {j} tolerance band is inverted ({} > {})",
                    lower[j], upper[j]
                )));
            }
        }
        self.banded = upper.iter().any(|&t| t != 0.0) || lower.iter().any(|&t| t != 0.0);
        self.upper_tols = upper;
        self.lower_tols = lower;
        Ok(self)
    }

    fn num_windows(&self) -> usize {
        self.steps.len() - (self.stencil.len() - 1)
    }

    fn n_joints(&self) -> usize {
        self.targets.len()
    }

    /// Raw stencil value for window `w`, joint `j`.
    fn raw(&self, x: &[f64], w: usize, j: usize) -> f64 {
        let mut v = -self.targets[j];
        for (k, &wgt) in self.stencil.iter().enumerate() {
            if wgt != 0.0 {
                v += wgt * self.steps[w + k].get(x)[j];
            }
        }
        v
    }
}

impl TermEval for JointMotionEval {
    fn rows(&self) -> usize {
        let per = if self.banded { 2 } else { 1 };
        self.num_windows() * self.n_joints() * per
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.rows());
        for w in 0..self.num_windows() {
            for j in 0..self.n_joints() {
                let raw = self.raw(x, w, j);
                if self.banded {
                    out.push(self.coeffs[j] * (raw - self.upper_tols[j]));
                    out.push(self.coeffs[j] * (self.lower_tols[j] - raw));
                } else {
                    out.push(self.coeffs[j] * raw);
                }
            }
        }
        out
    }

    fn jacobian(&self, _x: &[f64]) -> Vec<Triplet> {
        let mut out = Vec::new();
        let mut row = 0;
        for w in 0..self.num_windows() {
            for j in 0..self.n_joints() {
                for (k, &wgt) in self.stencil.iter().enumerate() {
                    if wgt == 0.0 {
                        continue;
                    }
                    let col = self.steps[w + k].start + j;
                    if self.banded {
                        out.push((row, col, self.coeffs[j] * wgt));
                        out.push((row + 1, col, -self.coeffs[j] * wgt));
                    } else {
                        out.push((row, col, self.coeffs[j] * wgt));
                    }
                }
                row += if self.banded { 2 } else { 1 };
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slices(n_steps: usize, n: usize) -> Vec<VarSlice> {
        (0..n_steps).map(|t| VarSlice { start: t * n, len: n }).collect()
    }

    #[test]
    fn test_velocity_values() {
        // Two joints, three steps: x = [[0,0],[1,2],[3,5]]
        let x = vec![0.0, 0.0, 1.0, 2.0, 3.0, 5.0];
        let eval =
            JointMotionEval::velocity(slices(3, 2), vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        assert_eq!(eval.rows(), 4);
        assert_eq!(eval.values(&x), vec![1.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn test_velocity_banded_rows() {
        let x = vec![0.0, 1.0];
        let eval = JointMotionEval::velocity(slices(2, 1), vec![0.0], vec![1.0])
            .unwrap()
            .with_tolerances(vec![0.5], vec![-0.5])
            .unwrap();
        assert_eq!(eval.rows(), 2);
        // raw = 1.0: above band by 0.5, not below by 1.5
        assert_eq!(eval.values(&x), vec![0.5, -1.5]);
    }

    #[test]
    fn test_acceleration_stencil() {
        // x_t = t^2 has constant second difference 2.
        let x = vec![0.0, 1.0, 4.0, 9.0];
        let eval =
            JointMotionEval::acceleration(slices(4, 1), vec![0.0], vec![1.0]).unwrap();
        assert_eq!(eval.values(&x), vec![2.0, 2.0]);
    }

    #[test]
    fn test_jerk_stencil() {
        // x_t = t^3 has constant third derivative 6.
        let x: Vec<f64> = (0..6).map(|t| (t as f64).powi(3)).collect();
        let eval = JointMotionEval::jerk(slices(6, 1), vec![0.0], vec![1.0]).unwrap();
        assert_eq!(eval.rows(), 2);
        for v in eval.values(&x) {
            assert!((v - 6.0).abs() < 1e-12, "jerk = {v}");
        }
    }

    #[test]
    fn test_jacobian_matches_values() {
        let eval = JointMotionEval::acceleration(slices(4, 2), vec![0.1, 0.2], vec![2.0, 3.0])
            .unwrap()
            .with_tolerances(vec![0.3, 0.0], vec![-0.3, 0.0])
            .unwrap();
        let x: Vec<f64> = (0..8).map(|i| (i as f64) * 0.37 - 1.0).collect();
        let jac = eval.jacobian(&x);

        // Finite-difference check of every Jacobian entry.
        let h = 1e-6;
        let base = eval.values(&x);
        let mut dense = vec![vec![0.0; x.len()]; eval.rows()];
        for &(r, c, v) in &jac {
            dense[r][c] += v;
        }
        for c in 0..x.len() {
            let mut xp = x.clone();
            xp[c] += h;
            let vp = eval.values(&xp);
            for r in 0..eval.rows() {
                let fd = (vp[r] - base[r]) / h;
                assert!(
                    (dense[r][c] - fd).abs() < 1e-5,
                    "J[{r}][{c}] = {}, fd = {fd}",
                    dense[r][c]
                );
            }
        }
    }

    #[test]
    fn test_too_few_steps_rejected() {
        assert!(JointMotionEval::jerk(slices(4, 1), vec![0.0], vec![1.0]).is_err());
        assert!(JointMotionEval::velocity(slices(1, 1), vec![0.0], vec![1.0]).is_err());
    }
}
