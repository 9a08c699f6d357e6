//! Joint-position variable blocks.
//!
//! One block per trajectory timestep, bounded by the group's joint limits.
//! Fixed timesteps and fixed DOFs are expressed with zero-width bounds so
//! they never require special handling downstream.

use sco_core::qp::SqpProblem;
use sco_core::variable::VarSlice;

use crate::error::{TermError, TermResult};
use crate::kin::JointGroup;

/// Add one joint-position block for timestep `step`.
///
/// `fixed` pins the whole timestep; `fixed_dofs` pins individual joints.
pub fn add_joint_position(
    problem: &mut SqpProblem,
    manip: &dyn JointGroup,
    step: usize,
    values: &[f64],
    fixed: bool,
    fixed_dofs: &[usize],
) -> TermResult<VarSlice> {
    let n = manip.num_joints();
    if values.len() != n {
        return Err(TermError::Invalid(format!(
            "joint position for step {step} has {} values, expected {n}",
            values.len()
        )));
    }
    for &dof in fixed_dofs {
        if dof >= n {
            return Err(TermError::Invalid(format!(
                "fixed DOF index {dof} out of range for {n} joints"
            )));
        }
    }

    let limits = manip.limits();
    let mut lower = Vec::with_capacity(n);
    let mut upper = Vec::with_capacity(n);
    for j in 0..n {
        if fixed || fixed_dofs.contains(&j) {
            lower.push(values[j]);
            upper.push(values[j]);
        } else {
            lower.push(limits[j].0);
            upper.push(limits[j].1);
        }
    }

    let slice = problem.add_var_block(format!("joint_position_{step}"), values, &lower, &upper)?;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PlanarArm;

    #[test]
    fn test_bounds_follow_limits_and_fixing() {
        let arm = PlanarArm::new(vec![1.0, 1.0]);
        let mut prob = SqpProblem::new();
        let s0 = add_joint_position(&mut prob, &arm, 0, &[0.1, 0.2], true, &[]).unwrap();
        let s1 = add_joint_position(&mut prob, &arm, 1, &[0.3, 0.4], false, &[1]).unwrap();
        assert_eq!(s0, VarSlice { start: 0, len: 2 });
        assert_eq!(s1, VarSlice { start: 2, len: 2 });

        let vars = prob.variables();
        let b0 = vars.find("joint_position_0").unwrap();
        assert_eq!(b0.lower(), b0.upper());

        let b1 = vars.find("joint_position_1").unwrap();
        assert!(b1.lower()[0] < b1.upper()[0]);
        assert_eq!(b1.lower()[1], 0.4);
        assert_eq!(b1.upper()[1], 0.4);
    }

    #[test]
    fn test_rejects_wrong_arity() {
        let arm = PlanarArm::new(vec![1.0, 1.0]);
        let mut prob = SqpProblem::new();
        assert!(add_joint_position(&mut prob, &arm, 0, &[0.1], false, &[]).is_err());
    }
}
