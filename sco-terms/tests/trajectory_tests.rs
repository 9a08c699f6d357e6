//! End-to-end trajectory scenarios driven through the full SQP stack.

use std::sync::Arc;

use nalgebra::Point3;

use sco_core::qp::{AdmmQpSolver, QpProblem};
use sco_core::sqp::{SqpParams, SqpStatus, TrustRegionSqpSolver};
use sco_core::term::{ComparisonKind, CostTerm, PenaltyKind};
use sco_terms::request::{
    construct_problem, BasicInfo, CartPoseTermDesc, InitInfo, JointDerivative,
    JointMotionTermDesc, ProblemRequest, TermKind,
};
use sco_terms::test_support::PlanarArm;
use sco_terms::{make_term, JointGroup, JointMotionEval};

/// Joint-velocity hinge: two DOF, five timesteps, start trajectory moving
/// at +-1.0 per step, velocity tolerance band +-0.5, hinge cost only.
/// The optimizer must compress every step displacement into the band.
#[test]
fn test_joint_velocity_hinge_compresses_steps() {
    let n_steps = 5;
    let mut problem = sco_core::qp::SqpProblem::new();
    let mut steps = Vec::new();
    for t in 0..n_steps {
        // Joint 0 ramps up, joint 1 ramps down: velocities +1 and -1.
        let values = [t as f64, -(t as f64)];
        let (lower, upper) = if t == 0 {
            (values.to_vec(), values.to_vec())
        } else {
            (vec![-50.0, -50.0], vec![50.0, 50.0])
        };
        steps.push(
            problem
                .add_var_block(format!("joint_position_{t}"), &values, &lower, &upper)
                .unwrap(),
        );
    }

    let eval = JointMotionEval::velocity(steps.clone(), vec![0.0, 0.0], vec![1.0, 1.0])
        .unwrap()
        .with_tolerances(vec![0.5, 0.5], vec![-0.5, -0.5])
        .unwrap();
    problem
        .add_cost(CostTerm::new("joint_vel_limit", PenaltyKind::Hinge, Box::new(eval)))
        .unwrap();
    problem.setup().unwrap();

    let params = SqpParams { initial_trust_box_size: 1.0, max_iterations: 100, ..Default::default() };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut problem);
    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");

    let x = problem.variable_values();
    for t in 0..n_steps - 1 {
        for j in 0..2 {
            let dv = x[(t + 1) * 2 + j] - x[t * 2 + j];
            assert!(
                dv.abs() <= 0.5 + 1e-3,
                "step {t} joint {j} velocity {dv} outside band"
            );
        }
    }
}

/// Same band expressed as an inequality constraint instead of a cost;
/// exercises the merit/penalty machinery end to end.
#[test]
fn test_joint_velocity_constraint_band() {
    let n_steps = 4;
    let mut problem = sco_core::qp::SqpProblem::new();
    let mut steps = Vec::new();
    for t in 0..n_steps {
        let values = [2.0 * t as f64];
        let (lower, upper) = if t == 0 {
            (values.to_vec(), values.to_vec())
        } else {
            (vec![-50.0], vec![50.0])
        };
        steps.push(
            problem
                .add_var_block(format!("joint_position_{t}"), &values, &lower, &upper)
                .unwrap(),
        );
    }

    // Squared pull toward the (infeasible at start) final position keeps
    // the problem from collapsing to the trivial all-zero trajectory.
    let hold = JointMotionEval::position(vec![steps[n_steps - 1]], vec![6.0], vec![1.0]).unwrap();
    problem
        .add_cost(CostTerm::new("hold_goal", PenaltyKind::Squared, Box::new(hold)))
        .unwrap();

    let band = JointMotionEval::velocity(steps.clone(), vec![0.0], vec![1.0])
        .unwrap()
        .with_tolerances(vec![1.0], vec![-1.0])
        .unwrap();
    problem
        .add_constraint(sco_core::term::ConstraintTerm::new(
            "vel_band",
            ComparisonKind::Ineq,
            Box::new(band),
        ))
        .unwrap();
    problem.setup().unwrap();

    let params = SqpParams { initial_trust_box_size: 1.0, max_iterations: 100, ..Default::default() };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut problem);
    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");

    let x = problem.variable_values();
    for t in 0..n_steps - 1 {
        let dv = x[t + 1] - x[t];
        assert!(dv.abs() <= 1.0 + 1e-3, "velocity {dv} outside band");
    }
    // The goal pull keeps the trajectory moving: max feasible end point is
    // 0 + 3 * 1.0 = 3, and the quadratic pull should saturate the band.
    assert!(x[n_steps - 1] > 2.5, "end position {}", x[n_steps - 1]);
}

/// Cartesian pose constraint at the last timestep from a stationary
/// initialization; both position and rotation errors must vanish.
#[test]
fn test_cart_pose_at_last_step() {
    let arm = Arc::new(PlanarArm::new(vec![1.0, 1.0]));
    let tip = arm.tip_link();
    let goal_q = [0.6, 0.8];
    let target = *arm.calc_fwd_kin(&goal_q).get(&tip).unwrap();

    let n_steps = 5;
    let mut req = ProblemRequest::new(
        BasicInfo { n_steps, fixed_timesteps: vec![0], ..Default::default() },
        InitInfo::Stationary,
        vec![0.1, 0.1],
    );
    req.cost_terms.push(Box::new(JointMotionTermDesc {
        derivative: JointDerivative::Velocity,
        kind: TermKind::Cost(PenaltyKind::Squared),
        coeffs: vec![0.05, 0.05],
        ..Default::default()
    }));
    req.cnt_terms.push(Box::new(CartPoseTermDesc {
        kind: TermKind::Constraint(ComparisonKind::Eq),
        step: n_steps - 1,
        link: tip.clone(),
        target,
        ..Default::default()
    }));

    let (mut problem, _ctx) = construct_problem(&req, arm.clone()).unwrap();

    let params = SqpParams {
        initial_trust_box_size: 0.5,
        max_iterations: 200,
        ..Default::default()
    };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut problem);
    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");

    let x = problem.variable_values();
    let q_last = &x[(n_steps - 1) * 2..n_steps * 2];
    let reached = *arm.calc_fwd_kin(q_last).get(&tip).unwrap();
    let pos_err = (reached.translation.vector - target.translation.vector).norm();
    let rot_err = (target.rotation.inverse() * reached.rotation).angle();
    assert!(pos_err < 1e-3, "position error {pos_err}");
    assert!(rot_err < 1e-3, "rotation error {rot_err}");
}

/// The registry path: build the cart-pose descriptor by name, configure it
/// through the downcast hook, and solve.
#[test]
fn test_registry_built_descriptor_solves() {
    let arm = Arc::new(PlanarArm::new(vec![1.0, 1.0]));
    let tip = arm.tip_link();
    let target = *arm.calc_fwd_kin(&[0.4, 0.5]).get(&tip).unwrap();

    let mut desc = make_term("cart_pose").expect("cart_pose registered");
    {
        let cfg = desc
            .as_any_mut()
            .downcast_mut::<CartPoseTermDesc>()
            .expect("descriptor type");
        cfg.kind = TermKind::Cost(PenaltyKind::Squared);
        cfg.step = 2;
        cfg.link = tip.clone();
        cfg.target = target;
    }

    let mut req = ProblemRequest::new(
        BasicInfo { n_steps: 3, fixed_timesteps: vec![0], ..Default::default() },
        InitInfo::Stationary,
        vec![0.2, 0.2],
    );
    req.cost_terms.push(desc);

    let (mut problem, _ctx) = construct_problem(&req, arm.clone()).unwrap();
    let mut solver = TrustRegionSqpSolver::new(AdmmQpSolver::new());
    let status = solver.solve(&mut problem);
    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");

    let x = problem.variable_values();
    let reached = *arm.calc_fwd_kin(&x[4..6]).get(&tip).unwrap();
    let pos_err = (reached.translation.vector - target.translation.vector).norm();
    assert!(pos_err < 1e-2, "position error {pos_err}");
}

/// Jacobians of the planar-arm fixture feed the Cartesian terms; sanity
/// check the 6-row convention used throughout (translation then rotation).
#[test]
fn test_fixture_jacobian_convention() {
    let arm = PlanarArm::new(vec![1.0, 1.0]);
    let q = [0.0, 0.0];
    let tip = arm.tip_link();
    let point = Point3::new(2.0, 0.0, 0.0);
    let jac = arm.calc_jacobian(&q, &tip, &point);
    assert_eq!(jac.nrows(), 6);
    assert_eq!(jac.ncols(), 2);
    // Rotation about z shows up in row 5.
    assert_eq!(jac[(5, 0)], 1.0);
    assert_eq!(jac[(5, 1)], 1.0);
}
