//! End-to-end planning scenario: a point robot crossing a corridor with a
//! box obstacle on the straight-line path. The initial trajectory is in
//! collision; the solver must find a collision-free path around the box.

mod common;

use std::sync::Arc;

use common::{point_box_distance, BoxObstacle, BoxWorld};
use nalgebra::{Point3, Vector3};

use sco_collision::config::CollisionConfig;
use sco_collision::descriptor::CollisionTermDesc;
use sco_core::qp::{AdmmQpSolver, QpProblem};
use sco_core::sqp::{SqpParams, SqpStatus, TrustRegionSqpSolver};
use sco_core::term::PenaltyKind;
use sco_terms::request::{
    construct_problem, BasicInfo, InitInfo, JointDerivative, JointMotionTermDesc, ProblemRequest,
    TermKind,
};
use sco_terms::test_support::PointRobot;

const MARGIN: f64 = 0.02;
const BUFFER: f64 = 0.05;

fn corridor_world() -> Arc<BoxWorld> {
    // Obstacle sits on the straight-line path near the corridor middle.
    Arc::new(BoxWorld::new(vec![BoxObstacle::new("box", 0.0, 2.0, 0.5, 0.5)]))
}

fn segment_clearance(world: &BoxWorld, p0: [f64; 2], p1: [f64; 2]) -> f64 {
    let obs = &world.obstacles[0];
    let mut min_dist = f64::INFINITY;
    for k in 0..=200 {
        let t = k as f64 / 200.0;
        let p = Point3::new(
            p0[0] + t * (p1[0] - p0[0]),
            p0[1] + t * (p1[1] - p0[1]),
            0.0,
        );
        let (d, _, _) = point_box_distance(&p, &obs.center, &obs.half_extents);
        min_dist = min_dist.min(d);
    }
    min_dist
}

#[test]
fn test_straight_corridor_with_box() {
    let world = corridor_world();
    let robot = Arc::new(PointRobot::default());

    let start = [-1.9, 0.0];
    let middle = [0.0, 1.9];
    let end = [1.9, 3.8];

    // The seed trajectory runs straight through the obstacle.
    assert!(
        segment_clearance(&world, start, middle) < 0.0
            || segment_clearance(&world, middle, end) < 0.0,
        "seed trajectory should be in collision"
    );

    let mut config = CollisionConfig::new(MARGIN, 10.0);
    config.margin_buffer = BUFFER;
    config.longest_valid_segment_length = 0.1;
    config.max_num_cnt = 3;

    let mut req = ProblemRequest::new(
        BasicInfo { n_steps: 3, fixed_timesteps: vec![0, 2], ..Default::default() },
        InitInfo::GivenTraj {
            trajectory: vec![start.to_vec(), middle.to_vec(), end.to_vec()],
        },
        start.to_vec(),
    );
    req.cost_terms.push(Box::new(JointMotionTermDesc {
        derivative: JointDerivative::Velocity,
        kind: TermKind::Cost(PenaltyKind::Squared),
        coeffs: vec![0.5, 0.5],
        ..Default::default()
    }));
    req.cnt_terms.push(Box::new(CollisionTermDesc {
        env: Some(world.clone()),
        config,
        continuous: true,
        ..Default::default()
    }));

    let (mut problem, _ctx) = construct_problem(&req, robot).unwrap();
    assert_eq!(problem.num_nlp_vars(), 6);
    // Two swept constraints of fixed arity 3.
    assert_eq!(problem.num_nlp_constraints(), 6);

    let params = SqpParams {
        initial_trust_box_size: 0.3,
        max_iterations: 300,
        ..Default::default()
    };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut problem);
    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");

    let x = problem.variable_values();
    let mid = [x[2], x[3]];
    // Endpoints were pinned.
    assert!((x[0] - start[0]).abs() < 1e-5 && (x[1] - start[1]).abs() < 1e-5);
    assert!((x[4] - end[0]).abs() < 1e-5 && (x[5] - end[1]).abs() < 1e-5);

    // Both swept segments are collision free.
    let c0 = segment_clearance(&world, start, mid);
    let c1 = segment_clearance(&world, mid, end);
    assert!(c0 > 0.0, "first segment clearance {c0}");
    assert!(c1 > 0.0, "second segment clearance {c1}");

    // Constraint satisfaction to tolerance implies near-margin clearance.
    let max_viol = solver
        .results()
        .best_constraint_violations
        .iter()
        .fold(f64::NEG_INFINITY, |a: f64, &b| a.max(b));
    assert!(max_viol < solver.params.cnt_tolerance);
}

#[test]
fn test_corridor_discrete_variant() {
    // Same scenario through the point-sampled evaluator.
    let world = corridor_world();
    let robot = Arc::new(PointRobot::default());

    let start = [-1.9, 0.0];
    let middle = [0.0, 1.9];
    let end = [1.9, 3.8];

    let mut config = CollisionConfig::new(MARGIN, 10.0);
    config.margin_buffer = BUFFER;
    config.longest_valid_segment_length = 0.05;
    config.max_num_cnt = 3;

    let mut req = ProblemRequest::new(
        BasicInfo { n_steps: 3, fixed_timesteps: vec![0, 2], ..Default::default() },
        InitInfo::GivenTraj {
            trajectory: vec![start.to_vec(), middle.to_vec(), end.to_vec()],
        },
        start.to_vec(),
    );
    req.cost_terms.push(Box::new(JointMotionTermDesc {
        derivative: JointDerivative::Velocity,
        kind: TermKind::Cost(PenaltyKind::Squared),
        coeffs: vec![0.5, 0.5],
        ..Default::default()
    }));
    req.cnt_terms.push(Box::new(CollisionTermDesc {
        env: Some(world.clone()),
        config,
        continuous: false,
        ..Default::default()
    }));

    let (mut problem, _ctx) = construct_problem(&req, robot).unwrap();
    let params = SqpParams {
        initial_trust_box_size: 0.3,
        max_iterations: 300,
        ..Default::default()
    };
    let mut solver = TrustRegionSqpSolver::with_params(AdmmQpSolver::new(), params);
    let status = solver.solve(&mut problem);
    assert_eq!(status, SqpStatus::NlpConverged, "got {status}");

    let x = problem.variable_values();
    let mid = [x[2], x[3]];
    // The waypoint itself must clear the box by roughly the margin.
    let obs = &world.obstacles[0];
    let (d, _, _) = point_box_distance(&Point3::new(mid[0], mid[1], 0.0), &obs.center, &obs.half_extents);
    assert!(d > 0.0, "middle waypoint clearance {d}");
}

#[test]
fn test_normal_convention() {
    use approx::assert_relative_eq;

    // The fixture's normal points from the obstacle toward the robot.
    let (d, n, nearest) = point_box_distance(
        &Point3::new(1.0, 0.0, 0.0),
        &Point3::new(0.0, 0.0, 0.0),
        &Vector3::new(0.5, 0.5, 0.5),
    );
    assert_relative_eq!(d, 0.5, epsilon = 1e-12);
    assert_eq!(n, Vector3::x());
    assert_eq!(nearest, Point3::new(0.5, 0.0, 0.0));
}
