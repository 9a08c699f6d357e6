//! Kinematics collaborator traits.
//!
//! The optimizer never parses robot descriptions or solves scene graphs;
//! it consumes a solved kinematic model through these traits. Test suites
//! implement them with small analytic robots.

use std::collections::HashMap;

use nalgebra::{DMatrix, Isometry3, Point3};

/// Link name to world pose.
pub type TransformMap = HashMap<String, Isometry3<f64>>;

/// A solved kinematic group: the chain of actively controlled joints.
pub trait JointGroup: Send + Sync {
    fn joint_names(&self) -> Vec<String>;

    fn num_joints(&self) -> usize;

    /// Links whose pose changes with the group's joints.
    fn active_link_names(&self) -> Vec<String>;

    /// Forward kinematics: world pose of every active link at `joint_values`.
    fn calc_fwd_kin(&self, joint_values: &[f64]) -> TransformMap;

    /// Geometric Jacobian of `link` about `point` (world coordinates):
    /// 6 x n, translation rows first, then rotation.
    fn calc_jacobian(&self, joint_values: &[f64], link: &str, point: &Point3<f64>) -> DMatrix<f64>;

    /// Per-joint (lower, upper) position limits.
    fn limits(&self) -> Vec<(f64, f64)>;
}

/// Inverse kinematics collaborator used to seed proximity terms.
pub trait InverseKinematics: Send + Sync {
    /// A joint configuration reaching `target`, or `None` when out of reach.
    fn solve(&self, target: &Isometry3<f64>, seed: &[f64]) -> Option<Vec<f64>>;
}
