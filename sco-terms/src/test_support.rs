//! Analytic robot fixtures implementing the kinematics traits.
//!
//! Shared by the unit and integration suites of this workspace; kept in the
//! library (rather than per-test duplication) so downstream crates can
//! exercise terms against the same models.

use nalgebra::{DMatrix, Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

use crate::kin::{InverseKinematics, JointGroup, TransformMap};

/// Planar revolute arm in the XY plane, base at the origin, one link frame
/// at the end of each segment.
#[derive(Debug, Clone)]
pub struct PlanarArm {
    link_lengths: Vec<f64>,
}

impl PlanarArm {
    pub fn new(link_lengths: Vec<f64>) -> Self {
        assert!(!link_lengths.is_empty());
        Self { link_lengths }
    }

    pub fn link_name(&self, i: usize) -> String {
        format!("link_{}", i + 1)
    }

    /// Name of the last link (the tool frame).
    pub fn tip_link(&self) -> String {
        self.link_name(self.link_lengths.len() - 1)
    }

    /// World positions of every joint axis (joint k sits at the end of
    /// link k-1).
    fn joint_positions(&self, q: &[f64]) -> Vec<Point3<f64>> {
        let mut out = Vec::with_capacity(q.len());
        let mut angle = 0.0;
        let mut pos = Point3::origin();
        for (k, &len) in self.link_lengths.iter().enumerate() {
            out.push(pos);
            angle += q[k];
            pos += Vector3::new(len * angle.cos(), len * angle.sin(), 0.0);
        }
        out
    }
}

impl JointGroup for PlanarArm {
    fn joint_names(&self) -> Vec<String> {
        (0..self.link_lengths.len()).map(|i| format!("joint_{}", i + 1)).collect()
    }

    fn num_joints(&self) -> usize {
        self.link_lengths.len()
    }

    fn active_link_names(&self) -> Vec<String> {
        (0..self.link_lengths.len()).map(|i| self.link_name(i)).collect()
    }

    fn calc_fwd_kin(&self, joint_values: &[f64]) -> TransformMap {
        let mut out = TransformMap::new();
        let mut angle = 0.0;
        let mut pos = Vector3::zeros();
        for (k, &len) in self.link_lengths.iter().enumerate() {
            angle += joint_values[k];
            pos += Vector3::new(len * angle.cos(), len * angle.sin(), 0.0);
            let iso = Isometry3::from_parts(
                Translation3::from(pos),
                UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle),
            );
            out.insert(self.link_name(k), iso);
        }
        out
    }

    fn calc_jacobian(&self, joint_values: &[f64], link: &str, point: &Point3<f64>) -> DMatrix<f64> {
        let n = self.num_joints();
        let mut jac = DMatrix::zeros(6, n);
        let link_idx = (0..n)
            .find(|&i| self.link_name(i) == link)
            .unwrap_or(n - 1);
        let joints = self.joint_positions(joint_values);
        let ez = Vector3::z();
        for k in 0..=link_idx {
            let arm = point - joints[k];
            let v = ez.cross(&arm);
            jac[(0, k)] = v.x;
            jac[(1, k)] = v.y;
            jac[(2, k)] = v.z;
            jac[(5, k)] = 1.0;
        }
        jac
    }

    fn limits(&self) -> Vec<(f64, f64)> {
        vec![(-std::f64::consts::PI, std::f64::consts::PI); self.num_joints()]
    }
}

/// Gradient-descent IK over the planar arm's tip position. Good enough to
/// seed proximity terms in tests.
#[derive(Debug, Clone)]
pub struct PlanarArmIk {
    pub arm: PlanarArm,
}

impl InverseKinematics for PlanarArmIk {
    fn solve(&self, target: &Isometry3<f64>, seed: &[f64]) -> Option<Vec<f64>> {
        let goal = target.translation.vector;
        let tip = self.arm.tip_link();
        let mut q = seed.to_vec();
        for _ in 0..200 {
            let fk = self.arm.calc_fwd_kin(&q);
            let cur = fk.get(&tip)?.translation.vector;
            let err = goal - cur;
            if err.norm() < 1e-10 {
                return Some(q);
            }
            // Damped Gauss-Newton on the translation rows.
            let point = Point3::from(cur);
            let jac = self.arm.calc_jacobian(&q, &tip, &point);
            let mut m = nalgebra::Matrix3::<f64>::zeros();
            for r in 0..3 {
                for c in 0..3 {
                    for k in 0..q.len() {
                        m[(r, c)] += jac[(r, k)] * jac[(c, k)];
                    }
                }
                m[(r, r)] += 1e-6;
            }
            let y = m.lu().solve(&err)?;
            for (j, qj) in q.iter_mut().enumerate() {
                let mut dq = 0.0;
                for r in 0..3 {
                    dq += jac[(r, j)] * y[r];
                }
                *qj += dq;
            }
        }
        let fk = self.arm.calc_fwd_kin(&q);
        let cur = fk.get(&tip)?.translation.vector;
        if (goal - cur).norm() < 1e-6 {
            Some(q)
        } else {
            None
        }
    }
}

/// Point robot on two prismatic axes (x, y); a single link at the joint
/// position with identity rotation.
#[derive(Debug, Clone)]
pub struct PointRobot {
    pub link: String,
    pub limit: f64,
}

impl Default for PointRobot {
    fn default() -> Self {
        Self { link: "robot".to_string(), limit: 10.0 }
    }
}

impl JointGroup for PointRobot {
    fn joint_names(&self) -> Vec<String> {
        vec!["x".to_string(), "y".to_string()]
    }

    fn num_joints(&self) -> usize {
        2
    }

    fn active_link_names(&self) -> Vec<String> {
        vec![self.link.clone()]
    }

    fn calc_fwd_kin(&self, joint_values: &[f64]) -> TransformMap {
        let mut out = TransformMap::new();
        out.insert(
            self.link.clone(),
            Isometry3::translation(joint_values[0], joint_values[1], 0.0),
        );
        out
    }

    fn calc_jacobian(&self, _joint_values: &[f64], _link: &str, _point: &Point3<f64>) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(6, 2);
        jac[(0, 0)] = 1.0;
        jac[(1, 1)] = 1.0;
        jac
    }

    fn limits(&self) -> Vec<(f64, f64)> {
        vec![(-self.limit, self.limit); 2]
    }
}
