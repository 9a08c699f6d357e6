//! Analytic box-world fixture: a point robot on two prismatic axes and
//! axis-aligned box obstacles, with exact distance queries. Implements the
//! environment and contact-manager traits so evaluator and end-to-end
//! tests run without any external geometry stack.

// Not every test binary uses every fixture helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nalgebra::{Isometry3, Point3, Vector3};

use sco_collision::config::CollisionMarginData;
use sco_collision::types::{
    ContactRequest, ContactResult, ContactResultMap, ContinuousCollisionType,
    ContinuousContactManager, DiscreteContactManager, Environment,
};
use sco_terms::kin::TransformMap;

#[derive(Debug, Clone)]
pub struct BoxObstacle {
    pub name: String,
    pub center: Point3<f64>,
    pub half_extents: Vector3<f64>,
}

impl BoxObstacle {
    pub fn new(name: &str, cx: f64, cy: f64, hx: f64, hy: f64) -> Self {
        Self {
            name: name.to_string(),
            center: Point3::new(cx, cy, 0.0),
            half_extents: Vector3::new(hx, hy, 1000.0),
        }
    }
}

/// Signed distance from a point to a box with outward normal and the
/// nearest point on the box surface. Negative distance means the point is
/// inside; ties on the exit axis resolve to the first axis.
pub fn point_box_distance(
    p: &Point3<f64>,
    center: &Point3<f64>,
    half: &Vector3<f64>,
) -> (f64, Vector3<f64>, Point3<f64>) {
    let d = p - center;
    let clamped = Vector3::new(
        d.x.clamp(-half.x, half.x),
        d.y.clamp(-half.y, half.y),
        d.z.clamp(-half.z, half.z),
    );
    if (d - clamped).norm() > 0.0 {
        let diff = d - clamped;
        let dist = diff.norm();
        (dist, diff / dist, center + clamped)
    } else {
        // Inside: exit through the closest face.
        let mut axis = 0;
        let mut depth = f64::INFINITY;
        for a in 0..3 {
            let pen = half[a] - d[a].abs();
            if pen < depth {
                depth = pen;
                axis = a;
            }
        }
        let mut normal = Vector3::zeros();
        normal[axis] = if d[axis] >= 0.0 { 1.0 } else { -1.0 };
        let mut surface = *center + d;
        surface[axis] = center[axis] + normal[axis] * half[axis];
        (-depth, normal, surface)
    }
}

struct ManagerCore {
    obstacles: Vec<BoxObstacle>,
    robot_link: String,
    robot_radius: f64,
    cutoff: f64,
    calls: Arc<AtomicUsize>,
}

impl ManagerCore {
    fn contact_for(&self, shape_id: usize, obstacle: &BoxObstacle, p: &Point3<f64>) -> Option<ContactResult> {
        let (raw, normal, nearest) =
            point_box_distance(p, &obstacle.center, &obstacle.half_extents);
        let dist = raw - self.robot_radius;
        if dist >= self.cutoff {
            return None;
        }
        Some(ContactResult {
            link_names: [obstacle.name.clone(), self.robot_link.clone()],
            shape_id: [shape_id, 0],
            subshape_id: [0, 0],
            nearest_points: [nearest, *p],
            normal,
            distance: dist,
            ..Default::default()
        })
    }
}

pub struct BoxDiscreteManager {
    core: ManagerCore,
    robot_pos: Point3<f64>,
}

impl DiscreteContactManager for BoxDiscreteManager {
    fn set_active_collision_objects(&mut self, _links: &[String]) {}

    fn set_margin_data(&mut self, _margins: CollisionMarginData) {}

    fn set_default_margin(&mut self, margin: f64) {
        self.core.cutoff = margin;
    }

    fn set_transform(&mut self, link: &str, pose: &Isometry3<f64>) {
        if link == self.core.robot_link {
            self.robot_pos = Point3::from(pose.translation.vector);
        } else if let Some(obs) = self.core.obstacles.iter_mut().find(|o| o.name == link) {
            obs.center = Point3::from(pose.translation.vector);
        }
    }

    fn contact_test(&mut self, results: &mut ContactResultMap, _request: &ContactRequest) {
        self.core.calls.fetch_add(1, Ordering::Relaxed);
        for (i, obs) in self.core.obstacles.clone().iter().enumerate() {
            if let Some(c) = self.core.contact_for(i, obs, &self.robot_pos) {
                results.add(c);
            }
        }
    }
}

pub struct BoxContinuousManager {
    core: ManagerCore,
    robot_sweep: (Point3<f64>, Point3<f64>),
    samples: usize,
}

impl ContinuousContactManager for BoxContinuousManager {
    fn set_active_collision_objects(&mut self, _links: &[String]) {}

    fn set_margin_data(&mut self, _margins: CollisionMarginData) {}

    fn set_default_margin(&mut self, margin: f64) {
        self.core.cutoff = margin;
    }

    fn set_transform(&mut self, link: &str, pose: &Isometry3<f64>) {
        if let Some(obs) = self.core.obstacles.iter_mut().find(|o| o.name == link) {
            obs.center = Point3::from(pose.translation.vector);
        }
    }

    fn set_swept_transform(&mut self, link: &str, pose0: &Isometry3<f64>, pose1: &Isometry3<f64>) {
        if link == self.core.robot_link {
            self.robot_sweep = (
                Point3::from(pose0.translation.vector),
                Point3::from(pose1.translation.vector),
            );
        }
    }

    fn contact_test(&mut self, results: &mut ContactResultMap, _request: &ContactRequest) {
        self.core.calls.fetch_add(1, Ordering::Relaxed);
        let (p0, p1) = self.robot_sweep;
        for (i, obs) in self.core.obstacles.clone().iter().enumerate() {
            // Closest approach along the swept segment, by dense sampling.
            let mut best_t = 0.0;
            let mut best = f64::INFINITY;
            for k in 0..=self.samples {
                let t = k as f64 / self.samples as f64;
                let p = p0 + (p1 - p0) * t;
                let (raw, _, _) = point_box_distance(&Point3::from(p.coords), &obs.center, &obs.half_extents);
                if raw < best {
                    best = raw;
                    best_t = t;
                }
            }
            let p_best = Point3::from((p0 + (p1 - p0) * best_t).coords);
            if let Some(mut c) = self.core.contact_for(i, obs, &p_best) {
                let kind = if best_t <= 0.0 {
                    ContinuousCollisionType::Time0
                } else if best_t >= 1.0 {
                    ContinuousCollisionType::Time1
                } else {
                    ContinuousCollisionType::Between
                };
                c.cc_type = [kind; 2];
                c.cc_time = [best_t; 2];
                results.add(c);
            }
        }
    }
}

/// The environment fixture. Counters record how many contact tests each
/// manager family has run (across all clones).
pub struct BoxWorld {
    pub obstacles: Vec<BoxObstacle>,
    pub robot_link: String,
    pub robot_radius: f64,
    pub movable_obstacles: Vec<String>,
    pub discrete_calls: Arc<AtomicUsize>,
    pub continuous_calls: Arc<AtomicUsize>,
}

impl BoxWorld {
    pub fn new(obstacles: Vec<BoxObstacle>) -> Self {
        Self {
            obstacles,
            robot_link: "robot".to_string(),
            robot_radius: 0.0,
            movable_obstacles: Vec::new(),
            discrete_calls: Arc::new(AtomicUsize::new(0)),
            continuous_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Environment for BoxWorld {
    fn state(&self, _joint_names: &[String], joint_values: &[f64]) -> TransformMap {
        let mut map = TransformMap::new();
        map.insert(
            self.robot_link.clone(),
            Isometry3::translation(joint_values[0], joint_values[1], 0.0),
        );
        for obs in &self.obstacles {
            map.insert(
                obs.name.clone(),
                Isometry3::translation(obs.center.x, obs.center.y, obs.center.z),
            );
        }
        map
    }

    fn active_link_names(&self) -> Vec<String> {
        let mut names = vec![self.robot_link.clone()];
        names.extend(self.movable_obstacles.iter().cloned());
        names
    }

    fn discrete_contact_manager(&self) -> Box<dyn DiscreteContactManager> {
        Box::new(BoxDiscreteManager {
            core: ManagerCore {
                obstacles: self.obstacles.clone(),
                robot_link: self.robot_link.clone(),
                robot_radius: self.robot_radius,
                cutoff: 0.0,
                calls: self.discrete_calls.clone(),
            },
            robot_pos: Point3::origin(),
        })
    }

    fn continuous_contact_manager(&self) -> Box<dyn ContinuousContactManager> {
        Box::new(BoxContinuousManager {
            core: ManagerCore {
                obstacles: self.obstacles.clone(),
                robot_link: self.robot_link.clone(),
                robot_radius: self.robot_radius,
                cutoff: 0.0,
                calls: self.continuous_calls.clone(),
            },
            robot_sweep: (Point3::origin(), Point3::origin()),
            samples: 20,
        })
    }
}
