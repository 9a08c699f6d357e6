//! Contact data structures and the contact-manager collaborator traits.
//!
//! The optimizer never touches geometry; contact queries go through the
//! manager traits at the bottom of this file. Results are keyed by
//! unordered link-name pairs in a `BTreeMap` so iteration order (and with
//! it every downstream reduction) is deterministic.

use std::collections::BTreeMap;

use nalgebra::{Isometry3, Point3, Vector3};

use sco_terms::kin::TransformMap;

use crate::config::CollisionMarginData;

/// Unordered pair of link names, stored sorted.
pub type LinkPair = (String, String);

/// Build the canonical (sorted) link pair key.
pub fn make_link_pair(a: &str, b: &str) -> LinkPair {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Classification of a contact along a swept motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContinuousCollisionType {
    /// Not a continuous contact (plain discrete query)
    #[default]
    None,
    /// Contact at the start configuration
    Time0,
    /// Contact at the end configuration
    Time1,
    /// Contact strictly inside the motion
    Between,
}

/// One contact between two (sub)shapes.
#[derive(Debug, Clone)]
pub struct ContactResult {
    /// Link names as reported by the manager; the normal points from
    /// `link_names[0]` toward `link_names[1]`.
    pub link_names: [String; 2],
    pub shape_id: [usize; 2],
    pub subshape_id: [usize; 2],
    pub nearest_points: [Point3<f64>; 2],
    pub normal: Vector3<f64>,
    /// Signed distance; negative means penetration.
    pub distance: f64,
    /// Per-side continuous classification.
    pub cc_type: [ContinuousCollisionType; 2],
    /// Per-side normalized contact time in `[0, 1]`; meaningful for
    /// `Time0`/`Time1`/`Between`.
    pub cc_time: [f64; 2],
    /// Interpolation weight applied when this contact came from an
    /// interpolated sub-state (`dt = 1/(n-1)`); 1.0 otherwise.
    pub interpolation_weight: f64,
}

impl Default for ContactResult {
    fn default() -> Self {
        Self {
            link_names: [String::new(), String::new()],
            shape_id: [0, 0],
            subshape_id: [0, 0],
            nearest_points: [Point3::origin(), Point3::origin()],
            normal: Vector3::zeros(),
            distance: f64::MAX,
            cc_type: [ContinuousCollisionType::None; 2],
            cc_time: [-1.0; 2],
            interpolation_weight: 1.0,
        }
    }
}

/// Contacts grouped by link pair, deterministically ordered.
#[derive(Debug, Clone, Default)]
pub struct ContactResultMap {
    map: BTreeMap<LinkPair, Vec<ContactResult>>,
}

impl ContactResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, contact: ContactResult) {
        let key = make_link_pair(&contact.link_names[0], &contact.link_names[1]);
        self.map.entry(key).or_default().push(contact);
    }

    pub fn is_empty(&self) -> bool {
        self.map.values().all(|v| v.is_empty())
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Total number of contacts.
    pub fn count(&self) -> usize {
        self.map.values().map(|v| v.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LinkPair, &Vec<ContactResult>)> {
        self.map.iter()
    }

    /// Apply a pair-wise filter; pairs whose vectors end up empty are kept
    /// (and skipped by iteration consumers).
    pub fn filter<F>(&mut self, mut f: F)
    where
        F: FnMut(&LinkPair, &mut Vec<ContactResult>),
    {
        for (key, contacts) in self.map.iter_mut() {
            f(key, contacts);
        }
    }

    /// Merge contacts found at sub-state `index` of `num_states`
    /// interpolated states into this map.
    ///
    /// Continuous sub-interval results get their contact times rescaled
    /// from the sub-interval to the whole motion and are re-classified;
    /// discrete node results are stamped with the node time. Contacts from
    /// interpolated indices carry `dt` as their interpolation weight.
    pub fn add_interpolated_results(
        &mut self,
        mut contacts: ContactResultMap,
        index: usize,
        last_state_idx: usize,
        dt: f64,
        discrete: bool,
    ) {
        for (_pair, results) in contacts.map.iter_mut() {
            for mut contact in results.drain(..) {
                if discrete {
                    let t = index as f64 * dt;
                    let kind = if index == 0 {
                        ContinuousCollisionType::Time0
                    } else if index == last_state_idx {
                        ContinuousCollisionType::Time1
                    } else {
                        ContinuousCollisionType::Between
                    };
                    contact.cc_type = [kind; 2];
                    contact.cc_time = [t; 2];
                    contact.interpolation_weight =
                        if index == 0 || index == last_state_idx { 1.0 } else { dt };
                } else {
                    for side in 0..2 {
                        let local = match contact.cc_type[side] {
                            ContinuousCollisionType::Time0 => 0.0,
                            ContinuousCollisionType::Time1 => 1.0,
                            ContinuousCollisionType::Between => contact.cc_time[side].clamp(0.0, 1.0),
                            ContinuousCollisionType::None => 0.0,
                        };
                        let global = (index as f64 + local) * dt;
                        contact.cc_time[side] = global;
                        contact.cc_type[side] = if global <= 0.0 {
                            ContinuousCollisionType::Time0
                        } else if global >= 1.0 {
                            ContinuousCollisionType::Time1
                        } else {
                            ContinuousCollisionType::Between
                        };
                    }
                    contact.interpolation_weight = dt;
                }
                self.add(contact);
            }
        }
    }
}

/// How a contact test should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactTestType {
    /// Report every contact within the margin
    #[default]
    All,
    /// Report only the closest contact per pair
    Closest,
}

/// Contact query request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactRequest {
    pub test_type: ContactTestType,
}

/// Point-sample contact queries at a single configuration.
pub trait DiscreteContactManager: Send {
    fn set_active_collision_objects(&mut self, links: &[String]);
    fn set_margin_data(&mut self, margins: CollisionMarginData);
    /// Raise the default query margin (used to widen checks by the buffer).
    fn set_default_margin(&mut self, margin: f64);
    fn set_transform(&mut self, link: &str, pose: &Isometry3<f64>);
    fn contact_test(&mut self, results: &mut ContactResultMap, request: &ContactRequest);
}

/// Swept-shape contact queries between two configurations.
pub trait ContinuousContactManager: Send {
    fn set_active_collision_objects(&mut self, links: &[String]);
    fn set_margin_data(&mut self, margins: CollisionMarginData);
    fn set_default_margin(&mut self, margin: f64);
    /// Static objects keep a single pose.
    fn set_transform(&mut self, link: &str, pose: &Isometry3<f64>);
    /// Active objects sweep from `pose0` to `pose1`.
    fn set_swept_transform(&mut self, link: &str, pose0: &Isometry3<f64>, pose1: &Isometry3<f64>);
    fn contact_test(&mut self, results: &mut ContactResultMap, request: &ContactRequest);
}

/// Scene collaborator: state queries plus contact-manager factories.
pub trait Environment: Send + Sync {
    /// World pose of every link given the named joints' values (used to
    /// place movable links outside the kinematic chain).
    fn state(&self, joint_names: &[String], joint_values: &[f64]) -> TransformMap;
    fn active_link_names(&self) -> Vec<String>;
    fn discrete_contact_manager(&self) -> Box<dyn DiscreteContactManager>;
    fn continuous_contact_manager(&self) -> Box<dyn ContinuousContactManager>;
}
