//! Longest-valid-segment collision evaluators.
//!
//! Both evaluators take a pair of joint vectors, subdivide the motion so
//! no sample is further than `longest_valid_segment_length` from its
//! neighbor, run contact queries (swept per sub-interval for the
//! continuous variant, point-sampled per node for the discrete one),
//! filter and reduce the contacts into gradient result sets, and cache the
//! resulting snapshot.

use std::sync::{Arc, Mutex};

use sco_terms::kin::{JointGroup, TransformMap};

use crate::cache::{cache_key, CollisionCache, CollisionCacheData};
use crate::config::CollisionConfig;
use crate::error::{CollisionError, CollisionResult};
use crate::gradients::{get_gradient_continuous, GradientResultsSet};
use crate::types::{
    ContactResultMap, ContinuousCollisionType, ContinuousContactManager, DiscreteContactManager,
    Environment, LinkPair,
};

/// Shared surface of the LVS evaluators.
///
/// `position_vars_fixed` marks which motion endpoint is pinned;
/// `bounds_size` is the fixed arity of the consuming constraint.
pub trait CollisionEvaluator: Send + Sync {
    fn calc_collision_data(
        &self,
        dof_vals0: &[f64],
        dof_vals1: &[f64],
        position_vars_fixed: [bool; 2],
        bounds_size: usize,
    ) -> Arc<CollisionCacheData>;

    fn config(&self) -> &CollisionConfig;

    fn margin_buffer(&self) -> f64 {
        self.config().margin_buffer
    }
}

/// Number of interpolated states for a motion of length `dist`.
pub fn num_interpolated_states(dist: f64, longest_valid_segment_length: f64) -> usize {
    if dist > longest_valid_segment_length {
        (dist / longest_valid_segment_length).ceil() as usize + 1
    } else {
        2
    }
}

fn joint_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

fn lerp_state(a: &[f64], b: &[f64], alpha: f64) -> Vec<f64> {
    a.iter().zip(b.iter()).map(|(x, y)| x + alpha * (y - x)).collect()
}

/// Drop zero-coefficient pairs, contacts beyond `margin + buffer`, and
/// contacts pinned to a fixed endpoint.
fn filter_contacts(
    results: &mut ContactResultMap,
    config: &CollisionConfig,
    position_vars_fixed: [bool; 2],
) {
    let zero_pairs = config.coeff_data.pairs_with_zero_coeff().clone();
    results.filter(|key: &LinkPair, contacts| {
        if zero_pairs.contains(key) {
            contacts.clear();
            return;
        }
        let margin = config.margin_data.pair_margin(&key.0, &key.1);
        let cutoff = margin + config.margin_buffer;
        contacts.retain(|c| {
            if c.distance > cutoff {
                return false;
            }
            if position_vars_fixed[0] && c.cc_type[0] == ContinuousCollisionType::Time0 {
                return false;
            }
            if position_vars_fixed[1] && c.cc_type[0] == ContinuousCollisionType::Time1 {
                return false;
            }
            true
        });
    });
}

/// Group contacts by (link pair, subshape pair) and compute gradients.
fn reduce_to_gradient_sets(
    data: &mut CollisionCacheData,
    config: &CollisionConfig,
    manip: &dyn JointGroup,
    dof_vals0: &[f64],
    dof_vals1: &[f64],
) {
    use std::collections::BTreeMap;

    fn cantor(a: usize, b: usize) -> usize {
        (a + b) * (a + b + 1) / 2 + b
    }

    for (pair, contacts) in data.contact_results_map.iter() {
        if contacts.is_empty() {
            continue;
        }
        let coeff = config.coeff_data.pair_coeff(&pair.0, &pair.1);
        let margin = config.margin_data.pair_margin(&pair.0, &pair.1);

        let mut shape_grs: BTreeMap<(usize, usize), GradientResultsSet> = BTreeMap::new();
        for contact in contacts {
            let shape_key = (
                cantor(contact.shape_id[0], contact.subshape_id[0]),
                cantor(contact.shape_id[1], contact.subshape_id[1]),
            );
            let grad = get_gradient_continuous(
                dof_vals0,
                dof_vals1,
                contact,
                margin,
                config.margin_buffer,
                manip,
            );
            shape_grs
                .entry(shape_key)
                .or_insert_with(|| GradientResultsSet {
                    key: pair.clone(),
                    shape_key,
                    coeff,
                    is_continuous: true,
                    ..Default::default()
                })
                .add(grad);
        }
        data.gradient_results_sets.extend(shape_grs.into_values());
    }
}

/// Sort by the endpoint-appropriate worst error and keep the top
/// `bounds_size` sets.
fn sort_and_truncate(
    sets: &mut Vec<GradientResultsSet>,
    position_vars_fixed: [bool; 2],
    bounds_size: usize,
) {
    if sets.len() <= bounds_size {
        return;
    }
    let metric: fn(&GradientResultsSet) -> f64 = if !position_vars_fixed[0] && !position_vars_fixed[1]
    {
        |s| s.max_error_with_buffer()
    } else if !position_vars_fixed[0] {
        |s| s.max_error_with_buffer_t0()
    } else {
        |s| s.max_error_with_buffer_t1()
    };
    sets.sort_by(|a, b| metric(b).partial_cmp(&metric(a)).unwrap_or(std::cmp::Ordering::Equal));
    sets.truncate(bounds_size);
}

/// Swept-shape LVS evaluator.
pub struct LvsContinuousCollisionEvaluator {
    collision_cache: Arc<CollisionCache>,
    manip: Arc<dyn JointGroup>,
    env: Arc<dyn Environment>,
    config: CollisionConfig,
    dynamic_environment: bool,
    manip_active_links: Vec<String>,
    diff_active_links: Vec<String>,
    contact_manager: Mutex<Box<dyn ContinuousContactManager>>,
}

impl LvsContinuousCollisionEvaluator {
    pub fn new(
        collision_cache: Arc<CollisionCache>,
        manip: Arc<dyn JointGroup>,
        env: Arc<dyn Environment>,
        config: CollisionConfig,
        dynamic_environment: bool,
    ) -> CollisionResult<Self> {
        let manip_active_links = manip.active_link_names();
        if manip_active_links.is_empty() {
            return Err(CollisionError::Invalid("joint group has no active links".to_string()));
        }
        let diff_active_links = if dynamic_environment {
            env.active_link_names()
                .into_iter()
                .filter(|l| !manip_active_links.contains(l))
                .collect()
        } else {
            Vec::new()
        };

        let mut manager = env.continuous_contact_manager();
        manager.set_active_collision_objects(&manip_active_links);
        manager.set_margin_data(config.margin_data.clone());
        manager.set_default_margin(config.margin_data.max_margin() + config.margin_buffer);

        Ok(Self {
            collision_cache,
            manip,
            env,
            config,
            dynamic_environment,
            manip_active_links,
            diff_active_links,
            contact_manager: Mutex::new(manager),
        })
    }

    fn state_at(&self, joint_values: &[f64]) -> TransformMap {
        if self.dynamic_environment {
            self.env.state(&self.manip.joint_names(), joint_values)
        } else {
            self.manip.calc_fwd_kin(joint_values)
        }
    }

    fn calc_collisions_helper(
        &self,
        dof_vals0: &[f64],
        dof_vals1: &[f64],
        dist_results: &mut ContactResultMap,
    ) {
        let dist = joint_distance(dof_vals0, dof_vals1);
        let mut manager = self.contact_manager.lock().expect("contact manager poisoned");

        // Movable links outside the chain are placed from the environment
        // state at the start of the motion.
        if !self.diff_active_links.is_empty() {
            let state = self.state_at(dof_vals0);
            for link in &self.diff_active_links {
                if let Some(pose) = state.get(link) {
                    manager.set_transform(link, pose);
                }
            }
        }

        if dist > self.config.longest_valid_segment_length {
            let cnt = num_interpolated_states(dist, self.config.longest_valid_segment_length);
            let last_state_idx = cnt - 1;
            let dt = 1.0 / last_state_idx as f64;

            let mut contacts = ContactResultMap::new();
            for i in 0..last_state_idx {
                let s0 = lerp_state(dof_vals0, dof_vals1, i as f64 / last_state_idx as f64);
                let s1 = lerp_state(dof_vals0, dof_vals1, (i + 1) as f64 / last_state_idx as f64);
                let state0 = self.state_at(&s0);
                let state1 = self.state_at(&s1);
                for link in &self.manip_active_links {
                    if let (Some(p0), Some(p1)) = (state0.get(link), state1.get(link)) {
                        manager.set_swept_transform(link, p0, p1);
                    }
                }
                manager.contact_test(&mut contacts, &self.config.contact_request);
                if !contacts.is_empty() {
                    dist_results.add_interpolated_results(
                        std::mem::take(&mut contacts),
                        i,
                        last_state_idx,
                        dt,
                        false,
                    );
                }
                contacts.clear();
            }
        } else {
            let state0 = self.state_at(dof_vals0);
            let state1 = self.state_at(dof_vals1);
            for link in &self.manip_active_links {
                if let (Some(p0), Some(p1)) = (state0.get(link), state1.get(link)) {
                    manager.set_swept_transform(link, p0, p1);
                }
            }
            manager.contact_test(dist_results, &self.config.contact_request);
        }
    }
}

impl CollisionEvaluator for LvsContinuousCollisionEvaluator {
    fn calc_collision_data(
        &self,
        dof_vals0: &[f64],
        dof_vals1: &[f64],
        position_vars_fixed: [bool; 2],
        bounds_size: usize,
    ) -> Arc<CollisionCacheData> {
        let key = cache_key(self.config.fingerprint(), dof_vals0, dof_vals1);
        if let Some(hit) = self.collision_cache.get(key) {
            return hit;
        }

        let mut data = CollisionCacheData::default();
        self.calc_collisions_helper(dof_vals0, dof_vals1, &mut data.contact_results_map);
        filter_contacts(&mut data.contact_results_map, &self.config, position_vars_fixed);
        reduce_to_gradient_sets(&mut data, &self.config, self.manip.as_ref(), dof_vals0, dof_vals1);
        sort_and_truncate(&mut data.gradient_results_sets, position_vars_fixed, bounds_size);

        let data = Arc::new(data);
        self.collision_cache.put(key, data.clone());
        data
    }

    fn config(&self) -> &CollisionConfig {
        &self.config
    }
}

/// Point-sampled LVS evaluator: a discrete contact query at every
/// interpolated node, with contributions lerped between the endpoints.
pub struct LvsDiscreteCollisionEvaluator {
    collision_cache: Arc<CollisionCache>,
    manip: Arc<dyn JointGroup>,
    env: Arc<dyn Environment>,
    config: CollisionConfig,
    dynamic_environment: bool,
    manip_active_links: Vec<String>,
    diff_active_links: Vec<String>,
    contact_manager: Mutex<Box<dyn DiscreteContactManager>>,
}

impl LvsDiscreteCollisionEvaluator {
    pub fn new(
        collision_cache: Arc<CollisionCache>,
        manip: Arc<dyn JointGroup>,
        env: Arc<dyn Environment>,
        config: CollisionConfig,
        dynamic_environment: bool,
    ) -> CollisionResult<Self> {
        let manip_active_links = manip.active_link_names();
        if manip_active_links.is_empty() {
            return Err(CollisionError::Invalid("joint group has no active links".to_string()));
        }
        let diff_active_links = if dynamic_environment {
            env.active_link_names()
                .into_iter()
                .filter(|l| !manip_active_links.contains(l))
                .collect()
        } else {
            Vec::new()
        };

        let mut manager = env.discrete_contact_manager();
        manager.set_active_collision_objects(&manip_active_links);
        manager.set_margin_data(config.margin_data.clone());
        manager.set_default_margin(config.margin_data.max_margin() + config.margin_buffer);

        Ok(Self {
            collision_cache,
            manip,
            env,
            config,
            dynamic_environment,
            manip_active_links,
            diff_active_links,
            contact_manager: Mutex::new(manager),
        })
    }

    fn state_at(&self, joint_values: &[f64]) -> TransformMap {
        if self.dynamic_environment {
            self.env.state(&self.manip.joint_names(), joint_values)
        } else {
            self.manip.calc_fwd_kin(joint_values)
        }
    }

    fn calc_collisions_helper(
        &self,
        dof_vals0: &[f64],
        dof_vals1: &[f64],
        dist_results: &mut ContactResultMap,
    ) {
        let dist = joint_distance(dof_vals0, dof_vals1);
        let cnt = num_interpolated_states(dist, self.config.longest_valid_segment_length);
        let last_state_idx = cnt - 1;
        let dt = 1.0 / last_state_idx as f64;

        let mut manager = self.contact_manager.lock().expect("contact manager poisoned");

        if !self.diff_active_links.is_empty() {
            let state = self.state_at(dof_vals0);
            for link in &self.diff_active_links {
                if let Some(pose) = state.get(link) {
                    manager.set_transform(link, pose);
                }
            }
        }

        let mut contacts = ContactResultMap::new();
        for i in 0..cnt {
            let s = lerp_state(dof_vals0, dof_vals1, i as f64 / last_state_idx as f64);
            let state = self.state_at(&s);
            for link in &self.manip_active_links {
                if let Some(pose) = state.get(link) {
                    manager.set_transform(link, pose);
                }
            }
            manager.contact_test(&mut contacts, &self.config.contact_request);
            if !contacts.is_empty() {
                dist_results.add_interpolated_results(
                    std::mem::take(&mut contacts),
                    i,
                    last_state_idx,
                    dt,
                    true,
                );
            }
            contacts.clear();
        }
    }
}

impl CollisionEvaluator for LvsDiscreteCollisionEvaluator {
    fn calc_collision_data(
        &self,
        dof_vals0: &[f64],
        dof_vals1: &[f64],
        position_vars_fixed: [bool; 2],
        bounds_size: usize,
    ) -> Arc<CollisionCacheData> {
        let key = cache_key(self.config.fingerprint(), dof_vals0, dof_vals1);
        if let Some(hit) = self.collision_cache.get(key) {
            return hit;
        }

        let mut data = CollisionCacheData::default();
        self.calc_collisions_helper(dof_vals0, dof_vals1, &mut data.contact_results_map);
        filter_contacts(&mut data.contact_results_map, &self.config, position_vars_fixed);
        reduce_to_gradient_sets(&mut data, &self.config, self.manip.as_ref(), dof_vals0, dof_vals1);
        sort_and_truncate(&mut data.gradient_results_sets, position_vars_fixed, bounds_size);

        let data = Arc::new(data);
        self.collision_cache.put(key, data.clone());
        data
    }

    fn config(&self) -> &CollisionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdivision_law() {
        // dist <= L: exactly two states.
        assert_eq!(num_interpolated_states(0.05, 0.1), 2);
        assert_eq!(num_interpolated_states(0.1, 0.1), 2);
        // dist > L: ceil(dist / L) + 1.
        assert_eq!(num_interpolated_states(0.45, 0.1), 6);
        assert_eq!(num_interpolated_states(0.41, 0.1), 6);
        assert_eq!(num_interpolated_states(0.11, 0.1), 3);
    }

    #[test]
    fn test_lerp_state() {
        let s = lerp_state(&[0.0, 2.0], &[1.0, 0.0], 0.25);
        assert_eq!(s, vec![0.25, 1.5]);
    }
}
