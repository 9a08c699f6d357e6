//! Per-contact gradient extraction and reduction.
//!
//! A contact's clearance error is `margin - distance`; its gradient with
//! respect to the joints combines the link Jacobians of both sides through
//! the contact normal. Continuous contacts split their contribution
//! between the start (t=0) and end (t=1) configurations according to the
//! contact time. Groups of contacts on the same (link pair, subshape pair)
//! reduce to a [`GradientResultsSet`] whose worst errors feed the
//! fixed-arity collision constraint, and whose members combine into a
//! Jacobian row by error-weighted averaging.

use nalgebra::Vector3;

use sco_terms::kin::JointGroup;

use crate::types::{ContactResult, ContinuousCollisionType, LinkPair};

/// Gradient contribution of one link at one endpoint of the motion.
#[derive(Debug, Clone, Default)]
pub struct LinkGradientResults {
    pub has_gradient: bool,
    /// `d distance / d q`, already signed for this side of the pair.
    pub gradient: Vec<f64>,
    /// Direction moving this link out of collision.
    pub translation_vector: Vector3<f64>,
    /// Interpolation share of this endpoint (`1 - t` at t=0, `t` at t=1).
    pub scale: f64,
    pub cc_type: ContinuousCollisionType,
}

/// Gradient data for one contact.
#[derive(Debug, Clone, Default)]
pub struct GradientResults {
    /// Per-side gradients at the start configuration.
    pub gradients: [LinkGradientResults; 2],
    /// Per-side gradients at the end configuration (continuous only).
    pub cc_gradients: [LinkGradientResults; 2],
    /// `margin - distance`
    pub error: f64,
    /// `margin + buffer - distance`
    pub error_with_buffer: f64,
    /// Interpolation weight inherited from the contact.
    pub weight: f64,
}

/// Worst errors seen by one link, split by endpoint.
///
/// Slot 0 excludes contributions at t=1; slot 1 excludes contributions at
/// t=0. Contacts strictly inside the motion (or discrete contacts) count
/// toward both slots.
#[derive(Debug, Clone)]
pub struct LinkMaxError {
    pub has_error: [bool; 2],
    pub error: [f64; 2],
    pub error_with_buffer: [f64; 2],
}

impl Default for LinkMaxError {
    fn default() -> Self {
        Self {
            has_error: [false; 2],
            error: [f64::NEG_INFINITY; 2],
            error_with_buffer: [f64::NEG_INFINITY; 2],
        }
    }
}

impl LinkMaxError {
    fn update(&mut self, slot: usize, error: f64, error_with_buffer: f64) {
        self.has_error[slot] = true;
        self.error[slot] = self.error[slot].max(error);
        self.error_with_buffer[slot] = self.error_with_buffer[slot].max(error_with_buffer);
    }

    pub fn max_error(&self) -> f64 {
        self.error[0].max(self.error[1])
    }

    pub fn max_error_with_buffer(&self) -> f64 {
        self.error_with_buffer[0].max(self.error_with_buffer[1])
    }
}

/// Gradient results for one (link pair, subshape pair) group.
#[derive(Debug, Clone, Default)]
pub struct GradientResultsSet {
    pub key: LinkPair,
    pub shape_key: (usize, usize),
    pub coeff: f64,
    pub is_continuous: bool,
    /// Worst errors per side (`[0]` link A, `[1]` link B).
    pub max_error: [LinkMaxError; 2],
    pub results: Vec<GradientResults>,
}

impl GradientResultsSet {
    /// Add a gradient result, updating the cached worst errors.
    pub fn add(&mut self, result: GradientResults) {
        for i in 0..2 {
            let has = result.gradients[i].has_gradient || result.cc_gradients[i].has_gradient;
            if !has {
                continue;
            }
            let cc = if result.gradients[i].has_gradient {
                result.gradients[i].cc_type
            } else {
                result.cc_gradients[i].cc_type
            };
            match cc {
                ContinuousCollisionType::Time0 => {
                    self.max_error[i].update(0, result.error, result.error_with_buffer);
                }
                ContinuousCollisionType::Time1 => {
                    self.max_error[i].update(1, result.error, result.error_with_buffer);
                }
                _ => {
                    self.max_error[i].update(0, result.error, result.error_with_buffer);
                    self.max_error[i].update(1, result.error, result.error_with_buffer);
                }
            }
        }
        self.results.push(result);
    }

    fn fold_errors<F>(&self, f: F) -> f64
    where
        F: Fn(&LinkMaxError) -> f64,
    {
        self.max_error.iter().fold(f64::NEG_INFINITY, |acc, e| acc.max(f(e)))
    }

    pub fn max_error(&self) -> f64 {
        self.fold_errors(|e| e.max_error())
    }

    /// Worst error excluding contributions at t=1.
    pub fn max_error_t0(&self) -> f64 {
        self.fold_errors(|e| if e.has_error[0] { e.error[0] } else { f64::NEG_INFINITY })
    }

    /// Worst error excluding contributions at t=0.
    pub fn max_error_t1(&self) -> f64 {
        self.fold_errors(|e| if e.has_error[1] { e.error[1] } else { f64::NEG_INFINITY })
    }

    pub fn max_error_with_buffer(&self) -> f64 {
        self.fold_errors(|e| e.max_error_with_buffer())
    }

    pub fn max_error_with_buffer_t0(&self) -> f64 {
        self.fold_errors(|e| {
            if e.has_error[0] {
                e.error_with_buffer[0]
            } else {
                f64::NEG_INFINITY
            }
        })
    }

    pub fn max_error_with_buffer_t1(&self) -> f64 {
        self.fold_errors(|e| {
            if e.has_error[1] {
                e.error_with_buffer[1]
            } else {
                f64::NEG_INFINITY
            }
        })
    }
}

fn interpolation_time(kind: ContinuousCollisionType, cc_time: f64) -> f64 {
    match kind {
        ContinuousCollisionType::Time0 | ContinuousCollisionType::None => 0.0,
        ContinuousCollisionType::Time1 => 1.0,
        ContinuousCollisionType::Between => cc_time.clamp(0.0, 1.0),
    }
}

/// Signed distance-gradient row for one side of a contact: the normal
/// points from side 0 toward side 1, so moving side 0 against the normal
/// (or side 1 along it) increases the distance.
fn side_gradient(
    manip: &dyn JointGroup,
    dof_vals: &[f64],
    contact: &ContactResult,
    side: usize,
) -> Vec<f64> {
    let jac = manip.calc_jacobian(dof_vals, &contact.link_names[side], &contact.nearest_points[side]);
    let sign = if side == 0 { -1.0 } else { 1.0 };
    let n = dof_vals.len();
    let mut grad = vec![0.0; n];
    for (j, g) in grad.iter_mut().enumerate() {
        let mut v = 0.0;
        for r in 0..3 {
            v += contact.normal[r] * jac[(r, j)];
        }
        *g = sign * v;
    }
    grad
}

/// Gradient of a continuous (swept) contact: contributions at both motion
/// endpoints, weighted by the contact time.
pub fn get_gradient_continuous(
    dof_vals0: &[f64],
    dof_vals1: &[f64],
    contact: &ContactResult,
    margin: f64,
    margin_buffer: f64,
    manip: &dyn JointGroup,
) -> GradientResults {
    let mut out = GradientResults {
        error: margin - contact.distance,
        error_with_buffer: margin + margin_buffer - contact.distance,
        weight: contact.interpolation_weight,
        ..Default::default()
    };

    let active = manip.active_link_names();
    for side in 0..2 {
        if !active.contains(&contact.link_names[side]) {
            continue;
        }
        let t = interpolation_time(contact.cc_type[side], contact.cc_time[side]);
        let sign = if side == 0 { -1.0 } else { 1.0 };

        if 1.0 - t > 0.0 {
            out.gradients[side] = LinkGradientResults {
                has_gradient: true,
                gradient: side_gradient(manip, dof_vals0, contact, side),
                translation_vector: sign * contact.normal,
                scale: 1.0 - t,
                cc_type: contact.cc_type[side],
            };
        } else {
            out.gradients[side].cc_type = contact.cc_type[side];
        }

        if t > 0.0 {
            out.cc_gradients[side] = LinkGradientResults {
                has_gradient: true,
                gradient: side_gradient(manip, dof_vals1, contact, side),
                translation_vector: sign * contact.normal,
                scale: t,
                cc_type: contact.cc_type[side],
            };
        } else {
            out.cc_gradients[side].cc_type = contact.cc_type[side];
        }
    }
    out
}

/// Gradient of a discrete (single-configuration) contact.
pub fn get_gradient_discrete(
    dof_vals: &[f64],
    contact: &ContactResult,
    margin: f64,
    margin_buffer: f64,
    manip: &dyn JointGroup,
) -> GradientResults {
    let mut out = GradientResults {
        error: margin - contact.distance,
        error_with_buffer: margin + margin_buffer - contact.distance,
        weight: contact.interpolation_weight,
        ..Default::default()
    };
    let active = manip.active_link_names();
    for side in 0..2 {
        if !active.contains(&contact.link_names[side]) {
            continue;
        }
        let sign = if side == 0 { -1.0 } else { 1.0 };
        out.gradients[side] = LinkGradientResults {
            has_gradient: true,
            gradient: side_gradient(manip, dof_vals, contact, side),
            translation_vector: sign * contact.normal,
            scale: 1.0,
            cc_type: ContinuousCollisionType::None,
        };
    }
    out
}

/// Error-weighted average of a set's gradients at one motion endpoint
/// (`timestep` 0 or 1), returned as `d error / d q` (length `n_dof`).
///
/// Weights are `interpolation_weight * max(0, error_with_buffer)`, so
/// deeper contacts dominate and touch-only contacts vanish.
pub fn weighted_avg_gradient(set: &GradientResultsSet, timestep: usize, n_dof: usize) -> Vec<f64> {
    let mut accum = vec![0.0; n_dof];
    let mut total_weight = 0.0;

    for result in &set.results {
        let w = result.weight * result.error_with_buffer.max(0.0);
        if w <= 0.0 {
            continue;
        }
        let mut contributed = false;
        for side in 0..2 {
            let lg = if timestep == 0 {
                &result.gradients[side]
            } else {
                &result.cc_gradients[side]
            };
            if !lg.has_gradient {
                continue;
            }
            contributed = true;
            for j in 0..n_dof {
                accum[j] += w * lg.scale * lg.gradient[j];
            }
        }
        if contributed {
            total_weight += w;
        }
    }

    if total_weight > 0.0 {
        // d(error)/dq = -d(distance)/dq
        for v in accum.iter_mut() {
            *v = -*v / total_weight;
        }
    }
    accum
}
