//! Longest-valid-segment collision evaluation for the SCO optimizer.
//!
//! Collision avoidance enters the optimizer as ordinary constraint blocks,
//! but the machinery behind them is the dominant cost of a realistic
//! solve, so it gets its own crate:
//!
//! - [`types`]: contact results and the contact-manager / environment
//!   collaborator traits (geometry stays outside the workspace).
//! - [`config`]: per-pair margins and coefficients.
//! - [`evaluators`]: LVS continuous (swept) and discrete (sampled)
//!   evaluators — subdivision, interpolated-contact re-weighting,
//!   filtering, reduction into gradient result sets.
//! - [`cache`]: bounded LRU over immutable snapshots, shared between
//!   evaluators.
//! - [`constraints`]: fixed-arity constraint blocks with analytic
//!   (error-weighted average) or numerical Jacobians.
//! - [`descriptor`]: the "collision" entry for the term-name registry.

#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod constraints;
pub mod descriptor;
pub mod error;
pub mod evaluators;
pub mod gradients;
pub mod types;

pub use cache::{cache_key, CollisionCache, CollisionCacheData};
pub use config::{CollisionCoeffData, CollisionConfig, CollisionMarginData};
pub use constraints::{CollisionConstraintEval, CollisionNumericalConstraintEval};
pub use descriptor::{register_collision_term_type, CollisionTermDesc};
pub use error::{CollisionError, CollisionResult};
pub use evaluators::{
    num_interpolated_states, CollisionEvaluator, LvsContinuousCollisionEvaluator,
    LvsDiscreteCollisionEvaluator,
};
pub use gradients::{
    get_gradient_continuous, get_gradient_discrete, weighted_avg_gradient, GradientResults,
    GradientResultsSet, LinkGradientResults, LinkMaxError,
};
pub use types::{
    make_link_pair, ContactRequest, ContactResult, ContactResultMap, ContactTestType,
    ContinuousCollisionType, ContinuousContactManager, DiscreteContactManager, Environment,
    LinkPair,
};
