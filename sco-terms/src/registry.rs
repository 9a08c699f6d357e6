//! Process-wide term-name registry.
//!
//! Maps registered type names to descriptor factories so problem
//! descriptions can refer to terms by string. The registry is initialized
//! exactly once with the built-in families below; user term types can be
//! added with [`register_term_type`] before a solve begins. Nothing here
//! mutates once the solver is running.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::error::{TermError, TermResult};
use crate::request::{
    CartPoseTermDesc, CartVelTermDesc, IkProximityTermDesc, JointDerivative, JointMotionTermDesc,
    SingularityTermDesc, TermDescriptor, TotalTimeTermDesc, UserDefinedTermDesc,
};

/// Factory producing a default-configured descriptor; callers configure it
/// through `as_any_mut` before use.
pub type TermFactory = fn() -> Box<dyn TermDescriptor>;

static REGISTRY: OnceLock<RwLock<HashMap<String, TermFactory>>> = OnceLock::new();

fn builtin_map() -> HashMap<String, TermFactory> {
    let mut map: HashMap<String, TermFactory> = HashMap::new();
    map.insert("joint_position".to_string(), || {
        Box::new(JointMotionTermDesc::new(JointDerivative::Position))
    });
    map.insert("joint_velocity".to_string(), || {
        Box::new(JointMotionTermDesc::new(JointDerivative::Velocity))
    });
    map.insert("joint_acceleration".to_string(), || {
        Box::new(JointMotionTermDesc::new(JointDerivative::Acceleration))
    });
    map.insert("joint_jerk".to_string(), || {
        Box::new(JointMotionTermDesc::new(JointDerivative::Jerk))
    });
    map.insert("cart_pose".to_string(), || Box::<CartPoseTermDesc>::default());
    map.insert("cart_vel".to_string(), || Box::<CartVelTermDesc>::default());
    map.insert("ik_proximity".to_string(), || Box::<IkProximityTermDesc>::default());
    map.insert("total_time".to_string(), || Box::<TotalTimeTermDesc>::default());
    map.insert("singularity_avoidance".to_string(), || Box::<SingularityTermDesc>::default());
    map.insert("user_defined".to_string(), || Box::<UserDefinedTermDesc>::default());
    map
}

fn registry() -> &'static RwLock<HashMap<String, TermFactory>> {
    REGISTRY.get_or_init(|| RwLock::new(builtin_map()))
}

/// Register a user term type. Built-in names cannot be overwritten.
pub fn register_term_type(name: &str, factory: TermFactory) -> TermResult<()> {
    let mut map = registry().write().expect("term registry poisoned");
    if map.contains_key(name) {
        return Err(TermError::InvalidRequest(format!(
            "term type '{name}' is already registered"
        )));
    }
    map.insert(name.to_string(), factory);
    Ok(())
}

/// Create a default descriptor for a registered type name.
pub fn make_term(name: &str) -> Option<Box<dyn TermDescriptor>> {
    let map = registry().read().expect("term registry poisoned");
    map.get(name).map(|factory| factory())
}

/// All registered type names, sorted.
pub fn registered_term_names() -> Vec<String> {
    let map = registry().read().expect("term registry poisoned");
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}
