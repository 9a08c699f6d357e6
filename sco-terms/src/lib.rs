//! Variable sets and term families for the SCO trajectory optimizer.
//!
//! Everything the solver core treats as an opaque [`sco_core::TermEval`]
//! is defined here: joint-space motion terms over finite-difference
//! stencils, Cartesian pose/velocity terms over a kinematics collaborator,
//! IK proximity, trajectory time, singularity avoidance, and user-defined
//! black-box errors. The crate also owns the problem-request layer: a
//! structured description with string-tagged term descriptors, resolved
//! through a process-wide registry, expanded into a ready
//! [`sco_core::SqpProblem`].
//!
//! Robot kinematics enter only through the traits in [`kin`]; the
//! [`test_support`] module ships small analytic implementations used by
//! the workspace test suites.

#![warn(clippy::all)]

pub mod cart_terms;
pub mod error;
pub mod joint_terms;
pub mod kin;
pub mod misc_terms;
pub mod registry;
pub mod request;
pub mod test_support;
pub mod vars;

pub use cart_terms::{CartPoseEval, CartVelEval};
pub use error::{TermError, TermResult};
pub use joint_terms::JointMotionEval;
pub use kin::{InverseKinematics, JointGroup, TransformMap};
pub use misc_terms::{IkProximityEval, SingularityEval, TotalTimeEval, UserDefinedEval};
pub use registry::{make_term, register_term_type, registered_term_names, TermFactory};
pub use request::{
    construct_problem, generate_initial_trajectory, BasicInfo, CartPoseTermDesc, CartVelTermDesc,
    ConvexSolverKind, IkProximityTermDesc, InitInfo, JointDerivative, JointMotionTermDesc,
    ProblemContext, ProblemRequest, SingularityTermDesc, TermDescriptor, TermKind,
    TotalTimeTermDesc, UserDefinedTermDesc,
};
