//! Problem construction from a structured request.
//!
//! A [`ProblemRequest`] is the origin-free description of a trajectory
//! optimization problem: trajectory shape, initialization, and a list of
//! term descriptors tagged by registered type names. [`construct_problem`]
//! turns it into a ready [`SqpProblem`]. Wire-format parsing (JSON etc.)
//! stays outside this crate; requests are built programmatically.

use std::any::Any;
use std::sync::Arc;

use nalgebra::Isometry3;

use sco_core::qp::SqpProblem;
use sco_core::sparse::Triplet;
use sco_core::term::{ComparisonKind, ConstraintTerm, CostTerm, PenaltyKind, TermEval};
use sco_core::variable::VarSlice;

use crate::cart_terms::{CartPoseEval, CartVelEval};
use crate::error::{TermError, TermResult};
use crate::joint_terms::JointMotionEval;
use crate::kin::{InverseKinematics, JointGroup};
use crate::misc_terms::{IkProximityEval, SingularityEval, TotalTimeEval, UserDefinedEval};

/// Whether a descriptor lands as a cost or a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Cost(PenaltyKind),
    Constraint(ComparisonKind),
}

impl Default for TermKind {
    fn default() -> Self {
        TermKind::Cost(PenaltyKind::Squared)
    }
}

/// Handles the descriptors need while attaching themselves to a problem.
pub struct ProblemContext {
    pub manip: Arc<dyn JointGroup>,
    /// Joint-position slice per timestep (excluding any `1/dt` column).
    pub steps: Vec<VarSlice>,
    /// Global column of each timestep's `1/dt` entry; empty without time.
    pub inv_dt_cols: Vec<usize>,
    pub n_dof: usize,
}

/// A cost/constraint descriptor tagged by a registered type name.
pub trait TermDescriptor: Send + Sync {
    /// Registered type name ("joint_velocity", "cart_pose", ...).
    fn type_name(&self) -> &'static str;

    /// Downcast hook so descriptors from the registry can be configured.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Instantiate the term(s) into the problem.
    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()>;
}

fn add_term(
    problem: &mut SqpProblem,
    kind: TermKind,
    name: String,
    eval: Box<dyn TermEval>,
) -> TermResult<()> {
    match kind {
        TermKind::Cost(p) => problem.add_cost(CostTerm::new(name, p, eval))?,
        TermKind::Constraint(c) => problem.add_constraint(ConstraintTerm::new(name, c, eval))?,
    }
    Ok(())
}

/// Resolve an inclusive step range; `None` means the trajectory end.
fn step_range(
    first: usize,
    last: Option<usize>,
    n_steps: usize,
    what: &str,
) -> TermResult<std::ops::RangeInclusive<usize>> {
    let last = last.unwrap_or(n_steps - 1);
    if first > last || last >= n_steps {
        return Err(TermError::InvalidRequest(format!(
            "{what} step range {first}..={last} is invalid for {n_steps} timesteps"
        )));
    }
    Ok(first..=last)
}

/// Which joint-space derivative a [`JointMotionTermDesc`] penalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JointDerivative {
    #[default]
    Position,
    Velocity,
    Acceleration,
    Jerk,
}

/// Joint position/velocity/acceleration/jerk terms over a step range.
#[derive(Default)]
pub struct JointMotionTermDesc {
    pub derivative: JointDerivative,
    pub kind: TermKind,
    pub name: String,
    /// Per-joint values; empty means zeros.
    pub targets: Vec<f64>,
    /// Per-joint weights; empty means ones.
    pub coeffs: Vec<f64>,
    pub upper_tols: Vec<f64>,
    pub lower_tols: Vec<f64>,
    pub first_step: usize,
    /// Inclusive; `None` runs to the last timestep.
    pub last_step: Option<usize>,
}

impl JointMotionTermDesc {
    pub fn new(derivative: JointDerivative) -> Self {
        Self { derivative, ..Default::default() }
    }
}

impl TermDescriptor for JointMotionTermDesc {
    fn type_name(&self) -> &'static str {
        match self.derivative {
            JointDerivative::Position => "joint_position",
            JointDerivative::Velocity => "joint_velocity",
            JointDerivative::Acceleration => "joint_acceleration",
            JointDerivative::Jerk => "joint_jerk",
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()> {
        let range = step_range(self.first_step, self.last_step, ctx.steps.len(), self.type_name())?;
        let steps: Vec<VarSlice> = ctx.steps[range].to_vec();
        let targets = if self.targets.is_empty() {
            vec![0.0; ctx.n_dof]
        } else {
            self.targets.clone()
        };
        let coeffs = if self.coeffs.is_empty() {
            vec![1.0; ctx.n_dof]
        } else {
            self.coeffs.clone()
        };

        let mut eval = match self.derivative {
            JointDerivative::Position => JointMotionEval::position(steps, targets, coeffs)?,
            JointDerivative::Velocity => JointMotionEval::velocity(steps, targets, coeffs)?,
            JointDerivative::Acceleration => JointMotionEval::acceleration(steps, targets, coeffs)?,
            JointDerivative::Jerk => JointMotionEval::jerk(steps, targets, coeffs)?,
        };
        if !self.upper_tols.is_empty() || !self.lower_tols.is_empty() {
            let upper = if self.upper_tols.is_empty() {
                vec![0.0; ctx.n_dof]
            } else {
                self.upper_tols.clone()
            };
            let lower = if self.lower_tols.is_empty() {
                vec![0.0; ctx.n_dof]
            } else {
                self.lower_tols.clone()
            };
            eval = eval.with_tolerances(upper, lower)?;
        }

        let name = if self.name.is_empty() {
            self.type_name().to_string()
        } else {
            self.name.clone()
        };
        add_term(problem, self.kind, name, Box::new(eval))
    }
}

/// Cartesian pose of a link at one timestep.
pub struct CartPoseTermDesc {
    pub kind: TermKind,
    pub name: String,
    pub step: usize,
    pub link: String,
    pub target: Isometry3<f64>,
    /// Six per-axis weights; empty means ones.
    pub coeffs: Vec<f64>,
    pub upper_tols: Vec<f64>,
    pub lower_tols: Vec<f64>,
}

impl Default for CartPoseTermDesc {
    fn default() -> Self {
        Self {
            kind: TermKind::default(),
            name: String::new(),
            step: 0,
            link: String::new(),
            target: Isometry3::identity(),
            coeffs: Vec::new(),
            upper_tols: Vec::new(),
            lower_tols: Vec::new(),
        }
    }
}

impl TermDescriptor for CartPoseTermDesc {
    fn type_name(&self) -> &'static str {
        "cart_pose"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()> {
        if self.step >= ctx.steps.len() {
            return Err(TermError::InvalidRequest(format!(
                "cart_pose step {} out of range",
                self.step
            )));
        }
        let coeffs = if self.coeffs.is_empty() { vec![1.0; 6] } else { self.coeffs.clone() };
        let mut eval = CartPoseEval::new(
            ctx.manip.clone(),
            ctx.steps[self.step],
            self.link.clone(),
            self.target,
            coeffs,
        )?;
        if !self.upper_tols.is_empty() || !self.lower_tols.is_empty() {
            let upper = if self.upper_tols.is_empty() { vec![0.0; 6] } else { self.upper_tols.clone() };
            let lower = if self.lower_tols.is_empty() { vec![0.0; 6] } else { self.lower_tols.clone() };
            eval = eval.with_tolerances(upper, lower)?;
        }
        let name = if self.name.is_empty() {
            format!("cart_pose_{}", self.step)
        } else {
            self.name.clone()
        };
        add_term(problem, self.kind, name, Box::new(eval))
    }
}

/// Cartesian displacement bound between consecutive timesteps.
pub struct CartVelTermDesc {
    pub kind: TermKind,
    pub name: String,
    pub link: String,
    pub max_displacement: f64,
    pub first_step: usize,
    pub last_step: Option<usize>,
}

impl Default for CartVelTermDesc {
    fn default() -> Self {
        Self {
            kind: TermKind::Constraint(ComparisonKind::Ineq),
            name: String::new(),
            link: String::new(),
            max_displacement: 0.1,
            first_step: 0,
            last_step: None,
        }
    }
}

impl TermDescriptor for CartVelTermDesc {
    fn type_name(&self) -> &'static str {
        "cart_vel"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()> {
        let range = step_range(self.first_step, self.last_step, ctx.steps.len(), "cart_vel")?;
        let (first, last) = (*range.start(), *range.end());
        if last == first {
            return Err(TermError::InvalidRequest(
                "cart_vel needs at least two timesteps".to_string(),
            ));
        }
        for t in first..last {
            let eval = CartVelEval::new(
                ctx.manip.clone(),
                ctx.steps[t],
                ctx.steps[t + 1],
                self.link.clone(),
                self.max_displacement,
            )?;
            let base = if self.name.is_empty() { "cart_vel" } else { &self.name };
            add_term(problem, self.kind, format!("{base}_{t}"), Box::new(eval))?;
        }
        Ok(())
    }
}

/// Proximity to an IK solution of a target pose at one timestep.
pub struct IkProximityTermDesc {
    pub kind: TermKind,
    pub name: String,
    pub step: usize,
    pub target: Isometry3<f64>,
    pub ik: Option<Arc<dyn InverseKinematics>>,
    /// Per-joint weights; empty means ones.
    pub coeffs: Vec<f64>,
    /// IK seed; zeros when empty.
    pub seed: Vec<f64>,
}

impl Default for IkProximityTermDesc {
    fn default() -> Self {
        Self {
            kind: TermKind::default(),
            name: String::new(),
            step: 0,
            target: Isometry3::identity(),
            ik: None,
            coeffs: Vec::new(),
            seed: Vec::new(),
        }
    }
}

impl TermDescriptor for IkProximityTermDesc {
    fn type_name(&self) -> &'static str {
        "ik_proximity"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()> {
        let ik = self
            .ik
            .as_ref()
            .ok_or_else(|| TermError::InvalidRequest("ik_proximity has no IK collaborator".to_string()))?;
        if self.step >= ctx.steps.len() {
            return Err(TermError::InvalidRequest(format!(
                "ik_proximity step {} out of range",
                self.step
            )));
        }
        let coeffs = if self.coeffs.is_empty() {
            vec![1.0; ctx.n_dof]
        } else {
            self.coeffs.clone()
        };
        let seed = if self.seed.is_empty() { vec![0.0; ctx.n_dof] } else { self.seed.clone() };
        let eval = IkProximityEval::new(
            ik.as_ref(),
            &self.target,
            &seed,
            ctx.steps[self.step],
            coeffs,
        )?;
        let name = if self.name.is_empty() {
            format!("ik_proximity_{}", self.step)
        } else {
            self.name.clone()
        };
        add_term(problem, self.kind, name, Box::new(eval))
    }
}

/// Trajectory duration over the `1/dt` columns.
pub struct TotalTimeTermDesc {
    pub kind: TermKind,
    pub name: String,
    pub coeff: f64,
}

impl Default for TotalTimeTermDesc {
    fn default() -> Self {
        Self { kind: TermKind::Cost(PenaltyKind::Absolute), name: String::new(), coeff: 1.0 }
    }
}

impl TermDescriptor for TotalTimeTermDesc {
    fn type_name(&self) -> &'static str {
        "total_time"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()> {
        if ctx.inv_dt_cols.is_empty() {
            return Err(TermError::InvalidRequest(
                "total_time requires a request with use_time".to_string(),
            ));
        }
        let eval = TotalTimeEval::new(ctx.inv_dt_cols.clone(), self.coeff)?;
        let name = if self.name.is_empty() { "total_time".to_string() } else { self.name.clone() };
        add_term(problem, self.kind, name, Box::new(eval))
    }
}

/// Singularity avoidance over a step range.
pub struct SingularityTermDesc {
    pub kind: TermKind,
    pub name: String,
    pub link: String,
    pub lambda: f64,
    pub coeff: f64,
    pub first_step: usize,
    pub last_step: Option<usize>,
}

impl Default for SingularityTermDesc {
    fn default() -> Self {
        Self {
            kind: TermKind::Cost(PenaltyKind::Squared),
            name: String::new(),
            link: String::new(),
            lambda: 1e-3,
            coeff: 1.0,
            first_step: 0,
            last_step: None,
        }
    }
}

impl TermDescriptor for SingularityTermDesc {
    fn type_name(&self) -> &'static str {
        "singularity_avoidance"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()> {
        let range =
            step_range(self.first_step, self.last_step, ctx.steps.len(), "singularity_avoidance")?;
        for t in range {
            let eval = SingularityEval::new(
                ctx.manip.clone(),
                ctx.steps[t],
                self.link.clone(),
                self.lambda,
                self.coeff,
            )?;
            let base = if self.name.is_empty() { "singularity" } else { &self.name };
            add_term(problem, self.kind, format!("{base}_{t}"), Box::new(eval))?;
        }
        Ok(())
    }
}

/// User-defined black-box error at one timestep. The closures see the
/// timestep's joint values; they sit behind `Arc` so the descriptor stays
/// reusable across applications.
#[derive(Default)]
pub struct UserDefinedTermDesc {
    pub kind: TermKind,
    pub name: String,
    pub step: usize,
    pub num_rows: usize,
    pub error_fn: Option<Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>>,
    pub jacobian_fn: Option<Arc<dyn Fn(&[f64]) -> Vec<Triplet> + Send + Sync>>,
}

impl TermDescriptor for UserDefinedTermDesc {
    fn type_name(&self) -> &'static str {
        "user_defined"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()> {
        let error_fn = self.error_fn.clone().ok_or_else(|| {
            TermError::InvalidRequest("user_defined term has no error function".to_string())
        })?;
        if self.step >= ctx.steps.len() {
            return Err(TermError::InvalidRequest(format!(
                "user_defined step {} out of range",
                self.step
            )));
        }
        let error_box: Box<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync> =
            Box::new(move |q| error_fn(q));
        let jacobian_box = self.jacobian_fn.clone().map(|jf| {
            let b: Box<dyn Fn(&[f64]) -> Vec<Triplet> + Send + Sync> = Box::new(move |q| jf(q));
            b
        });
        let eval = UserDefinedEval::new(ctx.steps[self.step], self.num_rows, error_box, jacobian_box)?;
        let name = if self.name.is_empty() {
            format!("user_defined_{}", self.step)
        } else {
            self.name.clone()
        };
        add_term(problem, self.kind, name, Box::new(eval))
    }
}

/// Convex backend selection carried by the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvexSolverKind {
    /// Built-in operator-splitting backend
    #[default]
    Admm,
}

/// Trajectory shape and fixing information.
#[derive(Debug, Clone)]
pub struct BasicInfo {
    pub manipulator: String,
    pub n_steps: usize,
    /// Timesteps pinned to their initial values.
    pub fixed_timesteps: Vec<usize>,
    /// DOFs pinned to their initial values at every timestep.
    pub fixed_dofs: Vec<usize>,
    pub convex_solver: ConvexSolverKind,
    /// Append a `1/dt` column to every timestep.
    pub use_time: bool,
    pub dt_lower_limit: f64,
    pub dt_upper_limit: f64,
}

impl Default for BasicInfo {
    fn default() -> Self {
        Self {
            manipulator: String::new(),
            n_steps: 1,
            fixed_timesteps: vec![0],
            fixed_dofs: Vec::new(),
            convex_solver: ConvexSolverKind::Admm,
            use_time: false,
            dt_lower_limit: 1e-3,
            dt_upper_limit: 1.0,
        }
    }
}

/// How the initial trajectory is produced.
#[derive(Debug, Clone)]
pub enum InitInfo {
    /// Replicate the current state at every timestep.
    Stationary,
    /// Linear interpolation from the current state to `endpoint`.
    JointInterpolated { endpoint: Vec<f64> },
    /// Use the given trajectory verbatim (`n_steps` rows).
    GivenTraj { trajectory: Vec<Vec<f64>> },
}

/// Origin-free problem description.
pub struct ProblemRequest {
    pub basic_info: BasicInfo,
    pub init_info: InitInfo,
    /// Seeds the `1/dt` columns when `use_time` is set.
    pub default_dt: f64,
    /// Joint state the trajectory starts from.
    pub current_state: Vec<f64>,
    pub cost_terms: Vec<Box<dyn TermDescriptor>>,
    pub cnt_terms: Vec<Box<dyn TermDescriptor>>,
}

impl ProblemRequest {
    pub fn new(basic_info: BasicInfo, init_info: InitInfo, current_state: Vec<f64>) -> Self {
        Self {
            basic_info,
            init_info,
            default_dt: 0.1,
            current_state,
            cost_terms: Vec::new(),
            cnt_terms: Vec::new(),
        }
    }
}

/// Expand the init info into an `n_steps x n_dof` trajectory.
pub fn generate_initial_trajectory(request: &ProblemRequest) -> TermResult<Vec<Vec<f64>>> {
    let n_steps = request.basic_info.n_steps;
    let n_dof = request.current_state.len();
    if n_steps == 0 {
        return Err(TermError::InvalidRequest("n_steps must be at least 1".to_string()));
    }
    if n_dof == 0 {
        return Err(TermError::InvalidRequest("current state is empty".to_string()));
    }

    match &request.init_info {
        InitInfo::Stationary => Ok(vec![request.current_state.clone(); n_steps]),
        InitInfo::JointInterpolated { endpoint } => {
            if endpoint.len() != n_dof {
                return Err(TermError::InvalidRequest(format!(
                    "interpolation endpoint has {} joints, expected {n_dof}",
                    endpoint.len()
                )));
            }
            let mut traj = Vec::with_capacity(n_steps);
            for t in 0..n_steps {
                let alpha = if n_steps == 1 { 0.0 } else { t as f64 / (n_steps - 1) as f64 };
                traj.push(
                    request
                        .current_state
                        .iter()
                        .zip(endpoint.iter())
                        .map(|(s, e)| s + alpha * (e - s))
                        .collect(),
                );
            }
            Ok(traj)
        }
        InitInfo::GivenTraj { trajectory } => {
            if trajectory.len() != n_steps {
                return Err(TermError::InvalidRequest(format!(
                    "given trajectory has {} rows, expected {n_steps}",
                    trajectory.len()
                )));
            }
            if let Some(bad) = trajectory.iter().find(|row| row.len() != n_dof) {
                return Err(TermError::InvalidRequest(format!(
                    "given trajectory row has {} joints, expected {n_dof}",
                    bad.len()
                )));
            }
            Ok(trajectory.clone())
        }
    }
}

/// Build a ready problem from a request: variable blocks from the initial
/// trajectory (with fixed timesteps/DOFs pinned by zero-width bounds),
/// then every descriptor, then `setup`.
pub fn construct_problem(
    request: &ProblemRequest,
    manip: Arc<dyn JointGroup>,
) -> TermResult<(SqpProblem, ProblemContext)> {
    let n_dof = manip.num_joints();
    if request.current_state.len() != n_dof {
        return Err(TermError::InvalidRequest(format!(
            "current state has {} joints, group has {n_dof}",
            request.current_state.len()
        )));
    }
    for &dof in &request.basic_info.fixed_dofs {
        if dof >= n_dof {
            return Err(TermError::InvalidRequest(format!("fixed DOF {dof} out of range")));
        }
    }
    for &t in &request.basic_info.fixed_timesteps {
        if t >= request.basic_info.n_steps {
            return Err(TermError::InvalidRequest(format!("fixed timestep {t} out of range")));
        }
    }
    if request.basic_info.use_time
        && (request.default_dt < request.basic_info.dt_lower_limit
            || request.default_dt > request.basic_info.dt_upper_limit)
    {
        return Err(TermError::InvalidRequest(format!(
            "default dt {} outside [{}, {}]",
            request.default_dt,
            request.basic_info.dt_lower_limit,
            request.basic_info.dt_upper_limit
        )));
    }

    let traj = generate_initial_trajectory(request)?;
    let limits = manip.limits();
    let use_time = request.basic_info.use_time;

    let mut problem = SqpProblem::new();
    let mut steps = Vec::with_capacity(request.basic_info.n_steps);
    let mut inv_dt_cols = Vec::new();

    for (t, state) in traj.iter().enumerate() {
        let fixed = request.basic_info.fixed_timesteps.contains(&t);
        let mut values = state.clone();
        let mut lower = Vec::with_capacity(n_dof + 1);
        let mut upper = Vec::with_capacity(n_dof + 1);
        for j in 0..n_dof {
            if fixed || request.basic_info.fixed_dofs.contains(&j) {
                lower.push(values[j]);
                upper.push(values[j]);
            } else {
                lower.push(limits[j].0);
                upper.push(limits[j].1);
            }
        }
        if use_time {
            values.push(1.0 / request.default_dt);
            lower.push(1.0 / request.basic_info.dt_upper_limit);
            upper.push(1.0 / request.basic_info.dt_lower_limit);
        }
        let full = problem.add_var_block(format!("joint_position_{t}"), &values, &lower, &upper)?;
        steps.push(VarSlice { start: full.start, len: n_dof });
        if use_time {
            inv_dt_cols.push(full.start + n_dof);
        }
    }

    let ctx = ProblemContext { manip, steps, inv_dt_cols, n_dof };
    for desc in &request.cost_terms {
        desc.apply(&mut problem, &ctx)?;
    }
    for desc in &request.cnt_terms {
        desc.apply(&mut problem, &ctx)?;
    }
    problem.setup()?;
    Ok((problem, ctx))
}
