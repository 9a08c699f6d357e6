//! Collision term descriptor for the problem-request layer.
//!
//! Adds one fixed-arity collision constraint per consecutive timestep
//! pair, sharing a single collision cache across the trajectory. Endpoint
//! fixing is read off the variable bounds (zero-width bounds mean fixed),
//! and pairs with both endpoints fixed are skipped.

use std::any::Any;
use std::sync::Arc;

use sco_core::qp::SqpProblem;
use sco_core::term::{ComparisonKind, ConstraintTerm, CostTerm, TermEval};
use sco_core::variable::VarSlice;
use sco_terms::error::{TermError, TermResult};
use sco_terms::request::{ProblemContext, TermDescriptor, TermKind};

use crate::cache::CollisionCache;
use crate::config::CollisionConfig;
use crate::constraints::CollisionConstraintEval;
use crate::evaluators::{
    CollisionEvaluator, LvsContinuousCollisionEvaluator, LvsDiscreteCollisionEvaluator,
};
use crate::types::Environment;

/// Descriptor for trajectory-wide collision avoidance.
pub struct CollisionTermDesc {
    pub kind: TermKind,
    pub name: String,
    pub env: Option<Arc<dyn Environment>>,
    pub config: CollisionConfig,
    /// Swept checks when true, per-node sampling otherwise.
    pub continuous: bool,
    pub cache_capacity: usize,
    pub fixed_sparsity: bool,
    pub dynamic_environment: bool,
}

impl Default for CollisionTermDesc {
    fn default() -> Self {
        Self {
            kind: TermKind::Constraint(ComparisonKind::Ineq),
            name: String::new(),
            env: None,
            config: CollisionConfig::default(),
            continuous: true,
            cache_capacity: 100,
            fixed_sparsity: false,
            dynamic_environment: false,
        }
    }
}

/// Zero-width bounds across the position entries mean a fixed timestep.
fn step_is_fixed(problem: &SqpProblem, step: VarSlice) -> bool {
    problem
        .variables()
        .blocks()
        .iter()
        .find(|b| b.slice().start == step.start)
        .map(|b| {
            (0..step.len).all(|j| b.lower()[j] == b.upper()[j])
        })
        .unwrap_or(false)
}

impl TermDescriptor for CollisionTermDesc {
    fn type_name(&self) -> &'static str {
        "collision"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn apply(&self, problem: &mut SqpProblem, ctx: &ProblemContext) -> TermResult<()> {
        let env = self
            .env
            .as_ref()
            .ok_or_else(|| TermError::InvalidRequest("collision term has no environment".to_string()))?;
        if ctx.steps.len() < 2 {
            return Err(TermError::InvalidRequest(
                "collision term needs at least two timesteps".to_string(),
            ));
        }

        let cache = Arc::new(CollisionCache::new(self.cache_capacity));
        for t in 0..ctx.steps.len() - 1 {
            let fixed = [
                step_is_fixed(problem, ctx.steps[t]),
                step_is_fixed(problem, ctx.steps[t + 1]),
            ];
            if fixed[0] && fixed[1] {
                continue;
            }

            let evaluator: Arc<dyn CollisionEvaluator> = if self.continuous {
                Arc::new(
                    LvsContinuousCollisionEvaluator::new(
                        cache.clone(),
                        ctx.manip.clone(),
                        env.clone(),
                        self.config.clone(),
                        self.dynamic_environment,
                    )
                    .map_err(|e| TermError::Invalid(e.to_string()))?,
                )
            } else {
                Arc::new(
                    LvsDiscreteCollisionEvaluator::new(
                        cache.clone(),
                        ctx.manip.clone(),
                        env.clone(),
                        self.config.clone(),
                        self.dynamic_environment,
                    )
                    .map_err(|e| TermError::Invalid(e.to_string()))?,
                )
            };

            let eval = CollisionConstraintEval::new(
                evaluator,
                [ctx.steps[t], ctx.steps[t + 1]],
                fixed,
                self.config.max_num_cnt,
                self.fixed_sparsity,
            )
            .map_err(|e| TermError::Invalid(e.to_string()))?;

            let base = if self.name.is_empty() { "collision" } else { &self.name };
            let name = format!("{base}_{t}");
            let boxed: Box<dyn TermEval> = Box::new(eval);
            match self.kind {
                TermKind::Cost(p) => problem.add_cost(CostTerm::new(name, p, boxed))?,
                TermKind::Constraint(c) => {
                    problem.add_constraint(ConstraintTerm::new(name, c, boxed))?
                }
            }
        }
        Ok(())
    }
}

/// Register the "collision" term type with the process-wide registry.
/// Idempotent, so independent setup paths can all call it.
pub fn register_collision_term_type() -> TermResult<()> {
    if sco_terms::make_term("collision").is_some() {
        return Ok(());
    }
    sco_terms::register_term_type("collision", || Box::<CollisionTermDesc>::default())
}
