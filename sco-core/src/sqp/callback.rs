//! Per-iteration observers.
//!
//! Callbacks run after every QP step, once the problem variables have been
//! restored to the accepted iterate, so they observe a consistent snapshot.
//! Returning `false` stops the solve with `CallbackStopped`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::qp::problem::QpProblem;
use crate::sqp::results::SqpResults;

/// Observer invoked after each QP step.
pub trait SqpCallback {
    /// Return `false` to request termination.
    fn execute(&mut self, problem: &dyn QpProblem, results: &SqpResults) -> bool;
}

/// Per-step history captured by [`IterationRecorder`].
#[derive(Debug, Default)]
pub struct RecorderHistory {
    /// Merit of the accepted iterate at each QP step.
    pub best_merits: Vec<f64>,
    /// Merit of each candidate, including rejected ones.
    pub new_merits: Vec<f64>,
    pub var_history: Vec<Vec<f64>>,
}

/// Records the merit and iterate history of a solve. The history lives
/// behind a shared handle so it stays readable after the callback box has
/// been handed to the solver.
#[derive(Debug, Clone, Default)]
pub struct IterationRecorder {
    history: Arc<Mutex<RecorderHistory>>,
}

impl IterationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Arc<Mutex<RecorderHistory>> {
        self.history.clone()
    }
}

impl SqpCallback for IterationRecorder {
    fn execute(&mut self, _problem: &dyn QpProblem, results: &SqpResults) -> bool {
        let mut h = self.history.lock().expect("recorder poisoned");
        h.best_merits.push(results.best_exact_merit);
        h.new_merits.push(results.new_exact_merit);
        h.var_history.push(results.new_var_vals.clone());
        true
    }
}

/// Cooperative cancellation: stops the solve once the shared flag is set.
#[derive(Debug, Clone, Default)]
pub struct StopRequested {
    flag: Arc<AtomicBool>,
}

impl StopRequested {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to flip from another thread or a signal handler.
    pub fn handle(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

impl SqpCallback for StopRequested {
    fn execute(&mut self, _problem: &dyn QpProblem, _results: &SqpResults) -> bool {
        !self.flag.load(Ordering::Relaxed)
    }
}
