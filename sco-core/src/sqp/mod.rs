//! Trust-region SQP driver, results and callbacks.

pub mod callback;
pub mod results;
pub mod solver;

pub use callback::{IterationRecorder, RecorderHistory, SqpCallback, StopRequested};
pub use results::{SqpResults, SqpStatus};
pub use solver::{SqpParams, TrustRegionSqpSolver};
