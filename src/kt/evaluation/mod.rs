//! Offline evaluation of the tracing pipeline against logged outcomes.

pub mod metrics;
pub mod replay;

pub use metrics::{MasteryStep, Prediction, ReliabilityBin};
pub use replay::{EvaluationDetails, EvaluationEngine, EvaluationReport, Replay};
