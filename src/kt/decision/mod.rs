pub mod ensemble;
pub mod linucb;
pub mod matrix;

pub use ensemble::{
    AttentionSequencePredictor, AuxPrediction, AuxiliaryPredictor, EnsembleGate, EnsembleOutput,
};
pub use linucb::{
    ArmKey, ArmScore, ArmStats, CandidateQuestion, LinUcbPolicy, SelectionContext,
    SelectionDebug, SelectionDecision, FEATURE_DIM, FEATURE_NAMES,
};
