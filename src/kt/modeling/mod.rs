//! Mastery modeling layer
//!
//! Contains:
//! - ContextualModulator - context-driven shaping of the base BKT triple
//! - ConstraintValidator - closed-form projection onto the identifiable region
//! - BktUpdateEngine - Bayesian posterior and learning transition

pub mod bkt;
pub mod constraints;
pub mod modulator;

pub use bkt::{posterior, predict_correct, transition, BktOutcome, BktUpdateEngine};
pub use constraints::{ConstraintValidator, ConstraintViolation, ProjectedParameters};
pub use modulator::{
    Adjustment, ContextDimension, ContextualModulator, ModulatedParameters, ParameterName,
};
