//! Knowledge-tracing core.
//!
//! Layers, leaf first:
//! - modeling: context modulation, constraint projection, BKT update
//! - decision: ensemble gate, LinUCB question selection
//! - memory: half-life regression review scheduling
//! - evaluation: log replay, discrimination and calibration metrics

pub mod config;
pub mod decision;
pub mod engine;
pub mod evaluation;
pub mod memory;
pub mod metrics;
pub mod modeling;
pub mod types;

pub use config::CoreConfig;
pub use engine::KnowledgeTracingEngine;
