pub mod config;
pub mod error;
pub mod kt;
pub mod logging;
pub mod replay;
pub mod store;

pub use error::{CoreError, CoreResult, StoreError};
pub use kt::config::CoreConfig;
pub use kt::engine::{FeedbackAck, FeedbackRequest, KnowledgeTracingEngine, UpdateRequest, UpdateResponse};
