pub mod hlr;

pub use hlr::{half_life_days, recall_probability, HlrFeatures, ReviewSchedule, SpacingScheduler};
