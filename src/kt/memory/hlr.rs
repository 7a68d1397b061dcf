//! Half-life regression review scheduling.
//!
//! `h = 2^(θᵀx)` days with `x = [1, elapsed_days, success_rate, √practice_count]`.
//! The next gap is the time at which predicted recall decays to the target.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::kt::config::{HlrWeights, SpacingConfig};
use crate::kt::types::StudentConceptState;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HlrFeatures {
    pub elapsed_days: f64,
    pub success_rate: f64,
    pub practice_count: u64,
}

impl HlrFeatures {
    pub fn from_state(state: &StudentConceptState, now: DateTime<Utc>) -> Self {
        let elapsed_days = state
            .last_practiced_at
            .map(|at| days_between(at, now))
            .unwrap_or(0.0);
        Self {
            elapsed_days,
            success_rate: state.success_rate(),
            practice_count: state.practice_count,
        }
    }

    pub fn vector(&self) -> [f64; 4] {
        [
            1.0,
            self.elapsed_days,
            self.success_rate,
            (self.practice_count as f64).sqrt(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewSchedule {
    pub student_id: String,
    pub concept_id: String,
    pub half_life_days: f64,
    pub recall_probability: f64,
    pub interval_days: f64,
    pub next_review_at: DateTime<Utc>,
    pub due: bool,
    pub features: HlrFeatures,
}

pub fn half_life_days(weights: &HlrWeights, x: &[f64; 4], min_log2: f64, max_log2: f64) -> f64 {
    let exponent = weights.bias * x[0]
        + weights.elapsed_days * x[1]
        + weights.success_rate * x[2]
        + weights.sqrt_practice_count * x[3];
    let exponent = if exponent.is_finite() { exponent } else { min_log2 };
    2f64.powf(exponent.clamp(min_log2, max_log2))
}

pub fn recall_probability(elapsed_days: f64, half_life_days: f64) -> f64 {
    2f64.powf(-elapsed_days.max(0.0) / half_life_days)
}

pub struct SpacingScheduler {
    config: SpacingConfig,
}

impl Default for SpacingScheduler {
    fn default() -> Self {
        Self::new(SpacingConfig::default())
    }
}

impl SpacingScheduler {
    pub fn new(config: SpacingConfig) -> Self {
        Self { config }
    }

    /// Gap in days until recall falls to the target, within the configured bounds.
    pub fn interval_days(&self, half_life_days: f64) -> f64 {
        let target = self.config.target_recall.clamp(1e-6, 1.0 - 1e-6);
        let raw = -half_life_days * target.log2();
        let floor = self.config.min_interval_hours / 24.0;
        let cap = self.config.max_interval_days.max(floor);
        if raw.is_finite() {
            raw.clamp(floor, cap)
        } else {
            floor
        }
    }

    pub fn schedule(&self, state: &StudentConceptState, now: DateTime<Utc>) -> ReviewSchedule {
        let features = HlrFeatures::from_state(state, now);
        let h = half_life_days(
            &self.config.weights,
            &features.vector(),
            self.config.min_log2_half_life,
            self.config.max_log2_half_life,
        );
        let interval_days = self.interval_days(h);
        let anchor = state.last_practiced_at.unwrap_or(now);
        let next_review_at =
            anchor + Duration::milliseconds((interval_days * SECONDS_PER_DAY * 1000.0) as i64);

        ReviewSchedule {
            student_id: state.student_id.clone(),
            concept_id: state.concept_id.clone(),
            half_life_days: h,
            recall_probability: recall_probability(features.elapsed_days, h),
            interval_days,
            next_review_at,
            due: next_review_at <= now,
            features,
        }
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let ms = (to - from).num_milliseconds().max(0);
    ms as f64 / (SECONDS_PER_DAY * 1000.0)
}
