//! Closed-form feasible projection for BKT parameters.
//!
//! Rules run in order: bounds, identifiability, performance ordering. The
//! projection never fails; every rule the incoming triple breaks, or whose
//! step had to move a value, is reported as a violation tag.

use serde::{Deserialize, Serialize};

use crate::kt::config::ConstraintConfig;
use crate::kt::types::ConceptParameters;

/// Slack for re-checking values a previous step already placed on a boundary.
const BOUNDARY_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintViolation {
    NonFinite,
    LearnRateOutOfBounds,
    SlipRateOutOfBounds,
    GuessRateOutOfBounds,
    Unidentifiable,
    PerformanceOrdering,
}

impl ConstraintViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonFinite => "non_finite",
            Self::LearnRateOutOfBounds => "learn_rate_out_of_bounds",
            Self::SlipRateOutOfBounds => "slip_rate_out_of_bounds",
            Self::GuessRateOutOfBounds => "guess_rate_out_of_bounds",
            Self::Unidentifiable => "unidentifiable",
            Self::PerformanceOrdering => "performance_ordering",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectedParameters {
    pub params: ConceptParameters,
    pub violations: Vec<ConstraintViolation>,
}

impl ProjectedParameters {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct ConstraintValidator {
    config: ConstraintConfig,
}

impl Default for ConstraintValidator {
    fn default() -> Self {
        Self::new(ConstraintConfig::default())
    }
}

impl ConstraintValidator {
    pub fn new(config: ConstraintConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConstraintConfig {
        &self.config
    }

    pub fn project(&self, candidate: ConceptParameters) -> ProjectedParameters {
        let mut violations = self.inspect(&candidate);
        let mut p = candidate;

        // 1. bounds
        let bounded = self.clamp_bounds(p);
        if bounded.learn_rate != p.learn_rate {
            push_unique(&mut violations, ConstraintViolation::LearnRateOutOfBounds);
        }
        if bounded.slip_rate != p.slip_rate {
            push_unique(&mut violations, ConstraintViolation::SlipRateOutOfBounds);
        }
        if bounded.guess_rate != p.guess_rate {
            push_unique(&mut violations, ConstraintViolation::GuessRateOutOfBounds);
        }
        p = bounded;

        // 2. identifiability: slip + guess < 1
        let ceiling = 1.0 - self.config.identifiability_margin;
        let sum = p.slip_rate + p.guess_rate;
        if sum > ceiling + BOUNDARY_TOLERANCE {
            let scale = ceiling / sum;
            p.slip_rate *= scale;
            p.guess_rate *= scale;
            push_unique(&mut violations, ConstraintViolation::Unidentifiable);
        }

        // 3. performance ordering: (1 - slip) - guess >= min_discrimination
        let gap = self.config.min_discrimination;
        if (1.0 - p.slip_rate) - p.guess_rate < gap - BOUNDARY_TOLERANCE {
            let nudged = (1.0 - p.slip_rate) - gap;
            if nudged >= 0.0 {
                p.guess_rate = nudged;
            } else {
                p.guess_rate = 0.0;
                p.slip_rate = p.slip_rate.min(1.0 - gap);
            }
            push_unique(&mut violations, ConstraintViolation::PerformanceOrdering);
        }

        ProjectedParameters {
            params: p,
            violations,
        }
    }

    /// Rules broken by the triple as received.
    fn inspect(&self, p: &ConceptParameters) -> Vec<ConstraintViolation> {
        let mut found = Vec::new();
        let finite =
            p.learn_rate.is_finite() && p.slip_rate.is_finite() && p.guess_rate.is_finite();
        if !finite {
            found.push(ConstraintViolation::NonFinite);
            return found;
        }
        if !(0.0..=1.0).contains(&p.learn_rate) {
            found.push(ConstraintViolation::LearnRateOutOfBounds);
        }
        if !(0.0..=self.config.max_slip).contains(&p.slip_rate) {
            found.push(ConstraintViolation::SlipRateOutOfBounds);
        }
        if !(0.0..=self.config.max_guess).contains(&p.guess_rate) {
            found.push(ConstraintViolation::GuessRateOutOfBounds);
        }
        if p.slip_rate + p.guess_rate >= 1.0 {
            found.push(ConstraintViolation::Unidentifiable);
        }
        if (1.0 - p.slip_rate) - p.guess_rate < self.config.min_discrimination - BOUNDARY_TOLERANCE
        {
            found.push(ConstraintViolation::PerformanceOrdering);
        }
        found
    }

    fn clamp_bounds(&self, p: ConceptParameters) -> ConceptParameters {
        let fix = |v: f64, hi: f64| if v.is_finite() { v.clamp(0.0, hi) } else { 0.0 };
        ConceptParameters {
            learn_rate: fix(p.learn_rate, 1.0),
            slip_rate: fix(p.slip_rate, self.config.max_slip),
            guess_rate: fix(p.guess_rate, self.config.max_guess),
        }
    }
}

fn push_unique(violations: &mut Vec<ConstraintViolation>, v: ConstraintViolation) {
    if !violations.contains(&v) {
        violations.push(v);
    }
}
