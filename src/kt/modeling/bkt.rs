//! Corbett–Anderson Bayesian Knowledge Tracing update.
//!
//! Observation step (Bayes on the correctness bit) followed by the learning
//! transition. Pure: the same inputs always give the same output.

use serde::{Deserialize, Serialize};

use crate::kt::config::BktConfig;
use crate::kt::modeling::constraints::{ConstraintViolation, ProjectedParameters};
use crate::kt::types::ConceptParameters;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BktOutcome {
    pub previous_mastery: f64,
    pub posterior_mastery: f64,
    pub new_mastery: f64,
    pub p_correct_pred: f64,
    pub params: ConceptParameters,
    pub violations: Vec<ConstraintViolation>,
}

/// P(correct) before the outcome is observed.
pub fn predict_correct(mastery: f64, params: &ConceptParameters) -> f64 {
    mastery * (1.0 - params.slip_rate) + (1.0 - mastery) * params.guess_rate
}

/// Posterior mastery after observing `is_correct`, before the transition.
pub fn posterior(mastery: f64, params: &ConceptParameters, is_correct: bool, epsilon: f64) -> f64 {
    let (hit, miss) = if is_correct {
        (
            mastery * (1.0 - params.slip_rate),
            (1.0 - mastery) * params.guess_rate,
        )
    } else {
        (
            mastery * params.slip_rate,
            (1.0 - mastery) * (1.0 - params.guess_rate),
        )
    };
    hit / (hit + miss + epsilon)
}

pub fn transition(posterior: f64, learn_rate: f64) -> f64 {
    posterior + (1.0 - posterior) * learn_rate
}

pub struct BktUpdateEngine {
    epsilon: f64,
}

impl Default for BktUpdateEngine {
    fn default() -> Self {
        Self::new(BktConfig::default())
    }
}

impl BktUpdateEngine {
    pub fn new(config: BktConfig) -> Self {
        Self {
            epsilon: config.epsilon,
        }
    }

    pub fn update(
        &self,
        prior: f64,
        projected: &ProjectedParameters,
        is_correct: bool,
    ) -> BktOutcome {
        let m = if prior.is_finite() {
            prior.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let params = projected.params;
        let p_correct_pred = predict_correct(m, &params);
        let post = posterior(m, &params, is_correct, self.epsilon).clamp(0.0, 1.0);
        let new_mastery = transition(post, params.learn_rate).clamp(0.0, 1.0);

        BktOutcome {
            previous_mastery: m,
            posterior_mastery: post,
            new_mastery,
            p_correct_pred,
            params,
            violations: projected.violations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projected(l: f64, s: f64, g: f64) -> ProjectedParameters {
        ProjectedParameters {
            params: ConceptParameters::new(l, s, g),
            violations: Vec::new(),
        }
    }

    #[test]
    fn worked_example_correct_answer() {
        let engine = BktUpdateEngine::default();
        let out = engine.update(0.5, &projected(0.25, 0.1, 0.2), true);
        assert!((out.p_correct_pred - 0.55).abs() < 1e-12);
        let post = (0.5 * 0.9) / (0.5 * 0.9 + 0.5 * 0.2);
        assert!((out.posterior_mastery - post).abs() < 1e-8);
        assert!((out.new_mastery - (post + (1.0 - post) * 0.25)).abs() < 1e-8);
    }

    #[test]
    fn incorrect_answer_lowers_posterior() {
        let engine = BktUpdateEngine::default();
        let out = engine.update(0.6, &projected(0.0, 0.1, 0.2), false);
        assert!(out.posterior_mastery < 0.6);
        assert_eq!(out.new_mastery, out.posterior_mastery);
    }

    #[test]
    fn degenerate_priors_do_not_divide_by_zero() {
        let engine = BktUpdateEngine::default();
        for prior in [0.0, 1.0] {
            for correct in [true, false] {
                let out = engine.update(prior, &projected(0.1, 0.0, 0.0), correct);
                assert!(out.new_mastery.is_finite());
                assert!((0.0..=1.0).contains(&out.new_mastery));
            }
        }
    }

    #[test]
    fn non_finite_prior_is_treated_as_zero() {
        let engine = BktUpdateEngine::default();
        let out = engine.update(f64::NAN, &projected(0.2, 0.1, 0.2), true);
        assert_eq!(out.previous_mastery, 0.0);
        assert!(out.new_mastery.is_finite());
    }

    #[test]
    fn violations_are_carried_into_the_outcome() {
        let engine = BktUpdateEngine::default();
        let mut p = projected(0.2, 0.1, 0.2);
        p.violations.push(ConstraintViolation::Unidentifiable);
        let out = engine.update(0.5, &p, true);
        assert_eq!(out.violations, vec![ConstraintViolation::Unidentifiable]);
    }
}
