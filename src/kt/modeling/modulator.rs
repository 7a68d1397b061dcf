//! Contextual parameter modulation.
//!
//! Each recognised context dimension scales one or more of the base BKT
//! parameters by a bounded factor. Effects compose in a fixed order:
//! difficulty, Bloom level, response latency, then the deviation clamp.
//! Hard probability bounds are left to the constraint validator.

use serde::{Deserialize, Serialize};

use crate::kt::config::ModulationConfig;
use crate::kt::types::{AttemptContext, ConceptParameters, KnowledgeConcept};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextDimension {
    Difficulty,
    BloomLevel,
    ResponseTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterName {
    LearnRate,
    SlipRate,
    GuessRate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Adjustment {
    pub dimension: ContextDimension,
    pub parameter: ParameterName,
    pub factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModulatedParameters {
    pub params: ConceptParameters,
    pub adjustments: Vec<Adjustment>,
    /// Parameters pulled back inside the allowed deviation band.
    pub clamped: Vec<ParameterName>,
}

pub struct ContextualModulator {
    config: ModulationConfig,
}

impl Default for ContextualModulator {
    fn default() -> Self {
        Self::new(ModulationConfig::default())
    }
}

impl ContextualModulator {
    pub fn new(config: ModulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModulationConfig {
        &self.config
    }

    pub fn modulate(
        &self,
        base: ConceptParameters,
        concept: &KnowledgeConcept,
        context: &AttemptContext,
    ) -> ModulatedParameters {
        let mut params = base;
        let mut adjustments = Vec::new();

        if let (Some(level), true) = (context.difficulty_level, self.config.difficulty.enabled) {
            let delta = level_delta(level, concept.difficulty_level, 4.0);
            if delta != 0.0 {
                let effect = &self.config.difficulty;
                let slip = 1.0 + effect.slip_sensitivity * delta;
                let guess = 1.0 - effect.guess_sensitivity * delta;
                params.slip_rate *= slip;
                params.guess_rate *= guess;
                adjustments.push(Adjustment {
                    dimension: ContextDimension::Difficulty,
                    parameter: ParameterName::SlipRate,
                    factor: slip,
                });
                adjustments.push(Adjustment {
                    dimension: ContextDimension::Difficulty,
                    parameter: ParameterName::GuessRate,
                    factor: guess,
                });
            }
        }

        if let (Some(level), true) = (context.bloom_level, self.config.bloom.enabled) {
            let delta = level_delta(level, concept.bloom_level, 5.0);
            if delta != 0.0 {
                let slip = 1.0 - self.config.bloom.slip_relief * delta;
                params.slip_rate *= slip;
                adjustments.push(Adjustment {
                    dimension: ContextDimension::BloomLevel,
                    parameter: ParameterName::SlipRate,
                    factor: slip,
                });
            }
        }

        if let (Some(rt), true) = (context.response_time_ms, self.config.response_time.enabled) {
            let effect = &self.config.response_time;
            let rt = rt as f64;
            let fast = effect.fast_threshold_ms as f64;
            let slow = effect.slow_threshold_ms as f64;
            if fast > 0.0 && rt < fast {
                // suspected click-through
                let guess = 1.0 + effect.fast_guess_boost * (1.0 - rt / fast);
                params.guess_rate *= guess;
                adjustments.push(Adjustment {
                    dimension: ContextDimension::ResponseTime,
                    parameter: ParameterName::GuessRate,
                    factor: guess,
                });
            } else if rt > slow {
                let overshoot = ((rt - slow) / slow).min(1.0);
                let learn = 1.0 - effect.slow_learn_penalty * overshoot;
                params.learn_rate *= learn;
                adjustments.push(Adjustment {
                    dimension: ContextDimension::ResponseTime,
                    parameter: ParameterName::LearnRate,
                    factor: learn,
                });
            }
        }

        let clamped = self.clamp_deviation(&base, &mut params);

        ModulatedParameters {
            params,
            adjustments,
            clamped,
        }
    }

    fn clamp_deviation(
        &self,
        base: &ConceptParameters,
        params: &mut ConceptParameters,
    ) -> Vec<ParameterName> {
        let dev = self.config.max_deviation;
        let mut clamped = Vec::new();
        let mut pull = |name: ParameterName, base: f64, value: &mut f64| {
            let lo = base * (1.0 - dev);
            let hi = base * (1.0 + dev);
            if !(lo.is_finite() && hi.is_finite()) {
                return;
            }
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            let bounded = value.clamp(lo, hi);
            if bounded != *value {
                *value = bounded;
                clamped.push(name);
            }
        };
        pull(ParameterName::LearnRate, base.learn_rate, &mut params.learn_rate);
        pull(ParameterName::SlipRate, base.slip_rate, &mut params.slip_rate);
        pull(ParameterName::GuessRate, base.guess_rate, &mut params.guess_rate);
        clamped
    }
}

fn level_delta(level: u8, nominal: u8, span: f64) -> f64 {
    ((level as f64 - nominal as f64) / span).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concept() -> KnowledgeConcept {
        KnowledgeConcept::new("fractions", 3, 3)
    }

    fn base() -> ConceptParameters {
        ConceptParameters::new(0.2, 0.1, 0.2)
    }

    #[test]
    fn empty_context_is_identity() {
        let modulator = ContextualModulator::default();
        let out = modulator.modulate(base(), &concept(), &AttemptContext::default());
        assert_eq!(out.params, base());
        assert!(out.adjustments.is_empty());
        assert!(out.clamped.is_empty());
    }

    #[test]
    fn nominal_levels_are_identity() {
        let modulator = ContextualModulator::default();
        let ctx = AttemptContext {
            difficulty_level: Some(3),
            bloom_level: Some(3),
            response_time_ms: Some(10_000),
        };
        let out = modulator.modulate(base(), &concept(), &ctx);
        assert_eq!(out.params, base());
    }

    #[test]
    fn harder_items_raise_slip_and_lower_guess() {
        let modulator = ContextualModulator::default();
        let ctx = AttemptContext {
            difficulty_level: Some(5),
            ..Default::default()
        };
        let out = modulator.modulate(base(), &concept(), &ctx);
        assert!(out.params.slip_rate > base().slip_rate);
        assert!(out.params.guess_rate < base().guess_rate);
        assert_eq!(out.params.learn_rate, base().learn_rate);
    }

    #[test]
    fn higher_bloom_level_lowers_slip() {
        let modulator = ContextualModulator::default();
        let ctx = AttemptContext {
            bloom_level: Some(6),
            ..Default::default()
        };
        let out = modulator.modulate(base(), &concept(), &ctx);
        assert!(out.params.slip_rate < base().slip_rate);
    }

    #[test]
    fn fast_responses_raise_guess() {
        let modulator = ContextualModulator::default();
        let ctx = AttemptContext {
            response_time_ms: Some(200),
            ..Default::default()
        };
        let out = modulator.modulate(base(), &concept(), &ctx);
        assert!(out.params.guess_rate > base().guess_rate);
        assert_eq!(out.adjustments[0].dimension, ContextDimension::ResponseTime);
    }

    #[test]
    fn slow_responses_lower_learn_rate() {
        let modulator = ContextualModulator::default();
        let ctx = AttemptContext {
            response_time_ms: Some(180_000),
            ..Default::default()
        };
        let out = modulator.modulate(base(), &concept(), &ctx);
        assert!(out.params.learn_rate < base().learn_rate);
    }

    #[test]
    fn deviation_is_clamped_relative_to_base() {
        let config = ModulationConfig {
            max_deviation: 0.1,
            ..Default::default()
        };
        let modulator = ContextualModulator::new(config);
        let ctx = AttemptContext {
            difficulty_level: Some(5),
            response_time_ms: Some(0),
            ..Default::default()
        };
        let out = modulator.modulate(base(), &concept(), &ctx);
        assert!((out.params.slip_rate - 0.11).abs() < 1e-12);
        assert!(out.params.guess_rate <= 0.22 + 1e-12);
        assert!(out.clamped.contains(&ParameterName::SlipRate));
    }

    #[test]
    fn modulator_does_not_enforce_hard_bounds() {
        let modulator = ContextualModulator::default();
        let ctx = AttemptContext {
            response_time_ms: Some(0),
            ..Default::default()
        };
        let high_guess = ConceptParameters::new(0.2, 0.1, 0.45);
        let out = modulator.modulate(high_guess, &concept(), &ctx);
        assert!(out.params.guess_rate > 0.5);
    }
}
