//! Calibration-gated blending of BKT with an auxiliary sequence model.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::kt::config::{EnsembleConfig, EnsembleMode};
use crate::kt::modeling::BktOutcome;
use crate::kt::types::Interaction;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AuxPrediction {
    pub p_correct: f64,
    #[serde(default)]
    pub mastery: Option<f64>,
}

/// Predicts the next outcome from a student's recent interactions, oldest
/// first. `Ok(None)` means the model abstains.
pub trait AuxiliaryPredictor: Send + Sync {
    fn name(&self) -> &str;

    fn predict(&self, concept_id: &str, history: &[Interaction]) -> CoreResult<Option<AuxPrediction>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleOutput {
    pub model: String,
    pub weight: f64,
    pub bkt_p_correct: f64,
    pub bkt_new_mastery: f64,
    pub auxiliary_p: f64,
    pub auxiliary_mastery: Option<f64>,
    pub blended_p_correct: f64,
    pub blended_mastery: f64,
}

pub struct EnsembleGate {
    config: EnsembleConfig,
    predictor: Option<Arc<dyn AuxiliaryPredictor>>,
    auxiliary_ece: RwLock<HashMap<String, f64>>,
}

impl EnsembleGate {
    pub fn new(config: EnsembleConfig, predictor: Option<Arc<dyn AuxiliaryPredictor>>) -> Self {
        Self {
            config,
            predictor,
            auxiliary_ece: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> EnsembleMode {
        self.config.mode
    }

    pub fn is_active(&self) -> bool {
        self.config.mode == EnsembleMode::BktWithAuxiliary && self.predictor.is_some()
    }

    pub fn history_limit(&self) -> usize {
        self.config.history_limit
    }

    pub fn record_auxiliary_calibration(&self, concept_id: &str, ece: f64) {
        if ece.is_finite() {
            self.auxiliary_ece.write().insert(concept_id.to_string(), ece);
        }
    }

    pub fn auxiliary_calibration(&self, concept_id: &str) -> Option<f64> {
        self.auxiliary_ece.read().get(concept_id).copied()
    }

    /// Auxiliary weight for a concept, ramped down as its recorded ECE
    /// moves from `ece_threshold` to `ece_cutoff`.
    pub fn weight(&self, concept_id: &str) -> f64 {
        let max = self.config.max_weight.clamp(0.0, 0.5);
        let w = self.config.base_weight.clamp(0.0, max);
        match self.auxiliary_calibration(concept_id) {
            Some(ece) if ece >= self.config.ece_cutoff => 0.0,
            Some(ece) if ece > self.config.ece_threshold => {
                let span = self.config.ece_cutoff - self.config.ece_threshold;
                w * (self.config.ece_cutoff - ece) / span
            }
            _ => w,
        }
    }

    /// Blends the pre-attempt prediction with one made from `history`, and
    /// the post-attempt mastery with one made from `history` plus `attempt`.
    ///
    /// `None` in `BktOnly` mode, when the predictor abstains or fails, or
    /// when the auxiliary output is unusable.
    pub fn blend(
        &self,
        concept_id: &str,
        outcome: &BktOutcome,
        history: &[Interaction],
        attempt: &Interaction,
    ) -> Option<EnsembleOutput> {
        if self.config.mode == EnsembleMode::BktOnly {
            return None;
        }
        let predictor = self.predictor.as_ref()?;

        let aux = match predictor.predict(concept_id, history) {
            Ok(Some(aux)) => aux,
            Ok(None) => {
                tracing::debug!(model = predictor.name(), concept_id, "auxiliary model abstained");
                return None;
            }
            Err(err) => {
                tracing::warn!(
                    model = predictor.name(),
                    concept_id,
                    error = %err,
                    "auxiliary prediction failed, using BKT only"
                );
                return None;
            }
        };
        if !aux.p_correct.is_finite() || !(0.0..=1.0).contains(&aux.p_correct) {
            tracing::warn!(
                model = predictor.name(),
                concept_id,
                p = aux.p_correct,
                "auxiliary prediction out of range, using BKT only"
            );
            return None;
        }
        let aux_mastery = self.mastery_after(predictor.as_ref(), concept_id, history, attempt);

        let w = self.weight(concept_id);
        let blended_p_correct = (1.0 - w) * outcome.p_correct_pred + w * aux.p_correct;
        let blended_mastery = match aux_mastery {
            Some(m) => (1.0 - w) * outcome.new_mastery + w * m,
            None => outcome.new_mastery,
        };

        Some(EnsembleOutput {
            model: predictor.name().to_string(),
            weight: w,
            bkt_p_correct: outcome.p_correct_pred,
            bkt_new_mastery: outcome.new_mastery,
            auxiliary_p: aux.p_correct,
            auxiliary_mastery: aux_mastery,
            blended_p_correct: blended_p_correct.clamp(0.0, 1.0),
            blended_mastery: blended_mastery.clamp(0.0, 1.0),
        })
    }

    fn mastery_after(
        &self,
        predictor: &dyn AuxiliaryPredictor,
        concept_id: &str,
        history: &[Interaction],
        attempt: &Interaction,
    ) -> Option<f64> {
        let mut observed = Vec::with_capacity(history.len() + 1);
        observed.extend_from_slice(history);
        observed.push(attempt.clone());
        match predictor.predict(concept_id, &observed) {
            Ok(Some(aux)) => aux.mastery.filter(|m| m.is_finite() && (0.0..=1.0).contains(m)),
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(
                    model = predictor.name(),
                    concept_id,
                    error = %err,
                    "auxiliary mastery unavailable"
                );
                None
            }
        }
    }
}

/// Softmax attention over the recent outcome sequence. Scores decay with
/// position from the newest attempt and get a bonus when the attempt is on
/// the concept being predicted.
#[derive(Debug, Clone)]
pub struct AttentionSequencePredictor {
    pub recency_half_life: f64,
    pub concept_bonus: f64,
    pub temperature: f64,
    pub min_history: usize,
}

impl Default for AttentionSequencePredictor {
    fn default() -> Self {
        Self {
            recency_half_life: 5.0,
            concept_bonus: 1.0,
            temperature: 1.0,
            min_history: 3,
        }
    }
}

impl AttentionSequencePredictor {
    fn attend<'a, I>(&self, concept_id: &str, items: I) -> Option<(f64, usize)>
    where
        I: Iterator<Item = (usize, &'a Interaction)>,
    {
        let decay = std::f64::consts::LN_2 / self.recency_half_life.max(1e-6);
        let temperature = self.temperature.max(1e-6);
        let scored: Vec<(f64, f64)> = items
            .map(|(age, it)| {
                let mut score = -(age as f64) * decay;
                if it.concept_id == concept_id {
                    score += self.concept_bonus;
                }
                (score / temperature, it.outcome())
            })
            .collect();
        let max = scored.iter().map(|(s, _)| *s).fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let mut total = 0.0;
        let mut acc = 0.0;
        for (score, outcome) in &scored {
            let weight = (score - max).exp();
            total += weight;
            acc += weight * outcome;
        }
        (total > 0.0).then(|| (acc / total, scored.len()))
    }
}

impl AuxiliaryPredictor for AttentionSequencePredictor {
    fn name(&self) -> &str {
        "attention_sequence"
    }

    fn predict(&self, concept_id: &str, history: &[Interaction]) -> CoreResult<Option<AuxPrediction>> {
        if history.len() < self.min_history {
            return Ok(None);
        }
        let newest_first = || history.iter().rev().enumerate();

        let (attended, n) = self
            .attend(concept_id, newest_first())
            .ok_or_else(|| CoreError::validation("attention weights collapsed"))?;
        // Laplace smoothing keeps short histories away from 0 and 1.
        let p_correct = (attended * n as f64 + 1.0) / (n as f64 + 2.0);

        let mastery = self
            .attend(
                concept_id,
                newest_first().filter(|(_, it)| it.concept_id == concept_id),
            )
            .map(|(attended, n)| (attended * n as f64 + 1.0) / (n as f64 + 2.0));

        Ok(Some(AuxPrediction { p_correct, mastery }))
    }
}
