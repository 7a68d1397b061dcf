//! Log replay and window assessment.
//!
//! Each student's attempts are rolled forward in time order through the same
//! modulate -> project -> update pipeline as live traffic. The prediction
//! scored for an attempt only ever uses earlier attempts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kt::config::{BktConfig, ConstraintConfig, EvaluationConfig, ModulationConfig};
use crate::kt::evaluation::metrics::{
    accuracy, auc, brier_score, expected_calibration_error, reliability_bins,
    trajectory_validity, MasteryStep, Prediction, ReliabilityBin,
};
use crate::kt::modeling::{BktUpdateEngine, ConstraintValidator, ContextualModulator};
use crate::kt::types::{
    ConceptParameters, EvaluationWindow, Interaction, KnowledgeConcept, Recommendation,
};

/// Predictions and mastery steps recovered from a replay.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    pub predictions: Vec<Prediction>,
    pub auxiliary: Vec<Prediction>,
    pub steps: Vec<MasteryStep>,
    pub student_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationDetails {
    pub interaction_count: usize,
    pub student_count: usize,
    pub correct_count: usize,
    pub incorrect_count: usize,
    pub auxiliary_count: usize,
    pub auxiliary_calibration_error: Option<f64>,
    pub failed_checks: Vec<String>,
    pub reliability_bins: Vec<ReliabilityBin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub concept_id: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub next_step_auc: Option<f64>,
    pub next_step_accuracy: Option<f64>,
    pub brier_score: Option<f64>,
    pub calibration_error: Option<f64>,
    pub trajectory_validity: Option<f64>,
    pub recommendation: Recommendation,
    pub details: EvaluationDetails,
}

impl EvaluationReport {
    pub fn is_insufficient(&self) -> bool {
        self.recommendation == Recommendation::InsufficientData
    }

    pub fn to_window(&self, created_at: DateTime<Utc>) -> EvaluationWindow {
        EvaluationWindow {
            concept_id: self.concept_id.clone(),
            start: self.start,
            end: self.end,
            auc: self.next_step_auc,
            accuracy: self.next_step_accuracy,
            brier_score: self.brier_score,
            calibration_error: self.calibration_error,
            trajectory_validity: self.trajectory_validity,
            interaction_count: self.details.interaction_count,
            recommendation: self.recommendation,
            created_at,
        }
    }
}

pub struct EvaluationEngine {
    config: EvaluationConfig,
    modulator: ContextualModulator,
    validator: ConstraintValidator,
    bkt: BktUpdateEngine,
}

impl EvaluationEngine {
    pub fn new(
        config: EvaluationConfig,
        modulation: ModulationConfig,
        constraints: ConstraintConfig,
        bkt: BktConfig,
    ) -> Self {
        Self {
            config,
            modulator: ContextualModulator::new(modulation),
            validator: ConstraintValidator::new(constraints),
            bkt: BktUpdateEngine::new(bkt),
        }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// `interactions` must already be sorted by timestamp.
    pub fn replay(
        &self,
        concept: &KnowledgeConcept,
        base: ConceptParameters,
        prior: f64,
        interactions: &[Interaction],
    ) -> Replay {
        let mut mastery: HashMap<&str, f64> = HashMap::new();
        let mut replay = Replay::default();

        for it in interactions {
            let m = *mastery.entry(it.student_id.as_str()).or_insert_with(|| {
                it.prior_mastery
                    .filter(|p| p.is_finite() && (0.0..=1.0).contains(p))
                    .unwrap_or(prior)
            });
            let modulated = self.modulator.modulate(base, concept, &it.context);
            let projected = self.validator.project(modulated.params);
            let outcome = self.bkt.update(m, &projected, it.is_correct);

            replay
                .predictions
                .push(Prediction::new(outcome.p_correct_pred, it.is_correct));
            if let Some(p) = it.auxiliary_p.filter(|p| p.is_finite()) {
                replay.auxiliary.push(Prediction::new(p, it.is_correct));
            }
            replay.steps.push(MasteryStep {
                previous: outcome.previous_mastery,
                next: outcome.new_mastery,
                is_correct: it.is_correct,
            });
            mastery.insert(it.student_id.as_str(), outcome.new_mastery);
        }

        replay.student_count = mastery.len();
        replay
    }

    pub fn assess(
        &self,
        concept_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        replay: &Replay,
    ) -> EvaluationReport {
        let n = replay.predictions.len();
        let correct = replay.predictions.iter().filter(|p| p.outcome).count();
        let cfg = &self.config;

        let auxiliary_calibration_error = (replay.auxiliary.len() >= cfg.min_interactions)
            .then(|| expected_calibration_error(&replay.auxiliary, cfg.bins))
            .flatten();

        let mut details = EvaluationDetails {
            interaction_count: n,
            student_count: replay.student_count,
            correct_count: correct,
            incorrect_count: n - correct,
            auxiliary_count: replay.auxiliary.len(),
            auxiliary_calibration_error,
            failed_checks: Vec::new(),
            reliability_bins: Vec::new(),
            reason: None,
        };

        let insufficient = if n < cfg.min_interactions {
            Some(format!("{n} interactions, need {}", cfg.min_interactions))
        } else if correct == 0 || correct == n {
            Some("only one outcome class present".to_string())
        } else {
            None
        };
        if let Some(reason) = insufficient {
            details.reason = Some(reason);
            return EvaluationReport {
                concept_id: concept_id.to_string(),
                start,
                end,
                next_step_auc: None,
                next_step_accuracy: None,
                brier_score: None,
                calibration_error: None,
                trajectory_validity: None,
                recommendation: Recommendation::InsufficientData,
                details,
            };
        }

        let next_step_auc = auc(&replay.predictions);
        let next_step_accuracy = accuracy(&replay.predictions);
        let brier = brier_score(&replay.predictions);
        let ece = expected_calibration_error(&replay.predictions, cfg.bins);
        let validity = trajectory_validity(&replay.steps);

        let checks = [
            ("auc", next_step_auc.map(|v| v >= cfg.min_auc)),
            ("accuracy", next_step_accuracy.map(|v| v >= cfg.min_accuracy)),
            ("brier_score", brier.map(|v| v <= cfg.max_brier)),
            ("calibration_error", ece.map(|v| v <= cfg.max_ece)),
            (
                "trajectory_validity",
                validity.map(|v| v >= cfg.min_trajectory_validity),
            ),
        ];
        details.failed_checks = checks
            .iter()
            .filter(|(_, ok)| *ok != Some(true))
            .map(|(name, _)| name.to_string())
            .collect();
        details.reliability_bins = reliability_bins(&replay.predictions, cfg.bins);

        let recommendation = if details.failed_checks.is_empty() {
            Recommendation::Pass
        } else {
            Recommendation::Fail
        };

        EvaluationReport {
            concept_id: concept_id.to_string(),
            start,
            end,
            next_step_auc,
            next_step_accuracy,
            brier_score: brier,
            calibration_error: ece,
            trajectory_validity: validity,
            recommendation,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kt::types::{AttemptContext, StateKey};
    use chrono::Duration;

    fn engine(min_interactions: usize) -> EvaluationEngine {
        EvaluationEngine::new(
            EvaluationConfig {
                min_interactions,
                ..Default::default()
            },
            ModulationConfig::default(),
            ConstraintConfig::default(),
            BktConfig::default(),
        )
    }

    fn attempts(student: &str, outcomes: &[bool]) -> Vec<Interaction> {
        let t0 = Utc::now();
        outcomes
            .iter()
            .enumerate()
            .map(|(i, &correct)| {
                Interaction::observed(
                    &StateKey::new(student, "c1"),
                    format!("q{i}"),
                    correct,
                    AttemptContext::default(),
                    t0 + Duration::minutes(i as i64),
                )
            })
            .collect()
    }

    #[test]
    fn replay_has_no_look_ahead() {
        let engine = engine(1);
        let concept = KnowledgeConcept::new("c1", 3, 3);
        let log = attempts("s1", &[true, false, true]);
        let full = engine.replay(&concept, ConceptParameters::default(), 0.5, &log);
        let prefix = engine.replay(&concept, ConceptParameters::default(), 0.5, &log[..2]);
        assert_eq!(full.predictions[..2], prefix.predictions[..]);
        assert!((full.predictions[0].p - 0.5 * 0.9 - 0.5 * 0.2).abs() < 1e-12);
    }

    #[test]
    fn logged_prior_seeds_the_first_attempt() {
        let engine = engine(1);
        let concept = KnowledgeConcept::new("c1", 3, 3);
        let mut log = attempts("s1", &[true]);
        log[0].prior_mastery = Some(1.0);
        let replay = engine.replay(&concept, ConceptParameters::default(), 0.5, &log);
        assert!((replay.predictions[0].p - 0.9).abs() < 1e-12);
    }

    #[test]
    fn students_are_replayed_independently() {
        let engine = engine(1);
        let concept = KnowledgeConcept::new("c1", 3, 3);
        let mut log = attempts("s1", &[true, true]);
        log.extend(attempts("s2", &[false]));
        log.sort_by_key(|it| it.timestamp);
        let replay = engine.replay(&concept, ConceptParameters::default(), 0.5, &log);
        assert_eq!(replay.student_count, 2);
        let s2_first = replay
            .steps
            .iter()
            .zip(&log)
            .find(|(_, it)| it.student_id == "s2")
            .map(|(step, _)| step.previous)
            .unwrap();
        assert_eq!(s2_first, 0.5);
    }

    #[test]
    fn too_few_interactions_are_insufficient() {
        let engine = engine(20);
        let concept = KnowledgeConcept::new("c1", 3, 3);
        let replay = engine.replay(
            &concept,
            ConceptParameters::default(),
            0.5,
            &attempts("s1", &[true, false, true]),
        );
        let report = engine.assess("c1", None, None, &replay);
        assert_eq!(report.recommendation, Recommendation::InsufficientData);
        assert_eq!(report.next_step_auc, None);
        assert_eq!(report.details.interaction_count, 3);
    }

    #[test]
    fn single_outcome_class_is_insufficient() {
        let engine = engine(2);
        let concept = KnowledgeConcept::new("c1", 3, 3);
        let replay = engine.replay(
            &concept,
            ConceptParameters::default(),
            0.5,
            &attempts("s1", &[true; 5]),
        );
        let report = engine.assess("c1", None, None, &replay);
        assert!(report.is_insufficient());
        assert!(report.details.reason.is_some());
    }

    #[test]
    fn sufficient_window_produces_metrics_and_verdict() {
        let engine = engine(4);
        let concept = KnowledgeConcept::new("c1", 3, 3);
        let log = attempts("s1", &[false, false, true, true, true, true, false, true]);
        let replay = engine.replay(&concept, ConceptParameters::default(), 0.3, &log);
        let report = engine.assess("c1", None, None, &replay);
        assert_ne!(report.recommendation, Recommendation::InsufficientData);
        assert!(report.next_step_auc.is_some());
        assert!(report.brier_score.is_some());
        assert_eq!(report.details.reliability_bins.len(), 10);
        let window = report.to_window(Utc::now());
        assert_eq!(window.interaction_count, 8);
    }
}
