use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::kt::config::CoreConfig;
use crate::kt::decision::{
    AuxiliaryPredictor, CandidateQuestion, EnsembleGate, EnsembleOutput, LinUcbPolicy,
    SelectionContext, SelectionDebug, SelectionDecision,
};
use crate::kt::evaluation::metrics::reliability_bins;
use crate::kt::evaluation::{EvaluationEngine, EvaluationReport, ReliabilityBin, Replay};
use crate::kt::memory::{ReviewSchedule, SpacingScheduler};
use crate::kt::metrics::{ComponentId, ComponentRegistry, ComponentStatus};
use crate::kt::modeling::{
    Adjustment, BktOutcome, BktUpdateEngine, ConstraintValidator, ConstraintViolation,
    ContextualModulator,
};
use crate::kt::types::{
    AttemptContext, ConceptParameters, ConfidenceInterval, Interaction, StateKey,
    StudentConceptState,
};
use crate::store::{
    bounded, Clock, EvaluationWindowStore, InteractionLog, ParameterStore, StateBackend,
};
use crate::track_component;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub student_id: String,
    pub concept_id: String,
    pub question_id: String,
    pub is_correct: bool,
    #[serde(default)]
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub difficulty_level: Option<u8>,
    #[serde(default)]
    pub bloom_level: Option<u8>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    /// Idempotency key. A request repeating the id of the attempt that last
    /// updated this (student, concept) returns that result again.
    #[serde(default)]
    pub interaction_id: Option<Uuid>,
}

impl UpdateRequest {
    pub fn new(
        student_id: impl Into<String>,
        concept_id: impl Into<String>,
        question_id: impl Into<String>,
        is_correct: bool,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            concept_id: concept_id.into(),
            question_id: question_id.into(),
            is_correct,
            response_time_ms: None,
            difficulty_level: None,
            bloom_level: None,
            occurred_at: None,
            interaction_id: None,
        }
    }

    fn context(&self) -> AttemptContext {
        AttemptContext {
            difficulty_level: self.difficulty_level,
            bloom_level: self.bloom_level,
            response_time_ms: self.response_time_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub interaction_id: Uuid,
    pub student_id: String,
    pub concept_id: String,
    pub previous_mastery: f64,
    pub posterior_mastery: f64,
    pub new_mastery: f64,
    pub p_correct_pred: f64,
    pub adjusted_params: ConceptParameters,
    pub adjustments: Vec<Adjustment>,
    pub constraint_violations: Vec<ConstraintViolation>,
    pub explanation: String,
    pub confidence_interval: ConfidenceInterval,
    pub practice_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensemble: Option<EnsembleOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub student_id: String,
    pub concept_id: String,
    pub question_id: String,
    pub policy: String,
    pub score: f64,
    pub reward: f64,
    pub features: Vec<f64>,
    #[serde(default)]
    pub debug: Option<SelectionDebug>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackAck {
    pub question_id: String,
    pub policy: String,
    pub update_count: u64,
}

/// Wires the tracing components to their collaborators.
///
/// Updates for one (student, concept) key are serialized through the
/// parameter store's keyed locks; everything else runs without a global lock.
pub struct KnowledgeTracingEngine {
    config: CoreConfig,
    store: ParameterStore,
    log: Arc<dyn InteractionLog>,
    windows: Arc<dyn EvaluationWindowStore>,
    clock: Arc<dyn Clock>,
    modulator: ContextualModulator,
    validator: ConstraintValidator,
    bkt: BktUpdateEngine,
    ensemble: EnsembleGate,
    policy: LinUcbPolicy,
    scheduler: SpacingScheduler,
    evaluator: EvaluationEngine,
    metrics: ComponentRegistry,
}

impl KnowledgeTracingEngine {
    pub fn new(
        config: CoreConfig,
        backend: Arc<dyn StateBackend>,
        log: Arc<dyn InteractionLog>,
        windows: Arc<dyn EvaluationWindowStore>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            store: ParameterStore::new(backend, config.store.clone()),
            log,
            windows,
            clock,
            modulator: ContextualModulator::new(config.modulation.clone()),
            validator: ConstraintValidator::new(config.constraints.clone()),
            bkt: BktUpdateEngine::new(config.bkt.clone()),
            ensemble: EnsembleGate::new(config.ensemble.clone(), None),
            policy: LinUcbPolicy::new(config.bandit.clone()),
            scheduler: SpacingScheduler::new(config.spacing.clone()),
            evaluator: EvaluationEngine::new(
                config.evaluation.clone(),
                config.modulation.clone(),
                config.constraints.clone(),
                config.bkt.clone(),
            ),
            metrics: ComponentRegistry::new(),
            config,
        })
    }

    pub fn with_auxiliary(mut self, predictor: Arc<dyn AuxiliaryPredictor>) -> Self {
        self.ensemble = EnsembleGate::new(self.config.ensemble.clone(), Some(predictor));
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn policy(&self) -> &LinUcbPolicy {
        &self.policy
    }

    pub fn ensemble(&self) -> &EnsembleGate {
        &self.ensemble
    }

    /// Applies one observed attempt.
    ///
    /// With a blend active, `p_correct_pred` and `new_mastery` in the
    /// response carry the blended values; the persisted mastery and the
    /// logged interaction stay pure BKT so replays reproduce them.
    pub async fn update(&self, req: UpdateRequest) -> CoreResult<UpdateResponse> {
        self.validate_update(&req)?;
        let key = StateKey::new(req.student_id.clone(), req.concept_id.clone());
        let _guard = self.store.lock_state(&key).await;

        let concept = self
            .tracked(ComponentId::ParameterStore, self.store.get_concept(&key.concept_id))
            .await?;
        let base = self
            .tracked(ComponentId::ParameterStore, self.store.get_params(&key.concept_id))
            .await?;
        let mut state = self
            .tracked(ComponentId::ParameterStore, self.store.get_state(&key))
            .await?;

        let repeated = repeated_attempt(&req, &state)?;
        let prior = repeated
            .as_ref()
            .and_then(|it| it.prior_mastery)
            .unwrap_or(state.mastery_probability);
        let context = repeated.as_ref().map_or_else(|| req.context(), |it| it.context);

        let modulated = track_component!(
            self.metrics,
            ComponentId::Modulator,
            self.modulator.modulate(base, &concept, &context)
        );
        let projected = track_component!(
            self.metrics,
            ComponentId::Constraints,
            self.validator.project(modulated.params)
        );
        let outcome = track_component!(
            self.metrics,
            ComponentId::Bkt,
            self.bkt.update(prior, &projected, req.is_correct)
        );

        let is_repeat = repeated.is_some();
        let mut interaction = match repeated {
            Some(it) => it,
            None => {
                let at = req.occurred_at.unwrap_or_else(|| self.clock.now());
                let mut it =
                    Interaction::observed(&key, req.question_id.clone(), req.is_correct, context, at);
                if let Some(id) = req.interaction_id {
                    it.interaction_id = id;
                }
                it.prior_mastery = Some(outcome.previous_mastery);
                it.p_correct_pred = Some(outcome.p_correct_pred);
                it.new_mastery = Some(outcome.new_mastery);
                it
            }
        };
        let ensemble = self.blend(&key, &outcome, &interaction).await;

        if is_repeat {
            tracing::info!(
                student_id = %key.student_id,
                concept_id = %key.concept_id,
                interaction_id = %interaction.interaction_id,
                "repeated attempt, state left as recorded"
            );
        } else {
            interaction.auxiliary_p = ensemble.as_ref().map(|e| e.auxiliary_p);
            state.record_attempt(outcome.new_mastery, req.is_correct, interaction.timestamp);
            state.last_interaction = Some(interaction.clone());
            self.tracked(ComponentId::ParameterStore, self.store.put_state(state.clone()))
                .await?;
        }

        let interaction_id = interaction.interaction_id;
        let logged =
            bounded("append_interaction", self.store.timeout(), self.log.append(interaction)).await;
        if let Err(err) = logged {
            // Without a caller-supplied id a blind retry would apply the attempt twice.
            return Err(match (req.interaction_id, err) {
                (None, CoreError::Transient { reason, .. }) => CoreError::Unlogged {
                    interaction_id,
                    reason,
                },
                (_, err) => err,
            });
        }

        if !modulated.clamped.is_empty() || !outcome.violations.is_empty() {
            tracing::debug!(
                student_id = %key.student_id,
                concept_id = %key.concept_id,
                clamped = ?modulated.clamped,
                violations = ?outcome.violations,
                "parameters adjusted before update"
            );
        }
        tracing::debug!(
            student_id = %key.student_id,
            concept_id = %key.concept_id,
            previous = outcome.previous_mastery,
            new = outcome.new_mastery,
            "mastery updated"
        );

        let (p_correct_pred, new_mastery) = ensemble.as_ref().map_or(
            (outcome.p_correct_pred, outcome.new_mastery),
            |e| (e.blended_p_correct, e.blended_mastery),
        );
        Ok(UpdateResponse {
            interaction_id,
            student_id: key.student_id,
            concept_id: key.concept_id,
            previous_mastery: outcome.previous_mastery,
            posterior_mastery: outcome.posterior_mastery,
            new_mastery,
            p_correct_pred,
            adjusted_params: outcome.params,
            explanation: explain(req.is_correct, &outcome, &modulated.adjustments, ensemble.as_ref()),
            adjustments: modulated.adjustments,
            constraint_violations: outcome.violations,
            confidence_interval: state.confidence_interval,
            practice_count: state.practice_count,
            ensemble,
        })
    }

    async fn blend(
        &self,
        key: &StateKey,
        outcome: &BktOutcome,
        attempt: &Interaction,
    ) -> Option<EnsembleOutput> {
        if !self.ensemble.is_active() {
            return None;
        }
        let mut history = match bounded(
            "recent_interactions",
            self.store.timeout(),
            self.log
                .recent_for_student(&key.student_id, self.ensemble.history_limit()),
        )
        .await
        {
            Ok(history) => history,
            Err(err) => {
                self.metrics.record_error(ComponentId::Ensemble);
                tracing::warn!(error = %err, "auxiliary history unavailable, using BKT only");
                return None;
            }
        };
        history.retain(|it| it.interaction_id != attempt.interaction_id);
        track_component!(
            self.metrics,
            ComponentId::Ensemble,
            self.ensemble.blend(&key.concept_id, outcome, &history, attempt)
        )
    }

    pub async fn evaluate(
        &self,
        concept_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> CoreResult<EvaluationReport> {
        require_id("concept_id", concept_id)?;
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Err(CoreError::validation("evaluation window start must precede end"));
            }
        }

        let started = Instant::now();
        let replay = self.replay_concept(concept_id, start, end).await?;
        let report = self.evaluator.assess(concept_id, start, end, &replay);
        self.metrics
            .record(ComponentId::Evaluation, elapsed_us(started));

        if let Some(ece) = report.details.auxiliary_calibration_error {
            self.ensemble.record_auxiliary_calibration(concept_id, ece);
        }

        if self.evaluator.config().persist_windows && !report.is_insufficient() {
            let window = report.to_window(self.clock.now());
            bounded("append_window", self.store.timeout(), self.windows.append(window)).await?;
        }

        tracing::info!(
            concept_id,
            interactions = report.details.interaction_count,
            recommendation = report.recommendation.as_str(),
            "evaluation window computed"
        );
        Ok(report)
    }

    pub async fn calibration(&self, concept_id: &str, bins: usize) -> CoreResult<Vec<ReliabilityBin>> {
        require_id("concept_id", concept_id)?;
        if bins == 0 || bins > 100 {
            return Err(CoreError::validation(format!("bins must lie in [1, 100], got {bins}")));
        }
        let replay = self.replay_concept(concept_id, None, None).await?;
        Ok(reliability_bins(&replay.predictions, bins))
    }

    async fn replay_concept(
        &self,
        concept_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> CoreResult<Replay> {
        let concept = self
            .tracked(ComponentId::ParameterStore, self.store.get_concept(concept_id))
            .await?;
        let base = self
            .tracked(ComponentId::ParameterStore, self.store.get_params(concept_id))
            .await?;
        let mut interactions = bounded(
            "read_interactions",
            self.store.timeout(),
            self.log.read_concept(concept_id, start, end),
        )
        .await?;
        interactions.sort_by_key(|it| it.timestamp);
        Ok(self.evaluator.replay(
            &concept,
            base,
            self.store.prior_for(concept_id),
            &interactions,
        ))
    }

    pub async fn select(
        &self,
        student_id: &str,
        concept_id: &str,
        candidates: &[CandidateQuestion],
    ) -> CoreResult<SelectionDecision> {
        require_id("student_id", student_id)?;
        require_id("concept_id", concept_id)?;
        validate_candidates(candidates)?;

        let key = StateKey::new(student_id, concept_id);
        self.tracked(ComponentId::ParameterStore, self.store.get_concept(concept_id))
            .await?;
        let state = self
            .tracked(ComponentId::ParameterStore, self.store.get_state(&key))
            .await?;

        let now = self.clock.now();
        let ctx = SelectionContext {
            mastery: state.mastery_probability,
            hours_since_last_attempt: state
                .last_practiced_at
                .map(|at| (now - at).num_milliseconds().max(0) as f64 / 3_600_000.0),
        };
        let decision = track_component!(
            self.metrics,
            ComponentId::Selection,
            self.policy.select(student_id, concept_id, &ctx, candidates)
        );
        let decision =
            decision.ok_or_else(|| CoreError::validation("no candidate produced a finite score"))?;

        tracing::debug!(
            student_id,
            concept_id,
            chosen = %decision.chosen_question_id,
            score = decision.debug.chosen.score,
            "question selected"
        );
        Ok(decision)
    }

    pub async fn feedback(&self, req: FeedbackRequest) -> CoreResult<FeedbackAck> {
        require_id("student_id", &req.student_id)?;
        require_id("concept_id", &req.concept_id)?;
        require_id("question_id", &req.question_id)?;
        if req.policy != self.policy.name() {
            return Err(CoreError::validation(format!("unknown policy {:?}", req.policy)));
        }
        if !req.score.is_finite() {
            return Err(CoreError::validation("score must be finite"));
        }

        let result = track_component!(
            self.metrics,
            ComponentId::Selection,
            self.policy.feedback(
                &req.student_id,
                &req.concept_id,
                &req.question_id,
                &req.features,
                req.reward,
            )
        );
        let update_count = result.map_err(|err| {
            self.metrics.record_error(ComponentId::Selection);
            err
        })?;

        Ok(FeedbackAck {
            question_id: req.question_id,
            policy: req.policy,
            update_count,
        })
    }

    pub async fn schedule_review(&self, student_id: &str, concept_id: &str) -> CoreResult<ReviewSchedule> {
        require_id("student_id", student_id)?;
        require_id("concept_id", concept_id)?;
        self.tracked(ComponentId::ParameterStore, self.store.get_concept(concept_id))
            .await?;
        let state = self
            .tracked(
                ComponentId::ParameterStore,
                self.store.get_state(&StateKey::new(student_id, concept_id)),
            )
            .await?;
        Ok(track_component!(
            self.metrics,
            ComponentId::Spacing,
            self.scheduler.schedule(&state, self.clock.now())
        ))
    }

    pub fn component_status(&self) -> Vec<ComponentStatus> {
        self.metrics.snapshot()
    }

    async fn tracked<T, F>(&self, id: ComponentId, call: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        let started = Instant::now();
        let result = call.await;
        self.metrics.record(id, elapsed_us(started));
        if result.is_err() {
            self.metrics.record_error(id);
        }
        result
    }

    fn validate_update(&self, req: &UpdateRequest) -> CoreResult<()> {
        require_id("student_id", &req.student_id)?;
        require_id("concept_id", &req.concept_id)?;
        require_id("question_id", &req.question_id)?;

        let limits = &self.config.context_limits;
        if let Some(d) = req.difficulty_level {
            if !(limits.min_difficulty..=limits.max_difficulty).contains(&d) {
                return Err(CoreError::validation(format!(
                    "difficulty_level {d} outside [{}, {}]",
                    limits.min_difficulty, limits.max_difficulty
                )));
            }
        }
        if let Some(b) = req.bloom_level {
            if !(limits.min_bloom..=limits.max_bloom).contains(&b) {
                return Err(CoreError::validation(format!(
                    "bloom_level {b} outside [{}, {}]",
                    limits.min_bloom, limits.max_bloom
                )));
            }
        }
        if let Some(rt) = req.response_time_ms {
            if rt > limits.max_response_time_ms {
                return Err(CoreError::validation(format!(
                    "response_time_ms {rt} exceeds {}",
                    limits.max_response_time_ms
                )));
            }
        }
        Ok(())
    }
}

fn elapsed_us(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// The recorded attempt this request repeats, if its id matches the one
/// that last updated the state.
fn repeated_attempt(
    req: &UpdateRequest,
    state: &StudentConceptState,
) -> CoreResult<Option<Interaction>> {
    let (Some(id), Some(last)) = (req.interaction_id, state.last_interaction.as_ref()) else {
        return Ok(None);
    };
    if last.interaction_id != id {
        return Ok(None);
    }
    if last.question_id != req.question_id || last.is_correct != req.is_correct {
        return Err(CoreError::validation(format!(
            "interaction {id} was already recorded for a different attempt"
        )));
    }
    Ok(Some(last.clone()))
}

fn require_id(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_candidates(candidates: &[CandidateQuestion]) -> CoreResult<()> {
    if candidates.is_empty() {
        return Err(CoreError::validation("at least one candidate is required"));
    }
    let mut seen = HashSet::new();
    for c in candidates {
        require_id("question_id", &c.question_id)?;
        if !seen.insert(c.question_id.as_str()) {
            return Err(CoreError::validation(format!(
                "duplicate candidate {}",
                c.question_id
            )));
        }
        if !(c.difficulty.is_finite() && (0.0..=1.0).contains(&c.difficulty)) {
            return Err(CoreError::validation(format!(
                "candidate {} difficulty {} outside [0, 1]",
                c.question_id, c.difficulty
            )));
        }
    }
    Ok(())
}

fn explain(
    is_correct: bool,
    outcome: &BktOutcome,
    adjustments: &[Adjustment],
    ensemble: Option<&EnsembleOutput>,
) -> String {
    let mut text = format!(
        "{} answer: mastery {:.3} -> {:.3} (predicted p_correct {:.3})",
        if is_correct { "correct" } else { "incorrect" },
        outcome.previous_mastery,
        outcome.new_mastery,
        outcome.p_correct_pred,
    );
    if !adjustments.is_empty() {
        let parts: Vec<String> = adjustments
            .iter()
            .map(|a| format!("{:?} {:?} x{:.3}", a.dimension, a.parameter, a.factor))
            .collect();
        text.push_str("; context: ");
        text.push_str(&parts.join(", "));
    }
    if !outcome.violations.is_empty() {
        let tags: Vec<&str> = outcome.violations.iter().map(|v| v.as_str()).collect();
        text.push_str("; projected: ");
        text.push_str(&tags.join(", "));
    }
    if let Some(e) = ensemble {
        text.push_str(&format!(
            "; {} weight {:.2} gives p_correct {:.3}",
            e.model, e.weight, e.blended_p_correct
        ));
    }
    text
}
