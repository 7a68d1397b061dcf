use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// z-score for the 95% mastery interval.
const INTERVAL_Z: f64 = 1.96;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeConcept {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub topic_path: Vec<String>,
    /// Nominal difficulty on a 1..=5 scale.
    pub difficulty_level: u8,
    /// Nominal Bloom level on a 1..=6 scale.
    pub bloom_level: u8,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

impl KnowledgeConcept {
    pub fn new(id: impl Into<String>, difficulty_level: u8, bloom_level: u8) -> Self {
        Self {
            id: id.into(),
            subject: String::new(),
            topic_path: Vec::new(),
            difficulty_level,
            bloom_level,
            prerequisites: Vec::new(),
        }
    }
}

/// Per-concept BKT triple.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConceptParameters {
    pub learn_rate: f64,
    pub slip_rate: f64,
    pub guess_rate: f64,
}

impl ConceptParameters {
    pub const MAX_SLIP: f64 = 0.5;
    pub const MAX_GUESS: f64 = 0.5;

    pub fn new(learn_rate: f64, slip_rate: f64, guess_rate: f64) -> Self {
        Self {
            learn_rate,
            slip_rate,
            guess_rate,
        }
    }

    /// Storage-level range check applied on every parameter write.
    pub fn check_ranges(&self) -> Result<(), String> {
        let in_range = |v: f64, hi: f64| v.is_finite() && (0.0..=hi).contains(&v);
        if !in_range(self.learn_rate, 1.0) {
            return Err(format!("learn_rate {} outside [0, 1]", self.learn_rate));
        }
        if !in_range(self.slip_rate, Self::MAX_SLIP) {
            return Err(format!("slip_rate {} outside [0, 0.5]", self.slip_rate));
        }
        if !in_range(self.guess_rate, Self::MAX_GUESS) {
            return Err(format!("guess_rate {} outside [0, 0.5]", self.guess_rate));
        }
        Ok(())
    }
}

impl Default for ConceptParameters {
    fn default() -> Self {
        Self {
            learn_rate: 0.1,
            slip_rate: 0.1,
            guess_rate: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptParameterRecord {
    pub concept_id: String,
    pub params: ConceptParameters,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub student_id: String,
    pub concept_id: String,
}

impl StateKey {
    pub fn new(student_id: impl Into<String>, concept_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            concept_id: concept_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    /// Normal approximation around `mastery` with `observations` attempts
    /// of evidence; two pseudo-observations keep it wide for new keys.
    pub fn around(mastery: f64, observations: u64) -> Self {
        let m = mastery.clamp(0.0, 1.0);
        let half = INTERVAL_Z * (m * (1.0 - m) / (observations as f64 + 2.0)).sqrt();
        Self {
            lower: (m - half).clamp(0.0, 1.0),
            upper: (m + half).clamp(0.0, 1.0),
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudentConceptState {
    pub student_id: String,
    pub concept_id: String,
    pub mastery_probability: f64,
    pub confidence_interval: ConfidenceInterval,
    pub practice_count: u64,
    pub correct_count: u64,
    pub last_practiced_at: Option<DateTime<Utc>>,
    pub last_correct_at: Option<DateTime<Utc>>,
    pub last_incorrect_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// The attempt that produced the current mastery. A retried request
    /// carrying the same interaction id is answered from this record.
    #[serde(default)]
    pub last_interaction: Option<Interaction>,
}

impl StudentConceptState {
    pub fn new(key: &StateKey, prior: f64) -> Self {
        let prior = prior.clamp(0.0, 1.0);
        Self {
            student_id: key.student_id.clone(),
            concept_id: key.concept_id.clone(),
            mastery_probability: prior,
            confidence_interval: ConfidenceInterval::around(prior, 0),
            practice_count: 0,
            correct_count: 0,
            last_practiced_at: None,
            last_correct_at: None,
            last_incorrect_at: None,
            updated_at: None,
            last_interaction: None,
        }
    }

    pub fn key(&self) -> StateKey {
        StateKey::new(self.student_id.clone(), self.concept_id.clone())
    }

    /// Supersedes this state with the outcome of one observed attempt.
    /// Timestamps only move forward, so a late-arriving older attempt still
    /// counts but does not rewind recency.
    pub fn record_attempt(&mut self, new_mastery: f64, is_correct: bool, at: DateTime<Utc>) {
        self.mastery_probability = new_mastery.clamp(0.0, 1.0);
        self.practice_count += 1;
        if is_correct {
            self.correct_count += 1;
            self.last_correct_at = latest(self.last_correct_at, at);
        } else {
            self.last_incorrect_at = latest(self.last_incorrect_at, at);
        }
        self.last_practiced_at = latest(self.last_practiced_at, at);
        self.updated_at = latest(self.updated_at, at);
        self.confidence_interval =
            ConfidenceInterval::around(self.mastery_probability, self.practice_count);
    }

    pub fn success_rate(&self) -> f64 {
        if self.practice_count == 0 {
            return 0.0;
        }
        self.correct_count as f64 / self.practice_count as f64
    }
}

fn latest(prev: Option<DateTime<Utc>>, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(prev.map_or(at, |prev| prev.max(at)))
}

/// Optional per-attempt context consumed by the modulator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AttemptContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

impl AttemptContext {
    pub fn is_empty(&self) -> bool {
        self.difficulty_level.is_none()
            && self.bloom_level.is_none()
            && self.response_time_ms.is_none()
    }
}

/// One observed attempt plus what the update produced for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub interaction_id: Uuid,
    pub student_id: String,
    pub concept_id: String,
    pub question_id: String,
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "AttemptContext::is_empty")]
    pub context: AttemptContext,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub prior_mastery: Option<f64>,
    #[serde(default)]
    pub p_correct_pred: Option<f64>,
    #[serde(default)]
    pub new_mastery: Option<f64>,
    #[serde(default)]
    pub auxiliary_p: Option<f64>,
}

impl Interaction {
    pub fn observed(
        key: &StateKey,
        question_id: impl Into<String>,
        is_correct: bool,
        context: AttemptContext,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            interaction_id: Uuid::new_v4(),
            student_id: key.student_id.clone(),
            concept_id: key.concept_id.clone(),
            question_id: question_id.into(),
            is_correct,
            context,
            timestamp,
            prior_mastery: None,
            p_correct_pred: None,
            new_mastery: None,
            auxiliary_p: None,
        }
    }

    pub fn outcome(&self) -> f64 {
        if self.is_correct {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Pass,
    Fail,
    InsufficientData,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::InsufficientData => "INSUFFICIENT_DATA",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationWindow {
    pub concept_id: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub auc: Option<f64>,
    pub accuracy: Option<f64>,
    pub brier_score: Option<f64>,
    pub calibration_error: Option<f64>,
    pub trajectory_validity: Option<f64>,
    pub interaction_count: usize,
    pub recommendation: Recommendation,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_pass_range_check() {
        assert!(ConceptParameters::default().check_ranges().is_ok());
    }

    #[test]
    fn range_check_rejects_out_of_bounds() {
        assert!(ConceptParameters::new(1.2, 0.1, 0.1).check_ranges().is_err());
        assert!(ConceptParameters::new(0.2, 0.6, 0.1).check_ranges().is_err());
        assert!(ConceptParameters::new(0.2, 0.1, f64::NAN).check_ranges().is_err());
    }

    #[test]
    fn interval_narrows_with_evidence() {
        let early = ConfidenceInterval::around(0.5, 0);
        let late = ConfidenceInterval::around(0.5, 50);
        assert!(late.width() < early.width());
        assert!(early.lower >= 0.0 && early.upper <= 1.0);
    }

    #[test]
    fn record_attempt_updates_counters() {
        let key = StateKey::new("s1", "c1");
        let mut state = StudentConceptState::new(&key, 0.5);
        let at = Utc::now();
        state.record_attempt(0.7, true, at);
        state.record_attempt(0.6, false, at);
        assert_eq!(state.practice_count, 2);
        assert_eq!(state.correct_count, 1);
        assert_eq!(state.last_correct_at, Some(at));
        assert_eq!(state.last_incorrect_at, Some(at));
        assert!((state.success_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn late_attempt_does_not_rewind_timestamps() {
        let key = StateKey::new("s1", "c1");
        let mut state = StudentConceptState::new(&key, 0.5);
        let early = Utc::now();
        let late = early + chrono::Duration::hours(5);
        state.record_attempt(0.7, true, late);
        state.record_attempt(0.6, true, early);
        state.record_attempt(0.5, false, early);
        assert_eq!(state.practice_count, 3);
        assert_eq!(state.last_practiced_at, Some(late));
        assert_eq!(state.last_correct_at, Some(late));
        assert_eq!(state.last_incorrect_at, Some(early));
        assert_eq!(state.updated_at, Some(late));
    }

    #[test]
    fn empty_context_is_omitted_from_interactions() {
        let key = StateKey::new("s1", "c1");
        let plain = Interaction::observed(&key, "q1", true, AttemptContext::default(), Utc::now());
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("context").is_none());
        let back: Interaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, plain);

        let timed = AttemptContext {
            response_time_ms: Some(1200),
            ..Default::default()
        };
        let json = serde_json::to_value(Interaction::observed(&key, "q1", true, timed, Utc::now()))
            .unwrap();
        assert_eq!(json["context"]["response_time_ms"], 1200);
    }

    #[test]
    fn recommendation_serializes_screaming_case() {
        let json = serde_json::to_string(&Recommendation::InsufficientData).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_DATA\"");
    }
}
