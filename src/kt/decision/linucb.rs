use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::kt::config::{ArmScope, BanditConfig};
use crate::kt::decision::matrix::{
    cholesky_decompose, compute_quadratic_form, dot_product, has_invalid_values,
    rank1_update_matrix, sanitize_feature_vector, scaled_identity, solve_cholesky,
    vec_add_scaled,
};

pub const FEATURE_DIM: usize = 5;
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "uncertainty",
    "recency",
    "difficulty_distance",
    "time_cost",
    "bias",
];

/// Neutral time cost for items without an estimate.
const UNKNOWN_TIME_COST: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateQuestion {
    pub question_id: String,
    /// Item difficulty on a 0..=1 scale.
    pub difficulty: f64,
    #[serde(default)]
    pub expected_time_ms: Option<u64>,
}

/// Student-side inputs shared by every candidate in one request.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext {
    pub mastery: f64,
    pub hours_since_last_attempt: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArmScore {
    pub question_id: String,
    pub features: Vec<f64>,
    pub exploitation: f64,
    pub exploration: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionDebug {
    pub scores: Vec<ArmScore>,
    pub chosen: ArmScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub chosen_question_id: String,
    pub policy: String,
    pub debug: SelectionDebug,
}

/// Per-arm ridge statistics: `A = λI + Σ x xᵀ`, `b = Σ r x`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArmStats {
    a: Vec<f64>,
    b: Vec<f64>,
    d: usize,
    lambda: f64,
    update_count: u64,
}

impl ArmStats {
    pub fn new(d: usize, lambda: f64) -> Self {
        Self {
            a: scaled_identity(d, lambda),
            b: vec![0.0; d],
            d,
            lambda,
            update_count: 0,
        }
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Returns `(xᵀθ̂, √(xᵀA⁻¹x))`.
    pub fn estimate(&self, x: &[f64]) -> (f64, f64) {
        let l = cholesky_decompose(&self.a, self.d, self.lambda);
        let theta = solve_cholesky(&l, &self.b, self.d);
        let exploitation = dot_product(&theta, x);
        let exploration = compute_quadratic_form(&l, x, self.d).max(0.0).sqrt();
        (exploitation, exploration)
    }

    pub fn update(&mut self, x: &[f64], reward: f64) {
        rank1_update_matrix(&mut self.a, x, self.d);
        vec_add_scaled(&mut self.b, x, reward);
        self.update_count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArmKey {
    pub scope: String,
    pub question_id: String,
}

/// Disjoint LinUCB over candidate questions.
///
/// Arms live in an arena of individually locked cells: the map lock is only
/// taken to look up or insert a cell, feedback for different arms never
/// contends.
pub struct LinUcbPolicy {
    config: BanditConfig,
    arms: RwLock<HashMap<ArmKey, Arc<Mutex<ArmStats>>>>,
}

impl Default for LinUcbPolicy {
    fn default() -> Self {
        Self::new(BanditConfig::default())
    }
}

impl LinUcbPolicy {
    pub fn new(config: BanditConfig) -> Self {
        Self {
            config,
            arms: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.policy_name
    }

    pub fn arm_key(&self, student_id: &str, concept_id: &str, question_id: &str) -> ArmKey {
        let scope = match self.config.scope {
            ArmScope::Policy => String::new(),
            ArmScope::Student => student_id.to_string(),
            ArmScope::StudentConcept => format!("{student_id}/{concept_id}"),
        };
        ArmKey {
            scope,
            question_id: question_id.to_string(),
        }
    }

    pub fn build_features(&self, ctx: &SelectionContext, candidate: &CandidateQuestion) -> Vec<f64> {
        let mastery = ctx.mastery.clamp(0.0, 1.0);
        let recency = match ctx.hours_since_last_attempt {
            Some(hours) => 1.0 - (-hours.max(0.0) / self.config.recency_scale_hours).exp(),
            None => 1.0,
        };
        let time_cost = candidate
            .expected_time_ms
            .map(|t| (t as f64 / self.config.max_time_ms as f64).min(1.0))
            .unwrap_or(UNKNOWN_TIME_COST);

        let mut x = vec![
            (mastery - 0.5).abs(),
            recency,
            (candidate.difficulty.clamp(0.0, 1.0) - mastery).abs(),
            time_cost,
            1.0,
        ];
        sanitize_feature_vector(&mut x);
        x
    }

    fn score_arm(&self, key: &ArmKey, x: &[f64]) -> (f64, f64) {
        let cell = self.arms.read().get(key).cloned();
        match cell {
            Some(cell) => cell.lock().estimate(x),
            None => ArmStats::new(FEATURE_DIM, self.config.lambda).estimate(x),
        }
    }

    /// Highest UCB wins; ties go to the lexicographically lowest question id.
    pub fn select(
        &self,
        student_id: &str,
        concept_id: &str,
        ctx: &SelectionContext,
        candidates: &[CandidateQuestion],
    ) -> Option<SelectionDecision> {
        let scores: Vec<ArmScore> = candidates
            .iter()
            .map(|candidate| {
                let x = self.build_features(ctx, candidate);
                let key = self.arm_key(student_id, concept_id, &candidate.question_id);
                let (exploitation, exploration) = self.score_arm(&key, &x);
                ArmScore {
                    question_id: candidate.question_id.clone(),
                    features: x,
                    exploitation,
                    exploration,
                    score: exploitation + self.config.alpha * exploration,
                }
            })
            .collect();

        let chosen = scores
            .iter()
            .filter(|s| s.score.is_finite())
            .fold(None::<&ArmScore>, |best, s| match best {
                Some(b) if b.score > s.score => Some(b),
                Some(b) if b.score == s.score && b.question_id <= s.question_id => Some(b),
                _ => Some(s),
            })?
            .clone();

        Some(SelectionDecision {
            chosen_question_id: chosen.question_id.clone(),
            policy: self.config.policy_name.clone(),
            debug: SelectionDebug { scores, chosen },
        })
    }

    /// Applies `A += xxᵀ`, `b += r·x` to the chosen arm only.
    pub fn feedback(
        &self,
        student_id: &str,
        concept_id: &str,
        question_id: &str,
        features: &[f64],
        reward: f64,
    ) -> CoreResult<u64> {
        if features.len() != FEATURE_DIM {
            return Err(CoreError::validation(format!(
                "feature vector must have {FEATURE_DIM} entries, got {}",
                features.len()
            )));
        }
        if has_invalid_values(features) || !reward.is_finite() {
            return Err(CoreError::validation("features and reward must be finite"));
        }
        let mut x = features.to_vec();
        sanitize_feature_vector(&mut x);

        let key = self.arm_key(student_id, concept_id, question_id);
        let cell = self.arm_cell(key);
        let mut stats = cell.lock();
        stats.update(&x, reward);
        Ok(stats.update_count())
    }

    fn arm_cell(&self, key: ArmKey) -> Arc<Mutex<ArmStats>> {
        if let Some(cell) = self.arms.read().get(&key) {
            return Arc::clone(cell);
        }
        let mut arms = self.arms.write();
        Arc::clone(
            arms.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(ArmStats::new(FEATURE_DIM, self.config.lambda)))),
        )
    }

    pub fn arm_stats(&self, student_id: &str, concept_id: &str, question_id: &str) -> Option<ArmStats> {
        let key = self.arm_key(student_id, concept_id, question_id);
        let cell = self.arms.read().get(&key).cloned();
        cell.map(|c| c.lock().clone())
    }

    /// Copy of every arm, for durable storage between process restarts.
    pub fn snapshot(&self) -> Vec<(ArmKey, ArmStats)> {
        let cells: Vec<(ArmKey, Arc<Mutex<ArmStats>>)> = self
            .arms
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        let mut out: Vec<(ArmKey, ArmStats)> = cells
            .into_iter()
            .map(|(k, cell)| (k, cell.lock().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn restore(&self, arms: Vec<(ArmKey, ArmStats)>) {
        let mut map = self.arms.write();
        for (key, stats) in arms {
            let well_formed = stats.d == FEATURE_DIM
                && stats.a.len() == FEATURE_DIM * FEATURE_DIM
                && stats.b.len() == FEATURE_DIM;
            if well_formed && !has_invalid_values(&stats.a) && !has_invalid_values(&stats.b) {
                map.insert(key, Arc::new(Mutex::new(stats)));
            }
        }
    }
}
