use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub timeout_ms: u64,
    pub default_prior: f64,
    /// Initial mastery for students who have never practiced a concept.
    pub concept_priors: HashMap<String, f64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            default_prior: 0.5,
            concept_priors: HashMap::new(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn prior_for(&self, concept_id: &str) -> f64 {
        self.concept_priors
            .get(concept_id)
            .copied()
            .unwrap_or(self.default_prior)
    }
}

/// Accepted ranges for request-time context values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextLimits {
    pub min_difficulty: u8,
    pub max_difficulty: u8,
    pub min_bloom: u8,
    pub max_bloom: u8,
    pub max_response_time_ms: u64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            min_difficulty: 1,
            max_difficulty: 5,
            min_bloom: 1,
            max_bloom: 6,
            max_response_time_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DifficultyEffect {
    pub enabled: bool,
    pub slip_sensitivity: f64,
    pub guess_sensitivity: f64,
}

impl Default for DifficultyEffect {
    fn default() -> Self {
        Self {
            enabled: true,
            slip_sensitivity: 0.3,
            guess_sensitivity: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BloomEffect {
    pub enabled: bool,
    pub slip_relief: f64,
}

impl Default for BloomEffect {
    fn default() -> Self {
        Self {
            enabled: true,
            slip_relief: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponseTimeEffect {
    pub enabled: bool,
    pub fast_threshold_ms: u64,
    pub fast_guess_boost: f64,
    pub slow_threshold_ms: u64,
    pub slow_learn_penalty: f64,
}

impl Default for ResponseTimeEffect {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_threshold_ms: 1_500,
            fast_guess_boost: 0.5,
            slow_threshold_ms: 60_000,
            slow_learn_penalty: 0.3,
        }
    }
}

/// Every recognised context dimension and its bounded effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModulationConfig {
    pub difficulty: DifficultyEffect,
    pub bloom: BloomEffect,
    pub response_time: ResponseTimeEffect,
    /// Relative deviation allowed from each base parameter.
    pub max_deviation: f64,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            difficulty: DifficultyEffect::default(),
            bloom: BloomEffect::default(),
            response_time: ResponseTimeEffect::default(),
            max_deviation: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConstraintConfig {
    pub max_slip: f64,
    pub max_guess: f64,
    pub identifiability_margin: f64,
    /// Required gap between P(correct | mastered) and P(correct | unmastered).
    pub min_discrimination: f64,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            max_slip: 0.5,
            max_guess: 0.5,
            identifiability_margin: 1e-6,
            min_discrimination: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BktConfig {
    pub epsilon: f64,
}

impl Default for BktConfig {
    fn default() -> Self {
        Self { epsilon: 1e-9 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleMode {
    #[default]
    BktOnly,
    BktWithAuxiliary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnsembleConfig {
    pub mode: EnsembleMode,
    pub base_weight: f64,
    pub max_weight: f64,
    pub ece_threshold: f64,
    /// ECE at which the auxiliary weight reaches zero.
    pub ece_cutoff: f64,
    pub history_limit: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            mode: EnsembleMode::BktOnly,
            base_weight: 0.3,
            max_weight: 0.5,
            ece_threshold: 0.1,
            ece_cutoff: 0.2,
            history_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmScope {
    #[default]
    Policy,
    Student,
    StudentConcept,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BanditConfig {
    pub policy_name: String,
    pub alpha: f64,
    pub lambda: f64,
    pub scope: ArmScope,
    pub recency_scale_hours: f64,
    pub max_time_ms: u64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            policy_name: "linucb".to_string(),
            alpha: 0.5,
            lambda: 1.0,
            scope: ArmScope::Policy,
            recency_scale_hours: 24.0,
            max_time_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HlrWeights {
    pub bias: f64,
    pub elapsed_days: f64,
    pub success_rate: f64,
    pub sqrt_practice_count: f64,
}

impl Default for HlrWeights {
    fn default() -> Self {
        Self {
            bias: 1.0,
            elapsed_days: 0.05,
            success_rate: 2.0,
            sqrt_practice_count: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpacingConfig {
    pub target_recall: f64,
    pub weights: HlrWeights,
    pub min_interval_hours: f64,
    pub max_interval_days: f64,
    pub min_log2_half_life: f64,
    pub max_log2_half_life: f64,
}

impl Default for SpacingConfig {
    fn default() -> Self {
        Self {
            target_recall: 0.85,
            weights: HlrWeights::default(),
            min_interval_hours: 1.0,
            max_interval_days: 365.0,
            min_log2_half_life: -4.0,
            max_log2_half_life: 12.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationConfig {
    pub bins: usize,
    pub min_interactions: usize,
    pub min_auc: f64,
    pub min_accuracy: f64,
    pub max_brier: f64,
    pub max_ece: f64,
    pub min_trajectory_validity: f64,
    pub persist_windows: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            bins: 10,
            min_interactions: 20,
            min_auc: 0.6,
            min_accuracy: 0.6,
            max_brier: 0.25,
            max_ece: 0.1,
            min_trajectory_validity: 0.7,
            persist_windows: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub store: StoreConfig,
    pub context_limits: ContextLimits,
    pub modulation: ModulationConfig,
    pub constraints: ConstraintConfig,
    pub bkt: BktConfig,
    pub ensemble: EnsembleConfig,
    pub bandit: BanditConfig,
    pub spacing: SpacingConfig,
    pub evaluation: EvaluationConfig,
}

impl CoreConfig {
    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| CoreError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Defaults, then `KT_CONFIG_PATH` if set, then `KT_*` overrides.
    pub fn load() -> CoreResult<Self> {
        let mut config = match std::env::var("KT_CONFIG_PATH") {
            Ok(path) if !path.is_empty() => Self::from_path(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("KT_ENSEMBLE_ENABLED") {
            self.ensemble.mode = if parse_env::<bool>("KT_ENSEMBLE_ENABLED", &val)? {
                EnsembleMode::BktWithAuxiliary
            } else {
                EnsembleMode::BktOnly
            };
        }
        if let Some(val) = lookup("KT_BANDIT_ALPHA") {
            self.bandit.alpha = parse_env("KT_BANDIT_ALPHA", &val)?;
        }
        if let Some(val) = lookup("KT_STORE_TIMEOUT_MS") {
            self.store.timeout_ms = parse_env("KT_STORE_TIMEOUT_MS", &val)?;
        }
        if let Some(val) = lookup("KT_TARGET_RECALL") {
            self.spacing.target_recall = parse_env("KT_TARGET_RECALL", &val)?;
        }
        if let Some(val) = lookup("KT_EVAL_MIN_INTERACTIONS") {
            self.evaluation.min_interactions = parse_env("KT_EVAL_MIN_INTERACTIONS", &val)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        let unit = |name: &str, v: f64| -> CoreResult<()> {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(CoreError::Config(format!("{name} must lie in [0, 1], got {v}")))
            }
        };
        let non_negative = |name: &str, v: f64| -> CoreResult<()> {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(CoreError::Config(format!("{name} must be >= 0, got {v}")))
            }
        };

        if self.store.timeout_ms == 0 {
            return Err(CoreError::Config("store.timeout_ms must be > 0".into()));
        }
        unit("store.default_prior", self.store.default_prior)?;
        for (concept, prior) in &self.store.concept_priors {
            unit(&format!("store.concept_priors.{concept}"), *prior)?;
        }

        let limits = &self.context_limits;
        if limits.min_difficulty > limits.max_difficulty || limits.min_bloom > limits.max_bloom {
            return Err(CoreError::Config("context_limits min exceeds max".into()));
        }

        let m = &self.modulation;
        non_negative("modulation.max_deviation", m.max_deviation)?;
        unit("modulation.difficulty.slip_sensitivity", m.difficulty.slip_sensitivity)?;
        unit("modulation.difficulty.guess_sensitivity", m.difficulty.guess_sensitivity)?;
        unit("modulation.bloom.slip_relief", m.bloom.slip_relief)?;
        non_negative("modulation.response_time.fast_guess_boost", m.response_time.fast_guess_boost)?;
        unit("modulation.response_time.slow_learn_penalty", m.response_time.slow_learn_penalty)?;
        if m.response_time.slow_threshold_ms == 0 {
            return Err(CoreError::Config(
                "modulation.response_time.slow_threshold_ms must be > 0".into(),
            ));
        }

        let c = &self.constraints;
        if !(c.max_slip > 0.0 && c.max_slip <= 0.5) || !(c.max_guess > 0.0 && c.max_guess <= 0.5) {
            return Err(CoreError::Config(
                "constraints.max_slip and max_guess must lie in (0, 0.5]".into(),
            ));
        }
        if !(c.identifiability_margin > 0.0 && c.identifiability_margin < 0.5) {
            return Err(CoreError::Config(
                "constraints.identifiability_margin must lie in (0, 0.5)".into(),
            ));
        }
        if !(c.min_discrimination >= c.identifiability_margin && c.min_discrimination < 1.0) {
            return Err(CoreError::Config(
                "constraints.min_discrimination must lie in [identifiability_margin, 1)".into(),
            ));
        }

        if !(self.bkt.epsilon > 0.0 && self.bkt.epsilon < 1e-3) {
            return Err(CoreError::Config("bkt.epsilon must lie in (0, 1e-3)".into()));
        }

        let e = &self.ensemble;
        if !(0.0..=0.5).contains(&e.max_weight) {
            return Err(CoreError::Config("ensemble.max_weight must lie in [0, 0.5]".into()));
        }
        unit("ensemble.base_weight", e.base_weight)?;
        if !(e.ece_cutoff > e.ece_threshold && e.ece_threshold >= 0.0) {
            return Err(CoreError::Config(
                "ensemble.ece_cutoff must exceed ece_threshold".into(),
            ));
        }

        let b = &self.bandit;
        if b.policy_name.trim().is_empty() {
            return Err(CoreError::Config("bandit.policy_name must not be empty".into()));
        }
        non_negative("bandit.alpha", b.alpha)?;
        if !(b.lambda > 0.0 && b.lambda.is_finite()) {
            return Err(CoreError::Config("bandit.lambda must be > 0".into()));
        }
        if !(b.recency_scale_hours > 0.0) || b.max_time_ms == 0 {
            return Err(CoreError::Config(
                "bandit.recency_scale_hours and max_time_ms must be > 0".into(),
            ));
        }

        let s = &self.spacing;
        if !(s.target_recall > 0.0 && s.target_recall < 1.0) {
            return Err(CoreError::Config("spacing.target_recall must lie in (0, 1)".into()));
        }
        if !(s.min_interval_hours > 0.0) || s.max_interval_days * 24.0 < s.min_interval_hours {
            return Err(CoreError::Config(
                "spacing interval bounds must be positive and ordered".into(),
            ));
        }
        if s.min_log2_half_life >= s.max_log2_half_life {
            return Err(CoreError::Config("spacing half-life exponent bounds are inverted".into()));
        }

        let ev = &self.evaluation;
        if ev.bins == 0 || ev.bins > 100 {
            return Err(CoreError::Config("evaluation.bins must lie in [1, 100]".into()));
        }
        unit("evaluation.min_auc", ev.min_auc)?;
        unit("evaluation.min_accuracy", ev.min_accuracy)?;
        unit("evaluation.max_brier", ev.max_brier)?;
        unit("evaluation.max_ece", ev.max_ece)?;
        unit("evaluation.min_trajectory_validity", ev.min_trajectory_validity)?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> CoreResult<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| CoreError::Config(format!("{key}: cannot parse {raw:?}")))
}
