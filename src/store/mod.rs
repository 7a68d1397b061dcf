//! Collaborator interfaces and the parameter store built on them.
//!
//! The core never talks to a database directly: state, the interaction log
//! and evaluation windows all sit behind async traits. Every call is bounded
//! by the configured store timeout and surfaces failures as retryable
//! `CoreError::Transient`.

pub mod clock;
pub mod locks;
pub mod memory;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::error::{CoreError, CoreResult, StoreError};
use crate::kt::config::StoreConfig;
use crate::kt::types::{
    ConceptParameterRecord, ConceptParameters, EvaluationWindow, Interaction, KnowledgeConcept,
    StateKey, StudentConceptState,
};

pub use clock::{Clock, ManualClock, SystemClock};
pub use locks::KeyedLocks;
pub use memory::{MemoryBackend, MemoryInteractionLog, MemoryWindowStore};

#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn get_concept(&self, concept_id: &str) -> Result<Option<KnowledgeConcept>, StoreError>;

    async fn get_params(&self, concept_id: &str)
        -> Result<Option<ConceptParameterRecord>, StoreError>;

    async fn put_params(&self, record: ConceptParameterRecord) -> Result<(), StoreError>;

    async fn get_state(&self, key: &StateKey) -> Result<Option<StudentConceptState>, StoreError>;

    async fn put_state(&self, state: StudentConceptState) -> Result<(), StoreError>;
}

#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Appending an interaction whose id is already present is a no-op.
    async fn append(&self, interaction: Interaction) -> Result<(), StoreError>;

    /// Interactions for a concept in `[start, end)`, ordered by timestamp.
    async fn read_concept(
        &self,
        concept_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Interaction>, StoreError>;

    /// The student's latest `limit` interactions across all concepts, oldest first.
    async fn recent_for_student(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, StoreError>;
}

#[async_trait]
pub trait EvaluationWindowStore: Send + Sync {
    async fn append(&self, window: EvaluationWindow) -> Result<(), StoreError>;

    async fn list(&self, concept_id: &str) -> Result<Vec<EvaluationWindow>, StoreError>;
}

/// Runs a collaborator call under `limit`, mapping failures to `Transient`.
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> CoreResult<T>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let err = match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(err)) => err,
        Err(_) => StoreError::Timeout(limit),
    };
    tracing::warn!(operation, error = %err, "collaborator call failed");
    Err(CoreError::transient(operation, err))
}

/// Sole owner of concept parameters and student-concept state persistence.
pub struct ParameterStore {
    backend: Arc<dyn StateBackend>,
    locks: KeyedLocks<StateKey>,
    config: StoreConfig,
}

impl ParameterStore {
    pub fn new(backend: Arc<dyn StateBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn prior_for(&self, concept_id: &str) -> f64 {
        self.config.prior_for(concept_id)
    }

    pub async fn get_concept(&self, concept_id: &str) -> CoreResult<KnowledgeConcept> {
        bounded("get_concept", self.timeout(), self.backend.get_concept(concept_id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("concept {concept_id}")))
    }

    /// Base parameters; concepts without a stored record use the defaults.
    pub async fn get_params(&self, concept_id: &str) -> CoreResult<ConceptParameters> {
        let record = bounded("get_params", self.timeout(), self.backend.get_params(concept_id)).await?;
        match record {
            Some(record) => Ok(record.params),
            None => {
                self.get_concept(concept_id).await?;
                Ok(ConceptParameters::default())
            }
        }
    }

    pub async fn put_params(
        &self,
        concept_id: &str,
        params: ConceptParameters,
        updated_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        params.check_ranges().map_err(CoreError::Validation)?;
        self.get_concept(concept_id).await?;
        let record = ConceptParameterRecord {
            concept_id: concept_id.to_string(),
            params,
            updated_at,
        };
        bounded("put_params", self.timeout(), self.backend.put_params(record)).await
    }

    /// Stored state, or a fresh one seeded with the concept prior.
    pub async fn get_state(&self, key: &StateKey) -> CoreResult<StudentConceptState> {
        let state = bounded("get_state", self.timeout(), self.backend.get_state(key)).await?;
        Ok(state.unwrap_or_else(|| StudentConceptState::new(key, self.prior_for(&key.concept_id))))
    }

    pub async fn put_state(&self, state: StudentConceptState) -> CoreResult<()> {
        let m = state.mastery_probability;
        if !(m.is_finite() && (0.0..=1.0).contains(&m)) {
            return Err(CoreError::validation(format!(
                "mastery_probability {m} outside [0, 1]"
            )));
        }
        bounded("put_state", self.timeout(), self.backend.put_state(state)).await
    }

    /// Serializes read-modify-write for one (student, concept) key.
    pub async fn lock_state(&self, key: &StateKey) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }
}
