#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use kt_core::kt::types::{
    ConceptParameterRecord, ConceptParameters, Interaction, KnowledgeConcept, StateKey,
    StudentConceptState,
};
use kt_core::store::{
    InteractionLog, ManualClock, MemoryBackend, MemoryInteractionLog, MemoryWindowStore,
    StateBackend,
};
use kt_core::{CoreConfig, KnowledgeTracingEngine, StoreError};

pub const CONCEPT: &str = "fractions";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub engine: Arc<KnowledgeTracingEngine>,
    pub backend: Arc<MemoryBackend>,
    pub log: Arc<MemoryInteractionLog>,
    pub windows: Arc<MemoryWindowStore>,
    pub clock: Arc<ManualClock>,
}

pub fn seeded_backend(params: ConceptParameters) -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_concept(KnowledgeConcept::new(CONCEPT, 3, 3));
    backend.insert_params(ConceptParameterRecord {
        concept_id: CONCEPT.to_string(),
        params,
        updated_at: t0(),
    });
    backend
}

pub fn harness(config: CoreConfig, params: ConceptParameters) -> Harness {
    let backend = seeded_backend(params);
    let log = Arc::new(MemoryInteractionLog::new());
    let windows = Arc::new(MemoryWindowStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = KnowledgeTracingEngine::new(
        config,
        backend.clone(),
        log.clone(),
        windows.clone(),
        clock.clone(),
    )
    .unwrap();
    Harness {
        engine: Arc::new(engine),
        backend,
        log,
        windows,
        clock,
    }
}

/// Backend whose writes fail while `failing` is set.
pub struct FlakyBackend {
    pub inner: Arc<MemoryBackend>,
    pub failing: AtomicBool,
}

impl FlakyBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl StateBackend for FlakyBackend {
    async fn get_concept(&self, concept_id: &str) -> Result<Option<KnowledgeConcept>, StoreError> {
        self.inner.get_concept(concept_id).await
    }

    async fn get_params(
        &self,
        concept_id: &str,
    ) -> Result<Option<ConceptParameterRecord>, StoreError> {
        self.inner.get_params(concept_id).await
    }

    async fn put_params(&self, record: ConceptParameterRecord) -> Result<(), StoreError> {
        self.inner.put_params(record).await
    }

    async fn get_state(&self, key: &StateKey) -> Result<Option<StudentConceptState>, StoreError> {
        self.inner.get_state(key).await
    }

    async fn put_state(&self, state: StudentConceptState) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("primary down".into()));
        }
        self.inner.put_state(state).await
    }
}

/// Log whose appends never finish within any reasonable timeout.
pub struct StalledLog;

#[async_trait]
impl InteractionLog for StalledLog {
    async fn append(&self, _interaction: Interaction) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }

    async fn read_concept(
        &self,
        _concept_id: &str,
        _start: Option<DateTime<Utc>>,
        _end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Interaction>, StoreError> {
        Ok(Vec::new())
    }

    async fn recent_for_student(
        &self,
        _student_id: &str,
        _limit: usize,
    ) -> Result<Vec<Interaction>, StoreError> {
        Ok(Vec::new())
    }
}

/// Log whose first append fails; later appends reach `inner`.
pub struct FailOnceLog {
    pub inner: Arc<MemoryInteractionLog>,
    fail_next: AtomicBool,
}

impl FailOnceLog {
    pub fn new(inner: Arc<MemoryInteractionLog>) -> Self {
        Self {
            inner,
            fail_next: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl InteractionLog for FailOnceLog {
    async fn append(&self, interaction: Interaction) -> Result<(), StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("log partition moving".into()));
        }
        self.inner.append(interaction).await
    }

    async fn read_concept(
        &self,
        concept_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Interaction>, StoreError> {
        self.inner.read_concept(concept_id, start, end).await
    }

    async fn recent_for_student(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, StoreError> {
        self.inner.recent_for_student(student_id, limit).await
    }
}
