//! In-process collaborators backed by `parking_lot::RwLock`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{EvaluationWindowStore, InteractionLog, StateBackend};
use crate::error::StoreError;
use crate::kt::types::{
    ConceptParameterRecord, EvaluationWindow, Interaction, KnowledgeConcept, StateKey,
    StudentConceptState,
};

#[derive(Default)]
pub struct MemoryBackend {
    concepts: RwLock<HashMap<String, KnowledgeConcept>>,
    params: RwLock<HashMap<String, ConceptParameterRecord>>,
    states: RwLock<HashMap<StateKey, StudentConceptState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_concept(&self, concept: KnowledgeConcept) {
        self.concepts.write().insert(concept.id.clone(), concept);
    }

    pub fn insert_params(&self, record: ConceptParameterRecord) {
        self.params.write().insert(record.concept_id.clone(), record);
    }

    pub fn state_count(&self) -> usize {
        self.states.read().len()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn get_concept(&self, concept_id: &str) -> Result<Option<KnowledgeConcept>, StoreError> {
        Ok(self.concepts.read().get(concept_id).cloned())
    }

    async fn get_params(
        &self,
        concept_id: &str,
    ) -> Result<Option<ConceptParameterRecord>, StoreError> {
        Ok(self.params.read().get(concept_id).cloned())
    }

    async fn put_params(&self, record: ConceptParameterRecord) -> Result<(), StoreError> {
        self.insert_params(record);
        Ok(())
    }

    async fn get_state(&self, key: &StateKey) -> Result<Option<StudentConceptState>, StoreError> {
        Ok(self.states.read().get(key).cloned())
    }

    async fn put_state(&self, state: StudentConceptState) -> Result<(), StoreError> {
        self.states.write().insert(state.key(), state);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryInteractionLog {
    entries: RwLock<Vec<Interaction>>,
}

impl MemoryInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InteractionLog for MemoryInteractionLog {
    async fn append(&self, interaction: Interaction) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        let known = entries
            .iter()
            .rev()
            .any(|it| it.interaction_id == interaction.interaction_id);
        if !known {
            entries.push(interaction);
        }
        Ok(())
    }

    async fn read_concept(
        &self,
        concept_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Interaction>, StoreError> {
        let mut out: Vec<Interaction> = self
            .entries
            .read()
            .iter()
            .filter(|it| it.concept_id == concept_id)
            .filter(|it| start.map_or(true, |s| it.timestamp >= s))
            .filter(|it| end.map_or(true, |e| it.timestamp < e))
            .cloned()
            .collect();
        out.sort_by_key(|it| it.timestamp);
        Ok(out)
    }

    async fn recent_for_student(
        &self,
        student_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, StoreError> {
        let mut out: Vec<Interaction> = self
            .entries
            .read()
            .iter()
            .filter(|it| it.student_id == student_id)
            .cloned()
            .collect();
        out.sort_by_key(|it| it.timestamp);
        let skip = out.len().saturating_sub(limit);
        Ok(out.split_off(skip))
    }
}

#[derive(Default)]
pub struct MemoryWindowStore {
    windows: RwLock<Vec<EvaluationWindow>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvaluationWindowStore for MemoryWindowStore {
    async fn append(&self, window: EvaluationWindow) -> Result<(), StoreError> {
        self.windows.write().push(window);
        Ok(())
    }

    async fn list(&self, concept_id: &str) -> Result<Vec<EvaluationWindow>, StoreError> {
        Ok(self
            .windows
            .read()
            .iter()
            .filter(|w| w.concept_id == concept_id)
            .cloned()
            .collect())
    }
}
