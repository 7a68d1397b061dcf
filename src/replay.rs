//! Batch replay of a recorded dataset through the full update pipeline.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::kt::config::{CoreConfig, EnsembleMode};
use crate::kt::decision::AttentionSequencePredictor;
use crate::kt::engine::{KnowledgeTracingEngine, UpdateRequest};
use crate::kt::evaluation::EvaluationReport;
use crate::kt::metrics::ComponentStatus;
use crate::kt::types::{ConceptParameterRecord, ConceptParameters, KnowledgeConcept};
use crate::store::{ManualClock, MemoryBackend, MemoryInteractionLog, MemoryWindowStore};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConceptEntry {
    pub concept: KnowledgeConcept,
    #[serde(default)]
    pub params: Option<ConceptParameters>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dataset {
    pub concepts: Vec<ConceptEntry>,
    pub attempts: Vec<UpdateRequest>,
}

impl Dataset {
    pub fn from_json_str(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw).map_err(|e| CoreError::validation(format!("invalid dataset: {e}")))
    }

    pub async fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutput {
    pub attempts_replayed: usize,
    pub reports: Vec<EvaluationReport>,
    pub components: Vec<ComponentStatus>,
}

/// Attempts without `occurred_at` are placed one second after the previous one.
pub async fn run(config: CoreConfig, dataset: Dataset) -> CoreResult<ReplayOutput> {
    let backend = Arc::new(MemoryBackend::new());
    let loaded_at = Utc::now();
    let mut concept_ids = Vec::with_capacity(dataset.concepts.len());
    for entry in dataset.concepts {
        if let Some(params) = entry.params {
            params.check_ranges().map_err(CoreError::Validation)?;
            backend.insert_params(ConceptParameterRecord {
                concept_id: entry.concept.id.clone(),
                params,
                updated_at: loaded_at,
            });
        }
        concept_ids.push(entry.concept.id.clone());
        backend.insert_concept(entry.concept);
    }
    concept_ids.sort();
    concept_ids.dedup();

    let mut attempts = dataset.attempts;
    let mut cursor = attempts
        .iter()
        .filter_map(|a| a.occurred_at)
        .min()
        .unwrap_or(loaded_at);
    for attempt in attempts.iter_mut() {
        match attempt.occurred_at {
            Some(at) => cursor = at,
            None => {
                cursor += Duration::seconds(1);
                attempt.occurred_at = Some(cursor);
            }
        }
    }
    attempts.sort_by_key(|a| a.occurred_at);

    let clock = Arc::new(ManualClock::new(cursor));
    let auxiliary = config.ensemble.mode == EnsembleMode::BktWithAuxiliary;
    let mut engine = KnowledgeTracingEngine::new(
        config,
        backend,
        Arc::new(MemoryInteractionLog::new()),
        Arc::new(MemoryWindowStore::new()),
        clock.clone(),
    )?;
    if auxiliary {
        engine = engine.with_auxiliary(Arc::new(AttentionSequencePredictor::default()));
    }

    let attempts_replayed = attempts.len();
    for attempt in attempts {
        if let Some(at) = attempt.occurred_at {
            clock.set(at);
        }
        engine.update(attempt).await?;
    }

    let mut reports = Vec::with_capacity(concept_ids.len());
    for concept_id in &concept_ids {
        reports.push(engine.evaluate(concept_id, None, None).await?);
    }
    tracing::info!(attempts = attempts_replayed, concepts = reports.len(), "replay finished");

    Ok(ReplayOutput {
        attempts_replayed,
        reports,
        components: engine.component_status(),
    })
}
