use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentId {
    ParameterStore,
    Modulator,
    Constraints,
    Bkt,
    Ensemble,
    Selection,
    Spacing,
    Evaluation,
}

impl ComponentId {
    pub fn all() -> &'static [ComponentId] {
        &[
            ComponentId::ParameterStore,
            ComponentId::Modulator,
            ComponentId::Constraints,
            ComponentId::Bkt,
            ComponentId::Ensemble,
            ComponentId::Selection,
            ComponentId::Spacing,
            ComponentId::Evaluation,
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            ComponentId::ParameterStore => "store_parameters",
            ComponentId::Modulator => "modeling_modulator",
            ComponentId::Constraints => "modeling_constraints",
            ComponentId::Bkt => "modeling_bkt",
            ComponentId::Ensemble => "decision_ensemble",
            ComponentId::Selection => "decision_linucb",
            ComponentId::Spacing => "memory_hlr",
            ComponentId::Evaluation => "evaluation_replay",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ComponentId::ParameterStore => "Parameter Store",
            ComponentId::Modulator => "Contextual Modulator",
            ComponentId::Constraints => "Constraint Validator",
            ComponentId::Bkt => "BKT Update Engine",
            ComponentId::Ensemble => "Ensemble Gate",
            ComponentId::Selection => "LinUCB Selection Policy",
            ComponentId::Spacing => "Half-Life Regression Scheduler",
            ComponentId::Evaluation => "Evaluation Engine",
        }
    }

    pub fn layer(&self) -> &'static str {
        match self {
            ComponentId::ParameterStore => "store",
            ComponentId::Modulator | ComponentId::Constraints | ComponentId::Bkt => "modeling",
            ComponentId::Ensemble | ComponentId::Selection => "decision",
            ComponentId::Spacing => "memory",
            ComponentId::Evaluation => "evaluation",
        }
    }
}

#[derive(Debug, Default)]
pub struct ComponentMetrics {
    call_count: AtomicU64,
    total_latency_us: AtomicU64,
    error_count: AtomicU64,
    last_called_at: AtomicU64,
}

impl ComponentMetrics {
    pub fn record_call(&self, latency_us: u64) {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        self.last_called_at.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let calls = self.call_count();
        if calls == 0 {
            return 0.0;
        }
        let total_us = self.total_latency_us.load(Ordering::Relaxed);
        let avg = (total_us as f64 / calls as f64) / 1000.0;
        (avg * 10000.0).round() / 10000.0
    }

    pub fn last_called_at(&self) -> Option<u64> {
        match self.last_called_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn is_active(&self) -> bool {
        match self.last_called_at() {
            Some(last) => now_ms().saturating_sub(last) < 300_000,
            None => false,
        }
    }
}

/// Counters for every component of one engine instance.
pub struct ComponentRegistry {
    metrics: HashMap<ComponentId, ComponentMetrics>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        let metrics = ComponentId::all()
            .iter()
            .map(|id| (*id, ComponentMetrics::default()))
            .collect();
        Self { metrics }
    }

    pub fn record(&self, id: ComponentId, latency_us: u64) {
        if let Some(m) = self.metrics.get(&id) {
            m.record_call(latency_us);
        }
    }

    pub fn record_error(&self, id: ComponentId) {
        if let Some(m) = self.metrics.get(&id) {
            m.record_error();
        }
    }

    pub fn get(&self, id: ComponentId) -> Option<&ComponentMetrics> {
        self.metrics.get(&id)
    }

    pub fn snapshot(&self) -> Vec<ComponentStatus> {
        ComponentId::all()
            .iter()
            .filter_map(|id| {
                let m = self.metrics.get(id)?;
                let calls = m.call_count();
                let is_active = m.is_active();
                let status = if calls == 0 {
                    "idle"
                } else if m.error_count() > 0 && m.error_count() * 2 >= calls {
                    "degraded"
                } else if is_active {
                    "healthy"
                } else {
                    "inactive"
                };
                Some(ComponentStatus {
                    id: id.id().to_string(),
                    name: id.name().to_string(),
                    layer: id.layer().to_string(),
                    call_count: calls,
                    avg_latency_ms: m.avg_latency_ms(),
                    error_count: m.error_count(),
                    last_called_at: m.last_called_at(),
                    is_active,
                    status: status.to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub id: String,
    pub name: String,
    pub layer: String,
    pub call_count: u64,
    pub avg_latency_ms: f64,
    pub error_count: u64,
    pub last_called_at: Option<u64>,
    pub is_active: bool,
    pub status: String,
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Times `$body` and records it against `$id` in `$registry`.
#[macro_export]
macro_rules! track_component {
    ($registry:expr, $id:expr, $body:expr) => {{
        let start = std::time::Instant::now();
        let result = $body;
        let latency_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        $registry.record($id, latency_us);
        result
    }};
}
