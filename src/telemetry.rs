//! Structured event sink for cascade transitions.
//!
//! Components receive an `Arc<dyn EventSink>` at construction; there is no
//! global logger state beyond the `tracing` subscriber. Emission is
//! fire-and-forget: implementations must not block and must not fail.
//!
//! Events never carry transcript text, only ids, counts and labels.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestStarted,
    RequestRejected,
    CacheHit,
    ChunkingApplied,
    StageCompleted,
    StageFailed,
    StageRetried,
    CascadeAborted,
    FallbackTriggered,
    RequestCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestStarted => "request_started",
            Self::RequestRejected => "request_rejected",
            Self::CacheHit => "cache_hit",
            Self::ChunkingApplied => "chunking_applied",
            Self::StageCompleted => "stage_completed",
            Self::StageFailed => "stage_failed",
            Self::StageRetried => "stage_retried",
            Self::CascadeAborted => "cascade_aborted",
            Self::FallbackTriggered => "fallback_triggered",
            Self::RequestCompleted => "request_completed",
        }
    }
}

/// One `{event, fields, timestamp}` record.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeEvent {
    pub event: EventKind,
    pub fields: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl CascadeEvent {
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            fields: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: CascadeEvent);
}

// ═══════════════════════════════════════════════════════════
// Implementations
// ═══════════════════════════════════════════════════════════

/// Default sink: forwards every event to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: CascadeEvent) {
        let fields = Value::Object(event.fields);
        match event.event {
            EventKind::StageFailed | EventKind::CascadeAborted | EventKind::FallbackTriggered => {
                tracing::warn!(
                    event = event.event.as_str(),
                    %fields,
                    timestamp = %event.timestamp.to_rfc3339(),
                    "cascade event"
                );
            }
            EventKind::StageRetried | EventKind::CacheHit => {
                tracing::debug!(
                    event = event.event.as_str(),
                    %fields,
                    timestamp = %event.timestamp.to_rfc3339(),
                    "cascade event"
                );
            }
            _ => {
                tracing::info!(
                    event = event.event.as_str(),
                    %fields,
                    timestamp = %event.timestamp.to_rfc3339(),
                    "cascade event"
                );
            }
        }
    }
}

/// In-memory sink, used by tests to assert on emitted transitions.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<CascadeEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CascadeEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.event).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.event == kind).count()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: CascadeEvent) {
        // A poisoned lock still accepts writes; emission never fails.
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

pub fn tracing_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingEventSink)
}
