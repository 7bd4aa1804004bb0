//! EventSink 実装

use std::sync::{Arc, Mutex};

use crate::domain::DomainEvent;
use crate::ports::EventSink;

/// Emits each event as a structured tracing record.
///
/// Halts and rejected starts go out at `warn`; everything else at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DomainEvent) {
        let task_id = event.task_id();
        match event {
            DomainEvent::Halted { reason, .. } => {
                tracing::warn!(%task_id, ?reason, "check-in halted; needs resume");
            }
            DomainEvent::StartRejected { reason, .. } => {
                tracing::warn!(%task_id, %reason, "check-in start rejected");
            }
            DomainEvent::RetryScheduled {
                attempts, reason, ..
            } => {
                tracing::info!(%task_id, attempts, %reason, "step failed; retry scheduled");
            }
            other => {
                tracing::info!(%task_id, event = ?other, "check-in event");
            }
        }
    }
}

/// Keeps every event in memory. For tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &DomainEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
