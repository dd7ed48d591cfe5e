//! Structured engine event stream.
//!
//! Every state change worth auditing (order camped, stop fired, guard hit)
//! is pushed here. Emitting never blocks: the in-process buffer is a bounded
//! ring and live subscribers that fall behind simply lose old events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default number of recent events retained in memory.
pub const DEFAULT_EVENT_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Execution
    Camped,
    Replaced,
    Filled,
    Unfilled,
    TakerAttempt,
    Failed,
    // Risk
    StopArmed,
    TrailArmed,
    StopExit,
    TimeExit,
    TakeProfitPosted,
    TakerFlip,
    TakerBlocked,
    Closed,
    DustSweep,
    // Portfolio
    Guard,
    Halt,
    Skip,
    ScanSummary,
    Reconcile,
    Error,
}

impl EventKind {
    fn severity(self) -> Severity {
        match self {
            EventKind::Failed | EventKind::Error => Severity::Error,
            EventKind::StopExit | EventKind::Halt | EventKind::TakerBlocked | EventKind::Reconcile => {
                Severity::Warning
            }
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Severity {
    Info,
    Warning,
    Error,
}

/// One entry in the event stream.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub symbol: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

/// Bounded, non-blocking event sink shared by every component.
#[derive(Clone)]
pub struct EventLog {
    buffer: Arc<Mutex<VecDeque<EngineEvent>>>,
    capacity: usize,
    tx: broadcast::Sender<EngineEvent>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            tx,
        }
    }

    /// Record an event. Also written to the `engine_event` tracing target.
    pub fn emit(&self, kind: EventKind, symbol: Option<&str>, details: Value) {
        let event = EngineEvent {
            kind,
            symbol: symbol.map(str::to_string),
            timestamp: Utc::now(),
            details,
        };

        let json = serde_json::to_string(&event).unwrap_or_default();
        match kind.severity() {
            Severity::Info => info!(target: "engine_event", "ENGINE_EVENT: {}", json),
            Severity::Warning => warn!(target: "engine_event", "ENGINE_EVENT: {}", json),
            Severity::Error => error!(target: "engine_event", "ENGINE_EVENT: {}", json),
        }

        // A poisoned buffer only means a panic elsewhere; keep recording.
        let mut buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event.clone());
        drop(buffer);

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<EngineEvent> {
        let buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
