use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// How an activation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceOutcome {
    Continue,
    Suspend,
    Return,
    Stop,
    Error(String),
}

/// A single entry in the activation trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    pub wire: String,
    pub wire_id: Uuid,
    pub shard: String,
    pub position: usize,
    pub iteration: u64,
    pub outcome: TraceOutcome,
    pub elapsed_micros: u64,
}

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Trait for recording activation traces.
pub trait Telemetry: Send + Sync {
    fn record(&self, entry: TraceEntry);

    fn flush(&self);

    /// Recorded entries, for collectors that keep them.
    fn snapshot(&self) -> Vec<TraceEntry> {
        Vec::new()
    }
}

/// Simple in-memory collector for traces.
#[derive(Default)]
pub struct MemoryTelemetry {
    traces: Mutex<Vec<TraceEntry>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_traces(&self) -> Vec<TraceEntry> {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Telemetry for MemoryTelemetry {
    fn record(&self, entry: TraceEntry) {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn flush(&self) {
        // Entries stay in memory.
    }

    fn snapshot(&self) -> Vec<TraceEntry> {
        self.get_traces()
    }
}
