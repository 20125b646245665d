//! Debug trace of inbound and outbound agent traffic.
//!
//! The trace is an observer only. The core treats the sink as unbounded;
//! retention is decided by whoever owns the sink.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::MAX_DEBUG_LOG_CAPACITY;
use crate::error::AgentClientError;

/// Method tag used by the supervisor for lines the agent wrote to stderr.
pub const STDERR_METHOD: &str = "codex/stderr";

const PREALLOCATED_RECORDS: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugSource {
    Client,
    Server,
    Event,
    Stderr,
    Error,
}

impl DebugSource {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Event => "event",
            Self::Stderr => "stderr",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugRecord {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub source: DebugSource,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl DebugRecord {
    pub fn new(source: DebugSource, label: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            source,
            label: label.into(),
            payload,
        }
    }
}

pub trait DebugSink: Send + Sync {
    fn record(&self, record: DebugRecord);
}

/// Keeps the most recent `capacity` records.
pub struct RingDebugSink {
    capacity: usize,
    records: Mutex<VecDeque<DebugRecord>>,
}

impl RingDebugSink {
    /// `capacity` is clamped to `1..=MAX_DEBUG_LOG_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_DEBUG_LOG_CAPACITY);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(PREALLOCATED_RECORDS))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn records(&self) -> Vec<DebugRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DebugSink for RingDebugSink {
    fn record(&self, record: DebugRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }
}

/// Forwards records to `tracing` at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDebugSink;

impl DebugSink for TracingDebugSink {
    fn record(&self, record: DebugRecord) {
        tracing::debug!(
            id = %record.id,
            source = record.source.label(),
            label = %record.label,
            payload = ?record.payload,
            "codex debug record"
        );
    }
}

/// Optional handle to a [`DebugSink`]; a disabled trace drops everything.
#[derive(Clone, Default)]
pub struct DebugTrace {
    sink: Option<Arc<dyn DebugSink>>,
}

impl DebugTrace {
    pub fn new(sink: Arc<dyn DebugSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn emit(&self, source: DebugSource, label: impl Into<String>, payload: Option<Value>) {
        if let Some(sink) = self.sink.as_ref() {
            sink.record(DebugRecord::new(source, label, payload));
        }
    }

    /// Runs an outbound call bracketed by a `client` record and a
    /// `server` or `error` record.
    pub(crate) async fn traced_call<T, F>(
        &self,
        label: &str,
        payload: Value,
        call: F,
    ) -> Result<T, AgentClientError>
    where
        T: Serialize,
        F: Future<Output = Result<T, AgentClientError>>,
    {
        self.emit(DebugSource::Client, label, Some(payload));
        let result = call.await;
        match &result {
            Ok(response) => {
                let response = serde_json::to_value(response).ok();
                self.emit(DebugSource::Server, format!("{label} response"), response);
            }
            Err(error) => {
                self.emit(
                    DebugSource::Error,
                    format!("{label} error"),
                    Some(Value::String(error.to_string())),
                );
            }
        }
        result
    }
}

impl std::fmt::Debug for DebugTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugTrace")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
