use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use sysadl_core::{SysadlError, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub what: String,
    pub who: String,
    pub execution_id: String,
    pub result: Value,
    pub metadata: BTreeMap<String, Value>,
    pub trace: Vec<String>,
    pub timestamp_ms: u64,
}

impl ExecutionLogEntry {
    pub fn new(what: impl Into<String>, who: impl Into<String>, execution_id: &str) -> Self {
        Self {
            what: what.into(),
            who: who.into(),
            execution_id: execution_id.to_string(),
            result: Value::Null,
            metadata: BTreeMap::new(),
            trace: Vec::new(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn result(mut self, result: impl Into<Value>) -> Self {
        self.result = result.into();
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn trace(mut self, line: impl Into<String>) -> Self {
        self.trace.push(line.into());
        self
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
pub trait ExecutionLogger: Send + Sync {
    fn log_execution(&self, entry: ExecutionLogEntry);

    async fn flush(&self) -> Result<(), SysadlError> {
        Ok(())
    }
}

/// Forwards entries as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

#[async_trait]
impl ExecutionLogger for TracingLogger {
    fn log_execution(&self, entry: ExecutionLogEntry) {
        tracing::info!(
            target: "sysadl::execution",
            what = %entry.what,
            who = %entry.who,
            execution_id = %entry.execution_id,
            result = %entry.result,
            metadata = ?entry.metadata,
            trace = ?entry.trace,
            "execution log"
        );
    }
}

/// Keeps every entry in memory; flushing counts as a checkpoint.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger {
    entries: Arc<Mutex<Vec<ExecutionLogEntry>>>,
    flushes: Arc<Mutex<usize>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries.lock().clone()
    }

    pub fn entries_for(&self, who: &str) -> Vec<ExecutionLogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.who == who)
            .cloned()
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        *self.flushes.lock()
    }
}

#[async_trait]
impl ExecutionLogger for MemoryLogger {
    fn log_execution(&self, entry: ExecutionLogEntry) {
        self.entries.lock().push(entry);
    }

    async fn flush(&self) -> Result<(), SysadlError> {
        *self.flushes.lock() += 1;
        Ok(())
    }
}
