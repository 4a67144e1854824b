//! Structured lifecycle records for heap and call-context events.
//!
//! Records are kept in memory until drained; `to_jsonl` renders them one JSON
//! object per line for log aggregation.

use serde::Serialize;

/// Severity of a lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleRecord {
    /// Monotonic event id within the emitting log.
    pub decision_id: u64,
    /// Correlation id (`membrane::<symbol>::<decision_id>`).
    pub trace_id: String,
    pub level: LogLevel,
    /// Operation that emitted the record (`allocate`, `free`, `context`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `grow`, `begin`, `end`, ...).
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
}

/// Bounded in-memory record buffer.
#[derive(Debug)]
pub struct LifecycleLog {
    next_decision_id: u64,
    capacity: usize,
    records: Vec<LifecycleRecord>,
}

impl Default for LifecycleLog {
    fn default() -> Self {
        Self::with_capacity(4096)
    }
}

impl LifecycleLog {
    /// Log that keeps at most `capacity` records, dropping the oldest.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            next_decision_id: 1,
            capacity: capacity.max(1),
            records: Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        level: LogLevel,
        symbol: &'static str,
        event: &'static str,
        address: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.remove(0);
        }
        self.records.push(LifecycleRecord {
            decision_id,
            trace_id: format!("membrane::{symbol}::{decision_id:016x}"),
            level,
            symbol,
            event,
            address,
            size,
            outcome,
            details: details.into(),
        });
    }

    /// View of the retained records.
    #[must_use]
    pub fn records(&self) -> &[LifecycleRecord] {
        &self.records
    }

    /// Drains the retained records.
    pub fn drain(&mut self) -> Vec<LifecycleRecord> {
        std::mem::take(&mut self.records)
    }
}

/// Render records as JSON lines.
#[must_use]
pub fn to_jsonl(records: &[LifecycleRecord]) -> String {
    let mut out = String::new();
    for record in records {
        if let Ok(line) = serde_json::to_string(record) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}
