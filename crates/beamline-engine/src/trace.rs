use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::context::StepOutcome;

/// One audited step outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, starting at 0.
    pub seq: usize,
    pub step_id: String,
    pub unit: String,
    pub outcome: StepOutcome,
}

/// Ordered, append-only log of tracked step outcomes.
///
/// Clones share the same buffer, so entries appended by a run that is later
/// abandoned (global timeout) are still visible to the caller.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outcome. Returns its sequence number.
    pub fn append(&self, step_id: &str, unit: &str, outcome: StepOutcome) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let seq = entries.len();
        entries.push(LogEntry {
            seq,
            step_id: step_id.to_string(),
            unit: unit.to_string(),
            outcome,
        });
        seq
    }

    /// Copy of the entries appended so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn append_assigns_sequence() {
        let log = ExecutionLog::new();
        assert!(log.is_empty());
        assert_eq!(log.append("a", "echo", StepOutcome::ok(json!(1), Utc::now(), 1)), 0);
        assert_eq!(log.append("b", "echo", StepOutcome::ok(json!(2), Utc::now(), 1)), 1);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].step_id, "b");
        assert_eq!(entries[1].seq, 1);
    }

    #[test]
    fn clones_share_entries() {
        let log = ExecutionLog::new();
        let handle = log.clone();
        handle.append("a", "echo", StepOutcome::ok(json!(1), Utc::now(), 1));
        assert_eq!(log.len(), 1);
    }
}
