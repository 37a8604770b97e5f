//! Rollback substrate: per operation id, an ordered list of inverse patches
//! over a JSON document. Forward mutations are applied copy-on-write and
//! diffed; rolling back applies the inverses in reverse order and reports the
//! inverse event kinds (create <-> delete, update <-> update).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use json_patch::Patch;
use serde_json::Value;
use tracing::warn;
use vantage_proto::EventKind;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

pub struct OperationLog {
    entries: Mutex<HashMap<String, Vec<LogEntry>>>,
    ttl: Duration,
}

struct LogEntry {
    inverse: Patch,
    kind: EventKind,
    at: Instant,
}

impl Default for OperationLog {
    fn default() -> Self { Self::new() }
}

impl OperationLog {
    pub fn new() -> Self { Self::with_ttl(DEFAULT_TTL) }

    pub fn with_ttl(ttl: Duration) -> Self { Self { entries: Mutex::new(HashMap::new()), ttl } }

    /// Apply `mutate` to `doc`, recording the inverse under `operation_id`.
    pub fn apply_mutation(&self, doc: &mut Value, operation_id: &str, kind: EventKind, mutate: impl FnOnce(&mut Value)) {
        let before = doc.clone();
        mutate(doc);
        self.record(operation_id, kind, &before, doc);
    }

    /// Record a transition that already happened elsewhere.
    pub fn record(&self, operation_id: &str, kind: EventKind, before: &Value, after: &Value) {
        let inverse = json_patch::diff(after, before);
        if inverse.0.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        entries.entry(operation_id.to_string()).or_default().push(LogEntry { inverse, kind, at: Instant::now() });
    }

    /// Undo everything recorded under `operation_id`, newest entry first.
    /// Returns the inverse event kinds in the order they were applied.
    pub fn rollback(&self, doc: &mut Value, operation_id: &str) -> Vec<EventKind> {
        let Some(recorded) = self.entries.lock().unwrap().remove(operation_id) else {
            return Vec::new();
        };
        let mut kinds = Vec::with_capacity(recorded.len());
        for entry in recorded.iter().rev() {
            if let Err(e) = json_patch::patch(doc, &entry.inverse) {
                // The document diverged since this was recorded; skip the
                // entry rather than leave the document half-patched
                warn!("rollback patch for {} failed: {}", operation_id, e);
                continue;
            }
            kinds.push(entry.kind.inverse());
        }
        kinds
    }

    pub fn contains(&self, operation_id: &str) -> bool { self.entries.lock().unwrap().contains_key(operation_id) }

    pub fn len(&self) -> usize { self.entries.lock().unwrap().len() }

    pub fn is_empty(&self) -> bool { self.entries.lock().unwrap().is_empty() }

    /// Drop entries older than the TTL.
    pub fn cleanup(&self) {
        let cutoff = Instant::now() - self.ttl;
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, recorded| {
            recorded.retain(|entry| entry.at > cutoff);
            !recorded.is_empty()
        });
    }
}
