use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ksim_protocol::EventKind;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

/// One fired event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    /// `"<kind-name> (<sequence>)"`.
    pub label: String,
    pub sequence: u64,
    pub kind_name: &'static str,
    pub payload: Vec<Value>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log full: capacity {capacity} reached while recording {kind}")]
    CapacityExceeded { capacity: usize, kind: &'static str },
}

#[derive(Debug, Default)]
struct LogState {
    records: Vec<EventRecord>,
    next_sequence: u64,
}

/// Append-only record of every published event.
///
/// Sequence numbers are global and survive [`EventLog::clear`], so a label is
/// never reused within a process. Until the first clear, the sequence equals
/// the log size at insertion time.
#[derive(Debug, Default)]
pub struct EventLog {
    state: Mutex<LogState>,
    capacity: Option<usize>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that refuses to grow past `capacity` records.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            capacity: Some(capacity),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn append(&self, event: &EventKind) -> Result<EventRecord, EventLogError> {
        let mut state = self.state.lock();
        if let Some(capacity) = self.capacity {
            if state.records.len() >= capacity {
                return Err(EventLogError::CapacityExceeded {
                    capacity,
                    kind: event.name(),
                });
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence = sequence.saturating_add(1);
        let record = EventRecord {
            label: format!("{} ({})", event.name(), sequence),
            sequence,
            kind_name: event.name(),
            payload: event.payload(),
            recorded_at: Utc::now(),
        };
        state.records.push(record.clone());
        Ok(record)
    }

    /// Records whose label contains `filter`, keyed by label, in insertion
    /// order. An empty filter matches everything.
    #[instrument(skip(self))]
    pub fn list_all(&self, filter: &str) -> IndexMap<String, Vec<Value>> {
        let state = self.state.lock();
        let listed: IndexMap<_, _> = state
            .records
            .iter()
            .filter(|record| record.label.contains(filter))
            .map(|record| (record.label.clone(), record.payload.clone()))
            .collect();
        debug!(matched = listed.len(), total = state.records.len(), "fired events listed");
        listed
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.state.lock().records.clone()
    }

    /// Number of records of the given event kind.
    pub fn count_of(&self, kind_name: &str) -> usize {
        self.state
            .lock()
            .records
            .iter()
            .filter(|record| record.kind_name == kind_name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.records.len();
        state.records.clear();
        debug!(dropped, next_sequence = state.next_sequence, "fired events cleared");
    }
}

#[cfg(test)]
mod tests {
    use ksim_protocol::{EventKind, LoginErrorReason};
    use serde_json::json;

    use super::*;

    #[test]
    fn labels_follow_insertion_sequence() -> Result<(), EventLogError> {
        let log = EventLog::new();
        let first = log.append(&EventKind::StartKernel)?;
        let second = log.append(&EventKind::KernelStarted)?;
        assert_eq!(first.label, "StartKernel (0)");
        assert_eq!(second.label, "KernelStarted (1)");
        assert_eq!(log.len(), 2);
        Ok(())
    }

    #[test]
    fn list_all_filters_by_substring_in_order() -> Result<(), EventLogError> {
        let log = EventLog::new();
        log.append(&EventKind::PreLogin)?;
        log.append(&EventKind::PostLogin {
            username: "root".into(),
        })?;
        log.append(&EventKind::LoginError {
            username: "guest".into(),
            reason: LoginErrorReason::NotFound,
        })?;
        log.append(&EventKind::ShellInitialized)?;

        let logins = log.list_all("Login");
        let labels: Vec<_> = logins.keys().cloned().collect();
        assert_eq!(
            labels,
            vec!["PreLogin (0)", "PostLogin (1)", "LoginError (2)"]
        );
        assert_eq!(logins["PostLogin (1)"], vec![json!("root")]);

        assert_eq!(log.list_all("").len(), 4);
        Ok(())
    }

    #[test]
    fn filter_is_case_sensitive() -> Result<(), EventLogError> {
        let log = EventLog::new();
        log.append(&EventKind::PreLogin)?;
        assert!(log.list_all("login").is_empty());
        assert_eq!(log.list_all("Login").len(), 1);
        Ok(())
    }

    #[test]
    fn clear_empties_the_log() -> Result<(), EventLogError> {
        let log = EventLog::new();
        log.append(&EventKind::StartKernel)?;
        log.append(&EventKind::ShellInitialized)?;
        log.clear();
        assert!(log.is_empty());
        assert!(log.list_all("").is_empty());
        Ok(())
    }

    // Labels come from a process-wide counter rather than the log size or a
    // per-kind counter, so the number after a clear is not the log size and
    // the same event kind gets different numbers depending on what fired
    // before it.
    #[test]
    fn labels_keep_counting_after_clear() -> Result<(), EventLogError> {
        let log = EventLog::new();
        log.append(&EventKind::PreLogin)?;
        log.append(&EventKind::ShellInitialized)?;
        log.clear();

        let record = log.append(&EventKind::PreLogin)?;
        assert_eq!(record.label, "PreLogin (2)");
        assert_eq!(log.len(), 1);
        assert!(log.list_all("PreLogin (0)").is_empty());
        Ok(())
    }

    #[test]
    fn capacity_limit_rejects_append() -> Result<(), EventLogError> {
        let log = EventLog::with_capacity_limit(1);
        log.append(&EventKind::StartKernel)?;
        let error = log.append(&EventKind::KernelStarted).unwrap_err();
        assert!(error.to_string().contains("capacity 1"));
        assert_eq!(log.len(), 1);
        Ok(())
    }

    #[test]
    fn count_of_matches_kind_name() -> Result<(), EventLogError> {
        let log = EventLog::new();
        log.append(&EventKind::PreReboot)?;
        log.append(&EventKind::PostReboot)?;
        log.append(&EventKind::PreReboot)?;
        assert_eq!(log.count_of("PreReboot"), 2);
        assert_eq!(log.count_of("PostShutdown"), 0);
        Ok(())
    }
}
