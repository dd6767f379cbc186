//! Event repository doubles.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::CallLog;
use crate::domain::Event;
use crate::error::PersistenceError;
use crate::port::outbound::persistence::{EventRepository, PersistOutcome};

/// In-memory repository with real duplicate detection plus scriptable failures.
pub struct ScriptedRepository {
    seen: Mutex<HashSet<String>>,
    save_failures: Mutex<VecDeque<PersistenceError>>,
    failing_events: Mutex<HashSet<String>>,
    ping_result: Mutex<Result<(), PersistenceError>>,
    close_result: Mutex<Result<(), PersistenceError>>,
    save_count: AtomicU32,
    log: Option<CallLog>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            save_failures: Mutex::new(VecDeque::new()),
            failing_events: Mutex::new(HashSet::new()),
            ping_result: Mutex::new(Ok(())),
            close_result: Mutex::new(Ok(())),
            save_count: AtomicU32::new(0),
            log: None,
        }
    }

    /// Fail the next `save_event` calls in order.
    pub fn with_save_failures(self, failures: Vec<PersistenceError>) -> Self {
        *self.save_failures.lock() = failures.into();
        self
    }

    /// Fail every save of `event_id`.
    pub fn with_failing_event(self, event_id: &str) -> Self {
        self.failing_events
            .lock()
            .insert(event_id.to_string());
        self
    }

    /// Pretend `event_id` was stored earlier.
    pub fn with_existing(self, event_id: &str) -> Self {
        self.seen.lock().insert(event_id.to_string());
        self
    }

    pub fn with_ping_result(self, result: Result<(), PersistenceError>) -> Self {
        *self.ping_result.lock() = result;
        self
    }

    pub fn with_close_result(self, result: Result<(), PersistenceError>) -> Self {
        *self.close_result.lock() = result;
        self
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn save_count(&self) -> u32 {
        self.save_count.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> usize {
        self.seen.lock().len()
    }
}

impl Default for ScriptedRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventRepository for ScriptedRepository {
    async fn save_event(&self, event: &Event) -> Result<PersistOutcome, PersistenceError> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.save_failures.lock().pop_front() {
            return Err(err);
        }
        if self.failing_events.lock().contains(event.event_id()) {
            return Err(PersistenceError::Database("scripted failure".into()));
        }

        if self.seen.lock().insert(event.event_id().to_string()) {
            Ok(PersistOutcome::Recorded)
        } else {
            Ok(PersistOutcome::Duplicate)
        }
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.ping_result.lock().clone()
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        if let Some(log) = &self.log {
            log.record("repository.close");
        }
        self.close_result.lock().clone()
    }
}
