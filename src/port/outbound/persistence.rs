//! Persistence port for idempotent event storage.

use async_trait::async_trait;

use crate::domain::Event;
use crate::error::PersistenceError;

/// Result of storing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// First time this `eventId` was seen.
    Recorded,
    /// An event with this `eventId` already exists; nothing was written.
    Duplicate,
}

impl PersistOutcome {
    #[must_use]
    pub fn is_duplicate(self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// Event store keyed by `eventId`.
///
/// Saving upserts the actor and inserts the event in one transaction. A second
/// save of the same `eventId` reports [`PersistOutcome::Duplicate`] instead of
/// failing.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn save_event(&self, event: &Event) -> Result<PersistOutcome, PersistenceError>;

    /// Cheap connectivity check used by readiness probes.
    async fn ping(&self) -> Result<(), PersistenceError>;

    /// Release pooled connections. Later saves fail with [`PersistenceError::Closed`].
    async fn close(&self) -> Result<(), PersistenceError>;
}
