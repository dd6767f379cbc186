//! SQLite event repository.
//!
//! Saves the actor and the event in one transaction. The `events` primary key
//! on `event_id` is the idempotency guard: a unique violation on insert is
//! reported as [`PersistOutcome::Duplicate`] and the transaction rolls back.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use parking_lot::RwLock;
use tracing::debug;

use super::database::connection::DbPool;
use super::database::model::{EventRow, UserRow};
use super::database::schema::{events, users};
use crate::domain::{Event, Source};
use crate::error::PersistenceError;
use crate::port::outbound::persistence::{EventRepository, PersistOutcome};

/// SQLite-backed [`EventRepository`].
pub struct SqliteEventRepository {
    /// `None` once closed.
    pool: RwLock<Option<DbPool>>,
}

impl SqliteEventRepository {
    /// Create a repository over an already migrated pool.
    #[must_use]
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool: RwLock::new(Some(pool)),
        }
    }

    fn pool(&self) -> Result<DbPool, PersistenceError> {
        self.pool.read().clone().ok_or(PersistenceError::Closed)
    }

    /// Load a stored event row.
    ///
    /// # Errors
    /// Returns an error if the repository is closed or the query fails.
    pub fn find_event(&self, event_id: &str) -> Result<Option<EventRow>, PersistenceError> {
        let mut conn = self
            .pool()?
            .get()
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        events::table
            .find(event_id)
            .select(EventRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(|e| PersistenceError::Database(e.to_string()))
    }

    /// Load the stored user `user_id` of `source`.
    ///
    /// # Errors
    /// Returns an error if the repository is closed or the query fails.
    pub fn find_user(&self, source: Source, user_id: &str) -> Result<Option<UserRow>, PersistenceError> {
        let mut conn = self
            .pool()?
            .get()
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        users::table
            .find((source.as_str(), user_id))
            .select(UserRow::as_select())
            .first(&mut conn)
            .optional()
            .map_err(|e| PersistenceError::Database(e.to_string()))
    }
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn save_event(&self, event: &Event) -> Result<PersistOutcome, PersistenceError> {
        let user = UserRow::from_event(event);
        let row = EventRow::from_event(event).map_err(|e| PersistenceError::Database(e.to_string()))?;

        let mut conn = self
            .pool()?
            .get()
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        let result = conn.transaction::<_, DieselError, _>(|conn| {
            diesel::insert_into(users::table)
                .values(&user)
                .on_conflict((users::source, users::id))
                .do_update()
                .set(&user)
                .execute(conn)?;

            diesel::insert_into(events::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(PersistOutcome::Recorded),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                debug!(event_id = %row.event_id, "Event already stored");
                Ok(PersistOutcome::Duplicate)
            }
            Err(e) => Err(PersistenceError::Database(e.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        let mut conn = self
            .pool()?
            .get()
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .map_err(|e| PersistenceError::Database(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        if self.pool.write().take().is_some() {
            debug!("SQLite pool released");
        }
        Ok(())
    }
}
