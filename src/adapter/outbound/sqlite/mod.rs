//! SQLite persistence adapters.
//!
//! Provides the SQLite-backed event repository and its readiness probe
//! using Diesel ORM.

pub mod database;
pub mod probe;
pub mod repository;

pub use probe::DatabaseProbe;
pub use repository::SqliteEventRepository;
