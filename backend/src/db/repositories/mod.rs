//! Store backends.
//!
//! - `local`: in-memory store with an in-process change log, for tests and local development
//! - `postgres`: Diesel/Postgres store whose change feed tails a trigger-fed outbox
//! - `outbox`: commit-ordered cursor used by the outbox feed
pub mod local;
pub mod outbox;
#[cfg(feature = "postgres-repo")]
pub mod postgres;

pub use local::LocalRepository;
pub use outbox::OutboxCursor;
#[cfg(feature = "postgres-repo")]
pub use postgres::{PostgresConfig, PostgresRepository};
