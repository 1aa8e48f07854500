//! # feedr-db
//!
//! SQLite backend of the price oracle: one database file,
//! `$FEEDR_DATA_DIR/feedr.db`, written through [`SqliteStore`].
//!
//! Heights, ids and powers are `u64` in memory and signed `INTEGER` on
//! disk; values above `i64::MAX` are refused with [`DbError::OutOfRange`]
//! instead of wrapping. Parameters, submissions and carried prices are
//! JSON text. The schema version is `PRAGMA user_version`, see
//! [`migrations`].

pub mod migrations;
pub mod queries;
pub mod schema;
pub mod store;

use feedr_oracle::StoreError;
use rusqlite::Connection;
use std::path::Path;

pub use store::SqliteStore;

/// Schema version written by [`migrations::run`].
pub const SCHEMA_VERSION: u32 = 2;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("integer out of range: {0}")]
    OutOfRange(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => StoreError::NotFound(what),
            DbError::Constraint(what) => StoreError::AlreadyExists(what),
            DbError::Serialization(what) => StoreError::Corrupt(what),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Open the database file, creating it if needed, and bring its schema
/// up to [`SCHEMA_VERSION`].
pub fn open(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&mut conn)?;
    Ok(conn)
}

/// Migrated in-memory database.
pub fn open_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&mut conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}
