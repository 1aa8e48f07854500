//! Forward-only schema upgrades.
//!
//! The applied version is `PRAGMA user_version`. Each step runs in its own
//! transaction together with its version bump, so an interrupted upgrade
//! leaves the database at the last complete version.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Schema steps in version order. The last entry is [`SCHEMA_VERSION`].
const STEPS: &[(u32, &str)] = &[(1, schema::SCHEMA_V1), (2, schema::SCHEMA_V2)];

/// Apply every step above the database's current version.
pub fn run(conn: &mut Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database schema v{current} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    for &(version, sql) in STEPS.iter().filter(|(version, _)| *version > current) {
        tracing::info!(from = current, to = version, "migrating schema");
        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| DbError::Migration(format!("step to v{version}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}
