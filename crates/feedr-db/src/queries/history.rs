//! Accepted submissions kept for replay and the validator-update marker.

use std::collections::BTreeMap;

use feedr_types::{Height, PriceSubmission};
use rusqlite::{Connection, OptionalExtension};

use super::{from_sql, to_sql};
use crate::{DbError, Result};

/// All recorded blocks of accepted submissions, keyed by height.
pub fn recent_msgs(conn: &Connection) -> Result<BTreeMap<Height, Vec<PriceSubmission>>> {
    let mut stmt = conn.prepare("SELECT height, body FROM recent_msgs ORDER BY height")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(height, body)| {
            let height = from_sql(height, "height")?;
            let msgs = serde_json::from_str(&body)
                .map_err(|e| DbError::Serialization(format!("msgs at {height}: {e}")))?;
            Ok((height, msgs))
        })
        .collect()
}

/// Record the submissions accepted at `height`.
pub fn set_recent_msgs(conn: &Connection, height: Height, msgs: &[PriceSubmission]) -> Result<()> {
    let body = serde_json::to_string(msgs).map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT OR REPLACE INTO recent_msgs (height, body) VALUES (?1, ?2)",
        rusqlite::params![to_sql(height, "height")?, body],
    )?;
    Ok(())
}

/// Drop blocks included before `keep_from`.
pub fn prune_recent_msgs(conn: &Connection, keep_from: Height) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM recent_msgs WHERE height < ?1",
        [to_sql(keep_from, "height")?],
    )?;
    Ok(removed)
}

/// Height of the last validator-set change.
pub fn validator_update_block(conn: &Connection) -> Result<Option<Height>> {
    let height = conn
        .query_row(
            "SELECT height FROM validator_update_block WHERE id = 1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    height.map(|h| from_sql(h, "validator update height")).transpose()
}

pub fn set_validator_update_block(conn: &Connection, height: Height) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO validator_update_block (id, height) VALUES (1, ?1)",
        [to_sql(height, "validator update height")?],
    )?;
    Ok(())
}
