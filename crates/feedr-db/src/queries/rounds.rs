//! Finalized round results.

use feedr_types::{FeederId, Height, Price, RoundResult};
use rusqlite::{Connection, OptionalExtension, Row};

use super::{from_sql, to_sql};
use crate::{DbError, Result};

const COLUMNS: &str = "feeder_id, round_id, height, value, decimal";

/// A row as SQLite returns it, before range and price checks.
struct RawRow {
    feeder_id: i64,
    round_id: i64,
    height: i64,
    value: String,
    decimal: u8,
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        feeder_id: row.get(0)?,
        round_id: row.get(1)?,
        height: row.get(2)?,
        value: row.get(3)?,
        decimal: row.get(4)?,
    })
}

fn parse(raw: RawRow) -> Result<RoundResult> {
    let value = raw.value.parse().map_err(|e: std::num::ParseIntError| {
        DbError::Serialization(format!("price {:?}: {e}", raw.value))
    })?;
    Ok(RoundResult {
        feeder_id: from_sql(raw.feeder_id, "feeder id")?,
        round_id: from_sql(raw.round_id, "round id")?,
        height: from_sql(raw.height, "height")?,
        price: Price::new(value, raw.decimal),
    })
}

/// Append a finalized round. Fails with [`DbError::Constraint`] if the
/// round was already recorded.
pub fn insert(conn: &Connection, result: &RoundResult) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO round_results ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        rusqlite::params![
            to_sql(result.feeder_id, "feeder id")?,
            to_sql(result.round_id, "round id")?,
            to_sql(result.height, "height")?,
            result.price.value.to_string(),
            result.price.decimal,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!(
                "round {} of feeder {}",
                result.round_id, result.feeder_id
            ))
        }
        other => DbError::Sqlite(other),
    })?;
    Ok(())
}

/// Most recently finalized round of a feeder.
pub fn latest(conn: &Connection, feeder_id: FeederId) -> Result<RoundResult> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM round_results WHERE feeder_id = ?1
                 ORDER BY round_id DESC LIMIT 1"
            ),
            [to_sql(feeder_id, "feeder id")?],
            from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("price of feeder {feeder_id}")))?;
    parse(row)
}

/// Most recent round of a feeder finalized at or before `height`.
pub fn at_height(conn: &Connection, feeder_id: FeederId, height: Height) -> Result<RoundResult> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM round_results WHERE feeder_id = ?1 AND height <= ?2
                 ORDER BY height DESC, round_id DESC LIMIT 1"
            ),
            rusqlite::params![to_sql(feeder_id, "feeder id")?, to_sql(height, "height")?],
            from_row,
        )
        .optional()?
        .ok_or_else(|| {
            DbError::NotFound(format!("price of feeder {feeder_id} at height {height}"))
        })?;
    parse(row)
}

/// All finalized rounds of a feeder, oldest first.
pub fn list(conn: &Connection, feeder_id: FeederId) -> Result<Vec<RoundResult>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM round_results WHERE feeder_id = ?1 ORDER BY round_id"
    ))?;
    let rows = stmt
        .query_map([to_sql(feeder_id, "feeder id")?], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(parse).collect()
}
