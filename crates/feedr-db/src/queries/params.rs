//! Live parameters and recent parameter snapshots.

use std::collections::BTreeMap;

use feedr_types::{Height, Params};
use rusqlite::Connection;

use super::{from_sql, to_sql};
use crate::{DbError, Result};

fn decode(body: &str) -> Result<Params> {
    serde_json::from_str(body).map_err(|e| DbError::Serialization(e.to_string()))
}

fn encode(params: &Params) -> Result<String> {
    serde_json::to_string(params).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Get the live parameters.
pub fn get(conn: &Connection) -> Result<Params> {
    let body: String = conn
        .query_row("SELECT body FROM params WHERE id = 1", [], |row| row.get(0))
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("params".into()),
            other => DbError::Sqlite(other),
        })?;
    decode(&body)
}

/// Replace the live parameters.
pub fn set(conn: &Connection, params: &Params) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO params (id, body) VALUES (1, ?1)",
        [encode(params)?],
    )?;
    Ok(())
}

/// All recent snapshots keyed by height.
pub fn recent(conn: &Connection) -> Result<BTreeMap<Height, Params>> {
    let mut stmt = conn.prepare("SELECT height, body FROM recent_params ORDER BY height")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(height, body)| Ok((from_sql(height, "height")?, decode(&body)?)))
        .collect()
}

/// Write the snapshot taken at `height`.
pub fn set_recent(conn: &Connection, height: Height, params: &Params) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO recent_params (height, body) VALUES (?1, ?2)",
        rusqlite::params![to_sql(height, "height")?, encode(params)?],
    )?;
    Ok(())
}

/// Drop snapshots below `keep_from` except the newest of them.
pub fn prune_recent(conn: &Connection, keep_from: Height) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM recent_params
         WHERE height < (SELECT MAX(height) FROM recent_params WHERE height < ?1)",
        [to_sql(keep_from, "height")?],
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedr_types::Mode;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_get_missing() {
        let conn = test_db();
        assert!(matches!(get(&conn), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_set_and_get() {
        let conn = test_db();
        let params = Params {
            mode: Mode::WeightedMean,
            ..Params::default()
        };
        set(&conn, &params).expect("set");
        assert_eq!(get(&conn).expect("get"), params);

        set(&conn, &Params::default()).expect("overwrite");
        assert_eq!(get(&conn).expect("get"), Params::default());
    }

    #[test]
    fn test_prune_keeps_active_snapshot() {
        let conn = test_db();
        for h in [5, 8, 12, 20] {
            set_recent(&conn, h, &Params::default()).expect("set");
        }
        assert_eq!(prune_recent(&conn, 15).expect("prune"), 2);
        let kept: Vec<Height> = recent(&conn).expect("read").into_keys().collect();
        assert_eq!(kept, vec![12, 20]);

        // nothing below the horizon: no-op
        assert_eq!(prune_recent(&conn, 3).expect("prune"), 0);
    }
}
