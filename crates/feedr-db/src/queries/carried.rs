//! Prices carried out of rounds that missed ThresholdB.

use feedr_oracle::{CarriedRound, CarriedVote};
use rusqlite::Connection;

use super::{from_sql, to_sql};
use crate::{DbError, Result};

/// Every feeder's carried prices, ordered by feeder id.
pub fn list(conn: &Connection) -> Result<Vec<CarriedRound>> {
    let mut stmt =
        conn.prepare("SELECT feeder_id, round_id, body FROM carried_rounds ORDER BY feeder_id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(feeder_id, round_id, body)| {
            let feeder_id = from_sql(feeder_id, "feeder id")?;
            let votes: Vec<CarriedVote> = serde_json::from_str(&body).map_err(|e| {
                DbError::Serialization(format!("carried prices of feeder {feeder_id}: {e}"))
            })?;
            Ok(CarriedRound {
                feeder_id,
                round_id: from_sql(round_id, "round id")?,
                votes,
            })
        })
        .collect()
}

/// Replace the whole table with `carried`.
pub fn replace(conn: &mut Connection, carried: &[CarriedRound]) -> Result<()> {
    let tx = conn.savepoint()?;
    tx.execute("DELETE FROM carried_rounds", [])?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO carried_rounds (feeder_id, round_id, body) VALUES (?1, ?2, ?3)")?;
        for round in carried {
            let body = serde_json::to_string(&round.votes)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            stmt.execute(rusqlite::params![
                to_sql(round.feeder_id, "feeder id")?,
                to_sql(round.round_id, "round id")?,
                body,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedr_types::{Price, ValidatorId};

    fn carried(feeder_id: u64, round_id: u64, value: u128) -> CarriedRound {
        CarriedRound {
            feeder_id,
            round_id,
            votes: vec![CarriedVote {
                source_id: 1,
                validator: ValidatorId([2; 20]),
                price: Price::new(value, 2),
            }],
        }
    }

    #[test]
    fn test_replace_and_list() {
        let mut conn = crate::open_memory().expect("open");
        assert!(list(&conn).expect("list").is_empty());

        replace(&mut conn, &[carried(2, 4, 10), carried(1, 7, u128::MAX)]).expect("replace");
        assert_eq!(
            list(&conn).expect("list"),
            vec![carried(1, 7, u128::MAX), carried(2, 4, 10)]
        );

        replace(&mut conn, &[]).expect("clear");
        assert!(list(&conn).expect("list").is_empty());
    }

    #[test]
    fn test_corrupt_body() {
        let conn = crate::open_memory().expect("open");
        conn.execute(
            "INSERT INTO carried_rounds (feeder_id, round_id, body) VALUES (1, 2, 'nope')",
            [],
        )
        .expect("raw insert");
        assert!(matches!(list(&conn), Err(DbError::Serialization(_))));
    }
}
