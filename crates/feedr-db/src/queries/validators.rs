//! Active validator set.

use feedr_types::{ValidatorId, ValidatorPower, VALIDATOR_ADDRESS_LEN};
use rusqlite::Connection;

use super::{from_sql, to_sql};
use crate::{DbError, Result};

/// The active set, ordered by address.
pub fn list(conn: &Connection) -> Result<Vec<ValidatorPower>> {
    let mut stmt = conn.prepare("SELECT address, power FROM validators ORDER BY address")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(address, power)| {
            let bytes: [u8; VALIDATOR_ADDRESS_LEN] = address.as_slice().try_into().map_err(|_| {
                DbError::Serialization(format!("validator address of {} bytes", address.len()))
            })?;
            Ok(ValidatorPower {
                validator: ValidatorId(bytes),
                power: from_sql(power, "power")?,
            })
        })
        .collect()
}

/// Replace the whole active set. Runs as a savepoint, so it also nests
/// inside an open batch.
pub fn replace(conn: &mut Connection, validators: &[ValidatorPower]) -> Result<()> {
    let tx = conn.savepoint()?;
    tx.execute("DELETE FROM validators", [])?;
    {
        let mut stmt = tx.prepare("INSERT INTO validators (address, power) VALUES (?1, ?2)")?;
        for v in validators {
            let power = to_sql(v.power, "power")?;
            stmt.execute(rusqlite::params![v.validator.as_bytes().as_slice(), power])
                .map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(err, _)
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        DbError::Constraint(format!("validator {} listed twice", v.validator))
                    }
                    other => DbError::Sqlite(other),
                })?;
        }
    }
    tx.commit()?;
    Ok(())
}
