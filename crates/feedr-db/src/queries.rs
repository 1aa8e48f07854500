//! Database query functions organized by table.

pub mod carried;
pub mod history;
pub mod params;
pub mod rounds;
pub mod validators;

use crate::{DbError, Result};

/// Bind a `u64` to a signed SQLite integer.
pub(crate) fn to_sql(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| DbError::OutOfRange(format!("{what} {value}")))
}

/// Read back a column written by [`to_sql`].
pub(crate) fn from_sql(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| DbError::OutOfRange(format!("{what} {value}")))
}
