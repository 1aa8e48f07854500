//! [`OracleStore`] and [`ValidatorSource`] over one SQLite connection.
//!
//! A store batch is one `BEGIN IMMEDIATE` transaction; writes made outside
//! a batch commit on their own.

use std::collections::BTreeMap;
use std::path::Path;

use feedr_oracle::store::StoreResult;
use feedr_oracle::{CarriedRound, OracleStore, ValidatorSource};
use feedr_types::{FeederId, Height, Params, PriceSubmission, RoundResult, ValidatorPower};
use rusqlite::Connection;

use crate::queries::{carried, history, params, rounds, validators};
use crate::{DbError, Result};

/// The oracle's durable state in SQLite.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: crate::open(path)?,
        })
    }

    /// Fresh in-memory database.
    pub fn open_memory() -> Result<Self> {
        Ok(Self {
            conn: crate::open_memory()?,
        })
    }

    /// Wrap a connection that has already been migrated.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Hand back the underlying connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Whether live parameters have ever been written.
    pub fn is_initialized(&self) -> Result<bool> {
        match params::get(&self.conn) {
            Ok(_) => Ok(true),
            Err(DbError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write genesis parameters and validators into an empty database.
    pub fn seed_genesis(&mut self, genesis: &Params, set: &[ValidatorPower]) -> Result<()> {
        params::set(&self.conn, genesis)?;
        validators::replace(&mut self.conn, set)?;
        tracing::info!(
            feeders = genesis.feeders.len(),
            validators = set.len(),
            "Seeded genesis state"
        );
        Ok(())
    }

    /// Replace the active validator set.
    pub fn set_validators(&mut self, set: &[ValidatorPower]) -> Result<()> {
        validators::replace(&mut self.conn, set)
    }

    /// All finalized rounds of a feeder, oldest first.
    pub fn round_results(&self, feeder_id: FeederId) -> Result<Vec<RoundResult>> {
        rounds::list(&self.conn, feeder_id)
    }
}

impl OracleStore for SqliteStore {
    fn params(&self) -> StoreResult<Params> {
        Ok(params::get(&self.conn)?)
    }

    fn set_params(&mut self, value: &Params) -> StoreResult<()> {
        Ok(params::set(&self.conn, value)?)
    }

    fn recent_params(&self) -> StoreResult<BTreeMap<Height, Params>> {
        Ok(params::recent(&self.conn)?)
    }

    fn set_recent_params(&mut self, height: Height, value: &Params) -> StoreResult<()> {
        Ok(params::set_recent(&self.conn, height, value)?)
    }

    fn prune_recent_params(&mut self, keep_from: Height) -> StoreResult<()> {
        params::prune_recent(&self.conn, keep_from)?;
        Ok(())
    }

    fn recent_msgs(&self) -> StoreResult<BTreeMap<Height, Vec<PriceSubmission>>> {
        Ok(history::recent_msgs(&self.conn)?)
    }

    fn set_recent_msgs(&mut self, height: Height, msgs: &[PriceSubmission]) -> StoreResult<()> {
        Ok(history::set_recent_msgs(&self.conn, height, msgs)?)
    }

    fn prune_recent_msgs(&mut self, keep_from: Height) -> StoreResult<()> {
        history::prune_recent_msgs(&self.conn, keep_from)?;
        Ok(())
    }

    fn validator_update_block(&self) -> StoreResult<Option<Height>> {
        Ok(history::validator_update_block(&self.conn)?)
    }

    fn set_validator_update_block(&mut self, height: Height) -> StoreResult<()> {
        Ok(history::set_validator_update_block(&self.conn, height)?)
    }

    fn carried_rounds(&self) -> StoreResult<Vec<CarriedRound>> {
        Ok(carried::list(&self.conn)?)
    }

    fn set_carried_rounds(&mut self, value: &[CarriedRound]) -> StoreResult<()> {
        Ok(carried::replace(&mut self.conn, value)?)
    }

    fn append_round_result(&mut self, result: &RoundResult) -> StoreResult<()> {
        Ok(rounds::insert(&self.conn, result)?)
    }

    fn latest_round_result(&self, feeder_id: FeederId) -> StoreResult<RoundResult> {
        Ok(rounds::latest(&self.conn, feeder_id)?)
    }

    fn round_result_at(&self, feeder_id: FeederId, height: Height) -> StoreResult<RoundResult> {
        Ok(rounds::at_height(&self.conn, feeder_id, height)?)
    }

    fn begin_batch(&mut self) -> StoreResult<()> {
        if !self.conn.is_autocommit() {
            return Err(DbError::Constraint("a batch is already open".into()).into());
        }
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(DbError::from)?;
        Ok(())
    }

    fn commit_batch(&mut self) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT").map_err(DbError::from)?;
        Ok(())
    }

    fn rollback_batch(&mut self) -> StoreResult<()> {
        if self.conn.is_autocommit() {
            // SQLite already rolled back on the failing statement
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK").map_err(DbError::from)?;
        Ok(())
    }
}

impl ValidatorSource for SqliteStore {
    fn active_validators(&self) -> StoreResult<Vec<ValidatorPower>> {
        Ok(validators::list(&self.conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedr_oracle::StoreError;
    use feedr_types::{Price, ValidatorId};

    #[test]
    fn test_seed_genesis() {
        let mut store = SqliteStore::open_memory().expect("open");
        assert!(!store.is_initialized().expect("check"));
        let set = vec![ValidatorPower {
            validator: ValidatorId([1; 20]),
            power: 10,
        }];
        store.seed_genesis(&Params::default(), &set).expect("seed");
        assert!(store.is_initialized().expect("check"));
        assert_eq!(store.params().expect("params"), Params::default());
        assert_eq!(store.active_validators().expect("validators"), set);
    }

    #[test]
    fn test_store_errors() {
        let mut store = SqliteStore::open_memory().expect("open");
        assert!(matches!(store.params(), Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.latest_round_result(1),
            Err(StoreError::NotFound(_))
        ));

        let result = RoundResult {
            feeder_id: 1,
            round_id: 1,
            height: 10,
            price: Price::new(100, 2),
        };
        store.append_round_result(&result).expect("append");
        assert!(matches!(
            store.append_round_result(&result),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_rollback_discards_batch() {
        let mut store = SqliteStore::open_memory().expect("open");
        store.seed_genesis(&Params::default(), &[]).expect("seed");
        store.set_validator_update_block(5).expect("marker");

        store.begin_batch().expect("begin");
        assert!(store.begin_batch().is_err());
        store.set_validator_update_block(9).expect("marker");
        store
            .append_round_result(&RoundResult {
                feeder_id: 1,
                round_id: 1,
                height: 9,
                price: Price::new(100, 2),
            })
            .expect("append");
        store.rollback_batch().expect("rollback");

        assert_eq!(store.validator_update_block().expect("marker"), Some(5));
        assert!(store.round_results(1).expect("results").is_empty());

        store.begin_batch().expect("begin");
        store.set_validator_update_block(9).expect("marker");
        store.commit_batch().expect("commit");
        assert_eq!(store.validator_update_block().expect("marker"), Some(9));
    }

    #[test]
    fn test_carried_rounds_replaced() {
        let mut store = SqliteStore::open_memory().expect("open");
        let round = CarriedRound {
            feeder_id: 1,
            round_id: 3,
            votes: Vec::new(),
        };
        store.set_carried_rounds(&[round.clone()]).expect("set");
        assert_eq!(store.carried_rounds().expect("read"), vec![round]);
        store.set_carried_rounds(&[]).expect("clear");
        assert!(store.carried_rounds().expect("read").is_empty());
    }
}
