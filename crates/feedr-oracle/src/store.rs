//! Durable store contracts.
//!
//! The oracle treats persistence as an opaque ordered key-value store. The
//! [`OracleStore`] trait covers everything the aggregator reads and writes:
//! live parameters, the bounded history of parameter snapshots and accepted
//! submissions, the last validator-set change, the prices carried into open
//! rounds and the append-only round results. [`ValidatorSource`] supplies
//! the active validator set.
//!
//! The writes of one block are grouped between [`OracleStore::begin_batch`]
//! and [`OracleStore::commit_batch`]; a block that fails midway is undone
//! with [`OracleStore::rollback_batch`].
//!
//! [`MemoryStore`] implements both for tests and embedding; the SQLite
//! backend lives in `feedr-db`.

use std::collections::BTreeMap;

use feedr_types::{FeederId, Height, Params, PriceSubmission, RoundResult, ValidatorPower};

use crate::aggregator::CarriedRound;

/// Store error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("corrupt entry: {0}")]
    Corrupt(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Convenience result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistent state consumed and produced by the oracle.
pub trait OracleStore {
    /// Live parameters. [`StoreError::NotFound`] before genesis.
    fn params(&self) -> StoreResult<Params>;

    fn set_params(&mut self, params: &Params) -> StoreResult<()>;

    /// Parameter snapshots keyed by the height they were written at.
    fn recent_params(&self) -> StoreResult<BTreeMap<Height, Params>>;

    fn set_recent_params(&mut self, height: Height, params: &Params) -> StoreResult<()>;

    /// Remove snapshots older than `keep_from`, except the newest of them,
    /// which is still the active snapshot at `keep_from`.
    fn prune_recent_params(&mut self, keep_from: Height) -> StoreResult<()>;

    /// Accepted submissions keyed by inclusion height.
    fn recent_msgs(&self) -> StoreResult<BTreeMap<Height, Vec<PriceSubmission>>>;

    fn set_recent_msgs(&mut self, height: Height, msgs: &[PriceSubmission]) -> StoreResult<()>;

    /// Remove submissions included before `keep_from`.
    fn prune_recent_msgs(&mut self, keep_from: Height) -> StoreResult<()>;

    /// Height of the last validator-set change, if one was ever recorded.
    fn validator_update_block(&self) -> StoreResult<Option<Height>>;

    fn set_validator_update_block(&mut self, height: Height) -> StoreResult<()>;

    /// Prices carried into the rounds open after the last committed block.
    fn carried_rounds(&self) -> StoreResult<Vec<CarriedRound>>;

    /// Replace all carried prices.
    fn set_carried_rounds(&mut self, carried: &[CarriedRound]) -> StoreResult<()>;

    /// Append a finalized round. [`StoreError::AlreadyExists`] if the
    /// `(feeder, round)` pair was already written.
    fn append_round_result(&mut self, result: &RoundResult) -> StoreResult<()>;

    /// Most recently finalized round of a feeder.
    fn latest_round_result(&self, feeder_id: FeederId) -> StoreResult<RoundResult>;

    /// Most recent round of a feeder finalized at or before `height`.
    fn round_result_at(&self, feeder_id: FeederId, height: Height) -> StoreResult<RoundResult>;

    /// Start grouping writes. Nothing written until
    /// [`commit_batch`](Self::commit_batch) is durable.
    fn begin_batch(&mut self) -> StoreResult<()>;

    fn commit_batch(&mut self) -> StoreResult<()>;

    /// Undo every write since [`begin_batch`](Self::begin_batch).
    fn rollback_batch(&mut self) -> StoreResult<()>;
}

/// Source of the authoritative active validator set.
pub trait ValidatorSource {
    fn active_validators(&self) -> StoreResult<Vec<ValidatorPower>>;
}

/// In-memory store.
///
/// Cloning a `MemoryStore` captures the durable state at that instant,
/// which is how tests simulate a crash and restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    params: Option<Params>,
    recent_params: BTreeMap<Height, Params>,
    recent_msgs: BTreeMap<Height, Vec<PriceSubmission>>,
    validator_update_block: Option<Height>,
    carried: Vec<CarriedRound>,
    results: BTreeMap<FeederId, BTreeMap<u64, RoundResult>>,
    validators: Vec<ValidatorPower>,
    /// State as of `begin_batch`.
    checkpoint: Option<Box<MemoryStore>>,
}

impl MemoryStore {
    /// Store seeded with genesis parameters and validators.
    pub fn with_genesis(params: Params, validators: Vec<ValidatorPower>) -> Self {
        Self {
            params: Some(params),
            validators,
            ..Self::default()
        }
    }

    /// Replace the active validator set (what staking would do).
    pub fn set_validators(&mut self, validators: Vec<ValidatorPower>) {
        self.validators = validators;
    }

    /// All finalized rounds of a feeder, oldest first.
    pub fn round_results(&self, feeder_id: FeederId) -> Vec<RoundResult> {
        self.results
            .get(&feeder_id)
            .map(|rounds| rounds.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl OracleStore for MemoryStore {
    fn params(&self) -> StoreResult<Params> {
        self.params
            .clone()
            .ok_or_else(|| StoreError::NotFound("params".to_string()))
    }

    fn set_params(&mut self, params: &Params) -> StoreResult<()> {
        self.params = Some(params.clone());
        Ok(())
    }

    fn recent_params(&self) -> StoreResult<BTreeMap<Height, Params>> {
        Ok(self.recent_params.clone())
    }

    fn set_recent_params(&mut self, height: Height, params: &Params) -> StoreResult<()> {
        self.recent_params.insert(height, params.clone());
        Ok(())
    }

    fn prune_recent_params(&mut self, keep_from: Height) -> StoreResult<()> {
        let newest_below = self.recent_params.range(..keep_from).next_back().map(|(h, _)| *h);
        if let Some(newest) = newest_below {
            self.recent_params.retain(|h, _| *h >= newest);
        }
        Ok(())
    }

    fn recent_msgs(&self) -> StoreResult<BTreeMap<Height, Vec<PriceSubmission>>> {
        Ok(self.recent_msgs.clone())
    }

    fn set_recent_msgs(&mut self, height: Height, msgs: &[PriceSubmission]) -> StoreResult<()> {
        self.recent_msgs.insert(height, msgs.to_vec());
        Ok(())
    }

    fn prune_recent_msgs(&mut self, keep_from: Height) -> StoreResult<()> {
        self.recent_msgs = self.recent_msgs.split_off(&keep_from);
        Ok(())
    }

    fn validator_update_block(&self) -> StoreResult<Option<Height>> {
        Ok(self.validator_update_block)
    }

    fn set_validator_update_block(&mut self, height: Height) -> StoreResult<()> {
        self.validator_update_block = Some(height);
        Ok(())
    }

    fn carried_rounds(&self) -> StoreResult<Vec<CarriedRound>> {
        Ok(self.carried.clone())
    }

    fn set_carried_rounds(&mut self, carried: &[CarriedRound]) -> StoreResult<()> {
        self.carried = carried.to_vec();
        Ok(())
    }

    fn append_round_result(&mut self, result: &RoundResult) -> StoreResult<()> {
        let rounds = self.results.entry(result.feeder_id).or_default();
        if rounds.contains_key(&result.round_id) {
            return Err(StoreError::AlreadyExists(format!(
                "round {} of feeder {}",
                result.round_id, result.feeder_id
            )));
        }
        rounds.insert(result.round_id, result.clone());
        Ok(())
    }

    fn latest_round_result(&self, feeder_id: FeederId) -> StoreResult<RoundResult> {
        self.results
            .get(&feeder_id)
            .and_then(|rounds| rounds.values().next_back())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("price of feeder {feeder_id}")))
    }

    fn round_result_at(&self, feeder_id: FeederId, height: Height) -> StoreResult<RoundResult> {
        self.results
            .get(&feeder_id)
            .and_then(|rounds| rounds.values().rev().find(|r| r.height <= height))
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("price of feeder {feeder_id} at height {height}"))
            })
    }

    fn begin_batch(&mut self) -> StoreResult<()> {
        if self.checkpoint.is_some() {
            return Err(StoreError::Backend("batch already open".to_string()));
        }
        self.checkpoint = Some(Box::new(self.clone()));
        Ok(())
    }

    fn commit_batch(&mut self) -> StoreResult<()> {
        self.checkpoint
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Backend("no open batch".to_string()))
    }

    fn rollback_batch(&mut self) -> StoreResult<()> {
        let saved = self
            .checkpoint
            .take()
            .ok_or_else(|| StoreError::Backend("no open batch".to_string()))?;
        *self = *saved;
        Ok(())
    }
}

impl ValidatorSource for MemoryStore {
    fn active_validators(&self) -> StoreResult<Vec<ValidatorPower>> {
        Ok(self.validators.clone())
    }
}
