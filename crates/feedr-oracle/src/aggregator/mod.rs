//! Round aggregation state machine.
//!
//! Per feeder a round moves `Empty` → `Accumulating` → `Closed`. A round
//! that misses ThresholdB hands its votes to the next round, which is
//! evaluated on both. Votes are held in ordered maps keyed by source and
//! validator, so the outcome of a round never depends on the order
//! submissions arrived in.
//!
//! ## Modules
//!
//! - [`calculator`]: Threshold filtering and the aggregation modes
//! - [`context`]: The aggregator context owning all round state
//! - [`nonce`]: Per-submitter sliding nonce windows
//! - [`round`]: Accumulated votes of one feeder round

pub mod calculator;
pub mod context;
pub mod nonce;
pub mod round;

use std::collections::BTreeMap;

use feedr_types::{FeederId, Price, RoundId, ValidatorId, ValidatorPower};
use serde::{Deserialize, Serialize};

use crate::{OracleError, Result};

pub use context::AggregatorContext;
pub use round::{CarriedRound, CarriedVote};

/// Result of ingesting one submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Votes were recorded.
    Accepted,
    /// The nonce was already accepted in this round; nothing changed.
    Duplicate,
}

/// Why a round closed without a price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum NotFinalized {
    #[error("no submissions")]
    NoSubmissions,

    #[error("accepted power {accepted} of {total} below threshold")]
    ThresholdNotMet {
        /// Power of validators backing an accepted value.
        accepted: u64,
        /// Total power of the validator set.
        total: u64,
    },

    #[error("weighted mean overflowed")]
    Overflow,

    #[error("validator set changed")]
    ValidatorSetChanged,
}

/// How a round ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Finalized(Price),
    NotFinalized(NotFinalized),
}

/// One entry of the round-advance report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub feeder_id: FeederId,
    pub round_id: RoundId,
    pub status: RoundStatus,
}

impl RoundOutcome {
    pub fn finalized(&self) -> bool {
        matches!(self.status, RoundStatus::Finalized(_))
    }

    pub fn price(&self) -> Option<Price> {
        match self.status {
            RoundStatus::Finalized(price) => Some(price),
            RoundStatus::NotFinalized(_) => None,
        }
    }
}

/// Validator voting power, replaced as a whole.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PowerTable {
    powers: BTreeMap<ValidatorId, u64>,
    total: u64,
}

impl PowerTable {
    /// Build a table from the active validator set.
    ///
    /// # Errors
    ///
    /// - [`OracleError::PowerOverflow`] if the total does not fit in `u64`
    pub fn from_validators(validators: &[ValidatorPower]) -> Result<Self> {
        let powers: BTreeMap<ValidatorId, u64> = validators
            .iter()
            .map(|v| (v.validator, v.power))
            .collect();
        Self::from_map(powers)
    }

    pub fn from_map(powers: BTreeMap<ValidatorId, u64>) -> Result<Self> {
        let total = powers
            .values()
            .try_fold(0u64, |acc, p| acc.checked_add(*p))
            .ok_or(OracleError::PowerOverflow)?;
        Ok(Self { powers, total })
    }

    pub fn power_of(&self, validator: &ValidatorId) -> Option<u64> {
        self.powers.get(validator).copied()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.powers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.powers.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<ValidatorId, u64> {
        &self.powers
    }
}
