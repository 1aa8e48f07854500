//! Prices and finalized round results.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{FeederId, Height, RoundId};

/// An integer price with an explicit decimal exponent.
///
/// `Price { value: 1000, decimal: 2 }` reads as `10.00`. The value is
/// serialized as a decimal string since it may exceed 64 bits.
#[serde_as]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price {
    #[serde_as(as = "DisplayFromStr")]
    pub value: u128,
    pub decimal: u8,
}

impl Price {
    pub fn new(value: u128, decimal: u8) -> Self {
        Self { value, decimal }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}e-{}", self.value, self.decimal)
    }
}

/// The canonical price finalized for one `(feeder, round)` pair.
///
/// Written once; the per-feeder history is append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub feeder_id: FeederId,
    pub round_id: RoundId,
    /// Height of the block that finalized the round.
    pub height: Height,
    pub price: Price,
}
