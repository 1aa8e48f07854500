//! Price submissions as carried in blocks and persisted for replay.

use serde::{Deserialize, Serialize};

use crate::{FeederId, Price, SourceId, ValidatorId};

/// One source's reported price inside a submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePrice {
    pub source_id: SourceId,
    pub price: Price,
}

/// A validator's price report for one feeder.
///
/// Signature checks happen upstream; by the time a submission reaches the
/// aggregator the `validator` field is trusted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSubmission {
    pub validator: ValidatorId,
    pub feeder_id: FeederId,
    pub nonce: u64,
    pub sources: Vec<SourcePrice>,
}

impl PriceSubmission {
    /// Submission reporting the same price for a single source.
    pub fn single(
        validator: ValidatorId,
        feeder_id: FeederId,
        nonce: u64,
        source_id: SourceId,
        price: Price,
    ) -> Self {
        Self {
            validator,
            feeder_id,
            nonce,
            sources: vec![SourcePrice { source_id, price }],
        }
    }
}
