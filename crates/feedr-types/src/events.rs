//! Outcome events emitted by the node for each processed block.

use serde::{Deserialize, Serialize};

use crate::{FeederId, Height, Price, RoundId, ValidatorId};

/// Envelope for all node events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub height: Height,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RoundFinalized,
    RoundNotFinalized,
    SubmissionRejected,
    ParamsUpdated,
    ValidatorSetChanged,
}

/// Payload of [`EventType::RoundFinalized`] and [`EventType::RoundNotFinalized`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundEvent {
    pub feeder_id: FeederId,
    pub round_id: RoundId,
    pub price: Option<Price>,
    /// Why the round did not finalize.
    pub reason: Option<String>,
}

/// Payload of [`EventType::SubmissionRejected`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RejectionEvent {
    pub validator: ValidatorId,
    pub feeder_id: FeederId,
    pub nonce: u64,
    pub reason: String,
}
