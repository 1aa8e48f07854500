//! # feedr-types
//!
//! Shared domain types used across the feedr workspace: token feeders,
//! prices, submissions, aggregation parameters and validator identities.

pub mod events;
pub mod feeder;
pub mod message;
pub mod params;
pub mod price;
pub mod validator;

pub use events::{Event, EventType, RejectionEvent, RoundEvent};
pub use feeder::TokenFeeder;
pub use message::{PriceSubmission, SourcePrice};
pub use params::{Mode, Params, ParamsError};
pub use price::{Price, RoundResult};
pub use validator::{ValidatorId, ValidatorPower};

/// Block height.
pub type Height = u64;
/// Stable numeric identifier of a token feeder.
pub type FeederId = u64;
/// 1-based round number within a feeder.
pub type RoundId = u64;
/// Identifier of a price source (exchange, chain, aggregator).
pub type SourceId = u64;

/// Length of a validator consensus address in bytes.
pub const VALIDATOR_ADDRESS_LEN: usize = 20;

/// Percentage denominator used by aggregation thresholds.
pub const THRESHOLD_DENOMINATOR: u32 = 100;
