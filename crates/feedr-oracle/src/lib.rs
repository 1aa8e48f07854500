//! # feedr-oracle
//!
//! Power-weighted price aggregation executed inside block processing.
//!
//! Validators submit prices for token feeders; at every round boundary the
//! aggregator combines the votes of the round into one canonical price.
//! All state transitions are deterministic, and the in-memory state can be
//! rebuilt after a restart by replaying a bounded window of persisted
//! submissions.
//!
//! ## Modules
//!
//! - [`aggregator`]: Round state machine, nonce windows and the aggregation rule
//! - [`cache`]: Per-block typed scratchpad with commit and skip-persist
//! - [`recovery`]: Cold-start initialization and bounded replay
//! - [`service`]: Process-wide service object driving block execution
//! - [`store`]: Durable store contracts and an in-memory implementation

pub mod aggregator;
pub mod cache;
pub mod recovery;
pub mod service;
pub mod store;

use feedr_types::{FeederId, Height, ParamsError, ValidatorId};
use serde::{Deserialize, Serialize};

pub use aggregator::{
    AggregatorContext, CarriedRound, CarriedVote, IngestOutcome, NotFinalized, RoundOutcome,
    RoundStatus,
};
pub use service::OracleService;
pub use store::{MemoryStore, OracleStore, StoreError, ValidatorSource};

/// Which of the two logical execution paths an operation runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Block execution; effects become durable at the end of the block.
    Committed,
    /// Pre-inclusion validation on a disposable copy.
    Speculative,
}

/// The block being executed, as seen by the oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockContext {
    pub height: Height,
    pub mode: ExecMode,
}

impl BlockContext {
    pub fn committed(height: Height) -> Self {
        Self {
            height,
            mode: ExecMode::Committed,
        }
    }

    pub fn speculative(height: Height) -> Self {
        Self {
            height,
            mode: ExecMode::Speculative,
        }
    }
}

/// Why a price submission was rejected.
///
/// Rejections are reported to the submitter and never affect other
/// submissions or round state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("unknown feeder {0}")]
    UnknownFeeder(FeederId),

    #[error("feeder {0} is not active")]
    FeederInactive(FeederId),

    #[error("feeder {feeder_id} does not accept submissions at height {height}")]
    RoundNotOpen {
        /// The feeder addressed.
        feeder_id: FeederId,
        /// Height of inclusion.
        height: Height,
    },

    #[error("{0} is not an active validator")]
    UnknownValidator(ValidatorId),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("stale nonce {nonce}: window starts at {floor}")]
    StaleNonce {
        /// The submitted nonce.
        nonce: u64,
        /// Lowest nonce still inside the window.
        floor: u64,
    },

    #[error("nonce limit of {limit} submissions per round reached")]
    NonceLimitReached {
        /// Configured `max_nonce`.
        limit: u32,
    },

    #[error("round would track more than {limit} sources")]
    TooManySources {
        /// Configured `max_det_id`.
        limit: u32,
    },
}

/// Error types for oracle operations.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// A submission was rejected; recoverable at the call site.
    #[error("submission rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("invalid params: {0}")]
    InvalidParams(#[from] ParamsError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("total validator power overflows u64")]
    PowerOverflow,

    /// Historical state needed to rebuild the aggregator is missing or
    /// inconsistent. The host must halt.
    #[error("recovery failed at height {height}: {reason}")]
    Recovery {
        /// Height at which recovery was attempted.
        height: Height,
        /// What was missing or inconsistent.
        reason: String,
    },
}

impl OracleError {
    /// Whether block processing must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            OracleError::Rejected(_) | OracleError::InvalidParams(_) => false,
            OracleError::Store(StoreError::NotFound(_)) => false,
            OracleError::Store(_) | OracleError::PowerOverflow | OracleError::Recovery { .. } => {
                true
            }
        }
    }
}

/// Convenience result type for oracle operations.
pub type Result<T> = std::result::Result<T, OracleError>;
