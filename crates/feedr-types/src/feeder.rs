//! Token feeder configuration and round arithmetic.
//!
//! Round `r` (1-based) of a feeder ends at
//! `start_height + r * interval` and covers the heights
//! `(end - interval, end]`. Only the last `min(max_nonce, interval)`
//! heights of a round accept submissions.

use serde::{Deserialize, Serialize};

use crate::{FeederId, Height, RoundId};

/// A configured asset price stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFeeder {
    pub id: FeederId,
    /// Rounds start counting after this height.
    pub start_height: Height,
    /// Round length in blocks. Must be >= 1.
    pub interval: u64,
    /// Decimal exponent every submitted price must carry.
    pub decimal: u8,
    pub active: bool,
}

impl TokenFeeder {
    /// Round covering `height`, or `None` before the feeder starts.
    pub fn round_at(&self, height: Height) -> Option<RoundId> {
        if height <= self.start_height || self.interval == 0 {
            return None;
        }
        let elapsed = height - self.start_height;
        Some(elapsed.div_ceil(self.interval))
    }

    /// Height at which `round` closes.
    pub fn round_end(&self, round: RoundId) -> Height {
        self.start_height
            .saturating_add(round.saturating_mul(self.interval))
    }

    /// Round that closes exactly at `height`, if any.
    pub fn round_ending_at(&self, height: Height) -> Option<RoundId> {
        let round = self.round_at(height)?;
        (self.round_end(round) == height).then_some(round)
    }

    /// Number of trailing heights of a round that accept submissions.
    pub fn submission_window(&self, max_nonce: u32) -> u64 {
        self.interval.min(u64::from(max_nonce)).max(1)
    }

    /// Whether a submission included at `height` falls inside the
    /// submission window of its round.
    pub fn accepts_at(&self, height: Height, max_nonce: u32) -> bool {
        match self.round_at(height) {
            Some(round) => {
                let end = self.round_end(round);
                end - height < self.submission_window(max_nonce)
            }
            None => false,
        }
    }
}
