//! Aggregation parameters.
//!
//! A parameter set is versioned by the height at which it was written:
//! a snapshot recorded at height `b` governs every height `> b`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{FeederId, TokenFeeder, THRESHOLD_DENOMINATOR};

/// Default nonce window and submission window length.
pub const DEFAULT_MAX_NONCE: u32 = 3;
/// Default per-value acceptance threshold (percent of total power).
pub const DEFAULT_THRESHOLD_A: u32 = 50;
/// Default round finalization threshold (percent of total power).
pub const DEFAULT_THRESHOLD_B: u32 = 67;
/// Default cap on distinct sources tracked per round.
pub const DEFAULT_MAX_DET_ID: u32 = 5;

/// Aggregation function applied to the accepted values of a round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Power-weighted lower median.
    #[default]
    Median,
    /// Power-weighted mean, rounded half up.
    WeightedMean,
    /// The value with the greatest backing power; ties go to the lower value.
    MaxPower,
}

/// Protocol parameters consumed by the aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Nonce window size, submission window length and replay depth.
    pub max_nonce: u32,
    /// Minimum backing power (percent) for a single source value.
    pub threshold_a: u32,
    /// Minimum accepted power (percent) to finalize a round.
    pub threshold_b: u32,
    /// Maximum distinct sources tracked per feeder round.
    pub max_det_id: u32,
    pub mode: Mode,
    pub feeders: Vec<TokenFeeder>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_nonce: DEFAULT_MAX_NONCE,
            threshold_a: DEFAULT_THRESHOLD_A,
            threshold_b: DEFAULT_THRESHOLD_B,
            max_det_id: DEFAULT_MAX_DET_ID,
            mode: Mode::default(),
            feeders: Vec::new(),
        }
    }
}

/// Reasons a parameter set is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    #[error("max_nonce must be at least 1")]
    ZeroMaxNonce,

    #[error("max_det_id must be at least 1")]
    ZeroMaxDetId,

    #[error("threshold {name} out of range: {value} (expected 1..=100)")]
    ThresholdOutOfRange {
        /// Which threshold.
        name: &'static str,
        /// The offending value.
        value: u32,
    },

    #[error("feeder {0} has a zero interval")]
    ZeroInterval(FeederId),

    #[error("duplicate feeder id {0}")]
    DuplicateFeeder(FeederId),
}

impl Params {
    /// Check structural validity.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.max_nonce == 0 {
            return Err(ParamsError::ZeroMaxNonce);
        }
        if self.max_det_id == 0 {
            return Err(ParamsError::ZeroMaxDetId);
        }
        for (name, value) in [("a", self.threshold_a), ("b", self.threshold_b)] {
            if value == 0 || value > THRESHOLD_DENOMINATOR {
                return Err(ParamsError::ThresholdOutOfRange { name, value });
            }
        }
        let mut seen = BTreeSet::new();
        for feeder in &self.feeders {
            if feeder.interval == 0 {
                return Err(ParamsError::ZeroInterval(feeder.id));
            }
            if !seen.insert(feeder.id) {
                return Err(ParamsError::DuplicateFeeder(feeder.id));
            }
        }
        Ok(())
    }

    pub fn feeder(&self, id: FeederId) -> Option<&TokenFeeder> {
        self.feeders.iter().find(|f| f.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feeder(id: FeederId) -> TokenFeeder {
        TokenFeeder {
            id,
            start_height: 0,
            interval: 10,
            decimal: 8,
            active: true,
        }
    }

    #[test]
    fn test_default_is_valid() {
        Params::default().validate().expect("default params");
    }

    #[test]
    fn test_threshold_bounds() {
        let mut p = Params::default();
        p.threshold_a = 0;
        assert_eq!(
            p.validate(),
            Err(ParamsError::ThresholdOutOfRange { name: "a", value: 0 })
        );
        p.threshold_a = 30;
        p.threshold_b = 101;
        assert_eq!(
            p.validate(),
            Err(ParamsError::ThresholdOutOfRange { name: "b", value: 101 })
        );
    }

    #[test]
    fn test_duplicate_feeder() {
        let mut p = Params::default();
        p.feeders = vec![feeder(1), feeder(2), feeder(1)];
        assert_eq!(p.validate(), Err(ParamsError::DuplicateFeeder(1)));
    }

    #[test]
    fn test_zero_interval() {
        let mut p = Params::default();
        let mut f = feeder(4);
        f.interval = 0;
        p.feeders.push(f);
        assert_eq!(p.validate(), Err(ParamsError::ZeroInterval(4)));
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&Mode::WeightedMean).expect("serialize");
        assert_eq!(json, "\"weighted_mean\"");
    }
}
