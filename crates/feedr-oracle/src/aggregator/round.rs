//! Accumulated votes of one feeder round.

use std::collections::{BTreeMap, BTreeSet};

use feedr_types::{FeederId, Price, PriceSubmission, RoundId, SourceId, ValidatorId};
use serde::{Deserialize, Serialize};

use super::nonce::{NonceCheck, NonceWindow};
use crate::Rejection;

/// A validator's current vote for one source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vote {
    pub nonce: u64,
    pub price: Price,
}

/// Round lifecycle as seen from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    Empty,
    Accumulating,
}

/// Prices a round that missed ThresholdB hands to the next round of its
/// feeder, in the form the store keeps them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarriedRound {
    pub feeder_id: FeederId,
    /// The round the prices were carried into.
    pub round_id: RoundId,
    pub votes: Vec<CarriedVote>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarriedVote {
    pub source_id: SourceId,
    pub validator: ValidatorId,
    pub price: Price,
}

/// Votes and nonce windows of the open round of one feeder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeederRound {
    round_id: RoundId,
    votes: BTreeMap<SourceId, BTreeMap<ValidatorId, Vote>>,
    nonces: BTreeMap<ValidatorId, NonceWindow>,
    /// Prices inherited from the previous round.
    carried: BTreeMap<SourceId, BTreeMap<ValidatorId, Price>>,
}

impl FeederRound {
    pub fn new(round_id: RoundId) -> Self {
        Self {
            round_id,
            votes: BTreeMap::new(),
            nonces: BTreeMap::new(),
            carried: BTreeMap::new(),
        }
    }

    /// Open round `next` holding this round's own votes as carried prices.
    ///
    /// Only votes cast in this round move on; what this round inherited
    /// itself is dropped, so a price is carried at most once.
    pub fn carry_into(&self, next: RoundId) -> Self {
        let mut round = Self::new(next);
        round.carried = self
            .votes
            .iter()
            .map(|(source_id, by_validator)| {
                let prices = by_validator
                    .iter()
                    .map(|(validator, vote)| (*validator, vote.price))
                    .collect();
                (*source_id, prices)
            })
            .collect();
        round
    }

    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Carried prices alone leave a round `Empty`.
    pub fn state(&self) -> RoundState {
        if self.votes.is_empty() {
            RoundState::Empty
        } else {
            RoundState::Accumulating
        }
    }

    /// Votes cast in this round.
    pub fn votes(&self) -> &BTreeMap<SourceId, BTreeMap<ValidatorId, Vote>> {
        &self.votes
    }

    pub fn carried(&self) -> &BTreeMap<SourceId, BTreeMap<ValidatorId, Price>> {
        &self.carried
    }

    /// Whether the round holds any price, cast or carried.
    pub fn has_votes(&self) -> bool {
        !self.votes.is_empty() || !self.carried.is_empty()
    }

    /// The votes the round is evaluated on: carried prices, overridden by
    /// any vote the same validator cast for the same source in this round.
    pub fn effective_votes(&self) -> BTreeMap<SourceId, BTreeMap<ValidatorId, Vote>> {
        let mut effective: BTreeMap<SourceId, BTreeMap<ValidatorId, Vote>> = self
            .carried
            .iter()
            .map(|(source_id, prices)| {
                let votes = prices
                    .iter()
                    .map(|(validator, price)| (*validator, Vote { nonce: 0, price: *price }))
                    .collect();
                (*source_id, votes)
            })
            .collect();
        for (source_id, by_validator) in &self.votes {
            effective
                .entry(*source_id)
                .or_default()
                .extend(by_validator.iter().map(|(v, vote)| (*v, *vote)));
        }
        effective
    }

    /// The carried prices in store form, if there are any.
    pub fn carried_record(&self, feeder_id: FeederId) -> Option<CarriedRound> {
        if self.carried.is_empty() {
            return None;
        }
        let votes = self
            .carried
            .iter()
            .flat_map(|(source_id, prices)| {
                prices.iter().map(move |(validator, price)| CarriedVote {
                    source_id: *source_id,
                    validator: *validator,
                    price: *price,
                })
            })
            .collect();
        Some(CarriedRound {
            feeder_id,
            round_id: self.round_id,
            votes,
        })
    }

    /// Replace the carried prices with `record`, or clear them.
    pub fn restore_carried(&mut self, record: Option<&CarriedRound>) {
        self.carried.clear();
        for vote in record.map(|r| r.votes.as_slice()).unwrap_or_default() {
            self.carried
                .entry(vote.source_id)
                .or_default()
                .insert(vote.validator, vote.price);
        }
    }

    /// Validate `msg` against this round without changing it.
    pub fn check(
        &self,
        msg: &PriceSubmission,
        max_nonce: u32,
        max_det_id: u32,
    ) -> Result<NonceCheck, Rejection> {
        let window = self.nonces.get(&msg.validator);
        let check = match window {
            Some(w) => w.check(msg.nonce, max_nonce)?,
            None => NonceWindow::default().check(msg.nonce, max_nonce)?,
        };
        if check == NonceCheck::Duplicate {
            return Ok(check);
        }

        let tracked: BTreeSet<SourceId> = self
            .votes
            .keys()
            .copied()
            .chain(msg.sources.iter().map(|s| s.source_id))
            .collect();
        if tracked.len() > max_det_id as usize {
            return Err(Rejection::TooManySources { limit: max_det_id });
        }
        Ok(check)
    }

    /// Record a submission that passed [`check`](Self::check) as fresh.
    ///
    /// For every source the vote with the highest nonce wins, whatever the
    /// arrival order.
    pub fn record(&mut self, msg: &PriceSubmission, max_nonce: u32) {
        self.nonces
            .entry(msg.validator)
            .or_default()
            .record(msg.nonce, max_nonce);

        for source in &msg.sources {
            let by_validator = self.votes.entry(source.source_id).or_default();
            let vote = Vote {
                nonce: msg.nonce,
                price: source.price,
            };
            by_validator
                .entry(msg.validator)
                .and_modify(|current| {
                    if vote.nonce > current.nonce {
                        *current = vote;
                    }
                })
                .or_insert(vote);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedr_types::SourcePrice;

    fn submission(validator: u8, nonce: u64, sources: &[(SourceId, u128)]) -> PriceSubmission {
        PriceSubmission {
            validator: ValidatorId([validator; 20]),
            feeder_id: 1,
            nonce,
            sources: sources
                .iter()
                .map(|(source_id, value)| SourcePrice {
                    source_id: *source_id,
                    price: Price::new(*value, 2),
                })
                .collect(),
        }
    }

    #[test]
    fn test_empty_then_accumulating() {
        let mut round = FeederRound::new(1);
        assert_eq!(round.state(), RoundState::Empty);
        let msg = submission(1, 1, &[(1, 1000)]);
        assert_eq!(round.check(&msg, 3, 5), Ok(NonceCheck::Fresh));
        round.record(&msg, 3);
        assert_eq!(round.state(), RoundState::Accumulating);
    }

    #[test]
    fn test_highest_nonce_wins_regardless_of_order() {
        let newer = submission(1, 2, &[(1, 2000)]);
        let older = submission(1, 1, &[(1, 1000)]);

        let mut a = FeederRound::new(1);
        a.record(&older, 3);
        a.record(&newer, 3);

        let mut b = FeederRound::new(1);
        b.record(&newer, 3);
        b.record(&older, 3);

        assert_eq!(a.votes(), b.votes());
        let vote = a.votes()[&1][&ValidatorId([1; 20])];
        assert_eq!(vote.price.value, 2000);
    }

    #[test]
    fn test_too_many_sources() {
        let mut round = FeederRound::new(1);
        round.record(&submission(1, 1, &[(1, 10), (2, 10)]), 3);
        let msg = submission(2, 1, &[(3, 10)]);
        assert_eq!(
            round.check(&msg, 3, 2),
            Err(Rejection::TooManySources { limit: 2 })
        );
        // already tracked sources stay within the cap
        let msg = submission(2, 1, &[(2, 10)]);
        assert_eq!(round.check(&msg, 3, 2), Ok(NonceCheck::Fresh));
    }

    #[test]
    fn test_carried_prices_yield_to_new_votes() {
        let mut failed = FeederRound::new(1);
        failed.record(&submission(1, 3, &[(1, 1000), (2, 500)]), 3);
        failed.record(&submission(2, 1, &[(1, 1001)]), 3);

        let mut next = failed.carry_into(2);
        assert_eq!(next.round_id(), 2);
        assert_eq!(next.state(), RoundState::Empty);
        assert!(next.has_votes());

        // a fresh nonce 1 overrides the carried nonce-3 vote
        next.record(&submission(1, 1, &[(1, 990)]), 3);
        let effective = next.effective_votes();
        assert_eq!(effective[&1][&ValidatorId([1; 20])].price.value, 990);
        assert_eq!(effective[&1][&ValidatorId([2; 20])].price.value, 1001);
        assert_eq!(effective[&2][&ValidatorId([1; 20])].price.value, 500);

        // carried prices move on only once
        let third = next.carry_into(3);
        assert_eq!(third.carried().len(), 1);
        assert_eq!(third.carried()[&1].len(), 1);
    }

    #[test]
    fn test_carried_record_restores_identically() {
        let mut failed = FeederRound::new(4);
        failed.record(&submission(1, 1, &[(1, 1000), (2, 500)]), 3);
        let next = failed.carry_into(5);
        let record = next.carried_record(7).expect("carried");
        assert_eq!(record.feeder_id, 7);
        assert_eq!(record.round_id, 5);
        assert_eq!(record.votes.len(), 2);

        let mut rebuilt = FeederRound::new(5);
        rebuilt.restore_carried(Some(&record));
        assert_eq!(rebuilt, next);
        rebuilt.restore_carried(None);
        assert_eq!(rebuilt, FeederRound::new(5));
        assert!(FeederRound::new(5).carried_record(7).is_none());
    }
}
