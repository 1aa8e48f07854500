//! The aggregator context.
//!
//! Owns the active parameters, the validator power table and the open
//! round of every feeder. It performs no I/O: persisting what a round
//! produced is the caller's job, which lets live execution, replay and
//! speculative validation drive the exact same transitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use feedr_types::{FeederId, Height, Params, PriceSubmission, SourceId};
use tracing::{debug, info};

use super::calculator;
use super::nonce::NonceCheck;
use super::round::{CarriedRound, FeederRound};
use super::{IngestOutcome, NotFinalized, PowerTable, RoundOutcome, RoundStatus};
use crate::{ExecMode, Rejection};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregatorContext {
    params: Arc<Params>,
    powers: PowerTable,
    rounds: BTreeMap<FeederId, FeederRound>,
}

impl AggregatorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn powers(&self) -> &PowerTable {
        &self.powers
    }

    /// Open round of a feeder, if one is tracked.
    pub fn round(&self, feeder_id: FeederId) -> Option<&FeederRound> {
        self.rounds.get(&feeder_id)
    }

    /// Replace the power table. Returns whether it changed.
    pub fn set_validator_powers(&mut self, powers: PowerTable) -> bool {
        if self.powers == powers {
            return false;
        }
        self.powers = powers;
        true
    }

    /// Replace the active parameters.
    ///
    /// Feeders whose configuration changed or that were removed lose their
    /// in-flight round. A new `max_nonce` resizes the submission window and
    /// the replay history, so it drops every in-flight round.
    pub fn set_params(&mut self, params: Arc<Params>) {
        if *self.params == *params {
            return;
        }
        let window_changed = self.params.max_nonce != params.max_nonce;
        self.rounds.retain(|feeder_id, _| {
            !window_changed
                && self.params.feeder(*feeder_id).is_some()
                && self.params.feeder(*feeder_id) == params.feeder(*feeder_id)
        });
        self.params = params;
    }

    /// Prices carried into the open rounds, one record per feeder.
    pub fn carried_rounds(&self) -> Vec<CarriedRound> {
        self.rounds
            .iter()
            .filter_map(|(feeder_id, round)| round.carried_record(*feeder_id))
            .collect()
    }

    /// Set the carried prices of every tracked round from `records`.
    ///
    /// Rounds without a matching record lose whatever they carried.
    pub fn restore_carried(&mut self, records: &[CarriedRound]) {
        for (feeder_id, round) in &mut self.rounds {
            let record = records
                .iter()
                .find(|r| r.feeder_id == *feeder_id && r.round_id == round.round_id());
            round.restore_carried(record);
        }
    }

    /// Validate a submission included at `height` without recording it.
    pub fn check(
        &self,
        msg: &PriceSubmission,
        height: Height,
    ) -> Result<IngestOutcome, Rejection> {
        let round_id = self.validate_envelope(msg, height)?;
        let check = match self.rounds.get(&msg.feeder_id) {
            Some(round) if round.round_id() == round_id => {
                round.check(msg, self.params.max_nonce, self.params.max_det_id)?
            }
            _ => FeederRound::new(round_id).check(
                msg,
                self.params.max_nonce,
                self.params.max_det_id,
            )?,
        };
        Ok(match check {
            NonceCheck::Fresh => IngestOutcome::Accepted,
            NonceCheck::Duplicate => IngestOutcome::Duplicate,
        })
    }

    /// Validate and record a submission included at `height`.
    pub fn ingest(
        &mut self,
        msg: &PriceSubmission,
        height: Height,
    ) -> Result<IngestOutcome, Rejection> {
        let outcome = self.check(msg, height)?;
        if outcome == IngestOutcome::Duplicate {
            debug!(feeder = msg.feeder_id, validator = %msg.validator, nonce = msg.nonce, "duplicate submission");
            return Ok(outcome);
        }

        // check() succeeded, so the feeder exists and has a round here
        let round_id = self
            .params
            .feeder(msg.feeder_id)
            .and_then(|f| f.round_at(height))
            .ok_or(Rejection::UnknownFeeder(msg.feeder_id))?;
        let round = self
            .rounds
            .entry(msg.feeder_id)
            .and_modify(|r| {
                if r.round_id() != round_id {
                    *r = FeederRound::new(round_id);
                }
            })
            .or_insert_with(|| FeederRound::new(round_id));
        round.record(msg, self.params.max_nonce);

        debug!(
            feeder = msg.feeder_id,
            round = round_id,
            validator = %msg.validator,
            nonce = msg.nonce,
            "submission recorded"
        );
        Ok(outcome)
    }

    /// Everything that does not depend on round state.
    fn validate_envelope(&self, msg: &PriceSubmission, height: Height) -> Result<u64, Rejection> {
        let feeder = self
            .params
            .feeder(msg.feeder_id)
            .ok_or(Rejection::UnknownFeeder(msg.feeder_id))?;
        if !feeder.active {
            return Err(Rejection::FeederInactive(feeder.id));
        }
        let round_id = feeder
            .round_at(height)
            .ok_or(Rejection::FeederInactive(feeder.id))?;
        if !feeder.accepts_at(height, self.params.max_nonce) {
            return Err(Rejection::RoundNotOpen {
                feeder_id: feeder.id,
                height,
            });
        }
        if self.powers.power_of(&msg.validator).is_none() {
            return Err(Rejection::UnknownValidator(msg.validator));
        }

        if msg.sources.is_empty() {
            return Err(Rejection::InvalidPrice("no sources".to_string()));
        }
        let mut sources: Vec<SourceId> = Vec::with_capacity(msg.sources.len());
        for source in &msg.sources {
            if source.price.value == 0 {
                return Err(Rejection::InvalidPrice(format!(
                    "zero price for source {}",
                    source.source_id
                )));
            }
            if source.price.decimal != feeder.decimal {
                return Err(Rejection::InvalidPrice(format!(
                    "decimal {} does not match feeder decimal {}",
                    source.price.decimal, feeder.decimal
                )));
            }
            if sources.contains(&source.source_id) {
                return Err(Rejection::InvalidPrice(format!(
                    "source {} listed twice",
                    source.source_id
                )));
            }
            sources.push(source.source_id);
        }
        Ok(round_id)
    }

    /// Close every round whose boundary is `height`.
    ///
    /// Each closed round yields exactly one outcome and its feeder goes back
    /// to `Empty`. A round that missed ThresholdB carries its votes into the
    /// next round of the feeder, where they are evaluated again. In
    /// speculative mode the same outcomes are computed on the speculative
    /// copy; nothing here is ever persisted.
    pub fn close_round(&mut self, height: Height, mode: ExecMode) -> Vec<RoundOutcome> {
        let mut outcomes = Vec::new();
        for feeder in self.params.feeders.iter().filter(|f| f.active) {
            let Some(round_id) = feeder.round_ending_at(height) else {
                continue;
            };
            let status = match self.rounds.remove(&feeder.id) {
                Some(round) if round.round_id() == round_id => {
                    let votes = round.effective_votes();
                    match calculator::aggregate(&votes, &self.powers, &self.params, feeder.decimal) {
                        Ok(price) => RoundStatus::Finalized(price),
                        Err(reason @ NotFinalized::ThresholdNotMet { .. }) => {
                            let next = round.carry_into(round_id + 1);
                            if next.has_votes() {
                                self.rounds.insert(feeder.id, next);
                            }
                            RoundStatus::NotFinalized(reason)
                        }
                        Err(reason) => RoundStatus::NotFinalized(reason),
                    }
                }
                _ => RoundStatus::NotFinalized(NotFinalized::NoSubmissions),
            };

            match (&status, mode) {
                (RoundStatus::Finalized(price), ExecMode::Committed) => {
                    info!(feeder = feeder.id, round = round_id, height, %price, "round finalized");
                }
                (RoundStatus::NotFinalized(reason), ExecMode::Committed) => {
                    info!(feeder = feeder.id, round = round_id, height, %reason, "round not finalized");
                }
                (_, ExecMode::Speculative) => {
                    debug!(feeder = feeder.id, round = round_id, height, ?status, "round preview");
                }
            }

            outcomes.push(RoundOutcome {
                feeder_id: feeder.id,
                round_id,
                status,
            });
        }
        outcomes
    }

    /// Abort every round holding votes, as required when the validator set
    /// changes mid-round. All round and nonce state is dropped.
    pub fn force_seal(&mut self, height: Height) -> Vec<RoundOutcome> {
        let rounds = std::mem::take(&mut self.rounds);
        let outcomes: Vec<RoundOutcome> = rounds
            .into_iter()
            .filter(|(_, round)| round.has_votes())
            .map(|(feeder_id, round)| RoundOutcome {
                feeder_id,
                round_id: round.round_id(),
                status: RoundStatus::NotFinalized(NotFinalized::ValidatorSetChanged),
            })
            .collect();
        if !outcomes.is_empty() {
            info!(height, aborted = outcomes.len(), "force sealed open rounds");
        }
        outcomes
    }

    /// Align tracked rounds with the rounds open at `height + 1`.
    ///
    /// Every active feeder gets an entry for its next round; stale entries
    /// and entries of inactive or removed feeders are dropped.
    pub fn prepare_round_end(&mut self, height: Height) {
        let next = height.saturating_add(1);
        let mut rounds = BTreeMap::new();
        for feeder in self.params.feeders.iter().filter(|f| f.active) {
            let Some(round_id) = feeder.round_at(next) else {
                continue;
            };
            let round = match self.rounds.remove(&feeder.id) {
                Some(round) if round.round_id() == round_id => round,
                _ => FeederRound::new(round_id),
            };
            rounds.insert(feeder.id, round);
        }
        self.rounds = rounds;
    }

    /// An independent copy for speculative execution.
    ///
    /// Parameters are shared through the `Arc`; round and nonce state is
    /// deep-copied.
    pub fn snapshot_for_speculative_execution(&self) -> Self {
        self.clone()
    }
}
