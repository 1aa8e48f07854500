//! Process-wide oracle service.
//!
//! [`OracleService`] owns the durable store, the per-block cache and the two
//! aggregator contexts: the committed one, advanced by block execution, and
//! the speculative one, a disposable copy used to validate submissions
//! before inclusion. The host drives it once per block:
//!
//! ```text
//! begin_block(h) → submit_price(h, ..)* → update_params(h, ..)? → end_block(h)
//! ```
//!
//! The committed context is rebuilt from durable state on first use, so a
//! fresh process resumes wherever the store left off.

use std::sync::Arc;

use feedr_types::{FeederId, Height, Params, Price, PriceSubmission, RoundResult};
use tracing::{debug, info, warn};

use crate::aggregator::{AggregatorContext, IngestOutcome, PowerTable, RoundOutcome};
use crate::cache::{Cache, ItemCarried, ItemParams, ItemValidators};
use crate::recovery;
use crate::store::{OracleStore, StoreResult, ValidatorSource};
use crate::{BlockContext, ExecMode, Result};

/// Whether sealing a round writes its result to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Persist {
    Write,
    /// Replay: the results were written when the block first executed.
    Suppress,
}

/// Close the rounds ending at `height` and optionally persist the
/// finalized ones.
pub(crate) fn seal_round<S: OracleStore>(
    agc: &mut AggregatorContext,
    store: &mut S,
    height: Height,
    mode: ExecMode,
    persist: Persist,
) -> Result<Vec<RoundOutcome>> {
    let outcomes = agc.close_round(height, mode);
    if persist == Persist::Write {
        for outcome in &outcomes {
            if let Some(price) = outcome.price() {
                store.append_round_result(&RoundResult {
                    feeder_id: outcome.feeder_id,
                    round_id: outcome.round_id,
                    height,
                    price,
                })?;
            }
        }
    }
    Ok(outcomes)
}

/// The oracle as seen by the block-processing host.
pub struct OracleService<S> {
    store: S,
    cache: Cache,
    committed: Option<AggregatorContext>,
    speculative: Option<AggregatorContext>,
}

impl<S> OracleService<S>
where
    S: OracleStore + ValidatorSource,
{
    /// Wrap a store. No state is read until the first block.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: Cache::new(),
            committed: None,
            speculative: None,
        }
    }

    /// Eagerly build the committed context for the block at `ctx.height`.
    pub fn init(&mut self, ctx: &BlockContext) -> Result<()> {
        self.committed_mut(ctx.height).map(|_| ())
    }

    /// Forget everything scoped to the previous block. Call once at the
    /// start of every block, before any other call for it.
    ///
    /// If that block never reached `end_block`, its submissions are still
    /// in the committed context; the context is dropped and rebuilt from
    /// the store on next use.
    pub fn reset_per_block(&mut self) {
        self.speculative = None;
        if self.cache.has_uncommitted() {
            debug!("discarding state of an unfinished block");
            self.committed = None;
        }
        self.cache.reset();
        if let Some(agc) = &self.committed {
            self.cache.prime(ItemParams(agc.params().clone()));
            self.cache.prime(ItemValidators(agc.powers().as_map().clone()));
            self.cache.prime(ItemCarried(agc.carried_rounds()));
        }
    }

    /// Stop the service and hand back the store.
    pub fn shutdown(self) -> S {
        info!("oracle service shut down");
        self.store
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the store, for collaborators such as staking that
    /// share it.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The committed context, if it has been built.
    pub fn committed_context(&self) -> Option<&AggregatorContext> {
        self.committed.as_ref()
    }

    /// Make sure the context for `ctx.mode` exists.
    ///
    /// # Errors
    ///
    /// - [`OracleError::Recovery`](crate::OracleError::Recovery) if the
    ///   committed context cannot be rebuilt
    pub fn begin_block(&mut self, ctx: &BlockContext) -> Result<()> {
        match ctx.mode {
            ExecMode::Committed => self.committed_mut(ctx.height).map(|_| ()),
            ExecMode::Speculative => self.speculative_mut(ctx.height).map(|_| ()),
        }
    }

    /// Validate and record a price submission included at `ctx.height`.
    ///
    /// # Errors
    ///
    /// - [`OracleError::Rejected`](crate::OracleError::Rejected) with the
    ///   reason the submission was refused
    /// - [`OracleError::Recovery`](crate::OracleError::Recovery) if the
    ///   context had to be rebuilt and could not be
    pub fn submit_price(
        &mut self,
        ctx: &BlockContext,
        msg: PriceSubmission,
    ) -> Result<IngestOutcome> {
        match ctx.mode {
            ExecMode::Committed => {
                let outcome = self.committed_mut(ctx.height)?.ingest(&msg, ctx.height)?;
                if outcome == IngestOutcome::Accepted {
                    self.cache.append_msg(msg);
                }
                Ok(outcome)
            }
            ExecMode::Speculative => Ok(self.speculative_mut(ctx.height)?.ingest(&msg, ctx.height)?),
        }
    }

    /// Schedule a parameter update. It takes effect after the current
    /// block; a later update in the same block replaces an earlier one.
    pub fn update_params(&mut self, ctx: &BlockContext, params: Params) -> Result<()> {
        params.validate()?;
        if ctx.mode == ExecMode::Committed {
            // the context must exist first: building it resets the cache
            self.committed_mut(ctx.height)?;
            debug!(height = ctx.height, feeders = params.feeders.len(), "params update scheduled");
            self.cache.put(ItemParams(params));
        }
        Ok(())
    }

    /// Close the rounds ending at `ctx.height`.
    ///
    /// Committed: finalized prices are appended to the store. Speculative:
    /// the outcomes are a preview computed on the speculative copy.
    pub fn advance_to(&mut self, ctx: &BlockContext) -> Result<Vec<RoundOutcome>> {
        match ctx.mode {
            ExecMode::Committed => {
                let mut agc = self.take_committed(ctx.height)?;
                let outcomes = self.write_atomically(|svc| {
                    seal_round(
                        &mut agc,
                        &mut svc.store,
                        ctx.height,
                        ExecMode::Committed,
                        Persist::Write,
                    )
                })?;
                self.committed = Some(agc);
                Ok(outcomes)
            }
            ExecMode::Speculative => Ok(self
                .speculative_mut(ctx.height)?
                .close_round(ctx.height, ExecMode::Speculative)),
        }
    }

    /// Finish the block at `ctx.height`.
    ///
    /// Closes due rounds, reacts to validator-set and parameter changes,
    /// prepares the rounds of the next block and commits the cache. All
    /// writes of the block become durable together. The speculative copy
    /// is dropped. On error nothing is written, and the committed context
    /// is discarded and rebuilt from the store on next use.
    pub fn end_block(&mut self, ctx: &BlockContext) -> Result<Vec<RoundOutcome>> {
        if ctx.mode == ExecMode::Speculative {
            return self.advance_to(ctx);
        }

        let mut agc = self.take_committed(ctx.height)?;
        let outcomes = self.write_atomically(|svc| svc.finish_block(&mut agc, ctx.height))?;
        self.committed = Some(agc);
        self.speculative = None;
        Ok(outcomes)
    }

    fn finish_block(&mut self, agc: &mut AggregatorContext, height: Height) -> Result<Vec<RoundOutcome>> {
        let mut outcomes = seal_round(agc, &mut self.store, height, ExecMode::Committed, Persist::Write)?;

        let mut known = ItemValidators(agc.powers().as_map().clone());
        self.cache.get(&mut known);
        let powers = PowerTable::from_validators(&self.store.active_validators()?)?;
        if *powers.as_map() != known.0 {
            outcomes.extend(agc.force_seal(height));
            info!(
                height,
                validators = powers.len(),
                total_power = powers.total(),
                "validator set changed"
            );
            self.cache.put(ItemValidators(powers.as_map().clone()));
            agc.set_validator_powers(powers);
        }

        let mut scheduled = ItemParams(agc.params().clone());
        if self.cache.get(&mut scheduled) && scheduled.0 != *agc.params() {
            self.store.set_params(&scheduled.0)?;
            agc.set_params(Arc::new(scheduled.0));
            info!(height, "params updated");
        }

        agc.prepare_round_end(height);

        let carried = agc.carried_rounds();
        let mut known = ItemCarried::default();
        if !self.cache.get(&mut known) || known.0 != carried {
            self.cache.put(ItemCarried(carried));
        }

        self.cache
            .commit(&mut self.store, height, agc.params().max_nonce)?;
        Ok(outcomes)
    }

    /// Run `f` inside a store batch. On failure the batch is rolled back
    /// and the block's cached state is dropped.
    fn write_atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.store.begin_batch()?;
        let result = f(self).and_then(|value| {
            self.store.commit_batch()?;
            Ok(value)
        });
        if let Err(e) = &result {
            warn!(error = %e, "block writes rolled back");
            if let Err(rollback) = self.store.rollback_batch() {
                warn!(error = %rollback, "rollback failed");
            }
            self.cache.reset();
            self.speculative = None;
        }
        result
    }

    /// Most recent finalized price of a feeder.
    pub fn get_latest_price(&self, feeder_id: FeederId) -> StoreResult<Price> {
        self.store.latest_round_result(feeder_id).map(|r| r.price)
    }

    /// Price of a feeder as it stood at `height`.
    pub fn get_price_at(&self, feeder_id: FeederId, height: Height) -> StoreResult<Price> {
        self.store
            .round_result_at(feeder_id, height)
            .map(|r| r.price)
    }

    fn take_committed(&mut self, height: Height) -> Result<AggregatorContext> {
        match self.committed.take() {
            Some(agc) => Ok(agc),
            None => recovery::recover(&mut self.store, &mut self.cache, height),
        }
    }

    fn committed_mut(&mut self, height: Height) -> Result<&mut AggregatorContext> {
        let agc = self.take_committed(height)?;
        Ok(self.committed.insert(agc))
    }

    fn speculative_mut(&mut self, height: Height) -> Result<&mut AggregatorContext> {
        let agc = match self.speculative.take() {
            Some(agc) => agc,
            None => self
                .committed_mut(height)?
                .snapshot_for_speculative_execution(),
        };
        Ok(self.speculative.insert(agc))
    }
}
