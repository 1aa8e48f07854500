//! Cold-start initialization and bounded replay.
//!
//! The aggregator context lives only in memory. After a restart it is
//! rebuilt from durable state: the live parameters, the recent parameter
//! snapshots, the accepted submissions of the last `max_nonce` blocks and
//! the height of the last validator-set change. Replaying those blocks
//! through the same transitions live execution uses yields a context
//! identical to the one the node held before it stopped. Prices carried
//! over from rounds that missed ThresholdB may predate the window; they are
//! read back from the store instead of replayed.

use std::collections::BTreeMap;
use std::sync::Arc;

use feedr_types::{Height, Params};
use tracing::{debug, info, warn};

use crate::aggregator::{AggregatorContext, PowerTable};
use crate::cache::{Cache, ItemCarried, ItemParams, ItemValidators};
use crate::service::{seal_round, Persist};
use crate::store::{OracleStore, StoreError, ValidatorSource};
use crate::{ExecMode, OracleError, Result};

fn recovery_error(height: Height, reason: impl Into<String>) -> OracleError {
    OracleError::Recovery {
        height,
        reason: reason.into(),
    }
}

fn read<T>(height: Height, what: &str, value: std::result::Result<T, StoreError>) -> Result<T> {
    value.map_err(|e| recovery_error(height, format!("reading {what}: {e}")))
}

/// First block of the replay window for a node resuming at `height`.
pub fn replay_start(height: Height, max_nonce: u32, validator_update_block: Height) -> Height {
    let from = (height + 1).saturating_sub(u64::from(max_nonce)).max(1);
    from.max(validator_update_block.saturating_add(1))
}

/// Newest snapshot written strictly before `height`.
fn snapshot_before(recent: &BTreeMap<Height, Params>, height: Height) -> Option<&Params> {
    recent.range(..height).next_back().map(|(_, p)| p)
}

/// Build the committed aggregator context for a block at `height`.
///
/// Falls back to first-time initialization when no parameter history or
/// validator-update marker has been written yet.
///
/// # Errors
///
/// - [`OracleError::Recovery`] when the live parameters are missing, a
///   stored snapshot is invalid or a store read fails
/// - [`OracleError::PowerOverflow`] if the validator set's total power
///   does not fit in `u64`
pub fn recover<S>(store: &mut S, cache: &mut Cache, height: Height) -> Result<AggregatorContext>
where
    S: OracleStore + ValidatorSource,
{
    cache.reset();

    let validator_update_block = read(height, "validator update block", store.validator_update_block())?;
    let recent = read(height, "recent params", store.recent_params())?;

    let Some(validator_update_block) = validator_update_block.filter(|_| !recent.is_empty()) else {
        return initialize(store, cache, height);
    };

    let current = match store.params() {
        Ok(params) => params,
        Err(StoreError::NotFound(_)) => {
            return Err(recovery_error(height, "recent params exist but live params are missing"))
        }
        Err(e) => return Err(recovery_error(height, format!("reading params: {e}"))),
    };
    for (block, snapshot) in &recent {
        snapshot
            .validate()
            .map_err(|e| recovery_error(height, format!("params snapshot at {block}: {e}")))?;
    }

    let validators = read(height, "validators", store.active_validators())?;
    let powers = PowerTable::from_validators(&validators)?;

    let mut from = replay_start(height, current.max_nonce, validator_update_block);
    // Snapshots older than the pruning horizon are gone; nothing before the
    // oldest one kept can be replayed.
    if let Some(oldest) = recent.keys().next() {
        from = from.max(oldest.saturating_add(1));
    }
    let to = height;

    let mut msgs = read(height, "recent messages", store.recent_msgs())?;

    info!(height, from, to, validator_update_block, "replaying recent blocks");

    let mut agc = AggregatorContext::new();
    agc.set_validator_powers(powers.clone());

    let mut replayed = 0usize;
    let mut rejected = 0usize;
    for h in from..to {
        if let Some(snapshot) = snapshot_before(&recent, h) {
            agc.set_params(Arc::new(snapshot.clone()));
        }
        agc.prepare_round_end(h - 1);

        for msg in msgs.remove(&h).unwrap_or_default() {
            match agc.ingest(&msg, h) {
                Ok(_) => replayed += 1,
                Err(reason) => {
                    rejected += 1;
                    warn!(height = h, feeder = msg.feeder_id, validator = %msg.validator, %reason, "replayed submission rejected");
                }
            }
        }

        seal_round(&mut agc, store, h, ExecMode::Committed, Persist::Suppress)?;
    }

    if let Some(snapshot) = snapshot_before(&recent, to) {
        agc.set_params(Arc::new(snapshot.clone()));
    }
    agc.set_params(Arc::new(current.clone()));
    agc.prepare_round_end(to.saturating_sub(1));

    let carried = read(height, "carried prices", store.carried_rounds())?;
    agc.restore_carried(&carried);

    cache.put(ItemParams(current));
    cache.put(ItemValidators(powers.as_map().clone()));
    cache.put(ItemCarried(carried));
    cache.mark_recovered();

    info!(height, replayed, rejected, "aggregator context recovered");
    Ok(agc)
}

/// Set up a context from current durable state alone.
fn initialize<S>(store: &mut S, cache: &mut Cache, height: Height) -> Result<AggregatorContext>
where
    S: OracleStore + ValidatorSource,
{
    let params = read(height, "params", store.params())?;
    params
        .validate()
        .map_err(|e| recovery_error(height, format!("live params: {e}")))?;
    let validators = read(height, "validators", store.active_validators())?;
    let powers = PowerTable::from_validators(&validators)?;

    let mut agc = AggregatorContext::new();
    agc.set_params(Arc::new(params.clone()));
    agc.set_validator_powers(powers.clone());
    agc.prepare_round_end(height.saturating_sub(1));

    cache.put(ItemParams(params));
    cache.put(ItemValidators(powers.as_map().clone()));
    cache.prime(ItemCarried::default());

    debug!(height, validators = powers.len(), total_power = powers.total(), "first-time initialization");
    info!(height, "aggregator context initialized");
    Ok(agc)
}
