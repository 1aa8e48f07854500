//! Per-block typed scratchpad.
//!
//! The cache holds values derived during a block (the validator power
//! table, the active parameters, the submissions accepted so far) and
//! writes the bookkeeping they imply at the end of the block:
//!
//! - accepted submissions go to the recent-message history,
//! - updated parameters become a new recent-params snapshot,
//! - an updated power table moves the validator-update block marker,
//! - updated carried prices replace the stored ones.
//!
//! At the start of a block the cache is reset and primed with the values
//! the committed context already holds, so a later `put` marks a real
//! change.
//!
//! Slots filled by recovery are flagged as recovered: the values came from
//! durable state, so committing them again would record a spurious
//! parameter snapshot or validator-set change at the restart height.

use std::collections::BTreeMap;

use feedr_types::{Height, Params, PriceSubmission, ValidatorId};

use crate::aggregator::CarriedRound;
use crate::store::{OracleStore, StoreResult};

/// Snapshot of the validator power table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemValidators(pub BTreeMap<ValidatorId, u64>);

/// Snapshot of the active parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemParams(pub Params);

/// Prices carried into the open rounds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemCarried(pub Vec<CarriedRound>);

/// Submissions accepted in the current block, in inclusion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemMsgs(pub Vec<PriceSubmission>);

mod sealed {
    use super::Cache;

    #[derive(Debug)]
    pub struct Slot<T> {
        pub(super) value: Option<T>,
        pub(super) updated: bool,
        pub(super) recovered: bool,
    }

    impl<T> Default for Slot<T> {
        fn default() -> Self {
            Self {
                value: None,
                updated: false,
                recovered: false,
            }
        }
    }

    impl<T> Slot<T> {
        pub(super) fn clear(&mut self) {
            *self = Self::default();
        }

        pub(super) fn should_persist(&self) -> bool {
            self.updated && !self.recovered
        }

        pub(super) fn settle(&mut self) {
            self.updated = false;
            self.recovered = false;
        }
    }

    pub trait Slotted: Sized {
        fn slot(cache: &Cache) -> &Slot<Self>;
        fn slot_mut(cache: &mut Cache) -> &mut Slot<Self>;
    }
}

/// A value type the cache has a slot for.
///
/// Only the item types of this module implement it, so asking for a type
/// without a slot does not compile.
pub trait CacheItem: sealed::Slotted + Clone {}

impl sealed::Slotted for ItemValidators {
    fn slot(cache: &Cache) -> &sealed::Slot<Self> {
        &cache.validators
    }
    fn slot_mut(cache: &mut Cache) -> &mut sealed::Slot<Self> {
        &mut cache.validators
    }
}
impl CacheItem for ItemValidators {}

impl sealed::Slotted for ItemParams {
    fn slot(cache: &Cache) -> &sealed::Slot<Self> {
        &cache.params
    }
    fn slot_mut(cache: &mut Cache) -> &mut sealed::Slot<Self> {
        &mut cache.params
    }
}
impl CacheItem for ItemParams {}

impl sealed::Slotted for ItemCarried {
    fn slot(cache: &Cache) -> &sealed::Slot<Self> {
        &cache.carried
    }
    fn slot_mut(cache: &mut Cache) -> &mut sealed::Slot<Self> {
        &mut cache.carried
    }
}
impl CacheItem for ItemCarried {}

impl sealed::Slotted for ItemMsgs {
    fn slot(cache: &Cache) -> &sealed::Slot<Self> {
        &cache.msgs
    }
    fn slot_mut(cache: &mut Cache) -> &mut sealed::Slot<Self> {
        &mut cache.msgs
    }
}
impl CacheItem for ItemMsgs {}

/// The per-process cache. Never outlives the process.
#[derive(Debug, Default)]
pub struct Cache {
    validators: sealed::Slot<ItemValidators>,
    params: sealed::Slot<ItemParams>,
    carried: sealed::Slot<ItemCarried>,
    msgs: sealed::Slot<ItemMsgs>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every slot.
    pub fn reset(&mut self) {
        self.validators.clear();
        self.params.clear();
        self.carried.clear();
        self.msgs.clear();
    }

    /// Store `item`, replacing any previous value of the same type.
    ///
    /// A freshly put value is never considered recovered.
    pub fn put<I: CacheItem>(&mut self, item: I) {
        let slot = I::slot_mut(self);
        slot.value = Some(item);
        slot.updated = true;
        slot.recovered = false;
    }

    /// Store `item` as already durable: a later commit does not write it.
    pub fn prime<I: CacheItem>(&mut self, item: I) {
        let slot = I::slot_mut(self);
        slot.value = Some(item);
        slot.updated = false;
        slot.recovered = false;
    }

    /// Copy the cached value of type `I` into `out`.
    ///
    /// Returns `false` and leaves `out` untouched when the slot is empty.
    pub fn get<I: CacheItem>(&self, out: &mut I) -> bool {
        match &I::slot(self).value {
            Some(value) => {
                *out = value.clone();
                true
            }
            None => false,
        }
    }

    /// Record one accepted submission for the recent-message history.
    pub fn append_msg(&mut self, msg: PriceSubmission) {
        let slot = &mut self.msgs;
        slot.value.get_or_insert_with(ItemMsgs::default).0.push(msg);
        slot.updated = true;
    }

    /// Drop the submissions buffered for the current block.
    pub fn discard_msgs(&mut self) {
        self.msgs.clear();
    }

    /// Flag the current contents as reconstructed from durable state.
    pub fn mark_recovered(&mut self) {
        self.validators.recovered = self.validators.value.is_some();
        self.params.recovered = self.params.value.is_some();
        self.carried.recovered = self.carried.value.is_some();
    }

    /// Whether any slot still carries the recovered flag.
    pub fn is_recovered(&self) -> bool {
        self.validators.recovered || self.params.recovered || self.carried.recovered
    }

    /// Whether the cache holds writes the next commit would make.
    pub fn has_uncommitted(&self) -> bool {
        self.validators.should_persist()
            || self.params.should_persist()
            || self.carried.should_persist()
            || self.msgs.value.as_ref().is_some_and(|m| !m.0.is_empty())
    }

    /// Persist the block's bookkeeping and prune history that has left the
    /// replay window of the next block.
    ///
    /// Values stay cached after the commit; only the message buffer and
    /// the update/recovered flags are cleared.
    pub fn commit<S: OracleStore>(
        &mut self,
        store: &mut S,
        height: Height,
        max_nonce: u32,
    ) -> StoreResult<()> {
        let keep_from = (height + 2).saturating_sub(u64::from(max_nonce));

        if let Some(ItemMsgs(msgs)) = self.msgs.value.take() {
            if !msgs.is_empty() {
                store.set_recent_msgs(height, &msgs)?;
            }
        }
        store.prune_recent_msgs(keep_from)?;

        if self.params.should_persist() {
            if let Some(ItemParams(params)) = &self.params.value {
                store.set_recent_params(height, params)?;
                tracing::debug!(height, "recorded params snapshot");
            }
        }
        store.prune_recent_params(keep_from)?;

        if self.validators.should_persist() {
            store.set_validator_update_block(height)?;
            tracing::debug!(height, "recorded validator update block");
        }

        if self.carried.should_persist() {
            if let Some(ItemCarried(carried)) = &self.carried.value {
                store.set_carried_rounds(carried)?;
                tracing::debug!(height, feeders = carried.len(), "recorded carried prices");
            }
        }

        self.validators.settle();
        self.params.settle();
        self.carried.settle();
        self.msgs.settle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use feedr_types::{Price, ValidatorId};

    fn msg(nonce: u64) -> PriceSubmission {
        PriceSubmission::single(ValidatorId([1; 20]), 1, nonce, 1, Price::new(100, 2))
    }

    #[test]
    fn test_get_absent_leaves_out_untouched() {
        let cache = Cache::new();
        let mut out = ItemParams(Params {
            max_nonce: 9,
            ..Params::default()
        });
        assert!(!cache.get(&mut out));
        assert_eq!(out.0.max_nonce, 9);
    }

    #[test]
    fn test_put_overwrites() {
        let mut cache = Cache::new();
        cache.put(ItemParams(Params::default()));
        cache.put(ItemParams(Params {
            max_nonce: 7,
            ..Params::default()
        }));
        let mut out = ItemParams::default();
        assert!(cache.get(&mut out));
        assert_eq!(out.0.max_nonce, 7);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut cache = Cache::new();
        cache.put(ItemValidators::default());
        cache.append_msg(msg(1));
        cache.reset();
        assert!(!cache.get(&mut ItemValidators::default()));
        assert!(!cache.get(&mut ItemMsgs::default()));
    }

    #[test]
    fn test_commit_writes_updated_items() {
        let mut cache = Cache::new();
        let mut store = MemoryStore::default();
        cache.put(ItemParams(Params::default()));
        cache.put(ItemValidators::default());
        cache.append_msg(msg(1));
        cache.append_msg(msg(2));

        cache.commit(&mut store, 10, 3).expect("commit");

        assert_eq!(store.recent_msgs().expect("msgs")[&10].len(), 2);
        assert!(store.recent_params().expect("params").contains_key(&10));
        assert_eq!(store.validator_update_block().expect("vub"), Some(10));

        // Nothing updated: a second commit writes no snapshot
        cache.commit(&mut store, 11, 3).expect("commit");
        assert!(!store.recent_params().expect("params").contains_key(&11));
        assert_eq!(store.validator_update_block().expect("vub"), Some(10));
    }

    #[test]
    fn test_recovered_items_are_not_persisted() {
        let mut cache = Cache::new();
        let mut store = MemoryStore::default();
        cache.put(ItemParams(Params::default()));
        cache.put(ItemValidators::default());
        cache.mark_recovered();
        assert!(cache.is_recovered());

        cache.commit(&mut store, 10, 3).expect("commit");

        assert!(store.recent_params().expect("params").is_empty());
        assert_eq!(store.validator_update_block().expect("vub"), None);
        assert!(!cache.is_recovered());
    }

    #[test]
    fn test_put_after_recovery_is_persisted() {
        let mut cache = Cache::new();
        let mut store = MemoryStore::default();
        cache.put(ItemValidators::default());
        cache.mark_recovered();
        cache.put(ItemValidators::default());

        cache.commit(&mut store, 10, 3).expect("commit");
        assert_eq!(store.validator_update_block().expect("vub"), Some(10));
    }

    #[test]
    fn test_primed_items_are_clean() {
        let mut cache = Cache::new();
        let mut store = MemoryStore::default();
        cache.prime(ItemParams(Params::default()));
        cache.prime(ItemValidators::default());
        assert!(!cache.has_uncommitted());
        assert!(cache.get(&mut ItemParams::default()));

        cache.commit(&mut store, 10, 3).expect("commit");
        assert!(store.recent_params().expect("params").is_empty());

        cache.append_msg(msg(1));
        assert!(cache.has_uncommitted());
    }

    #[test]
    fn test_carried_prices_replace_stored_ones() {
        let mut cache = Cache::new();
        let mut store = MemoryStore::default();
        let record = CarriedRound {
            feeder_id: 1,
            round_id: 2,
            votes: Vec::new(),
        };
        cache.put(ItemCarried(vec![record.clone()]));
        cache.commit(&mut store, 10, 3).expect("commit");
        assert_eq!(store.carried_rounds().expect("carried"), vec![record]);

        cache.put(ItemCarried(Vec::new()));
        cache.commit(&mut store, 11, 3).expect("commit");
        assert!(store.carried_rounds().expect("carried").is_empty());
    }

    #[test]
    fn test_commit_prunes_messages_outside_window() {
        let mut cache = Cache::new();
        let mut store = MemoryStore::default();
        for h in 1..=10 {
            cache.append_msg(msg(h));
            cache.commit(&mut store, h, 3).expect("commit");
        }
        // The next block (11) replays from 11 - 3 + 1 = 9
        let kept: Vec<Height> = store.recent_msgs().expect("msgs").into_keys().collect();
        assert_eq!(kept, vec![9, 10]);
    }
}
