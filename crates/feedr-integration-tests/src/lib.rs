//! Integration test crate for the price oracle.
//!
//! The library holds shared fixtures: a genesis configuration, a seeded
//! block generator and a helper that executes one block against any store.
//! The scenarios themselves live in `tests/`.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p feedr-integration-tests
//! ```

use std::collections::BTreeMap;

use feedr_db::SqliteStore;
use feedr_oracle::{
    BlockContext, MemoryStore, OracleError, OracleService, OracleStore, RoundOutcome, StoreError,
    ValidatorSource,
};
use feedr_types::{
    FeederId, Height, Mode, Params, Price, PriceSubmission, SourcePrice, TokenFeeder, ValidatorId,
    ValidatorPower,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Height of the first generated block.
pub const FIRST_HEIGHT: Height = 101;

/// One block of input.
#[derive(Clone, Debug)]
pub struct Block {
    pub height: Height,
    pub submissions: Vec<PriceSubmission>,
    /// Validator set installed by staking during this block.
    pub validators: Option<Vec<ValidatorPower>>,
    pub params: Option<Params>,
}

/// Stores whose validator set the tests can change.
pub trait Staking {
    fn apply_validators(&mut self, set: &[ValidatorPower]) -> Result<(), StoreError>;
}

impl Staking for MemoryStore {
    fn apply_validators(&mut self, set: &[ValidatorPower]) -> Result<(), StoreError> {
        self.set_validators(set.to_vec());
        Ok(())
    }
}

impl Staking for SqliteStore {
    fn apply_validators(&mut self, set: &[ValidatorPower]) -> Result<(), StoreError> {
        Ok(self.set_validators(set)?)
    }
}

pub fn validator(n: u8) -> ValidatorId {
    ValidatorId([n; 20])
}

pub fn genesis_params() -> Params {
    Params {
        max_nonce: 3,
        threshold_a: 30,
        threshold_b: 60,
        max_det_id: 3,
        mode: Mode::Median,
        feeders: vec![
            TokenFeeder {
                id: 1,
                start_height: 100,
                interval: 10,
                decimal: 2,
                active: true,
            },
            TokenFeeder {
                id: 2,
                start_height: 100,
                interval: 5,
                decimal: 8,
                active: true,
            },
        ],
    }
}

pub fn genesis_validators() -> Vec<ValidatorPower> {
    [(1, 40), (2, 25), (3, 35), (4, 10)]
        .into_iter()
        .map(|(n, power)| ValidatorPower {
            validator: validator(n),
            power,
        })
        .collect()
}

pub fn memory_store() -> MemoryStore {
    MemoryStore::with_genesis(genesis_params(), genesis_validators())
}

pub fn sqlite_store() -> Result<SqliteStore, feedr_db::DbError> {
    let mut store = SqliteStore::open_memory()?;
    store.seed_genesis(&genesis_params(), &genesis_validators())?;
    Ok(store)
}

/// Generate blocks `FIRST_HEIGHT..FIRST_HEIGHT + count` from `seed`.
///
/// Every validator submits with some probability at each height inside a
/// submission window, with nonces counting up within the round. Prices
/// cluster around a per-feeder base so most rounds finalize. The stream
/// also carries validator power changes, a parameter update and the
/// occasional submission from an unknown validator.
pub fn generate_blocks(seed: u64, count: u64) -> Vec<Block> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut params = genesis_params();
    let mut set = genesis_validators();
    // (validator, feeder, round) -> submissions so far
    let mut sent: BTreeMap<(ValidatorId, FeederId, u64), u64> = BTreeMap::new();
    let mut blocks = Vec::new();

    for height in FIRST_HEIGHT..FIRST_HEIGHT + count {
        let mut submissions = Vec::new();
        for feeder in &params.feeders {
            if !feeder.accepts_at(height, params.max_nonce) {
                continue;
            }
            let Some(round) = feeder.round_at(height) else {
                continue;
            };
            let base = 1_000 * u128::from(feeder.id) + u128::from(round % 7);
            for v in &set {
                if !rng.gen_bool(0.7) {
                    continue;
                }
                let nonce = sent.entry((v.validator, feeder.id, round)).or_default();
                *nonce += 1;
                let sources = (1..=rng.gen_range(1..=2u64))
                    .map(|source_id| SourcePrice {
                        source_id,
                        price: Price::new(base + rng.gen_range(0..2u128), feeder.decimal),
                    })
                    .collect();
                submissions.push(PriceSubmission {
                    validator: v.validator,
                    feeder_id: feeder.id,
                    nonce: *nonce,
                    sources,
                });
            }
            if rng.gen_bool(0.05) {
                submissions.push(PriceSubmission::single(
                    validator(99),
                    feeder.id,
                    1,
                    1,
                    Price::new(base, feeder.decimal),
                ));
            }
        }

        let validators = (height % 37 == 0).then(|| {
            for v in set.iter_mut() {
                v.power = rng.gen_range(5..50);
            }
            sent.clear();
            set.clone()
        });

        let update = (height == FIRST_HEIGHT + 60).then(|| {
            params.threshold_a = 20;
            params.feeders[1].interval = 4;
            params.mode = Mode::WeightedMean;
            // feeder 2 changed, so its open round is dropped
            sent.retain(|(_, feeder_id, _), _| *feeder_id != 2);
            params.clone()
        });

        blocks.push(Block {
            height,
            submissions,
            validators,
            params: update,
        });
    }
    blocks
}

/// Outcome of executing one block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub accepted: usize,
    pub rejected: usize,
    pub rounds: Vec<RoundOutcome>,
}

/// Execute `block` on the committed path with submissions in `order`.
pub fn run_block<S>(
    service: &mut OracleService<S>,
    block: &Block,
    order: &[usize],
) -> Result<BlockReport, OracleError>
where
    S: OracleStore + ValidatorSource + Staking,
{
    let ctx = BlockContext::committed(block.height);
    service.reset_per_block();
    service.begin_block(&ctx)?;
    if let Some(set) = &block.validators {
        service.store_mut().apply_validators(set)?;
    }

    let mut report = BlockReport::default();
    for &i in order {
        match service.submit_price(&ctx, block.submissions[i].clone()) {
            Ok(_) => report.accepted += 1,
            Err(OracleError::Rejected(_)) => report.rejected += 1,
            Err(e) => return Err(e),
        }
    }
    if let Some(params) = &block.params {
        service.update_params(&ctx, params.clone())?;
    }
    report.rounds = service.end_block(&ctx)?;
    Ok(report)
}

/// Submissions in inclusion order.
pub fn in_order(block: &Block) -> Vec<usize> {
    (0..block.submissions.len()).collect()
}
