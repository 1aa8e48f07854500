//! Block driver.
//!
//! Feeds one block at a time through the oracle service:
//! validator-set refresh, submissions in order, optional parameter update,
//! then end of block. Rejections are reported as events; anything fatal
//! stops the node.

use anyhow::Context;
use feedr_db::SqliteStore;
use feedr_oracle::{BlockContext, OracleError, OracleService, OracleStore};
use feedr_types::{Event, Height, Params, PriceSubmission, ValidatorPower};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events;

/// One line of block input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInput {
    pub height: Height,
    /// New active validator set, if staking changed it in this block.
    #[serde(default)]
    pub validators: Option<Vec<ValidatorPower>>,
    #[serde(default)]
    pub submissions: Vec<PriceSubmission>,
    /// Parameter update carried by this block.
    #[serde(default)]
    pub params: Option<Params>,
}

pub struct Driver {
    service: OracleService<SqliteStore>,
    last_height: Option<Height>,
}

impl Driver {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            service: OracleService::new(store),
            last_height: None,
        }
    }

    /// Execute one block and return the events it produced.
    pub fn process(&mut self, block: BlockInput) -> anyhow::Result<Vec<Event>> {
        let height = block.height;
        if let Some(last) = self.last_height {
            anyhow::ensure!(
                height == last + 1,
                "block {height} does not follow block {last}"
            );
        }

        let ctx = BlockContext::committed(height);
        self.service.reset_per_block();
        self.service
            .begin_block(&ctx)
            .with_context(|| format!("starting block {height}"))?;

        let mut out = Vec::new();

        if let Some(set) = &block.validators {
            self.service.store_mut().set_validators(set)?;
        }

        let total = block.submissions.len();
        for msg in block.submissions {
            match self.service.submit_price(&ctx, msg.clone()) {
                Ok(_) => {}
                Err(OracleError::Rejected(reason)) => {
                    warn!(height, feeder = msg.feeder_id, validator = %msg.validator, %reason, "submission rejected");
                    out.push(events::rejected(height, &msg, &reason.to_string())?);
                }
                Err(e) => return Err(e).with_context(|| format!("submitting in block {height}")),
            }
        }

        if let Some(params) = block.params {
            match self.service.update_params(&ctx, params.clone()) {
                Ok(()) => out.push(events::params_updated(height, &params)?),
                Err(OracleError::InvalidParams(e)) => {
                    warn!(height, error = %e, "params update ignored");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let outcomes = self
            .service
            .end_block(&ctx)
            .with_context(|| format!("ending block {height}"))?;
        for outcome in &outcomes {
            out.push(events::round(height, outcome)?);
        }

        if self.service.store().validator_update_block()? == Some(height) {
            if let Some(set) = &block.validators {
                out.push(events::validator_set_changed(height, set)?);
            }
        }

        info!(height, submissions = total, rounds = outcomes.len(), "block processed");
        self.last_height = Some(height);
        Ok(out)
    }

    /// Stop the oracle and release the database.
    pub fn shutdown(self) -> SqliteStore {
        self.service.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedr_types::{EventType, Price, TokenFeeder, ValidatorId};

    fn genesis_store() -> SqliteStore {
        let mut store = SqliteStore::open_memory().expect("open");
        let params = Params {
            threshold_a: 30,
            threshold_b: 60,
            feeders: vec![TokenFeeder {
                id: 1,
                start_height: 100,
                interval: 10,
                decimal: 2,
                active: true,
            }],
            ..Params::default()
        };
        let validators: Vec<ValidatorPower> = [(1, 40), (2, 25), (3, 35)]
            .into_iter()
            .map(|(n, power)| ValidatorPower {
                validator: ValidatorId([n; 20]),
                power,
            })
            .collect();
        store.seed_genesis(&params, &validators).expect("seed");
        store
    }

    fn block(height: Height) -> BlockInput {
        BlockInput {
            height,
            validators: None,
            submissions: Vec::new(),
            params: None,
        }
    }

    fn submission(validator: u8, nonce: u64) -> PriceSubmission {
        PriceSubmission::single(ValidatorId([validator; 20]), 1, nonce, 1, Price::new(1000, 2))
    }

    #[test]
    fn test_blocks_produce_events() {
        let mut driver = Driver::new(genesis_store());
        for h in 101..=108 {
            assert!(driver.process(block(h)).expect("block").is_empty());
        }

        let mut b = block(109);
        b.submissions = vec![submission(1, 1), submission(2, 1), submission(9, 1)];
        let events = driver.process(b).expect("block 109");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::SubmissionRejected);

        let events = driver.process(block(110)).expect("block 110");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RoundFinalized);

        let store = driver.shutdown();
        assert_eq!(store.round_results(1).expect("results").len(), 1);
    }

    #[test]
    fn test_gap_in_heights_is_fatal() {
        let mut driver = Driver::new(genesis_store());
        driver.process(block(101)).expect("block");
        assert!(driver.process(block(103)).is_err());
    }

    #[test]
    fn test_validator_change_event() {
        let mut driver = Driver::new(genesis_store());
        driver.process(block(101)).expect("block");
        let mut b = block(102);
        b.validators = Some(vec![ValidatorPower {
            validator: ValidatorId([1; 20]),
            power: 10,
        }]);
        let events = driver.process(b).expect("block");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ValidatorSetChanged);
    }

    #[test]
    fn test_block_input_defaults() {
        let input: BlockInput = serde_json::from_str(r#"{"height": 7}"#).expect("parse");
        assert_eq!(input.height, 7);
        assert!(input.submissions.is_empty());
        assert!(input.validators.is_none());
    }
}
