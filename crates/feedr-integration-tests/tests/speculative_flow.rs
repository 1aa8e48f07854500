//! Integration test: speculative validation and delivery order.
//!
//! Submissions reach a node through its mempool in arbitrary order and are
//! checked speculatively before a block includes them. Neither the
//! speculative checks nor the inclusion order may change what the
//! committed path computes.

use feedr_integration_tests::{
    generate_blocks, in_order, memory_store, run_block, sqlite_store, Block,
};
use feedr_oracle::{BlockContext, OracleError, OracleService, OracleStore, ValidatorSource};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Check every submission of `block` on the speculative path, in `order`.
/// Returns whether each was accepted, indexed like `block.submissions`.
fn precheck<S>(
    service: &mut OracleService<S>,
    block: &Block,
    order: &[usize],
) -> Result<Vec<bool>, OracleError>
where
    S: OracleStore + ValidatorSource,
{
    let ctx = BlockContext::speculative(block.height);
    let mut accepted = vec![false; block.submissions.len()];
    for &i in order {
        match service.submit_price(&ctx, block.submissions[i].clone()) {
            Ok(_) => accepted[i] = true,
            Err(OracleError::Rejected(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(accepted)
}

#[test]
fn speculative_checks_leave_committed_path_untouched() {
    let blocks = generate_blocks(17, 80);
    let mut rng = StdRng::seed_from_u64(29);

    let mut reference = OracleService::new(memory_store());
    let mut node = OracleService::new(memory_store());

    for block in &blocks {
        let mut shuffled = in_order(block);
        shuffled.shuffle(&mut rng);

        // the mempool sees the submissions first, twice over
        precheck(&mut node, block, &shuffled).expect("precheck");
        let before = node.committed_context().cloned();
        precheck(&mut node, block, &in_order(block)).expect("precheck");
        assert_eq!(node.committed_context().cloned(), before);

        let expected = run_block(&mut reference, block, &in_order(block)).expect("reference block");
        let actual = run_block(&mut node, block, &in_order(block)).expect("node block");
        assert_eq!(actual, expected, "block {} diverged", block.height);
    }

    assert_eq!(
        node.store().round_results(1),
        reference.store().round_results(1)
    );
}

#[test]
fn speculative_verdicts_match_inclusion() {
    let blocks = generate_blocks(41, 80);
    let mut node = OracleService::new(memory_store());

    for block in &blocks {
        let verdicts = precheck(&mut node, block, &in_order(block)).expect("precheck");

        let ctx = BlockContext::committed(block.height);
        node.begin_block(&ctx).expect("begin");
        if let Some(set) = &block.validators {
            node.store_mut().set_validators(set.clone());
        }
        for (i, msg) in block.submissions.iter().enumerate() {
            let included = node.submit_price(&ctx, msg.clone()).is_ok();
            assert_eq!(included, verdicts[i], "submission {i} at {}", block.height);
        }
        if let Some(params) = &block.params {
            node.update_params(&ctx, params.clone()).expect("params");
        }
        node.end_block(&ctx).expect("end");
    }
}

#[test]
fn inclusion_order_does_not_matter() {
    let blocks = generate_blocks(53, 100);
    let mut rng = StdRng::seed_from_u64(59);

    let mut ordered = OracleService::new(memory_store());
    let mut shuffled = OracleService::new(sqlite_store().expect("sqlite store"));

    for block in &blocks {
        let mut order = in_order(block);
        order.shuffle(&mut rng);

        let expected = run_block(&mut ordered, block, &in_order(block)).expect("ordered block");
        let actual = run_block(&mut shuffled, block, &order).expect("shuffled block");
        assert_eq!(actual.rounds, expected.rounds, "block {} diverged", block.height);
        assert_eq!(shuffled.committed_context(), ordered.committed_context());
    }

    for feeder in [1, 2] {
        assert_eq!(
            shuffled.store().round_results(feeder).expect("results"),
            ordered.store().round_results(feeder)
        );
    }
}
