//! Chain-level consensus boundaries: genesis, maturity, timestamps, and
//! the coinbase value bound. Every block here runs the full validation
//! pipeline.

use hunter_core::constants::{Network, COIN, PREMINE_AMOUNT};
use hunter_core::error::{BlockError, HunterError, TransactionError};
use hunter_core::genesis;
use hunter_core::types::TxOut;
use hunter_core::script::p2pkh_script;

use hunter_tests::helpers::{payment, rebuild_and_mine, TestChain};

#[test]
fn mainnet_genesis_matches_fixed_fields() {
    let block = genesis::genesis_block(Network::Mainnet);
    assert_eq!(block.header.time, 1_391_199_780);
    assert_eq!(block.header.nonce, 1_906_435_634);
    assert_eq!(block.vtx.len(), 1);
    assert_eq!(block.vtx[0].vout[0].value, PREMINE_AMOUNT);
    assert_eq!(block.vtx[0].vout.len(), 1);
    assert!(block.header.prev_hash.is_zero());
    // The premine pays the published address.
    let dest = hunter_core::script::extract_destination(
        &block.vtx[0].vout[0].script_pubkey,
    )
    .unwrap();
    assert_eq!(
        hunter_core::address::hash160_to_address(Network::Mainnet, &dest),
        genesis::MAINNET_PREMINE_ADDRESS,
    );
    // The hash is pinned: recomputing yields the same value.
    assert_eq!(block.hash(), genesis::genesis_hash(Network::Mainnet));
}

#[test]
fn coinbase_spend_matures_at_exactly_100() {
    let mut chain = TestChain::new();
    chain.mine_empty(1);
    let coinbase = chain.coinbase_outpoint(1);
    let value = chain.utxo_value(&coinbase);

    // Advance so the next block is height 100: depth 99, one short.
    while chain.height() < 99 {
        chain.mine_empty(1);
    }
    let spend = chain.signed_tx(1, &[coinbase], vec![payment(&chain.dest(), value)]);

    // The template refuses the immature spend...
    let block = chain.mine_block_with(&[spend.clone()]).unwrap();
    assert_eq!(chain.height(), 100);
    assert!(!block.vtx.iter().any(|t| t.txid() == spend.txid()));

    // ...and a hand-built block at depth 99 is consensus-invalid.
    // (Rewind scenario: new chain, same story, forced inclusion.)
    let mut forced = TestChain::new();
    forced.mine_empty(1);
    let cb = forced.coinbase_outpoint(1);
    let v = forced.utxo_value(&cb);
    while forced.height() < 99 {
        forced.mine_empty(1);
    }
    let early_spend = forced.signed_tx(1, &[cb], vec![payment(&forced.dest(), v)]);
    forced.time += 60;
    let mut block = forced
        .ctx
        .create_block_template(&[], &forced.dest(), forced.time)
        .unwrap();
    block.vtx.push(early_spend.clone());
    rebuild_and_mine(&mut block);
    let err = forced.submit(block).unwrap_err();
    assert!(matches!(
        err,
        HunterError::Block(BlockError::Tx {
            source: TransactionError::Immature { depth: 99, .. },
            ..
        }),
    ));

    // At depth 100 the same spend connects.
    while forced.height() < 100 {
        forced.mine_empty(1);
    }
    let block = forced.mine_block_with(&[early_spend.clone()]).unwrap();
    assert!(block.vtx.iter().any(|t| t.txid() == early_spend.txid()));
}

#[test]
fn timestamp_must_exceed_median_of_last_eleven() {
    let mut chain = TestChain::new();
    chain.mine_empty(12);

    let best = chain.ctx.index.best().unwrap();
    let median = chain.ctx.index.median_time_past(best);

    // Exactly the median: rejected.
    let mut block = chain
        .ctx
        .create_block_template(&[], &chain.dest(), median)
        .unwrap();
    rebuild_and_mine(&mut block);
    let err = chain.ctx.accept_block(block, median + 10_000).unwrap_err();
    assert!(matches!(err, HunterError::Block(BlockError::TimestampTooEarly)));

    // One past the median: accepted.
    let mut block = chain
        .ctx
        .create_block_template(&[], &chain.dest(), median + 1)
        .unwrap();
    rebuild_and_mine(&mut block);
    chain.ctx.accept_block(block, median + 10_000).unwrap();
}

#[test]
fn far_future_timestamp_rejected() {
    let mut chain = TestChain::new();
    chain.mine_empty(2);
    let future = chain.time + 60;
    let mut block = chain
        .ctx
        .create_block_template(&[], &chain.dest(), future)
        .unwrap();
    rebuild_and_mine(&mut block);
    // `now` lags more than two hours behind the block time.
    let err = chain
        .ctx
        .accept_block(block, future - 2 * 60 * 60 - 1)
        .unwrap_err();
    assert!(matches!(err, HunterError::Block(BlockError::TimestampTooFar)));
}

#[test]
fn coinbase_overpay_rejected() {
    let mut chain = TestChain::new();
    chain.mine_empty(1);
    chain.time += 60;
    let mut block = chain
        .ctx
        .create_block_template(&[], &chain.dest(), chain.time)
        .unwrap();
    block.vtx[0].vout[0].value += 1;
    rebuild_and_mine(&mut block);
    let err = chain.ctx.accept_block(block, chain.time).unwrap_err();
    assert!(matches!(
        err,
        HunterError::Block(BlockError::BadCoinbaseValue { .. }),
    ));
}

#[test]
fn tampered_tx_merkle_root_rejected() {
    let mut chain = TestChain::new();
    chain.time += 60;
    let mut block = chain
        .ctx
        .create_block_template(&[], &chain.dest(), chain.time)
        .unwrap();
    block.header.tx_merkle_root = hunter_core::types::Hash256([0xFF; 32]);
    // Mine without rebuilding roots.
    hunter_tests::helpers::mine(&mut block);
    let err = chain.ctx.accept_block(block, chain.time).unwrap_err();
    assert!(matches!(err, HunterError::Block(BlockError::BadMerkleRoot)));
}

#[test]
fn tampered_game_merkle_root_rejected() {
    let mut chain = TestChain::new();
    chain.time += 60;
    let mut block = chain
        .ctx
        .create_block_template(&[], &chain.dest(), chain.time)
        .unwrap();
    block.header.game_merkle_root = hunter_core::types::Hash256([0xEE; 32]);
    hunter_tests::helpers::mine(&mut block);
    let err = chain.ctx.accept_block(block, chain.time).unwrap_err();
    assert!(matches!(
        err,
        HunterError::Block(BlockError::BadGameMerkleRoot),
    ));
}

#[test]
fn supply_identity_holds_while_mining_and_spending() {
    let mut chain = TestChain::new();
    let funding = chain.fund();
    let value = chain.utxo_value(&funding);

    // A spend with a real fee: the miner claims it, supply stays exact.
    let fee = COIN / 10;
    let spend = chain.signed_tx(
        1,
        &[funding],
        vec![TxOut {
            value: value - fee,
            script_pubkey: p2pkh_script(&[0x77; 20]),
        }],
    );
    let block = chain.mine_block_with(&[spend.clone()]).unwrap();
    assert!(block.vtx.iter().any(|t| t.txid() == spend.txid()));

    let analysis = chain.ctx.analyse_supply().unwrap();
    assert_eq!(analysis.actual, analysis.expected, "{analysis:?}");
    assert!(analysis.balances());
}

#[test]
fn duplicate_block_is_recognised() {
    let mut chain = TestChain::new();
    let block = chain.mine_block_with(&[]).unwrap();
    let outcome = chain.submit(block).unwrap();
    assert!(matches!(
        outcome,
        hunter_consensus::engine::AcceptOutcome::AlreadyKnown,
    ));
}

#[test]
fn unknown_parent_rejected() {
    let mut chain = TestChain::new();
    chain.time += 60;
    let mut block = chain
        .ctx
        .create_block_template(&[], &chain.dest(), chain.time)
        .unwrap();
    block.header.prev_hash = hunter_core::types::Hash256([0xAB; 32]);
    rebuild_and_mine(&mut block);
    let err = chain.submit(block).unwrap_err();
    assert!(matches!(err, HunterError::Block(BlockError::UnknownParent(_))));
}
