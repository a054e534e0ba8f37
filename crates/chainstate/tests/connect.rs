mod common;

use std::sync::Arc;

use common::{key_script, secret, spend, TestChain};
use stakd_chainstate::state::{genesis_block, ChainState};
use stakd_chainstate::ErrorKind;
use stakd_consensus::money::COIN;
use stakd_masternode::PaymentConsensus;
use stakd_primitives::{OutPoint, TxOut};

#[test]
fn genesis_is_written_once_and_reloaded() {
    let mut harness = TestChain::new();
    let genesis = genesis_block(&harness.chain.params().consensus);
    assert_eq!(harness.chain.best_height(), 0);
    assert_eq!(harness.chain.best_hash(), genesis.hash());

    harness.mine_to(3);
    let tip = harness.chain.best_hash();
    let supply = harness.chain.money_supply();

    let params = harness.chain.params().clone();
    let payments = Arc::new(PaymentConsensus::new(params.masternode.clone()));
    let reopened = ChainState::new(Arc::clone(&harness.store), params, payments).expect("reopen");
    assert_eq!(reopened.best_height(), 3);
    assert_eq!(reopened.best_hash(), tip);
    assert_eq!(reopened.money_supply(), supply);
    assert_eq!(reopened.hash_at(0), Some(genesis.hash()));
}

#[test]
fn trust_grows_and_supply_tracks_subsidy() {
    let mut harness = TestChain::new();
    let mut last_trust = harness.chain.best_node().expect("genesis").chain_trust;
    for _ in 0..3 {
        harness.mine();
        let trust = harness.chain.best_node().expect("tip").chain_trust;
        assert!(trust > last_trust);
        last_trust = trust;
    }
    assert_eq!(harness.chain.money_supply(), 100_000 * COIN + 2 * 50 * COIN);
}

#[test]
fn supply_excludes_fees_and_burns() {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let (prevout, value) = harness.coinbase_at(1);
    let supply_before = harness.chain.money_supply();

    let burn = harness.chain.params().masternode.burn_script();
    let fee = COIN;
    let tx = spend(
        prevout,
        &harness.miner_script.clone(),
        &harness.miner,
        harness.time_after(&harness.chain.best_hash()),
        vec![
            TxOut::new(10 * COIN, burn),
            TxOut::new(value - 10 * COIN - fee, key_script(&secret(2))),
        ],
    );
    harness.mine_with(vec![tx], fee);

    // subsidy enters supply, the fee moves from spender to miner, the burn leaves
    assert_eq!(
        harness.chain.money_supply(),
        supply_before + 50 * COIN - 10 * COIN
    );
}

#[test]
fn immature_coinbase_spend_marks_block_failed() {
    let mut harness = TestChain::new();
    harness.mine_to(3);
    let (prevout, value) = harness.coinbase_at(1);
    let tip = harness.chain.best_hash();
    let tx = spend(
        prevout,
        &harness.miner_script.clone(),
        &harness.miner,
        harness.time_after(&tip),
        vec![TxOut::new(value, key_script(&secret(2)))],
    );
    let block = harness.block_on(&tip, 0, 0, vec![tx]);
    let err = harness.accept(&block).expect_err("immature spend");
    assert_eq!(err.kind, ErrorKind::ConsensusViolation);
    assert_eq!(harness.chain.best_hash(), tip);
    assert!(harness.chain.node(&block.hash()).expect("indexed").is_failed());

    let again = harness.accept(&block).expect_err("failed block");
    assert_eq!(again.kind, ErrorKind::ConsensusViolation);
}

#[test]
fn conflicting_spends_in_one_block_are_a_double_spend() {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let (prevout, value) = harness.coinbase_at(1);
    let tip = harness.chain.best_hash();
    let time = harness.time_after(&tip);
    let miner_script = harness.miner_script.clone();
    let first = spend(
        prevout.clone(),
        &miner_script,
        &harness.miner,
        time,
        vec![TxOut::new(value, key_script(&secret(2)))],
    );
    let second = spend(
        prevout,
        &miner_script,
        &harness.miner,
        time,
        vec![TxOut::new(value, key_script(&secret(3)))],
    );
    let block = harness.block_on(&tip, 0, 0, vec![first, second]);
    let err = harness.accept(&block).expect_err("double spend");
    assert_eq!(err.kind, ErrorKind::DoubleSpend);
    assert_eq!(harness.chain.best_hash(), tip);
}

#[test]
fn spent_output_cannot_be_spent_by_a_later_block() {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let (prevout, value) = harness.coinbase_at(1);
    let miner_script = harness.miner_script.clone();
    let time = harness.time_after(&harness.chain.best_hash());
    let first = spend(
        prevout.clone(),
        &miner_script,
        &harness.miner,
        time,
        vec![TxOut::new(value, key_script(&secret(2)))],
    );
    harness.mine_with(vec![first.clone()], 0);
    let entry = harness.chain.utxo(&prevout).expect("read").expect("entry");
    assert_eq!(entry.spent.map(|marker| marker.txid), Some(first.txid()));

    let tip = harness.chain.best_hash();
    let second = spend(
        prevout,
        &miner_script,
        &harness.miner,
        harness.time_after(&tip),
        vec![TxOut::new(value, key_script(&secret(3)))],
    );
    let block = harness.block_on(&tip, 0, 0, vec![second]);
    let err = harness.accept(&block).expect_err("already spent");
    assert_eq!(err.kind, ErrorKind::DoubleSpend);
}

#[test]
fn chained_spends_inside_a_block_connect() {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let (prevout, value) = harness.coinbase_at(1);
    let time = harness.time_after(&harness.chain.best_hash());
    let middle_key = secret(2);
    let middle_script = key_script(&middle_key);
    let parent = spend(
        prevout,
        &harness.miner_script.clone(),
        &harness.miner,
        time,
        vec![TxOut::new(value, middle_script.clone())],
    );
    let child = spend(
        OutPoint::new(parent.txid(), 0),
        &middle_script,
        &middle_key,
        time,
        vec![TxOut::new(value, key_script(&secret(3)))],
    );
    let child_txid = child.txid();
    harness.mine_with(vec![parent.clone(), child], 0);

    let middle = harness
        .chain
        .utxo(&OutPoint::new(parent.txid(), 0))
        .expect("read")
        .expect("entry");
    assert_eq!(middle.spent.map(|marker| marker.txid), Some(child_txid));
    let last = harness
        .chain
        .utxo(&OutPoint::new(child_txid, 0))
        .expect("read")
        .expect("entry");
    assert!(!last.is_spent());
}

#[test]
fn overpaying_coinbase_is_rejected() {
    let mut harness = TestChain::new();
    harness.mine_to(2);
    let tip = harness.chain.best_hash();
    let block = harness.block_with_coinbase(
        &tip,
        0,
        vec![TxOut::new(50 * COIN + 1, harness.miner_script.clone())],
        Vec::new(),
    );
    let err = harness.accept(&block).expect_err("overpay");
    assert_eq!(err.kind, ErrorKind::ConsensusViolation);
}

#[test]
fn orphan_and_duplicate_blocks_do_not_mark_failure() {
    let mut harness = TestChain::new();
    let genesis = harness.chain.best_hash();
    let first = harness.block_on(&genesis, 0, 0, Vec::new());
    harness.accept(&first).expect("first");
    let dup = harness.accept(&first).expect_err("duplicate");
    assert_eq!(dup.kind, ErrorKind::Policy);

    let mut orphan = harness.block_on(&first.hash(), 0, 0, Vec::new());
    orphan.header.prev_block = [0xab; 32];
    let orphan = common::seal(orphan, harness.chain.params());
    let err = harness.accept(&orphan).expect_err("orphan");
    assert_eq!(err.kind, ErrorKind::MissingInputs);
    assert!(harness.chain.node(&orphan.hash()).is_none());
}

#[test]
fn disconnect_then_reconnect_restores_identical_store() {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let (prevout, value) = harness.coinbase_at(1);
    let tx = spend(
        prevout.clone(),
        &harness.miner_script.clone(),
        &harness.miner,
        harness.time_after(&harness.chain.best_hash()),
        vec![
            TxOut::new(5_000 * COIN, key_script(&secret(4))),
            TxOut::new(value - 5_000 * COIN, key_script(&secret(2))),
        ],
    );
    let txid = tx.txid();
    let tip = harness.mine_with(vec![tx], 0);
    let before = harness.store.snapshot().expect("snapshot");

    harness.chain.disconnect_block(&tip).expect("disconnect");
    assert_eq!(harness.chain.best_height(), 6);
    let restored = harness.chain.utxo(&prevout).expect("read").expect("entry");
    assert!(!restored.is_spent());
    assert!(harness
        .chain
        .utxo(&OutPoint::new(txid, 0))
        .expect("read")
        .is_none());

    harness.chain.connect_block(&tip).expect("reconnect");
    assert_eq!(harness.chain.best_hash(), tip);
    assert_eq!(harness.store.snapshot().expect("snapshot"), before);
}

#[test]
fn block_recreating_a_spent_coinbase_is_rejected() {
    let mut harness = TestChain::new();
    harness.mine_to(8);
    let (prevout, value) = harness.coinbase_at(2);
    let old_coinbase = harness
        .chain
        .block_by_height(2)
        .expect("read block")
        .expect("block at height")
        .transactions[0]
        .clone();
    let spender = spend(
        prevout.clone(),
        &harness.miner_script.clone(),
        &harness.miner,
        harness.time_after(&harness.chain.best_hash()),
        vec![TxOut::new(value, key_script(&secret(2)))],
    );
    harness.mine_with(vec![spender.clone()], 0);
    let supply = harness.chain.money_supply();

    let tip = harness.chain.best_hash();
    let mut block = harness.block_on(&tip, 0, 0, Vec::new());
    block.transactions[0] = old_coinbase;
    let block = common::seal(block, harness.chain.params());
    let err = harness.accept(&block).expect_err("recreated coinbase");
    assert_eq!(err.kind, ErrorKind::ConsensusViolation);
    assert_eq!(err.penalty, 100);
    assert!(err.reason.contains("overwrites existing outputs"), "{err}");

    assert_eq!(harness.chain.best_hash(), tip);
    assert_eq!(harness.chain.money_supply(), supply);
    let entry = harness.chain.utxo(&prevout).expect("read").expect("entry");
    assert_eq!(entry.spent.map(|marker| marker.txid), Some(spender.txid()));
}

#[test]
fn tampered_body_does_not_condemn_the_honest_block() {
    let mut harness = TestChain::new();
    harness.mine_to(2);
    let tip = harness.chain.best_hash();
    let honest = harness.block_on(&tip, 0, 0, Vec::new());

    let mut tampered = honest.clone();
    tampered.transactions[0].vout[0].value -= 1;
    assert_eq!(tampered.hash(), honest.hash());
    let err = harness.accept(&tampered).expect_err("merkle mismatch");
    assert_eq!(err.kind, ErrorKind::Structural);
    assert_eq!(err.penalty, 100);
    assert!(!err.marks_failed());
    assert!(harness.chain.node(&honest.hash()).is_none());

    let accepted = harness.accept(&honest).expect("honest block");
    assert_eq!(accepted.height, 3);
    assert_eq!(harness.chain.best_hash(), honest.hash());
}

#[test]
fn child_of_a_failed_block_is_condemned_with_it() {
    let mut harness = TestChain::new();
    harness.mine_to(2);
    let tip = harness.chain.best_hash();
    let bad = harness.block_with_coinbase(
        &tip,
        0,
        vec![TxOut::new(50 * COIN + 1, harness.miner_script.clone())],
        Vec::new(),
    );
    harness.accept(&bad).expect_err("overpay");
    assert!(harness.chain.node(&bad.hash()).expect("indexed").is_failed());

    let child = harness.block_on(&bad.hash(), 0, 0, Vec::new());
    let err = harness.accept(&child).expect_err("failed parent");
    assert_eq!(err.kind, ErrorKind::ConsensusViolation);
    assert!(harness.chain.node(&child.hash()).expect("indexed").is_failed());
    assert_eq!(harness.chain.best_hash(), tip);
}
