mod common;

use common::{key_script, secret, spend, TestChain};
use stakd_chainstate::ErrorKind;
use stakd_primitives::{OutPoint, Transaction, TxIn, TxOut};

#[test]
fn heavier_fork_reorganizes_and_resurrects_transactions() {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let fork = harness.chain.best_hash();
    let (prevout, value) = harness.coinbase_at(1);
    let tx = spend(
        prevout.clone(),
        &harness.miner_script.clone(),
        &harness.miner,
        harness.time_after(&fork),
        vec![TxOut::new(value, key_script(&secret(2)))],
    );
    let old_tip = harness.mine_with(vec![tx.clone()], 0);
    assert!(harness
        .chain
        .utxo(&prevout)
        .expect("read")
        .expect("entry")
        .is_spent());

    let side_one = harness.block_on(&fork, 7, 0, Vec::new());
    let accepted = harness.accept(&side_one).expect("side block");
    assert!(accepted.reorganization.is_none(), "equal trust keeps the tip");
    assert_eq!(harness.chain.best_hash(), old_tip);

    let side_two = harness.block_on(&side_one.hash(), 7, 0, Vec::new());
    let accepted = harness.accept(&side_two).expect("side block");
    let reorg = accepted.reorganization.expect("reorganized");
    assert_eq!(reorg.fork_height, 6);
    assert_eq!(reorg.disconnected, vec![old_tip]);
    assert_eq!(reorg.connected.len(), 2);
    assert_eq!(
        reorg.resurrected.iter().map(Transaction::txid).collect::<Vec<_>>(),
        vec![tx.txid()]
    );

    assert_eq!(harness.chain.best_hash(), side_two.hash());
    assert_eq!(harness.chain.best_height(), 8);
    assert_eq!(harness.chain.hash_at(7), Some(side_one.hash()));
    assert!(!harness
        .chain
        .utxo(&prevout)
        .expect("read")
        .expect("entry")
        .is_spent());
    assert!(!harness.chain.node(&old_tip).expect("indexed").is_connected());
}

#[test]
fn transactions_confirmed_on_both_branches_are_not_resurrected() {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let fork = harness.chain.best_hash();
    let (prevout, value) = harness.coinbase_at(1);
    let tx = spend(
        prevout,
        &harness.miner_script.clone(),
        &harness.miner,
        harness.time_after(&fork),
        vec![TxOut::new(value, key_script(&secret(2)))],
    );
    harness.mine_with(vec![tx.clone()], 0);

    let side_one = harness.block_on(&fork, 3, 0, vec![tx]);
    harness.accept(&side_one).expect("side block");
    let side_two = harness.block_on(&side_one.hash(), 3, 0, Vec::new());
    let reorg = harness
        .accept(&side_two)
        .expect("side block")
        .reorganization
        .expect("reorganized");
    assert!(reorg.resurrected.is_empty());
}

#[test]
fn failed_connect_rolls_back_to_the_original_branch() {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let fork = harness.chain.best_hash();
    let (prevout, value) = harness.coinbase_at(1);
    let tx = spend(
        prevout.clone(),
        &harness.miner_script.clone(),
        &harness.miner,
        harness.time_after(&fork),
        vec![TxOut::new(value, key_script(&secret(2)))],
    );
    let old_tip = harness.mine_with(vec![tx], 0);
    let supply = harness.chain.money_supply();
    let before = harness.store.snapshot().expect("snapshot");

    let side_one = harness.block_on(&fork, 5, 0, Vec::new());
    harness.accept(&side_one).expect("side block");
    let bogus = Transaction::new(
        harness.time_after(&side_one.hash()),
        vec![TxIn::new(OutPoint::new([0xee; 32], 0), vec![0x51])],
        vec![TxOut::new(1, key_script(&secret(3)))],
    );
    let side_two = harness.block_on(&side_one.hash(), 5, 0, vec![bogus]);
    let err = harness.accept(&side_two).expect_err("missing input");
    assert_eq!(err.kind, ErrorKind::ConsensusViolation);

    assert_eq!(harness.chain.best_hash(), old_tip);
    assert_eq!(harness.chain.money_supply(), supply);
    assert!(harness
        .chain
        .utxo(&prevout)
        .expect("read")
        .expect("entry")
        .is_spent());
    assert!(harness.chain.node(&side_two.hash()).expect("indexed").is_failed());
    assert!(!harness.chain.node(&side_one.hash()).expect("indexed").is_failed());

    // only the side blocks' index entries and data differ from the pre-reorg store
    let after = harness.store.snapshot().expect("snapshot");
    let utxo_rows = |rows: &Vec<(stakd_storage::Column, Vec<u8>, Vec<u8>)>| {
        rows.iter()
            .filter(|(column, _, _)| *column == stakd_storage::Column::Utxo)
            .cloned()
            .collect::<Vec<_>>()
    };
    assert_eq!(utxo_rows(&after), utxo_rows(&before));

    // a block built on the failed one is refused without validation
    let child = harness.block_on(&side_two.hash(), 5, 0, Vec::new());
    let err = harness.accept(&child).expect_err("failed parent");
    assert_eq!(err.kind, ErrorKind::ConsensusViolation);
    assert!(harness.chain.node(&child.hash()).expect("indexed").is_failed());
}
