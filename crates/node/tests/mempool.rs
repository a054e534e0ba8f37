mod common;

use common::{key_script, secret, spend, TestNode};
use stakd_consensus::money::{Amount, MIN_TX_FEE};
use stakd_node::mempool::min_fee;
use stakd_node::RejectKind;
use stakd_primitives::{OutPoint, Transaction, TxOut};

const FEE: Amount = 10_000;

/// Splits the height-1 coinbase into 30 outputs, paying `fee`.
fn fan_out(harness: &TestNode, fee: Amount) -> Transaction {
    let (prevout, value) = harness.coinbase_at(1);
    let parts = 30;
    let share = (value - fee) / parts;
    let mut vout: Vec<TxOut> = (0..parts)
        .map(|_| TxOut::new(share, harness.miner_script.clone()))
        .collect();
    vout[0].value += (value - fee) - share * parts;
    spend(
        vec![prevout],
        &harness.miner_script,
        &harness.miner,
        harness.tip_time(),
        vout,
    )
}

#[test]
fn transaction_below_minimum_fee_is_rejected_until_it_pays() {
    let harness = TestNode::new();
    harness.mine_to(6);

    let free = fan_out(&harness, 0);
    let size = free.serialized_size();
    assert!((1_000..2_000).contains(&size), "size {size}");
    assert_eq!(min_fee(size, 0), 2 * MIN_TX_FEE);

    let err = harness
        .node
        .submit_transaction(free.clone(), harness.now)
        .expect_err("no fee");
    assert_eq!(err.kind, RejectKind::Policy);
    assert_eq!(err.penalty, 0);
    assert!(err.reason.starts_with("insufficient-fee"), "{}", err.reason);
    assert!(!harness.node.mempool_contains(&free.txid()).expect("mempool"));

    let paying = fan_out(&harness, 2 * MIN_TX_FEE);
    let txid = harness
        .node
        .submit_transaction(paying, harness.now)
        .expect("minimum fee");
    assert!(harness.node.mempool_contains(&txid).expect("mempool"));
    assert_eq!(harness.node.mempool_len().expect("mempool"), 1);
}

#[test]
fn immature_coinbase_spend_is_invalid() {
    let harness = TestNode::new();
    harness.mine_to(3);
    let tx = harness.pay_fee(1, FEE);
    let err = harness
        .node
        .submit_transaction(tx, harness.now)
        .expect_err("immature");
    assert_eq!(err.kind, RejectKind::Invalid);
    assert_eq!(err.penalty, 100);
}

#[test]
fn duplicates_and_conflicts_are_refused() {
    let harness = TestNode::new();
    harness.mine_to(6);
    let tx = harness.pay_fee(1, FEE);
    harness
        .node
        .submit_transaction(tx.clone(), harness.now)
        .expect("first");

    let err = harness
        .node
        .submit_transaction(tx, harness.now)
        .expect_err("duplicate");
    assert_eq!(err.kind, RejectKind::Duplicate);

    let rival = harness.pay_fee(1, 2 * FEE);
    let err = harness
        .node
        .submit_transaction(rival, harness.now)
        .expect_err("conflict");
    assert_eq!(err.kind, RejectKind::Conflict);
    assert_eq!(harness.node.mempool_len().expect("mempool"), 1);
}

#[test]
fn spend_of_unconfirmed_parent_waits_until_parent_confirms() {
    let harness = TestNode::new();
    harness.mine_to(6);
    let parent = harness.pay_fee(1, FEE);
    let parent_value = parent.vout[0].value;
    harness
        .node
        .submit_transaction(parent.clone(), harness.now)
        .expect("parent");

    let child = spend(
        vec![OutPoint::new(parent.txid(), 0)],
        &harness.miner_script,
        &harness.miner,
        harness.tip_time(),
        vec![TxOut::new(parent_value - FEE, key_script(&secret(7)))],
    );
    let err = harness
        .node
        .submit_transaction(child.clone(), harness.now)
        .expect_err("orphan");
    assert_eq!(err.kind, RejectKind::Orphan);
    assert!(!harness.node.mempool_contains(&child.txid()).expect("mempool"));

    harness.mine_with(vec![parent.clone()], FEE);
    assert!(!harness.node.mempool_contains(&parent.txid()).expect("mempool"));
    assert!(harness.node.mempool_contains(&child.txid()).expect("mempool"));
    assert_eq!(harness.events.confirmed(), vec![(parent.txid(), 7)]);
}

#[test]
fn block_spending_a_pool_input_conflicts_the_pool_transaction() {
    let harness = TestNode::new();
    harness.mine_to(6);
    let pooled = harness.pay_fee(1, FEE);
    harness
        .node
        .submit_transaction(pooled.clone(), harness.now)
        .expect("pooled");

    let (prevout, value) = harness.coinbase_at(1);
    let mined = spend(
        vec![prevout],
        &harness.miner_script,
        &harness.miner,
        harness.tip_time(),
        vec![TxOut::new(value - 2 * FEE, key_script(&secret(7)))],
    );
    harness.mine_with(vec![mined], 2 * FEE);

    assert_eq!(harness.node.mempool_len().expect("mempool"), 0);
    assert_eq!(harness.events.conflicted(), vec![pooled.txid()]);
    assert!(harness.events.confirmed().is_empty());
}
