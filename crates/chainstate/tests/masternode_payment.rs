mod common;

use common::{key_script, secret, spend, TestChain};
use stakd_chainstate::ErrorKind;
use stakd_consensus::masternode_payment;
use stakd_consensus::money::COIN;
use stakd_masternode::{ChainView, CollateralView};
use stakd_primitives::{OutPoint, TxOut};

/// Locks one collateral output to the owner's script at height 7 and mines on to
/// `height`.
fn chain_with_collateral(height: i32) -> (TestChain, Vec<u8>, OutPoint) {
    let mut harness = TestChain::new();
    harness.mine_to(6);
    let (prevout, value) = harness.coinbase_at(1);
    let owner = key_script(&secret(9));
    let collateral = harness.chain.params().masternode.collateral;
    let tx = spend(
        prevout,
        &harness.miner_script.clone(),
        &harness.miner,
        harness.time_after(&harness.chain.best_hash()),
        vec![
            TxOut::new(collateral, owner.clone()),
            TxOut::new(value - collateral, harness.miner_script.clone()),
        ],
    );
    let outpoint = OutPoint::new(tx.txid(), 0);
    harness.mine_with(vec![tx], 0);
    harness.mine_to(height);
    (harness, owner, outpoint)
}

#[test]
fn collateral_view_reports_confirmations_and_ownership() {
    let (harness, owner, outpoint) = chain_with_collateral(10);
    let info = harness
        .chain
        .collateral(&outpoint)
        .expect("lookup")
        .expect("collateral");
    assert_eq!(info.value, 5_000 * COIN);
    assert_eq!(info.script_pubkey, owner);
    assert_eq!(info.confirmations, 4);
    assert!(harness.chain.script_owns_unspent(&owner, 5_000 * COIN));
    assert!(!harness.chain.script_owns_unspent(&owner, 4_999 * COIN));
    assert!(!harness
        .chain
        .script_owns_unspent(&key_script(&secret(8)), 5_000 * COIN));
    assert_eq!(harness.chain.tip_height(), 10);
}

#[test]
fn missing_payment_is_tolerated_before_enforcement() {
    let (mut harness, _, _) = chain_with_collateral(20);
    let enforce = harness.chain.params().masternode.payment_enforce_height;
    harness.mine_to(enforce - 1);
    assert_eq!(harness.chain.best_height(), enforce - 1);
    assert!(harness.chain.payee_at(enforce - 1).is_none());
}

#[test]
fn enforced_height_requires_the_masternode_share() {
    let (mut harness, owner, _) = chain_with_collateral(29);
    let tip = harness.chain.best_hash();
    let reward = 50 * COIN;
    let share = masternode_payment(reward);
    assert_eq!(share, reward / 3);

    let unpaid = harness.block_on(&tip, 0, 0, Vec::new());
    let err = harness.accept(&unpaid).expect_err("missing payment");
    assert_eq!(err.kind, ErrorKind::ConsensusViolation);
    assert_eq!(harness.chain.best_hash(), tip);

    let wrong_amount = harness.block_with_coinbase(
        &tip,
        1,
        vec![
            TxOut::new(reward - share + 1, harness.miner_script.clone()),
            TxOut::new(share - 1, owner.clone()),
        ],
        Vec::new(),
    );
    assert!(harness.accept(&wrong_amount).is_err());

    let stranger = harness.block_with_coinbase(
        &tip,
        2,
        vec![
            TxOut::new(reward - share, harness.miner_script.clone()),
            TxOut::new(share, key_script(&secret(8))),
        ],
        Vec::new(),
    );
    assert!(harness.accept(&stranger).is_err());

    let paid = harness.block_with_coinbase(
        &tip,
        3,
        vec![
            TxOut::new(reward - share, harness.miner_script.clone()),
            TxOut::new(share, owner.clone()),
        ],
        Vec::new(),
    );
    let accepted = harness.accept(&paid).expect("paid block");
    assert_eq!(accepted.height, 30);
    assert_eq!(harness.chain.best_hash(), paid.hash());
    assert_eq!(harness.chain.payee_at(30), Some(owner));
}

#[test]
fn disconnect_clears_the_recorded_payee() {
    let (mut harness, owner, _) = chain_with_collateral(29);
    let tip = harness.chain.best_hash();
    let share = masternode_payment(50 * COIN);
    let paid = harness.block_with_coinbase(
        &tip,
        0,
        vec![
            TxOut::new(50 * COIN - share, harness.miner_script.clone()),
            TxOut::new(share, owner),
        ],
        Vec::new(),
    );
    harness.accept(&paid).expect("paid block");
    harness.chain.disconnect_block(&paid.hash()).expect("disconnect");
    assert_eq!(harness.chain.best_hash(), tip);
    assert!(harness.chain.payee_at(30).is_none());
    assert!(harness.chain.node(&paid.hash()).expect("indexed").payee.is_none());
}
