mod common;

use common::{key_script, secret, spend, TestNode};
use stakd_consensus::masternode_payment;
use stakd_consensus::money::COIN;
use stakd_masternode::{MasternodeState, Ping, PingOutcome, RegisterOutcome, Registration};
use stakd_node::{BlockVerdict, RejectKind};
use stakd_primitives::{OutPoint, TxOut};
use stakd_script::signer::public_key;

/// Locks the collateral to the owner's script at height 7 and mines on to `height`.
fn node_with_collateral(height: i32) -> (TestNode, Vec<u8>, OutPoint) {
    let harness = TestNode::new();
    harness.mine_to(6);
    let (prevout, value) = harness.coinbase_at(1);
    let collateral = 5_000 * COIN;
    let owner = key_script(&secret(9));
    let tx = spend(
        vec![prevout],
        &harness.miner_script,
        &harness.miner,
        harness.tip_time(),
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

fn registration(collateral: &OutPoint, sig_time: i64) -> Registration {
    let mut msg = Registration {
        collateral: collateral.clone(),
        addr: "127.0.0.1:19999".parse().expect("addr"),
        collateral_pubkey: public_key(&secret(9)).to_vec(),
        operator_pubkey: public_key(&secret(10)).to_vec(),
        sig_time,
        protocol_version: stakd_consensus::params::chain_params(
            stakd_consensus::Network::Regtest,
        )
        .masternode
        .min_protocol_version,
        signature: Vec::new(),
    };
    msg.sign(&secret(9));
    msg
}

#[test]
fn registered_masternode_is_elected_and_paid() {
    let (harness, owner, outpoint) = node_with_collateral(29);
    let outcome = harness
        .node
        .submit_registration(registration(&outpoint, harness.now), harness.now)
        .expect("register");
    assert_eq!(outcome, RegisterOutcome::Created(MasternodeState::Active));
    assert_eq!(harness.node.masternode_rank(&outpoint).expect("rank"), Some(1));

    let winner = harness
        .node
        .expected_payee(30)
        .expect("payee")
        .expect("elected");
    assert_eq!(winner.collateral, outpoint);
    assert_eq!(winner.payee_script, owner);

    let unpaid = harness.next_block(0, Vec::new());
    let err = harness
        .node
        .submit_block(unpaid, harness.now)
        .expect_err("missing payment");
    assert_eq!(err.kind, RejectKind::Invalid);
    assert_eq!(harness.height(), 29);

    let reward = harness.reward(30);
    let share = masternode_payment(reward);
    let paid = harness.build_block(
        harness.tip(),
        30,
        harness.tip_time() + 31,
        vec![
            TxOut::new(reward - share, harness.miner_script.clone()),
            TxOut::new(share, owner),
        ],
        Vec::new(),
    );
    let verdict = harness
        .node
        .submit_block(paid.clone(), harness.now)
        .expect("paid block");
    assert_eq!(
        verdict,
        BlockVerdict::Connected {
            height: 30,
            reorganized: false
        }
    );
    let pay_count = harness
        .node
        .payments()
        .with_registry_ref(|registry| registry.get(&outpoint).map(|record| record.pay_count()))
        .expect("registry");
    assert_eq!(pay_count, Some(1));
}

#[test]
fn registration_for_a_stranger_collateral_is_penalized() {
    let (harness, _, outpoint) = node_with_collateral(10);
    let mut msg = registration(&outpoint, harness.now);
    msg.collateral_pubkey = public_key(&secret(8)).to_vec();
    msg.sign(&secret(8));
    let err = harness
        .node
        .submit_registration(msg, harness.now)
        .expect_err("not the owner");
    assert_eq!(err.kind, RejectKind::Invalid);
    assert_eq!(err.penalty, 20);
}

#[test]
fn pings_are_rate_limited() {
    let (harness, _, outpoint) = node_with_collateral(10);
    harness
        .node
        .submit_registration(registration(&outpoint, harness.now), harness.now)
        .expect("register");
    let spacing = harness
        .node
        .payments()
        .params()
        .min_ping_spacing_secs;

    let ping = |sig_time: i64| {
        let mut msg = Ping {
            collateral: outpoint.clone(),
            sig_time,
            stop: false,
            signature: Vec::new(),
        };
        msg.sign(&secret(10));
        msg
    };
    let now = harness.now + spacing;
    assert_eq!(
        harness.node.submit_ping(&ping(now), now).expect("ping"),
        PingOutcome::Accepted
    );
    assert_eq!(
        harness.node.submit_ping(&ping(now + 1), now + 1).expect("ping"),
        PingOutcome::Ignored
    );
}

#[test]
fn masternode_list_survives_a_restart() {
    let (harness, _, outpoint) = node_with_collateral(12);
    harness
        .node
        .submit_registration(registration(&outpoint, harness.now), harness.now)
        .expect("register");
    let report = harness.node.run_maintenance(harness.now).expect("maintenance");
    assert_eq!(report.swept, 0);

    let reopened = harness.reopen();
    assert_eq!(reopened.best_height().expect("height"), 12);
    assert_eq!(reopened.masternode_rank(&outpoint).expect("rank"), Some(1));
    assert_eq!(reopened.money_supply().expect("supply"), harness.node.money_supply().expect("supply"));
}
