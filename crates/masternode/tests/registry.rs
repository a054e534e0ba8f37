mod common;

use common::{funded_operators, params, FakeChain, Operator, NOW};
use stakd_masternode::{
    calculate_score, MasternodeErrorKind, MasternodeRegistry, MasternodeState, PingOutcome,
    RegisterOutcome,
};
use stakd_primitives::OutPoint;
use stakd_storage::memory::MemoryStore;
use stakd_storage::Column;

fn registered(chain: &mut FakeChain, count: u8) -> (MasternodeRegistry, Vec<Operator>) {
    let operators = funded_operators(chain, count);
    let mut registry = MasternodeRegistry::new(params());
    for operator in &operators {
        registry
            .register(operator.registration(NOW), &*chain, NOW)
            .expect("register");
    }
    (registry, operators)
}

#[test]
fn confirmed_collateral_registers_active() {
    let mut chain = FakeChain::with_tip(10);
    let operator = Operator::new(1);
    operator.fund(&mut chain, params().collateral, 3);

    let mut registry = MasternodeRegistry::new(params());
    let outcome = registry
        .register(operator.registration(NOW), &chain, NOW)
        .expect("register");
    assert_eq!(outcome, RegisterOutcome::Created(MasternodeState::Active));

    let record = registry.get(&operator.collateral).expect("record");
    assert_eq!(record.last_ping, NOW);
    assert_eq!(record.registered_order, 0);
    assert_eq!(record.payee_script(), operator.payee_script());
    assert_eq!(registry.active_count(), 1);
}

#[test]
fn unconfirmed_collateral_waits_in_pending() {
    let mut chain = FakeChain::with_tip(10);
    let operator = Operator::new(1);
    operator.fund(&mut chain, params().collateral, 0);

    let mut registry = MasternodeRegistry::new(params());
    let outcome = registry
        .register(operator.registration(NOW), &chain, NOW)
        .expect("register");
    assert_eq!(outcome, RegisterOutcome::Created(MasternodeState::Pending));
    assert_eq!(registry.active_count(), 0);

    chain
        .outputs
        .get_mut(&operator.collateral)
        .expect("collateral")
        .confirmations = 1;
    assert_eq!(registry.check(&chain, NOW + 10), 1);
    assert_eq!(registry.active_count(), 1);
}

#[test]
fn registration_rejections_carry_kind_and_penalty() {
    let mut chain = FakeChain::with_tip(10);
    let operator = Operator::new(1);
    operator.fund(&mut chain, params().collateral, 3);
    let mut registry = MasternodeRegistry::new(params());

    let drift = params().max_sig_time_drift_secs;
    let err = registry
        .register(operator.registration(NOW + drift + 1), &chain, NOW)
        .expect_err("future sig time");
    assert_eq!(err.kind, MasternodeErrorKind::SigTimeInFuture);

    let mut old_protocol = operator.registration(NOW);
    old_protocol.protocol_version = params().min_protocol_version - 1;
    old_protocol.sign(&operator.collateral_key);
    let err = registry
        .register(old_protocol, &chain, NOW)
        .expect_err("old protocol");
    assert_eq!(err.kind, MasternodeErrorKind::ProtocolVersion);
    assert_eq!(err.penalty, 0);

    let mut tampered = operator.registration(NOW);
    tampered.sig_time -= 1;
    let err = registry.register(tampered, &chain, NOW).expect_err("tampered");
    assert_eq!(err.kind, MasternodeErrorKind::BadSignature);
    assert_eq!(err.penalty, 100);

    let short = Operator::new(2);
    short.fund(&mut chain, params().collateral - 1, 3);
    let err = registry
        .register(short.registration(NOW), &chain, NOW)
        .expect_err("short collateral");
    assert_eq!(err.kind, MasternodeErrorKind::InvalidCollateral);
    assert_eq!(err.penalty, 20);

    let foreign = Operator::new(3);
    foreign.fund(&mut chain, params().collateral, 3);
    chain
        .outputs
        .get_mut(&foreign.collateral)
        .expect("collateral")
        .script_pubkey = operator.payee_script();
    let err = registry
        .register(foreign.registration(NOW), &chain, NOW)
        .expect_err("foreign collateral");
    assert_eq!(err.kind, MasternodeErrorKind::InvalidCollateral);

    let unfunded = Operator::new(4);
    let err = registry
        .register(unfunded.registration(NOW), &chain, NOW)
        .expect_err("missing collateral");
    assert_eq!(err.kind, MasternodeErrorKind::InvalidCollateral);

    assert!(registry.is_empty());
}

#[test]
fn reregistration_requires_newer_sig_time() {
    let mut chain = FakeChain::with_tip(10);
    let (mut registry, operators) = registered(&mut chain, 1);
    let operator = &operators[0];

    let err = registry
        .register(operator.registration(NOW), &chain, NOW)
        .expect_err("same sig time");
    assert_eq!(err.kind, MasternodeErrorKind::Stale);

    let mut moved = operator.registration(NOW + 5);
    moved.addr = "10.1.1.1:19999".parse().expect("addr");
    moved.sign(&operator.collateral_key);
    let outcome = registry.register(moved, &chain, NOW).expect("update");
    assert_eq!(outcome, RegisterOutcome::Updated);

    assert_eq!(registry.len(), 1);
    let record = registry.get(&operator.collateral).expect("record");
    assert_eq!(record.addr.to_string(), "10.1.1.1:19999");
    assert_eq!(record.sig_time, NOW + 5);
    assert_eq!(record.registered_order, 0);
}

#[test]
fn pings_respect_spacing_and_stop() {
    let mut chain = FakeChain::with_tip(10);
    let (mut registry, operators) = registered(&mut chain, 1);
    let operator = &operators[0];
    let spacing = params().min_ping_spacing_secs;

    let early = operator.ping(NOW + 60, false);
    assert_eq!(registry.ping(&early, NOW + 60), Ok(PingOutcome::Ignored));

    let on_time = operator.ping(NOW + spacing, false);
    assert_eq!(registry.ping(&on_time, NOW + spacing), Ok(PingOutcome::Accepted));
    assert_eq!(
        registry.get(&operator.collateral).expect("record").last_ping,
        NOW + spacing
    );
    assert_eq!(registry.ping(&on_time, NOW + spacing), Ok(PingOutcome::Ignored));

    let mut forged = operator.ping(NOW + 2 * spacing, false);
    forged.sign(&operator.collateral_key);
    let err = registry.ping(&forged, NOW + 2 * spacing).expect_err("forged");
    assert_eq!(err.kind, MasternodeErrorKind::BadSignature);

    let stop = operator.ping(NOW + spacing + 10, true);
    assert_eq!(registry.ping(&stop, NOW + spacing + 10), Ok(PingOutcome::Accepted));
    assert_eq!(
        registry.get(&operator.collateral).expect("record").state,
        MasternodeState::Expired
    );
    assert_eq!(registry.active_count(), 0);

    let revive = operator.ping(NOW + 2 * spacing + 10, false);
    assert_eq!(
        registry.ping(&revive, NOW + 2 * spacing + 10),
        Ok(PingOutcome::Accepted)
    );
    assert_eq!(registry.active_count(), 1);

    let stranger = Operator::new(9).ping(NOW, false);
    let err = registry.ping(&stranger, NOW).expect_err("unknown");
    assert_eq!(err.kind, MasternodeErrorKind::UnknownMasternode);
}

#[test]
fn check_expires_removes_and_detects_spent_collateral() {
    let mut chain = FakeChain::with_tip(10);
    let (mut registry, operators) = registered(&mut chain, 3);
    let params = params();

    let ping_time = NOW + params.min_ping_spacing_secs;
    registry
        .ping(&operators[0].ping(ping_time, false), ping_time)
        .expect("ping");
    chain.outputs.remove(&operators[2].collateral);

    let expire_at = NOW + params.expiration_secs + 1;
    assert_eq!(registry.check(&chain, expire_at), 2);
    let state = |registry: &MasternodeRegistry, operator: &Operator| {
        registry.get(&operator.collateral).expect("record").state
    };
    assert_eq!(state(&registry, &operators[0]), MasternodeState::Active);
    assert_eq!(state(&registry, &operators[1]), MasternodeState::Expired);
    assert_eq!(state(&registry, &operators[2]), MasternodeState::InputSpent);

    let remove_at = NOW + params.removal_secs + 1;
    assert_eq!(registry.check(&chain, remove_at), 1);
    assert_eq!(state(&registry, &operators[1]), MasternodeState::RemovalPending);
    assert_eq!(state(&registry, &operators[2]), MasternodeState::InputSpent);

    let swept = registry.sweep();
    assert_eq!(
        swept,
        vec![operators[1].collateral.clone(), operators[2].collateral.clone()]
    );
    assert_eq!(registry.len(), 1);
}

#[test]
fn failed_collateral_lookup_leaves_state_alone() {
    let mut chain = FakeChain::with_tip(10);
    let (mut registry, operators) = registered(&mut chain, 2);
    chain.failing_lookups = true;

    assert_eq!(registry.check(&chain, NOW), 0);
    for operator in &operators {
        assert_eq!(
            registry.get(&operator.collateral).expect("record").state,
            MasternodeState::Active
        );
    }
    let late = Operator::new(9);
    late.fund(&mut chain, params().collateral, 5);
    let err = registry
        .register(late.registration(NOW), &chain, NOW)
        .expect_err("lookup failed");
    assert_eq!(err.kind, MasternodeErrorKind::Internal);
    assert_eq!(err.penalty, 0);

    chain.failing_lookups = false;
    chain.outputs.remove(&operators[0].collateral);
    assert_eq!(registry.check(&chain, NOW), 1);
    assert_eq!(
        registry.get(&operators[0].collateral).expect("record").state,
        MasternodeState::InputSpent
    );
}

#[test]
fn winner_is_first_highest_score() {
    let mut chain = FakeChain::with_tip(40);
    let (mut registry, operators) = registered(&mut chain, 3);
    let pay_height = 41;
    let anchor = registry.score_height(pay_height);
    assert_eq!(anchor, pay_height - params().vote_lookahead);

    let mut expected = None;
    for operator in &operators {
        let score = calculate_score(&operator.collateral, anchor, &chain).expect("score");
        if expected.as_ref().map_or(true, |(_, best)| score > *best) {
            expected = Some((operator.collateral.clone(), score));
        }
    }
    let (expected_collateral, expected_score) = expected.expect("winner");

    let winner = registry.select_winner(pay_height, &chain).expect("winner");
    assert_eq!(winner.collateral, expected_collateral);
    assert_eq!(winner.score, expected_score);
    assert_eq!(registry.select_winner(pay_height, &chain), Some(winner));
    assert_eq!(
        registry.score(&expected_collateral, pay_height, &chain),
        Some(expected_score)
    );
}

#[test]
fn payment_gate_skips_recently_paid() {
    let mut chain = FakeChain::with_tip(40);
    let (mut registry, operators) = registered(&mut chain, 3);
    assert_eq!(registry.payment_window(), 10);
    assert_eq!(registry.payment_gate(), 4);

    let first = registry.select_winner(41, &chain).expect("winner");
    for height in 31..=35 {
        chain.payees.insert(height, first.payee_script.clone());
    }
    // counts are memoized per tip; the chain reports replaced blocks
    assert_eq!(registry.payments_in_window(&first.collateral, 41, &chain), 0);
    registry.invalidate_ranks(31);
    assert_eq!(registry.payments_in_window(&first.collateral, 41, &chain), 5);
    assert!(!registry.is_eligible(&first.collateral, 41, &chain));

    let second = registry.select_winner(41, &chain).expect("winner");
    assert_ne!(second.collateral, first.collateral);

    let ranks = registry.ranks(41, &chain);
    assert_eq!(ranks.len(), operators.len());
    assert_eq!(ranks[0].collateral, first.collateral);
    assert_eq!(ranks[0].payments_in_window, 5);
    assert_eq!(ranks[1].collateral, second.collateral);
    assert!(ranks[1].score >= ranks[2].score);
    assert_eq!(
        ranks.iter().map(|entry| entry.rank).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(registry.rank(&second.collateral, 41, &chain), Some(2));
}

#[test]
fn ledger_follows_record_and_undo() {
    let mut chain = FakeChain::with_tip(40);
    let (mut registry, operators) = registered(&mut chain, 2);
    let collateral = &operators[0].collateral;

    assert!(registry.record_payment(30, collateral, 100));
    assert!(registry.record_payment(31, collateral, 100));
    assert!(!registry.record_payment(31, &OutPoint::new([99u8; 32], 0), 1));
    let record = registry.get(collateral).expect("record");
    assert_eq!(record.last_paid_height, 31);
    assert_eq!(record.pay_count(), 2);

    assert_eq!(registry.undo_payment(31), 1);
    let record = registry.get(collateral).expect("record");
    assert_eq!(record.last_paid_height, 30);
    assert_eq!(registry.undo_payment(31), 0);
}

#[test]
fn registry_round_trips_through_store() {
    let mut chain = FakeChain::with_tip(40);
    let (mut registry, operators) = registered(&mut chain, 3);
    registry.record_payment(35, &operators[1].collateral, 7);

    let store = MemoryStore::new();
    registry.persist(&store).expect("persist");
    let loaded = MasternodeRegistry::load(params(), &store).expect("load");
    assert_eq!(loaded.records(), registry.records());

    chain.outputs.remove(&operators[0].collateral);
    registry.check(&chain, NOW);
    registry.sweep();
    registry.persist(&store).expect("persist");
    assert_eq!(store.count(Column::Masternode).expect("count"), 2);
}
