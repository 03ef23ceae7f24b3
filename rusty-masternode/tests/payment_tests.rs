//! Integration tests for masternode payment voting and coinbase payee validation.

mod common;

use common::*;
use rusty_crypto::hash::payee_script;
use rusty_masternode::constants::PROTOCOL_VERSION;
use rusty_masternode::{MasternodeConfig, MasternodeError, MasternodeServices, Network, PayeeTally};
use rusty_shared_types::{
    GossipMessage, InvType, MasternodeID, OutPoint, SyncItem, Transaction, TxInput, TxOutput, COIN,
};

const BLOCK_VALUE: u64 = 100 * COIN;

fn coinbase(outputs: Vec<TxOutput>) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput::spending(OutPoint::new([0u8; 32], u32::MAX))],
        outputs,
        lock_time: 0,
    }
}

fn miner_script() -> Vec<u8> {
    payee_script(&[42u8; 32])
}

/// Voters ranked at the payment rank height of `block_height`, best first.
fn ranked_voters(services: &MasternodeServices, block_height: u64) -> Vec<MasternodeID> {
    services
        .registry
        .ranks(block_height - 100, PROTOCOL_VERSION, true)
        .into_iter()
        .map(|ranked| ranked.id)
        .collect()
}

/// Delivers votes for `payee` at `block_height` from the `count` best-ranked voters.
fn vote_from_top(net: &TestNetwork, services: &MasternodeServices, block_height: u64, payee: &[u8], count: usize) {
    for id in ranked_voters(services, block_height).iter().take(count) {
        let vote = net.payment_vote(net.masternode(id), block_height, payee.to_vec());
        services.payments.process_winner_vote(&vote).unwrap();
    }
}

#[test]
fn test_committee_vote_counts_and_rank_eleven_is_refused() {
    init_logging();
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let height = TIP_HEIGHT;
    let payee = payee_script(&net.masternodes[0].collateral.public_key_bytes());
    let voters = ranked_voters(&services, height);

    let third = net.payment_vote(net.masternode(&voters[2]), height, payee.clone());
    services.payments.process_winner_vote(&third).unwrap();

    let eleventh = net.payment_vote(net.masternode(&voters[10]), height, payee.clone());
    let err = services.payments.process_winner_vote(&eleventh).unwrap_err();
    assert!(matches!(err, MasternodeError::PolicyViolation { dos: 0, .. }));

    let tally = services.payments.tally(height).unwrap();
    assert_eq!(tally.payees, vec![PayeeTally { script: payee, votes: 1 }]);

    let relayed = net.transport.relayed();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].inv_type, InvType::PaymentWinner);
    assert_eq!(relayed[0].hash, third.hash());
}

#[test]
fn test_voter_far_outside_committee_is_penalized() {
    let net = TestNetwork::new(22);
    let services = net.populated_services();
    let peer = "peer-1".to_string();
    let voters = ranked_voters(&services, TIP_HEIGHT);

    let vote = net.payment_vote(net.masternode(&voters[20]), TIP_HEIGHT, miner_script());
    assert!(!services.handle_message(&peer, GossipMessage::PaymentWinner(vote)));
    assert_eq!(net.transport.misbehavior_of(&peer), 20);
    assert!(services.payments.tally(TIP_HEIGHT).is_none());
}

#[test]
fn test_winner_needs_six_votes() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let height = TIP_HEIGHT + 5;
    let payee = payee_script(&net.masternodes[3].collateral.public_key_bytes());
    let voters = ranked_voters(&services, height);

    for (i, id) in voters.iter().take(6).enumerate() {
        assert!(services.payments.winner(height).is_none(), "winner after {} votes", i);
        let vote = net.payment_vote(net.masternode(id), height, payee.clone());
        services.payments.process_winner_vote(&vote).unwrap();
        assert_eq!(services.payments.block_payee(height), Some(payee.clone()));
    }

    let winner = services.payments.winner(height).unwrap();
    assert_eq!(winner.script, payee);
    assert_eq!(winner.votes, 6);
    assert_eq!(
        services.payments.required_payments_string(height),
        format!("{}:6", hex::encode(&payee))
    );
}

#[test]
fn test_second_vote_for_same_height_is_refused() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let voter = net.masternode(&ranked_voters(&services, TIP_HEIGHT)[0]);

    let first = net.payment_vote(voter, TIP_HEIGHT, miner_script());
    services.payments.process_winner_vote(&first).unwrap();

    let second = net.payment_vote(voter, TIP_HEIGHT, payee_script(&[7u8; 32]));
    let err = services.payments.process_winner_vote(&second).unwrap_err();
    assert!(matches!(err, MasternodeError::PolicyViolation { .. }));

    let again = services.payments.process_winner_vote(&first).unwrap_err();
    assert!(matches!(again, MasternodeError::Duplicate(_)));

    let tally = services.payments.tally(TIP_HEIGHT).unwrap();
    assert_eq!(tally.payees.len(), 1);
    assert_eq!(services.payments.stats().votes, 1);
}

#[test]
fn test_votes_outside_window_are_stale() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let voter = net.masternode(&ranked_voters(&services, TIP_HEIGHT)[0]);

    // Lookback is 12 * 1.25 = 15 blocks, the future window 20.
    for height in [TIP_HEIGHT - 16, TIP_HEIGHT + 21] {
        let vote = net.payment_vote(voter, height, miner_script());
        let err = services.payments.process_winner_vote(&vote).unwrap_err();
        assert!(matches!(err, MasternodeError::Stale(_)), "height {}", height);
    }
}

#[test]
fn test_bad_vote_signature_penalizes_and_asks_for_voter() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let peer = "peer-1".to_string();
    let voters = ranked_voters(&services, TIP_HEIGHT);

    let mut vote = net.payment_vote(net.masternode(&voters[1]), TIP_HEIGHT, miner_script());
    vote.signature = net
        .payment_vote(net.masternode(&voters[2]), TIP_HEIGHT, miner_script())
        .signature;

    assert!(!services.handle_message(&peer, GossipMessage::PaymentWinner(vote)));
    assert_eq!(net.transport.misbehavior_of(&peer), 20);
    assert_eq!(
        net.transport.pushed_to(&peer),
        vec![GossipMessage::RequestList(Some(voters[1].0))]
    );
}

#[test]
fn test_votes_ignored_until_blockchain_synced() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    services.sync.set_blockchain_synced(false);
    let peer = "peer-1".to_string();
    let voter = net.masternode(&ranked_voters(&services, TIP_HEIGHT)[0]);

    let vote = net.payment_vote(voter, TIP_HEIGHT, miner_script());
    assert!(!services.handle_message(&peer, GossipMessage::PaymentWinner(vote)));
    assert!(services.payments.tally(TIP_HEIGHT).is_none());
    assert_eq!(net.transport.misbehavior_of(&peer), 0);
}

#[test]
fn test_reference_node_vote_carries_extra_weight() {
    let mut config = MasternodeConfig::for_network(Network::Regtest);
    config.reference_nodes = vec![OutPoint::new(dummy_hash(1), 0)];
    let net = TestNetwork::with_config(12, config);
    let services = net.populated_services();
    let payee = miner_script();

    let vote = net.payment_vote(&net.masternodes[0], TIP_HEIGHT, payee.clone());
    services.payments.process_winner_vote(&vote).unwrap();

    let winner = services.payments.winner(TIP_HEIGHT).unwrap();
    assert_eq!(winner.script, payee);
    assert_eq!(winner.votes, 100);
}

#[test]
fn test_block_payee_validation() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let payee = payee_script(&net.masternodes[5].collateral.public_key_bytes());
    vote_from_top(&net, &services, TIP_HEIGHT, &payee, 6);

    let time = block_time(TIP_HEIGHT);
    let paying = coinbase(vec![
        TxOutput::new(80 * COIN, miner_script()),
        TxOutput::new(20 * COIN, payee.clone()),
    ]);
    assert!(services.payments.is_block_payee_valid(&paying, TIP_HEIGHT, time, BLOCK_VALUE));

    let short = coinbase(vec![
        TxOutput::new(81 * COIN, miner_script()),
        TxOutput::new(19 * COIN, payee.clone()),
    ]);
    assert!(!services.payments.is_block_payee_valid(&short, TIP_HEIGHT, time, BLOCK_VALUE));

    let unpaid = coinbase(vec![TxOutput::new(100 * COIN, miner_script())]);
    assert!(!services.payments.is_block_payee_valid(&unpaid, TIP_HEIGHT, time, BLOCK_VALUE));

    // A stalled chain may skip the payment.
    let stalled = block_time(TIP_HEIGHT - 1) + 60 * 60 + 1;
    assert!(services.payments.is_block_payee_valid(&unpaid, TIP_HEIGHT, stalled, BLOCK_VALUE));

    // Heights without an elected payee accept anything.
    assert!(services.payments.is_block_payee_valid(&unpaid, TIP_HEIGHT - 1, block_time(TIP_HEIGHT - 1), BLOCK_VALUE));

    // So does a node whose masternode list is not synced.
    services.sync.reset();
    assert!(services.payments.is_block_payee_valid(&unpaid, TIP_HEIGHT, time, BLOCK_VALUE));
}

#[test]
fn test_payee_not_enforced_when_disabled() {
    let mut config = MasternodeConfig::for_network(Network::Regtest);
    config.reference_nodes.clear();
    config.payments.enforce_payments = false;
    let net = TestNetwork::with_config(12, config);
    let services = net.populated_services();
    let payee = payee_script(&net.masternodes[5].collateral.public_key_bytes());
    vote_from_top(&net, &services, TIP_HEIGHT, &payee, 6);

    let unpaid = coinbase(vec![TxOutput::new(100 * COIN, miner_script())]);
    assert!(services.payments.is_block_payee_valid(&unpaid, TIP_HEIGHT, block_time(TIP_HEIGHT), BLOCK_VALUE));
}

#[test]
fn test_payment_must_use_fixed_slot_after_pos_start() {
    let mut config = MasternodeConfig::for_network(Network::Regtest);
    config.reference_nodes.clear();
    config.pos_start_height = Some(0);
    let net = TestNetwork::with_config(12, config);
    let services = net.populated_services();
    let payee = payee_script(&net.masternodes[5].collateral.public_key_bytes());
    vote_from_top(&net, &services, TIP_HEIGHT, &payee, 6);
    let time = block_time(TIP_HEIGHT);

    let misplaced = coinbase(vec![
        TxOutput::new(70 * COIN, miner_script()),
        TxOutput::new(10 * COIN, miner_script()),
        TxOutput::new(20 * COIN, payee.clone()),
    ]);
    assert!(!services.payments.is_block_payee_valid(&misplaced, TIP_HEIGHT, time, BLOCK_VALUE));

    let slotted = coinbase(vec![
        TxOutput::new(70 * COIN, miner_script()),
        TxOutput::new(20 * COIN, payee),
        TxOutput::new(10 * COIN, miner_script()),
    ]);
    assert!(services.payments.is_block_payee_valid(&slotted, TIP_HEIGHT, time, BLOCK_VALUE));
}

#[test]
fn test_fill_block_payee_pays_elected_script() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let height = TIP_HEIGHT + 5;
    let payee = payee_script(&net.masternodes[2].collateral.public_key_bytes());
    vote_from_top(&net, &services, height, &payee, 6);

    let mut block = coinbase(vec![TxOutput::new(BLOCK_VALUE, miner_script())]);
    let paid = services.payments.fill_block_payee(&mut block, height, BLOCK_VALUE).unwrap();

    assert_eq!(paid, Some(payee.clone()));
    assert_eq!(block.outputs.len(), 2);
    assert_eq!(block.outputs[0].value, 80 * COIN);
    assert_eq!(block.outputs[1], TxOutput::new(20 * COIN, payee));
    assert!(services.payments.is_block_payee_valid(&block, height, block_time(height), BLOCK_VALUE));
}

#[test]
fn test_fill_block_payee_falls_back_to_payment_queue() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let known: Vec<Vec<u8>> = net
        .masternodes
        .iter()
        .map(|mn| payee_script(&mn.collateral.public_key_bytes()))
        .collect();

    let mut block = coinbase(vec![TxOutput::new(BLOCK_VALUE, miner_script())]);
    let paid = services
        .payments
        .fill_block_payee(&mut block, TIP_HEIGHT + 1, BLOCK_VALUE)
        .unwrap()
        .unwrap();
    assert!(known.contains(&paid));
    assert_eq!(block.outputs[1].script_pubkey, paid);

    let mut empty = coinbase(Vec::new());
    let err = services
        .payments
        .fill_block_payee(&mut empty, TIP_HEIGHT + 1, BLOCK_VALUE)
        .unwrap_err();
    assert!(matches!(err, MasternodeError::Logic(_)));
}

#[test]
fn test_fill_block_payee_without_masternodes() {
    let net = TestNetwork::new(0);
    let services = net.populated_services();
    let mut block = coinbase(vec![TxOutput::new(BLOCK_VALUE, miner_script())]);

    assert_eq!(
        services.payments.fill_block_payee(&mut block, TIP_HEIGHT + 1, BLOCK_VALUE).unwrap(),
        None
    );
    assert_eq!(block.outputs.len(), 1);
    assert_eq!(block.outputs[0].value, BLOCK_VALUE);
}

#[test]
fn test_local_masternode_votes_once_per_height() {
    let net = TestNetwork::new(12);
    let target = TIP_HEIGHT + 10;
    let ranking = net.populated_services();
    let best = ranked_voters(&ranking, target)[0];

    let services = net.populated_services_with(Some(net.local(net.index_of(&best))));
    assert!(services.payments.process_block(target).unwrap());
    assert!(!services.payments.process_block(target).unwrap());

    let tally = services.payments.tally(target).unwrap();
    assert_eq!(tally.payees.len(), 1);
    assert_eq!(tally.payees[0].votes, 1);
    assert_eq!(services.payments.stats().last_local_vote_height, target);
    assert!(net
        .transport
        .relayed()
        .iter()
        .any(|inv| inv.inv_type == InvType::PaymentWinner));
}

#[test]
fn test_local_masternode_outside_committee_does_not_vote() {
    let net = TestNetwork::new(12);
    let target = TIP_HEIGHT + 10;
    let ranking = net.populated_services();
    let last = ranked_voters(&ranking, target)[11];

    let services = net.populated_services_with(Some(net.local(net.index_of(&last))));
    assert!(!services.payments.process_block(target).unwrap());
    assert!(services.payments.tally(target).is_none());
}

#[test]
fn test_new_tip_triggers_lookahead_vote() {
    let net = TestNetwork::new(12);
    let ranking = net.populated_services();
    let best = ranked_voters(&ranking, TIP_HEIGHT + 10)[0];

    let services = net.populated_services_with(Some(net.local(net.index_of(&best))));
    services.on_new_tip(TIP_HEIGHT);
    assert!(services.payments.tally(TIP_HEIGHT + 10).is_some());
}

#[test]
fn test_sync_request_sends_votes_and_count() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    vote_from_top(&net, &services, TIP_HEIGHT, &miner_script(), 3);
    let peer = "peer-1".to_string();

    assert!(services.handle_message(&peer, GossipMessage::RequestPaymentSync(100)));

    let pushed = net.transport.pushed_to(&peer);
    assert_eq!(pushed.len(), 4);
    assert_eq!(pushed.last(), Some(&GossipMessage::SyncStatusCount(SyncItem::Winners, 3)));

    // Regtest peers may ask again.
    assert_eq!(services.payments.handle_sync_request(&peer, 100).unwrap(), 3);
}

#[test]
fn test_sweep_drops_votes_behind_retained_window() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    vote_from_top(&net, &services, TIP_HEIGHT, &miner_script(), 3);

    assert_eq!(services.payments.check_and_remove(), 0);

    net.chain.extend_to(TIP_HEIGHT + 1100, BLOCK_SPACING);
    assert_eq!(services.payments.check_and_remove(), 3);
    assert!(services.payments.tally(TIP_HEIGHT).is_none());
    assert_eq!(services.payments.stats().votes, 0);
}

#[test]
fn test_last_paid_follows_the_tallies() {
    let net = TestNetwork::new(12);
    let services = net.populated_services();
    let paid = &net.masternodes[4];
    let payee = payee_script(&paid.collateral.public_key_bytes());
    vote_from_top(&net, &services, TIP_HEIGHT, &payee, 6);

    services.registry.update_last_paid(services.payments.as_ref());

    let entry = services.registry.find(&paid.id()).unwrap();
    assert!(entry.last_paid >= block_time(TIP_HEIGHT));
    let unpaid = services.registry.find(&net.masternodes[0].id()).unwrap();
    assert_eq!(unpaid.last_paid, 0);
}
