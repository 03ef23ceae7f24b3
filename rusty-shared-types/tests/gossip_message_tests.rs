//! Wire-level tests for the masternode gossip messages.

use rusty_shared_types::*;

// Helper functions for creating dummy data
fn dummy_hash(seed: u8) -> Hash {
    [seed; 32]
}

fn dummy_outpoint(seed: u8) -> OutPoint {
    OutPoint::new(dummy_hash(seed), seed as u32)
}

fn dummy_announce(seed: u8) -> MasternodeAnnounce {
    let identity = MasternodeIdentity {
        collateral_outpoint: dummy_outpoint(seed),
        network_address: "192.0.2.10:9340".parse().unwrap(),
        collateral_public_key: vec![seed; 32],
        operator_public_key: vec![seed.wrapping_add(1); 32],
        protocol_version: 70040,
    };
    MasternodeAnnounce {
        last_ping: MasternodePing::empty(identity.id()),
        identity,
        signature: vec![seed; 64],
        sig_time: 1_600_000_000,
        stake_signover: None,
    }
}

#[test]
fn test_lock_request_survives_the_wire() {
    let tx = Transaction {
        version: 1,
        inputs: vec![TxInput::spending(dummy_outpoint(3))],
        outputs: vec![TxOutput::new(5 * COIN, vec![0x51])],
        lock_time: 0,
    };
    let message = GossipMessage::LockRequest(tx.clone());
    let decoded = GossipMessage::decode(&message.encode().unwrap()).unwrap();
    match decoded {
        GossipMessage::LockRequest(received) => assert_eq!(received.txid(), tx.txid()),
        other => panic!("unexpected message {}", other.command()),
    }
}

#[test]
fn test_consensus_vote_expiration_is_local_only() {
    let mut vote = ConsensusVote::new(MasternodeID(dummy_outpoint(1)), dummy_hash(9), 500);
    vote.expiration = 12345;
    let decoded = GossipMessage::decode(&GossipMessage::LockVote(vote.clone()).encode().unwrap()).unwrap();
    match decoded {
        GossipMessage::LockVote(received) => {
            assert_eq!(received.expiration, 0);
            assert_eq!(received.hash(), vote.hash());
        }
        other => panic!("unexpected message {}", other.command()),
    }
}

#[test]
fn test_announce_hash_depends_on_time_and_collateral_key() {
    let a = dummy_announce(1);
    let mut b = a.clone();
    b.identity.network_address = "192.0.2.11:9340".parse().unwrap();
    assert_eq!(a.hash(), b.hash());

    b.sig_time += 1;
    assert_ne!(a.hash(), b.hash());
    assert_ne!(a.hash(), dummy_announce(2).hash());
}

#[test]
fn test_announce_signing_message_covers_address() {
    let a = dummy_announce(1);
    let mut b = a.clone();
    b.identity.network_address = "192.0.2.11:9340".parse().unwrap();
    assert_ne!(a.signing_message(), b.signing_message());
}

#[test]
fn test_truncated_bytes_are_rejected() {
    let bytes = GossipMessage::Announce(dummy_announce(4)).encode().unwrap();
    assert!(GossipMessage::decode(&bytes[..bytes.len() / 2]).is_err());
}

#[test]
fn test_command_names() {
    assert_eq!(GossipMessage::RequestList(None).command(), "dseg");
    assert_eq!(GossipMessage::RequestPaymentSync(10).command(), "mnget");
    assert_eq!(GossipMessage::SyncStatusCount(SyncItem::Winners, 3).command(), "ssc");
    assert_eq!(GossipMessage::RequestLockVotes.command(), "txllist");
}

#[test]
fn test_outpoint_short_form() {
    let outpoint: OutPoint = "ff00000000000000000000000000000000000000000000000000000000000001-7"
        .parse()
        .unwrap();
    assert_eq!(
        outpoint.txid,
        hex_literal::hex!("ff00000000000000000000000000000000000000000000000000000000000001")
    );
    assert_eq!(outpoint.vout, 7);
    assert_eq!(outpoint.to_string().parse::<OutPoint>().unwrap(), outpoint);

    assert!("abcd-1".parse::<OutPoint>().is_err());
    assert!("ff00000000000000000000000000000000000000000000000000000000000001".parse::<OutPoint>().is_err());
}
