mod common;

use std::time::Duration;

use common::{server_addr, server_id, Cluster, GRACE_PERIOD, LEADER_TIMEOUT};
use lan_chat::common::messages::Message;
use lan_chat::server::node::Outbound;

fn past_timeout() -> Duration {
    LEADER_TIMEOUT + Duration::from_secs(1)
}

#[test]
fn test_three_servers_agree_on_one_leader() {
    let mut cluster = Cluster::new(&[1, 2, 3]);
    cluster.beacon_round();
    cluster.beacon_round();
    cluster.startup();
    cluster.heartbeat_round();

    let leaders = cluster.leaders();
    assert_eq!(leaders.len(), 1);
    assert_eq!(cluster.agreed_leader(), Some(leaders[0].clone()));
}

#[test]
fn test_full_ring_elects_highest_identity() {
    let mut cluster = Cluster::fully_meshed(&[1, 2, 3]);
    assert!(cluster.leaders().is_empty());

    // the lost rounds are retried once the leader-loss timeout passes
    cluster.advance(past_timeout());
    cluster.monitor_round();

    assert_eq!(cluster.leaders(), vec![server_id(3)]);
    assert_eq!(cluster.agreed_leader(), Some(server_id(3)));
    assert!(cluster.nodes.iter().all(|n| !n.has_voted() || n.is_leader()));
}

#[test]
fn test_redelivered_token_is_dropped() {
    let mut cluster = Cluster::fully_meshed(&[1, 2, 3]);
    let token = Message::Election {
        token: server_id(3),
    };

    let first = cluster.nodes[1].handle_unicast(token.clone(), server_addr(1));
    assert!(matches!(&first[..], [Outbound::Token(route)] if route.token() == &server_id(3)));

    let again = cluster.nodes[1].handle_unicast(token, server_addr(1));
    assert!(again.is_empty());
}

#[test]
fn test_unreachable_highest_server_is_skipped() {
    let mut cluster = Cluster::fully_meshed(&[1, 2, 3]);
    cluster.stop(2);

    cluster.advance(past_timeout());
    cluster.monitor_round();

    assert_eq!(cluster.leaders(), vec![server_id(2)]);
    assert_eq!(cluster.agreed_leader(), Some(server_id(2)));
    assert!(!cluster.nodes[1].membership().contains(&server_id(3)));
}

#[test]
fn test_survivors_replace_a_silent_leader() {
    let mut cluster = Cluster::fully_meshed(&[1, 2, 3]);
    cluster.advance(past_timeout());
    cluster.monitor_round();
    cluster.heartbeat_round();
    assert_eq!(cluster.agreed_leader(), Some(server_id(3)));

    // leader stops; nothing changes until the timeout elapses
    cluster.stop(2);
    cluster.advance(LEADER_TIMEOUT);
    cluster.monitor_round();
    assert_eq!(cluster.agreed_leader(), Some(server_id(3)));

    cluster.advance(Duration::from_secs(1));
    cluster.monitor_round();
    assert_eq!(cluster.leaders(), vec![server_id(2)]);
    assert_eq!(cluster.agreed_leader(), Some(server_id(2)));
}

#[test]
fn test_reaper_forgets_stopped_server() {
    let mut cluster = Cluster::fully_meshed(&[1, 2, 3]);
    cluster.stop(2);
    cluster.advance(GRACE_PERIOD);
    cluster.beacon_round();
    cluster.reap_round();
    assert!(cluster.nodes[0].membership().contains(&server_id(3)));

    cluster.advance(Duration::from_secs(1));
    cluster.reap_round();
    assert!(!cluster.nodes[0].membership().contains(&server_id(3)));
    assert!(cluster.nodes[0].membership().contains(&server_id(2)));
    assert!(cluster.nodes[0].membership().contains(&server_id(1)));
}

#[test]
fn test_two_leaders_converge_on_higher_identity() {
    let mut cluster = Cluster::new(&[1, 2]);

    // each server wins alone while the other is unreachable
    cluster.stop(1);
    cluster.startup();
    cluster.resume(1);
    cluster.stop(0);
    cluster.startup();
    cluster.resume(0);
    assert_eq!(cluster.leaders().len(), 2);

    cluster.heartbeat_round();
    assert_eq!(cluster.leaders(), vec![server_id(2)]);
    assert_eq!(cluster.agreed_leader(), Some(server_id(2)));
}
