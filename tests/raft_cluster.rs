//! End-to-end Raft scenarios (§8: S1-S4), each spinning up real `RaftNode`/
//! `RpcServer` pairs talking over real loopback TCP sockets, with a
//! shortened `Timing` so the suite stays fast.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::{Duration, Instant};

use rideshare_raft_sidecar::common::Timing;
use rideshare_raft_sidecar::raft::RaftNode;
use rideshare_raft_sidecar::rpc::RpcServer;

fn free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0)).unwrap().local_addr().unwrap().port()
}

fn fast_timing() -> Timing {
    Timing {
        heartbeat_interval: Duration::from_millis(30),
        election_timeout_min: Duration::from_millis(120),
        election_timeout_max: Duration::from_millis(220),
        raft_rpc_deadline: Duration::from_millis(100),
        tick_interval: Duration::from_millis(10),
    }
}

#[allow(dead_code)]
struct ClusterNode {
    id: String,
    node: RaftNode,
    server: RpcServer,
}

/// Starts an `n`-node cluster where every node knows about every other.
fn start_cluster(n: usize) -> Vec<ClusterNode> {
    let ids: Vec<String> = (1..=n).map(|i| format!("r{i}")).collect();
    let addrs: HashMap<String, SocketAddr> = ids
        .iter()
        .map(|id| (id.clone(), SocketAddr::from(([127, 0, 0, 1], free_port()))))
        .collect();
    build_cluster(&ids, &addrs)
}

fn build_cluster(ids: &[String], addrs: &HashMap<String, SocketAddr>) -> Vec<ClusterNode> {
    ids.iter()
        .map(|id| {
            let peers: HashMap<String, SocketAddr> = addrs
                .iter()
                .filter(|(peer_id, _)| *peer_id != id)
                .map(|(peer_id, addr)| (peer_id.clone(), *addr))
                .collect();
            let node = RaftNode::new(id.clone(), peers, fast_timing(), |_op: &[u8]| {});
            let mut server = RpcServer::new_with_services(node.rpc_services());
            server.bind(addrs[id]).expect("bind");
            server.repl().expect("repl");
            ClusterNode { id: id.clone(), node, server }
        })
        .collect()
}

fn wait_for_leader(cluster: &[ClusterNode], deadline: Instant) -> Option<String> {
    while Instant::now() < deadline {
        if let Some(n) = cluster.iter().find(|n| n.node.is_leader()) {
            return Some(n.id.clone());
        }
        thread::sleep(Duration::from_millis(10));
    }
    None
}

#[test]
fn s1_initial_election_picks_exactly_one_leader() {
    let cluster = start_cluster(5);
    let deadline = Instant::now() + fast_timing().election_timeout_max * 5;
    let leader_id = wait_for_leader(&cluster, deadline).expect("a leader should emerge");

    let leaders: Vec<&ClusterNode> = cluster.iter().filter(|n| n.node.is_leader()).collect();
    assert_eq!(leaders.len(), 1, "exactly one node should hold Leader role");
    assert!(leaders[0].node.current_term() >= 1);

    let follower_deadline = Instant::now() + Duration::from_millis(500);
    for n in cluster.iter().filter(|n| n.id != leader_id) {
        while n.node.get_leader().as_deref() != Some(leader_id.as_str())
            && Instant::now() < follower_deadline
        {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(n.node.get_leader().as_deref(), Some(leader_id.as_str()));
        assert!(!n.node.is_leader());
    }
}

#[test]
fn s2_a_new_leader_is_elected_after_the_old_one_is_killed() {
    let mut cluster = start_cluster(5);
    let deadline = Instant::now() + fast_timing().election_timeout_max * 5;
    let first_leader = wait_for_leader(&cluster, deadline).expect("initial election");
    let first_term = cluster.iter().find(|n| n.id == first_leader).unwrap().node.current_term();

    let idx = cluster.iter().position(|n| n.id == first_leader).unwrap();
    cluster.remove(idx); // drops the node and its server, closing its socket

    let deadline = Instant::now() + fast_timing().election_timeout_max * 3;
    let second_leader = wait_for_leader(&cluster, deadline).expect("re-election after leader loss");
    assert_ne!(second_leader, first_leader);
    let second_term = cluster.iter().find(|n| n.id == second_leader).unwrap().node.current_term();
    assert!(second_term > first_term, "the new leader's term must be strictly higher");
}

#[test]
fn s3_a_follower_failure_does_not_disturb_the_leader() {
    let mut cluster = start_cluster(5);
    let deadline = Instant::now() + fast_timing().election_timeout_max * 5;
    let leader_id = wait_for_leader(&cluster, deadline).expect("initial election");
    let leader_term = cluster.iter().find(|n| n.id == leader_id).unwrap().node.current_term();

    let follower_idx = cluster.iter().position(|n| n.id != leader_id).unwrap();
    cluster.remove(follower_idx);

    thread::sleep(fast_timing().heartbeat_interval * 3);

    let leader = cluster.iter().find(|n| n.id == leader_id).unwrap();
    assert!(leader.node.is_leader(), "the leader must remain leader");
    assert_eq!(leader.node.current_term(), leader_term, "no term change should occur");
}

/// S4 models a network partition statically: `majority` only knows about
/// each other, `isolated` only knows about itself. This exercises the
/// property the scenario cares about (the majority side elects a leader at
/// a higher term despite another node believing itself leader) without a
/// mid-run socket-blackholing harness this design has no hooks for. The
/// "old leader steps down on the first AppendEntries it receives after
/// healing" half of S4 is covered separately by
/// `raft::handlers::tests::a_leader_steps_down_on_a_valid_append_entries_from_a_new_leader`,
/// since this design has no dynamic membership to reconnect a partitioned
/// peer at runtime.
#[test]
fn s4_minority_partition_still_elects_a_majority_side_leader() {
    let ids: Vec<String> = (1..=5).map(|i| format!("r{i}")).collect();
    let addrs: HashMap<String, SocketAddr> = ids
        .iter()
        .map(|id| (id.clone(), SocketAddr::from(([127, 0, 0, 1], free_port()))))
        .collect();

    let isolated_id = ids[0].clone();
    let majority_ids: Vec<String> = ids[1..].to_vec();

    let isolated_addrs: HashMap<String, SocketAddr> =
        [(isolated_id.clone(), addrs[&isolated_id])].into_iter().collect();
    let majority_addrs: HashMap<String, SocketAddr> = majority_ids
        .iter()
        .map(|id| (id.clone(), addrs[id]))
        .collect();

    let isolated_side = build_cluster(&[isolated_id.clone()], &isolated_addrs);
    let majority_side = build_cluster(&majority_ids, &majority_addrs);

    let deadline = Instant::now() + fast_timing().election_timeout_max * 4;
    let majority_leader =
        wait_for_leader(&majority_side, deadline).expect("majority side must elect a leader");
    assert!(majority_side.iter().find(|n| n.id == majority_leader).unwrap().node.current_term() >= 1);

    // The isolated node, with no peers at all, also declares itself leader
    // (a lone node is trivially its own majority) — demonstrating why a
    // true split-brain is possible under this design without a working
    // quorum check across both sides, exactly as §9 flags.
    let isolated_deadline = Instant::now() + fast_timing().election_timeout_max * 2;
    let isolated_leader = wait_for_leader(&isolated_side, isolated_deadline);
    assert_eq!(isolated_leader.as_deref(), Some(isolated_id.as_str()));
}
