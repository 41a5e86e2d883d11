//! The Raft leader-election sidecar (§4.1).
//!
//! A [`RaftNode`] runs three kinds of background activity once constructed:
//! a tick thread that starts elections when the election timer lapses, a
//! per-peer thread (see [`peer`]) that carries out one peer's RPCs without
//! blocking anyone else, and — only while this node is Leader — a heartbeat
//! thread that fans `AppendEntries` out to every peer on a fixed interval.
//! All three only ever touch shared state through `Core::inner`'s mutex, and
//! never hold it across an outbound RPC.

pub mod handlers;
pub mod peer;
pub mod raft_log;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::common::Timing;
use crate::rpc::RpcObject;
use peer::{PeerHandle, RequestVoteReq, VoteOutcome};
use raft_log::Log;

pub use handlers::{AppendEntriesHandler, RequestVoteHandler};
pub use raft_log::Entry;

pub type NodeId = String;

/// A node's current role (§5, Design Note: tagged variants over a
/// struct-of-optionals). `Candidate` carries the set of peers that have
/// granted it a vote this term; `Leader` carries the stop flag for its own
/// heartbeat thread, so stepping down can shut that thread down cleanly.
#[derive(Debug)]
pub(crate) enum Role {
    Follower,
    Candidate { votes_received: HashSet<NodeId> },
    Leader { heartbeat_stop: Arc<AtomicBool> },
}

/// State guarded by `Core::inner`'s single mutex (§5: one mutex per node;
/// everything reachable from an RPC handler or a background thread lives
/// behind it).
pub(crate) struct Inner {
    pub role: Role,
    pub current_term: u64,
    pub voted_for: Option<NodeId>,
    pub leader_id: Option<NodeId>,
    pub log: Log,
    pub commit_index: i64,
    pub election_deadline: Instant,
    pub heartbeat_thread: Option<JoinHandle<()>>,
}

/// Shared node state, `Arc`'d so background threads (tick, heartbeat, each
/// peer) can outlive the call that spawned them without borrowing `RaftNode`
/// itself.
pub(crate) struct Core {
    pub node_id: NodeId,
    pub peers: HashMap<NodeId, SocketAddr>,
    pub timing: Timing,
    pub inner: Mutex<Inner>,
    pub peer_handles: Mutex<HashMap<NodeId, PeerHandle>>,
    pub apply: Box<dyn Fn(&[u8]) + Send + Sync>,
    pub stop: AtomicBool,
}

/// A running Raft node. Dropping it stops the tick thread, every peer
/// thread, and (if leading) the heartbeat thread.
pub struct RaftNode {
    core: Arc<Core>,
    tick_thread: Option<JoinHandle<()>>,
}

impl RaftNode {
    /// Starts a node. `peers` must not include `node_id`. `apply` is called
    /// — under the node's mutex — once per committed log entry, in index
    /// order, exactly as §4.1's `AppendEntries` contract and the `Propose`
    /// operation describe.
    pub fn new<F>(
        node_id: impl Into<NodeId>,
        peers: HashMap<NodeId, SocketAddr>,
        timing: Timing,
        apply: F,
    ) -> RaftNode
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let node_id = node_id.into();
        let inner = Inner {
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Log::new(),
            commit_index: -1,
            election_deadline: Instant::now() + random_election_timeout(&timing),
            heartbeat_thread: None,
        };
        let core = Arc::new(Core {
            node_id: node_id.clone(),
            peers: peers.clone(),
            timing,
            inner: Mutex::new(inner),
            peer_handles: Mutex::new(HashMap::new()),
            apply: Box::new(apply),
            stop: AtomicBool::new(false),
        });

        {
            let mut handles = core.peer_handles.lock().unwrap();
            for (id, addr) in &peers {
                handles.insert(id.clone(), PeerHandle::start(id.clone(), *addr, &core));
            }
        }

        let tick_thread = {
            let core = core.clone();
            thread::spawn(move || tick_loop(core))
        };

        RaftNode { core, tick_thread: Some(tick_thread) }
    }

    /// C3: the node this one currently believes is leader, if any.
    pub fn get_leader(&self) -> Option<NodeId> {
        self.core.inner.lock().unwrap().leader_id.clone()
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.core.inner.lock().unwrap().role, Role::Leader { .. })
    }

    pub fn current_term(&self) -> u64 {
        self.core.inner.lock().unwrap().current_term
    }

    /// Appends `op` to the log if this node is currently Leader (supplemental
    /// operation, SPEC_FULL.md §4.1: the spec's `AppendEntries` contract
    /// never explains how an entry enters a leader's log in the first
    /// place). Since there is no match-index quorum tracking in this
    /// whole-log-replication design, a proposed entry is applied locally the
    /// moment it's appended — the same entry reaches followers, and they
    /// apply it too, on the next heartbeat.
    pub fn propose(&self, op: Vec<u8>) -> Result<i64, crate::common::RaftError> {
        let mut inner = self.core.inner.lock().unwrap();
        if !matches!(inner.role, Role::Leader { .. }) {
            return Err(crate::common::RaftError::Config(format!(
                "{} is not the leader",
                self.core.node_id
            )));
        }
        let term = inner.current_term;
        let index = inner.log.append(term, op.clone());
        inner.commit_index = inner.commit_index.max(index);
        (self.core.apply)(&op);
        Ok(index)
    }

    /// RPC services to register with an `RpcServer` under the Raft opcodes
    /// (C4, §6).
    pub fn rpc_services(&self) -> Vec<(i16, Box<dyn RpcObject>)> {
        vec![
            (
                crate::common::opcode::REQUEST_VOTE,
                Box::new(RequestVoteHandler::new(self.core.clone())) as Box<dyn RpcObject>,
            ),
            (
                crate::common::opcode::APPEND_ENTRIES,
                Box::new(AppendEntriesHandler::new(self.core.clone())) as Box<dyn RpcObject>,
            ),
        ]
    }
}

impl Drop for RaftNode {
    fn drop(&mut self) {
        self.core.stop.store(true, Ordering::SeqCst);
        if let Some(t) = self.tick_thread.take() {
            let _ = t.join();
        }
        let heartbeat_thread = {
            let mut inner = self.core.inner.lock().unwrap();
            inner.heartbeat_thread.take()
        };
        if let Some(t) = heartbeat_thread {
            let _ = t.join();
        }
    }
}

/// Election timeout drawn uniformly from `[timing.election_timeout_min,
/// timing.election_timeout_max)` (§4.1: jitter to avoid split votes).
fn random_election_timeout(timing: &Timing) -> Duration {
    let min = timing.election_timeout_min.as_millis() as u64;
    let max = timing.election_timeout_max.as_millis() as u64;
    let millis = if max > min { rand::thread_rng().gen_range(min..max) } else { min };
    Duration::from_millis(millis)
}

pub(crate) fn reset_election_deadline(inner: &mut Inner, timing: &Timing) {
    inner.election_deadline = Instant::now() + random_election_timeout(timing);
}

fn tick_loop(core: Arc<Core>) {
    while !core.stop.load(Ordering::SeqCst) {
        let should_start = {
            let inner = core.inner.lock().unwrap();
            !matches!(inner.role, Role::Leader { .. }) && Instant::now() >= inner.election_deadline
        };
        if should_start {
            start_election(&core);
        }
        thread::sleep(core.timing.tick_interval);
    }
}

/// C1: run one election. Casts this node's own vote, fans `RequestVote` out
/// to every peer, tallies replies until a majority is reached or
/// `timing.raft_rpc_deadline` elapses, then becomes Leader or falls back to
/// Follower (§4.1's `StartElection`).
fn start_election(core: &Arc<Core>) {
    let term = {
        let mut inner = core.inner.lock().unwrap();
        let mut votes_received = HashSet::new();
        votes_received.insert(core.node_id.clone());
        inner.role = Role::Candidate { votes_received };
        inner.current_term += 1;
        inner.voted_for = Some(core.node_id.clone());
        inner.leader_id = None;
        reset_election_deadline(&mut inner, &core.timing);
        log::info!("{} becomes Candidate for term {}", core.node_id, inner.current_term);
        inner.current_term
    };

    if core.stop.load(Ordering::SeqCst) {
        return;
    }

    let (tx, rx) = channel::<VoteOutcome>();
    {
        let handles = core.peer_handles.lock().unwrap();
        for id in core.peers.keys() {
            if let Some(handle) = handles.get(id) {
                handle.request_vote(
                    RequestVoteReq { term, candidate_id: core.node_id.clone() },
                    tx.clone(),
                );
            }
        }
    }
    drop(tx);

    let majority = (core.peers.len() + 1) / 2 + 1;
    let mut granted = 1; // ourselves, already recorded in `inner.role` above
    let deadline = Instant::now() + core.timing.raft_rpc_deadline;

    while granted < majority {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(outcome) if outcome.term == term && outcome.vote_granted => {
                let mut inner = core.inner.lock().unwrap();
                if inner.current_term != term {
                    return; // superseded while replies were still arriving
                }
                match &mut inner.role {
                    Role::Candidate { votes_received } => {
                        votes_received.insert(outcome.peer_id);
                        granted = votes_received.len();
                    }
                    _ => return, // already Leader/Follower from another path
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let mut inner = core.inner.lock().unwrap();
    if inner.current_term != term || !matches!(inner.role, Role::Candidate { .. }) {
        // Superseded (a higher term arrived, or we're already Leader/Follower
        // from another path) while we were waiting on replies.
        return;
    }

    if granted >= majority {
        let heartbeat_stop = Arc::new(AtomicBool::new(false));
        inner.role = Role::Leader { heartbeat_stop: heartbeat_stop.clone() };
        inner.leader_id = Some(core.node_id.clone());
        log::info!("{} becomes Leader for term {}", core.node_id, term);
        let handle = {
            let core = core.clone();
            thread::spawn(move || run_heartbeats(core, heartbeat_stop))
        };
        inner.heartbeat_thread = Some(handle);
    } else {
        log::info!(
            "{} lost the election for term {} ({} of {} votes)",
            core.node_id,
            term,
            granted,
            majority
        );
        inner.role = Role::Follower;
        reset_election_deadline(&mut inner, &core.timing);
    }
}

/// C2: while this node is Leader, send `AppendEntries` to every peer every
/// `timing.heartbeat_interval`, carrying the whole log and current
/// commitIndex (§4.1's `RunHeartbeats`, the whole-log-replication
/// simplification). Replies are ignored except for the step-down-on-higher-
/// term rule, which each peer thread applies for itself.
fn run_heartbeats(core: Arc<Core>, heartbeat_stop: Arc<AtomicBool>) {
    loop {
        if core.stop.load(Ordering::SeqCst) || heartbeat_stop.load(Ordering::SeqCst) {
            return;
        }
        let (term, entries, commit_index, still_leader) = {
            let inner = core.inner.lock().unwrap();
            (
                inner.current_term,
                inner.log.as_slice().to_vec(),
                inner.commit_index,
                matches!(inner.role, Role::Leader { .. }),
            )
        };
        if !still_leader {
            return;
        }
        let handles = core.peer_handles.lock().unwrap();
        for id in core.peers.keys() {
            if let Some(handle) = handles.get(id) {
                handle.append_entries(peer::AppendEntriesReq {
                    term,
                    leader_id: core.node_id.clone(),
                    entries: entries.clone(),
                    commit_index,
                });
            }
        }
        drop(handles);
        thread::sleep(core.timing.heartbeat_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel as std_channel;
    use std::sync::Mutex as StdMutex;

    fn test_timing() -> Timing {
        Timing {
            heartbeat_interval: Duration::from_millis(20),
            election_timeout_min: Duration::from_millis(60),
            election_timeout_max: Duration::from_millis(100),
            raft_rpc_deadline: Duration::from_millis(50),
            tick_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn lone_node_elects_itself_leader() {
        let (_tx, rx) = std_channel::<Vec<u8>>();
        let applied: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
        let applied_clone = applied.clone();
        let node = RaftNode::new(
            "n1".to_string(),
            HashMap::new(),
            test_timing(),
            move |op: &[u8]| applied_clone.lock().unwrap().push(op.to_vec()),
        );
        let deadline = Instant::now() + Duration::from_millis(500);
        while !node.is_leader() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(node.is_leader());
        assert_eq!(node.get_leader().as_deref(), Some("n1"));
        drop(rx);
    }

    #[test]
    fn propose_before_leadership_is_rejected() {
        let node = RaftNode::new("n1".to_string(), HashMap::new(), test_timing(), |_op: &[u8]| {});
        // There's a race between construction and self-election on a
        // zero-peer cluster, but a non-leader node must always reject.
        if !node.is_leader() {
            assert!(node.propose(vec![1, 2, 3]).is_err());
        }
    }
}
