//! One background thread per peer (§5: "a dedicated outbound worker per
//! peer"). Each [`Peer`] owns the TCP calls to exactly one other node and
//! never blocks any other peer or the tick/heartbeat threads: a slow or dead
//! peer only ever delays its own next command.
//!
//! Call results are routed two ways. `RequestVote` replies are collected by
//! the caller through a dedicated per-election channel (§4.1's `StartElection`
//! needs to tally votes against a deadline). `AppendEntries` replies carry no
//! information any caller needs beyond the step-down-on-higher-term rule,
//! which this module applies for itself rather than bouncing every reply
//! back to the heartbeat loop.

use std::net::SocketAddr;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::raft_capnp::{append_entries, append_entries_reply, request_vote, request_vote_reply};
use crate::rpc::{Rpc, RpcError};

use super::{reset_election_deadline, raft_log::Entry, Core, NodeId, Role};
use crate::common::opcode;

/// How often `Peer::run` wakes from an otherwise-idle `from_main` wait to
/// check whether the node is shutting down.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct RequestVoteReq {
    pub term: u64,
    pub candidate_id: NodeId,
}

pub(crate) struct VoteOutcome {
    pub peer_id: NodeId,
    pub term: u64,
    pub vote_granted: bool,
}

pub(crate) struct AppendEntriesReq {
    pub term: u64,
    pub leader_id: NodeId,
    pub entries: Vec<Entry>,
    pub commit_index: i64,
}

enum Command {
    RequestVote { req: RequestVoteReq, reply_to: Sender<VoteOutcome> },
    AppendEntries { req: AppendEntriesReq },
    Shutdown,
}

/// A live handle to a peer's background thread. `request_vote`/
/// `append_entries` never block: they just enqueue a command, so a slow
/// peer can't stall the caller (tick thread or heartbeat thread).
pub(crate) struct PeerHandle {
    to_peer: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl PeerHandle {
    /// Takes only a [`Weak`] reference to `core`: a peer thread must never
    /// hold a strong `Arc<Core>` for its lifetime, or `Core` (which owns
    /// every `PeerHandle`, whose `Drop` shuts this thread down) could never
    /// reach a strong count of zero and would leak for the life of the
    /// process.
    pub fn start(id: NodeId, addr: SocketAddr, core: &Arc<Core>) -> PeerHandle {
        let (to_peer, from_main) = channel::<Command>();
        let core = Arc::downgrade(core);
        let thread = thread::spawn(move || {
            let peer = Peer { id, addr, core, from_main };
            peer.run();
        });
        PeerHandle { to_peer, thread: Some(thread) }
    }

    pub fn request_vote(&self, req: RequestVoteReq, reply_to: Sender<VoteOutcome>) {
        let _ = self.to_peer.send(Command::RequestVote { req, reply_to });
    }

    pub fn append_entries(&self, req: AppendEntriesReq) {
        let _ = self.to_peer.send(Command::AppendEntries { req });
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        let _ = self.to_peer.send(Command::Shutdown);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

struct Peer {
    id: NodeId,
    addr: SocketAddr,
    core: Weak<Core>,
    from_main: std::sync::mpsc::Receiver<Command>,
}

impl Peer {
    /// Polls `from_main` with a short timeout instead of blocking on it
    /// forever, so this thread observes the node's shutdown signal between
    /// commands rather than only on its next inbound message (which, for an
    /// idle peer, might never come).
    fn run(self) {
        loop {
            let core = match self.core.upgrade() {
                Some(core) => core,
                None => return,
            };
            if core.stop.load(Ordering::SeqCst) {
                return;
            }
            drop(core);
            match self.from_main.recv_timeout(STOP_POLL_INTERVAL) {
                Ok(Command::RequestVote { req, reply_to }) => self.send_request_vote(req, reply_to),
                Ok(Command::AppendEntries { req }) => self.send_append_entries(req),
                Ok(Command::Shutdown) => return,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn send_request_vote(&self, req: RequestVoteReq, reply_to: Sender<VoteOutcome>) {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return,
        };
        let mut rpc = Rpc::new(opcode::REQUEST_VOTE);
        {
            let mut params = rpc.get_param_builder().init_as::<request_vote::Builder>();
            params.set_term(req.term as i64);
            params.set_candidate_id(&req.candidate_id);
        }
        match rpc
            .send(self.addr, core.timing.raft_rpc_deadline)
            .and_then(|msg| Self::parse_request_vote_reply(&msg))
        {
            Ok((term, vote_granted)) => {
                self.maybe_step_down(&core, term, true);
                let _ = reply_to.send(VoteOutcome { peer_id: self.id.clone(), term, vote_granted });
            }
            Err(e) => {
                log::debug!("request_vote to {} failed: {e}", self.id);
            }
        }
    }

    fn send_append_entries(&self, req: AppendEntriesReq) {
        let core = match self.core.upgrade() {
            Some(core) => core,
            None => return,
        };
        let mut rpc = Rpc::new(opcode::APPEND_ENTRIES);
        {
            let mut params = rpc.get_param_builder().init_as::<append_entries::Builder>();
            params.set_term(req.term as i64);
            params.set_leader_id(&req.leader_id);
            params.set_commit_index(req.commit_index);
            let mut entries = params.reborrow().init_entries(req.entries.len() as u32);
            for (i, entry) in req.entries.iter().enumerate() {
                let mut b = entries.reborrow().get(i as u32);
                b.set_term(entry.term as i64);
                b.set_index(entry.index);
                b.set_op(&entry.op);
            }
        }
        match rpc
            .send(self.addr, core.timing.raft_rpc_deadline)
            .and_then(|msg| Self::parse_append_entries_reply(&msg))
        {
            Ok((term, _success)) => self.maybe_step_down(&core, term, false),
            Err(e) => log::debug!("append_entries to {} failed: {e}", self.id),
        }
    }

    fn parse_request_vote_reply(msg: &capnp::message::Reader<capnp::serialize::OwnedSegments>) -> Result<(u64, bool), RpcError> {
        let result = Rpc::get_result_reader(msg)?;
        let reply = result.get_as::<request_vote_reply::Reader>()?;
        Ok((reply.get_term() as u64, reply.get_vote_granted()))
    }

    fn parse_append_entries_reply(msg: &capnp::message::Reader<capnp::serialize::OwnedSegments>) -> Result<(u64, bool), RpcError> {
        let result = Rpc::get_result_reader(msg)?;
        let reply = result.get_as::<append_entries_reply::Reader>()?;
        Ok((reply.get_term() as u64, reply.get_success()))
    }

    /// §4.1's blanket rule: any observed term greater than our own causes
    /// immediate demotion, regardless of what RPC carried it. `reset_timer`
    /// only applies during an election (§4.1's `StartElection`
    /// "abandon the election" step); a Leader stepping down from a stray
    /// heartbeat reply does not get a fresh election timer.
    fn maybe_step_down(&self, core: &Core, observed_term: u64, reset_timer: bool) {
        let mut inner = core.inner.lock().unwrap();
        if observed_term > inner.current_term {
            inner.current_term = observed_term;
            inner.voted_for = None;
            inner.role = Role::Follower;
            if reset_timer {
                reset_election_deadline(&mut inner, &core.timing);
            }
            log::info!("{} steps down: {} reported higher term {observed_term}", core.node_id, self.id);
        }
    }
}
