//! `RpcObject` adapters wiring the Raft RPC verbs (§4.1) into the shared
//! transport (C4). Each handler holds only the pieces of `Core` it needs and
//! runs the contract under `Core::inner`'s mutex, exactly as §4.1 specifies.

use std::sync::Arc;

use capnp::any_pointer;

use crate::common::fatal_invariant_violation;
use crate::raft_capnp::{append_entries, append_entries_reply, request_vote, request_vote_reply};
use crate::rpc::{RpcError, RpcObject};

use super::raft_log::Entry;
use super::{reset_election_deadline, Core, Inner, Role};

pub struct RequestVoteHandler {
    core: Arc<Core>,
}

impl RequestVoteHandler {
    pub(crate) fn new(core: Arc<Core>) -> RequestVoteHandler {
        RequestVoteHandler { core }
    }
}

impl RpcObject for RequestVoteHandler {
    fn handle_rpc(
        &self,
        params: any_pointer::Reader,
        mut result: any_pointer::Builder,
    ) -> Result<(), RpcError> {
        let req = params.get_as::<request_vote::Reader>()?;
        let candidate_id = read_text(req.get_candidate_id())?;
        let term = req.get_term() as u64;

        let (reply_term, vote_granted) = {
            let mut inner = self.core.inner.lock().unwrap();
            handle_request_vote_locked(&mut inner, &self.core.timing, &candidate_id, term)
        };

        let mut reply = result.init_as::<request_vote_reply::Builder>();
        reply.set_term(reply_term as i64);
        reply.set_vote_granted(vote_granted);
        Ok(())
    }
}

pub struct AppendEntriesHandler {
    core: Arc<Core>,
}

impl AppendEntriesHandler {
    pub(crate) fn new(core: Arc<Core>) -> AppendEntriesHandler {
        AppendEntriesHandler { core }
    }
}

impl RpcObject for AppendEntriesHandler {
    fn handle_rpc(
        &self,
        params: any_pointer::Reader,
        mut result: any_pointer::Builder,
    ) -> Result<(), RpcError> {
        let req = params.get_as::<append_entries::Reader>()?;
        let leader_id = read_text(req.get_leader_id())?;
        let term = req.get_term() as u64;
        let commit_index = req.get_commit_index();

        let mut entries = Vec::new();
        for e in req.get_entries()?.iter() {
            entries.push(Entry {
                term: e.get_term() as u64,
                index: e.get_index(),
                op: e.get_op()?.to_vec(),
            });
        }

        let (reply_term, success) = {
            let mut inner = self.core.inner.lock().unwrap();
            handle_append_entries_locked(
                &mut inner,
                &self.core.timing,
                &self.core.apply,
                term,
                &leader_id,
                entries,
                commit_index,
            )
        };

        let mut reply = result.init_as::<append_entries_reply::Builder>();
        reply.set_term(reply_term as i64);
        reply.set_success(success);
        Ok(())
    }
}

fn read_text(reader: capnp::Result<capnp::text::Reader>) -> Result<String, RpcError> {
    let text = reader?;
    text.to_str().map(|s| s.to_string()).map_err(|e| RpcError::Capnp(capnp::Error::failed(e.to_string())))
}

/// §4.1's `RequestVote` contract, run under the node's mutex:
/// 1. If `req.term > currentTerm`, step down, adopt the term, clear votedFor.
/// 2. Grant the vote iff `req.term >= currentTerm` and votedFor is none or
///    already this candidate; reset the election timer on grant.
/// 3. Reply with `(currentTerm, granted)`.
fn handle_request_vote_locked(
    inner: &mut Inner,
    timing: &crate::common::Timing,
    candidate_id: &str,
    term: u64,
) -> (u64, bool) {
    if term > inner.current_term {
        inner.current_term = term;
        inner.voted_for = None;
        inner.role = Role::Follower;
    }

    let mut vote_granted = false;
    if term >= inner.current_term {
        let can_vote = match &inner.voted_for {
            None => true,
            Some(v) => v == candidate_id,
        };
        if can_vote {
            inner.voted_for = Some(candidate_id.to_string());
            vote_granted = true;
            reset_election_deadline(inner, timing);
        }
    }
    (inner.current_term, vote_granted)
}

/// §4.1's `AppendEntries` contract, run under the node's mutex:
/// 1. If `req.term < currentTerm`, reject.
/// 2. Otherwise adopt the term, become Follower, record the leader, clear
///    votedFor, reset the election timer.
/// 3. Replace the whole log with `req.entries`.
/// 4. Apply any newly committed entries, in order, via the injected `apply`
///    callback.
/// 5. Reply with `(currentTerm, true)`.
fn handle_append_entries_locked(
    inner: &mut Inner,
    timing: &crate::common::Timing,
    apply: &(dyn Fn(&[u8]) + Send + Sync),
    term: u64,
    leader_id: &str,
    entries: Vec<Entry>,
    leader_commit_index: i64,
) -> (u64, bool) {
    if term < inner.current_term {
        return (inner.current_term, false);
    }

    inner.current_term = term;
    inner.role = Role::Follower;
    inner.leader_id = Some(leader_id.to_string());
    inner.voted_for = None;
    reset_election_deadline(inner, timing);

    inner.log.replace(entries);

    if leader_commit_index >= inner.log.len() as i64 {
        fatal_invariant_violation(&format!(
            "leader {leader_id} sent commitIndex {leader_commit_index} beyond its own {}-entry log",
            inner.log.len()
        ));
    }

    let apply_from = inner.commit_index + 1;
    for idx in apply_from..=leader_commit_index {
        if let Some(entry) = inner.log.get(idx) {
            apply(&entry.op);
        }
    }
    inner.commit_index = inner.commit_index.max(leader_commit_index);

    (inner.current_term, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Timing;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn test_inner() -> Inner {
        Inner {
            role: Role::Follower,
            current_term: 1,
            voted_for: None,
            leader_id: None,
            log: super::super::raft_log::Log::new(),
            commit_index: -1,
            election_deadline: Instant::now() + Duration::from_secs(1),
            heartbeat_thread: None,
        }
    }

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
    fn grants_vote_to_first_asker_in_new_term() {
        let mut inner = test_inner();
        let (term, granted) = handle_request_vote_locked(&mut inner, &test_timing(), "n2", 2);
        assert_eq!(term, 2);
        assert!(granted);
        assert_eq!(inner.voted_for.as_deref(), Some("n2"));
    }

    #[test]
    fn refuses_second_candidate_same_term() {
        let mut inner = test_inner();
        let _ = handle_request_vote_locked(&mut inner, &test_timing(), "n2", 2);
        let (term, granted) = handle_request_vote_locked(&mut inner, &test_timing(), "n3", 2);
        assert_eq!(term, 2);
        assert!(!granted);
    }

    #[test]
    fn rejects_stale_term() {
        let mut inner = test_inner();
        inner.current_term = 5;
        let (term, granted) = handle_request_vote_locked(&mut inner, &test_timing(), "n2", 3);
        assert_eq!(term, 5);
        assert!(!granted);
    }

    #[test]
    fn append_entries_replaces_log_and_applies_newly_committed() {
        let mut inner = test_inner();
        let applied: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());
        let apply = |op: &[u8]| applied.lock().unwrap().push(op.to_vec());
        let entries = vec![
            Entry { term: 1, index: 0, op: vec![1] },
            Entry { term: 1, index: 1, op: vec![2] },
        ];
        let (term, success) =
            handle_append_entries_locked(&mut inner, &test_timing(), &apply, 1, "n1", entries, 1);
        assert_eq!(term, 1);
        assert!(success);
        assert_eq!(inner.commit_index, 1);
        assert_eq!(*applied.lock().unwrap(), vec![vec![1], vec![2]]);
        assert_eq!(inner.leader_id.as_deref(), Some("n1"));
    }

    #[test]
    fn append_entries_rejects_stale_term() {
        let mut inner = test_inner();
        inner.current_term = 5;
        let apply = |_op: &[u8]| {};
        let (term, success) =
            handle_append_entries_locked(&mut inner, &test_timing(), &apply, 3, "n2", vec![], -1);
        assert_eq!(term, 5);
        assert!(!success);
    }

    #[test]
    fn never_reapplies_an_already_committed_entry() {
        let mut inner = test_inner();
        let applied: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());
        let apply = |op: &[u8]| applied.lock().unwrap().push(op.to_vec());
        let entries = vec![Entry { term: 1, index: 0, op: vec![1] }];
        let _ = handle_append_entries_locked(&mut inner, &test_timing(), &apply, 1, "n1", entries.clone(), 0);
        let _ = handle_append_entries_locked(&mut inner, &test_timing(), &apply, 1, "n1", entries, 0);
        assert_eq!(applied.lock().unwrap().len(), 1);
    }

    #[test]
    fn a_leader_steps_down_on_a_valid_append_entries_from_a_new_leader() {
        let mut inner = test_inner();
        inner.role = Role::Leader { heartbeat_stop: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)) };
        inner.current_term = 3;
        let apply = |_op: &[u8]| {};
        let (term, success) =
            handle_append_entries_locked(&mut inner, &test_timing(), &apply, 4, "n2", vec![], -1);
        assert_eq!(term, 4);
        assert!(success);
        assert!(matches::matches!(inner.role, Role::Follower));
        assert_eq!(inner.leader_id.as_deref(), Some("n2"));
    }
}
