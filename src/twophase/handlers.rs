//! `RpcObject` adapters wiring the 2PC RPC surface (`VoteRequest`,
//! `GlobalCommit`, `GlobalAbort`) into the shared transport (C4), mirroring
//! `raft::handlers`.

use std::sync::Arc;

use capnp::any_pointer;

use crate::rpc::{RpcError, RpcObject};
use crate::twophase_capnp::{global_abort_args, global_abort_reply, global_commit_args, global_commit_reply, vote_reply, vote_request_args};

use super::participant::Participant;

fn read_text(reader: capnp::Result<capnp::text::Reader>) -> Result<String, RpcError> {
    let text = reader?;
    text.to_str().map(|s| s.to_string()).map_err(|e| RpcError::Capnp(capnp::Error::failed(e.to_string())))
}

pub struct VoteRequestHandler {
    participant: Arc<dyn Participant>,
}

impl VoteRequestHandler {
    pub fn new(participant: Arc<dyn Participant>) -> VoteRequestHandler {
        VoteRequestHandler { participant }
    }
}

impl RpcObject for VoteRequestHandler {
    fn handle_rpc(
        &self,
        params: any_pointer::Reader,
        mut result: any_pointer::Builder,
    ) -> Result<(), RpcError> {
        let req = params.get_as::<vote_request_args::Reader>()?;
        let tx_id = read_text(req.get_transaction_id())?;
        let ride_id = read_text(req.get_ride_id())?;
        let driver_id = read_text(req.get_driver_id())?;

        let vote_commit = self.participant.vote_request(&tx_id, &ride_id, &driver_id);

        let mut reply = result.init_as::<vote_reply::Builder>();
        reply.set_vote_commit(vote_commit);
        Ok(())
    }
}

pub struct GlobalCommitHandler {
    participant: Arc<dyn Participant>,
}

impl GlobalCommitHandler {
    pub fn new(participant: Arc<dyn Participant>) -> GlobalCommitHandler {
        GlobalCommitHandler { participant }
    }
}

impl RpcObject for GlobalCommitHandler {
    fn handle_rpc(
        &self,
        params: any_pointer::Reader,
        mut result: any_pointer::Builder,
    ) -> Result<(), RpcError> {
        let req = params.get_as::<global_commit_args::Reader>()?;
        let tx_id = read_text(req.get_transaction_id())?;
        let ride_id = read_text(req.get_ride_id())?;
        let driver_id = read_text(req.get_driver_id())?;

        self.participant.global_commit(&tx_id, &ride_id, &driver_id);

        result.init_as::<global_commit_reply::Builder>();
        Ok(())
    }
}

pub struct GlobalAbortHandler {
    participant: Arc<dyn Participant>,
}

impl GlobalAbortHandler {
    pub fn new(participant: Arc<dyn Participant>) -> GlobalAbortHandler {
        GlobalAbortHandler { participant }
    }
}

impl RpcObject for GlobalAbortHandler {
    fn handle_rpc(
        &self,
        params: any_pointer::Reader,
        mut result: any_pointer::Builder,
    ) -> Result<(), RpcError> {
        let req = params.get_as::<global_abort_args::Reader>()?;
        let tx_id = read_text(req.get_transaction_id())?;

        self.participant.global_abort(&tx_id);

        result.init_as::<global_abort_reply::Builder>();
        Ok(())
    }
}

/// RPC services to register with an `RpcServer` for a process that hosts
/// `participant` under the shared 2PC opcodes (C4).
pub fn rpc_services(participant: Arc<dyn Participant>) -> Vec<(i16, Box<dyn RpcObject>)> {
    vec![
        (crate::common::opcode::VOTE_REQUEST, Box::new(VoteRequestHandler::new(participant.clone()))),
        (crate::common::opcode::GLOBAL_COMMIT, Box::new(GlobalCommitHandler::new(participant.clone()))),
        (crate::common::opcode::GLOBAL_ABORT, Box::new(GlobalAbortHandler::new(participant))),
    ]
}
