//! The 2PC coordinator (§4.2), living in the trip subsystem. Each call to
//! [`Coordinator::complete_trip`] runs one transaction to completion:
//! mint a `txId`, poll every participant for a vote in sequential order,
//! then broadcast the decision.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::common::{opcode, TwoPcError};
use crate::rpc::{Rpc, RpcError};
use crate::twophase_capnp::{global_abort_args, global_commit_args, vote_reply, vote_request_args};

use super::participant::Participant;

/// How a coordinator reaches one participant: in-process (the coordinator's
/// own participant role, per §4.2) or over the network.
pub enum ParticipantStub {
    Loopback(Arc<dyn Participant>),
    Remote(SocketAddr),
}

pub struct Coordinator {
    trip_store: Arc<dyn super::store::TripStore>,
    participants: Vec<(String, ParticipantStub)>,
    deadline: Duration,
}

impl Coordinator {
    pub fn new(
        trip_store: Arc<dyn super::store::TripStore>,
        participants: Vec<(String, ParticipantStub)>,
        deadline: Duration,
    ) -> Coordinator {
        Coordinator { trip_store, participants, deadline }
    }

    /// `CompleteTrip(rideId)` (§4.2). Rejects synchronously if the ride has
    /// no assigned driver; otherwise runs the full two-phase protocol.
    pub fn complete_trip(&self, ride_id: &str) -> Result<(), TwoPcError> {
        if !self.trip_store.ride_exists(ride_id) {
            return Err(TwoPcError::RideNotFound(ride_id.to_string()));
        }
        let driver_id = self
            .trip_store
            .driver_for_ride(ride_id)
            .ok_or_else(|| TwoPcError::NoDriverAssigned(ride_id.to_string()))?;

        let tx_id = Uuid::new_v4().simple().to_string();

        let votes: Vec<(String, Option<bool>)> = self
            .participants
            .iter()
            .map(|(name, stub)| {
                let vote = self.send_vote_request(stub, &tx_id, ride_id, &driver_id);
                if vote != Some(true) {
                    log::warn!("2pc {tx_id}: participant {name} did not vote commit ({vote:?})");
                }
                (name.clone(), vote)
            })
            .collect();

        let all_commit = votes.iter().all(|(_, v)| *v == Some(true));

        if all_commit {
            for (_, stub) in &self.participants {
                self.send_global_commit(stub, &tx_id, ride_id, &driver_id);
            }
            log::info!("2pc {tx_id}: committed (ride {ride_id})");
            Ok(())
        } else {
            for (_, stub) in &self.participants {
                self.send_global_abort(stub, &tx_id);
            }
            log::info!("2pc {tx_id}: aborted (ride {ride_id})");
            Err(TwoPcError::Aborted {
                tx_id,
                reason: format!("not all participants voted commit: {votes:?}"),
            })
        }
    }

    fn send_vote_request(
        &self,
        stub: &ParticipantStub,
        tx_id: &str,
        ride_id: &str,
        driver_id: &str,
    ) -> Option<bool> {
        match stub {
            ParticipantStub::Loopback(p) => Some(p.vote_request(tx_id, ride_id, driver_id)),
            ParticipantStub::Remote(addr) => {
                self.rpc_vote_request(*addr, tx_id, ride_id, driver_id).ok()
            }
        }
    }

    fn send_global_commit(&self, stub: &ParticipantStub, tx_id: &str, ride_id: &str, driver_id: &str) {
        match stub {
            ParticipantStub::Loopback(p) => p.global_commit(tx_id, ride_id, driver_id),
            ParticipantStub::Remote(addr) => {
                if let Err(e) = self.rpc_global_commit(*addr, tx_id, ride_id, driver_id) {
                    log::warn!("2pc {tx_id}: GlobalCommit to {addr} failed: {e}");
                }
            }
        }
    }

    fn send_global_abort(&self, stub: &ParticipantStub, tx_id: &str) {
        match stub {
            ParticipantStub::Loopback(p) => p.global_abort(tx_id),
            ParticipantStub::Remote(addr) => {
                if let Err(e) = self.rpc_global_abort(*addr, tx_id) {
                    log::warn!("2pc {tx_id}: GlobalAbort to {addr} failed: {e}");
                }
            }
        }
    }

    fn rpc_vote_request(
        &self,
        addr: SocketAddr,
        tx_id: &str,
        ride_id: &str,
        driver_id: &str,
    ) -> Result<bool, RpcError> {
        let mut rpc = Rpc::new(opcode::VOTE_REQUEST);
        {
            let mut params = rpc.get_param_builder().init_as::<vote_request_args::Builder>();
            params.set_transaction_id(tx_id);
            params.set_ride_id(ride_id);
            params.set_driver_id(driver_id);
        }
        let msg = rpc.send(addr, self.deadline)?;
        let result = Rpc::get_result_reader(&msg)?;
        let reply = result.get_as::<vote_reply::Reader>()?;
        Ok(reply.get_vote_commit())
    }

    fn rpc_global_commit(
        &self,
        addr: SocketAddr,
        tx_id: &str,
        ride_id: &str,
        driver_id: &str,
    ) -> Result<(), RpcError> {
        let mut rpc = Rpc::new(opcode::GLOBAL_COMMIT);
        {
            let mut params = rpc.get_param_builder().init_as::<global_commit_args::Builder>();
            params.set_transaction_id(tx_id);
            params.set_ride_id(ride_id);
            params.set_driver_id(driver_id);
        }
        rpc.send(addr, self.deadline)?;
        Ok(())
    }

    fn rpc_global_abort(&self, addr: SocketAddr, tx_id: &str) -> Result<(), RpcError> {
        let mut rpc = Rpc::new(opcode::GLOBAL_ABORT);
        {
            let mut params = rpc.get_param_builder().init_as::<global_abort_args::Builder>();
            params.set_transaction_id(tx_id);
        }
        rpc.send(addr, self.deadline)?;
        Ok(())
    }
}
