//! The participant side of 2PC (§4.2). Each participant guards its own
//! `pending` table with its own mutex — deliberately not the Raft node's
//! mutex, since a participant has no relationship to any particular Raft
//! node's term or log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::store::{LocationStore, TripStore};

/// The minimum business data a ride-completion transaction carries.
#[derive(Debug, Clone)]
pub struct Payload {
    pub ride_id: String,
    pub driver_id: String,
}

/// A participant in a 2PC transaction (§4.2's `VoteRequest`/`GlobalCommit`/
/// `GlobalAbort` contracts).
pub trait Participant: Send + Sync {
    /// Local admissibility check. On pass, records `pending[txId]` and
    /// votes commit; on failure, votes abort without recording anything.
    fn vote_request(&self, tx_id: &str, ride_id: &str, driver_id: &str) -> bool;

    /// If `txId` is pending, performs the local write and clears it.
    /// Idempotent: a missing `txId` is logged, not an error.
    fn global_commit(&self, tx_id: &str, ride_id: &str, driver_id: &str);

    /// Clears `pending[txId]` if present. Idempotent.
    fn global_abort(&self, tx_id: &str);
}

/// The trip service's participant role: verifies the ride exists, and on
/// commit marks it completed.
pub struct TripParticipant {
    store: Arc<dyn TripStore>,
    pending: Mutex<HashMap<String, Payload>>,
}

impl TripParticipant {
    pub fn new(store: Arc<dyn TripStore>) -> TripParticipant {
        TripParticipant { store, pending: Mutex::new(HashMap::new()) }
    }
}

impl Participant for TripParticipant {
    fn vote_request(&self, tx_id: &str, ride_id: &str, driver_id: &str) -> bool {
        if !self.store.ride_exists(ride_id) {
            return false;
        }
        self.pending.lock().unwrap().insert(
            tx_id.to_string(),
            Payload { ride_id: ride_id.to_string(), driver_id: driver_id.to_string() },
        );
        true
    }

    fn global_commit(&self, tx_id: &str, _ride_id: &str, _driver_id: &str) {
        match self.pending.lock().unwrap().remove(tx_id) {
            Some(payload) => self.store.mark_ride_completed(&payload.ride_id),
            None => log::info!("trip participant: GlobalCommit for unknown tx {tx_id}, ignoring"),
        }
    }

    fn global_abort(&self, tx_id: &str) {
        if self.pending.lock().unwrap().remove(tx_id).is_none() {
            log::info!("trip participant: GlobalAbort for unknown tx {tx_id}, ignoring");
        }
    }
}

/// The location service's participant role: verifies a driver id was
/// supplied, and on commit marks that driver available again.
pub struct LocationParticipant {
    store: Arc<dyn LocationStore>,
    pending: Mutex<HashMap<String, Payload>>,
}

impl LocationParticipant {
    pub fn new(store: Arc<dyn LocationStore>) -> LocationParticipant {
        LocationParticipant { store, pending: Mutex::new(HashMap::new()) }
    }
}

impl Participant for LocationParticipant {
    fn vote_request(&self, tx_id: &str, ride_id: &str, driver_id: &str) -> bool {
        if driver_id.is_empty() {
            return false;
        }
        self.pending.lock().unwrap().insert(
            tx_id.to_string(),
            Payload { ride_id: ride_id.to_string(), driver_id: driver_id.to_string() },
        );
        true
    }

    fn global_commit(&self, tx_id: &str, _ride_id: &str, _driver_id: &str) {
        match self.pending.lock().unwrap().remove(tx_id) {
            Some(payload) => self.store.mark_driver_available(&payload.driver_id),
            None => log::info!("location participant: GlobalCommit for unknown tx {tx_id}, ignoring"),
        }
    }

    fn global_abort(&self, tx_id: &str) {
        if self.pending.lock().unwrap().remove(tx_id).is_none() {
            log::info!("location participant: GlobalAbort for unknown tx {tx_id}, ignoring");
        }
    }
}
