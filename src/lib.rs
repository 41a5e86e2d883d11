//! Raft leader-election sidecar and two-phase-commit ride-completion
//! coordinator for the ride-sharing backend's microservice flavor.
//!
//! The sidecar (`raft` module) stands in front of each application service
//! and answers "am I leader?" so that only one replica mutates the shared
//! key-value store at a time. The `twophase` module implements the
//! coordinator that the trip service uses to atomically mark a ride
//! completed while freeing the driver held at the location service.

pub mod rpc_capnp {
    include!(concat!(env!("OUT_DIR"), "/rpc_capnp.rs"));
}
pub mod raft_capnp {
    include!(concat!(env!("OUT_DIR"), "/raft_capnp.rs"));
}
pub mod twophase_capnp {
    include!(concat!(env!("OUT_DIR"), "/twophase_capnp.rs"));
}

pub mod common;
pub mod config;
pub mod rpc;
pub mod raft;
pub mod twophase;
