//! The two-phase-commit ride-completion coordinator (§4.2, C2). The trip
//! service hosts a [`coordinator::Coordinator`] plus its own
//! [`participant::TripParticipant`]; the location service hosts a
//! [`participant::LocationParticipant`]. Both participants are reached
//! through the same shared transport (`rpc`) as the Raft surface, dispatched
//! by opcode.

pub mod coordinator;
pub mod handlers;
pub mod participant;
pub mod store;

pub use coordinator::{Coordinator, ParticipantStub};
pub use handlers::rpc_services;
pub use participant::{LocationParticipant, Participant, Payload, TripParticipant};
pub use store::{InMemoryLocationStore, InMemoryTripStore, LocationStore, TripStore};
