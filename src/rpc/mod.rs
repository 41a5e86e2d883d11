//! Peer transport (C4): a small, hand-rolled unary RPC layer over TCP.
//!
//! Every call is a length-prefixed Cap'n Proto `RpcCall { opcode, params }`
//! message; every reply is a length-prefixed `RpcResponse { result }`
//! message. Both the Raft surface (`RequestVote`, `AppendEntries`) and the
//! 2PC surface (`VoteRequest`, `GlobalCommit`, `GlobalAbort`) share this one
//! transport, dispatched by opcode (see `common::opcode`).
//!
//! Transport semantics are at-most-once and fire-and-measure: a failed or
//! timed-out call is surfaced to the caller as `RpcError`, never retried at
//! this layer. Retry, where it exists at all, is a protocol-level concept
//! (Raft's periodic heartbeats).

pub mod client;
pub mod server;

pub use client::Rpc;
pub use server::{RpcObject, RpcServer};

use capnp::any_pointer;

/// Errors from the transport layer. Transport failures are not protocol
/// errors: callers treat any `RpcError` the same way the spec does — as an
/// absent response, not an exception to propagate.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capnp error: {0}")]
    Capnp(#[from] capnp::Error),

    #[error("no handler registered for opcode {0}")]
    UnknownOpcode(i16),
}

/// Implemented by each RPC verb's handler and registered with an
/// [`RpcServer`] under a fixed opcode. `params`/`result` are the
/// `AnyPointer` payload carried inside the shared `RpcCall`/`RpcResponse`
/// envelope; implementations narrow them with `get_as::<T>()`/`init_as::<T>()`.
pub trait RpcObject: Send + Sync {
    fn handle_rpc(
        &self,
        params: any_pointer::Reader,
        result: any_pointer::Builder,
    ) -> Result<(), RpcError>;
}
