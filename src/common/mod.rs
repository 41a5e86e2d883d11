//! Shared constants, timing parameters, and error types used by both the
//! Raft node (`raft`) and the 2PC coordinator (`twophase`).
//!
//! Timing defaults mirror the reference `raft_server.py`: a 1.0s heartbeat
//! interval and an election timeout drawn uniformly from [1.5s, 3.0s].

use std::time::Duration;

/// Opcodes dispatched by the shared `RpcServer` (C4). Raft and 2PC share one
/// opcode space so a single listener can serve both surfaces.
pub mod opcode {
    pub const REQUEST_VOTE: i16 = 1;
    pub const APPEND_ENTRIES: i16 = 2;
    pub const VOTE_REQUEST: i16 = 10;
    pub const GLOBAL_COMMIT: i16 = 11;
    pub const GLOBAL_ABORT: i16 = 12;
}

/// Tunable timing parameters for a Raft node. The `Default` impl matches the
/// spec's stated defaults; tests construct a `Timing` with shorter intervals
/// to keep the suite fast without changing the algorithm under test.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub raft_rpc_deadline: Duration,
    pub tick_interval: Duration,
}

impl Default for Timing {
    fn default() -> Timing {
        Timing {
            heartbeat_interval: Duration::from_millis(1_000),
            election_timeout_min: Duration::from_millis(1_500),
            election_timeout_max: Duration::from_millis(3_000),
            raft_rpc_deadline: Duration::from_millis(1_000),
            tick_interval: Duration::from_millis(50),
        }
    }
}

/// Deadline for every outbound 2PC call (`VoteRequest`, `GlobalCommit`,
/// `GlobalAbort`). Kept separate from `Timing` since the coordinator isn't
/// tied to a single Raft node's election clock.
pub fn default_twopc_deadline() -> Duration {
    Duration::from_millis(2_000)
}

/// Errors surfaced by the Raft node itself, as opposed to transport failures
/// (`rpc::RpcError`), which are absorbed and treated as absent responses.
#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("invalid node configuration: {0}")]
    Config(String),

    /// A local invariant (§3) was violated. Per the error-handling design,
    /// this is the one class of error that is fatal rather than absorbed.
    #[error("raft invariant violated: {0}")]
    InvariantViolation(String),
}

/// Errors surfaced by the 2PC coordinator and participants.
#[derive(Debug, thiserror::Error)]
pub enum TwoPcError {
    #[error("ride {0} not found")]
    RideNotFound(String),

    #[error("ride {0} has no assigned driver")]
    NoDriverAssigned(String),

    #[error("transaction {tx_id} aborted: {reason}")]
    Aborted { tx_id: String, reason: String },
}

/// Logs an invariant violation at `error!` and aborts the process, per the
/// error-handling design in §7: this is the only unrecoverable error class.
pub fn fatal_invariant_violation(detail: &str) -> ! {
    log::error!("fatal: raft invariant violated: {detail}");
    std::process::abort()
}
