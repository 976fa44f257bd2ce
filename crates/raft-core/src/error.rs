//! # error
//!
//! why: give every failure in the crate a name, and keep protocol outcomes apart from faults
//! relations: LogError is raised by log.rs, RaftError by config.rs, peer.rs, node.rs and runtime.rs
//! what: LogError, RaftError, Rejection

use thiserror::Error;

/// Failures raised by the log store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// An append did not target exactly `last_index + 1`
    #[error("append targets index {got}, next index is {expected}")]
    IndexMismatch { expected: u64, got: u64 },

    /// A truncation would remove a committed entry
    #[error("cannot truncate from {index}: entries up to {commit_index} are committed")]
    TruncateCommitted { index: u64, commit_index: u64 },

    /// Entries handed to `Log::from_entries` do not form 1, 2, 3, ...
    #[error("log is not contiguous: expected index {expected}, found {got}")]
    NonContiguous { expected: u64, got: u64 },
}

/// Errors surfaced to whoever builds or drives a node
///
/// Protocol outcomes (stale terms, failed consistency checks, repeated votes)
/// are never reported through this type, see [`Rejection`].
#[derive(Debug, Error)]
pub enum RaftError {
    #[error("node configuration has no peers")]
    NoPeers,

    #[error("node {0} lists itself as a peer")]
    SelfInPeers(String),

    #[error("invalid timeouts: election {min}..={max}ms, heartbeat {heartbeat}ms")]
    InvalidTimeouts { min: u64, max: u64, heartbeat: u64 },

    #[error("not the leader, last known leader is {leader:?}")]
    NotLeader { leader: Option<String> },

    #[error("node task has stopped")]
    Stopped,

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RaftError>;

/// Why a vote or an append was refused
///
/// Only used for tracing; the wire responses carry a bool and a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("sender term is behind ours")]
    StaleTerm,

    #[error("log does not match at prev_log_index")]
    InconsistentLog,

    #[error("already voted in this term")]
    AlreadyVoted,

    #[error("candidate log is less complete than ours")]
    LogBehind,
}
