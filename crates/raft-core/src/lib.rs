//! # raft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: raft-storage persists what this crate produces; a transport delivers its intents
//! what: log store, peer registry, term/vote ledger, role state machine, single-writer runtime

pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod peer;
pub mod runtime;
pub mod term;
pub mod timer;
pub mod transport;

pub use config::RaftConfig;
pub use error::{LogError, RaftError, Rejection, Result};
pub use log::{Log, LogEntry};
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, Intent, RaftMessage, VoteRequest, VoteResponse,
};
pub use node::{DurableState, NodeStatus, RaftNode, Role};
pub use peer::{Constituent, NodeConfiguration};
pub use runtime::{spawn, spawn_restored, NodeHandle};
pub use term::{is_at_least_as_complete, HardState};
pub use transport::Transport;
