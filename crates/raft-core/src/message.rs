//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: produced and consumed by node.rs, carried by the transport behind transport.rs
//! what: VoteRequest, VoteResponse, AppendEntriesRequest, AppendEntriesResponse, Intent, RaftMessage

use serde::{Deserialize, Serialize};

use crate::LogEntry;

/// Ask a peer for its vote during leader election
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: String,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

impl AppendEntriesRequest {
    /// Index of the last entry this request covers
    pub fn last_index(&self) -> u64 {
        self.prev_log_index + self.entries.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
    /// Last index the follower verified against this request, when it succeeded
    #[serde(default)]
    pub match_index: Option<u64>,
}

/// Something the engine wants delivered to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    VoteRequest { target: String, request: VoteRequest },
    AppendEntries { target: String, request: AppendEntriesRequest },
}

impl Intent {
    pub fn target(&self) -> &str {
        match self {
            Intent::VoteRequest { target, .. } | Intent::AppendEntries { target, .. } => target,
        }
    }

    /// The wire envelope a transport would put on the network
    pub fn into_message(self) -> (String, RaftMessage) {
        match self {
            Intent::VoteRequest { target, request } => (target, RaftMessage::VoteRequest(request)),
            Intent::AppendEntries { target, request } => {
                (target, RaftMessage::AppendEntries(request))
            }
        }
    }
}

/// All possible Raft messages between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl RaftMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
