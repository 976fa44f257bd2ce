//! # peer
//!
//! why: keep the static peer set and the leader's per-peer replication progress
//! relations: owned by node.rs, progress is reset on every election win
//! what: Constituent, NodeConfiguration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};

/// A peer node as seen from this node
///
/// `next_index`, `match_index` and `in_flight` only mean something while
/// this node is leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constituent {
    /// Address the transport uses to reach the peer; also its identity
    pub address: String,
    /// Index of the next entry to send
    pub next_index: u64,
    /// Highest index known to be replicated on the peer
    pub match_index: u64,
    /// Last index covered by the most recent append sent to the peer
    #[serde(skip)]
    pub in_flight: Option<u64>,
}

impl Constituent {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            next_index: 1,
            match_index: 0,
            in_flight: None,
        }
    }

    /// Restart progress tracking for a fresh leadership term
    pub fn reset_progress(&mut self, last_log_index: u64) {
        self.next_index = last_log_index + 1;
        self.match_index = 0;
        self.in_flight = None;
    }

    /// The peer accepted an append
    ///
    /// `acked` is the last index the peer reports as matching; without it we
    /// fall back to the last index covered by the append we sent. Neither may
    /// claim more than the leader's `last_log_index`.
    pub fn record_success(&mut self, acked: Option<u64>, last_log_index: u64) {
        let in_flight = self.in_flight.take();
        if let Some(last) = acked.or(in_flight) {
            self.match_index = self.match_index.max(last.min(last_log_index));
            self.next_index = self.match_index + 1;
        }
    }

    /// The peer failed its consistency check: back off one entry
    pub fn record_failure(&mut self) {
        self.in_flight = None;
        self.next_index = self.next_index.saturating_sub(1).max(1);
    }
}

/// The static set of peers this node knows, excluding itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfiguration {
    constituents: BTreeMap<String, Constituent>,
}

impl NodeConfiguration {
    /// Build a configuration from peer addresses
    ///
    /// An empty peer set is a fatal configuration error: majority arithmetic
    /// over a cluster of one is not something this engine supports.
    pub fn new<I, S>(self_id: &str, peers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut constituents = BTreeMap::new();
        for peer in peers {
            let address = peer.into();
            if address == self_id {
                return Err(RaftError::SelfInPeers(address));
            }
            constituents.insert(address.clone(), Constituent::new(address));
        }
        if constituents.is_empty() {
            return Err(RaftError::NoPeers);
        }
        Ok(Self { constituents })
    }

    /// Parse a JSON array of peer addresses
    pub fn from_json(self_id: &str, json: &str) -> Result<Self> {
        let peers: Vec<String> = serde_json::from_str(json)?;
        Self::new(self_id, peers)
    }

    /// Number of peers, not counting this node
    pub fn len(&self) -> usize {
        self.constituents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constituents.is_empty()
    }

    /// Votes needed to win: `floor((N + 1) / 2) + 1` for N peers
    pub fn majority(&self) -> usize {
        (self.len() + 1) / 2 + 1
    }

    pub fn contains(&self, address: &str) -> bool {
        self.constituents.contains_key(address)
    }

    pub fn get(&self, address: &str) -> Option<&Constituent> {
        self.constituents.get(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut Constituent> {
        self.constituents.get_mut(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.constituents.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constituent> {
        self.constituents.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Constituent> {
        self.constituents.values_mut()
    }
}
