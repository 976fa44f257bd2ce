//! # transport
//!
//! why: the engine never touches sockets, it hands outbound rpcs to whatever implements this
//! relations: node.rs is generic over Transport, runtime.rs plugs in an mpsc sender
//! what: Transport trait, recording implementation on Vec<Intent>

use crate::message::{AppendEntriesRequest, Intent, VoteRequest};

/// Delivers outbound RPCs to peers
///
/// Sends are fire-and-forget. Responses come back later through the
/// engine's `*_received` entry points and are matched by term.
pub trait Transport {
    fn send_vote_request(&mut self, target: &str, request: VoteRequest);

    fn send_append_entries(&mut self, target: &str, request: AppendEntriesRequest);
}

/// Records every intent, in order; tests drain it to observe the engine
impl Transport for Vec<Intent> {
    fn send_vote_request(&mut self, target: &str, request: VoteRequest) {
        self.push(Intent::VoteRequest {
            target: target.to_string(),
            request,
        });
    }

    fn send_append_entries(&mut self, target: &str, request: AppendEntriesRequest) {
        self.push(Intent::AppendEntries {
            target: target.to_string(),
            request,
        });
    }
}
