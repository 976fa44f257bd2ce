//! # term
//!
//! why: term and vote always change together, so they live behind one small type
//! relations: owned by node.rs, HardState is what raft-storage persists
//! what: HardState, VoteLedger, is_at_least_as_complete

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Rejection;

/// The part of the term/vote state that must survive a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub term: u64,
    pub voted_for: Option<String>,
}

/// Current term, who we voted for in it, and the votes we collected in it
///
/// The term never decreases. Entering a higher term clears both the vote
/// and the tally.
#[derive(Debug, Clone, Default)]
pub struct VoteLedger {
    term: u64,
    voted_for: Option<String>,
    votes: BTreeSet<String>,
}

impl VoteLedger {
    pub fn new(hard_state: HardState) -> Self {
        Self {
            term: hard_state.term,
            voted_for: hard_state.voted_for,
            votes: BTreeSet::new(),
        }
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.voted_for.as_deref()
    }

    pub fn hard_state(&self) -> HardState {
        HardState {
            term: self.term,
            voted_for: self.voted_for.clone(),
        }
    }

    /// Adopt `term` if it is newer; returns true when the term moved
    pub fn observe(&mut self, term: u64) -> bool {
        if term <= self.term {
            return false;
        }
        self.term = term;
        self.voted_for = None;
        self.votes.clear();
        true
    }

    /// Enter the next term as a candidate that has voted for itself
    pub fn start_election(&mut self, self_id: &str) -> u64 {
        self.term += 1;
        self.voted_for = Some(self_id.to_string());
        self.votes.clear();
        self.votes.insert(self_id.to_string());
        self.term
    }

    /// Give our vote for the current term to `candidate`, at most once
    pub fn grant(&mut self, candidate: &str) -> Result<(), Rejection> {
        if self.voted_for.is_some() {
            return Err(Rejection::AlreadyVoted);
        }
        self.voted_for = Some(candidate.to_string());
        Ok(())
    }

    /// Count an affirmative vote from `voter`; returns the tally including our own
    pub fn record_vote(&mut self, voter: &str) -> usize {
        self.votes.insert(voter.to_string());
        self.votes.len()
    }

    pub fn votes(&self) -> usize {
        self.votes.len()
    }
}

/// The candidate log is at least as complete as ours
///
/// Higher last term wins; on equal last terms the longer (or equal) log wins.
pub fn is_at_least_as_complete(
    my_last_term: u64,
    my_last_index: u64,
    other_last_term: u64,
    other_last_index: u64,
) -> bool {
    other_last_term > my_last_term
        || (other_last_term == my_last_term && other_last_index >= my_last_index)
}
