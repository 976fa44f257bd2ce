//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses log.rs for entries, peer.rs for progress, term.rs for votes, timer.rs for timeouts,
//!            emits rpcs through transport.rs
//! what: Role enum, NodeStatus, RaftNode with election, replication and commit logic

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::RaftConfig;
use crate::error::{RaftError, Rejection, Result};
use crate::log::{Log, LogEntry};
use crate::message::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::peer::NodeConfiguration;
use crate::term::{self, HardState, VoteLedger};
use crate::timer::{Timer, TimerKind};
use crate::transport::Transport;

/// The three possible roles a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    /// Passive state - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    pub role: Role,
    pub term: u64,
    pub leader: Option<String>,
    pub commit_index: u64,
    pub last_index: u64,
    pub last_applied: u64,
}

/// Everything a restart needs: term, vote and the whole log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableState {
    pub hard_state: HardState,
    pub entries: Vec<LogEntry>,
}

/// A single Raft node in the cluster
///
/// Every method takes `&mut self`: the caller is expected to serialize
/// timer expiries and inbound RPCs onto one owner (see `runtime`).
#[derive(Debug)]
pub struct RaftNode<T: Transport> {
    id: String,
    role: Role,
    ledger: VoteLedger,
    log: Log,
    peers: NodeConfiguration,
    timer: Timer,
    transport: T,
    leader: Option<String>,
    last_applied: u64,
    started: bool,
}

impl<T: Transport> RaftNode<T> {
    /// Create a node at term 0 with an empty log
    pub fn new(
        id: impl Into<String>,
        peers: NodeConfiguration,
        config: RaftConfig,
        transport: T,
    ) -> Result<Self> {
        Self::restore(id, peers, config, transport, HardState::default(), Log::new())
    }

    /// Create a node from persisted term, vote and log
    pub fn restore(
        id: impl Into<String>,
        peers: NodeConfiguration,
        config: RaftConfig,
        transport: T,
        hard_state: HardState,
        log: Log,
    ) -> Result<Self> {
        let id = id.into();
        config.validate()?;
        if peers.is_empty() {
            return Err(RaftError::NoPeers);
        }
        if peers.contains(&id) {
            return Err(RaftError::SelfInPeers(id));
        }
        Ok(Self {
            id,
            role: Role::Follower,
            ledger: VoteLedger::new(hard_state),
            log,
            peers,
            timer: Timer::new(&config),
            transport,
            leader: None,
            last_applied: 0,
            started: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn current_term(&self) -> u64 {
        self.ledger.term()
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.ledger.voted_for()
    }

    /// Affirmative votes collected in the current term, own vote included
    pub fn votes_received(&self) -> usize {
        self.ledger.votes()
    }

    pub fn leader(&self) -> Option<&str> {
        self.leader.as_deref()
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn peers(&self) -> &NodeConfiguration {
        &self.peers
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn hard_state(&self) -> HardState {
        self.ledger.hard_state()
    }

    pub fn durable_state(&self) -> DurableState {
        DurableState {
            hard_state: self.hard_state(),
            entries: self.log.entries().to_vec(),
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id.clone(),
            role: self.role,
            term: self.current_term(),
            leader: self.leader.clone(),
            commit_index: self.log.commit_index(),
            last_index: self.log.last_index(),
            last_applied: self.last_applied,
        }
    }

    // -- lifecycle --

    /// Enter the follower role and, if asked, arm the election timer
    ///
    /// Pass `false` to drive the node purely through RPCs in tests.
    pub fn start(&mut self, enable_timers: bool) {
        self.role = Role::Follower;
        self.started = true;
        self.timer.enable(enable_timers);
        self.reset_timer();
        info!(node = %self.id, term = self.current_term(), timers = enable_timers, "node started");
    }

    /// Disarm the timer; later expiries are ignored
    pub fn stop(&mut self) {
        self.started = false;
        self.timer.stop();
        info!(node = %self.id, term = self.current_term(), "node stopped");
    }

    /// A timer armed with `generation` has expired
    pub fn handle_timeout(&mut self, generation: u64) {
        if !self.started {
            trace!(node = %self.id, generation, "timer fired on stopped node");
            return;
        }
        match self.timer.fire(generation) {
            None => {
                trace!(node = %self.id, generation, "stale timer callback discarded");
            }
            Some(TimerKind::Election) if self.role != Role::Leader => {
                self.start_election();
            }
            Some(_) if self.role == Role::Leader => {
                self.broadcast_append_entries();
                self.reset_timer();
            }
            Some(_) => self.reset_timer(),
        }
    }

    // -- election --

    /// Become candidate for the next term and ask every peer for its vote
    ///
    /// Normally driven by the election timer.
    pub fn start_election(&mut self) {
        self.role = Role::Candidate;
        self.leader = None;
        let term = self.ledger.start_election(&self.id);
        let last_log_index = self.log.last_index();
        let last_log_term = self.log.last_term();
        info!(node = %self.id, term, last_log_index, last_log_term, "starting election");

        for target in self.peers.addresses() {
            self.transport.send_vote_request(
                target,
                VoteRequest {
                    term,
                    candidate_id: self.id.clone(),
                    last_log_index,
                    last_log_term,
                },
            );
        }
        self.reset_timer();
    }

    /// True iff a log ending at `(other_last_term, other_last_index)` is at least as complete as ours
    pub fn is_at_least_as_complete(&self, other_last_term: u64, other_last_index: u64) -> bool {
        term::is_at_least_as_complete(
            self.log.last_term(),
            self.log.last_index(),
            other_last_term,
            other_last_index,
        )
    }

    /// Handle an inbound RequestVote
    pub fn request_vote(&mut self, request: &VoteRequest) -> VoteResponse {
        let outcome = if request.term < self.current_term() {
            Err(Rejection::StaleTerm)
        } else {
            if self.ledger.observe(request.term) {
                self.step_down();
            }
            if self.is_at_least_as_complete(request.last_log_term, request.last_log_index) {
                self.ledger.grant(&request.candidate_id)
            } else {
                Err(Rejection::LogBehind)
            }
        };

        // any vote request postpones our own election; a leader keeps its heartbeat
        if self.role != Role::Leader {
            self.reset_timer();
        }

        let term = self.current_term();
        match outcome {
            Ok(()) => {
                debug!(node = %self.id, term, candidate = %request.candidate_id, "vote granted");
                VoteResponse {
                    term,
                    vote_granted: true,
                }
            }
            Err(reason) => {
                debug!(node = %self.id, term, candidate = %request.candidate_id, %reason, "vote refused");
                VoteResponse {
                    term,
                    vote_granted: false,
                }
            }
        }
    }

    /// Handle the answer to one of our vote requests
    pub fn vote_response_received(&mut self, voter: &str, response: VoteResponse) {
        let term = self.current_term();
        if response.term > term {
            info!(node = %self.id, term, responder_term = response.term, peer = %voter, "newer term in vote response");
            self.ledger.observe(response.term);
            self.step_down();
            self.reset_timer();
            return;
        }

        let counts = self.role == Role::Candidate
            && response.vote_granted
            && response.term == term
            && self.peers.contains(voter);
        if !counts {
            trace!(node = %self.id, term, peer = %voter, role = %self.role, "vote response ignored");
            return;
        }

        let votes = self.ledger.record_vote(voter);
        debug!(node = %self.id, term, peer = %voter, votes, needed = self.peers.majority(), "vote received");
        if votes >= self.peers.majority() {
            self.become_leader();
        }
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader = Some(self.id.clone());
        let last_index = self.log.last_index();
        for peer in self.peers.iter_mut() {
            peer.reset_progress(last_index);
        }
        info!(node = %self.id, term = self.current_term(), votes = self.ledger.votes(), "became leader");
        self.broadcast_append_entries();
        self.reset_timer();
    }

    /// Drop back to follower after seeing a newer term
    fn step_down(&mut self) {
        if self.role != Role::Follower {
            info!(node = %self.id, term = self.current_term(), from = %self.role, "stepping down to follower");
        }
        self.role = Role::Follower;
        self.leader = None;
    }

    // -- replication --

    /// Send every peer the entries it is missing, or an empty heartbeat
    fn broadcast_append_entries(&mut self) {
        let term = self.current_term();
        let leader_commit = self.log.commit_index();
        let last_index = self.log.last_index();

        for peer in self.peers.iter_mut() {
            let next_index = peer.next_index.clamp(1, last_index + 1);
            let prev_log_index = next_index - 1;
            let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
            let entries = self.log.entries_from(next_index).to_vec();

            let request = AppendEntriesRequest {
                term,
                leader_id: self.id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            };
            peer.in_flight = Some(request.last_index());
            trace!(
                node = %self.id,
                term,
                peer = %peer.address,
                prev_log_index,
                entries = request.entries.len(),
                "sending append entries"
            );
            self.transport.send_append_entries(&peer.address, request);
        }
    }

    /// Handle an inbound AppendEntries
    pub fn append_entries(&mut self, request: &AppendEntriesRequest) -> AppendEntriesResponse {
        if request.term < self.current_term() {
            debug!(
                node = %self.id,
                term = self.current_term(),
                leader = %request.leader_id,
                reason = %Rejection::StaleTerm,
                "append entries refused"
            );
            return self.append_response(false, None);
        }

        self.ledger.observe(request.term);
        self.step_down();
        self.leader = Some(request.leader_id.clone());
        self.reset_timer();

        if !self.log.contains(request.prev_log_index, request.prev_log_term) {
            // a diverged entry at prev_log_index goes, along with everything after it
            if self.log.entry(request.prev_log_index).is_some() {
                self.rollback(request.prev_log_index);
            }
            debug!(
                node = %self.id,
                term = self.current_term(),
                prev_log_index = request.prev_log_index,
                prev_log_term = request.prev_log_term,
                last_index = self.log.last_index(),
                reason = %Rejection::InconsistentLog,
                "append entries refused"
            );
            return self.append_response(false, None);
        }

        for entry in &request.entries {
            match self.log.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    if !self.rollback(entry.index) {
                        return self.append_response(false, None);
                    }
                }
                None => {}
            }
            if let Err(err) = self.log.append(entry.term, entry.index, entry.command.clone()) {
                warn!(node = %self.id, %err, "malformed append entries batch");
                return self.append_response(false, None);
            }
        }

        let verified = request.last_index();
        if request.leader_commit > self.log.commit_index() {
            let commit = self.log.advance_commit(request.leader_commit.min(verified));
            debug!(node = %self.id, commit_index = commit, "commit index advanced");
        }
        self.append_response(true, Some(verified))
    }

    /// Remove a diverged suffix starting at `index`; false if it reaches committed entries
    fn rollback(&mut self, index: u64) -> bool {
        match self.log.truncate_from(index) {
            Ok(rest) => {
                debug!(node = %self.id, from = index, remaining = rest.len(), "truncated diverged log suffix");
                true
            }
            Err(err) => {
                warn!(node = %self.id, %err, "refusing to truncate committed entries");
                false
            }
        }
    }

    fn append_response(&self, success: bool, match_index: Option<u64>) -> AppendEntriesResponse {
        AppendEntriesResponse {
            term: self.current_term(),
            success,
            match_index,
        }
    }

    /// Handle the answer to one of our append entries
    pub fn append_entries_response_received(&mut self, peer: &str, response: AppendEntriesResponse) {
        let term = self.current_term();
        if response.term > term {
            info!(node = %self.id, term, responder_term = response.term, peer, "newer term in append response");
            self.ledger.observe(response.term);
            self.step_down();
            self.reset_timer();
            return;
        }
        if self.role != Role::Leader || response.term < term {
            trace!(node = %self.id, term, peer, "append response ignored");
            return;
        }
        let Some(progress) = self.peers.get_mut(peer) else {
            warn!(node = %self.id, peer, "append response from unknown peer");
            return;
        };

        if response.success {
            progress.record_success(response.match_index, self.log.last_index());
            self.advance_leader_commit();
        } else {
            // retried with one more entry of history on the next heartbeat
            progress.record_failure();
            debug!(node = %self.id, term, peer, next_index = progress.next_index, "backing off next index");
        }
    }

    /// Commit the highest current-term index stored on a majority
    fn advance_leader_commit(&mut self) {
        let term = self.current_term();
        let majority = self.peers.majority();
        let mut index = self.log.last_index();
        while index > self.log.commit_index() {
            if self.log.term_at(index) != Some(term) {
                break;
            }
            let replicas = 1 + self.peers.iter().filter(|p| p.match_index >= index).count();
            if replicas >= majority {
                self.log.advance_commit(index);
                debug!(node = %self.id, term, commit_index = index, replicas, "leader advanced commit index");
                return;
            }
            index -= 1;
        }
    }

    // -- client commands --

    /// Append a command to the leader's log and start replicating it
    pub fn propose(&mut self, command: impl Into<String>) -> Result<LogEntry> {
        if self.role != Role::Leader {
            return Err(RaftError::NotLeader {
                leader: self.leader.clone(),
            });
        }
        let term = self.current_term();
        let index = self.log.last_index() + 1;
        let entry = self.log.append(term, index, command)?.clone();
        debug!(node = %self.id, term, index, "command appended");
        self.broadcast_append_entries();
        Ok(entry)
    }

    /// Committed entries not yet handed out, in index order
    pub fn take_committed(&mut self) -> Vec<LogEntry> {
        let commit = self.log.commit_index();
        if self.last_applied >= commit {
            return Vec::new();
        }
        let entries: Vec<LogEntry> = self
            .log
            .entries_from(self.last_applied + 1)
            .iter()
            .take_while(|e| e.index <= commit)
            .cloned()
            .collect();
        self.last_applied = commit;
        entries
    }

    /// Re-arm the single timer for the current role
    fn reset_timer(&mut self) {
        let kind = if self.role == Role::Leader {
            TimerKind::Heartbeat
        } else {
            TimerKind::Election
        };
        self.timer.arm(kind);
    }
}
