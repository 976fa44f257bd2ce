//! # runtime
//!
//! why: timer expiries and inbound rpcs must never interleave on one node's state
//! relations: owns a RaftNode inside a single tokio task, the transport drains the intent channel
//! what: NodeHandle, spawn, Transport impl for the intent sender

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::{Log, LogEntry};
use crate::message::{
    AppendEntriesRequest, AppendEntriesResponse, Intent, RaftMessage, VoteRequest, VoteResponse,
};
use crate::node::{DurableState, NodeStatus, RaftNode};
use crate::peer::NodeConfiguration;
use crate::transport::Transport;

/// Outbound intents go straight onto the channel the transport reads
impl Transport for mpsc::UnboundedSender<Intent> {
    fn send_vote_request(&mut self, target: &str, request: VoteRequest) {
        let intent = Intent::VoteRequest {
            target: target.to_string(),
            request,
        };
        if self.send(intent).is_err() {
            trace!(target, "intent receiver dropped, vote request discarded");
        }
    }

    fn send_append_entries(&mut self, target: &str, request: AppendEntriesRequest) {
        let intent = Intent::AppendEntries {
            target: target.to_string(),
            request,
        };
        if self.send(intent).is_err() {
            trace!(target, "intent receiver dropped, append entries discarded");
        }
    }
}

type Node = RaftNode<mpsc::UnboundedSender<Intent>>;

/// Message types for the node task
#[derive(Debug)]
enum Command {
    RequestVote {
        request: VoteRequest,
        reply: oneshot::Sender<VoteResponse>,
    },
    VoteResponse {
        from: String,
        response: VoteResponse,
    },
    AppendEntries {
        request: AppendEntriesRequest,
        reply: oneshot::Sender<AppendEntriesResponse>,
    },
    AppendEntriesResponse {
        from: String,
        response: AppendEntriesResponse,
    },
    Propose {
        command: String,
        reply: oneshot::Sender<Result<LogEntry>>,
    },
    TakeCommitted {
        reply: oneshot::Sender<Vec<LogEntry>>,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
    DurableState {
        reply: oneshot::Sender<DurableState>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a node running in its own task
#[derive(Debug, Clone)]
pub struct NodeHandle {
    id: String,
    commands: mpsc::Sender<Command>,
}

/// Build a fresh node, start it and run it on the current tokio runtime
///
/// Returns the handle and the receiving end of the node's outbound intents.
pub fn spawn(
    id: impl Into<String>,
    peers: NodeConfiguration,
    config: RaftConfig,
    enable_timers: bool,
) -> Result<(NodeHandle, mpsc::UnboundedReceiver<Intent>, JoinHandle<()>)> {
    spawn_restored(
        id,
        peers,
        config,
        enable_timers,
        DurableState::default(),
    )
}

/// Same as [`spawn`], starting from persisted state
pub fn spawn_restored(
    id: impl Into<String>,
    peers: NodeConfiguration,
    config: RaftConfig,
    enable_timers: bool,
    state: DurableState,
) -> Result<(NodeHandle, mpsc::UnboundedReceiver<Intent>, JoinHandle<()>)> {
    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    let log = Log::from_entries(state.entries)?;
    let mut node = RaftNode::restore(id, peers, config, intent_tx, state.hard_state, log)?;
    node.start(enable_timers);

    let (command_tx, command_rx) = mpsc::channel(100);
    let handle = NodeHandle {
        id: node.id().to_string(),
        commands: command_tx,
    };
    let task = tokio::spawn(run(node, command_rx));
    Ok((handle, intent_rx, task))
}

/// The node's single writer: one command or one timer expiry at a time
async fn run(mut node: Node, mut commands: mpsc::Receiver<Command>) {
    let mut deadline: Option<(u64, Instant)> = None;

    loop {
        deadline = match node.timer().current() {
            Some(arm) => match deadline {
                Some((generation, at)) if generation == arm.generation => Some((generation, at)),
                _ => Some((arm.generation, Instant::now() + arm.duration)),
            },
            None => None,
        };
        let wake_at = deadline.map_or_else(Instant::now, |(_, at)| at);

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Stop { reply }) => {
                    node.stop();
                    let _ = reply.send(());
                    break;
                }
                Some(command) => dispatch(&mut node, command),
                None => {
                    node.stop();
                    break;
                }
            },
            _ = sleep_until(wake_at), if deadline.is_some() => {
                if let Some((generation, _)) = deadline {
                    node.handle_timeout(generation);
                }
            }
        }
    }
    debug!(node = %node.id(), "node task exited");
}

fn dispatch(node: &mut Node, command: Command) {
    match command {
        Command::RequestVote { request, reply } => {
            let _ = reply.send(node.request_vote(&request));
        }
        Command::VoteResponse { from, response } => {
            node.vote_response_received(&from, response);
        }
        Command::AppendEntries { request, reply } => {
            let _ = reply.send(node.append_entries(&request));
        }
        Command::AppendEntriesResponse { from, response } => {
            node.append_entries_response_received(&from, response);
        }
        Command::Propose { command, reply } => {
            let _ = reply.send(node.propose(command));
        }
        Command::TakeCommitted { reply } => {
            let _ = reply.send(node.take_committed());
        }
        Command::Status { reply } => {
            let _ = reply.send(node.status());
        }
        Command::DurableState { reply } => {
            let _ = reply.send(node.durable_state());
        }
        Command::Stop { reply } => {
            let _ = reply.send(());
        }
    }
}

impl NodeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RaftError::Stopped)
    }

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| RaftError::Stopped)
    }

    pub async fn request_vote(&self, request: VoteRequest) -> Result<VoteResponse> {
        self.call(|reply| Command::RequestVote { request, reply }).await
    }

    pub async fn vote_response_received(&self, from: &str, response: VoteResponse) -> Result<()> {
        self.send(Command::VoteResponse {
            from: from.to_string(),
            response,
        })
        .await
    }

    pub async fn append_entries(&self, request: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
        self.call(|reply| Command::AppendEntries { request, reply }).await
    }

    pub async fn append_entries_response_received(
        &self,
        from: &str,
        response: AppendEntriesResponse,
    ) -> Result<()> {
        self.send(Command::AppendEntriesResponse {
            from: from.to_string(),
            response,
        })
        .await
    }

    /// Hand an inbound wire message to the node
    ///
    /// Requests produce the response to send back to `from`; responses
    /// produce nothing.
    pub async fn deliver(&self, from: &str, message: RaftMessage) -> Result<Option<RaftMessage>> {
        match message {
            RaftMessage::VoteRequest(request) => {
                let response = self.request_vote(request).await?;
                Ok(Some(RaftMessage::VoteResponse(response)))
            }
            RaftMessage::AppendEntries(request) => {
                let response = self.append_entries(request).await?;
                Ok(Some(RaftMessage::AppendEntriesResponse(response)))
            }
            RaftMessage::VoteResponse(response) => {
                self.vote_response_received(from, response).await?;
                Ok(None)
            }
            RaftMessage::AppendEntriesResponse(response) => {
                self.append_entries_response_received(from, response).await?;
                Ok(None)
            }
        }
    }

    pub async fn propose(&self, command: impl Into<String>) -> Result<LogEntry> {
        let command = command.into();
        self.call(|reply| Command::Propose { command, reply }).await?
    }

    pub async fn take_committed(&self) -> Result<Vec<LogEntry>> {
        self.call(|reply| Command::TakeCommitted { reply }).await
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    pub async fn durable_state(&self) -> Result<DurableState> {
        self.call(|reply| Command::DurableState { reply }).await
    }

    /// Stop the node; once this returns no timer of the node can fire
    pub async fn stop(&self) -> Result<()> {
        self.call(|reply| Command::Stop { reply }).await
    }
}
