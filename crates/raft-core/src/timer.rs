//! # timer
//!
//! why: exactly one timer is armed at a time and late callbacks must be recognisable
//! relations: owned by node.rs; runtime.rs sleeps on the current arm and reports its generation back
//! what: TimerKind, TimerArm, Timer, random_election_timeout

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::RaftConfig;

/// What a timer expiry means for the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// No leader contact: start (or restart) an election
    Election,
    /// Leader: send the next round of append entries
    Heartbeat,
}

/// One arming of the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArm {
    pub generation: u64,
    pub kind: TimerKind,
    pub duration: Duration,
}

/// Generates a random election timeout within the configured range
pub fn random_election_timeout<R: Rng + ?Sized>(rng: &mut R, min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}

/// The node's single timer, kept as plain data
///
/// Every `arm` bumps the generation, so an expiry is only honoured when it
/// carries the generation of the arm that is still current.
#[derive(Debug)]
pub struct Timer {
    enabled: bool,
    stopped: bool,
    generation: u64,
    armed: Option<TimerArm>,
    rng: StdRng,
    election_min: u64,
    election_max: u64,
    heartbeat: u64,
}

impl Timer {
    pub fn new(config: &RaftConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            enabled: false,
            stopped: false,
            generation: 0,
            armed: None,
            rng,
            election_min: config.election_timeout_min,
            election_max: config.election_timeout_max,
            heartbeat: config.heartbeat_interval,
        }
    }

    /// Allow arming; called on start
    pub fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.stopped = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.stopped
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The arm that is currently waiting to fire
    pub fn current(&self) -> Option<TimerArm> {
        self.armed
    }

    /// Cancel whatever is armed and arm `kind` with a fresh duration
    ///
    /// The generation moves even when timers are disabled, so any callback
    /// already in flight is invalidated.
    pub fn arm(&mut self, kind: TimerKind) -> Option<TimerArm> {
        self.generation += 1;
        if !self.is_enabled() {
            self.armed = None;
            return None;
        }
        let duration = match kind {
            TimerKind::Election => {
                random_election_timeout(&mut self.rng, self.election_min, self.election_max)
            }
            TimerKind::Heartbeat => Duration::from_millis(self.heartbeat),
        };
        let arm = TimerArm {
            generation: self.generation,
            kind,
            duration,
        };
        self.armed = Some(arm);
        self.armed
    }

    /// Disarm for good; nothing fires until `enable` is called again
    pub fn stop(&mut self) {
        self.stopped = true;
        self.generation += 1;
        self.armed = None;
    }

    /// Consume an expiry, returning its kind if it belongs to the current arm
    pub fn fire(&mut self, generation: u64) -> Option<TimerKind> {
        match self.armed {
            Some(arm) if arm.generation == generation && self.is_enabled() => {
                self.armed = None;
                Some(arm.kind)
            }
            _ => None,
        }
    }
}
