//! # config
//!
//! why: timing knobs and the jitter seed live in one validated struct
//! relations: read by timer.rs to draw timeouts, passed through node.rs and runtime.rs
//! what: RaftConfig

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};

/// Timing configuration for a node, all values in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout
    pub election_timeout_min: u64,
    /// Upper bound of the randomized election timeout (inclusive)
    pub election_timeout_max: u64,
    /// How often a leader sends append entries
    pub heartbeat_interval: u64,
    /// Seed for the timeout jitter; entropy is used when absent
    pub rng_seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            rng_seed: None,
        }
    }
}

impl RaftConfig {
    /// Parse and validate a JSON config; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RaftConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Same config with a fixed jitter seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Heartbeats must fire well inside the shortest election timeout
    pub fn validate(&self) -> Result<()> {
        let invalid = self.election_timeout_min == 0
            || self.election_timeout_min > self.election_timeout_max
            || self.heartbeat_interval == 0
            || self.heartbeat_interval >= self.election_timeout_min;
        if invalid {
            return Err(RaftError::InvalidTimeouts {
                min: self.election_timeout_min,
                max: self.election_timeout_max,
                heartbeat: self.heartbeat_interval,
            });
        }
        Ok(())
    }
}
