use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use manysync_core::config::HubConfig;
use serde::{Deserialize, Serialize};

use crate::network::FaultConfig;

/// How the hub consumes the messages that reach it in one round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HubMode {
    /// One `apply_message` call per message.
    PerMessage,
    /// One `apply_message_buffered` call per round.
    #[default]
    Buffered,
    /// Squash each peer's messages first, then apply as one batch.
    Coalesced,
}

impl fmt::Display for HubMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PerMessage => "per-message",
            Self::Buffered => "buffered",
            Self::Coalesced => "coalesced",
        })
    }
}

impl FromStr for HubMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-message" => Ok(Self::PerMessage),
            "buffered" => Ok(Self::Buffered),
            "coalesced" => Ok(Self::Coalesced),
            other => Err(format!(
                "unknown hub mode `{other}` (expected per-message, buffered or coalesced)"
            )),
        }
    }
}

/// Parameters for one simulated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Peers connected to the hub.
    pub peer_count: usize,
    /// Faulty rounds before the final drain.
    pub rounds: u64,
    /// Per-peer, per-round chance of a local edit.
    pub edit_rate_percent: u8,
    /// Per-round chance of an edit made at the hub.
    pub hub_edit_rate_percent: u8,
    /// Distinct keys edits are spread over.
    pub key_space: usize,
    /// Hub announces its clock every this many rounds; 0 disables it.
    pub heartbeat_every: u64,
    pub hub_mode: HubMode,
    pub hub: HubConfig,
    pub fault: FaultConfig,
    /// Heartbeats attempted during the drain before giving up. Zero skips
    /// the drain, so the run is judged on the state the faults left behind.
    pub drain_attempts: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            peer_count: 4,
            rounds: 32,
            edit_rate_percent: 30,
            hub_edit_rate_percent: 10,
            key_space: 6,
            heartbeat_every: 4,
            hub_mode: HubMode::default(),
            hub: HubConfig::default(),
            fault: FaultConfig::default(),
            drain_attempts: 4,
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.peer_count == 0 {
            bail!("peer_count must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if self.key_space == 0 {
            bail!("key_space must be > 0");
        }
        if self.edit_rate_percent > 100 || self.hub_edit_rate_percent > 100 {
            bail!("edit rates must be at most 100");
        }
        if self.hub.peers.capacity == Some(0) {
            bail!("hub.peers.capacity must be at least 1");
        }
        self.fault.validate()
    }
}
