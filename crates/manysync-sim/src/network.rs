use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Result, bail};
use manysync_core::Message;
use manysync_core::memory::MemoryChange;
use serde::{Deserialize, Serialize};

use crate::rng::SimRng;

/// A participant in the star topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Hub,
    Peer(usize),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hub => f.write_str("hub"),
            Self::Peer(idx) => write!(f, "peer-{idx}"),
        }
    }
}

/// Fault injection settings for simulated delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of sends dropped.
    pub drop_rate_percent: u8,
    /// Percentage of sends delivered twice.
    pub duplicate_rate_percent: u8,
    /// Percentage chance that a round's deliveries are shuffled.
    pub reorder_rate_percent: u8,
    /// Percentage chance per round to cut off or reconnect a random peer.
    pub partition_rate_percent: u8,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 10,
            partition_rate_percent: 3,
        }
    }
}

impl FaultConfig {
    /// In-order, lossless, next-round delivery.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
            partition_rate_percent: 0,
        }
    }

    /// True if no setting can lose a message.
    #[must_use]
    pub const fn is_lossless(&self) -> bool {
        self.drop_rate_percent == 0 && self.partition_rate_percent == 0
    }

    /// # Errors
    ///
    /// Returns an error if any percentage exceeds 100.
    pub fn validate(&self) -> Result<()> {
        let rates = [
            ("drop_rate_percent", self.drop_rate_percent),
            ("duplicate_rate_percent", self.duplicate_rate_percent),
            ("reorder_rate_percent", self.reorder_rate_percent),
            ("partition_rate_percent", self.partition_rate_percent),
        ];
        for (name, value) in rates {
            if value > 100 {
                bail!("fault.{name} must be at most 100, got {value}");
            }
        }
        Ok(())
    }
}

/// A protocol message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: Node,
    pub to: Node,
    pub message: Message<MemoryChange>,
}

#[derive(Debug, Clone)]
struct InFlight {
    deliver_at: u64,
    envelope: Envelope,
}

/// What happened to one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Queued { delay_rounds: u8, duplicated: bool },
    Dropped { partitioned: bool },
}

/// Messages released in one round.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub envelopes: Vec<Envelope>,
    pub reordered: bool,
}

/// Fault-injecting network between the hub and its peers.
///
/// Partitions isolate individual peers: anything sent to or from an
/// isolated peer is lost, including messages already in flight when they
/// come due.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    in_flight: Vec<InFlight>,
    isolated: BTreeSet<usize>,
    fault: FaultConfig,
}

impl SimulatedNetwork {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            in_flight: Vec::new(),
            isolated: BTreeSet::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault(&self) -> FaultConfig {
        self.fault
    }

    pub const fn set_fault(&mut self, fault: FaultConfig) {
        self.fault = fault;
    }

    pub fn isolate(&mut self, peer: usize, isolated: bool) {
        if isolated {
            self.isolated.insert(peer);
        } else {
            self.isolated.remove(&peer);
        }
    }

    /// Reconnect every peer.
    pub fn heal(&mut self) {
        self.isolated.clear();
    }

    #[must_use]
    pub fn is_isolated(&self, node: Node) -> bool {
        match node {
            Node::Hub => false,
            Node::Peer(idx) => self.isolated.contains(&idx),
        }
    }

    #[must_use]
    pub fn isolated_peers(&self) -> Vec<usize> {
        self.isolated.iter().copied().collect()
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn cut_off(&self, envelope: &Envelope) -> bool {
        self.is_isolated(envelope.from) || self.is_isolated(envelope.to)
    }

    pub fn send(&mut self, envelope: Envelope, round: u64, rng: &mut SimRng) -> SendOutcome {
        if self.cut_off(&envelope) {
            return SendOutcome::Dropped { partitioned: true };
        }
        if rng.chance(self.fault.drop_rate_percent) {
            return SendOutcome::Dropped { partitioned: false };
        }

        let delay = rng.below(u64::from(self.fault.max_delay_rounds) + 1);
        let delay_rounds = u8::try_from(delay).unwrap_or(self.fault.max_delay_rounds);
        let deliver_at = round.saturating_add(u64::from(delay_rounds));

        let duplicated = rng.chance(self.fault.duplicate_rate_percent);
        if duplicated {
            self.in_flight.push(InFlight {
                deliver_at,
                envelope: envelope.clone(),
            });
        }
        self.in_flight.push(InFlight {
            deliver_at,
            envelope,
        });

        SendOutcome::Queued {
            delay_rounds,
            duplicated,
        }
    }

    /// Release everything due by `round`, minus what a partition swallowed.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut SimRng) -> Delivery {
        let (due, waiting): (Vec<InFlight>, Vec<InFlight>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|item| item.deliver_at <= round);
        self.in_flight = waiting;

        let mut envelopes: Vec<Envelope> = due
            .into_iter()
            .map(|item| item.envelope)
            .filter(|envelope| !self.cut_off(envelope))
            .collect();

        let reordered = envelopes.len() > 1 && rng.chance(self.fault.reorder_rate_percent);
        if reordered {
            rng.shuffle(&mut envelopes);
        }

        Delivery {
            envelopes,
            reordered,
        }
    }
}
