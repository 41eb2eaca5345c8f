use std::collections::BTreeMap;

use anyhow::{Result, bail};
use manysync_core::memory::{MemoryDoc, MemoryOp};
use manysync_core::sink::Recipient;
use manysync_core::{Incoming, VectorClock};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::config::SimulationConfig;
use crate::network::{Envelope, FaultConfig, Node, SendOutcome, SimulatedNetwork};
use crate::oracle::{ConvergenceOracle, ConvergenceReport};
use crate::replica::{HubReplica, PeerReplica, SimMessage};
use crate::rng::SimRng;

/// Delivery rounds one drain attempt may take before it is abandoned.
const MAX_SETTLE_STEPS: u64 = 512;
/// Share of generated edits that delete a key instead of setting it.
const DELETE_RATE_PERCENT: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub round: u64,
    pub kind: TraceEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    Edit {
        node: Node,
        seq: u64,
    },
    Heartbeat,
    Partition {
        peer: usize,
        isolated: bool,
    },
    Send {
        from: Node,
        to: Node,
        changes: usize,
        delay_rounds: u8,
    },
    Duplicate {
        from: Node,
        to: Node,
    },
    Drop {
        from: Node,
        to: Node,
        partitioned: bool,
    },
    Deliver {
        from: Node,
        to: Node,
        changes: usize,
    },
    Reorder {
        count: usize,
    },
    DrainStart,
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub edits: u64,
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub delivered: u64,
    pub reordered_rounds: u64,
    pub partitions: u64,
}

/// Final state of one replica.
#[derive(Debug, Clone)]
pub struct ReplicaOutcome {
    pub node: Node,
    pub doc: MemoryDoc,
    /// Belief clock after every round: the hub's own clock, or a peer's
    /// belief about the hub.
    pub beliefs: Vec<VectorClock>,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub seed: u64,
    /// Rounds run in total, drain included.
    pub rounds: u64,
    pub drain_rounds: u64,
    /// The drain stopped all traffic and left the replicas in agreement.
    pub quiesced: bool,
    pub trace: Vec<TraceEvent>,
    pub stats: SimStats,
    /// The hub first, then peers by index.
    pub replicas: Vec<ReplicaOutcome>,
    /// Highest sequence number each actor authored.
    pub authored: BTreeMap<String, u64>,
    pub convergence: ConvergenceReport,
    /// Peers the hub was tracking at the end.
    pub tracked_peers: usize,
    /// At least one message was lost or a partition happened.
    pub interesting_state_reached: bool,
}

/// Serializable digest of a [`SimulationResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub seed: u64,
    pub rounds: u64,
    pub drain_rounds: u64,
    pub quiesced: bool,
    pub converged: bool,
    pub key_count: usize,
    pub trace_events: usize,
    pub stats: SimStats,
}

impl SimulationResult {
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            seed: self.seed,
            rounds: self.rounds,
            drain_rounds: self.drain_rounds,
            quiesced: self.quiesced,
            converged: self.convergence.converged,
            key_count: self.convergence.key_count,
            trace_events: self.trace.len(),
            stats: self.stats,
        }
    }

    #[must_use]
    pub fn hub(&self) -> Option<&ReplicaOutcome> {
        self.replicas.first()
    }
}

/// Drives one seeded run.
pub struct Simulator {
    config: SimulationConfig,
    rng: SimRng,
    network: SimulatedNetwork,
    hub: HubReplica,
    peers: Vec<PeerReplica>,
    peer_index: BTreeMap<String, usize>,
    round: u64,
    trace: Vec<TraceEvent>,
    stats: SimStats,
    hub_beliefs: Vec<VectorClock>,
    peer_beliefs: Vec<Vec<VectorClock>>,
    authored: BTreeMap<String, u64>,
    finished: bool,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;

        let peers: Vec<PeerReplica> = (0..config.peer_count)
            .map(|idx| PeerReplica::new(Node::Peer(idx).to_string()))
            .collect();
        let peer_index = peers
            .iter()
            .enumerate()
            .map(|(idx, peer)| (peer.id().to_owned(), idx))
            .collect();

        Ok(Self {
            rng: SimRng::new(config.seed),
            network: SimulatedNetwork::new(config.fault),
            hub: HubReplica::new(config.hub),
            peer_beliefs: vec![Vec::new(); peers.len()],
            peers,
            peer_index,
            round: 0,
            trace: Vec::new(),
            stats: SimStats::default(),
            hub_beliefs: Vec::new(),
            authored: BTreeMap::new(),
            finished: false,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Run the faulty phase and the drain, then collect the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if this simulator has already run.
    #[instrument(skip_all, fields(seed = self.config.seed))]
    pub fn run(&mut self) -> Result<SimulationResult> {
        if self.finished {
            bail!("simulator for seed {} already ran", self.config.seed);
        }
        self.finished = true;
        info!(
            peers = self.config.peer_count,
            rounds = self.config.rounds,
            mode = %self.config.hub_mode,
            "simulation start"
        );

        self.record_beliefs();
        for _ in 0..self.config.rounds {
            self.faulty_round();
            self.round += 1;
        }

        let drain_start = self.round;
        let quiesced = self.drain();
        let drain_rounds = self.round.saturating_sub(drain_start);

        let replicas = self.outcomes();
        let convergence = ConvergenceOracle::convergence_report(&replicas);
        if !convergence.converged {
            warn!(divergent = ?convergence.divergent, "replicas diverged");
        }
        info!(
            rounds = self.round,
            drain_rounds,
            converged = convergence.converged,
            "simulation complete"
        );

        Ok(SimulationResult {
            seed: self.config.seed,
            rounds: self.round,
            drain_rounds,
            quiesced,
            trace: std::mem::take(&mut self.trace),
            stats: self.stats,
            replicas,
            authored: self.authored.clone(),
            convergence,
            tracked_peers: self.hub.tracked_peers(),
            interesting_state_reached: self.stats.dropped > 0 || self.stats.partitions > 0,
        })
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn faulty_round(&mut self) {
        self.maybe_toggle_partition();

        for idx in 0..self.peers.len() {
            if self.rng.chance(self.config.edit_rate_percent) {
                let ops = self.random_ops();
                let seq = self.peers[idx].edit(ops);
                let actor = self.peers[idx].id().to_owned();
                self.note_edit(Node::Peer(idx), actor, seq);
            }
        }

        if self.rng.chance(self.config.hub_edit_rate_percent) {
            let ops = self.random_ops();
            let seq = self.hub.edit(ops);
            self.note_edit(Node::Hub, HubReplica::ACTOR.to_owned(), seq);
        }

        let every = self.config.heartbeat_every;
        if every > 0 && self.round % every == 0 {
            self.hub.heartbeat();
            self.push(TraceEventKind::Heartbeat);
        }

        self.step();
    }

    /// Heal the network, then heartbeat until traffic stops and replicas
    /// agree. Returns false if some attempt never stopped or the attempts
    /// ran out with replicas still disagreeing.
    fn drain(&mut self) -> bool {
        self.network.heal();
        self.network.set_fault(FaultConfig::reliable());
        self.push(TraceEventKind::DrainStart);

        for attempt in 0..self.config.drain_attempts {
            self.hub.heartbeat();
            for peer in &mut self.peers {
                peer.announce();
            }
            self.push(TraceEventKind::Heartbeat);

            if !self.settle() {
                warn!(attempt, in_flight = self.network.in_flight_len(), "drain did not settle");
                return false;
            }
            if self.replicas_agree() {
                debug!(attempt, "replicas agree");
                return true;
            }
        }

        let agreed = self.replicas_agree();
        if !agreed {
            warn!(attempts = self.config.drain_attempts, "drain ended with replicas disagreeing");
        }
        agreed
    }

    fn settle(&mut self) -> bool {
        for _ in 0..MAX_SETTLE_STEPS {
            self.step();
            self.round += 1;
            if self.network.in_flight_len() == 0 {
                return true;
            }
        }
        false
    }

    fn step(&mut self) {
        self.flush_outboxes();
        self.deliver();
        self.flush_outboxes();
        self.record_beliefs();
    }

    // -----------------------------------------------------------------------
    // Traffic
    // -----------------------------------------------------------------------

    fn flush_outboxes(&mut self) {
        for outgoing in self.hub.take_outgoing() {
            match outgoing.to {
                Recipient::Everyone => {
                    for idx in 0..self.peers.len() {
                        self.transmit(Node::Hub, Node::Peer(idx), outgoing.message.clone());
                    }
                }
                Recipient::Peer(peer_id) => match self.peer_index.get(&peer_id).copied() {
                    Some(idx) => self.transmit(Node::Hub, Node::Peer(idx), outgoing.message),
                    None => warn!(peer = %peer_id, "hub addressed an unknown peer"),
                },
            }
        }

        for idx in 0..self.peers.len() {
            for message in self.peers[idx].take_outgoing() {
                self.transmit(Node::Peer(idx), Node::Hub, message);
            }
        }
    }

    fn transmit(&mut self, from: Node, to: Node, message: SimMessage) {
        let changes = message.change_count();
        let envelope = Envelope { from, to, message };
        match self.network.send(envelope, self.round, &mut self.rng) {
            SendOutcome::Queued {
                delay_rounds,
                duplicated,
            } => {
                self.stats.sent += 1;
                self.push(TraceEventKind::Send {
                    from,
                    to,
                    changes,
                    delay_rounds,
                });
                if duplicated {
                    self.stats.duplicated += 1;
                    self.push(TraceEventKind::Duplicate { from, to });
                }
            }
            SendOutcome::Dropped { partitioned } => {
                self.stats.dropped += 1;
                self.push(TraceEventKind::Drop {
                    from,
                    to,
                    partitioned,
                });
            }
        }
    }

    fn deliver(&mut self) {
        let delivery = self.network.deliver_ready(self.round, &mut self.rng);
        if delivery.reordered {
            self.stats.reordered_rounds += 1;
            self.push(TraceEventKind::Reorder {
                count: delivery.envelopes.len(),
            });
        }

        let mut hub_batch = Vec::new();
        for Envelope { from, to, message } in delivery.envelopes {
            self.stats.delivered += 1;
            self.push(TraceEventKind::Deliver {
                from,
                to,
                changes: message.change_count(),
            });
            match (from, to) {
                (Node::Peer(_), Node::Hub) => hub_batch.push(Incoming::new(from.to_string(), message)),
                (Node::Hub, Node::Peer(idx)) => {
                    if let Some(peer) = self.peers.get_mut(idx) {
                        peer.receive(message);
                    }
                }
                _ => warn!(%from, %to, "envelope outside the star topology"),
            }
        }

        self.hub.receive(hub_batch, self.config.hub_mode);
    }

    fn maybe_toggle_partition(&mut self) {
        if !self.rng.chance(self.network.fault().partition_rate_percent) {
            return;
        }
        let peer = self.rng.index(self.peers.len());
        let isolated = !self.network.is_isolated(Node::Peer(peer));
        self.network.isolate(peer, isolated);
        self.stats.partitions += 1;
        debug!(peer, isolated, "partition toggled");
        self.push(TraceEventKind::Partition { peer, isolated });
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    fn random_ops(&mut self) -> Vec<MemoryOp> {
        let key = format!("k{}", self.rng.index(self.config.key_space));
        if self.rng.chance(DELETE_RATE_PERCENT) {
            vec![MemoryOp::Delete { key }]
        } else {
            vec![MemoryOp::Set {
                key,
                value: json!(self.rng.below(1_000)),
            }]
        }
    }

    fn note_edit(&mut self, node: Node, actor: String, seq: u64) {
        self.stats.edits += 1;
        let authored = self.authored.entry(actor).or_default();
        *authored = (*authored).max(seq);
        self.push(TraceEventKind::Edit { node, seq });
    }

    fn record_beliefs(&mut self) {
        self.hub_beliefs.push(self.hub.belief().clone());
        for (series, peer) in self.peer_beliefs.iter_mut().zip(&self.peers) {
            series.push(peer.belief().clone());
        }
    }

    fn replicas_agree(&self) -> bool {
        self.peers.iter().all(|peer| peer.doc() == self.hub.doc())
    }

    fn outcomes(&mut self) -> Vec<ReplicaOutcome> {
        let mut out = Vec::with_capacity(self.peers.len() + 1);
        out.push(ReplicaOutcome {
            node: Node::Hub,
            doc: self.hub.doc().clone(),
            beliefs: std::mem::take(&mut self.hub_beliefs),
        });
        for (idx, (peer, beliefs)) in self
            .peers
            .iter()
            .zip(self.peer_beliefs.iter_mut())
            .enumerate()
        {
            out.push(ReplicaOutcome {
                node: Node::Peer(idx),
                doc: peer.doc().clone(),
                beliefs: std::mem::take(beliefs),
            });
        }
        out
    }

    fn push(&mut self, kind: TraceEventKind) {
        self.trace.push(TraceEvent {
            round: self.round,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubMode;

    fn lossless(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            fault: FaultConfig {
                drop_rate_percent: 0,
                partition_rate_percent: 0,
                ..FaultConfig::default()
            },
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = SimulationConfig {
            peer_count: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(config).is_err());
    }

    #[test]
    fn a_simulator_runs_once() {
        let mut sim = Simulator::new(lossless(1)).expect("valid");
        sim.run().expect("first run");
        assert!(sim.run().is_err());
    }

    #[test]
    fn lossless_run_converges() {
        let mut sim = Simulator::new(lossless(3)).expect("valid");
        let result = sim.run().expect("run");
        assert!(result.quiesced);
        assert!(result.convergence.converged, "{:?}", result.convergence);
        assert_eq!(result.replicas.len(), 5);
        assert_eq!(result.tracked_peers, 4);
        assert!(result.stats.edits > 0);
        assert!(!result.interesting_state_reached);
    }

    #[test]
    fn skipped_drain_reports_disagreement() {
        let config = SimulationConfig {
            peer_count: 2,
            rounds: 1,
            edit_rate_percent: 100,
            hub_edit_rate_percent: 0,
            drain_attempts: 0,
            fault: FaultConfig {
                drop_rate_percent: 100,
                ..FaultConfig::default()
            },
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("valid").run().expect("run");
        assert!(!result.quiesced);
        assert!(!result.convergence.converged);
        assert_eq!(result.drain_rounds, 0);
    }

    #[test]
    fn every_hub_mode_converges() {
        for hub_mode in [HubMode::PerMessage, HubMode::Buffered, HubMode::Coalesced] {
            let config = SimulationConfig {
                hub_mode,
                ..lossless(5)
            };
            let result = Simulator::new(config).expect("valid").run().expect("run");
            assert!(result.convergence.converged, "{hub_mode}: {:?}", result.convergence);
        }
    }

    #[test]
    fn beliefs_are_recorded_every_round() {
        let result = Simulator::new(lossless(8)).expect("valid").run().expect("run");
        let expected = usize::try_from(result.rounds).expect("fits") + 1;
        for replica in &result.replicas {
            assert_eq!(replica.beliefs.len(), expected, "{}", replica.node);
        }
    }

    #[test]
    fn summary_serializes() {
        let result = Simulator::new(lossless(2)).expect("valid").run().expect("run");
        let json = serde_json::to_value(result.summary()).expect("encode");
        assert_eq!(json["seed"], 2);
        assert_eq!(json["converged"], true);
    }

    #[test]
    fn trace_events_are_tagged() {
        let event = TraceEvent {
            round: 4,
            kind: TraceEventKind::Drop {
                from: Node::Peer(1),
                to: Node::Hub,
                partitioned: true,
            },
        };
        let json = serde_json::to_value(&event).expect("encode");
        assert_eq!(json["kind"]["event"], "drop");
        assert_eq!(json["kind"]["from"], serde_json::json!({"peer": 1}));
        assert_eq!(json["kind"]["to"], "hub");
    }
}
