//! manysync-sim: deterministic simulation of a hub and its peers.
//!
//! A run places one [`Hub`](manysync_core::hub::Hub) at the centre of a star
//! of [`Peer`](manysync_core::Peer)s, all replicating one in-memory
//! document over a fault-injecting network. Peers and the hub edit at
//! random while messages are delayed, dropped, duplicated, reordered and
//! partitioned away. A final drain heals the network and heartbeats until
//! traffic stops, then the [`oracle`] checks that everyone agrees.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for return types.
//! - **Logging**: `tracing` macros; the binary installs the subscriber.

pub mod campaign;
pub mod config;
pub mod network;
pub mod oracle;
pub mod replica;
pub mod rng;
mod simulator;

pub use config::{HubMode, SimulationConfig};
pub use network::{FaultConfig, Node};
pub use simulator::{
    ReplicaOutcome, RunSummary, SimStats, SimulationResult, Simulator, TraceEvent, TraceEventKind,
};
