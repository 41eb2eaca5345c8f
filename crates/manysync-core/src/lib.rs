//! manysync-core: clock-driven reconciliation for replicated documents.
//!
//! Three components share one vector-clock exchange:
//!
//! - [`Peer`](peer::Peer): one document, one remote party.
//! - [`Hub`](hub::Hub): one document, many peers, with buffered fan-in.
//! - [`Connection`](connection::Connection): many documents, many peers,
//!   backed by an async [`DocStore`](store::DocStore).
//!
//! The CRDT itself is external ([`DocumentEngine`](engine::DocumentEngine));
//! [`memory`] ships a small engine and store for tests and simulation.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums in [`error`]; `anyhow::Result` only
//!   for config loading.
//! - **Logging**: `tracing` macros; no subscriber is installed here.

pub mod cache;
pub mod clock;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod hub;
pub mod memory;
pub mod message;
pub mod peer;
pub mod sink;
pub mod squash;
pub mod store;

pub use clock::{CausalOrder, VectorClock};
pub use config::{ReceiptPolicy, SyncConfig};
pub use connection::Connection;
pub use engine::DocumentEngine;
pub use error::{ErrorCode, MessageError, StoreError, SyncError};
pub use hub::Hub;
pub use message::{Changes, DocId, DocMessage, Incoming, Message, PeerId};
pub use peer::Peer;
pub use sink::{Mailbox, MessageSink, PeerSink};
pub use store::DocStore;
