//! Multi-document, multi-peer reconciliation.
//!
//! A [`Connection`] multiplexes many documents over links to many peers. It
//! keeps a belief clock per document (what it has sent about that document)
//! and, per registered peer, a clock per document. Documents live in an
//! external [`DocStore`]; the connection loads and persists them as
//! messages arrive.
//!
//! Peers must be registered with [`Connection::add_peer`] before their
//! messages are accepted. Validation failures are raised before any state
//! changes or any message is sent.

use std::collections::BTreeMap;

use tracing::{debug, instrument, trace, warn};

use crate::cache::PeerCache;
use crate::clock::VectorClock;
use crate::config::{ConnectionConfig, ReceiptPolicy};
use crate::engine::DocumentEngine;
use crate::error::SyncError;
use crate::message::{DocId, DocMessage, Message, PeerId};
use crate::sink::PeerSink;
use crate::store::DocStore;

type ClockMap = BTreeMap<DocId, VectorClock>;

pub struct Connection<E: DocumentEngine, St, S> {
    engine: E,
    store: St,
    sink: S,
    our_clocks: ClockMap,
    their_clocks: PeerCache<ClockMap>,
    config: ConnectionConfig,
}

impl<E, St, S> Connection<E, St, S>
where
    E: DocumentEngine,
    St: DocStore<Doc = E::Doc>,
    S: PeerSink<DocMessage<E::Change>>,
{
    /// Connection with default settings: union receipts, unbounded peers.
    pub fn new(engine: E, store: St, sink: S) -> Self {
        Self::with_config(engine, store, sink, ConnectionConfig::default())
    }

    pub fn with_config(engine: E, store: St, sink: S, config: ConnectionConfig) -> Self {
        Self {
            engine,
            store,
            sink,
            our_clocks: ClockMap::new(),
            their_clocks: config.peers.build(),
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Peer registry
    // -----------------------------------------------------------------------

    /// Register `peer_id`. Registering an existing peer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidPeerId`] for an empty id.
    pub fn add_peer(&mut self, peer_id: &str) -> Result<(), SyncError> {
        if peer_id.is_empty() {
            warn!("add_peer called with an empty peer id");
            return Err(SyncError::InvalidPeerId);
        }
        if self.their_clocks.contains(peer_id) {
            return Ok(());
        }
        if let Some(evicted) = self.their_clocks.insert(peer_id, ClockMap::new()) {
            debug!(peer = %evicted, "connection evicted peer to register {peer_id}");
        }
        Ok(())
    }

    /// Forget `peer_id` and everything recorded about it.
    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        self.their_clocks.remove(peer_id).is_some()
    }

    pub fn has_peer(&self, peer_id: &str) -> bool {
        self.their_clocks.contains(peer_id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.their_clocks.peer_ids()
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Belief clock for `doc_id`: the union of every clock sent about it.
    pub fn our_clock(&self, doc_id: &str) -> Option<&VectorClock> {
        self.our_clocks.get(doc_id)
    }

    /// Recorded clock of `peer_id` for `doc_id`.
    pub fn their_clock(&self, peer_id: &str, doc_id: &str) -> Option<&VectorClock> {
        self.their_clocks.get(peer_id).and_then(|docs| docs.get(doc_id))
    }

    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub const fn store(&self) -> &St {
        &self.store
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub const fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Announce that `doc_id` now looks like `doc`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StaleDocument`] if `doc` is causally older than
    /// what this connection has already sent for `doc_id`.
    #[instrument(skip_all, fields(doc = doc_id))]
    pub fn doc_changed(&mut self, doc_id: &str, doc: &E::Doc) -> Result<(), SyncError> {
        let offered = self.engine.clock(doc);
        let stale = self
            .our_clocks
            .get(doc_id)
            .filter(|recorded| !offered.dominates(recorded));
        if let Some(recorded) = stale {
            warn!(%recorded, %offered, "rejected stale document");
            return Err(SyncError::StaleDocument {
                doc_id: doc_id.to_owned(),
                recorded: recorded.clone(),
                offered,
            });
        }

        self.sync_doc(doc_id, doc, &offered);
        Ok(())
    }

    /// Handle a message from `peer_id`.
    ///
    /// Returns the persisted document when the message carried changes, the
    /// stored document when it did not, and `None` when the document is
    /// unknown locally.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidPeerId`] for an empty id.
    /// - [`SyncError::UnknownPeer`] if `peer_id` was never registered.
    /// - [`SyncError::Store`] if the store fails.
    #[instrument(skip_all, fields(peer = peer_id, doc = %msg.doc_id, changes = msg.message.change_count()))]
    pub async fn receive_msg(
        &mut self,
        peer_id: &str,
        msg: DocMessage<E::Change>,
    ) -> Result<Option<E::Doc>, SyncError> {
        if peer_id.is_empty() {
            warn!("receive_msg called with an empty peer id");
            return Err(SyncError::InvalidPeerId);
        }
        if !self.their_clocks.contains(peer_id) {
            warn!("receive_msg called for an unregistered peer");
            return Err(SyncError::UnknownPeer {
                peer_id: peer_id.to_owned(),
            });
        }

        let DocMessage { doc_id, message } = msg;
        let (clock, changes) = message.into_parts();
        self.record_receipt(peer_id, &doc_id, &clock);

        if !changes.is_empty() {
            let current = match self.store.get_doc(&doc_id).await? {
                Some(doc) => doc,
                None => self.engine.new_doc(),
            };
            let next = self.engine.apply_changes(&current, &changes);
            let persisted = self.store.set_doc(&doc_id, next).await?;
            trace!(applied = changes.len(), "persisted incoming changes");
            return Ok(Some(persisted));
        }

        match self.store.get_doc(&doc_id).await? {
            Some(doc) => {
                let clock = self.engine.clock(&doc);
                self.sync_doc(&doc_id, &doc, &clock);
                Ok(Some(doc))
            }
            None => {
                if !self.our_clocks.contains_key(&doc_id) {
                    trace!("unknown document, requesting history");
                    self.send(peer_id, DocMessage::request(doc_id));
                }
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn record_receipt(&mut self, peer_id: &str, doc_id: &str, clock: &VectorClock) {
        let policy = self.config.receipt;
        let (docs, _evicted) = self.their_clocks.upsert(peer_id, ClockMap::new);
        let record = docs.entry(doc_id.to_owned()).or_default();
        *record = match policy {
            ReceiptPolicy::Overwrite => clock.clone(),
            ReceiptPolicy::Union => record.union(clock),
        };
    }

    fn sync_doc(&mut self, doc_id: &str, doc: &E::Doc, doc_clock: &VectorClock) {
        for peer_id in self.their_clocks.peer_ids() {
            self.sync_peer(&peer_id, doc_id, doc, doc_clock);
        }
    }

    fn sync_peer(&mut self, peer_id: &str, doc_id: &str, doc: &E::Doc, doc_clock: &VectorClock) {
        let Some(docs) = self.their_clocks.get_mut(peer_id) else {
            return;
        };
        let record = docs.entry(doc_id.to_owned()).or_default();

        let missing = self.engine.changes_since(doc, record);
        if !missing.is_empty() {
            *record = record.union(doc_clock);
            let message = Message::from_parts(doc_clock.clone(), missing);
            self.send(peer_id, DocMessage::new(doc_id, message));
            return;
        }

        // Nothing to ship; announce the clock only if our belief lags it.
        let announced = self
            .our_clocks
            .get(doc_id)
            .map_or(doc_clock.is_empty(), |ours| ours == doc_clock);
        if !announced {
            trace!(peer = peer_id, clock = %doc_clock, "belief out of date, announcing clock");
            self.send(peer_id, DocMessage::new(doc_id, Message::clock_only(doc_clock.clone())));
        }
    }

    fn send(&mut self, peer_id: &str, msg: DocMessage<E::Change>) {
        let belief = self.our_clocks.entry(msg.doc_id.clone()).or_default();
        *belief = belief.union(msg.message.clock());
        debug!(
            peer = peer_id,
            doc = %msg.doc_id,
            clock = %msg.message.clock(),
            changes = msg.message.change_count(),
            "connection send"
        );
        self.sink.send_to(peer_id, msg);
    }
}
