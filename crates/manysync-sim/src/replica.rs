//! Simulated replicas: protocol components paired with their documents.

use manysync_core::config::HubConfig;
use manysync_core::hub::Hub;
use manysync_core::memory::{MemoryChange, MemoryDoc, MemoryEngine, MemoryOp};
use manysync_core::sink::{Mailbox, Outgoing};
use manysync_core::squash::coalesce;
use manysync_core::{Incoming, Message, Peer, VectorClock};

use crate::config::HubMode;

pub type SimMessage = Message<MemoryChange>;
pub type Outbox = Mailbox<SimMessage>;

/// The hub and the document it serves.
///
/// Unicast and broadcast share one mailbox so the simulator sees them in
/// the order the hub produced them.
pub struct HubReplica {
    hub: Hub<MemoryEngine, Outbox, Outbox>,
    outbox: Outbox,
    doc: MemoryDoc,
}

impl HubReplica {
    pub const ACTOR: &'static str = "hub";

    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let outbox = Outbox::new();
        let hub = Hub::with_config(
            MemoryEngine::new(Self::ACTOR),
            outbox.clone(),
            outbox.clone(),
            config,
        );
        Self {
            hub,
            outbox,
            doc: MemoryDoc::new(Self::ACTOR),
        }
    }

    #[must_use]
    pub const fn doc(&self) -> &MemoryDoc {
        &self.doc
    }

    #[must_use]
    pub const fn belief(&self) -> &VectorClock {
        self.hub.our_clock()
    }

    #[must_use]
    pub fn tracked_peers(&self) -> usize {
        self.hub.peer_count()
    }

    /// Edit locally and tell everyone. Returns the new sequence number.
    pub fn edit(&mut self, ops: Vec<MemoryOp>) -> u64 {
        self.doc = self.doc.change(ops);
        self.hub.notify(&self.doc);
        self.doc.clock().get(Self::ACTOR)
    }

    /// Re-announce the current document.
    pub fn heartbeat(&mut self) {
        self.hub.notify(&self.doc);
    }

    pub fn receive(&mut self, batch: Vec<Incoming<MemoryChange>>, mode: HubMode) {
        if batch.is_empty() {
            return;
        }
        match mode {
            HubMode::PerMessage => {
                for Incoming { peer_id, message } in batch {
                    if let Some(next) = self.hub.apply_message(&peer_id, message, &self.doc) {
                        self.doc = next;
                    }
                }
            }
            HubMode::Buffered => {
                if let Some(next) = self.hub.apply_message_buffered(batch, &self.doc) {
                    self.doc = next;
                }
            }
            HubMode::Coalesced => {
                if let Some(next) = self.hub.apply_message_buffered(coalesce(batch), &self.doc) {
                    self.doc = next;
                }
            }
        }
    }

    pub fn take_outgoing(&self) -> Vec<Outgoing<SimMessage>> {
        self.outbox.drain()
    }
}

/// One peer and its copy of the document.
pub struct PeerReplica {
    id: String,
    peer: Peer<MemoryEngine, Outbox>,
    outbox: Outbox,
    doc: MemoryDoc,
}

impl PeerReplica {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let outbox = Outbox::new();
        Self {
            peer: Peer::new(MemoryEngine::new(id.clone()), outbox.clone()),
            outbox,
            doc: MemoryDoc::new(id.clone()),
            id,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn doc(&self) -> &MemoryDoc {
        &self.doc
    }

    #[must_use]
    pub const fn belief(&self) -> &VectorClock {
        self.peer.their_clock()
    }

    pub fn edit(&mut self, ops: Vec<MemoryOp>) -> u64 {
        self.doc = self.doc.change(ops);
        self.peer.notify(&self.doc);
        self.doc.clock().get(&self.id)
    }

    /// Tell the hub where this peer stands.
    pub fn announce(&mut self) {
        self.peer.notify(&self.doc);
    }

    pub fn receive(&mut self, message: SimMessage) {
        if let Some(next) = self.peer.apply_message(message, &self.doc) {
            self.doc = next;
        }
    }

    pub fn take_outgoing(&self) -> Vec<SimMessage> {
        self.outbox
            .drain()
            .into_iter()
            .map(|outgoing| outgoing.message)
            .collect()
    }
}
