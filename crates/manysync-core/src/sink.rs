//! Outbound message sinks.
//!
//! The reconciliation components never talk to a network. They hand each
//! outgoing message to a sink supplied by the caller: a [`MessageSink`] for
//! "send to the other side" or "send to everyone", and a [`PeerSink`] for
//! "send to this peer". Plain closures implement both traits, and
//! [`Mailbox`] records everything it is given.

use std::cell::RefCell;
use std::rc::Rc;

use crate::message::PeerId;

// ---------------------------------------------------------------------------
// Sink traits
// ---------------------------------------------------------------------------

/// Destination for messages with a single implied recipient (or all of them).
pub trait MessageSink<M> {
    fn send(&mut self, message: M);
}

/// Destination for messages addressed to one peer.
pub trait PeerSink<M> {
    fn send_to(&mut self, peer_id: &str, message: M);
}

impl<M, F: FnMut(M)> MessageSink<M> for F {
    fn send(&mut self, message: M) {
        self(message);
    }
}

impl<M, F: FnMut(&str, M)> PeerSink<M> for F {
    fn send_to(&mut self, peer_id: &str, message: M) {
        self(peer_id, message);
    }
}

// ---------------------------------------------------------------------------
// Recording sink
// ---------------------------------------------------------------------------

/// Who a recorded message was addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    Peer(PeerId),
    Everyone,
}

/// One recorded outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing<M> {
    pub to: Recipient,
    pub message: M,
}

/// A sink that records messages in send order.
///
/// Clones share the same log, so one mailbox can serve as both the unicast
/// and broadcast sink of a hub while keeping a single interleaved history.
#[derive(Debug)]
pub struct Mailbox<M> {
    log: Rc<RefCell<Vec<Outgoing<M>>>>,
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            log: Rc::clone(&self.log),
        }
    }
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        Self {
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<M> Mailbox<M> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every recorded message, leaving the log empty.
    pub fn drain(&self) -> Vec<Outgoing<M>> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.log.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }

    fn record(&self, to: Recipient, message: M) {
        self.log.borrow_mut().push(Outgoing { to, message });
    }
}

impl<M: Clone> Mailbox<M> {
    /// Snapshot of the log.
    #[must_use]
    pub fn sent(&self) -> Vec<Outgoing<M>> {
        self.log.borrow().clone()
    }

    /// Messages sent through the broadcast side.
    #[must_use]
    pub fn broadcasts(&self) -> Vec<M> {
        self.log
            .borrow()
            .iter()
            .filter(|out| out.to == Recipient::Everyone)
            .map(|out| out.message.clone())
            .collect()
    }

    /// Messages addressed to `peer_id`.
    #[must_use]
    pub fn to_peer(&self, peer_id: &str) -> Vec<M> {
        self.log
            .borrow()
            .iter()
            .filter(|out| matches!(&out.to, Recipient::Peer(id) if id == peer_id))
            .map(|out| out.message.clone())
            .collect()
    }
}

impl<M> MessageSink<M> for Mailbox<M> {
    fn send(&mut self, message: M) {
        self.record(Recipient::Everyone, message);
    }
}

impl<M> PeerSink<M> for Mailbox<M> {
    fn send_to(&mut self, peer_id: &str, message: M) {
        self.record(Recipient::Peer(peer_id.to_owned()), message);
    }
}
