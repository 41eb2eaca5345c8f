//! One-to-one reconciliation.
//!
//! A [`Peer`] sits on one end of a link to exactly one remote party and
//! keeps a single belief about that party's clock. Every exchange has three
//! phases:
//!
//! 1. apply whatever changes the message carried;
//! 2. send back the changes the sender's declared clock is missing;
//! 3. if the sender's clock still has something we lack, announce our clock
//!    so the sender supplies it.
//!
//! Sends update the belief before the sink runs, so a sink that delivers
//! synchronously back into this peer sees a consistent state.

use tracing::{debug, instrument, trace};

use crate::clock::VectorClock;
use crate::engine::DocumentEngine;
use crate::message::Message;
use crate::sink::MessageSink;

pub struct Peer<E: DocumentEngine, S> {
    engine: E,
    sink: S,
    their_clock: VectorClock,
}

impl<E, S> Peer<E, S>
where
    E: DocumentEngine,
    S: MessageSink<Message<E::Change>>,
{
    pub fn new(engine: E, sink: S) -> Self {
        Self {
            engine,
            sink,
            their_clock: VectorClock::new(),
        }
    }

    /// What we believe the remote side has seen.
    pub const fn their_clock(&self) -> &VectorClock {
        &self.their_clock
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    pub const fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Handle a message from the remote side against our current `doc`.
    ///
    /// Returns the new document when the message carried changes, `None`
    /// otherwise.
    #[instrument(skip_all, fields(clock = %msg.clock(), changes = msg.change_count()))]
    pub fn apply_message(&mut self, msg: Message<E::Change>, doc: &E::Doc) -> Option<E::Doc> {
        let (declared, changes) = msg.into_parts();
        self.their_clock = self.their_clock.union(&declared);

        let applied = if changes.is_empty() {
            None
        } else {
            Some(self.engine.apply_changes(doc, &changes))
        };
        let current = applied.as_ref().unwrap_or(doc);
        let our_clock = self.engine.clock(current);

        let missing = self.engine.changes_since(doc, &declared);
        if !missing.is_empty() {
            trace!(count = missing.len(), "remote is missing changes");
            self.send(Message::from_parts(our_clock.clone(), missing));
        }

        if our_clock.behind(&declared) {
            trace!(ours = %our_clock, theirs = %declared, "remote is ahead, requesting");
            self.send(Message::clock_only(our_clock));
        }

        applied
    }

    /// Tell the remote side about a local change to `doc`.
    ///
    /// Sends exactly one message: missing changes if there are any, otherwise
    /// a clock announcement.
    #[instrument(skip_all)]
    pub fn notify(&mut self, doc: &E::Doc) {
        let clock = self.engine.clock(doc);
        let missing = self.engine.changes_since(doc, &self.their_clock);
        self.send(Message::from_parts(clock, missing));
    }

    fn send(&mut self, msg: Message<E::Change>) {
        self.their_clock = self.their_clock.union(msg.clock());
        debug!(clock = %msg.clock(), changes = msg.change_count(), "peer send");
        self.sink.send(msg);
    }
}
