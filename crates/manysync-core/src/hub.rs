//! One-to-many reconciliation over a single document.
//!
//! A [`Hub`] keeps one clock record per peer plus a belief clock of its own
//! (`our_clock`): what it has applied or broadcast, independent of whether
//! the caller has finished persisting the latest document. Messages sent
//! to the hub are assumed to be meant for everyone, so net-new changes are
//! broadcast rather than echoed to the sender.
//!
//! Per-message and buffered application share one code path: a single
//! message is a batch of one.
//!
//! # Cycle
//!
//! 1. Record each sender's clock (see [`ReceiptPolicy`]) and concatenate all
//!    changes in arrival order.
//! 2. If there are changes, apply them once, advance the belief clock, and
//!    broadcast the net-new changes once.
//! 3. For each sender in first-arrival order, unicast whatever the pre-batch
//!    document had that the sender's clock lacks. A sender with nothing to
//!    receive whose clock differs from the belief clock is a straggler:
//!    either it missed a broadcast, or it holds changes the hub never got.
//! 4. If any straggler was seen and nothing was broadcast, broadcast the
//!    belief clock once.

use tracing::{debug, instrument, trace};

use crate::cache::PeerCache;
use crate::clock::VectorClock;
use crate::config::{HubConfig, ReceiptPolicy};
use crate::engine::DocumentEngine;
use crate::message::{Incoming, Message, PeerId};
use crate::sink::{MessageSink, PeerSink};

pub struct Hub<E: DocumentEngine, U, B> {
    engine: E,
    unicast: U,
    broadcast: B,
    our_clock: VectorClock,
    their_clocks: PeerCache<VectorClock>,
    config: HubConfig,
}

impl<E, U, B> Hub<E, U, B>
where
    E: DocumentEngine,
    U: PeerSink<Message<E::Change>>,
    B: MessageSink<Message<E::Change>>,
{
    /// Hub with default settings: overwrite receipts, unbounded peer cache.
    pub fn new(engine: E, unicast: U, broadcast: B) -> Self {
        Self::with_config(engine, unicast, broadcast, HubConfig::default())
    }

    pub fn with_config(engine: E, unicast: U, broadcast: B, config: HubConfig) -> Self {
        Self {
            engine,
            unicast,
            broadcast,
            our_clock: VectorClock::new(),
            their_clocks: config.peers.build(),
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Everything this hub has applied or broadcast.
    pub const fn our_clock(&self) -> &VectorClock {
        &self.our_clock
    }

    /// Recorded clock for `peer_id`, if tracked.
    pub fn their_clock(&self, peer_id: &str) -> Option<&VectorClock> {
        self.their_clocks.get(peer_id)
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.their_clocks.peer_ids()
    }

    pub fn peer_count(&self) -> usize {
        self.their_clocks.len()
    }

    /// Stop tracking `peer_id`, returning its last recorded clock.
    pub fn remove_peer(&mut self, peer_id: &str) -> Option<VectorClock> {
        let removed = self.their_clocks.remove(peer_id);
        if removed.is_some() {
            debug!(peer = peer_id, "hub dropped peer");
        }
        removed
    }

    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    pub const fn engine(&self) -> &E {
        &self.engine
    }

    pub const fn unicast_sink(&self) -> &U {
        &self.unicast
    }

    pub const fn broadcast_sink(&self) -> &B {
        &self.broadcast
    }

    pub const fn unicast_sink_mut(&mut self) -> &mut U {
        &mut self.unicast
    }

    pub const fn broadcast_sink_mut(&mut self) -> &mut B {
        &mut self.broadcast
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Handle one message from `peer_id` against the current `doc`.
    ///
    /// Returns the new document when the message carried changes.
    #[instrument(skip_all, fields(peer = peer_id, clock = %msg.clock(), changes = msg.change_count()))]
    pub fn apply_message(
        &mut self,
        peer_id: &str,
        msg: Message<E::Change>,
        doc: &E::Doc,
    ) -> Option<E::Doc> {
        self.cycle(vec![Incoming::new(peer_id, msg)], doc)
    }

    /// Handle a batch of messages that arrived together, applying all of
    /// their changes in one step.
    ///
    /// Returns the new document when any message carried changes.
    #[instrument(skip_all, fields(batch = batch.len()))]
    pub fn apply_message_buffered(
        &mut self,
        batch: Vec<Incoming<E::Change>>,
        doc: &E::Doc,
    ) -> Option<E::Doc> {
        self.cycle(batch, doc)
    }

    /// Announce a locally changed `doc` to every peer.
    ///
    /// Tracked peers missing changes get them by unicast; then the document
    /// clock is broadcast unconditionally.
    #[instrument(skip_all, fields(peers = self.their_clocks.len()))]
    pub fn notify(&mut self, doc: &E::Doc) {
        let clock = self.engine.clock(doc);
        self.our_clock = self.our_clock.union(&clock);

        let tracked: Vec<(PeerId, VectorClock)> = self
            .their_clocks
            .iter()
            .map(|(peer_id, recorded)| (peer_id.to_owned(), recorded.clone()))
            .collect();

        for (peer_id, recorded) in tracked {
            let missing = self.engine.changes_since(doc, &recorded);
            if !missing.is_empty() {
                self.send_to(&peer_id, Message::from_parts(clock.clone(), missing));
            }
        }

        self.send_broadcast(Message::clock_only(clock));
    }

    // -----------------------------------------------------------------------
    // Cycle
    // -----------------------------------------------------------------------

    fn cycle(&mut self, batch: Vec<Incoming<E::Change>>, doc: &E::Doc) -> Option<E::Doc> {
        let mut senders: Vec<(PeerId, VectorClock)> = Vec::new();
        let mut combined: Vec<E::Change> = Vec::new();

        for Incoming { peer_id, message } in batch {
            let (clock, changes) = message.into_parts();
            let recorded = self.record_receipt(&peer_id, &clock);
            match senders.iter_mut().find(|(id, _)| *id == peer_id) {
                Some((_, captured)) => *captured = recorded,
                None => senders.push((peer_id, recorded)),
            }
            combined.extend(changes);
        }

        let mut broadcast_this_cycle = false;
        let applied = if combined.is_empty() {
            None
        } else {
            let next = self.engine.apply_changes(doc, &combined);
            let next_clock = self.engine.clock(&next);
            self.our_clock = self.our_clock.union(&next_clock);

            let net_new = self.engine.new_changes(doc, &next);
            trace!(received = combined.len(), net_new = net_new.len(), "applied batch");
            if !net_new.is_empty() {
                self.send_broadcast(Message::from_parts(next_clock, net_new));
                broadcast_this_cycle = true;
            }
            Some(next)
        };

        let current_clock = self.engine.clock(applied.as_ref().unwrap_or(doc));
        let mut straggler = false;
        for (peer_id, peer_clock) in &senders {
            let missing = self.engine.changes_since(doc, peer_clock);
            if !missing.is_empty() {
                self.send_to(peer_id, Message::from_parts(current_clock.clone(), missing));
            } else if *peer_clock != self.our_clock {
                trace!(peer = %peer_id, theirs = %peer_clock, ours = %self.our_clock, "straggler");
                straggler = true;
            }
        }

        if straggler && !broadcast_this_cycle {
            self.send_broadcast(Message::clock_only(self.our_clock.clone()));
        }

        applied
    }

    /// Update the record for `peer_id` and return the clock to catch it up
    /// against.
    fn record_receipt(&mut self, peer_id: &str, clock: &VectorClock) -> VectorClock {
        let policy = self.config.receipt;
        let (record, _evicted) = self.their_clocks.upsert(peer_id, VectorClock::new);
        *record = match policy {
            ReceiptPolicy::Overwrite => clock.clone(),
            ReceiptPolicy::Union => record.union(clock),
        };
        record.clone()
    }

    fn send_to(&mut self, peer_id: &str, msg: Message<E::Change>) {
        if let Some(record) = self.their_clocks.get_mut(peer_id) {
            *record = record.union(msg.clock());
        }
        debug!(peer = peer_id, clock = %msg.clock(), changes = msg.change_count(), "hub unicast");
        self.unicast.send_to(peer_id, msg);
    }

    fn send_broadcast(&mut self, msg: Message<E::Change>) {
        self.our_clock = self.our_clock.union(msg.clock());
        for record in self.their_clocks.values_mut() {
            *record = record.union(msg.clock());
        }
        debug!(clock = %msg.clock(), changes = msg.change_count(), "hub broadcast");
        self.broadcast.send(msg);
    }
}
