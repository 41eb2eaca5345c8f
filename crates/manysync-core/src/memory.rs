//! In-memory document engine and store.
//!
//! [`MemoryDoc`] is a small last-writer-wins map replicated through
//! per-actor change logs. It is a real (if minimal) CRDT: changes carry
//! their causal dependencies, are buffered until those dependencies are
//! met, and are applied idempotently, so any delivery order of the same
//! change set converges to the same state. The simulator and the test suites
//! drive the protocol against it; production deployments plug in their own
//! [`DocumentEngine`] and [`DocStore`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_lock::RwLock;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{ActorId, VectorClock};
use crate::engine::DocumentEngine;
use crate::error::StoreError;
use crate::store::DocStore;

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// One mutation of a single key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MemoryOp {
    Set { key: String, value: Value },
    Delete { key: String },
}

impl MemoryOp {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// An atomic group of ops authored by one actor.
///
/// `(actor, seq)` identifies the change; `deps` is the author's clock at
/// the time of writing, and `lamport` orders concurrent writes to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryChange {
    pub actor: ActorId,
    pub seq: u64,
    pub deps: VectorClock,
    pub lamport: u64,
    pub ops: Vec<MemoryOp>,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Register {
    lamport: u64,
    actor: ActorId,
    value: Option<Value>,
}

/// Immutable snapshot of a replicated map.
///
/// Equality compares the clock and the visible state; the local actor, the
/// order changes arrived in and the pending queue are not part of it.
#[derive(Debug, Clone)]
pub struct MemoryDoc {
    actor: ActorId,
    clock: VectorClock,
    history: Vec<MemoryChange>,
    pending: Vec<MemoryChange>,
    max_lamport: u64,
    registers: BTreeMap<String, Register>,
}

impl PartialEq for MemoryDoc {
    fn eq(&self, other: &Self) -> bool {
        self.clock == other.clock && self.state() == other.state()
    }
}

impl Eq for MemoryDoc {}

impl MemoryDoc {
    /// Empty document authored locally by `actor`.
    #[must_use]
    pub fn new(actor: impl Into<ActorId>) -> Self {
        Self {
            actor: actor.into(),
            clock: VectorClock::new(),
            history: Vec::new(),
            pending: Vec::new(),
            max_lamport: 0,
            registers: BTreeMap::new(),
        }
    }

    /// Document whose first change sets every pair.
    #[must_use]
    pub fn from_pairs<K, I>(actor: impl Into<ActorId>, pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let ops = pairs
            .into_iter()
            .map(|(key, value)| MemoryOp::Set {
                key: key.into(),
                value,
            })
            .collect();
        Self::new(actor).change(ops)
    }

    /// Apply a local edit, returning the new snapshot. An empty op list is a
    /// no-op.
    #[must_use]
    pub fn change(&self, ops: Vec<MemoryOp>) -> Self {
        if ops.is_empty() {
            return self.clone();
        }
        let change = MemoryChange {
            actor: self.actor.clone(),
            seq: self.clock.get(&self.actor).saturating_add(1),
            deps: self.clock.clone(),
            lamport: self.max_lamport.saturating_add(1),
            ops,
        };
        let mut next = self.clone();
        next.receive(change);
        next
    }

    #[must_use]
    pub fn set(&self, key: impl Into<String>, value: Value) -> Self {
        self.change(vec![MemoryOp::Set {
            key: key.into(),
            value,
        }])
    }

    #[must_use]
    pub fn delete(&self, key: impl Into<String>) -> Self {
        self.change(vec![MemoryOp::Delete { key: key.into() }])
    }

    /// Same document, authored by a different local actor from now on.
    #[must_use]
    pub fn with_actor(&self, actor: impl Into<ActorId>) -> Self {
        Self {
            actor: actor.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    #[must_use]
    pub const fn clock(&self) -> &VectorClock {
        &self.clock
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.registers.get(key).and_then(|reg| reg.value.as_ref())
    }

    /// Visible key/value pairs.
    #[must_use]
    pub fn state(&self) -> BTreeMap<String, Value> {
        self.registers
            .iter()
            .filter_map(|(key, reg)| reg.value.clone().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Applied changes in causal order.
    #[must_use]
    pub fn history(&self) -> &[MemoryChange] {
        &self.history
    }

    /// Received changes still waiting on dependencies.
    #[must_use]
    pub fn pending(&self) -> &[MemoryChange] {
        &self.pending
    }

    fn has_seen(&self, change: &MemoryChange) -> bool {
        change.seq <= self.clock.get(&change.actor)
            || self
                .pending
                .iter()
                .any(|queued| queued.actor == change.actor && queued.seq == change.seq)
    }

    fn is_ready(&self, change: &MemoryChange) -> bool {
        self.clock.get(&change.actor) == change.seq.saturating_sub(1)
            && self.clock.dominates(&change.deps)
    }

    fn receive(&mut self, change: MemoryChange) {
        if change.seq == 0 || self.has_seen(&change) {
            return;
        }
        self.pending.push(change);

        while let Some(idx) = self.pending.iter().position(|queued| self.is_ready(queued)) {
            let ready = self.pending.remove(idx);
            self.integrate(ready);
        }
    }

    fn integrate(&mut self, change: MemoryChange) {
        self.clock = self.clock.with(change.actor.clone(), change.seq);
        self.max_lamport = self.max_lamport.max(change.lamport);

        for op in &change.ops {
            let incoming = Register {
                lamport: change.lamport,
                actor: change.actor.clone(),
                value: match op {
                    MemoryOp::Set { value, .. } => Some(value.clone()),
                    MemoryOp::Delete { .. } => None,
                },
            };
            match self.registers.get_mut(op.key()) {
                Some(current)
                    if (current.lamport, current.actor.as_str())
                        > (incoming.lamport, incoming.actor.as_str()) => {}
                Some(current) => *current = incoming,
                None => {
                    self.registers.insert(op.key().to_owned(), incoming);
                }
            }
        }

        self.history.push(change);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// [`DocumentEngine`] over [`MemoryDoc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEngine {
    actor: ActorId,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new("local")
    }
}

impl MemoryEngine {
    /// Engine whose fresh documents are authored by `actor`.
    #[must_use]
    pub fn new(actor: impl Into<ActorId>) -> Self {
        Self {
            actor: actor.into(),
        }
    }
}

impl DocumentEngine for MemoryEngine {
    type Doc = MemoryDoc;
    type Change = MemoryChange;

    fn clock(&self, doc: &MemoryDoc) -> VectorClock {
        doc.clock.clone()
    }

    fn changes_since(&self, doc: &MemoryDoc, clock: &VectorClock) -> Vec<MemoryChange> {
        doc.history
            .iter()
            .filter(|change| change.seq > clock.get(&change.actor))
            .cloned()
            .collect()
    }

    fn apply_changes(&self, doc: &MemoryDoc, changes: &[MemoryChange]) -> MemoryDoc {
        let mut next = doc.clone();
        for change in changes {
            next.receive(change.clone());
        }
        next
    }

    fn new_doc(&self) -> MemoryDoc {
        MemoryDoc::new(self.actor.clone())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// [`DocStore`] over an in-memory map.
///
/// Counts reads and writes, and can be switched into a failing mode to
/// exercise error propagation.
#[derive(Debug)]
pub struct MemoryStore<D> {
    docs: RwLock<BTreeMap<String, D>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl<D> Default for MemoryStore<D> {
    fn default() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }
}

impl<D> MemoryStore<D> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `docs`.
    #[must_use]
    pub fn with_docs<K: Into<String>>(docs: impl IntoIterator<Item = (K, D)>) -> Self {
        Self {
            docs: RwLock::new(docs.into_iter().map(|(id, doc)| (id.into(), doc)).collect()),
            ..Self::default()
        }
    }

    /// Number of `get_doc` calls so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `set_doc` calls so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable {
                reason: "memory store switched to failing mode".into(),
            });
        }
        Ok(())
    }
}

impl<D: Clone> MemoryStore<D> {
    /// Direct read that bypasses the counters.
    pub async fn snapshot(&self, doc_id: &str) -> Option<D> {
        self.docs.read().await.get(doc_id).cloned()
    }
}

#[async_trait]
impl<D: Clone + Send + Sync> DocStore for MemoryStore<D> {
    type Doc = D;

    async fn get_doc(&self, doc_id: &str) -> Result<Option<D>, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        Ok(self.docs.read().await.get(doc_id).cloned())
    }

    async fn set_doc(&self, doc_id: &str, doc: D) -> Result<D, StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        self.docs.write().await.insert(doc_id.to_owned(), doc.clone());
        Ok(doc)
    }
}
