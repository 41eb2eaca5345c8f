//! Document engine capability.
//!
//! The protocol never looks inside a document or a change. Everything it
//! needs from the CRDT layer goes through [`DocumentEngine`].

use crate::clock::VectorClock;

// ---------------------------------------------------------------------------
// Engine trait
// ---------------------------------------------------------------------------

/// Abstraction over the CRDT library that owns document state.
///
/// Implementations must satisfy:
///
/// - `apply_changes` is idempotent (re-applying a change is a no-op) and
///   order-independent (any permutation of the same change set converges).
/// - `apply_changes` returns a new snapshot and never mutates its input.
/// - `changes_since` is deterministic, returns changes in an order that
///   `apply_changes` accepts, and is empty when `clock` dominates the
///   document's clock.
pub trait DocumentEngine {
    /// Immutable document snapshot.
    type Doc: Clone;
    /// Opaque change record.
    type Change: Clone;

    /// The document's current clock.
    fn clock(&self, doc: &Self::Doc) -> VectorClock;

    /// Changes in `doc` not covered by `clock`.
    fn changes_since(&self, doc: &Self::Doc, clock: &VectorClock) -> Vec<Self::Change>;

    /// Apply `changes` to `doc`, returning the new snapshot.
    fn apply_changes(&self, doc: &Self::Doc, changes: &[Self::Change]) -> Self::Doc;

    /// A fresh, empty document.
    fn new_doc(&self) -> Self::Doc;

    /// Changes present in `after` but not in `before`.
    fn new_changes(&self, before: &Self::Doc, after: &Self::Doc) -> Vec<Self::Change> {
        self.changes_since(after, &self.clock(before))
    }
}

impl<E: DocumentEngine + ?Sized> DocumentEngine for &E {
    type Doc = E::Doc;
    type Change = E::Change;

    fn clock(&self, doc: &Self::Doc) -> VectorClock {
        (**self).clock(doc)
    }

    fn changes_since(&self, doc: &Self::Doc, clock: &VectorClock) -> Vec<Self::Change> {
        (**self).changes_since(doc, clock)
    }

    fn apply_changes(&self, doc: &Self::Doc, changes: &[Self::Change]) -> Self::Doc {
        (**self).apply_changes(doc, changes)
    }

    fn new_doc(&self) -> Self::Doc {
        (**self).new_doc()
    }

    fn new_changes(&self, before: &Self::Doc, after: &Self::Doc) -> Vec<Self::Change> {
        (**self).new_changes(before, after)
    }
}
