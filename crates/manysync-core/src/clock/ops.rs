//! Vector clock operations: union, dominates, behind, compare.
//!
//! These are the only comparisons the reconciliation protocol makes. All of
//! them are pure; nothing here mutates its inputs.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::VectorClock;

/// Causal relation between two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CausalOrder {
    /// Same sequence for every actor.
    Equal,
    /// The left clock happened strictly before the right one.
    Before,
    /// The left clock happened strictly after the right one.
    After,
    /// Each side has seen something the other has not.
    Concurrent,
}

impl CausalOrder {
    /// Map to a partial ordering (`None` for concurrent clocks).
    #[must_use]
    pub const fn as_partial_ordering(self) -> Option<Ordering> {
        match self {
            Self::Equal => Some(Ordering::Equal),
            Self::Before => Some(Ordering::Less),
            Self::After => Some(Ordering::Greater),
            Self::Concurrent => None,
        }
    }
}

// ===========================================================================
// Lattice operations
// ===========================================================================

impl VectorClock {
    /// Pointwise maximum of two clocks (the lattice join).
    ///
    /// Commutative, associative, and idempotent; the empty clock is the
    /// identity.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut entries: BTreeMap<String, u64> = self.entries.clone();
        for (actor, seq) in &other.entries {
            entries
                .entry(actor.clone())
                .and_modify(|current| *current = (*current).max(*seq))
                .or_insert(*seq);
        }
        Self { entries }
    }

    /// True when `self` has seen everything `other` has: for every actor in
    /// `other`, `self[actor] >= other[actor]`.
    ///
    /// Every clock dominates the empty clock, and dominates itself.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        other
            .entries
            .iter()
            .all(|(actor, seq)| self.get(actor) >= *seq)
    }

    /// True when `self` is missing information that `other` has, i.e. some
    /// actor in `other` is ahead of `self`.
    ///
    /// This is `!self.dominates(other)`: concurrent clocks count as behind.
    #[must_use]
    pub fn behind(&self, other: &Self) -> bool {
        !self.dominates(other)
    }

    /// Full causal comparison of `self` against `other`.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        match (self.dominates(other), other.dominates(self)) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (false, false) => CausalOrder::Concurrent,
        }
    }
}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).as_partial_ordering()
    }
}
