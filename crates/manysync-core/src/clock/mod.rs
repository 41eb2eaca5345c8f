//! Vector clocks: per-actor sequence counters summarising which changes a
//! replica has incorporated.
//!
//! A [`VectorClock`] is an immutable value. Every operation that "updates" a
//! clock returns a new one; the lattice operations live in [`ops`].
//!
//! # Invariants
//!
//! - A missing actor has an implicit sequence of `0`.
//! - Zero entries are never stored, so `{a: 0}` and `{}` are the same clock.
//! - Iteration and [`Display`](std::fmt::Display) are ordered by actor id.

pub mod ops;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use ops::CausalOrder;

/// Actor identifier as it appears on the wire.
pub type ActorId = String;

/// Mapping from actor id to the highest sequence number seen for that actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "BTreeMap<ActorId, u64>", into = "BTreeMap<ActorId, u64>")]
pub struct VectorClock {
    entries: BTreeMap<ActorId, u64>,
}

impl VectorClock {
    /// The empty clock: lattice bottom, "I know nothing".
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number recorded for `actor` (0 if absent).
    #[must_use]
    pub fn get(&self, actor: &str) -> u64 {
        self.entries.get(actor).copied().unwrap_or(0)
    }

    /// Return a copy of this clock with `actor` set to `seq`.
    ///
    /// Setting a sequence of `0` removes the actor.
    #[must_use]
    pub fn with(&self, actor: impl Into<ActorId>, seq: u64) -> Self {
        let mut entries = self.entries.clone();
        let actor = actor.into();
        if seq == 0 {
            entries.remove(&actor);
        } else {
            entries.insert(actor, seq);
        }
        Self { entries }
    }

    /// Return a copy of this clock with `actor` advanced by one.
    #[must_use]
    pub fn increment(&self, actor: &str) -> Self {
        self.with(actor, self.get(actor).saturating_add(1))
    }

    /// Iterate `(actor, seq)` pairs in actor order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(actor, seq)| (actor.as_str(), *seq))
    }

    /// Actors with a non-zero sequence.
    pub fn actors(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of actors with a non-zero sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True for the empty clock.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all sequence numbers. Handy as a rough "amount of history" gauge
    /// in logs and simulation traces.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.entries.values().fold(0_u64, |acc, seq| acc.saturating_add(*seq))
    }
}

impl From<BTreeMap<ActorId, u64>> for VectorClock {
    fn from(mut entries: BTreeMap<ActorId, u64>) -> Self {
        entries.retain(|_, seq| *seq > 0);
        Self { entries }
    }
}

impl From<VectorClock> for BTreeMap<ActorId, u64> {
    fn from(clock: VectorClock) -> Self {
        clock.entries
    }
}

impl<K: Into<ActorId>> FromIterator<(K, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let entries: BTreeMap<ActorId, u64> =
            iter.into_iter().map(|(actor, seq)| (actor.into(), seq)).collect();
        Self::from(entries)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, (actor, seq)) in self.entries.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{actor}:{seq}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|(a, s)| (*a, *s)).collect()
    }

    #[test]
    fn missing_actor_reads_as_zero() {
        let clock = vc(&[("alice", 3)]);
        assert_eq!(clock.get("alice"), 3);
        assert_eq!(clock.get("bob"), 0);
    }

    #[test]
    fn zero_entries_are_normalised_away() {
        assert_eq!(vc(&[("alice", 0)]), VectorClock::new());
        assert!(vc(&[("alice", 0), ("bob", 2)]).actors().eq(["bob"]));
        assert_eq!(vc(&[("alice", 4)]).with("alice", 0), VectorClock::new());
    }

    #[test]
    fn updates_return_new_values() {
        let base = vc(&[("alice", 1)]);
        let bumped = base.increment("alice").increment("bob");
        assert_eq!(base.get("alice"), 1);
        assert_eq!(bumped.get("alice"), 2);
        assert_eq!(bumped.get("bob"), 1);
        assert_eq!(bumped.total(), 3);
    }

    #[test]
    fn display_is_sorted_by_actor() {
        let clock = vc(&[("zed", 1), ("alice", 3)]);
        assert_eq!(clock.to_string(), "{alice:3, zed:1}");
        assert_eq!(VectorClock::new().to_string(), "{}");
    }

    #[test]
    fn serde_is_a_plain_object() {
        let clock = vc(&[("alice", 3), ("bob", 1)]);
        let json = serde_json::to_string(&clock).expect("serialize");
        assert_eq!(json, r#"{"alice":3,"bob":1}"#);

        let parsed: VectorClock = serde_json::from_str(r#"{"bob":1,"carol":0}"#).expect("parse");
        assert_eq!(parsed, vc(&[("bob", 1)]));

        let empty: VectorClock = serde_json::from_str("{}").expect("parse empty");
        assert!(empty.is_empty());
    }

    #[test]
    fn serde_rejects_negative_sequences() {
        assert!(serde_json::from_str::<VectorClock>(r#"{"alice":-1}"#).is_err());
    }
}
