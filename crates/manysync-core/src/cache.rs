//! Per-peer record storage with optional bounded capacity.
//!
//! Hubs and connections keep one record per remote peer. With no capacity
//! configured the cache grows without limit; with a capacity, registering a
//! new peer when full evicts another one according to [`EvictionPolicy`].
//! An evicted peer is simply forgotten: if it speaks again it is treated as
//! new, which the protocol tolerates because every message carries a full
//! clock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::message::PeerId;

/// Which peer to drop when a bounded cache is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Drop the peer whose last receipt is oldest.
    #[default]
    LeastRecentlyActive,
    /// Drop the peer that was registered first.
    OldestRegistered,
}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    registered: u64,
    last_active: u64,
}

/// Records keyed by peer id.
#[derive(Debug, Clone)]
pub struct PeerCache<V> {
    slots: BTreeMap<PeerId, Slot<V>>,
    capacity: Option<usize>,
    policy: EvictionPolicy,
    tick: u64,
}

impl<V> Default for PeerCache<V> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<V> PeerCache<V> {
    /// A cache that never evicts.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            slots: BTreeMap::new(),
            capacity: None,
            policy: EvictionPolicy::LeastRecentlyActive,
            tick: 0,
        }
    }

    /// A cache holding at most `capacity` peers (`None` for unbounded).
    #[must_use]
    pub const fn new(capacity: Option<usize>, policy: EvictionPolicy) -> Self {
        Self {
            slots: BTreeMap::new(),
            capacity,
            policy,
            tick: 0,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    #[must_use]
    pub const fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn contains(&self, peer_id: &str) -> bool {
        self.slots.contains_key(peer_id)
    }

    #[must_use]
    pub fn get(&self, peer_id: &str) -> Option<&V> {
        self.slots.get(peer_id).map(|slot| &slot.value)
    }

    /// Mutable access without counting as activity.
    pub fn get_mut(&mut self, peer_id: &str) -> Option<&mut V> {
        self.slots.get_mut(peer_id).map(|slot| &mut slot.value)
    }

    /// Fetch the record for `peer_id`, creating it with `init` if absent, and
    /// mark the peer active.
    ///
    /// Returns the record and the id of any peer evicted to make room.
    pub fn upsert(&mut self, peer_id: &str, init: impl FnOnce() -> V) -> (&mut V, Option<PeerId>) {
        let tick = self.next_tick();
        let evicted = if self.slots.contains_key(peer_id) {
            None
        } else {
            self.make_room()
        };

        let slot = self.slots.entry(peer_id.to_owned()).or_insert_with(|| Slot {
            value: init(),
            registered: tick,
            last_active: tick,
        });
        slot.last_active = tick;
        (&mut slot.value, evicted)
    }

    /// Set the record for `peer_id`, replacing any existing value.
    ///
    /// Returns the id of any peer evicted to make room.
    pub fn insert(&mut self, peer_id: &str, value: V) -> Option<PeerId> {
        let tick = self.next_tick();
        if let Some(slot) = self.slots.get_mut(peer_id) {
            slot.value = value;
            slot.last_active = tick;
            return None;
        }

        let evicted = self.make_room();
        self.slots.insert(
            peer_id.to_owned(),
            Slot {
                value,
                registered: tick,
                last_active: tick,
            },
        );
        evicted
    }

    /// Forget `peer_id`, returning its record.
    pub fn remove(&mut self, peer_id: &str) -> Option<V> {
        self.slots.remove(peer_id).map(|slot| slot.value)
    }

    /// Iterate `(peer_id, record)` in peer id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.slots
            .iter()
            .map(|(peer_id, slot)| (peer_id.as_str(), &slot.value))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.slots.values_mut().map(|slot| &mut slot.value)
    }

    /// Tracked peer ids in order.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.slots.keys().cloned().collect()
    }

    const fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    fn make_room(&mut self) -> Option<PeerId> {
        let capacity = self.capacity?;
        if self.slots.len() < capacity {
            return None;
        }

        let victim = match self.policy {
            EvictionPolicy::LeastRecentlyActive => self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_active)
                .map(|(peer_id, _)| peer_id.clone()),
            EvictionPolicy::OldestRegistered => self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.registered)
                .map(|(peer_id, _)| peer_id.clone()),
        }?;

        self.slots.remove(&victim);
        debug!(peer = %victim, policy = ?self.policy, capacity, "evicted peer record");
        Some(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_cache_never_evicts() {
        let mut cache = PeerCache::unbounded();
        for idx in 0..100 {
            let (_, evicted) = cache.upsert(&format!("peer-{idx}"), || idx);
            assert!(evicted.is_none());
        }
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn upsert_creates_once_then_returns_existing() {
        let mut cache = PeerCache::unbounded();
        *cache.upsert("alice", || 1).0 += 10;
        let (value, _) = cache.upsert("alice", || 99);
        assert_eq!(*value, 11);
    }

    #[test]
    fn least_recently_active_is_evicted_first() {
        let mut cache = PeerCache::new(Some(2), EvictionPolicy::LeastRecentlyActive);
        cache.upsert("alice", || 1);
        cache.upsert("bob", || 2);
        cache.upsert("alice", || 0);

        let (_, evicted) = cache.upsert("carol", || 3);
        assert_eq!(evicted.as_deref(), Some("bob"));
        assert!(cache.contains("alice"));
        assert!(cache.contains("carol"));
    }

    #[test]
    fn oldest_registered_ignores_activity() {
        let mut cache = PeerCache::new(Some(2), EvictionPolicy::OldestRegistered);
        cache.upsert("alice", || 1);
        cache.upsert("bob", || 2);
        cache.upsert("alice", || 0);

        let evicted = cache.insert("carol", 3);
        assert_eq!(evicted.as_deref(), Some("alice"));
        assert_eq!(cache.peer_ids(), vec!["bob".to_owned(), "carol".to_owned()]);
    }

    #[test]
    fn insert_replaces_existing_values() {
        let mut cache = PeerCache::unbounded();
        cache.insert("alice", 1);
        assert!(cache.insert("alice", 2).is_none());
        assert_eq!(cache.get("alice"), Some(&2));
        assert_eq!(cache.remove("alice"), Some(2));
        assert!(cache.is_empty());
    }
}
