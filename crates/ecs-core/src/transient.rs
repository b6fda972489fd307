//! The transient registry: `causal_key -> {entity, tick}` pairing a
//! client-side prediction with its authoritative counterpart (§3 "Transient
//! registry", §4.6 "Rebinding details", §4.10 "Ghost cleanup").
//!
//! New relative to the teacher -- `rgb-ecs` has no notion of a predicted
//! entity -- grounded instead directly on §3/§4.10's description, keyed the
//! same way [`crate::world::causal_key`] derives its fingerprint.

use hashbrown::HashMap;

use crate::entity::Entity;

/// One prediction: the entity it currently resolves to (the transient id
/// until rebound, the authoritative id after) and the tick it was recorded
/// at, used by ghost cleanup to age out predictions the server never
/// confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientEntry {
    pub entity: Entity,
    pub tick: u64,
}

/// Tracks every outstanding causal key, for both predicted spawns in the
/// transient domain and command entities in the command domain (§9 "Command
/// entities") -- both are ephemeral, keyed entities a peer must be able to
/// retire safely under id reuse, so they share one bookkeeping structure.
#[derive(Debug, Default)]
pub struct TransientRegistry {
    entries: HashMap<u64, TransientEntry>,
}

impl TransientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, causal_key: u64, entity: Entity, tick: u64) {
        self.entries.insert(causal_key, TransientEntry { entity, tick });
    }

    #[must_use]
    pub fn get(&self, causal_key: u64) -> Option<TransientEntry> {
        self.entries.get(&causal_key).copied()
    }

    /// Point `causal_key`'s entry at `new_entity` in place, so re-simulation
    /// (which only ever knows the causal key) still finds the rebound
    /// entity (§4.6 "The transient_registry itself is updated in place").
    pub fn rebind(&mut self, causal_key: u64, new_entity: Entity) {
        if let Some(entry) = self.entries.get_mut(&causal_key) {
            entry.entity = new_entity;
        }
    }

    /// Purge every entry pointing at `entity`, regardless of causal key.
    /// Called whenever `entity` is despawned so a later local id reuse can
    /// never be matched by a stale entry (§8 "Command boundary", S6).
    pub fn remove_entity(&mut self, entity: Entity) {
        self.entries.retain(|_, e| e.entity != entity);
    }

    /// Remove and return every entry recorded strictly before `cutoff`, for
    /// ghost cleanup to act on (§4.10).
    pub fn drain_older_than(&mut self, cutoff: u64) -> Vec<(u64, TransientEntry)> {
        let stale: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.tick < cutoff)
            .map(|(&key, _)| key)
            .collect();
        stale
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|e| (key, e)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(local: u32) -> Entity {
        Entity::new(0, local)
    }

    #[test]
    fn rebind_updates_entity_in_place() {
        let mut reg = TransientRegistry::new();
        reg.insert(42, e(1), 10);
        reg.rebind(42, e(500));
        assert_eq!(reg.get(42).unwrap().entity, e(500));
    }

    #[test]
    fn remove_entity_purges_regardless_of_key() {
        let mut reg = TransientRegistry::new();
        reg.insert(1, e(9), 0);
        reg.insert(2, e(9), 0);
        reg.insert(3, e(10), 0);
        reg.remove_entity(e(9));
        assert!(reg.get(1).is_none());
        assert!(reg.get(2).is_none());
        assert!(reg.get(3).is_some());
    }

    #[test]
    fn drain_older_than_only_takes_stale_entries() {
        let mut reg = TransientRegistry::new();
        reg.insert(1, e(1), 5);
        reg.insert(2, e(2), 50);
        let drained = reg.drain_older_than(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, 1);
        assert!(reg.get(1).is_none());
        assert!(reg.get(2).is_some());
    }
}
