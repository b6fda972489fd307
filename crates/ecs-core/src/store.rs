//! Per-component dense storage keyed by [`DenseIndex`], with a parallel
//! composite-version array for LWW (§3 "Component store", "Composite
//! version"). Grounded on `rgb-ecs/src/storage.rs`'s `Column` (dense
//! push/swap_remove array) but keyed globally by dense index per component id
//! rather than owned per-archetype, and holding `Box<dyn ComponentValue>`
//! instead of raw bytes -- components must downcast uniformly regardless of
//! which peer's binary produced them.

use hashbrown::HashMap;

use crate::component::{ComponentId, ComponentValue};
use crate::dense::DenseIndex;

/// The modulus a tick is multiplied by when folding `(tick, domain_id)` into
/// one composite version (§3). Must exceed the largest legal domain id
/// (2047) so two different domains at the same tick never collide.
const DOMAIN_SPAN: u64 = 2048;

/// `version = tick * 2048 + origin_domain_id` (§3 "Composite version").
#[must_use]
pub const fn make_version(tick: u64, origin_domain_id: u16) -> u64 {
    tick * DOMAIN_SPAN + origin_domain_id as u64
}

#[must_use]
pub const fn version_tick(version: u64) -> u64 {
    version / DOMAIN_SPAN
}

#[must_use]
pub const fn version_domain(version: u64) -> u16 {
    (version % DOMAIN_SPAN) as u16
}

/// One component's dense array of values plus parallel per-cell versions.
/// A missing cell is `None` in both arrays -- §3's "Missing cells are
/// represented by undefined/absent".
#[derive(Debug, Default)]
pub struct Column {
    values: Vec<Option<Box<dyn ComponentValue>>>,
    versions: Vec<Option<u64>>,
}

impl Column {
    fn ensure_len(&mut self, slot: usize) {
        if slot >= self.values.len() {
            self.values.resize_with(slot + 1, || None);
            self.versions.resize_with(slot + 1, || None);
        }
    }

    #[must_use]
    pub fn get(&self, index: DenseIndex) -> Option<&dyn ComponentValue> {
        self.values.get(index.0 as usize)?.as_deref()
    }

    pub fn get_mut(&mut self, index: DenseIndex) -> Option<&mut (dyn ComponentValue + 'static)> {
        self.values.get_mut(index.0 as usize)?.as_deref_mut()
    }

    #[must_use]
    pub fn version(&self, index: DenseIndex) -> Option<u64> {
        self.versions.get(index.0 as usize).copied().flatten()
    }

    #[must_use]
    pub fn contains(&self, index: DenseIndex) -> bool {
        self.values
            .get(index.0 as usize)
            .is_some_and(Option::is_some)
    }

    /// Unconditional write, used by `Add`, spawn-time installs, and
    /// `force_set_component_value`. Per §3's version invariant this is the
    /// one path allowed to make `version` go backwards.
    pub fn force_set(&mut self, index: DenseIndex, value: Box<dyn ComponentValue>, version: u64) {
        self.ensure_len(index.0 as usize);
        let slot = index.0 as usize;
        self.values[slot] = Some(value);
        self.versions[slot] = Some(version);
    }

    /// LWW write: only applies if `version >= stored_version` (or the cell
    /// was empty). Returns whether the write was applied.
    pub fn set_versioned(
        &mut self,
        index: DenseIndex,
        value: Box<dyn ComponentValue>,
        version: u64,
    ) -> bool {
        self.ensure_len(index.0 as usize);
        let slot = index.0 as usize;
        let apply = self.versions[slot].is_none_or(|existing| version >= existing);
        if apply {
            self.values[slot] = Some(value);
            self.versions[slot] = Some(version);
        }
        apply
    }

    /// Remove a cell, returning its prior value (used to build undo entries).
    pub fn remove(&mut self, index: DenseIndex) -> Option<Box<dyn ComponentValue>> {
        let slot = index.0 as usize;
        if slot >= self.values.len() {
            return None;
        }
        self.versions[slot] = None;
        self.values[slot].take()
    }

    /// A deep clone of every occupied cell, for history checkpoints (§4.9) --
    /// `Box<dyn ComponentValue>::clone` goes through `clone_boxed`, i.e. a
    /// real value clone rather than a shared reference.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            versions: self.versions.clone(),
        }
    }
}

impl Clone for Column {
    fn clone(&self) -> Self {
        self.deep_clone()
    }
}

/// All component columns for one [`crate::World`], keyed by [`ComponentId`].
/// Tag components never get an entry here -- presence is tracked solely by
/// the entity's [`crate::vecset::CompSet`] in its graph node.
#[derive(Debug, Default)]
pub struct ComponentStore {
    columns: HashMap<ComponentId, Column>,
}

impl ComponentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column_mut(&mut self, id: ComponentId) -> &mut Column {
        self.columns.entry(id).or_default()
    }

    #[must_use]
    pub fn column(&self, id: ComponentId) -> Option<&Column> {
        self.columns.get(&id)
    }

    #[must_use]
    pub fn get(&self, id: ComponentId, index: DenseIndex) -> Option<&dyn ComponentValue> {
        self.column(id)?.get(index)
    }

    #[must_use]
    pub fn version(&self, id: ComponentId, index: DenseIndex) -> Option<u64> {
        self.column(id)?.version(index)
    }

    #[must_use]
    pub fn contains(&self, id: ComponentId, index: DenseIndex) -> bool {
        self.column(id).is_some_and(|c| c.contains(index))
    }

    pub fn force_set(
        &mut self,
        id: ComponentId,
        index: DenseIndex,
        value: Box<dyn ComponentValue>,
        version: u64,
    ) {
        self.column_mut(id).force_set(index, value, version);
    }

    pub fn set_versioned(
        &mut self,
        id: ComponentId,
        index: DenseIndex,
        value: Box<dyn ComponentValue>,
        version: u64,
    ) -> bool {
        self.column_mut(id).set_versioned(index, value, version)
    }

    pub fn remove(&mut self, id: ComponentId, index: DenseIndex) -> Option<Box<dyn ComponentValue>> {
        self.columns.get_mut(&id)?.remove(index)
    }

    pub fn iter_columns(&self) -> impl Iterator<Item = (ComponentId, &Column)> {
        self.columns.iter().map(|(&id, col)| (id, col))
    }

    /// Deep-clone every column, for a history checkpoint (§4.9).
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|(&id, col)| (id, col.deep_clone()))
                .collect(),
        }
    }

    /// Replace this store's contents with a previously deep-cloned snapshot
    /// (used by rollback to restore a checkpoint).
    pub fn restore_from(&mut self, snapshot: &Self) {
        self.columns = snapshot
            .columns
            .iter()
            .map(|(&id, col)| (id, col.deep_clone()))
            .collect();
    }
}

impl Clone for ComponentStore {
    fn clone(&self) -> Self {
        self.deep_clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    fn idx(n: u32) -> DenseIndex {
        DenseIndex(n)
    }

    fn cid(n: u32) -> ComponentId {
        ComponentId(n)
    }

    #[test]
    fn version_roundtrip() {
        let v = make_version(10, 5);
        assert_eq!(version_tick(v), 10);
        assert_eq!(version_domain(v), 5);
    }

    #[test]
    fn version_tick_dominates_domain() {
        // make_version(t, 2047) < make_version(t+1, 0) -- tick dominates (§8).
        assert!(make_version(5, 2047) < make_version(6, 0));
    }

    #[test]
    fn force_set_then_get() {
        let mut store = ComponentStore::new();
        store.force_set(cid(1), idx(0), Box::new(Position { x: 1.0, y: 2.0 }), 10);
        let v = store.get(cid(1), idx(0)).unwrap();
        assert_eq!(v.as_any().downcast_ref::<Position>().unwrap().x, 1.0);
        assert_eq!(store.version(cid(1), idx(0)), Some(10));
    }

    #[test]
    fn set_versioned_rejects_older_write() {
        let mut store = ComponentStore::new();
        assert!(store.set_versioned(cid(1), idx(0), Box::new(Position { x: 20.0, y: 20.0 }), 20));
        assert!(!store.set_versioned(cid(1), idx(0), Box::new(Position { x: 10.0, y: 10.0 }), 10));
        let v = store.get(cid(1), idx(0)).unwrap();
        assert_eq!(v.as_any().downcast_ref::<Position>().unwrap().x, 20.0);
    }

    #[test]
    fn set_versioned_accepts_equal_version() {
        let mut store = ComponentStore::new();
        assert!(store.set_versioned(cid(1), idx(0), Box::new(Position { x: 1.0, y: 1.0 }), 5));
        assert!(store.set_versioned(cid(1), idx(0), Box::new(Position { x: 2.0, y: 2.0 }), 5));
    }

    #[test]
    fn remove_clears_cell() {
        let mut store = ComponentStore::new();
        store.force_set(cid(1), idx(0), Box::new(Position { x: 1.0, y: 1.0 }), 1);
        assert!(store.contains(cid(1), idx(0)));
        store.remove(cid(1), idx(0));
        assert!(!store.contains(cid(1), idx(0)));
        assert_eq!(store.version(cid(1), idx(0)), None);
    }

    #[test]
    fn deep_clone_is_independent() {
        let mut store = ComponentStore::new();
        store.force_set(cid(1), idx(0), Box::new(Position { x: 1.0, y: 1.0 }), 1);
        let snapshot = store.deep_clone();
        store.force_set(cid(1), idx(0), Box::new(Position { x: 9.0, y: 9.0 }), 2);
        let snap_val = snapshot.get(cid(1), idx(0)).unwrap();
        assert_eq!(snap_val.as_any().downcast_ref::<Position>().unwrap().x, 1.0);
    }

    #[test]
    fn restore_from_resets_to_snapshot() {
        let mut store = ComponentStore::new();
        store.force_set(cid(1), idx(0), Box::new(Position { x: 1.0, y: 1.0 }), 1);
        let snapshot = store.deep_clone();
        store.force_set(cid(1), idx(0), Box::new(Position { x: 9.0, y: 9.0 }), 2);
        store.restore_from(&snapshot);
        let v = store.get(cid(1), idx(0)).unwrap();
        assert_eq!(v.as_any().downcast_ref::<Position>().unwrap().x, 1.0);
    }
}
