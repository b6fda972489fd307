//! The local dense index: `entity -> dense_index`, decoupled from archetype
//! membership. Component storage is keyed by `dense_index`, never by the
//! entity's bit pattern directly, and never moves when an entity changes
//! archetype (§9, "Archetype migration without data move").

use hashbrown::HashMap;

use crate::entity::Entity;

/// A stable, reusable integer slot assigned to a live entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DenseIndex(pub u32);

/// Maps entities to dense indices and reclaims freed slots.
#[derive(Debug, Default, Clone)]
pub struct DenseIndexTable {
    entity_to_index: HashMap<Entity, DenseIndex>,
    index_to_entity: Vec<Option<Entity>>,
    free_list: Vec<DenseIndex>,
}

impl DenseIndexTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a fresh (or reclaimed) dense index to `entity`.
    ///
    /// # Panics
    /// Panics in debug builds if `entity` already has a dense index --
    /// that indicates the caller double-spawned the same id, a programmer
    /// error per §7.
    pub fn allocate(&mut self, entity: Entity) -> DenseIndex {
        debug_assert!(
            !self.entity_to_index.contains_key(&entity),
            "entity {entity:?} already has a dense index"
        );
        let index = self.free_list.pop().unwrap_or_else(|| {
            let idx = DenseIndex(self.index_to_entity.len() as u32);
            self.index_to_entity.push(None);
            idx
        });
        self.index_to_entity[index.0 as usize] = Some(entity);
        self.entity_to_index.insert(entity, index);
        index
    }

    /// Reclaim `entity`'s dense index, if any.
    pub fn free(&mut self, entity: Entity) -> Option<DenseIndex> {
        let index = self.entity_to_index.remove(&entity)?;
        self.index_to_entity[index.0 as usize] = None;
        self.free_list.push(index);
        Some(index)
    }

    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<DenseIndex> {
        self.entity_to_index.get(&entity).copied()
    }

    #[must_use]
    pub fn entity_at(&self, index: DenseIndex) -> Option<Entity> {
        self.index_to_entity.get(index.0 as usize).copied().flatten()
    }

    /// Re-point `old`'s dense index so it is looked up by `new` instead,
    /// without allocating a new slot or touching component data. Used when
    /// rebinding a predicted entity onto its authoritative id (§4.6).
    ///
    /// # Panics
    /// Panics in debug builds if `old` has no dense index -- the caller
    /// must check liveness first.
    pub fn rebind(&mut self, old: Entity, new: Entity) -> DenseIndex {
        let index = self
            .entity_to_index
            .remove(&old)
            .expect("rebind target must have a dense index");
        self.index_to_entity[index.0 as usize] = Some(new);
        self.entity_to_index.insert(new, index);
        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entity_to_index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_to_index.is_empty()
    }
}
