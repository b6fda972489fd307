//! Relations: runtime-registered relation component ids, each paired with a
//! per-object virtual component id and a reverse `object -> subjects` index
//! (§3 "Relation", §4.2 "Relations", §9 "Virtual component ids").
//!
//! Grounded on `rgb-ecs/src/relation.rs`'s `PairId` (relation, target)
//! bit-pack, but the relation itself is a runtime [`ComponentId`] registered
//! through [`crate::component::ComponentRegistry`] rather than a compile-time
//! generic marker type, since peers agree on relations by name over the
//! wire, not by matching Rust types.

use hashbrown::{HashMap, HashSet};

use crate::component::ComponentId;
use crate::component::ComponentRegistry;
use crate::entity::Entity;

/// Tracks virtual component ids minted per `(relation, object)` pair, and a
/// reverse index from object to every subject holding an edge to it.
///
/// A subject carrying relation `R` to object `o` has *both* the base
/// relation component `R` present (possibly carrying a value) and the
/// per-object virtual component `virtual(R, o)` present as a tag -- the
/// latter is what lets a query match "has relation R to this specific
/// object" without scanning every subject of `R` (§4.2).
#[derive(Debug, Default, Clone)]
pub struct RelationRegistry {
    virtual_ids: HashMap<(ComponentId, Entity), ComponentId>,
    virtual_lookup: HashMap<ComponentId, (ComponentId, Entity)>,
    object_to_subjects: HashMap<Entity, HashSet<(Entity, ComponentId)>>,
}

impl RelationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or mint the virtual component id for `(relation, object)`.
    pub fn virtual_id_for(
        &mut self,
        components: &ComponentRegistry,
        relation: ComponentId,
        object: Entity,
    ) -> ComponentId {
        if let Some(&vid) = self.virtual_ids.get(&(relation, object)) {
            return vid;
        }
        let vid = components.next_virtual_id();
        self.virtual_ids.insert((relation, object), vid);
        self.virtual_lookup.insert(vid, (relation, object));
        vid
    }

    /// Resolve a virtual component id back to its `(relation, object)` pair,
    /// if it is one minted by this registry.
    #[must_use]
    pub fn resolve_virtual(&self, virtual_id: ComponentId) -> Option<(ComponentId, Entity)> {
        self.virtual_lookup.get(&virtual_id).copied()
    }

    /// Look up the virtual id already minted for `(relation, object)`
    /// without minting a new one. Used by queries, which must match an
    /// existing edge rather than create one.
    #[must_use]
    pub fn existing_virtual_id(&self, relation: ComponentId, object: Entity) -> Option<ComponentId> {
        self.virtual_ids.get(&(relation, object)).copied()
    }

    /// Record that `subject` now holds relation `relation` to `object`, via
    /// the virtual id already minted by [`Self::virtual_id_for`].
    pub fn link(&mut self, subject: Entity, relation: ComponentId, object: Entity) {
        self.object_to_subjects
            .entry(object)
            .or_default()
            .insert((subject, relation));
    }

    /// Remove the `subject -(relation)-> object` edge from the reverse
    /// index. Does not un-mint the virtual id: the spec makes no promise
    /// that virtual ids are ever reclaimed (§9).
    pub fn unlink(&mut self, subject: Entity, relation: ComponentId, object: Entity) {
        if let Some(subjects) = self.object_to_subjects.get_mut(&object) {
            subjects.remove(&(subject, relation));
            if subjects.is_empty() {
                self.object_to_subjects.remove(&object);
            }
        }
    }

    /// Every `(subject, relation)` pair pointing at `object`. Used when an
    /// object despawns and every relation to it must be torn down (§4.2).
    #[must_use]
    pub fn subjects_of(&self, object: Entity) -> Vec<(Entity, ComponentId)> {
        self.object_to_subjects
            .get(&object)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop every edge where `object` is the target, returning them so the
    /// caller can also remove the corresponding virtual tags from each
    /// subject's component set.
    pub fn remove_object(&mut self, object: Entity) -> Vec<(Entity, ComponentId)> {
        self.object_to_subjects
            .remove(&object)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// Drop every edge where `subject` is the source, returning the
    /// `(relation, object)` pairs so the caller can remove the
    /// corresponding virtual tags. Used when `subject` itself despawns.
    /// O(subjects with edges); acceptable since despawn is already an
    /// O(components) operation.
    pub fn remove_subject(&mut self, subject: Entity) -> Vec<(ComponentId, Entity)> {
        let mut removed = Vec::new();
        self.object_to_subjects.retain(|&object, subjects| {
            subjects.retain(|&(s, relation)| {
                if s == subject {
                    removed.push((relation, object));
                    false
                } else {
                    true
                }
            });
            !subjects.is_empty()
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(n: u32) -> Entity {
        Entity::new(0, n)
    }

    #[test]
    fn virtual_id_is_stable_per_relation_object_pair() {
        let components = ComponentRegistry::new();
        let mut rel = RelationRegistry::new();
        let child_of = ComponentId(1);
        let v1 = rel.virtual_id_for(&components, child_of, e(10));
        let v2 = rel.virtual_id_for(&components, child_of, e(10));
        assert_eq!(v1, v2);
    }

    #[test]
    fn different_objects_get_different_virtual_ids() {
        let components = ComponentRegistry::new();
        let mut rel = RelationRegistry::new();
        let child_of = ComponentId(1);
        let v1 = rel.virtual_id_for(&components, child_of, e(10));
        let v2 = rel.virtual_id_for(&components, child_of, e(11));
        assert_ne!(v1, v2);
    }

    #[test]
    fn resolve_virtual_roundtrips() {
        let components = ComponentRegistry::new();
        let mut rel = RelationRegistry::new();
        let child_of = ComponentId(1);
        let vid = rel.virtual_id_for(&components, child_of, e(10));
        assert_eq!(rel.resolve_virtual(vid), Some((child_of, e(10))));
    }

    #[test]
    fn link_populates_reverse_index() {
        let components = ComponentRegistry::new();
        let mut rel = RelationRegistry::new();
        let child_of = ComponentId(1);
        let _vid = rel.virtual_id_for(&components, child_of, e(10));
        rel.link(e(1), child_of, e(10));
        rel.link(e(2), child_of, e(10));
        let subjects = rel.subjects_of(e(10));
        assert_eq!(subjects.len(), 2);
        assert!(subjects.contains(&(e(1), child_of)));
        assert!(subjects.contains(&(e(2), child_of)));
    }

    #[test]
    fn unlink_removes_single_edge() {
        let components = ComponentRegistry::new();
        let mut rel = RelationRegistry::new();
        let child_of = ComponentId(1);
        let _vid = rel.virtual_id_for(&components, child_of, e(10));
        rel.link(e(1), child_of, e(10));
        rel.link(e(2), child_of, e(10));
        rel.unlink(e(1), child_of, e(10));
        let subjects = rel.subjects_of(e(10));
        assert_eq!(subjects, vec![(e(2), child_of)]);
    }

    #[test]
    fn remove_subject_drains_only_that_subjects_edges() {
        let components = ComponentRegistry::new();
        let mut rel = RelationRegistry::new();
        let child_of = ComponentId(1);
        let _v1 = rel.virtual_id_for(&components, child_of, e(10));
        let _v2 = rel.virtual_id_for(&components, child_of, e(20));
        rel.link(e(1), child_of, e(10));
        rel.link(e(1), child_of, e(20));
        rel.link(e(2), child_of, e(10));

        let removed = rel.remove_subject(e(1));
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&(child_of, e(10))));
        assert!(removed.contains(&(child_of, e(20))));
        assert_eq!(rel.subjects_of(e(10)), vec![(e(2), child_of)]);
        assert!(rel.subjects_of(e(20)).is_empty());
    }

    #[test]
    fn remove_object_drains_all_edges() {
        let components = ComponentRegistry::new();
        let mut rel = RelationRegistry::new();
        let child_of = ComponentId(1);
        let _vid = rel.virtual_id_for(&components, child_of, e(10));
        rel.link(e(1), child_of, e(10));
        let removed = rel.remove_object(e(10));
        assert_eq!(removed, vec![(e(1), child_of)]);
        assert!(rel.subjects_of(e(10)).is_empty());
    }
}
