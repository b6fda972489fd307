//! The canonical component-set type the spec calls "Vec": a sorted,
//! deduplicated list of component ids with an order-independent hash,
//! used to key archetype graph nodes.
//!
//! Grounded on `rgb-ecs/src/archetype.rs`'s `SmallVec<[ComponentId; 8]>`
//! archetype key and `rgb-ecs/src/relation.rs`'s `PairId` bit-packing idiom
//! for the fold-hash.

use smallvec::SmallVec;

use crate::component::ComponentId;

/// A canonical, sorted, deduplicated set of component ids.
///
/// Two `CompSet`s built from the same multiset of ids are `==` and hash
/// identically regardless of insertion order.
#[derive(Clone, Debug, Default, Eq)]
pub struct CompSet {
    ids: SmallVec<[ComponentId; 8]>,
}

impl CompSet {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a canonical set from an arbitrary (possibly unsorted,
    /// possibly duplicated) list of ids.
    #[must_use]
    pub fn new(mut ids: Vec<ComponentId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self {
            ids: SmallVec::from_vec(ids),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ComponentId] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// `self ∪ {id}`. A no-op (clones unchanged) if already present.
    #[must_use]
    pub fn with(&self, id: ComponentId) -> Self {
        match self.ids.binary_search(&id) {
            Ok(_) => self.clone(),
            Err(pos) => {
                let mut ids = self.ids.clone();
                ids.insert(pos, id);
                Self { ids }
            }
        }
    }

    /// `self \ {id}`. A no-op (clones unchanged) if absent.
    #[must_use]
    pub fn without(&self, id: ComponentId) -> Self {
        match self.ids.binary_search(&id) {
            Ok(pos) => {
                let mut ids = self.ids.clone();
                ids.remove(pos);
                Self { ids }
            }
            Err(_) => self.clone(),
        }
    }

    /// Union of two sets.
    #[must_use]
    pub fn sum(a: &Self, b: &Self) -> Self {
        let mut ids: Vec<ComponentId> = a.ids.iter().chain(b.ids.iter()).copied().collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            ids: SmallVec::from_vec(ids),
        }
    }

    /// `a \ b`.
    #[must_use]
    pub fn difference(a: &Self, b: &Self) -> Self {
        let ids: Vec<ComponentId> = a
            .ids
            .iter()
            .copied()
            .filter(|id| !b.contains(*id))
            .collect();
        Self {
            ids: SmallVec::from_vec(ids),
        }
    }

    /// True if `self` contains every id in `other`.
    #[must_use]
    pub fn is_superset_of(&self, other: &Self) -> bool {
        other.ids.iter().all(|id| self.contains(*id))
    }

    /// True if `self` and `other` share no ids.
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.ids.iter().all(|id| !other.contains(*id))
    }

    /// Order-independent 32-bit FNV-like fold hash of the (already sorted)
    /// id list. Sorting before hashing is what makes differently-ordered
    /// inputs collide on purpose; `PartialEq` still does the authoritative
    /// element-wise check on a hash collision.
    #[must_use]
    pub fn fold_hash(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        for id in &self.ids {
            hash ^= u64::from(id.index());
            hash = hash.wrapping_mul(0x0000_0100_0000_01B3); // FNV prime
        }
        hash
    }
}

impl PartialEq for CompSet {
    fn eq(&self, other: &Self) -> bool {
        self.ids == other.ids
    }
}

impl std::hash::Hash for CompSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fold_hash().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> ComponentId {
        ComponentId(n)
    }

    #[test]
    fn order_independent_equality_and_hash() {
        let a = CompSet::new(vec![id(1), id(2), id(3)]);
        let b = CompSet::new(vec![id(3), id(1), id(2)]);
        assert_eq!(a, b);
        assert_eq!(a.fold_hash(), b.fold_hash());
    }

    #[test]
    fn duplicates_are_deduplicated() {
        let a = CompSet::new(vec![id(1), id(1), id(2)]);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn with_and_without() {
        let a = CompSet::new(vec![id(1), id(2)]);
        let b = a.with(id(3));
        assert!(b.contains(id(3)));
        let c = b.without(id(2));
        assert!(!c.contains(id(2)));
        assert_eq!(c, CompSet::new(vec![id(1), id(3)]));
    }

    #[test]
    fn sum_and_difference() {
        let a = CompSet::new(vec![id(1), id(2)]);
        let b = CompSet::new(vec![id(2), id(3)]);
        assert_eq!(CompSet::sum(&a, &b), CompSet::new(vec![id(1), id(2), id(3)]));
        assert_eq!(CompSet::difference(&a, &b), CompSet::new(vec![id(1)]));
    }

    #[test]
    fn superset_and_disjoint() {
        let a = CompSet::new(vec![id(1), id(2), id(3)]);
        let b = CompSet::new(vec![id(1), id(2)]);
        let c = CompSet::new(vec![id(9)]);
        assert!(a.is_superset_of(&b));
        assert!(!b.is_superset_of(&a));
        assert!(a.is_disjoint(&c));
        assert!(!a.is_disjoint(&b));
    }
}
