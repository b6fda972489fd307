//! The entity graph: archetype nodes keyed by canonical component-set hash,
//! linked by add/remove edges, with listener subscriptions driving reactive
//! queries (§3 "Entity Graph Node", §4.3).
//!
//! Grounded on `rgb-ecs/src/archetype.rs`'s `ArchetypeStorage`
//! (`archetype_map`-by-key, add/remove-edge linking) but turned into a thin
//! sparse-set graph that does not own component data -- component values
//! live in [`crate::store::ComponentStore`], keyed by dense index, so a node
//! change never moves a byte of component data (§9 "Archetype migration
//! without data move").

use hashbrown::{HashMap, HashSet};

use crate::component::ComponentId;
use crate::entity::Entity;
use crate::vecset::CompSet;

/// Identifies one node (archetype) in the entity graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The node for the empty component set. Always present.
    pub const ROOT: Self = Self(0);
}

/// Whether a node is torn down once its last entity leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStrategy {
    /// Deleted by [`EntityGraph::prune_when_empty`] once `entities` is empty.
    #[default]
    WhenEmpty,
    /// Kept alive even when empty, because a reactive query anchors on it.
    Persistent,
}

/// Identifies a listener (typically a reactive query term) registered with
/// the graph. Opaque outside this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u32);

/// An archetype node: the set of live entities sharing exactly one
/// [`CompSet`], plus edges to neighboring archetypes one component away.
#[derive(Debug, Clone)]
pub struct GraphNode {
    id: NodeId,
    vec: CompSet,
    entities: Vec<Entity>,
    entity_row: HashMap<Entity, usize>,
    add_edges: HashMap<ComponentId, NodeId>,
    remove_edges: HashMap<ComponentId, NodeId>,
    listeners: HashSet<ListenerId>,
    strategy: NodeStrategy,
}

impl GraphNode {
    fn new(id: NodeId, vec: CompSet) -> Self {
        Self {
            id,
            vec,
            entities: Vec::new(),
            entity_row: HashMap::new(),
            add_edges: HashMap::new(),
            remove_edges: HashMap::new(),
            listeners: HashSet::new(),
            strategy: NodeStrategy::WhenEmpty,
        }
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub const fn vec(&self) -> &CompSet {
        &self.vec
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn contains_entity(&self, entity: Entity) -> bool {
        self.entity_row.contains_key(&entity)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub const fn strategy(&self) -> NodeStrategy {
        self.strategy
    }

    pub fn listeners(&self) -> impl Iterator<Item = ListenerId> + '_ {
        self.listeners.iter().copied()
    }

    fn insert(&mut self, entity: Entity) {
        let row = self.entities.len();
        self.entities.push(entity);
        self.entity_row.insert(entity, row);
    }

    fn remove(&mut self, entity: Entity) {
        let Some(row) = self.entity_row.remove(&entity) else {
            return;
        };
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        if row < last {
            let moved = self.entities[row];
            self.entity_row.insert(moved, row);
        }
    }
}

/// A single entity's archetype move, as seen within one tick, before
/// [`EntityGraph::flush_graph_changes`] coalesces it into a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphChange {
    Spawned { to: NodeId },
    Despawned { from: NodeId },
    Moved { from: NodeId, to: NodeId },
}

/// The coalesced result of one [`EntityGraph::flush_graph_changes`] call:
/// every per-entity move in the tick, grouped by `(from, to)` so listeners
/// see a *set* once per flush rather than once per entity (§4.3 "Batching").
#[derive(Debug, Default, Clone)]
pub struct GraphFlush {
    /// `(from, to)` batches, including spawns (`from = None`) and despawns
    /// (`to = None`).
    pub batches: Vec<GraphMoveBatch>,
}

#[derive(Debug, Clone)]
pub struct GraphMoveBatch {
    pub from: Option<NodeId>,
    pub to: Option<NodeId>,
    pub entities: Vec<Entity>,
}

#[derive(Clone)]
struct ListenerSpec {
    required: CompSet,
    excluded: Vec<CompSet>,
}

/// Archetype nodes keyed by canonical hash plus an entity→node index
/// (§4.3).
#[derive(Debug, Clone)]
pub struct EntityGraph {
    nodes: Vec<GraphNode>,
    by_hash: HashMap<u64, Vec<NodeId>>,
    by_entity: HashMap<Entity, NodeId>,
    listener_specs: HashMap<ListenerId, ListenerSpec>,
    next_listener: u32,
}

impl Default for EntityGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityGraph {
    #[must_use]
    pub fn new() -> Self {
        let root = GraphNode::new(NodeId::ROOT, CompSet::empty());
        let mut by_hash = HashMap::new();
        by_hash.insert(CompSet::empty().fold_hash(), vec![NodeId::ROOT]);
        Self {
            nodes: vec![root],
            by_hash,
            by_entity: HashMap::new(),
            listener_specs: HashMap::new(),
            next_listener: 0,
        }
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0 as usize)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id.0 as usize)
    }

    #[must_use]
    pub fn node_of(&self, entity: Entity) -> Option<NodeId> {
        self.by_entity.get(&entity).copied()
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    /// Look up the node for exactly `vec`, allocating one on miss and
    /// linking it to neighbors one component away (§4.3
    /// `find_or_create_node`).
    pub fn find_or_create_node(&mut self, vec: &CompSet) -> NodeId {
        let hash = vec.fold_hash();
        if let Some(candidates) = self.by_hash.get(&hash) {
            for &candidate in candidates {
                if self.nodes[candidate.0 as usize].vec() == vec {
                    return candidate;
                }
            }
        }

        let id = NodeId(self.nodes.len() as u32);
        let node = GraphNode::new(id, vec.clone());
        self.nodes.push(node);
        self.by_hash.entry(hash).or_default().push(id);

        self.link_edges(id);
        self.register_node_with_listeners(id);

        id
    }

    /// Wire `add_edges`/`remove_edges` between `new_id` and any existing
    /// node whose `vec` differs by exactly one component.
    fn link_edges(&mut self, new_id: NodeId) {
        let new_vec = self.nodes[new_id.0 as usize].vec().clone();
        for other_id in 0..self.nodes.len() as u32 {
            let other_id = NodeId(other_id);
            if other_id == new_id {
                continue;
            }
            let other_vec = self.nodes[other_id.0 as usize].vec().clone();
            if other_vec.len() + 1 == new_vec.len() {
                // other -> new is an add of the single extra component.
                let extra: Vec<_> = new_vec
                    .as_slice()
                    .iter()
                    .copied()
                    .filter(|c| !other_vec.contains(*c))
                    .collect();
                if extra.len() == 1 {
                    self.nodes[other_id.0 as usize]
                        .add_edges
                        .insert(extra[0], new_id);
                    self.nodes[new_id.0 as usize]
                        .remove_edges
                        .insert(extra[0], other_id);
                }
            } else if new_vec.len() + 1 == other_vec.len() {
                let extra: Vec<_> = other_vec
                    .as_slice()
                    .iter()
                    .copied()
                    .filter(|c| !new_vec.contains(*c))
                    .collect();
                if extra.len() == 1 {
                    self.nodes[new_id.0 as usize]
                        .add_edges
                        .insert(extra[0], other_id);
                    self.nodes[other_id.0 as usize]
                        .remove_edges
                        .insert(extra[0], new_id);
                }
            }
        }
    }

    fn register_node_with_listeners(&mut self, id: NodeId) {
        let vec = self.nodes[id.0 as usize].vec().clone();
        let matches: Vec<ListenerId> = self
            .listener_specs
            .iter()
            .filter(|(_, spec)| {
                vec.is_superset_of(&spec.required)
                    && spec.excluded.iter().all(|ex| vec.is_disjoint(ex))
            })
            .map(|(&lid, _)| lid)
            .collect();
        if matches.is_empty() {
            return;
        }
        for lid in matches {
            self.nodes[id.0 as usize].listeners.insert(lid);
        }
        // A node created after its matching listener already exists must be
        // promoted the same way `subscribe` promotes a pre-existing match --
        // otherwise it would get pruned the first time it empties despite
        // carrying a live reactive-query listener (§4.3 `prune_when_empty`).
        self.nodes[id.0 as usize].strategy = NodeStrategy::Persistent;
    }

    /// Find a node by id-add edge, or compute it lazily via `find_or_create`.
    #[must_use]
    pub fn add_edge(&self, from: NodeId, comp: ComponentId) -> Option<NodeId> {
        self.node(from)?.add_edges.get(&comp).copied()
    }

    #[must_use]
    pub fn remove_edge(&self, from: NodeId, comp: ComponentId) -> Option<NodeId> {
        self.node(from)?.remove_edges.get(&comp).copied()
    }

    /// Subscribe a listener, returning its id. New nodes created after this
    /// call are checked against `required`/`excluded` as they're created;
    /// existing matching nodes are returned so the caller can seed its live
    /// node set.
    pub fn subscribe(&mut self, required: CompSet, excluded: Vec<CompSet>) -> (ListenerId, Vec<NodeId>) {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        let matches: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.vec().is_superset_of(&required) && excluded.iter().all(|ex| n.vec().is_disjoint(ex)))
            .map(GraphNode::id)
            .collect();
        for &node_id in &matches {
            self.nodes[node_id.0 as usize].listeners.insert(id);
            self.nodes[node_id.0 as usize].strategy = NodeStrategy::Persistent;
        }
        self.listener_specs.insert(id, ListenerSpec { required, excluded });
        (id, matches)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.listener_specs.remove(&id);
        for node in &mut self.nodes {
            node.listeners.remove(&id);
        }
    }

    /// Place a brand-new entity directly into `node` (spawn path; there is
    /// no "old node" to remove it from).
    pub fn insert_new_entity(&mut self, entity: Entity, node: NodeId) {
        self.node_mut(node)
            .expect("node must exist")
            .insert(entity);
        self.by_entity.insert(entity, node);
    }

    /// Move `entity` to `new_node`, removing it from its previous node
    /// (§4.3 `set_entity_node`).
    pub fn set_entity_node(&mut self, entity: Entity, new_node: NodeId) {
        if let Some(&old) = self.by_entity.get(&entity) {
            if old == new_node {
                return;
            }
            self.node_mut(old).expect("node must exist").remove(entity);
        }
        self.node_mut(new_node)
            .expect("node must exist")
            .insert(entity);
        self.by_entity.insert(entity, new_node);
    }

    /// Re-point an entity's graph membership from `old` to `new` without
    /// changing which node it belongs to -- used when rebinding a predicted
    /// entity onto its authoritative id (§4.6).
    ///
    /// # Panics
    /// Panics if `old` has no node (the caller must check liveness first).
    pub fn rebind_entity(&mut self, old: Entity, new: Entity) {
        let node_id = self.by_entity.remove(&old).expect("rebind target must be in the graph");
        let node = self.node_mut(node_id).expect("node must exist");
        let row = node.entity_row.remove(&old).expect("entity missing from its own node");
        node.entities[row] = new;
        node.entity_row.insert(new, row);
        self.by_entity.insert(new, node_id);
    }

    /// Remove `entity` entirely (despawn path).
    pub fn remove_entity(&mut self, entity: Entity) -> Option<NodeId> {
        let node = self.by_entity.remove(&entity)?;
        self.node_mut(node).expect("node must exist").remove(entity);
        Some(node)
    }

    /// Delete empty, non-`Persistent` nodes (§4.3 `prune_when_empty`).
    /// The root node is never pruned.
    pub fn prune_when_empty(&mut self, candidates: impl IntoIterator<Item = NodeId>) {
        for id in candidates {
            if id == NodeId::ROOT {
                continue;
            }
            let Some(node) = self.node(id) else { continue };
            if node.is_empty() && node.strategy() == NodeStrategy::WhenEmpty {
                self.remove_node(id);
            }
        }
    }

    fn remove_node(&mut self, id: NodeId) {
        let hash = self.nodes[id.0 as usize].vec().fold_hash();
        if let Some(bucket) = self.by_hash.get_mut(&hash) {
            bucket.retain(|&n| n != id);
        }
        for node in &mut self.nodes {
            node.add_edges.retain(|_, &mut target| target != id);
            node.remove_edges.retain(|_, &mut target| target != id);
        }
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Accumulates per-entity [`GraphChange`]s during a tick and coalesces them
/// into a [`GraphFlush`] at flush time. Kept separate from [`EntityGraph`]
/// because the pending map is reset every flush while the graph persists.
#[derive(Debug, Default)]
pub struct GraphChangeLog {
    changes: HashMap<Entity, GraphChange>,
}

impl GraphChangeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_spawn(&mut self, entity: Entity, to: NodeId) {
        self.changes.insert(entity, GraphChange::Spawned { to });
    }

    pub fn record_despawn(&mut self, entity: Entity, from: NodeId) {
        match self.changes.remove(&entity) {
            Some(GraphChange::Spawned { .. }) | None => {
                self.changes.insert(entity, GraphChange::Despawned { from });
            }
            Some(GraphChange::Moved { from: orig, .. }) => {
                self.changes
                    .insert(entity, GraphChange::Despawned { from: orig });
            }
            Some(existing @ GraphChange::Despawned { .. }) => {
                self.changes.insert(entity, existing);
            }
        }
    }

    pub fn record_move(&mut self, entity: Entity, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        match self.changes.remove(&entity) {
            Some(GraphChange::Spawned { .. }) => {
                self.changes.insert(entity, GraphChange::Spawned { to });
            }
            Some(GraphChange::Moved { from: orig, .. }) => {
                if orig == to {
                    // Net no-op: moved back to where it started this tick.
                } else {
                    self.changes
                        .insert(entity, GraphChange::Moved { from: orig, to });
                }
            }
            Some(GraphChange::Despawned { .. }) | None => {
                self.changes.insert(entity, GraphChange::Moved { from, to });
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Drain all pending changes into a [`GraphFlush`], grouped by
    /// `(from, to)` (§4.3 "Batching").
    pub fn flush(&mut self) -> GraphFlush {
        let mut groups: HashMap<(Option<NodeId>, Option<NodeId>), Vec<Entity>> = HashMap::new();
        for (entity, change) in self.changes.drain() {
            let key = match change {
                GraphChange::Spawned { to } => (None, Some(to)),
                GraphChange::Despawned { from } => (Some(from), None),
                GraphChange::Moved { from, to } => (Some(from), Some(to)),
            };
            groups.entry(key).or_default().push(entity);
        }
        GraphFlush {
            batches: groups
                .into_iter()
                .map(|((from, to), entities)| GraphMoveBatch { from, to, entities })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(n: u32) -> ComponentId {
        ComponentId(n)
    }

    fn e(n: u32) -> Entity {
        Entity::new(0, n)
    }

    #[test]
    fn root_node_exists_and_is_empty() {
        let graph = EntityGraph::new();
        assert_eq!(graph.node_count(), 1);
        assert!(graph.node(NodeId::ROOT).unwrap().is_empty());
    }

    #[test]
    fn find_or_create_deduplicates_by_vec() {
        let mut graph = EntityGraph::new();
        let vec_a = CompSet::new(vec![cid(1), cid(2)]);
        let vec_b = CompSet::new(vec![cid(2), cid(1)]);
        let a = graph.find_or_create_node(&vec_a);
        let b = graph.find_or_create_node(&vec_b);
        assert_eq!(a, b, "same component multiset must dedupe to one node");
    }

    #[test]
    fn edges_link_single_component_neighbors() {
        let mut graph = EntityGraph::new();
        let base = graph.find_or_create_node(&CompSet::new(vec![cid(1)]));
        let extended = graph.find_or_create_node(&CompSet::new(vec![cid(1), cid(2)]));
        assert_eq!(graph.add_edge(base, cid(2)), Some(extended));
        assert_eq!(graph.remove_edge(extended, cid(2)), Some(base));
    }

    #[test]
    fn insert_move_remove_entity() {
        let mut graph = EntityGraph::new();
        let node_a = graph.find_or_create_node(&CompSet::new(vec![cid(1)]));
        let node_b = graph.find_or_create_node(&CompSet::new(vec![cid(1), cid(2)]));

        graph.insert_new_entity(e(1), node_a);
        assert_eq!(graph.node_of(e(1)), Some(node_a));

        graph.set_entity_node(e(1), node_b);
        assert_eq!(graph.node_of(e(1)), Some(node_b));
        assert!(!graph.node(node_a).unwrap().entities().contains(&e(1)));
        assert!(graph.node(node_b).unwrap().entities().contains(&e(1)));

        graph.remove_entity(e(1));
        assert_eq!(graph.node_of(e(1)), None);
        assert!(graph.node(node_b).unwrap().is_empty());
    }

    #[test]
    fn rebind_entity_preserves_node_membership() {
        let mut graph = EntityGraph::new();
        let node = graph.find_or_create_node(&CompSet::new(vec![cid(1)]));
        graph.insert_new_entity(e(1), node);
        graph.rebind_entity(e(1), e(999));
        assert_eq!(graph.node_of(e(1)), None);
        assert_eq!(graph.node_of(e(999)), Some(node));
        assert_eq!(graph.node(node).unwrap().entities(), &[e(999)]);
    }

    #[test]
    fn prune_when_empty_deletes_unlistened_nodes() {
        let mut graph = EntityGraph::new();
        let node = graph.find_or_create_node(&CompSet::new(vec![cid(1)]));
        graph.insert_new_entity(e(1), node);
        graph.remove_entity(e(1));
        assert_eq!(graph.node_count(), 2);
        graph.prune_when_empty([node]);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn persistent_node_survives_prune() {
        let mut graph = EntityGraph::new();
        let required = CompSet::new(vec![cid(1)]);
        // Subscribe before the node exists: the node is created fresh
        // afterwards and must still be checked against this listener at
        // creation time, same as a node that already existed at subscribe
        // time (§4.3).
        let (_listener, matches) = graph.subscribe(required, Vec::new());
        assert!(matches.is_empty());
        let node = graph.find_or_create_node(&CompSet::new(vec![cid(1)]));
        assert!(graph.node(node).unwrap().listeners().any(|_| true));
        assert_eq!(graph.node(node).unwrap().strategy(), NodeStrategy::Persistent);

        graph.insert_new_entity(e(1), node);
        graph.remove_entity(e(1));
        assert!(graph.node(node).unwrap().is_empty());

        graph.prune_when_empty([node]);
        assert!(graph.node(node).is_some(), "a listened-to node must survive prune_when_empty");
    }

    #[test]
    fn graph_change_log_coalesces_spawn_then_moves_to_final_node() {
        let mut log = GraphChangeLog::new();
        log.record_spawn(e(1), NodeId(1));
        log.record_move(e(1), NodeId(1), NodeId(2));
        let flush = log.flush();
        assert_eq!(flush.batches.len(), 1);
        assert_eq!(flush.batches[0].from, None);
        assert_eq!(flush.batches[0].to, Some(NodeId(2)));
    }

    #[test]
    fn graph_change_log_despawn_dominates() {
        let mut log = GraphChangeLog::new();
        log.record_move(e(1), NodeId(0), NodeId(1));
        log.record_despawn(e(1), NodeId(1));
        let flush = log.flush();
        assert_eq!(flush.batches.len(), 1);
        assert_eq!(flush.batches[0].from, Some(NodeId(0)));
        assert_eq!(flush.batches[0].to, None);
    }

    #[test]
    fn graph_change_log_groups_by_from_to() {
        let mut log = GraphChangeLog::new();
        log.record_move(e(1), NodeId(0), NodeId(1));
        log.record_move(e(2), NodeId(0), NodeId(1));
        log.record_move(e(3), NodeId(0), NodeId(2));
        let flush = log.flush();
        assert_eq!(flush.batches.len(), 2);
    }
}
