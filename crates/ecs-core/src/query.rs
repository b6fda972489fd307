//! A declarative query engine built from composable terms, anchored on
//! [`crate::graph::EntityGraph`] nodes rather than re-scanned per call (§4.4
//! "Query engine").
//!
//! Grounded on the teacher's `rgb-ecs/src/query.rs` `QueryBuilder` method
//! chaining style, but terms are now resolved against the dynamic, name-keyed
//! component registry and the term set is extended with `rel` (relation
//! edges) and reactive `on_add`/`on_remove` streams fed by
//! [`crate::graph::GraphFlush`], since a peer's schedule needs to react to
//! entities entering or leaving a shape across ticks, not just snapshot it.

use crate::component::{ComponentId, ComponentValue};
use crate::entity::Entity;
use crate::graph::{EntityGraph, GraphFlush, ListenerId, NodeId};
use crate::relation::RelationRegistry;
use crate::store::ComponentStore;
use crate::vecset::CompSet;

/// One clause in a query definition.
#[derive(Clone, Debug)]
enum Term {
    Read(ComponentId),
    Write(ComponentId),
    Has(ComponentId),
    Not(ComponentId),
    /// Sugar for "has a relation edge to a specific object"; resolved to a
    /// `Has`/`Not` on the edge's virtual component id at build time.
    Rel { relation: ComponentId, object: Entity, negate: bool },
}

/// Builds a [`Query`] from terms, then anchors it on the entity graph.
#[derive(Default)]
pub struct QueryBuilder {
    terms: Vec<Term>,
}

impl QueryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `component`, readable through [`QueryRow::read`].
    #[must_use]
    pub fn read(mut self, component: ComponentId) -> Self {
        self.terms.push(Term::Read(component));
        self
    }

    /// Require `component`, intended for mutation through
    /// [`QueryRow::write`]. Matching is identical to [`Self::read`]; the
    /// distinction only documents intent, since rows borrow the whole
    /// world rather than split per-column borrows.
    #[must_use]
    pub fn write(mut self, component: ComponentId) -> Self {
        self.terms.push(Term::Write(component));
        self
    }

    /// Require presence of `component` without fetching its value.
    #[must_use]
    pub fn has(mut self, component: ComponentId) -> Self {
        self.terms.push(Term::Has(component));
        self
    }

    /// Require absence of `component`.
    #[must_use]
    pub fn not(mut self, component: ComponentId) -> Self {
        self.terms.push(Term::Not(component));
        self
    }

    /// Require a `relation` edge from the matched entity to `object`.
    #[must_use]
    pub fn rel(mut self, relation: ComponentId, object: Entity) -> Self {
        self.terms.push(Term::Rel {
            relation,
            object,
            negate: false,
        });
        self
    }

    /// Require the matched entity to have no `relation` edge to `object`.
    #[must_use]
    pub fn not_rel(mut self, relation: ComponentId, object: Entity) -> Self {
        self.terms.push(Term::Rel {
            relation,
            object,
            negate: true,
        });
        self
    }

    /// Resolve terms into required/excluded [`CompSet`]s and subscribe the
    /// query to the graph so it tracks new/removed matching nodes without
    /// a full rescan (§4.4 "All").
    #[must_use]
    pub fn build(self, graph: &mut EntityGraph, relations: &RelationRegistry) -> Query {
        let mut required_ids = Vec::new();
        let mut excluded_ids = Vec::new();
        let mut reads = Vec::new();
        let mut writes = Vec::new();

        for term in &self.terms {
            match *term {
                Term::Read(id) => {
                    required_ids.push(id);
                    reads.push(id);
                }
                Term::Write(id) => {
                    required_ids.push(id);
                    writes.push(id);
                }
                Term::Has(id) => required_ids.push(id),
                Term::Not(id) => excluded_ids.push(id),
                Term::Rel { relation, object, negate } => {
                    // An edge that was never established can't be matched;
                    // fall back to a component id no node will ever carry
                    // so the term degrades to "never matches" rather than
                    // panicking a query built before the first link.
                    let vid = relations
                        .existing_virtual_id(relation, object)
                        .unwrap_or(ComponentId::unused_sentinel());
                    if negate {
                        excluded_ids.push(vid);
                    } else {
                        required_ids.push(vid);
                    }
                }
            }
        }

        let required = CompSet::new(required_ids);
        let excluded: Vec<CompSet> = excluded_ids.into_iter().map(|id| CompSet::new(vec![id])).collect();

        let (listener, matches) = graph.subscribe(required.clone(), excluded.clone());

        Query {
            required,
            excluded,
            reads,
            writes,
            listener,
            nodes: matches,
        }
    }
}

/// An executable query: a set of graph nodes known to satisfy the term set,
/// kept current by the listener registered at [`QueryBuilder::build`] time.
pub struct Query {
    required: CompSet,
    excluded: Vec<CompSet>,
    reads: Vec<ComponentId>,
    writes: Vec<ComponentId>,
    listener: ListenerId,
    nodes: Vec<NodeId>,
}

impl Query {
    #[must_use]
    pub const fn listener(&self) -> ListenerId {
        self.listener
    }

    #[must_use]
    pub fn required(&self) -> &CompSet {
        &self.required
    }

    /// Re-derive the matching node set from scratch. Cheap relative to a
    /// per-entity rescan since it only inspects node shapes, not entities;
    /// call after structural changes the listener doesn't already track
    /// (e.g. after deserializing a snapshot wholesale).
    pub fn refresh(&mut self, graph: &EntityGraph) {
        self.nodes = graph
            .iter_nodes()
            .filter(|n| n.vec().is_superset_of(&self.required) && self.excluded.iter().all(|ex| n.vec().is_disjoint(ex)))
            .map(|n| n.id())
            .collect();
    }

    /// Iterate every entity currently in a matching node.
    pub fn iter<'g>(&self, graph: &'g EntityGraph) -> impl Iterator<Item = Entity> + 'g {
        let nodes = self.nodes.clone();
        nodes
            .into_iter()
            .filter_map(move |id| graph.node(id))
            .flat_map(|n| n.entities().iter().copied())
    }

    #[must_use]
    pub fn count(&self, graph: &EntityGraph) -> usize {
        self.nodes
            .iter()
            .filter_map(|&id| graph.node(id))
            .map(|n| n.entities().len())
            .sum()
    }

    /// Fetch a read/write row view for `entity`, bundling the store and
    /// the term's declared columns.
    #[must_use]
    pub fn row<'s>(&self, store: &'s ComponentStore, entity: Entity, dense: crate::dense::DenseIndex) -> QueryRow<'s> {
        QueryRow {
            store,
            entity,
            dense,
            reads: &self.reads,
            writes: &self.writes,
        }
    }
}

/// A single matched entity, with accessors scoped to the columns the query
/// declared via `.read(...)`/`.write(...)`.
pub struct QueryRow<'s> {
    store: &'s ComponentStore,
    entity: Entity,
    dense: crate::dense::DenseIndex,
    reads: &'s [ComponentId],
    writes: &'s [ComponentId],
}

impl QueryRow<'_> {
    #[must_use]
    pub const fn entity(&self) -> Entity {
        self.entity
    }

    /// Read `component`'s value. Returns `None` if `component` was not
    /// declared via `.read(...)`/`.write(...)` on this query, or if the
    /// value is absent for this row.
    #[must_use]
    pub fn get(&self, component: ComponentId) -> Option<&dyn ComponentValue> {
        if !self.reads.contains(&component) && !self.writes.contains(&component) {
            return None;
        }
        self.store.get(component, self.dense)
    }

    #[must_use]
    pub fn has(&self, component: ComponentId) -> bool {
        self.store.contains(component, self.dense)
    }
}

impl ComponentId {
    /// A component id reserved for query terms referencing a relation edge
    /// that has never been established. No entity can ever carry this id,
    /// so a term built around it always degrades to "excludes everything"
    /// (for `not_rel`) or "matches nothing" (for `rel`).
    const fn unused_sentinel() -> Self {
        Self(u32::MAX)
    }
}

/// Cartesian product over `left × right`, optionally constrained so only
/// pairs `(l, r)` where `l` holds `relation` to `r` are yielded (§4.4
/// "Join"). Either side is re-enumerated fully at iteration time; reactivity
/// belongs to the `left`/`right` [`Query`]s themselves, not to the join.
pub struct JoinQuery {
    left: Query,
    right: Query,
    relation: Option<ComponentId>,
}

impl JoinQuery {
    #[must_use]
    pub const fn new(left: Query, right: Query, relation: Option<ComponentId>) -> Self {
        Self { left, right, relation }
    }

    #[must_use]
    pub fn left(&self) -> &Query {
        &self.left
    }

    #[must_use]
    pub fn right(&self) -> &Query {
        &self.right
    }

    /// Every `(l, r)` pair where both sides match their own query and, if a
    /// `relation` was given, `l` holds an edge to `r` via that relation's
    /// per-object virtual id (§4.2, §4.4). Relations with no objects
    /// contribute no rows, matching inner-join semantics.
    pub fn iter<'g>(&self, graph: &'g EntityGraph, relations: &'g RelationRegistry) -> impl Iterator<Item = (Entity, Entity)> + 'g {
        let rights: Vec<Entity> = self.right.iter(graph).collect();
        let relation = self.relation;
        self.left.iter(graph).flat_map(move |l| {
            let rights = rights.clone();
            rights.into_iter().filter(move |&r| {
                relation.is_none_or(|rel| {
                    relations
                        .existing_virtual_id(rel, r)
                        .is_some_and(|vid| graph.node_of(l).and_then(|n| graph.node(n)).is_some_and(|n| n.vec().contains(vid)))
                })
            }).map(move |r| (l, r))
        })
    }
}

/// Wraps a [`Query`] that must match exactly one entity, for singleton
/// resources modeled as entities rather than as [`crate::World`] resources
/// (§4.4 "Unique").
pub struct UniqueQuery {
    query: Query,
}

impl UniqueQuery {
    #[must_use]
    pub const fn new(query: Query) -> Self {
        Self { query }
    }

    /// `None` if the query currently matches zero or more than one entity.
    #[must_use]
    pub fn get(&self, graph: &EntityGraph) -> Option<Entity> {
        let mut matches = self.query.iter(graph);
        let first = matches.next()?;
        if matches.next().is_some() {
            None
        } else {
            Some(first)
        }
    }
}

/// A reactive change stream: entities that entered or left a term's matching
/// shape since the last drain, fed by [`crate::World::flush_graph_changes`]
/// (§4.4 "in(sub-query) / out(sub-query)").
///
/// Draining is per-system-invocation (resolves Open Question 2): whichever
/// system calls [`Self::drain_in`]/[`Self::drain_out`] first in a tick
/// empties the buffer for everyone, so a reactive term is effectively
/// single-consumer within a tick.
pub struct ReactiveQuery {
    listener: ListenerId,
    incoming: Vec<Entity>,
    outgoing: Vec<Entity>,
}

impl ReactiveQuery {
    /// Build a reactive stream anchored on the same term set a [`Query`]
    /// would use, but tracking entry/exit rather than a live node set.
    #[must_use]
    pub fn build(terms: QueryBuilder, graph: &mut EntityGraph, relations: &RelationRegistry) -> Self {
        let query = terms.build(graph, relations);
        Self {
            listener: query.listener(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    #[must_use]
    pub const fn listener(&self) -> ListenerId {
        self.listener
    }

    /// Inspect one [`GraphFlush`] and append any entities that entered or
    /// left this stream's shape to the pending buffers.
    pub fn feed(&mut self, flush: &GraphFlush, graph: &EntityGraph) {
        let matches = |id: Option<NodeId>| {
            id.and_then(|id| graph.node(id)).is_some_and(|n| n.listeners().any(|l| l == self.listener))
        };
        for batch in &flush.batches {
            let was_in = matches(batch.from);
            let now_in = matches(batch.to);
            if now_in && !was_in {
                self.incoming.extend(batch.entities.iter().copied());
            } else if was_in && !now_in {
                self.outgoing.extend(batch.entities.iter().copied());
            }
        }
    }

    /// Take and clear the entities that entered since the last drain.
    pub fn drain_in(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.incoming)
    }

    /// Take and clear the entities that left since the last drain.
    pub fn drain_out(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.outgoing)
    }
}
