//! The storage engine: owns every registry, store, and index named in §3,
//! plus the per-tick pending-op and undo logs that make replication and
//! rollback possible.
//!
//! Grounded on the teacher's `rgb-ecs/src/world.rs` `World` (one struct
//! owning entities/components/archetypes and exposing `spawn`/`insert`/
//! `get`/`remove` as the single point of mutation), but entities are now
//! domain-scoped ids, components are dynamically registered by name, and
//! every mutation additionally appends to a pending-op log and an undo log
//! so a tick's mutations can be turned into a [`crate::ops::PendingOp`]
//! transaction or rolled back (§3 "Pending per-tick state", §4.9).

use std::any::{Any, TypeId};
use std::collections::HashSet as StdHashSet;

use hashbrown::HashMap;

use crate::component::{ComponentId, ComponentRegistry, ComponentValue};
use crate::config::WorldConfig;
use crate::dense::{DenseIndex, DenseIndexTable};
use crate::entity::{DomainRegistry, Entity, TRANSIENT_DOMAIN};
use crate::error::{WorldError, WorldResult};
use crate::graph::{EntityGraph, GraphChangeLog, GraphFlush, NodeId};
use crate::history::{Checkpoint, History};
use crate::ops::{PendingOp, UndoBatch, UndoOp};
use crate::relation::RelationRegistry;
use crate::store::{make_version, ComponentStore};
use crate::transient::TransientRegistry;
use crate::vecset::CompSet;

/// One component value attached at spawn time; `None` for a tag or a
/// value-less structural add.
pub type ComponentInit = (ComponentId, Option<Box<dyn ComponentValue>>);

/// Deterministic fingerprint of `(tick, spawn_index_in_tick)` pairing a
/// client-predicted spawn with its authoritative counterpart (§3 "Transient
/// registry", §4.6). Both peers only need to agree on the function, not on
/// any cryptographic property, so a plain FNV-style mix is enough.
#[must_use]
pub const fn causal_key(tick: u64, spawn_index_in_tick: u32) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    h ^= tick;
    h = h.wrapping_mul(0x0000_0100_0000_01B3);
    h ^= spawn_index_in_tick as u64;
    h.wrapping_mul(0x0000_0100_0000_01B3)
}

/// A resource recording every entity a buffered command currently targets,
/// so rebinding a predicted entity onto its authoritative id can retarget
/// any command still pointed at the old one (§4.6 "Rebinding details").
#[derive(Debug, Default, Clone)]
pub struct CommandBuffer {
    targets: Vec<Entity>,
}

impl CommandBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: Entity) {
        self.targets.push(target);
    }

    #[must_use]
    pub fn targets(&self) -> &[Entity] {
        &self.targets
    }

    fn retarget(&mut self, old: Entity, new: Entity) {
        for target in &mut self.targets {
            if *target == old {
                *target = new;
            }
        }
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }
}

/// The storage engine. Owns the entity/component/relation registries, the
/// component store, the archetype graph, resources, the pending
/// replication-op log, and the undo history.
pub struct World {
    config: WorldConfig,
    tick: u64,
    domains: DomainRegistry,
    components: ComponentRegistry,
    relations: RelationRegistry,
    dense: DenseIndexTable,
    store: ComponentStore,
    graph: EntityGraph,
    graph_changes: GraphChangeLog,
    history: History,
    resources: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    resource_entity: Entity,
    replicated_tag: ComponentId,
    pending_ops: Vec<PendingOp>,
    pending_node_pruning: StdHashSet<NodeId>,
    current_undo_entries: Vec<UndoOp>,
    tick_spawn_count: u32,
    replaying_undo: bool,
    transient: TransientRegistry,
}

impl World {
    /// Construct a world for `config.domain_id`, registering the built-in
    /// `Replicated` tag and allocating the dedicated resource entity at
    /// local id 0 (§3.1).
    #[must_use]
    pub fn new(config: WorldConfig) -> Self {
        let mut components = ComponentRegistry::new();
        let replicated_tag = components
            .register_tag("Replicated")
            .expect("built-in tag registration cannot conflict");

        let mut domains = DomainRegistry::new();
        let resource_entity = domains.spawn_in(config.domain_id);

        let mut dense = DenseIndexTable::new();
        dense.allocate(resource_entity);

        let mut history = History::new();
        history.push_checkpoint(
            Checkpoint {
                tick: 0,
                store: ComponentStore::new(),
                dense: DenseIndexTable::new(),
                graph: EntityGraph::new(),
                relations: RelationRegistry::new(),
            },
            config.history_max_checkpoints,
        );

        Self {
            config,
            tick: 0,
            domains,
            components,
            relations: RelationRegistry::new(),
            dense,
            store: ComponentStore::new(),
            graph: EntityGraph::new(),
            graph_changes: GraphChangeLog::new(),
            history,
            resources: HashMap::new(),
            resource_entity,
            replicated_tag,
            pending_ops: Vec::new(),
            pending_node_pruning: StdHashSet::new(),
            current_undo_entries: Vec::new(),
            tick_spawn_count: 0,
            replaying_undo: false,
            transient: TransientRegistry::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    #[must_use]
    pub const fn domain_id(&self) -> u16 {
        self.config.domain_id
    }

    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub const fn resource_entity(&self) -> Entity {
        self.resource_entity
    }

    #[must_use]
    pub const fn replicated_tag(&self) -> ComponentId {
        self.replicated_tag
    }

    #[must_use]
    pub fn components(&self) -> &ComponentRegistry {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.components
    }

    #[must_use]
    pub fn relations(&self) -> &RelationRegistry {
        &self.relations
    }

    pub fn relations_mut(&mut self) -> &mut RelationRegistry {
        &mut self.relations
    }

    #[must_use]
    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut EntityGraph {
        &mut self.graph
    }

    #[must_use]
    pub fn store(&self) -> &ComponentStore {
        &self.store
    }

    #[must_use]
    pub fn dense(&self) -> &DenseIndexTable {
        &self.dense
    }

    #[must_use]
    pub fn domains(&self) -> &DomainRegistry {
        &self.domains
    }

    pub fn domains_mut(&mut self) -> &mut DomainRegistry {
        &mut self.domains
    }

    #[must_use]
    pub fn is_live(&self, entity: Entity) -> bool {
        self.domains.is_live(entity)
    }

    #[must_use]
    pub fn transient(&self) -> &TransientRegistry {
        &self.transient
    }

    fn current_version(&self) -> u64 {
        make_version(self.tick, self.config.domain_id)
    }

    fn vec_of(&self, entity: Entity) -> CompSet {
        self.graph
            .node_of(entity)
            .and_then(|n| self.graph.node(n))
            .map_or_else(CompSet::empty, |n| n.vec().clone())
    }

    #[must_use]
    fn is_replicated(&self, entity: Entity) -> bool {
        self.vec_of(entity).contains(self.replicated_tag)
    }

    fn snapshot_components(&self, entity: Entity) -> Vec<ComponentInit> {
        let vec = self.vec_of(entity);
        let idx = self.dense.get(entity);
        vec.as_slice()
            .iter()
            .map(|&id| {
                let value = idx.and_then(|i| self.store.get(id, i)).map(ComponentValue::clone_boxed);
                (id, value)
            })
            .collect()
    }

    // ---- resources (§3.1, §5) ---------------------------------------

    pub fn add_resource<T: Send + Sync + 'static>(&mut self, value: T) {
        self.resources.insert(TypeId::of::<T>(), Box::new(value));
    }

    #[must_use]
    pub fn get_resource<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.resources.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref())
    }

    pub fn get_resource_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.resources.get_mut(&TypeId::of::<T>()).and_then(|b| b.downcast_mut())
    }

    /// Whether a resource of this `TypeId` is present, without knowing its
    /// concrete type. Used by [`crate::schedule::Schedule`] to bind a
    /// system's declared [`crate::schedule::SystemParam::ResourceRead`]/
    /// [`crate::schedule::SystemParam::ResourceWrite`] params before running
    /// its body (§4.5, §7 "Resource-missing").
    #[must_use]
    pub fn has_resource_dyn(&self, type_id: TypeId) -> bool {
        self.resources.contains_key(&type_id)
    }

    // ---- structural helpers ------------------------------------------

    fn install_components(&mut self, idx: DenseIndex, components: &[ComponentInit], version: u64) -> CompSet {
        let mut ids = Vec::with_capacity(components.len());
        for (id, value) in components {
            ids.push(*id);
            if let Some(v) = value {
                self.store.force_set(*id, idx, v.clone_boxed(), version);
            }
        }
        CompSet::new(ids)
    }

    fn migrate(&mut self, entity: Entity, new_vec: CompSet) {
        let old_node = self.graph.node_of(entity);
        let new_node = self.graph.find_or_create_node(&new_vec);
        if old_node != Some(new_node) {
            if let Some(old) = old_node {
                self.graph_changes.record_move(entity, old, new_node);
                self.pending_node_pruning.insert(old);
            }
            self.graph.set_entity_node(entity, new_node);
        }
    }

    fn push_undo(&mut self, entry: UndoOp) {
        if !self.replaying_undo {
            self.current_undo_entries.push(entry);
        }
    }

    // ---- raw mutation primitives: record undo + graph moves, never a
    // pending replication op. Shared by the system-facing API (which wraps
    // these and additionally records a `PendingOp`) and by replication's
    // apply path and undo replay (which must never re-enqueue what they are
    // applying). --------------------------------------------------------

    fn spawn_raw(&mut self, entity: Entity, components: Vec<ComponentInit>, version: u64) -> bool {
        if self.is_live(entity) {
            tracing::warn!(?entity, "spawn_raw on already-live entity; treating as a no-op");
            return false;
        }
        self.domains.domain_mut(entity.domain_id()).mark_live(entity.local_id());
        let idx = self.dense.allocate(entity);
        let vec = self.install_components(idx, &components, version);
        let node = self.graph.find_or_create_node(&vec);
        self.graph.insert_new_entity(entity, node);
        self.graph_changes.record_spawn(entity, node);
        self.push_undo(UndoOp::UndoSpawn { entity });
        true
    }

    fn despawn_raw(&mut self, entity: Entity) -> bool {
        if !self.is_live(entity) {
            return false;
        }
        let components = self.snapshot_components(entity);
        for (subject, relation) in self.relations.remove_object(entity) {
            let stale_vid = self.relations.existing_virtual_id(relation, entity);
            let mut vec = self.vec_of(subject);
            if let Some(vid) = stale_vid {
                vec = vec.without(vid);
            }
            self.migrate(subject, vec);
        }
        let _ = self.relations.remove_subject(entity);
        if let Some(node) = self.graph.remove_entity(entity) {
            self.graph_changes.record_despawn(entity, node);
            self.pending_node_pruning.insert(node);
        }
        if let Some(idx) = self.dense.free(entity) {
            for (id, _) in &components {
                self.store.remove(*id, idx);
            }
        }
        self.domains.despawn(entity);
        self.transient.remove_entity(entity);
        self.push_undo(UndoOp::UndoDespawn { entity, components });
        true
    }

    fn add_raw(&mut self, entity: Entity, component: ComponentId, value: Option<Box<dyn ComponentValue>>, version: u64) {
        let Some(idx) = self.dense.get(entity) else { return };
        if let Some(v) = value {
            self.store.force_set(component, idx, v, version);
        }
        let new_vec = self.vec_of(entity).with(component);
        self.migrate(entity, new_vec);
        self.push_undo(UndoOp::UndoAdd { entity, component });
    }

    fn remove_raw(&mut self, entity: Entity, component: ComponentId) {
        let Some(idx) = self.dense.get(entity) else { return };
        let is_tag = self.components.is_tag(component);
        if is_tag {
            self.push_undo(UndoOp::UndoAdd { entity, component });
        } else {
            let prior_value = self.store.get(component, idx).map(ComponentValue::clone_boxed);
            let prior_version = self.store.version(component, idx);
            self.store.remove(component, idx);
            self.push_undo(UndoOp::UndoRemove {
                entity,
                component,
                prior_value,
                prior_version,
            });
        }
        let new_vec = self.vec_of(entity).without(component);
        self.migrate(entity, new_vec);
    }

    /// LWW write (§3 "Composite version", §4.6 "Set"). If `component` is
    /// absent, behaves like a structural add instead.
    fn set_raw(&mut self, entity: Entity, component: ComponentId, value: Box<dyn ComponentValue>, version: u64) -> bool {
        if !self.vec_of(entity).contains(component) {
            self.add_raw(entity, component, Some(value), version);
            return true;
        }
        let Some(idx) = self.dense.get(entity) else { return false };
        let prior_value = self.store.get(component, idx).map(ComponentValue::clone_boxed);
        let prior_version = self.store.version(component, idx);
        let applied = self.store.set_versioned(component, idx, value, version);
        if applied {
            self.push_undo(UndoOp::UndoRemove {
                entity,
                component,
                prior_value,
                prior_version,
            });
        } else {
            tracing::warn!(?entity, ?component, version, prior_version, "stale write rejected by LWW");
        }
        applied
    }

    fn apply_undo_entry(&mut self, op: UndoOp) {
        match op {
            UndoOp::UndoSpawn { entity } => {
                self.despawn_raw(entity);
            }
            UndoOp::UndoDespawn { entity, components } => {
                let version = make_version(self.tick, entity.domain_id());
                self.spawn_raw(entity, components, version);
            }
            UndoOp::UndoAdd { entity, component } => {
                self.remove_raw(entity, component);
            }
            UndoOp::UndoRemove {
                entity,
                component,
                prior_value,
                prior_version,
            } => {
                if let Some(value) = prior_value {
                    let version = prior_version.unwrap_or_else(|| self.current_version());
                    if self.vec_of(entity).contains(component) {
                        if let Some(idx) = self.dense.get(entity) {
                            self.store.force_set(component, idx, value, version);
                        }
                    } else {
                        self.add_raw(entity, component, Some(value), version);
                    }
                }
            }
        }
    }

    // ---- system-facing API (§6): wraps the raw primitives and additionally
    // records a `PendingOp` for `Replicated` entities, since only those are
    // ever turned into a transaction at commit time (§3 invariant).
    // ---------------------------------------------------------------------

    /// Allocate a new entity in this peer's own domain, installing its
    /// initial component set (§3 "Spawn").
    pub fn spawn(&mut self, components: Vec<ComponentInit>) -> Entity {
        let entity = self.domains.spawn_in(self.config.domain_id);
        let idx = self.dense.allocate(entity);
        let version = self.current_version();
        let vec = self.install_components(idx, &components, version);
        let node = self.graph.find_or_create_node(&vec);
        self.graph.insert_new_entity(entity, node);
        self.graph_changes.record_spawn(entity, node);
        self.push_undo(UndoOp::UndoSpawn { entity });
        if vec.contains(self.replicated_tag) {
            self.pending_ops.push(PendingOp::Spawn {
                entity,
                components,
                causal_key: None,
            });
        }
        self.tick_spawn_count += 1;
        entity
    }

    /// Spawn a client-side prediction in the reserved transient domain,
    /// tagged with a causal key the authoritative peer will echo back on
    /// its own `Spawn` so the two can be paired for rebind (§3, §4.6, S4).
    pub fn spawn_predicted(&mut self, components: Vec<ComponentInit>) -> (Entity, u64) {
        let key = causal_key(self.tick, self.tick_spawn_count);
        let entity = self.domains.spawn_in(TRANSIENT_DOMAIN);
        let idx = self.dense.allocate(entity);
        let version = make_version(self.tick, TRANSIENT_DOMAIN);
        let vec = self.install_components(idx, &components, version);
        let node = self.graph.find_or_create_node(&vec);
        self.graph.insert_new_entity(entity, node);
        self.graph_changes.record_spawn(entity, node);
        self.push_undo(UndoOp::UndoSpawn { entity });
        self.transient.insert(key, entity, self.tick);
        if vec.contains(self.replicated_tag) {
            self.pending_ops.push(PendingOp::Spawn {
                entity,
                components,
                causal_key: Some(key),
            });
        }
        self.tick_spawn_count += 1;
        (entity, key)
    }

    /// Spawn an ephemeral command entity in the reserved command domain,
    /// registered in the same transient registry as a predicted spawn so
    /// the shared despawn-purge/ghost-cleanup machinery also covers it
    /// (§4.10 "Command entities", §9 "Command entities are a pattern").
    pub fn spawn_command(&mut self, components: Vec<ComponentInit>) -> Entity {
        let key = causal_key(self.tick, self.tick_spawn_count);
        let entity = self.domains.spawn_in(crate::entity::COMMAND_DOMAIN);
        let idx = self.dense.allocate(entity);
        let version = make_version(self.tick, crate::entity::COMMAND_DOMAIN);
        let vec = self.install_components(idx, &components, version);
        let node = self.graph.find_or_create_node(&vec);
        self.graph.insert_new_entity(entity, node);
        self.graph_changes.record_spawn(entity, node);
        self.push_undo(UndoOp::UndoSpawn { entity });
        self.transient.insert(key, entity, self.tick);
        self.tick_spawn_count += 1;
        entity
    }

    /// Redirect the prediction paired with `causal_key` onto `authoritative`
    /// (§4.6 "Spawn"). Returns `false` if no matching prediction is
    /// outstanding, in which case the caller should `apply_spawn` instead.
    pub fn rebind_predicted(&mut self, causal_key: u64, authoritative: Entity) -> bool {
        let Some(entry) = self.transient.get(causal_key) else {
            return false;
        };
        self.rebind_entity(entry.entity, authoritative);
        self.transient.rebind(causal_key, authoritative);
        true
    }

    /// Age out predictions the server never confirmed: any transient-domain
    /// entity whose registry entry is older than `ghost_cleanup_window`
    /// ticks is force-despawned, and its entry removed (§4.10 "Ghost
    /// cleanup"). Entries already rebound onto an authoritative entity are
    /// dropped from the registry without being touched, since `entity` no
    /// longer lives in the transient domain.
    #[tracing::instrument(skip(self))]
    pub fn ghost_cleanup(&mut self) -> Vec<Entity> {
        let cutoff = self.tick.saturating_sub(self.config.ghost_cleanup_window);
        let stale = self.transient.drain_older_than(cutoff);
        let mut despawned = Vec::new();
        for (_, entry) in stale {
            if entry.entity.is_transient() && self.is_live(entry.entity) {
                self.despawn_raw(entry.entity);
                despawned.push(entry.entity);
            }
        }
        if !despawned.is_empty() {
            tracing::debug!(count = despawned.len(), "ghost cleanup despawned unconfirmed predictions");
        }
        despawned
    }

    /// Install the relationship `entity -(relation)-> object`: derive this
    /// peer's own virtual component id for the pair (minting it if this is
    /// the first edge to `object` via `relation`), install both it and the
    /// base relation component as tags, and link the reverse index (§3
    /// "Relation", §9 "emit both on add" -- the base component lets `has(R)`
    /// queries match without enumerating every object, while the virtual id
    /// lets `rel(R, …)` traversal target one specific object). A no-op if
    /// `entity` is not live.
    pub fn apply_relationship(&mut self, entity: Entity, relation: ComponentId, object: Entity) {
        if !self.is_live(entity) {
            return;
        }
        let version = self.current_version();
        if !self.vec_of(entity).contains(relation) {
            self.add_raw(entity, relation, None, version);
        }
        let vid = self.relations.virtual_id_for(&self.components, relation, object);
        if !self.vec_of(entity).contains(vid) {
            self.add_raw(entity, vid, None, version);
        }
        self.relations.link(entity, relation, object);
    }

    pub fn despawn(&mut self, entity: Entity) {
        if !self.is_live(entity) {
            tracing::warn!(?entity, "despawn on unknown entity");
            return;
        }
        let replicated = self.is_replicated(entity);
        if self.despawn_raw(entity) && replicated {
            self.pending_ops.push(PendingOp::Despawn { entity });
        }
    }

    /// Structural add, optionally carrying an initial value (§4.6 "Add").
    /// Adding a component the entity already has is treated as a value
    /// overwrite instead, matching `apply_transaction`'s `Set`-on-present
    /// semantics so the two code paths never diverge on repeated application.
    pub fn add_component(&mut self, entity: Entity, component: ComponentId, value: Option<Box<dyn ComponentValue>>) {
        if !self.is_live(entity) {
            tracing::warn!(?entity, "add_component on unknown entity");
            return;
        }
        if self.vec_of(entity).contains(component) {
            if let Some(v) = value {
                self.set_component_value(entity, component, v, None);
            }
            return;
        }
        let version = self.current_version();
        self.add_raw(entity, component, value.clone(), version);
        if self.is_replicated(entity) {
            self.pending_ops.push(PendingOp::Add { entity, component, value });
        }
    }

    pub fn remove_component(&mut self, entity: Entity, component: ComponentId) {
        if !self.is_live(entity) || !self.vec_of(entity).contains(component) {
            return;
        }
        let replicated = self.is_replicated(entity);
        self.remove_raw(entity, component);
        if replicated {
            self.pending_ops.push(PendingOp::Remove { entity, component });
        }
    }

    #[must_use]
    pub fn has_component(&self, entity: Entity, component: ComponentId) -> bool {
        self.dense.get(entity).is_some_and(|idx| self.store.contains(component, idx))
    }

    #[must_use]
    pub fn get_component_value(&self, entity: Entity, component: ComponentId) -> Option<&dyn ComponentValue> {
        self.store.get(component, self.dense.get(entity)?)
    }

    /// LWW write, stamping `version` (or the current tick/domain composite
    /// if `None`) and applying only if it does not regress (§4.6 "Set").
    /// Returns whether the write was applied.
    pub fn set_component_value(
        &mut self,
        entity: Entity,
        component: ComponentId,
        value: Box<dyn ComponentValue>,
        version: Option<u64>,
    ) -> bool {
        if !self.is_live(entity) {
            return false;
        }
        let v = version.unwrap_or_else(|| self.current_version());
        let replicated = self.is_replicated(entity);
        let applied = self.set_raw(entity, component, value.clone_boxed(), v);
        if applied && replicated {
            self.pending_ops.push(PendingOp::Set {
                entity,
                component,
                value,
                version,
            });
        }
        applied
    }

    /// Unconditional write, bypassing LWW (used by local simulation code
    /// that owns the value outright, e.g. a movement system). This is the
    /// one path allowed to make `version` regress (§3 invariant 4 exemption).
    pub fn force_set_component_value(&mut self, entity: Entity, component: ComponentId, value: Box<dyn ComponentValue>) {
        if !self.is_live(entity) {
            return;
        }
        let Some(idx) = self.dense.get(entity) else { return };
        let had = self.vec_of(entity).contains(component);
        let version = self.current_version();
        self.store.force_set(component, idx, value.clone_boxed(), version);
        if had {
            self.push_undo(UndoOp::UndoRemove {
                entity,
                component,
                prior_value: None,
                prior_version: None,
            });
        } else {
            let new_vec = self.vec_of(entity).with(component);
            self.migrate(entity, new_vec);
            self.push_undo(UndoOp::UndoAdd { entity, component });
        }
        if self.is_replicated(entity) {
            self.pending_ops.push(PendingOp::Set {
                entity,
                component,
                value,
                version: Some(version),
            });
        }
    }

    // ---- replication application primitives (ecs-replication's apply.rs
    // drives these; they skip the pending-op log since a remotely-applied
    // mutation must never be re-broadcast as this peer's own). ------------

    /// Install an authoritative (or peer-originated) spawn at an explicit
    /// `entity` id. A no-op if already live, matching the idempotence
    /// property "Spawn after Spawn with same entity is a no-op" (§8).
    pub fn apply_spawn(&mut self, entity: Entity, components: Vec<ComponentInit>, version: u64) -> bool {
        self.spawn_raw(entity, components, version)
    }

    /// A no-op if already dead (§8 "Despawn after Despawn is a no-op").
    pub fn apply_despawn(&mut self, entity: Entity) -> bool {
        self.despawn_raw(entity)
    }

    pub fn apply_set(&mut self, entity: Entity, component: ComponentId, value: Box<dyn ComponentValue>, version: u64) -> bool {
        if !self.is_live(entity) {
            tracing::warn!(?entity, ?component, "apply_set targets an unknown entity; dropping op");
            return false;
        }
        self.set_raw(entity, component, value, version)
    }

    pub fn apply_add(&mut self, entity: Entity, component: ComponentId, value: Option<Box<dyn ComponentValue>>, version: u64) {
        if !self.is_live(entity) {
            tracing::warn!(?entity, ?component, "apply_add targets an unknown entity; dropping op");
            return;
        }
        if self.vec_of(entity).contains(component) {
            if let Some(v) = value {
                self.set_raw(entity, component, v, version);
            }
            return;
        }
        self.add_raw(entity, component, value, version);
    }

    pub fn apply_remove(&mut self, entity: Entity, component: ComponentId) {
        if !self.is_live(entity) || !self.vec_of(entity).contains(component) {
            return;
        }
        self.remove_raw(entity, component);
    }

    /// Redirect a predicted entity's dense slot, graph membership, incoming
    /// relations, and buffered commands onto `new`, an authoritative id
    /// (§4.6 "Rebinding details").
    pub fn rebind_entity(&mut self, old: Entity, new: Entity) {
        if !self.is_live(old) {
            tracing::warn!(?old, ?new, "rebind target is not live; ignoring");
            return;
        }
        self.dense.rebind(old, new);
        self.graph.rebind_entity(old, new);

        for (subject, relation) in self.relations.remove_object(old) {
            let stale_vid = self.relations.existing_virtual_id(relation, old);
            let new_vid = self.relations.virtual_id_for(&self.components, relation, new);
            self.relations.link(subject, relation, new);
            let mut vec = self.vec_of(subject);
            if let Some(vid) = stale_vid {
                vec = vec.without(vid);
            }
            vec = vec.with(new_vid);
            self.migrate(subject, vec);
        }

        if let Some(cmds) = self.get_resource_mut::<CommandBuffer>() {
            cmds.retarget(old, new);
        }

        self.domains.domain_mut(new.domain_id()).mark_live(new.local_id());
        self.domains.despawn(old);
    }

    // ---- tick lifecycle (§4.5, §4.7, §4.9) --------------------------

    /// Reduce this tick's pending ops (§4.7 "Commit") and return them,
    /// clearing the pending-op log. Does not touch `tick` or a domain's
    /// `op_seq` -- the caller (typically `ecs-replication`) assigns the
    /// sequence number and tick when it wraps these into a `Transaction`.
    pub fn commit_transaction(&mut self) -> Vec<PendingOp> {
        let mut by_entity: HashMap<Entity, Vec<PendingOp>> = HashMap::new();
        for op in self.pending_ops.drain(..) {
            by_entity.entry(op.entity()).or_default().push(op);
        }

        let mut out = Vec::new();
        for (entity, ops) in by_entity {
            let has_despawn = ops.iter().any(|o| matches!(o, PendingOp::Despawn { .. }));
            if has_despawn {
                out.push(PendingOp::Despawn { entity });
                continue;
            }

            let spawn_causal_key = ops.iter().find_map(|o| match o {
                PendingOp::Spawn { causal_key, .. } => Some(*causal_key),
                _ => None,
            });
            if let Some(causal_key) = spawn_causal_key {
                if self.is_live(entity) {
                    out.push(PendingOp::Spawn {
                        entity,
                        components: self.snapshot_components(entity),
                        causal_key,
                    });
                }
                continue;
            }

            let mut adds: HashMap<ComponentId, Option<Box<dyn ComponentValue>>> = HashMap::new();
            let mut sets: HashMap<ComponentId, (Box<dyn ComponentValue>, Option<u64>)> = HashMap::new();
            let mut removes: StdHashSet<ComponentId> = StdHashSet::new();
            for op in ops {
                match op {
                    PendingOp::Add { component, value, .. } => {
                        adds.insert(component, value);
                        removes.remove(&component);
                    }
                    PendingOp::Remove { component, .. } => {
                        removes.insert(component);
                        adds.remove(&component);
                        sets.remove(&component);
                    }
                    PendingOp::Set { component, value, version, .. } => {
                        sets.insert(component, (value, version));
                    }
                    PendingOp::Spawn { .. } | PendingOp::Despawn { .. } => unreachable!("handled above"),
                }
            }
            for (component, value) in adds {
                out.push(PendingOp::Add { entity, component, value });
            }
            for (component, (value, version)) in sets {
                out.push(PendingOp::Set {
                    entity,
                    component,
                    value,
                    version,
                });
            }
            for component in removes {
                out.push(PendingOp::Remove { entity, component });
            }
        }
        out
    }

    /// Drain and coalesce this tick's archetype moves into a
    /// [`GraphFlush`], then prune any now-empty, non-`Persistent` nodes
    /// (§4.3 "Batching").
    pub fn flush_graph_changes(&mut self) -> GraphFlush {
        let flush = self.graph_changes.flush();
        let candidates: Vec<NodeId> = self.pending_node_pruning.drain().collect();
        self.graph.prune_when_empty(candidates);
        flush
    }

    /// Batch this tick's undo entries, advance `tick`, and take a
    /// checkpoint every `checkpoint_interval` ticks (§4.9).
    #[tracing::instrument(skip(self))]
    pub fn advance_tick(&mut self) {
        let finished_tick = self.tick;
        if !self.current_undo_entries.is_empty() {
            self.history.push_undo_batch(UndoBatch {
                tick: finished_tick,
                entries: std::mem::take(&mut self.current_undo_entries),
            });
        }
        self.tick += 1;
        self.tick_spawn_count = 0;
        if self.tick % self.config.checkpoint_interval == 0 {
            self.push_checkpoint();
        }
        tracing::trace!(tick = self.tick, "advanced tick");
    }

    fn push_checkpoint(&mut self) {
        let checkpoint = Checkpoint {
            tick: self.tick,
            store: self.store.deep_clone(),
            dense: self.dense.clone(),
            graph: self.graph.clone(),
            relations: self.relations.clone(),
        };
        self.history.push_checkpoint(checkpoint, self.config.history_max_checkpoints);
    }

    /// Restore the world to `target`'s state (§4.9 "Rollback"). A no-op if
    /// `target == tick`. Fails with [`WorldError::RollbackOutOfWindow`] if
    /// `target` is outside `[oldest_retained_checkpoint, current]`.
    #[tracing::instrument(skip(self))]
    pub fn rollback_to_tick(&mut self, target: u64) -> WorldResult<()> {
        if target == self.tick {
            return Ok(());
        }
        let oldest = self.history.oldest_tick();
        if target > self.tick || target < oldest {
            return Err(WorldError::RollbackOutOfWindow {
                requested: target,
                oldest,
                current: self.tick,
            });
        }

        if self.history.checkpoint_at(target).is_some() {
            let checkpoint = self.history.checkpoint_at(target).expect("checked above");
            self.store.restore_from(&checkpoint.store);
            self.dense = checkpoint.dense.clone();
            self.graph = checkpoint.graph.clone();
            self.relations = checkpoint.relations.clone();
        } else {
            self.replaying_undo = true;
            for t in (target + 1..=self.tick).rev() {
                if let Some(batch) = self.history.take_undo_batch(t) {
                    for entry in batch.entries.into_iter().rev() {
                        self.apply_undo_entry(entry);
                    }
                }
            }
            self.replaying_undo = false;
        }

        self.history.discard_after(target);
        self.current_undo_entries.clear();
        self.tick = target;
        tracing::debug!(target, "rolled back");
        Ok(())
    }

    /// Every live entity carrying both the `Replicated` tag and `component`,
    /// for snapshot capture (§4.8).
    #[must_use]
    pub fn replicated_entities_with(&self, component: ComponentId) -> Vec<Entity> {
        self.graph
            .iter_nodes()
            .filter(|n| n.vec().contains(self.replicated_tag) && n.vec().contains(component))
            .flat_map(|n| n.entities().iter().copied())
            .collect()
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

    fn world_with_position() -> (World, ComponentId) {
        let mut world = World::new(WorldConfig::builder(1).build());
        let position = world
            .components_mut()
            .register(
                "Position",
                crate::component::ComponentSerde {
                    bytes_per_element: Some(8),
                    encode: |_v, _w| Ok(()),
                    decode: |_r| Ok(Box::new(Position { x: 0.0, y: 0.0 })),
                },
            )
            .unwrap();
        (world, position)
    }

    #[test]
    fn spawn_installs_components_and_node() {
        let (mut world, position) = world_with_position();
        let entity = world.spawn(vec![(position, Some(Box::new(Position { x: 1.0, y: 2.0 })))]);
        assert!(world.is_live(entity));
        let value = world.get_component_value(entity, position).unwrap();
        assert_eq!(value.as_any().downcast_ref::<Position>().unwrap().x, 1.0);
    }

    #[test]
    fn replicated_spawn_is_recorded_and_commit_reduces_it() {
        let (mut world, position) = world_with_position();
        let replicated = world.replicated_tag();
        let entity = world.spawn(vec![
            (replicated, None),
            (position, Some(Box::new(Position { x: 1.0, y: 2.0 }))),
        ]);
        world.set_component_value(entity, position, Box::new(Position { x: 5.0, y: 5.0 }), None);
        let ops = world.commit_transaction();
        assert_eq!(ops.len(), 1, "spawn + later set collapse to one spawn (§4.7)");
        match &ops[0] {
            PendingOp::Spawn { components, .. } => {
                let (_, value) = components.iter().find(|(id, _)| *id == position).unwrap();
                let pos = value.as_ref().unwrap().as_any().downcast_ref::<Position>().unwrap();
                assert_eq!(pos.x, 5.0, "spawn snapshot reflects final live state");
            }
            other => panic!("expected Spawn, got {other:?}"),
        }
    }

    #[test]
    fn non_replicated_entity_never_enters_pending_ops() {
        let (mut world, position) = world_with_position();
        let entity = world.spawn(vec![(position, Some(Box::new(Position { x: 0.0, y: 0.0 })))]);
        world.set_component_value(entity, position, Box::new(Position { x: 9.0, y: 9.0 }), None);
        assert!(world.commit_transaction().is_empty());
    }

    #[test]
    fn despawn_then_rollback_restores_the_entity() {
        let (mut world, position) = world_with_position();
        let entity = world.spawn(vec![(position, Some(Box::new(Position { x: 1.0, y: 1.0 })))]);
        world.advance_tick(); // tick 0 -> 1
        world.despawn(entity);
        world.advance_tick(); // tick 1 -> 2
        assert!(!world.is_live(entity));
        world.rollback_to_tick(1).unwrap();
        assert!(world.is_live(entity), "undo of despawn restores the entity");
        let value = world.get_component_value(entity, position).unwrap();
        assert_eq!(value.as_any().downcast_ref::<Position>().unwrap().x, 1.0);
    }

    #[test]
    fn rollback_out_of_window_errors() {
        let (mut world, _position) = world_with_position();
        world.advance_tick();
        let err = world.rollback_to_tick(999).unwrap_err();
        assert!(matches!(err, WorldError::RollbackOutOfWindow { .. }));
    }

    #[test]
    fn rollback_to_current_tick_is_a_no_op() {
        let (mut world, _position) = world_with_position();
        assert!(world.rollback_to_tick(0).is_ok());
        assert_eq!(world.tick(), 0);
    }

    #[test]
    fn resources_roundtrip_by_type() {
        let mut world = World::new(WorldConfig::builder(1).build());
        world.add_resource(Vec::<&'static str>::new());
        world.get_resource_mut::<Vec<&'static str>>().unwrap().push("a");
        assert_eq!(world.get_resource::<Vec<&'static str>>().unwrap().as_slice(), &["a"]);
    }

    #[test]
    fn rebind_moves_dense_slot_and_graph_membership() {
        let (mut world, position) = world_with_position();
        let (predicted, _key) = world.spawn_predicted(vec![(position, Some(Box::new(Position { x: 1.0, y: 1.0 })))]);
        let authoritative = Entity::new(0, 500);
        world.domains_mut().domain_mut(0).mark_live(500);
        world.rebind_entity(predicted, authoritative);
        assert!(!world.is_live(predicted));
        assert!(world.is_live(authoritative));
    }
}
