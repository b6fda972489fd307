//! The in-process mutation log a [`crate::World`] records while a tick runs,
//! and the undo entries needed to reverse it (§3 "Pending per-tick state",
//! §4.9 "Undo log").
//!
//! These are *not* the wire-level replication types -- `ecs-replication`
//! mirrors [`PendingOp`] into its own `ReplicationOp`/`Transaction` once a
//! tick commits, attaching the domain id, sequence number, and wire codec.
//! Keeping the two separate lets `ecs-core` stay free of any notion of
//! peers, sequence numbers, or wire framing.

use crate::component::ComponentId;
use crate::entity::Entity;

/// One structural or value mutation recorded during a tick, in the order it
/// happened. [`crate::World::commit_transaction`] reduces a tick's ops
/// before handing them to the caller (§4.7).
#[derive(Debug)]
pub enum PendingOp {
    /// A new entity came into existence, carrying its full component set at
    /// spawn time. `causal_key` is set only for predicted spawns in the
    /// transient domain (§3 "Transient registry").
    Spawn {
        entity: Entity,
        components: Vec<(ComponentId, Option<Box<dyn crate::component::ComponentValue>>)>,
        causal_key: Option<u64>,
    },
    /// An entity was destroyed.
    Despawn { entity: Entity },
    /// A value write. `version` is `None` when the write should stamp the
    /// current tick/domain version rather than carrying an explicit one
    /// (§4.6 "Set").
    Set {
        entity: Entity,
        component: ComponentId,
        value: Box<dyn crate::component::ComponentValue>,
        version: Option<u64>,
    },
    /// A structural add, optionally carrying an initial value.
    Add {
        entity: Entity,
        component: ComponentId,
        value: Option<Box<dyn crate::component::ComponentValue>>,
    },
    /// A structural remove.
    Remove { entity: Entity, component: ComponentId },
}

impl PendingOp {
    #[must_use]
    pub const fn entity(&self) -> Entity {
        match *self {
            Self::Spawn { entity, .. }
            | Self::Despawn { entity }
            | Self::Set { entity, .. }
            | Self::Add { entity, .. }
            | Self::Remove { entity, .. } => entity,
        }
    }
}

/// The inverse of one mutation, replayed in reverse tick order by
/// [`crate::World::rollback_to_tick`] to undo everything past a target tick
/// that a checkpoint doesn't already cover (§4.9 "Undo log").
#[derive(Debug)]
pub enum UndoOp {
    /// Undoing a spawn is a despawn.
    UndoSpawn { entity: Entity },
    /// Undoing a despawn restores every component the entity carried.
    UndoDespawn {
        entity: Entity,
        components: Vec<(ComponentId, Option<Box<dyn crate::component::ComponentValue>>)>,
    },
    /// Undoing a structural add removes the component again.
    UndoAdd { entity: Entity, component: ComponentId },
    /// Undoing a structural remove (or an overwriting `Set`) restores the
    /// prior value and version, if the cell held one.
    UndoRemove {
        entity: Entity,
        component: ComponentId,
        prior_value: Option<Box<dyn crate::component::ComponentValue>>,
        prior_version: Option<u64>,
    },
}

/// One tick's worth of undo entries, batched for [`crate::history::History`].
#[derive(Debug, Default)]
pub struct UndoBatch {
    pub tick: u64,
    pub entries: Vec<UndoOp>,
}
