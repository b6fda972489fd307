#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::float_cmp)]

//! A deterministic, archetype-based ECS built for multi-peer replication.
//!
//! # Key concepts
//!
//! - [`entity::Entity`]: a domain-scoped id, `domain_id:11 | local_id:20` --
//!   every peer owns a disjoint range of ids so two peers can spawn
//!   concurrently without colliding.
//! - [`component::ComponentRegistry`]: components are registered dynamically
//!   by name rather than by `TypeId`, since payloads must also be
//!   wire-serializable between independently built peer binaries.
//! - [`graph::EntityGraph`]: the archetype graph. Entities are grouped by
//!   their exact component set into [`graph::GraphNode`]s connected by
//!   single-component edges, giving O(1) add/remove transitions.
//! - [`store::ComponentStore`]: dense, per-component storage keyed by
//!   [`dense::DenseIndex`], decoupled from archetype membership so migrating
//!   an entity between nodes never moves its component data.
//! - [`relation::RelationRegistry`]: relationships between entities, modeled
//!   as virtual components minted per `(relation, object)` pair.
//! - [`history::History`] and [`ops::UndoOp`]: checkpoint-plus-undo-log
//!   machinery backing [`world::World::rollback_to_tick`].
//!
//! [`world::World`] ties all of the above together and is the crate's single
//! point of mutation.

mod component;
mod config;
mod dense;
mod entity;
mod error;
mod graph;
mod history;
mod ops;
mod query;
mod relation;
mod schedule;
mod store;
mod transient;
mod vecset;
mod world;

pub use component::{
    ComponentDef, ComponentId, ComponentKind, ComponentRegistry, ComponentSerde, ComponentValue,
    VIRTUAL_ID_BASE,
};
pub use config::{SnapshotApplyMode, WorldConfig, WorldConfigBuilder};
pub use dense::{DenseIndex, DenseIndexTable};
pub use entity::{Domain, DomainRegistry, Entity, COMMAND_DOMAIN, TRANSIENT_DOMAIN};
pub use error::{WorldError, WorldResult};
pub use graph::{
    EntityGraph, GraphChange, GraphChangeLog, GraphFlush, GraphMoveBatch, GraphNode, ListenerId,
    NodeId, NodeStrategy,
};
pub use history::{Checkpoint, History};
pub use ops::{PendingOp, UndoBatch, UndoOp};
pub use query::{JoinQuery, Query, QueryBuilder, QueryRow, ReactiveQuery, UniqueQuery};
pub use relation::RelationRegistry;
pub use schedule::{Schedule, System, SystemParam};
pub use store::{make_version, version_domain, version_tick, Column, ComponentStore};
pub use transient::{TransientEntry, TransientRegistry};
pub use vecset::CompSet;
pub use world::{causal_key, CommandBuffer, ComponentInit, World};

/// Convenient glob import of the commonly used types.
pub mod prelude {
    pub use crate::{
        CompSet, ComponentId, ComponentRegistry, ComponentValue, Entity, Query, QueryBuilder,
        Schedule, World, WorldConfig, WorldError, WorldResult,
    };
}
