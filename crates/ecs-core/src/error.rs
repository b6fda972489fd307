use thiserror::Error;

use crate::entity::Entity;

/// Errors surfaced by [`crate::World`] and the registries it owns.
///
/// Per the error-handling design, most peer-driven anomalies (out-of-order
/// sequence numbers, unknown op codes, ops targeting an already-dead entity)
/// are logged via `tracing::warn!` and do not reach this type at all -- it is
/// reserved for programmer errors and the small set of fallible entry points
/// (component (re)registration, rollback) that a caller must be able to
/// inspect.
#[derive(Debug, Error)]
pub enum WorldError {
    /// A component name was registered twice with incompatible shapes
    /// (tag vs. valued, or a different `bytes_per_element`).
    #[error("component `{name}` already registered with a different shape")]
    ComponentRedefinition {
        /// The conflicting registration name.
        name: &'static str,
    },

    /// A query or API call referenced a component ID the registry never
    /// assigned.
    #[error("component id {0:?} is not registered")]
    UnknownComponent(crate::component::ComponentId),

    /// A relation was used as if it carried virtual IDs, but no such
    /// relation was registered.
    #[error("relation id {0:?} is not registered")]
    UnknownRelation(crate::component::ComponentId),

    /// An operation targeted an entity absent from the world.
    #[error("entity {0:?} does not exist")]
    EntityNotFound(Entity),

    /// `rollback_to_tick` was asked for a tick outside `[oldest_checkpoint, current]`.
    #[error("tick {requested} is outside the retained history window [{oldest}, {current}]")]
    RollbackOutOfWindow {
        /// The tick the caller asked to roll back to.
        requested: u64,
        /// The oldest tick still covered by a retained checkpoint.
        oldest: u64,
        /// The world's current tick.
        current: u64,
    },
}

pub type WorldResult<T> = Result<T, WorldError>;
