//! Errors surfaced by transaction/snapshot/command decoding (§7).
//!
//! Per-op application failures inside [`crate::apply::apply_transaction`] are
//! deliberately *not* represented here -- §7 requires those to degrade to a
//! logged warning and a skipped op rather than fail the whole transaction,
//! so `apply_transaction` always returns `Ok`. This type is reserved for
//! decode-time corruption (a truncated buffer, a component id neither peer
//! registered) where there is no sensible partial result to return.

use ecs_core::{ComponentId, WorldError};
use ecs_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// A transaction/snapshot/command referenced a component id this peer's
    /// registry never assigned -- the two peers' registrations have drifted.
    #[error("component id {0:?} is not registered")]
    UnknownComponent(ComponentId),

    /// A component was used where a payload was expected but it carries no
    /// serde (a tag, or a valueless relation marker).
    #[error("component id {0:?} has no serde")]
    MissingSerde(ComponentId),

    #[error(transparent)]
    World(#[from] WorldError),
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
