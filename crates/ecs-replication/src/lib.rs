//! Wire bodies and apply logic for replicating an [`ecs_core::World`]
//! across peers: transactions, full snapshots, command entities, and the
//! reconciliation a peer runs when a remote transaction lands out of order
//! (§4.6-§4.10).
//!
//! Component payloads are always encoded/decoded through the sending/
//! receiving peer's own [`ecs_core::ComponentRegistry`] (§2 "component ids
//! are locally assigned, not shared wire constants") -- every body type in
//! this crate therefore takes the registry as an explicit parameter rather
//! than owning one.

mod apply;
mod codec;
mod command;
mod error;
mod ops;
mod reconciliation;
mod snapshot;

pub use apply::{apply_transaction, ApplyReport};
pub use command::{command_cleanup_system, spawn_command_entity, with_command_cleanup, CommandBatch, CommandEntry};
pub use error::{ReplicationError, ReplicationResult};
pub use ops::{OpComponent, ReplicationOp, Transaction};
pub use reconciliation::{apply_remote_transactions_system, ghost_cleanup_system, perform_batch_reconciliation, RemoteTransactionQueue};
pub use snapshot::{apply_snapshot, Snapshot, SnapshotBlock};
