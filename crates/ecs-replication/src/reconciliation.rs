//! Reconciling a peer's local simulation against the transactions the
//! network delivers out of order (§4.10 "Reconciliation").
//!
//! Transport never blocks a peer's own tick on a remote transaction's
//! arrival, so by the time one shows up it may target a tick already
//! simulated locally. Two modes are offered, matching §4.10's "stream" and
//! "batch" split:
//!
//! * **Stream** ([`apply_remote_transactions_system`]) -- apply whatever has
//!   arrived for the tick about to run, in arrival order, relying on LWW
//!   (§4.6/§4.7) to resolve any conflict with what local systems are about
//!   to write. Cheap, no rollback, appropriate when remote transactions
//!   rarely target a tick already behind the local simulation.
//! * **Batch** ([`perform_batch_reconciliation`]) -- when a transaction
//!   targets a tick strictly older than the current one, roll back to the
//!   oldest such tick and re-run the schedule forward, re-applying each
//!   tick's queued remote transactions before that tick's systems run, so
//!   local derived state (components computed from the corrected input) is
//!   never left stale from a rollback that undid its inputs.

use std::collections::BTreeMap;

use ecs_core::{Schedule, System, World};

use crate::apply::apply_transaction;
use crate::ops::Transaction;

/// Transactions queued by tick, awaiting application at the right point in
/// the local simulation (§4.10).
#[derive(Debug, Default)]
pub struct RemoteTransactionQueue {
    by_tick: BTreeMap<u64, Vec<Transaction>>,
}

impl RemoteTransactionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tx: Transaction) {
        self.by_tick.entry(u64::from(tx.tick)).or_default().push(tx);
    }

    /// Remove and return every transaction queued for exactly `tick`.
    pub fn drain_tick(&mut self, tick: u64) -> Vec<Transaction> {
        self.by_tick.remove(&tick).unwrap_or_default()
    }

    /// The oldest tick with transactions queued, if any is strictly before
    /// `current` -- the trigger condition for batch reconciliation.
    #[must_use]
    pub fn min_tick_before(&self, current: u64) -> Option<u64> {
        self.by_tick.keys().next().copied().filter(|&t| t < current)
    }

    /// Remove and return every queued transaction with tick `< boundary`,
    /// ordered oldest-tick-first, each tick's batch in arrival order.
    pub fn drain_before(&mut self, boundary: u64) -> Vec<Transaction> {
        let tail = self.by_tick.split_off(&boundary);
        let head = std::mem::replace(&mut self.by_tick, tail);
        head.into_values().flatten().collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_tick.is_empty()
    }
}

/// A system for the "stream" reconciliation mode: apply every transaction
/// queued for the tick about to run, then let the rest of the schedule
/// simulate forward on top of them (§4.10 "stream").
#[must_use]
pub fn apply_remote_transactions_system(queue: std::sync::Arc<parking_lot::Mutex<RemoteTransactionQueue>>) -> System {
    System::new("apply_remote_transactions", move |world: &mut World| {
        let txs = queue.lock().drain_tick(world.tick());
        for tx in &txs {
            match apply_transaction(world, tx) {
                Ok(report) => tracing::trace!(applied = report.applied, skipped = report.skipped, tick = tx.tick, "applied remote transaction"),
                Err(err) => tracing::warn!(%err, tick = tx.tick, "failed to decode/apply remote transaction"),
            }
        }
        world.flush_graph_changes();
    })
}

/// "Batch" reconciliation (§4.10): if `queue` holds any transaction for a
/// tick strictly older than `world`'s current tick, roll back to the oldest
/// such tick and re-simulate forward, re-applying that tick's (and every
/// later queued tick's) remote transactions immediately before `schedule`
/// runs for it. A no-op if nothing in the queue is behind the present.
///
/// If the rollback itself fails (the target fell outside the retained
/// checkpoint/undo window, §4.9), reconciliation degrades to applying every
/// queued transaction directly against the present state -- stale relative
/// to when they were authored, but still LWW-arbitrated, so no data is
/// silently dropped (§7 "never fail outright").
pub fn perform_batch_reconciliation(world: &mut World, schedule: &mut Schedule, queue: &mut RemoteTransactionQueue) {
    let Some(target) = queue.min_tick_before(world.tick()) else {
        return;
    };
    let final_tick = world.tick();

    if world.rollback_to_tick(target).is_err() {
        tracing::warn!(target, "batch reconciliation rollback out of window; applying remote transactions directly");
        for tx in queue.drain_before(final_tick + 1) {
            let _ = apply_transaction(world, &tx);
        }
        world.flush_graph_changes();
        return;
    }

    while world.tick() < final_tick {
        for tx in queue.drain_tick(world.tick()) {
            let _ = apply_transaction(world, &tx);
        }
        world.flush_graph_changes();
        schedule.run(world);
        world.advance_tick();
    }
    for tx in queue.drain_tick(world.tick()) {
        let _ = apply_transaction(world, &tx);
    }
    world.flush_graph_changes();
}

/// A system wrapper around [`World::ghost_cleanup`], for schedules that run
/// it on a cadence rather than calling it directly (§4.10 "Ghost cleanup").
#[must_use]
pub fn ghost_cleanup_system() -> System {
    System::new("ghost_cleanup", |world: &mut World| {
        let despawned = world.ghost_cleanup();
        if !despawned.is_empty() {
            tracing::debug!(count = despawned.len(), "ghost cleanup despawned unconfirmed predictions");
        }
    })
}
