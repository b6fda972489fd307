//! Checkpoints and the undo log backing [`crate::World::rollback_to_tick`]
//! (§4.9 "History, Undo, and Rollback").
//!
//! A [`Checkpoint`] is a full, deep-cloned snapshot taken every
//! `checkpoint_interval` ticks. Between checkpoints, every mutation appends
//! an inverse [`crate::ops::UndoOp`] to the tick's [`crate::ops::UndoBatch`].
//! Rolling back to a tick that exactly matches a retained checkpoint is a
//! direct restore; rolling back to any other in-window tick is done by
//! replaying undo batches in reverse from the live state, which is always
//! correct for ticks at or after the oldest retained checkpoint because
//! batches older than that checkpoint are pruned together with it.

use std::collections::VecDeque;

use crate::dense::DenseIndexTable;
use crate::graph::EntityGraph;
use crate::ops::UndoBatch;
use crate::relation::RelationRegistry;
use crate::store::ComponentStore;

/// A full, deep-cloned world snapshot taken at `tick`.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub tick: u64,
    pub store: ComponentStore,
    pub dense: DenseIndexTable,
    pub graph: EntityGraph,
    pub relations: RelationRegistry,
}

/// Retained checkpoints plus the undo batches covering every tick since the
/// oldest one, bounding the rollback window to `[oldest_retained, current]`.
#[derive(Debug, Default)]
pub struct History {
    checkpoints: VecDeque<Checkpoint>,
    undo_batches: VecDeque<UndoBatch>,
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_checkpoint(&mut self, checkpoint: Checkpoint, max_checkpoints: usize) {
        self.checkpoints.push_back(checkpoint);
        while self.checkpoints.len() > max_checkpoints.max(1) {
            self.checkpoints.pop_front();
        }
        let oldest = self.oldest_tick();
        self.undo_batches.retain(|batch| batch.tick >= oldest);
    }

    pub fn push_undo_batch(&mut self, batch: UndoBatch) {
        if !batch.entries.is_empty() {
            self.undo_batches.push_back(batch);
        }
    }

    /// The oldest tick still reachable, i.e. the oldest retained checkpoint's
    /// tick, or `0` if no checkpoint has been taken yet.
    #[must_use]
    pub fn oldest_tick(&self) -> u64 {
        self.checkpoints.front().map_or(0, |c| c.tick)
    }

    #[must_use]
    pub fn checkpoint_at(&self, tick: u64) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.tick == tick)
    }

    /// Remove and return the undo batch recorded for `tick`, if any.
    pub fn take_undo_batch(&mut self, tick: u64) -> Option<UndoBatch> {
        let pos = self.undo_batches.iter().position(|b| b.tick == tick)?;
        self.undo_batches.remove(pos)
    }

    /// Drop every undo batch and checkpoint newer than `tick`, called after
    /// a rollback lands the world at `tick` so stale future history doesn't
    /// linger (re-simulation will generate fresh batches as it replays
    /// forward).
    pub fn discard_after(&mut self, tick: u64) {
        self.undo_batches.retain(|b| b.tick <= tick);
        self.checkpoints.retain(|c| c.tick <= tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::UndoOp;

    fn dummy_checkpoint(tick: u64) -> Checkpoint {
        Checkpoint {
            tick,
            store: ComponentStore::new(),
            dense: DenseIndexTable::new(),
            graph: EntityGraph::new(),
            relations: RelationRegistry::new(),
        }
    }

    #[test]
    fn oldest_tick_tracks_eviction() {
        let mut history = History::new();
        history.push_checkpoint(dummy_checkpoint(0), 2);
        history.push_checkpoint(dummy_checkpoint(10), 2);
        assert_eq!(history.oldest_tick(), 0);
        history.push_checkpoint(dummy_checkpoint(20), 2);
        assert_eq!(history.oldest_tick(), 10, "oldest checkpoint evicted once over capacity");
    }

    #[test]
    fn undo_batches_older_than_oldest_checkpoint_are_pruned() {
        let mut history = History::new();
        history.push_undo_batch(UndoBatch {
            tick: 1,
            entries: vec![UndoOp::UndoAdd {
                entity: crate::entity::Entity::new(0, 0),
                component: crate::component::ComponentId::from_raw(1),
            }],
        });
        history.push_checkpoint(dummy_checkpoint(0), 1);
        history.push_checkpoint(dummy_checkpoint(5), 1);
        assert!(history.take_undo_batch(1).is_none(), "batch before new oldest checkpoint dropped");
    }

    #[test]
    fn checkpoint_at_exact_tick_is_found() {
        let mut history = History::new();
        history.push_checkpoint(dummy_checkpoint(64), 4);
        assert!(history.checkpoint_at(64).is_some());
        assert!(history.checkpoint_at(63).is_none());
    }
}
