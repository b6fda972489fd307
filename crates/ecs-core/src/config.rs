//! Tunables for a [`crate::World`], grouped the way `rgb-ecs`'s
//! `World::new()` / `World::with_capacity()` split a sensible default from
//! explicit parameters -- here as a builder, since there are more than two
//! knobs worth naming.

/// How a received snapshot's values are reconciled against local state.
///
/// See SPEC_FULL.md §9, "Snapshot strategy selection" -- this is a
/// configuration the sender and receiver are expected to agree on
/// out-of-band; the engine does not negotiate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotApplyMode {
    /// Every cell in the snapshot replaces local state unconditionally.
    Authoritative,
    /// Every cell is applied through ordinary LWW (`set_component_value`
    /// with the snapshot's tick as version).
    #[default]
    Versioned,
}

/// Construction-time tunables for a [`crate::World`].
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// This peer's domain. Only this domain's `next_local_id` advances
    /// locally; all other domains are tracked read-only until a remote
    /// transaction arrives.
    pub domain_id: u16,
    /// Ticks between full history checkpoints.
    pub checkpoint_interval: u64,
    /// Maximum retained checkpoints (oldest is evicted once exceeded).
    pub history_max_checkpoints: usize,
    /// Ticks after which an un-rebound transient-domain prediction is
    /// forcibly despawned by ghost cleanup.
    pub ghost_cleanup_window: u64,
    /// Default mode new snapshots are applied with.
    pub snapshot_apply_mode: SnapshotApplyMode,
}

impl WorldConfig {
    /// Start a builder seeded with the given domain id and otherwise
    /// sensible defaults.
    #[must_use]
    pub const fn builder(domain_id: u16) -> WorldConfigBuilder {
        WorldConfigBuilder {
            config: WorldConfig {
                domain_id,
                checkpoint_interval: 64,
                history_max_checkpoints: 16,
                ghost_cleanup_window: 128,
                snapshot_apply_mode: SnapshotApplyMode::Versioned,
            },
        }
    }
}

/// Builder for [`WorldConfig`].
#[derive(Debug, Clone)]
pub struct WorldConfigBuilder {
    config: WorldConfig,
}

impl WorldConfigBuilder {
    #[must_use]
    pub const fn checkpoint_interval(mut self, ticks: u64) -> Self {
        self.config.checkpoint_interval = ticks;
        self
    }

    #[must_use]
    pub const fn history_max_checkpoints(mut self, max: usize) -> Self {
        self.config.history_max_checkpoints = max;
        self
    }

    #[must_use]
    pub const fn ghost_cleanup_window(mut self, ticks: u64) -> Self {
        self.config.ghost_cleanup_window = ticks;
        self
    }

    #[must_use]
    pub const fn snapshot_apply_mode(mut self, mode: SnapshotApplyMode) -> Self {
        self.config.snapshot_apply_mode = mode;
        self
    }

    #[must_use]
    pub const fn build(self) -> WorldConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = WorldConfig::builder(3).build();
        assert_eq!(cfg.domain_id, 3);
        assert_eq!(cfg.checkpoint_interval, 64);
        assert_eq!(cfg.snapshot_apply_mode, SnapshotApplyMode::Versioned);
    }

    #[test]
    fn builder_overrides() {
        let cfg = WorldConfig::builder(1)
            .checkpoint_interval(10)
            .history_max_checkpoints(4)
            .ghost_cleanup_window(30)
            .snapshot_apply_mode(SnapshotApplyMode::Authoritative)
            .build();
        assert_eq!(cfg.checkpoint_interval, 10);
        assert_eq!(cfg.history_max_checkpoints, 4);
        assert_eq!(cfg.ghost_cleanup_window, 30);
        assert_eq!(cfg.snapshot_apply_mode, SnapshotApplyMode::Authoritative);
    }
}
