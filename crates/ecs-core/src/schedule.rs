//! Systems and schedules: an ordered, sequential list of system functions
//! run once per tick (§4.5 "System + Schedule"). There is no intra-tick
//! parallelism -- a peer's simulation must be bit-for-bit reproducible from
//! its own replicated transaction log, and two systems racing over shared
//! component state would break that.
//!
//! Grounded on the phase-sequencing sketched in the teacher's tick-loop
//! doc comments for the run-in-registration-order shape, and on
//! `legion_systems::schedule::Runnable`'s `reads()`/`writes()` descriptor
//! (one of the other example repos pulled into the pack) for the
//! parameter-descriptor half of §4.5: a system declares the resources/
//! components its parameters touch *before* it runs, the schedule "binds"
//! those parameters (here: checking declared resources are actually present,
//! per §7 "Resource-missing"), then the body executes, then bindings are
//! released. Legion uses the same descriptor to schedule disjoint systems
//! in parallel; this schedule never does since determinism forbids it
//! (§5), but the descriptor is still the thing a future conflict-checking
//! tool (or a human schedule author, per §5's "single-writer at a time"
//! discipline) would read.

use std::any::TypeId;

use crate::component::ComponentId;
use crate::world::World;

/// One parameter a system declares needing. Checked during the schedule's
/// bind phase before the system's body runs, then discarded -- the engine
/// itself never allocates storage for a declared param, since the body
/// still receives the whole [`World`] rather than split per-parameter
/// borrows (§4.5 "bind each parameter ... invoke the body, then release
/// transient bindings").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemParam {
    /// A query/row term reading `component`'s value.
    Read(ComponentId),
    /// A query/row term writing `component`'s value.
    Write(ComponentId),
    /// A resource of this type, read-only.
    ResourceRead(TypeId),
    /// A resource of this type, mutably.
    ResourceWrite(TypeId),
    /// The system spawns, despawns, or adds/removes components via the
    /// `World` it's handed -- declared for documentation purposes, since
    /// those operations are plain `World` methods rather than a separate
    /// command-buffer type in this engine.
    Commands,
}

impl SystemParam {
    /// The resource `TypeId` this param binds, if it is a resource param.
    #[must_use]
    const fn resource_type_id(self) -> Option<TypeId> {
        match self {
            Self::ResourceRead(id) | Self::ResourceWrite(id) => Some(id),
            Self::Read(_) | Self::Write(_) | Self::Commands => None,
        }
    }
}

/// A system: a named function with a declared parameter list, run once per
/// [`Schedule::run`] call.
pub struct System {
    name: &'static str,
    params: Vec<SystemParam>,
    body: Box<dyn FnMut(&mut World) + Send>,
}

impl System {
    pub fn new(name: &'static str, body: impl FnMut(&mut World) + Send + 'static) -> Self {
        Self {
            name,
            params: Vec::new(),
            body: Box::new(body),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn params(&self) -> &[SystemParam] {
        &self.params
    }

    /// Declare a read-only term on `component` (§4.4 "read(C)").
    #[must_use]
    pub fn reads(mut self, component: ComponentId) -> Self {
        self.params.push(SystemParam::Read(component));
        self
    }

    /// Declare a mutating term on `component` (§4.4 "write(C)").
    #[must_use]
    pub fn writes(mut self, component: ComponentId) -> Self {
        self.params.push(SystemParam::Write(component));
        self
    }

    /// Declare a required read-only resource of type `T`. Binding fails
    /// (and the system is skipped for that tick, per §7 "Resource-missing")
    /// if no such resource has been added via `World::add_resource`.
    #[must_use]
    pub fn resource<T: Send + Sync + 'static>(mut self) -> Self {
        self.params.push(SystemParam::ResourceRead(TypeId::of::<T>()));
        self
    }

    /// Declare a required mutable resource of type `T`, same binding rule
    /// as [`Self::resource`].
    #[must_use]
    pub fn resource_mut<T: Send + Sync + 'static>(mut self) -> Self {
        self.params.push(SystemParam::ResourceWrite(TypeId::of::<T>()));
        self
    }

    /// Declare that the system spawns/despawns/adds/removes components.
    #[must_use]
    pub fn commands(mut self) -> Self {
        self.params.push(SystemParam::Commands);
        self
    }

    /// Every declared resource param not currently present on `world`.
    fn missing_resources(&self, world: &World) -> Vec<TypeId> {
        self.params
            .iter()
            .filter_map(|p| p.resource_type_id())
            .filter(|&id| !world.has_resource_dyn(id))
            .collect()
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// An ordered list of systems run sequentially against one [`World`] each
/// tick. `add_system` appends; there is no priority or dependency graph --
/// ordering is exactly registration order, matching §4.5's "systems run in
/// the order they were added, with no reordering for parallelism".
#[derive(Default)]
pub struct Schedule {
    systems: Vec<System>,
}

impl Schedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_system(&mut self, system: System) -> &mut Self {
        self.systems.push(system);
        self
    }

    #[must_use]
    pub fn system_names(&self) -> Vec<&'static str> {
        self.systems.iter().map(System::name).collect()
    }

    /// Run every system once, in order, against `world`. For each system:
    /// bind its declared parameters (here, checking every declared resource
    /// is actually present on `world`), invoke the body if binding
    /// succeeded, then release the binding (§4.5). A system with a missing
    /// required resource is skipped for this tick and logged rather than
    /// invoked -- the engine never fabricates a default resource (§7
    /// "Resource-missing (no-op)"); a schedule author who wants a system to
    /// run regardless should simply not declare that resource as a param. A
    /// system that panics aborts the whole run; the caller's replication/
    /// rollback layer is responsible for deciding whether to retry or
    /// desync-report (§7).
    pub fn run(&mut self, world: &mut World) {
        for system in &mut self.systems {
            let missing = system.missing_resources(world);
            if !missing.is_empty() {
                tracing::warn!(system = system.name, missing = missing.len(), "skipping system: required resource param not bound");
                continue;
            }
            tracing::trace!(system = system.name, params = system.params.len(), "binding system params");
            (system.body)(world);
            tracing::trace!(system = system.name, "released system params");
        }
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schedule")
            .field("systems", &self.system_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;

    #[test]
    fn systems_run_in_registration_order() {
        let mut schedule = Schedule::new();
        let mut world = World::new(WorldConfig::builder(1).build());
        world.add_resource(Vec::<&'static str>::new());

        schedule.add_system(System::new("a", |w: &mut World| {
            w.get_resource_mut::<Vec<&'static str>>().unwrap().push("a");
        }));
        schedule.add_system(System::new("b", |w: &mut World| {
            w.get_resource_mut::<Vec<&'static str>>().unwrap().push("b");
        }));

        schedule.run(&mut world);
        assert_eq!(
            world.get_resource::<Vec<&'static str>>().unwrap().as_slice(),
            &["a", "b"]
        );
    }

    #[test]
    fn system_names_reflects_registration() {
        let mut schedule = Schedule::new();
        schedule.add_system(System::new("movement", |_| {}));
        schedule.add_system(System::new("collision", |_| {}));
        assert_eq!(schedule.system_names(), vec!["movement", "collision"]);
    }
}
