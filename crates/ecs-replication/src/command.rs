//! Command entities: ephemeral intents spawned in the reserved command
//! domain (2047) and torn down at the end of the tick that created them
//! (§4.10 "Command entities", §9 "Command entities are a pattern").
//!
//! A command is not a wire primitive of its own kind beyond its framing --
//! it is a normal entity related to its target via a `CommandOf`-style
//! relation, so the same query algebra that matches any other relationship
//! also matches "entity X with CommandOf -> target". This module supplies
//! the spawn/cleanup convenience around that pattern plus the Command
//! message body codec (§6).

use ecs_core::{ComponentId, ComponentInit, ComponentRegistry, ComponentValue, Entity, Schedule, System, World};
use ecs_wire::{ByteReader, ByteWriter};

use crate::codec::{decode_value, encode_value, has_payload};
use crate::error::ReplicationResult;

/// One `(target, component_id, data?)` entry in a Command body (§6).
#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub target: Entity,
    pub component: ComponentId,
    pub value: Option<Box<dyn ComponentValue>>,
}

/// A full Command message body: `uint16 command_count`, then per command
/// `varint target, varint component_id, payload (unless tag)` (§6).
#[derive(Debug, Default)]
pub struct CommandBatch {
    pub commands: Vec<CommandEntry>,
}

impl CommandBatch {
    pub fn encode_body(&self, w: &mut dyn ByteWriter, registry: &ComponentRegistry) -> ReplicationResult<()> {
        w.write_u16(self.commands.len() as u16);
        for cmd in &self.commands {
            w.write_varint(u64::from(cmd.target.to_bits()));
            w.write_varint(u64::from(cmd.component.index()));
            if has_payload(registry, cmd.component) {
                if let Some(value) = &cmd.value {
                    encode_value(w, registry, cmd.component, value.as_ref())?;
                }
            }
        }
        Ok(())
    }

    pub fn decode_body(r: &mut dyn ByteReader, registry: &ComponentRegistry) -> ReplicationResult<Self> {
        let count = r.read_u16()?;
        let mut commands = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let target = Entity::from_bits(r.read_varint()? as u32);
            let component = ComponentId::from_raw(r.read_varint()? as u32);
            let value = if has_payload(registry, component) {
                Some(decode_value(r, registry, component)?)
            } else {
                None
            };
            commands.push(CommandEntry { target, component, value });
        }
        Ok(Self { commands })
    }
}

/// Spawn a command entity carrying `components`, related to `target` via
/// `command_of` (§9). The caller is responsible for scheduling
/// [`command_cleanup_system`] so it is torn down at end-of-tick.
pub fn spawn_command_entity(
    world: &mut World,
    target: Entity,
    command_of: ComponentId,
    components: Vec<ComponentInit>,
) -> Entity {
    let entity = world.spawn_command(components);
    world.apply_relationship(entity, command_of, target);
    entity
}

/// A system that despawns every live command-domain entity, for schedules
/// that consume commands earlier in the same tick (§4.10 "systems tear them
/// down at the end of the tick in which they were created").
#[must_use]
pub fn command_cleanup_system() -> System {
    System::new("command_cleanup", |world: &mut World| {
        let commands: Vec<Entity> = world
            .graph()
            .iter_nodes()
            .flat_map(|node| node.entities().iter().copied())
            .filter(|e| e.is_command())
            .collect();
        for entity in commands {
            world.despawn(entity);
        }
    })
}

/// Convenience for registering cleanup as the last system of a schedule.
pub fn with_command_cleanup(schedule: &mut Schedule) -> &mut Schedule {
    schedule.add_system(command_cleanup_system())
}

#[cfg(test)]
mod tests {
    use ecs_core::WorldConfig;

    use super::*;

    #[test]
    fn spawn_command_entity_links_to_target_and_lives_in_command_domain() {
        let mut world = World::new(WorldConfig::builder(1).build());
        let command_of = world.components_mut().register_relation("CommandOf", None).unwrap();
        let target = world.spawn(vec![]);

        let cmd = spawn_command_entity(&mut world, target, command_of, vec![]);

        assert!(cmd.is_command());
        assert!(world.has_component(cmd, command_of) || world.relations().subjects_of(target).iter().any(|&(s, r)| s == cmd && r == command_of));
    }

    #[test]
    fn cleanup_system_despawns_every_command_entity() {
        let mut world = World::new(WorldConfig::builder(1).build());
        let command_of = world.components_mut().register_relation("CommandOf", None).unwrap();
        let target = world.spawn(vec![]);
        let cmd = spawn_command_entity(&mut world, target, command_of, vec![]);

        let mut schedule = Schedule::new();
        with_command_cleanup(&mut schedule);
        schedule.run(&mut world);

        assert!(!world.is_live(cmd));
        assert!(world.is_live(target));
    }

    #[test]
    fn command_batch_roundtrips() {
        let mut world = World::new(WorldConfig::builder(1).build());
        let tag = world.components_mut().register_tag("FireCommand").unwrap();
        let batch = CommandBatch {
            commands: vec![CommandEntry { target: Entity::new(1, 4), component: tag, value: None }],
        };
        let mut w = ecs_wire::VecWriter::new();
        batch.encode_body(&mut w, world.components()).unwrap();
        let mut r = ecs_wire::SliceReader::new(w.as_slice());
        let decoded = CommandBatch::decode_body(&mut r, world.components()).unwrap();
        assert_eq!(decoded.commands.len(), 1);
        assert_eq!(decoded.commands[0].target, Entity::new(1, 4));
    }
}
