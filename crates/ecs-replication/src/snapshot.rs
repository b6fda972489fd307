//! Full-state snapshots for late-joining or resynchronizing peers (§4.8,
//! §6 "Snapshot").
//!
//! A snapshot is a flat list of per-component blocks rather than a
//! per-entity record, since the store itself is column-major (§3 "SoA
//! component store") and capturing column-by-column avoids re-shaping data
//! the store already holds contiguously.

use ecs_core::{ComponentId, ComponentRegistry, ComponentValue, Entity, SnapshotApplyMode, World};
use ecs_wire::{ByteReader, ByteWriter};

use crate::codec::{decode_value, encode_value, has_payload};
use crate::error::ReplicationResult;

/// Every live, replicated entity's value for one component (or `None` for a
/// tag/relation marker, which carries presence but no payload).
#[derive(Debug, Clone)]
pub struct SnapshotBlock {
    pub component: ComponentId,
    pub entries: Vec<(Entity, Option<Box<dyn ComponentValue>>)>,
}

/// A full-state snapshot at `tick`: `uint32 tick, uint16 block_count`, then
/// per block `varint component_id, uint16 entity_count`, then per entry
/// `varint entity, payload (unless tag)` (§6).
#[derive(Debug, Default)]
pub struct Snapshot {
    pub tick: u32,
    pub blocks: Vec<SnapshotBlock>,
}

impl Snapshot {
    /// Capture the current value of every `components` column across every
    /// live, replicated entity that carries it (§4.8 "Snapshot capture").
    #[must_use]
    pub fn capture(world: &World, components: &[ComponentId]) -> Self {
        let blocks = components
            .iter()
            .map(|&component| {
                let entries = world
                    .replicated_entities_with(component)
                    .into_iter()
                    .map(|entity| (entity, world.get_component_value(entity, component).map(ComponentValue::clone_boxed)))
                    .collect();
                SnapshotBlock { component, entries }
            })
            .collect();
        Self { tick: world.tick() as u32, blocks }
    }

    pub fn encode_body(&self, w: &mut dyn ByteWriter, registry: &ComponentRegistry) -> ReplicationResult<()> {
        w.write_u32(self.tick);
        w.write_u16(self.blocks.len() as u16);
        for block in &self.blocks {
            w.write_varint(u64::from(block.component.index()));
            w.write_u16(block.entries.len() as u16);
            let carries_payload = has_payload(registry, block.component);
            for (entity, value) in &block.entries {
                w.write_varint(u64::from(entity.to_bits()));
                if carries_payload {
                    if let Some(value) = value {
                        encode_value(w, registry, block.component, value.as_ref())?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn decode_body(r: &mut dyn ByteReader, registry: &ComponentRegistry) -> ReplicationResult<Self> {
        let tick = r.read_u32()?;
        let block_count = r.read_u16()?;
        let mut blocks = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            let component = ComponentId::from_raw(r.read_varint()? as u32);
            let entity_count = r.read_u16()?;
            let carries_payload = has_payload(registry, component);
            let mut entries = Vec::with_capacity(entity_count as usize);
            for _ in 0..entity_count {
                let entity = Entity::from_bits(r.read_varint()? as u32);
                let value = if carries_payload { Some(decode_value(r, registry, component)?) } else { None };
                entries.push((entity, value));
            }
            blocks.push(SnapshotBlock { component, entries });
        }
        Ok(Self { tick, blocks })
    }
}

/// Apply `snapshot` to `world` per `mode` (§4.8 "Snapshot apply modes"):
/// `Authoritative` overwrites every value unconditionally via
/// [`World::force_set_component_value`]; `Versioned` goes through the
/// ordinary LWW path stamped with the snapshot's own tick, so a peer that
/// has already simulated past that tick keeps its newer local values.
///
/// Entities the receiver does not yet know about are spawned bare (no
/// components) before their first value is installed, mirroring how
/// [`crate::apply::apply_transaction`] treats an unseen target.
pub fn apply_snapshot(world: &mut World, snapshot: &Snapshot, mode: SnapshotApplyMode) {
    for block in &snapshot.blocks {
        for (entity, value) in &block.entries {
            if !world.is_live(*entity) {
                world.apply_spawn(*entity, vec![], u64::from(snapshot.tick));
            }
            let Some(value) = value else {
                world.apply_add(*entity, block.component, None, u64::from(snapshot.tick));
                continue;
            };
            match mode {
                SnapshotApplyMode::Authoritative => {
                    world.force_set_component_value(*entity, block.component, value.clone_boxed());
                }
                SnapshotApplyMode::Versioned => {
                    if world.has_component(*entity, block.component) {
                        world.set_component_value(*entity, block.component, value.clone_boxed(), Some(u64::from(snapshot.tick)));
                    } else {
                        world.apply_add(*entity, block.component, Some(value.clone_boxed()), u64::from(snapshot.tick));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ecs_core::{ComponentSerde, WorldConfig};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Position(f32, f32);

    fn registry_with_position() -> (World, ComponentId) {
        let mut world = World::new(WorldConfig::builder(1).build());
        let position = world
            .components_mut()
            .register(
                "Position",
                ComponentSerde {
                    bytes_per_element: Some(8),
                    encode: |v, w| {
                        let p = v.as_any().downcast_ref::<Position>().unwrap();
                        w.write_f32(p.0);
                        w.write_f32(p.1);
                        Ok(())
                    },
                    decode: |r| Ok(Box::new(Position(r.read_f32()?, r.read_f32()?))),
                },
            )
            .unwrap();
        (world, position)
    }

    #[test]
    fn capture_and_roundtrip_snapshot() {
        let (mut world, position) = registry_with_position();
        let e1 = world.spawn(vec![(position, Some(Box::new(Position(1.0, 2.0))))]);
        let e2 = world.spawn(vec![(position, Some(Box::new(Position(3.0, 4.0))))]);
        world.commit_transaction();

        let snapshot = Snapshot::capture(&world, &[position]);
        assert_eq!(snapshot.blocks.len(), 1);
        assert_eq!(snapshot.blocks[0].entries.len(), 2);

        let mut w = ecs_wire::VecWriter::new();
        snapshot.encode_body(&mut w, world.components()).unwrap();
        let mut r = ecs_wire::SliceReader::new(w.as_slice());
        let decoded = Snapshot::decode_body(&mut r, world.components()).unwrap();

        assert_eq!(decoded.tick, snapshot.tick);
        let mut entities: Vec<Entity> = decoded.blocks[0].entries.iter().map(|(e, _)| *e).collect();
        entities.sort_by_key(Entity::to_bits);
        let mut expected = vec![e1, e2];
        expected.sort_by_key(Entity::to_bits);
        assert_eq!(entities, expected);
    }

    #[test]
    fn versioned_apply_does_not_clobber_newer_local_write() {
        let (mut world, position) = registry_with_position();
        let e1 = world.spawn(vec![(position, Some(Box::new(Position(0.0, 0.0))))]);
        world.commit_transaction();
        for _ in 0..20 {
            world.advance_tick();
        }
        world.set_component_value(e1, position, Box::new(Position(9.0, 9.0)), None);

        let stale = Snapshot {
            tick: 1,
            blocks: vec![SnapshotBlock { component: position, entries: vec![(e1, Some(Box::new(Position(1.0, 1.0))))] }],
        };
        apply_snapshot(&mut world, &stale, SnapshotApplyMode::Versioned);

        let value = world.get_component_value(e1, position).unwrap().as_any().downcast_ref::<Position>().unwrap();
        assert_eq!(*value, Position(9.0, 9.0));
    }

    #[test]
    fn authoritative_apply_always_overwrites() {
        let (mut world, position) = registry_with_position();
        let e1 = world.spawn(vec![(position, Some(Box::new(Position(0.0, 0.0))))]);
        world.commit_transaction();
        world.set_component_value(e1, position, Box::new(Position(9.0, 9.0)), None);

        let stale = Snapshot {
            tick: 1,
            blocks: vec![SnapshotBlock { component: position, entries: vec![(e1, Some(Box::new(Position(1.0, 1.0))))] }],
        };
        apply_snapshot(&mut world, &stale, SnapshotApplyMode::Authoritative);

        let value = world.get_component_value(e1, position).unwrap().as_any().downcast_ref::<Position>().unwrap();
        assert_eq!(*value, Position(1.0, 1.0));
    }
}
