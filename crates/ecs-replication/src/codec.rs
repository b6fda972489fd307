//! Shared component-payload helpers. Transactions, snapshots, and commands
//! all embed the same "serde-encoded payload unless tag" convention and the
//! same `(relation_id, object)` rel pair (§6), so the three wire bodies
//! share this one codec rather than each re-deriving it.

use ecs_core::{ComponentId, ComponentRegistry, ComponentValue, Entity};
use ecs_wire::{ByteReader, ByteWriter};

use crate::error::{ReplicationError, ReplicationResult};

/// Whether `id` carries a payload on the wire at all. Tags and relation
/// markers registered without a value have none; virtual relation ids are
/// never looked up here at all, since they never appear as a standalone
/// `id` field on the wire (see `ops.rs` module doc).
pub(crate) fn has_payload(registry: &ComponentRegistry, id: ComponentId) -> bool {
    registry.get(id).is_some_and(|def| def.serde.is_some())
}

pub(crate) fn encode_value(
    w: &mut dyn ByteWriter,
    registry: &ComponentRegistry,
    id: ComponentId,
    value: &dyn ComponentValue,
) -> ReplicationResult<()> {
    let def = registry.get(id).ok_or(ReplicationError::UnknownComponent(id))?;
    let serde = def.serde.as_ref().ok_or(ReplicationError::MissingSerde(id))?;
    (serde.encode)(value, w)?;
    Ok(())
}

pub(crate) fn decode_value(
    r: &mut dyn ByteReader,
    registry: &ComponentRegistry,
    id: ComponentId,
) -> ReplicationResult<Box<dyn ComponentValue>> {
    let def = registry.get(id).ok_or(ReplicationError::UnknownComponent(id))?;
    let serde = def.serde.as_ref().ok_or(ReplicationError::MissingSerde(id))?;
    Ok((serde.decode)(r)?)
}

/// `uint8 has_rel; if 1 then varint relation_id, varint object` (§6).
pub(crate) fn encode_rel(w: &mut dyn ByteWriter, rel: Option<(ComponentId, Entity)>) {
    match rel {
        Some((relation, object)) => {
            w.write_bool(true);
            w.write_varint(u64::from(relation.index()));
            w.write_varint(u64::from(object.to_bits()));
        }
        None => w.write_bool(false),
    }
}

pub(crate) fn decode_rel(r: &mut dyn ByteReader) -> ReplicationResult<Option<(ComponentId, Entity)>> {
    if r.read_bool()? {
        let relation = ComponentId::from_raw(r.read_varint()? as u32);
        let object = Entity::from_bits(r.read_varint()? as u32);
        Ok(Some((relation, object)))
    } else {
        Ok(None)
    }
}
