//! Component and relation registration.
//!
//! Unlike a compile-time, `TypeId`-keyed registry, components here are
//! registered dynamically by name because component payloads must also be
//! wire-serializable between independently built peer binaries (§6):
//! `TypeId` is a poor fit for that, a stable name plus an explicit codec is.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use ecs_wire::{ByteReader, ByteWriter, WireError};
use hashbrown::HashMap;

use crate::error::{WorldError, WorldResult};

/// Dense identifier for a registered component, tag, or relation.
///
/// Values `>= VIRTUAL_ID_BASE` are **virtual** component ids minted for a
/// specific `(relation, object)` pair rather than assigned by
/// [`ComponentRegistry::register`]; see [`crate::relation::RelationRegistry`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub(crate) u32);

/// Virtual IDs are minted starting here, leaving ample room for
/// explicitly-registered components below it.
pub const VIRTUAL_ID_BASE: u32 = 1_000_000;

impl ComponentId {
    /// Reconstruct a [`ComponentId`] from its raw wire value (§6).
    ///
    /// Peers agree on component ids out of band by registering components
    /// in the same order at startup; the wire format sends the raw integer
    /// rather than the name, so a decoder needs this to turn it back into a
    /// `ComponentId` without going through [`ComponentRegistry`].
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_virtual(self) -> bool {
        self.0 >= VIRTUAL_ID_BASE
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// A type-erased, cloneable component value.
///
/// Any `T: Clone + Debug + Send + Sync + 'static` implements this
/// automatically; component stores hold `Box<dyn ComponentValue>` so that a
/// single [`crate::store::ComponentStore`] can hold arbitrary payload types
/// keyed only by [`ComponentId`].
pub trait ComponentValue: Any + Send + Sync + fmt::Debug {
    fn clone_boxed(&self) -> Box<dyn ComponentValue>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> ComponentValue for T
where
    T: Any + Clone + fmt::Debug + Send + Sync,
{
    fn clone_boxed(&self) -> Box<dyn ComponentValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Clone for Box<dyn ComponentValue> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// The wire codec for a valued component, per §6's serde contract:
/// `encode` writes exactly `bytes_per_element` bytes when that is `Some`,
/// otherwise a self-delimiting encoding (e.g. a length-prefixed `String`).
#[derive(Clone)]
pub struct ComponentSerde {
    pub bytes_per_element: Option<usize>,
    pub encode: fn(&dyn ComponentValue, &mut dyn ByteWriter) -> Result<(), WireError>,
    pub decode: fn(&mut dyn ByteReader) -> Result<Box<dyn ComponentValue>, WireError>,
}

/// What kind of registry entry a [`ComponentId`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Carries a value; has a [`ComponentSerde`].
    Valued,
    /// Presence-only; occupies no storage cell.
    Tag,
    /// A relation marker (e.g. `ChildOf`). Relations may also carry a
    /// value, in which case `Valued` components can additionally be
    /// registered as relations via [`ComponentRegistry::register_relation`].
    Relation,
}

#[derive(Clone)]
pub struct ComponentDef {
    pub id: ComponentId,
    pub name: &'static str,
    pub kind: ComponentKind,
    pub serde: Option<ComponentSerde>,
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("has_serde", &self.serde.is_some())
            .finish()
    }
}

/// Interns component and relation definitions to dense [`ComponentId`]s.
///
/// Virtual IDs for relation pairs are minted by
/// [`crate::relation::RelationRegistry`], which holds a reference to the
/// next-virtual-id counter via [`ComponentRegistry::next_virtual_id`].
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    by_name: HashMap<&'static str, ComponentId>,
    defs: Vec<ComponentDef>,
    next_virtual: AtomicU32,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            defs: Vec::new(),
            next_virtual: AtomicU32::new(VIRTUAL_ID_BASE),
        }
    }

    fn register_inner(
        &mut self,
        name: &'static str,
        kind: ComponentKind,
        serde: Option<ComponentSerde>,
    ) -> WorldResult<ComponentId> {
        if let Some(&id) = self.by_name.get(name) {
            let existing = &self.defs[id.index() as usize];
            let matches = existing.kind == kind
                && existing.serde.as_ref().map(|s| s.bytes_per_element)
                    == serde.as_ref().map(|s| s.bytes_per_element);
            return if matches {
                Ok(id)
            } else {
                Err(WorldError::ComponentRedefinition { name })
            };
        }
        let id = ComponentId(self.defs.len() as u32);
        self.defs.push(ComponentDef {
            id,
            name,
            kind,
            serde,
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Register a valued component. Re-registering the same name with the
    /// same shape returns the existing id (idempotent module init).
    pub fn register(&mut self, name: &'static str, serde: ComponentSerde) -> WorldResult<ComponentId> {
        self.register_inner(name, ComponentKind::Valued, Some(serde))
    }

    /// Register a tag component (no payload, no storage cell).
    pub fn register_tag(&mut self, name: &'static str) -> WorldResult<ComponentId> {
        self.register_inner(name, ComponentKind::Tag, None)
    }

    /// Register a relation marker. Relations are tag-shaped unless `serde`
    /// is supplied, in which case the relation itself also carries a value
    /// (distinct from any per-object virtual id minted for it).
    pub fn register_relation(
        &mut self,
        name: &'static str,
        serde: Option<ComponentSerde>,
    ) -> WorldResult<ComponentId> {
        self.register_inner(name, ComponentKind::Relation, serde)
    }

    #[must_use]
    pub fn get(&self, id: ComponentId) -> Option<&ComponentDef> {
        self.defs.get(id.index() as usize)
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn is_tag(&self, id: ComponentId) -> bool {
        self.get(id).is_some_and(|d| d.kind == ComponentKind::Tag)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentDef> {
        self.defs.iter()
    }

    /// Mint the next virtual component id, for `RelationRegistry` use only.
    pub(crate) fn next_virtual_id(&self) -> ComponentId {
        ComponentId(self.next_virtual.fetch_add(1, Ordering::Relaxed))
    }
}
