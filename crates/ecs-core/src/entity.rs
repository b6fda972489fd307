//! Entity identifiers and per-domain allocation.
//!
//! An [`Entity`] packs an 11-bit `domain_id` and a 20-bit `local_id` into a
//! single 31-bit integer. There is no generation counter: collision-freedom
//! across peers comes from each domain being allocated by exactly one peer,
//! not from reusing a slot under a fresh generation the way a single-process
//! ECS would.

use std::fmt;

/// Domain reserved for client-side predicted spawns. Entities here are
/// never authoritative.
pub const TRANSIENT_DOMAIN: u16 = 2046;

/// Domain reserved for ephemeral command entities.
pub const COMMAND_DOMAIN: u16 = 2047;

const LOCAL_ID_BITS: u32 = 20;
const LOCAL_ID_MASK: u32 = (1 << LOCAL_ID_BITS) - 1;
const DOMAIN_ID_BITS: u32 = 11;
const DOMAIN_ID_MASK: u16 = (1 << DOMAIN_ID_BITS) - 1;

/// A globally unique entity identifier: `domain_id:11 | local_id:20`.
///
/// Two entities from different domains sharing the same `local_id` are
/// different entities and get distinct dense storage slots.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(u32);

impl Entity {
    /// Build an entity from its parts.
    ///
    /// # Panics
    /// Panics in debug builds if `domain_id` or `local_id` do not fit their
    /// reserved bit widths -- this indicates a programmer error (an
    /// allocator bug), never peer-supplied input, since wire-decoded
    /// entities always round-trip through [`Entity::from_bits`].
    #[must_use]
    pub const fn new(domain_id: u16, local_id: u32) -> Self {
        debug_assert!(domain_id <= DOMAIN_ID_MASK, "domain_id exceeds 11 bits");
        debug_assert!(local_id <= LOCAL_ID_MASK, "local_id exceeds 20 bits");
        Self(((domain_id as u32) << LOCAL_ID_BITS) | (local_id & LOCAL_ID_MASK))
    }

    /// The domain that owns this entity.
    #[must_use]
    pub const fn domain_id(self) -> u16 {
        (self.0 >> LOCAL_ID_BITS) as u16
    }

    /// The entity's index within its domain.
    #[must_use]
    pub const fn local_id(self) -> u32 {
        self.0 & LOCAL_ID_MASK
    }

    /// True if this entity lives in the reserved transient (predicted)
    /// domain and can therefore never be authoritative.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.domain_id() == TRANSIENT_DOMAIN
    }

    /// True if this entity is an ephemeral command entity.
    #[must_use]
    pub const fn is_command(self) -> bool {
        self.domain_id() == COMMAND_DOMAIN
    }

    /// Raw 31-bit packed representation, as sent on the wire (as a varint).
    #[must_use]
    pub const fn to_bits(self) -> u32 {
        self.0
    }

    /// Reconstruct an entity from its packed representation.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity(d{}:{})", self.domain_id(), self.local_id())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain_id(), self.local_id())
    }
}

/// Per-domain bookkeeping: the next local id to allocate, the monotone
/// replication sequence counter, and the set of currently-live locals.
#[derive(Debug, Default, Clone)]
pub struct Domain {
    next_local_id: u32,
    op_seq: u64,
    live: hashbrown::HashSet<u32>,
    free_list: Vec<u32>,
}

impl Domain {
    /// Allocate the next local id in this domain, preferring a reclaimed
    /// slot over growing `next_local_id`.
    pub fn allocate_local(&mut self) -> u32 {
        let local_id = self.free_list.pop().unwrap_or_else(|| {
            let id = self.next_local_id;
            self.next_local_id += 1;
            id
        });
        self.live.insert(local_id);
        local_id
    }

    /// Reclaim a local id (called on despawn).
    pub fn free_local(&mut self, local_id: u32) {
        if self.live.remove(&local_id) {
            self.free_list.push(local_id);
        }
    }

    /// Advance `next_local_id` past `local_id` if it is not already ahead,
    /// without marking `local_id` itself live. Used when rebinding a
    /// prediction onto an authoritative id allocated by the owning peer so
    /// a later local allocation in this domain can never collide with it.
    pub fn advance_past(&mut self, local_id: u32) {
        if local_id >= self.next_local_id {
            self.next_local_id = local_id + 1;
        }
    }

    #[must_use]
    pub const fn op_seq(&self) -> u64 {
        self.op_seq
    }

    /// Bump and return the sequence number for the next emitted transaction.
    pub fn next_op_seq(&mut self) -> u64 {
        let seq = self.op_seq;
        self.op_seq += 1;
        seq
    }

    /// Record a sequence number observed from a remote transaction,
    /// advancing past it so a later locally-originated transaction (if this
    /// domain is ever rehomed) never reuses it. Out-of-order sequences are
    /// logged by the caller, not rejected here.
    pub fn observe_remote_seq(&mut self, seq: u64) {
        if seq >= self.op_seq {
            self.op_seq = seq + 1;
        }
    }

    #[must_use]
    pub fn is_live(&self, local_id: u32) -> bool {
        self.live.contains(&local_id)
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Mark a specific local id live directly, used when applying a remote
    /// Spawn whose id was allocated by the owning peer.
    pub fn mark_live(&mut self, local_id: u32) {
        self.live.insert(local_id);
        self.advance_past(local_id);
    }
}

/// Tracks one [`Domain`] per possible `domain_id`, lazily created.
#[derive(Debug, Default, Clone)]
pub struct DomainRegistry {
    domains: hashbrown::HashMap<u16, Domain>,
}

impl DomainRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain_mut(&mut self, domain_id: u16) -> &mut Domain {
        self.domains.entry(domain_id).or_default()
    }

    #[must_use]
    pub fn domain(&self, domain_id: u16) -> Option<&Domain> {
        self.domains.get(&domain_id)
    }

    /// Allocate a fresh entity in `domain_id`.
    pub fn spawn_in(&mut self, domain_id: u16) -> Entity {
        let local_id = self.domain_mut(domain_id).allocate_local();
        Entity::new(domain_id, local_id)
    }

    /// Reclaim `entity`'s local id in its domain.
    pub fn despawn(&mut self, entity: Entity) {
        self.domain_mut(entity.domain_id())
            .free_local(entity.local_id());
    }

    #[must_use]
    pub fn is_live(&self, entity: Entity) -> bool {
        self.domain(entity.domain_id())
            .is_some_and(|d| d.is_live(entity.local_id()))
    }
}
