//! Runtime view of target-program objects.
//!
//! The engine never owns objects of the target program. Everything it stores is an
//! [`ObjectId`], an opaque, address-derived identity handed out by the host bridge,
//! and everything it needs to *read* from a live container goes through the
//! [`ContainerAccess`] trait, implemented by the bridge for the duration of one hot-path
//! call.
//!
//! Map entries are recorded as [`MapEntryRef`] pairs: the identity of the key and the
//! identity of the value at the time of the mutation. Element equality throughout the
//! engine is identity equality; value equality of target objects is never consulted.

use crate::utils::identity::{identity_hash, IdentityKey};

/// Opaque identity of an object in the target program.
///
/// Assigned by the host bridge (address-derived, stable for the lifetime of the object).
/// Two `ObjectId`s are equal exactly when they denote the same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

/// One logical map entry, wrapped as an identity pair.
///
/// The hash combines the identity of the key *and* the value, and is computed once at
/// construction.
#[derive(Debug, Clone, Copy)]
pub struct MapEntryRef {
    key: ObjectId,
    value: ObjectId,
    hash: u32,
}

impl MapEntryRef {
    /// Wrap a key/value identity pair.
    #[must_use]
    pub fn new(key: ObjectId, value: ObjectId) -> Self {
        let hash = identity_hash(key)
            .wrapping_mul(31)
            .wrapping_add(identity_hash(value));
        MapEntryRef { key, value, hash }
    }

    /// Identity of the entry's key.
    #[must_use]
    pub fn key(&self) -> ObjectId {
        self.key
    }

    /// Identity of the entry's value.
    #[must_use]
    pub fn value(&self) -> ObjectId {
        self.value
    }
}

impl PartialEq for MapEntryRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl Eq for MapEntryRef {}

impl std::hash::Hash for MapEntryRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

/// What a modification record points at: a plain element or a map entry.
///
/// This is both the element reference stored in history records and the key type of
/// [`crate::utils::multiset::Multiset`] snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementRef {
    /// An element of a collection, by identity.
    Object(IdentityKey),
    /// One logical entry of a map.
    Entry(MapEntryRef),
}

impl ElementRef {
    /// Wrap a collection element.
    #[must_use]
    pub fn object(id: ObjectId) -> Self {
        ElementRef::Object(IdentityKey::new(id))
    }

    /// Wrap a map entry.
    #[must_use]
    pub fn entry(key: ObjectId, value: ObjectId) -> Self {
        ElementRef::Entry(MapEntryRef::new(key, value))
    }
}

/// A snapshot of a live container's contents, taken by the host bridge.
///
/// For collections, one identity per element; for maps, one identity pair per entry.
#[derive(Debug, Clone)]
pub enum ContainerContents {
    /// Elements of a list or set, in iteration order.
    Collection(Vec<ObjectId>),
    /// Entries of a map, in iteration order.
    Map(Vec<(ObjectId, ObjectId)>),
}

/// Access to a live container instance during a hot-path call.
///
/// Implemented by the host bridge; the engine only borrows it for the duration of the
/// entry point (or, for the field-op tracker, for the lifetime of one instrumented
/// frame's copies map).
pub trait ContainerAccess {
    /// Identity of the container instance.
    fn identity(&self) -> ObjectId;

    /// Internal name of the container's runtime class (e.g. `java/util/ArrayList`).
    fn class_name(&self) -> &str;

    /// Snapshot of the container's current contents.
    fn contents(&self) -> ContainerContents;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_equality_is_identity_of_both_halves() {
        let e1 = MapEntryRef::new(ObjectId(1), ObjectId(2));
        let e2 = MapEntryRef::new(ObjectId(1), ObjectId(2));
        let e3 = MapEntryRef::new(ObjectId(1), ObjectId(3));
        assert_eq!(e1, e2);
        assert_ne!(e1, e3);
    }

    #[test]
    fn test_entry_hash_depends_on_value() {
        // The hash must combine both identities, not the key twice.
        let same_key_a = MapEntryRef::new(ObjectId(7), ObjectId(100));
        let same_key_b = MapEntryRef::new(ObjectId(7), ObjectId(200));

        fn hash_of(e: &MapEntryRef) -> u64 {
            use std::hash::{Hash, Hasher};
            let mut h = std::collections::hash_map::DefaultHasher::new();
            e.hash(&mut h);
            h.finish()
        }

        assert_ne!(hash_of(&same_key_a), hash_of(&same_key_b));
    }
}
