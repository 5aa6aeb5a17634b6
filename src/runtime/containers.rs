//! The global identity-keyed table of tracked containers.
//!
//! Every container that has ever been assigned to a tracked field is registered here
//! with a fresh [`ContainerLock`]. Lookups and inserts share one small mutex; the
//! per-container locks themselves are never held while the table mutex is.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::{object::ObjectId, runtime::lock::ContainerLock, utils::IdentityKey};

/// Identity-keyed map from container to its lock state.
#[derive(Default)]
pub struct ContainerTable {
    inner: Mutex<FxHashMap<IdentityKey, Arc<ContainerLock>>>,
}

impl ContainerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        ContainerTable::default()
    }

    /// Register a container, attaching a fresh lock if it is new. Idempotent.
    pub fn register(&self, container: ObjectId) {
        let mut inner = lock!(self.inner);
        inner
            .entry(IdentityKey::new(container))
            .or_insert_with(|| Arc::new(ContainerLock::new()));
    }

    /// Look up a container's lock; `None` when the container was never tracked.
    #[must_use]
    pub fn get(&self, container: ObjectId) -> Option<Arc<ContainerLock>> {
        let inner = lock!(self.inner);
        inner.get(&IdentityKey::new(container)).cloned()
    }

    /// Drop containers whose identities pass `evict`.
    pub fn retain(&self, mut keep: impl FnMut(ObjectId) -> bool) {
        let mut inner = lock!(self.inner);
        inner.retain(|key, _| keep(key.object()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let table = ContainerTable::new();
        table.register(ObjectId(1));
        let first = table.get(ObjectId(1)).unwrap();
        table.register(ObjectId(1));
        let second = table.get(ObjectId(1)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_container_has_no_lock() {
        let table = ContainerTable::new();
        assert!(table.get(ObjectId(99)).is_none());
    }
}
