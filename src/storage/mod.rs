//! The modification-history store.
//!
//! Two concurrent maps (field locators to field-modification lists, container
//! identities to container-modification lists) guarded by a readers/writer lock over
//! **settings only**. Hot-path appends take the read side and run in parallel with
//! each other; enable/disable/clear take the write side and drain all in-flight
//! appends first. Each history list carries its own short-critical-section mutex that
//! serializes append against read on that single list.
//!
//! The trackers table maps each container identity to the set of field identifiers
//! that ever assigned it, so mutator deltas can be attributed and containers whose
//! last tracker is cleared can be evicted.

pub mod stack;

use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use rustc_hash::FxHashSet;

use crate::{
    object::{ElementRef, ObjectId},
    storage::stack::{CapturedStack, StackProvider},
    utils::identity::{identity_hash, IdentityKey},
};

/// Identity of a tracked field instance: declaring class, field name, and owning
/// object (`None` for statics).
#[derive(Debug, Clone)]
pub struct FieldLocator {
    class_name: String,
    field_name: String,
    owner: Option<ObjectId>,
    hash: u32,
}

impl FieldLocator {
    /// Build a locator. `class_name` is the canonical owner's binary name.
    #[must_use]
    pub fn new(class_name: &str, field_name: &str, owner: Option<ObjectId>) -> Self {
        let mut hash = owner.map(identity_hash).unwrap_or(0);
        for part in [class_name, field_name] {
            for byte in part.as_bytes() {
                hash = hash.wrapping_mul(31).wrapping_add(u32::from(*byte));
            }
        }
        FieldLocator {
            class_name: class_name.to_string(),
            field_name: field_name.to_string(),
            owner,
            hash,
        }
    }

    /// The declaring class (binary name).
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The field name.
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }
}

impl PartialEq for FieldLocator {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
            && self.class_name == other.class_name
            && self.field_name == other.field_name
    }
}

impl Eq for FieldLocator {}

impl std::hash::Hash for FieldLocator {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

/// One recorded assignment to a tracked field.
#[derive(Debug, Clone)]
pub struct FieldModification {
    stack: Option<CapturedStack>,
    container: Option<ObjectId>,
}

impl FieldModification {
    /// The container reference assigned to the field (`None` for a null store).
    #[must_use]
    pub fn container(&self) -> Option<ObjectId> {
        self.container
    }

    /// The captured stack, when one was requested and succeeded.
    #[must_use]
    pub fn stack(&self) -> Option<&CapturedStack> {
        self.stack.as_ref()
    }
}

/// One recorded element insertion or removal on a container.
#[derive(Debug, Clone)]
pub struct ContainerModification {
    stack: Option<CapturedStack>,
    element: ElementRef,
    is_addition: bool,
}

impl ContainerModification {
    /// The element (or map entry) that changed.
    #[must_use]
    pub fn element(&self) -> ElementRef {
        self.element
    }

    /// `true` for an insertion, `false` for a removal.
    #[must_use]
    pub fn is_addition(&self) -> bool {
        self.is_addition
    }

    /// The captured stack, when capture succeeded.
    #[must_use]
    pub fn stack(&self) -> Option<&CapturedStack> {
        self.stack.as_ref()
    }
}

#[derive(Default)]
struct FieldHistory {
    entries: Mutex<Vec<FieldModification>>,
}

#[derive(Default)]
struct ContainerHistory {
    entries: Mutex<Vec<ContainerModification>>,
}

fn tracker_id(class_name: &str, field_name: &str) -> String {
    format!("{class_name}{field_name}")
}

/// The shared, concurrently appended history database.
pub struct HistoryStore {
    /// Field identifiers for which history is being saved. Settings lock.
    enabled: RwLock<FxHashSet<String>>,
    fields: DashMap<FieldLocator, FieldHistory>,
    containers: DashMap<IdentityKey, ContainerHistory>,
    trackers: DashMap<IdentityKey, FxHashSet<String>>,
    stacks: Arc<dyn StackProvider>,
}

impl HistoryStore {
    /// Create a store that captures stacks through `stacks`.
    #[must_use]
    pub fn new(stacks: Arc<dyn StackProvider>) -> Self {
        HistoryStore {
            enabled: RwLock::new(FxHashSet::default()),
            fields: DashMap::new(),
            containers: DashMap::new(),
            trackers: DashMap::new(),
            stacks,
        }
    }

    fn capture_stack(&self) -> CapturedStack {
        match self.stacks.capture() {
            Ok(frames) => CapturedStack::from_frames(frames),
            Err(e) => {
                // The record is still appended, with an empty stack.
                log::debug!("stack capture failed: {e}");
                CapturedStack::empty()
            }
        }
    }

    /// Append a field assignment. Hot path: settings read lock, then the
    /// per-locator list mutex.
    pub fn save_field_modification(
        &self,
        class_name: &str,
        field_name: &str,
        owner: Option<ObjectId>,
        container: Option<ObjectId>,
        save_stack: bool,
    ) {
        let enabled = read_lock!(self.enabled);
        if !enabled.contains(&tracker_id(class_name, field_name)) {
            return;
        }

        let locator = FieldLocator::new(class_name, field_name, owner);
        let stack = save_stack.then(|| self.capture_stack());
        let history = self.fields.entry(locator).or_default();
        lock!(history.entries).push(FieldModification { stack, container });
        drop(history);

        let Some(container) = container else {
            return;
        };
        self.trackers
            .entry(IdentityKey::new(container))
            .or_default()
            .insert(tracker_id(class_name, field_name));
    }

    /// Append a container mutation. Hot path: settings read lock, then the
    /// per-container list mutex.
    pub fn save_container_modification(
        &self,
        container: ObjectId,
        element: ElementRef,
        is_addition: bool,
    ) {
        let enabled = read_lock!(self.enabled);
        let key = IdentityKey::new(container);
        let tracked = self
            .trackers
            .get(&key)
            .is_some_and(|ids| ids.iter().any(|id| enabled.contains(id)));
        if !tracked {
            return;
        }

        let stack = Some(self.capture_stack());
        let history = self.containers.entry(key).or_default();
        lock!(history.entries).push(ContainerModification {
            stack,
            element,
            is_addition,
        });
    }

    /// Whether any tracker of this container is currently enabled.
    #[must_use]
    pub fn is_container_tracked(&self, container: ObjectId) -> bool {
        let enabled = read_lock!(self.enabled);
        self.trackers
            .get(&IdentityKey::new(container))
            .is_some_and(|ids| ids.iter().any(|id| enabled.contains(id)))
    }

    /// Enable or disable history for a field. Settings write lock.
    pub fn set_tracking_enabled(&self, class_name: &str, field_name: &str, enabled: bool) {
        let mut set = write_lock!(self.enabled);
        let id = tracker_id(class_name, field_name);
        if enabled {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Drop every record for `(class, field)` and evict containers whose only
    /// tracker it was. Settings write lock; drains in-flight appends first.
    ///
    /// Returns the identities of evicted containers so the caller can drop
    /// their lock state as well.
    pub fn clear_history(&self, class_name: &str, field_name: &str) -> Vec<ObjectId> {
        let _settings = write_lock!(self.enabled);
        let id = tracker_id(class_name, field_name);

        self.fields.retain(|locator, _| {
            !(locator.class_name == class_name && locator.field_name == field_name)
        });

        let mut evicted = Vec::new();
        self.trackers.retain(|key, trackers| {
            trackers.remove(&id);
            if trackers.is_empty() {
                self.containers.remove(key);
                evicted.push(key.object());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// The containers assigned to a field instance, in append order.
    #[must_use]
    pub fn field_modifications(
        &self,
        class_name: &str,
        field_name: &str,
        owner: Option<ObjectId>,
    ) -> Vec<Option<ObjectId>> {
        let locator = FieldLocator::new(class_name, field_name, owner);
        match self.fields.get(&locator) {
            Some(history) => lock!(history.entries).iter().map(|m| m.container).collect(),
            None => Vec::new(),
        }
    }

    /// The recorded mutations of a container, in append order.
    #[must_use]
    pub fn container_modifications(&self, container: ObjectId) -> Vec<ContainerModification> {
        match self.containers.get(&IdentityKey::new(container)) {
            Some(history) => lock!(history.entries).clone(),
            None => Vec::new(),
        }
    }

    /// Serialized stack of one field modification; empty when absent.
    #[must_use]
    pub fn field_stack(
        &self,
        class_name: &str,
        field_name: &str,
        owner: Option<ObjectId>,
        index: usize,
    ) -> Vec<u8> {
        let locator = FieldLocator::new(class_name, field_name, owner);
        let Some(history) = self.fields.get(&locator) else {
            return Vec::new();
        };
        let entries = lock!(history.entries);
        entries
            .get(index)
            .and_then(|m| m.stack.as_ref())
            .map(CapturedStack::serialize)
            .unwrap_or_default()
    }

    /// Serialized stack of one container modification; empty when absent.
    #[must_use]
    pub fn container_stack(&self, container: ObjectId, index: usize) -> Vec<u8> {
        let Some(history) = self.containers.get(&IdentityKey::new(container)) else {
            return Vec::new();
        };
        let entries = lock!(history.entries);
        entries
            .get(index)
            .and_then(|m| m.stack.as_ref())
            .map(CapturedStack::serialize)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::stack::NullStackProvider;

    fn store() -> HistoryStore {
        HistoryStore::new(Arc::new(NullStackProvider))
    }

    #[test]
    fn test_disabled_field_saves_nothing() {
        let store = store();
        store.save_field_modification("com.example.Foo", "items", None, Some(ObjectId(1)), true);
        assert!(store
            .field_modifications("com.example.Foo", "items", None)
            .is_empty());
    }

    #[test]
    fn test_enabled_field_saves_in_order() {
        let store = store();
        store.set_tracking_enabled("com.example.Foo", "items", true);
        store.save_field_modification("com.example.Foo", "items", None, Some(ObjectId(1)), true);
        store.save_field_modification("com.example.Foo", "items", None, Some(ObjectId(2)), false);

        let mods = store.field_modifications("com.example.Foo", "items", None);
        assert_eq!(mods, vec![Some(ObjectId(1)), Some(ObjectId(2))]);
    }

    #[test]
    fn test_container_mutations_require_a_tracker() {
        let store = store();
        store.set_tracking_enabled("com.example.Foo", "items", true);

        // Not yet assigned through a tracked field: ignored.
        store.save_container_modification(ObjectId(7), ElementRef::object(ObjectId(100)), true);
        assert!(store.container_modifications(ObjectId(7)).is_empty());

        store.save_field_modification("com.example.Foo", "items", None, Some(ObjectId(7)), false);
        store.save_container_modification(ObjectId(7), ElementRef::object(ObjectId(100)), true);
        let mods = store.container_modifications(ObjectId(7));
        assert_eq!(mods.len(), 1);
        assert!(mods[0].is_addition());
    }

    #[test]
    fn test_locator_identity_by_owner() {
        let store = store();
        store.set_tracking_enabled("Foo", "items", true);
        store.save_field_modification("Foo", "items", Some(ObjectId(1)), Some(ObjectId(10)), false);
        store.save_field_modification("Foo", "items", Some(ObjectId(2)), Some(ObjectId(20)), false);

        assert_eq!(
            store.field_modifications("Foo", "items", Some(ObjectId(1))),
            vec![Some(ObjectId(10))]
        );
        assert_eq!(
            store.field_modifications("Foo", "items", Some(ObjectId(2))),
            vec![Some(ObjectId(20))]
        );
        assert!(store.field_modifications("Foo", "items", None).is_empty());
    }

    #[test]
    fn test_clear_history_evicts_orphan_containers() {
        let store = store();
        store.set_tracking_enabled("Foo", "a", true);
        store.set_tracking_enabled("Foo", "b", true);
        store.save_field_modification("Foo", "a", None, Some(ObjectId(1)), false);
        store.save_field_modification("Foo", "b", None, Some(ObjectId(1)), false);
        store.save_field_modification("Foo", "a", None, Some(ObjectId(2)), false);
        store.save_container_modification(ObjectId(1), ElementRef::object(ObjectId(50)), true);
        store.save_container_modification(ObjectId(2), ElementRef::object(ObjectId(51)), true);

        let evicted = store.clear_history("Foo", "a");
        assert_eq!(evicted, vec![ObjectId(2)]);

        assert!(store.field_modifications("Foo", "a", None).is_empty());
        assert!(store.container_modifications(ObjectId(2)).is_empty());
        // Container 1 is still tracked by Foo.b.
        assert!(!store.container_modifications(ObjectId(1)).is_empty());
    }

    #[test]
    fn test_disable_then_enable_produces_no_stale_records() {
        let store = store();
        store.set_tracking_enabled("Foo", "items", true);
        store.set_tracking_enabled("Foo", "items", false);
        store.save_field_modification("Foo", "items", None, Some(ObjectId(1)), false);
        store.set_tracking_enabled("Foo", "items", true);
        assert!(store.field_modifications("Foo", "items", None).is_empty());
    }

    #[test]
    fn test_missing_stack_serializes_empty() {
        let store = store();
        store.set_tracking_enabled("Foo", "items", true);
        store.save_field_modification("Foo", "items", None, Some(ObjectId(1)), false);
        assert!(store.field_stack("Foo", "items", None, 0).is_empty());
        assert!(store.field_stack("Foo", "items", None, 99).is_empty());
    }
}
