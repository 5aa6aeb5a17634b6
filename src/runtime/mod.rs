//! Hot-path entry points called (through the bridge) by rewritten bytecode.
//!
//! These are the `onCaptureStart`/`onCaptureEnd`/`capture*` callbacks the rewriter
//! emits invocations of. They are thread-safe, never block on anything but the short
//! engine mutexes and the per-container lock, and never propagate an error to the
//! caller: the target program must not be perturbed. A lookup miss (container or
//! field not registered) returns without side effect.
//!
//! # Key Components
//!
//! - [`lock::ContainerLock`] - reentrant mutex + thread-local entry counter
//! - [`containers::ContainerTable`] - the global identity-keyed lock table
//! - [`CopiesMap`] - per-frame container-to-snapshot storage for the field-op tracker
//! - the `impl Engine` block below - the entry points themselves

pub mod containers;
pub mod lock;

use crate::{
    engine::Engine,
    object::{ContainerAccess, ElementRef},
    utils::{Delta, Multiset},
};

/// Per-frame identity map from container to its before-snapshot.
///
/// Instrumented field-owner methods allocate one of these in their prologue
/// (`getCopiesStorage`), fill it on first access to each container, and drain it at
/// every return. The borrows live as long as the instrumented frame, like the JNI
/// local references they stand for.
#[derive(Default)]
pub struct CopiesMap<'a> {
    entries: Vec<(&'a dyn ContainerAccess, Multiset)>,
}

impl<'a> CopiesMap<'a> {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        CopiesMap::default()
    }

    fn contains(&self, container: &dyn ContainerAccess) -> bool {
        let id = container.identity();
        self.entries.iter().any(|(c, _)| c.identity() == id)
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no snapshot is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Engine {
    /// `getCopiesStorage`: a fresh per-frame copies map.
    #[must_use]
    pub fn new_copies_map<'a>(&self) -> CopiesMap<'a> {
        CopiesMap::new()
    }

    /// `onCaptureStart(container, synchronize)`: enter an instrumented mutator.
    ///
    /// Returns whether this is the outermost instrumented call on this container
    /// for this thread; false when the container is not tracked.
    pub fn on_capture_start(&self, container: &dyn ContainerAccess, synchronize: bool) -> bool {
        match self.containers.get(container.identity()) {
            Some(lock) => lock.enter(synchronize),
            None => false,
        }
    }

    /// `onCaptureEnd(container, synchronize)`: leave an instrumented mutator.
    pub fn on_capture_end(&self, container: &dyn ContainerAccess, synchronize: bool) {
        if let Some(lock) = self.containers.get(container.identity()) {
            lock.leave(synchronize);
        }
    }

    /// `onCaptureStart(container, copies)`: field-op tracker entry. When this
    /// thread is outermost on the container, synchronizes and stores a
    /// before-snapshot in the frame's copies map.
    pub fn on_capture_start_with_copies<'a>(
        &self,
        container: &'a dyn ContainerAccess,
        copies: &mut CopiesMap<'a>,
    ) {
        let Some(lock) = self.containers.get(container.identity()) else {
            return;
        };
        if lock.entry_count() != 0 || copies.contains(container) {
            return;
        }
        lock.enter(true);
        copies
            .entries
            .push((container, Multiset::from_contents(&container.contents())));
    }

    /// `onCaptureEnd(copies)`: field-op tracker exit. Diffs every stored copy
    /// against the container's current contents, appends the deltas, and
    /// releases the synchronization.
    pub fn on_capture_end_with_copies(&self, copies: &mut CopiesMap<'_>) {
        for (container, before) in copies.entries.drain(..) {
            let Some(lock) = self.containers.get(container.identity()) else {
                continue;
            };
            let after = Multiset::from_contents(&container.contents());
            let deltas = Multiset::diff(&before, &after);
            if !deltas.is_empty() {
                self.save_deltas(container, &deltas);
            }
            lock.leave(true);
        }
    }

    /// `captureCollectionCopy`: bag snapshot of the container, when requested.
    #[must_use]
    pub fn capture_collection_copy(
        &self,
        should_capture: bool,
        container: &dyn ContainerAccess,
    ) -> Option<Multiset> {
        should_capture.then(|| Multiset::from_contents(&container.contents()))
    }

    /// `captureCollectionModification(shouldCapture, modified, container, element,
    /// isAddition)`: inline delta from a documented mutator.
    pub fn capture_inline(
        &self,
        should_capture: bool,
        modified: bool,
        container: &dyn ContainerAccess,
        element: ElementRef,
        is_addition: bool,
    ) {
        if !should_capture || !modified {
            return;
        }
        self.store
            .save_container_modification(container.identity(), element, is_addition);
    }

    /// `captureCollectionModification(before, container)`: default bag-diff
    /// capture at a mutator return.
    pub fn capture_mutator(&self, before: Option<Multiset>, container: &dyn ContainerAccess) {
        let Some(before) = before else {
            return;
        };
        let after = Multiset::from_contents(&container.contents());
        let deltas = Multiset::diff(&before, &after);
        if !deltas.is_empty() {
            self.save_deltas(container, &deltas);
        }
    }

    fn save_deltas(&self, container: &dyn ContainerAccess, deltas: &[Delta]) {
        let id = container.identity();
        for delta in deltas {
            self.store
                .save_container_modification(id, delta.element, delta.is_addition);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        object::ObjectId,
        storage::stack::NullStackProvider,
        test::{ClassBuilder, MockHost, TestContainer},
    };

    use super::*;

    fn tracked_engine() -> (Arc<Engine>, TestContainer) {
        let host = MockHost::new();
        host.define(
            "com/example/Foo",
            ClassBuilder::new("com/example/Foo")
                .field(0x0002, "items", "Ljava/util/List;")
                .build(),
        );
        let engine = Engine::new(host.clone(), Arc::new(NullStackProvider));
        host.attach(&engine);
        engine.set_tracking_enabled("com.example.Foo", "items", true);
        engine.add_field_to_tracked(
            "com.example.Foo",
            "items",
            "Ljava/util/List;",
            &["com.example.Foo"],
        );

        let container = TestContainer::collection(ObjectId(100), "com/example/PlainList");
        engine.capture_field_write(Some(&container), None, "com/example/Foo", "items", false);
        (engine, container)
    }

    #[test]
    fn test_copies_flow_diffs_on_exit() {
        let (engine, container) = tracked_engine();
        container.add(ObjectId(1));

        let mut copies = engine.new_copies_map();
        engine.on_capture_start_with_copies(&container, &mut copies);
        assert_eq!(copies.len(), 1);

        container.add(ObjectId(2));
        container.remove(ObjectId(1));
        engine.on_capture_end_with_copies(&mut copies);
        assert!(copies.is_empty());

        let mods = engine.get_container_modifications(ObjectId(100));
        assert_eq!(mods.len(), 2);
        assert!(!mods[0].is_addition());
        assert!(mods[1].is_addition());
    }

    #[test]
    fn test_copies_flow_skips_nested_frames() {
        let (engine, container) = tracked_engine();

        // An instrumented mutator is already on this thread's stack.
        assert!(engine.on_capture_start(&container, true));

        let mut copies = engine.new_copies_map();
        engine.on_capture_start_with_copies(&container, &mut copies);
        assert!(copies.is_empty());
        engine.on_capture_end_with_copies(&mut copies);

        engine.on_capture_end(&container, true);
    }

    #[test]
    fn test_untracked_container_is_a_silent_miss() {
        let (engine, _container) = tracked_engine();
        let stranger = TestContainer::collection(ObjectId(999), "com/example/PlainList");

        assert!(!engine.on_capture_start(&stranger, true));
        let mut copies = engine.new_copies_map();
        engine.on_capture_start_with_copies(&stranger, &mut copies);
        assert!(copies.is_empty());
        engine.capture_inline(
            true,
            true,
            &stranger,
            ElementRef::object(ObjectId(1)),
            true,
        );
        assert!(engine.get_container_modifications(ObjectId(999)).is_empty());
    }

    #[test]
    fn test_mutator_capture_with_no_net_change_is_silent() {
        let (engine, container) = tracked_engine();
        container.add(ObjectId(1));

        let should_capture = engine.on_capture_start(&container, true);
        let copy = engine.capture_collection_copy(should_capture, &container);
        // The mutator ran but changed nothing.
        engine.capture_mutator(copy, &container);
        engine.on_capture_end(&container, true);

        assert!(engine.get_container_modifications(ObjectId(100)).is_empty());
    }
}
