//! An in-memory retransformation host for tests.

use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{engine::Engine, host::ClassHost, Error, Result};

/// Holds class bytes in memory and replays the JVMTI retransform flow:
/// `retransform` re-runs the engine's transformer on the current bytes and
/// swaps in the result.
#[derive(Default)]
pub struct MockHost {
    classes: Mutex<FxHashMap<String, Vec<u8>>>,
    unmodifiable: Mutex<FxHashSet<String>>,
    retransformed: Mutex<Vec<String>>,
    engine: OnceCell<Weak<Engine>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(MockHost::default())
    }

    /// Register a loaded class.
    pub fn define(&self, internal_name: &str, bytes: Vec<u8>) {
        self.classes
            .lock()
            .unwrap()
            .insert(internal_name.to_string(), bytes);
    }

    /// Wire the host to the engine whose transformer it should call back into.
    pub fn attach(&self, engine: &Arc<Engine>) {
        let _ = self.engine.set(Arc::downgrade(engine));
    }

    /// Make `retransform` refuse this class.
    pub fn mark_unmodifiable(&self, internal_name: &str) {
        self.unmodifiable
            .lock()
            .unwrap()
            .insert(internal_name.to_string());
    }

    /// Current bytes of a class (possibly rewritten).
    pub fn bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.classes.lock().unwrap().get(internal_name).cloned()
    }

    /// Names passed to `retransform`, in call order.
    pub fn retransform_log(&self) -> Vec<String> {
        self.retransformed.lock().unwrap().clone()
    }
}

impl ClassHost for MockHost {
    fn loaded_classes(&self) -> Vec<String> {
        self.classes.lock().unwrap().keys().cloned().collect()
    }

    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.classes.lock().unwrap().get(internal_name).cloned()
    }

    fn retransform(&self, internal_name: &str) -> Result<()> {
        self.retransformed
            .lock()
            .unwrap()
            .push(internal_name.to_string());

        if self.unmodifiable.lock().unwrap().contains(internal_name) {
            return Err(Error::UnmodifiableClass(internal_name.to_string()));
        }

        let Some(engine) = self.engine.get().and_then(Weak::upgrade) else {
            return Ok(());
        };
        let Some(bytes) = self.bytes(internal_name) else {
            return Ok(());
        };
        if let Some(rewritten) = engine.transform(internal_name, &bytes) {
            self.define(internal_name, rewritten);
        }
        Ok(())
    }
}
