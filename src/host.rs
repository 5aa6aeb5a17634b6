//! The retransformation host seam.
//!
//! The engine never loads or swaps classes itself; it asks the host (the JVMTI side
//! of the bridge) to retransform, and the host calls back into
//! [`crate::engine::Engine::transform`] with the class bytes, exactly the
//! `retransformClasses` / `ClassFileTransformer` pair. Tests plug in an in-memory
//! host.

use crate::Result;

/// Access to the loaded classes of the target program.
pub trait ClassHost: Send + Sync {
    /// Internal names of all currently loaded classes. A name may appear more
    /// than once when several loaders define it.
    fn loaded_classes(&self) -> Vec<String>;

    /// Current bytes of a loaded class, `None` when it is not loaded.
    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>>;

    /// Retransform one class: the host re-runs its transformer chain (which
    /// calls back into the engine) and swaps the result in.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnmodifiableClass`] when the runtime refuses to
    /// retransform this class.
    fn retransform(&self, internal_name: &str) -> Result<()>;
}
