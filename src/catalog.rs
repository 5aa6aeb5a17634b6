//! Registry of tracked fields and classes prepared for retransformation.
//!
//! The catalog is pure state: which `(field, descriptor)` pairs are watched, how a
//! symbolic field reference through a subclass resolves to its canonical owner, which
//! container classes have been prepared with a known-methods set, and which nestmates
//! still await a rewrite. The engine serializes all mutations behind one mutex and
//! hands the transformer a [`RewriteRoles`] snapshot, so no catalog lock is ever held
//! across a retransformation call.
//!
//! Nestmate processing terminates because every class is added to `processed` when its
//! rewrite starts, and each pass removes `processed` from `unprocessed` before running.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::rewrite::{known::KnownMethodsSet, RewriteRoles};

const SEPARATOR: &str = "->";

/// Registry of tracked fields and prepared classes.
#[derive(Debug, Default)]
pub struct TrackedCatalog {
    /// `(field name, type descriptor)` pairs being watched.
    tracked_fields: FxHashSet<(String, String)>,
    /// `declaring-class -> field` to canonical owner (binary name).
    field_owners: FxHashMap<String, String>,
    /// Field-owner classes to rewrite (internal names).
    field_owner_classes: FxHashSet<String>,
    /// Prepared container classes with their planned known-methods sets.
    containers: FxHashMap<String, KnownMethodsSet>,
    /// Nestmates of containers whose field accesses need the tracker wrap.
    container_nestmates: FxHashSet<String>,
    /// Nestmates discovered during rewriting, awaiting their own pass.
    unprocessed_nestmates: FxHashSet<String>,
    /// Classes already transformed this pass.
    processed: FxHashSet<String>,
}

impl TrackedCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        TrackedCatalog::default()
    }

    /// Record a `(field, descriptor)` pair as tracked. Idempotent.
    pub fn add_field(&mut self, field_name: &str, descriptor: &str) {
        self.tracked_fields
            .insert((field_name.to_string(), descriptor.to_string()));
    }

    /// Whether writes to `(field, descriptor)` should be rewritten.
    #[must_use]
    pub fn contains_field(&self, field_name: &str, descriptor: &str) -> bool {
        self.tracked_fields
            .contains(&(field_name.to_string(), descriptor.to_string()))
    }

    /// Map a symbolic reference `(declaring class, field)` to its canonical owner.
    pub fn add_symbolic_owner(
        &mut self,
        class_internal_name: &str,
        owner_binary_name: &str,
        field_name: &str,
    ) {
        self.field_owners.insert(
            format!("{class_internal_name}{SEPARATOR}{field_name}"),
            owner_binary_name.to_string(),
        );
    }

    /// Canonical owner (binary name) for a symbolic reference, if registered.
    #[must_use]
    pub fn owner_for(&self, class_internal_name: &str, field_name: &str) -> Option<&str> {
        self.field_owners
            .get(&format!("{class_internal_name}{SEPARATOR}{field_name}"))
            .map(String::as_str)
    }

    /// Mark a class for the field-owner rewrite.
    pub fn mark_field_owner(&mut self, class_name: &str) {
        self.field_owner_classes.insert(class_name.to_string());
    }

    /// Record a container class as prepared with its known-methods set.
    pub fn prepare_container(&mut self, class_name: &str, methods: KnownMethodsSet) {
        self.containers.insert(class_name.to_string(), methods);
    }

    /// Whether a container class has already been prepared.
    #[must_use]
    pub fn is_container_prepared(&self, class_name: &str) -> bool {
        self.containers.contains_key(class_name)
    }

    /// Mark a class as a container nestmate.
    pub fn mark_container_nestmate(&mut self, class_name: &str) {
        self.container_nestmates.insert(class_name.to_string());
    }

    /// Queue a nestmate discovered during rewriting.
    pub fn push_nestmate(&mut self, class_name: &str) {
        self.unprocessed_nestmates.insert(class_name.to_string());
    }

    /// Mark a class as transformed this pass (called when its rewrite starts).
    pub fn mark_processed(&mut self, class_name: &str) {
        self.processed.insert(class_name.to_string());
    }

    /// Reset the per-pass nestmate bookkeeping.
    pub fn begin_pass(&mut self) {
        self.unprocessed_nestmates.clear();
        self.processed.clear();
    }

    /// Drain the nestmates that have not been processed yet.
    pub fn take_unprocessed_nestmates(&mut self) -> FxHashSet<String> {
        let processed = &self.processed;
        self.unprocessed_nestmates
            .retain(|name| !processed.contains(name));
        std::mem::take(&mut self.unprocessed_nestmates)
    }

    /// Snapshot the roles a class plays, for the transformer.
    #[must_use]
    pub fn roles_for(&self, class_name: &str) -> RewriteRoles {
        RewriteRoles {
            field_owner: self.field_owner_classes.contains(class_name),
            container_methods: self.containers.get(class_name).cloned(),
            container_nestmate: self.container_nestmates.contains(class_name),
            prepared_containers: self.containers.keys().cloned().collect(),
            tracked_fields: self.tracked_fields.clone(),
        }
    }
}

impl RewriteRoles {
    /// Whether `(field, descriptor)` is tracked in this snapshot.
    #[must_use]
    pub fn should_rewrite_write(&self, field_name: &str, descriptor: &str) -> bool {
        self.tracked_fields
            .contains(&(field_name.to_string(), descriptor.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_field_is_idempotent() {
        let mut catalog = TrackedCatalog::new();
        catalog.add_field("items", "Ljava/util/List;");
        catalog.add_field("items", "Ljava/util/List;");
        assert!(catalog.contains_field("items", "Ljava/util/List;"));
        assert!(!catalog.contains_field("items", "Ljava/util/Set;"));
    }

    #[test]
    fn test_symbolic_owner_resolution() {
        let mut catalog = TrackedCatalog::new();
        catalog.add_symbolic_owner("com/example/Sub", "com.example.Base", "items");
        assert_eq!(
            catalog.owner_for("com/example/Sub", "items"),
            Some("com.example.Base")
        );
        assert_eq!(catalog.owner_for("com/example/Other", "items"), None);
    }

    #[test]
    fn test_roles_snapshot() {
        let mut catalog = TrackedCatalog::new();
        catalog.mark_field_owner("A");
        catalog.prepare_container("java/util/ArrayList", KnownMethodsSet::new());
        catalog.mark_container_nestmate("java/util/ArrayList$Itr");

        let roles = catalog.roles_for("A");
        assert!(roles.field_owner);
        assert!(roles.container_methods.is_none());
        assert!(roles.prepared_containers.contains("java/util/ArrayList"));

        let roles = catalog.roles_for("java/util/ArrayList$Itr");
        assert!(roles.container_nestmate);
    }

    #[test]
    fn test_nestmate_fixed_point_shrinks() {
        let mut catalog = TrackedCatalog::new();
        catalog.begin_pass();
        catalog.push_nestmate("A$1");
        catalog.push_nestmate("A$2");
        catalog.mark_processed("A$1");

        let pending = catalog.take_unprocessed_nestmates();
        assert_eq!(pending.len(), 1);
        assert!(pending.contains("A$2"));
        assert!(catalog.take_unprocessed_nestmates().is_empty());
    }
}
