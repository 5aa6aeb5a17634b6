//! The class rewriter: one pass per class, all applicable roles at once.
//!
//! A class reaches this module with a [`RewriteRoles`] snapshot taken from the
//! catalog under its mutex; the rewrite itself runs without any engine lock. A class
//! that is both a field owner and a container is rewritten in both capacities in the
//! same pass. The rewrite is deterministic: the same input bytes and the same roles
//! produce byte-identical output, so a preparation race that rewrites a class twice
//! converges.
//!
//! # Key Components
//!
//! - [`rewrite_class`] - the transformer body
//! - [`known`] - the built-in known-methods table (rewrite policy per mutator)
//! - [`bridge`] - the bridge-callback ABI the emitted `invokestatic`s target
//! - [`field_owner`] / [`container`] / [`nestmate`] - the three role passes
//!
//! Failure semantics: any error here aborts only this class; the engine logs the
//! failure and leaves the class unmodified, and siblings continue.

pub mod bridge;
pub mod container;
pub mod field_owner;
pub mod known;
pub mod nestmate;

use rustc_hash::FxHashSet;

use crate::{
    classfile::{attributes, ClassFile, MethodAccess},
    rewrite::known::{KnownMethodsSet, MethodKind},
    Result,
};

/// The roles a class plays in the current rewrite, snapshotted from the catalog.
#[derive(Debug, Clone, Default)]
pub struct RewriteRoles {
    /// Rewrite tracked field writes in this class.
    pub field_owner: bool,
    /// This class is a prepared container; its mutators get the per-kind rewrite.
    pub container_methods: Option<KnownMethodsSet>,
    /// This class is a nestmate of a prepared container.
    pub container_nestmate: bool,
    /// Internal names of all prepared container classes (field-op tracker targets).
    pub prepared_containers: FxHashSet<String>,
    /// Tracked `(field name, type descriptor)` pairs.
    pub tracked_fields: FxHashSet<(String, String)>,
}

impl RewriteRoles {
    /// Whether this class needs rewriting at all.
    #[must_use]
    pub fn any(&self) -> bool {
        self.field_owner || self.container_methods.is_some() || self.container_nestmate
    }
}

/// The result of rewriting one class.
pub struct RewriteOutcome {
    /// The rewritten class bytes.
    pub bytes: Vec<u8>,
    /// Nestmates discovered in the class's attributes, to be queued for their own
    /// rewrite pass.
    pub nestmates: Vec<String>,
}

/// Rewrite one class according to its roles.
///
/// # Errors
/// Returns an error when the class cannot be parsed or the rewritten body cannot
/// be encoded; the caller treats this as a transform failure and keeps the
/// original bytes.
pub fn rewrite_class(bytes: &[u8], roles: &RewriteRoles) -> Result<RewriteOutcome> {
    let mut class = ClassFile::parse(bytes)?;

    let nestmates = discover_nestmates(&class, roles)?;

    let mut methods = std::mem::take(&mut class.methods);
    for method in &mut methods {
        let access = method.method_access();
        if access.contains(MethodAccess::BRIDGE) {
            continue;
        }

        let name = method.name(&class.pool)?.to_string();
        let descriptor = method.descriptor(&class.pool)?.to_string();
        let Some(mut code) = method.code(&class.pool)? else {
            continue;
        };

        let is_static = access.contains(MethodAccess::STATIC);
        let is_constructor = name == bridge::CONSTRUCTOR_NAME;
        let mut modified = false;

        if roles.field_owner {
            modified |=
                field_owner::instrument_field_writes(&mut code, &mut class.pool, roles)?;
        }

        if let Some(known_methods) = &roles.container_methods {
            if !is_static && !is_constructor {
                let full_desc = format!("{name}{descriptor}");
                match known_methods.get(&full_desc) {
                    Some(method) if method.kind == MethodKind::Immutable => {}
                    Some(method) if method.kind.is_replaceable() => {
                        container::replace_with_helper(&mut code, &mut class.pool, method.kind)?;
                        modified = true;
                    }
                    documented => {
                        container::wrap_mutator(&mut code, &mut class.pool, documented)?;
                        modified = true;
                    }
                }
            }
        }

        let tracker_applies =
            roles.container_nestmate || (is_static && roles.container_methods.is_some());
        if tracker_applies {
            modified |= nestmate::instrument_field_ops(
                &mut code,
                &mut class.pool,
                &roles.prepared_containers,
                is_constructor,
            )?;
        }

        if modified {
            method.set_code(&mut class.pool, &code)?;
        }
    }
    class.methods = methods;

    Ok(RewriteOutcome {
        bytes: class.to_bytes(),
        nestmates,
    })
}

/// Collect nestmates from the class attributes, per the roles that make them
/// interesting.
fn discover_nestmates(class: &ClassFile, roles: &RewriteRoles) -> Result<Vec<String>> {
    let for_field_owner = roles.field_owner;
    let for_container = roles.container_methods.is_some() || roles.container_nestmate;

    let mut nestmates = Vec::new();
    if for_field_owner || for_container {
        if let Some(attr) = class.attribute(attributes::NEST_HOST) {
            nestmates.push(attributes::nest_host(&attr.data, &class.pool)?);
        }
        if let Some(attr) = class.attribute(attributes::NEST_MEMBERS) {
            nestmates.extend(attributes::nest_members(&attr.data, &class.pool)?);
        }
    }
    if for_container {
        if let Some(attr) = class.attribute(attributes::INNER_CLASSES) {
            nestmates.extend(attributes::inner_classes(&attr.data, &class.pool)?);
        }
    }
    Ok(nestmates)
}
