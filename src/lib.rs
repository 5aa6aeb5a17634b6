// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # mutscope
//!
//! A dynamic bytecode instrumentation and modification-tracking engine for JVM
//! containers reachable through watched fields. `mutscope` lets a debugger observe how
//! a mutable container (list, set, map) referenced by some field evolves over time:
//! every element insertion or removal, and every reassignment of the field itself, is
//! captured with a call stack and persisted in an in-process history store the
//! debugger can query later.
//!
//! # Architecture
//!
//! The engine runs attached to a target program. Rewritten bytecode calls back into
//! the engine's hot-path entry points through a small bridge class; the debugger
//! drives the engine through its external API.
//!
//! - **File Layer**: bounds-checked binary parsing primitives
//! - **Class File Layer**: constant pool, members, attributes, bytecode decode/encode
//! - **Rewrite Layer**: the class rewriter with its three roles (field owner,
//!   container, nestmate) and the built-in known-methods table
//! - **Runtime Layer**: hot-path entry points, per-container reentrant locks with
//!   thread-local entry counters
//! - **Storage Layer**: the concurrent modification-history store and stack capture
//! - **Engine**: the context object tying it all together, plus retransform
//!   orchestration through the host seam
//!
//! ## Key Components
//!
//! - [`crate::engine::Engine`] - Main entry point: transformer callback, hot paths,
//!   debugger API
//! - [`crate::host::ClassHost`] - Retransformation host seam (JVMTI side)
//! - [`crate::storage::stack::StackProvider`] - VM-level stack capture seam
//! - [`crate::classfile`] - Class file parsing and re-emission
//! - [`crate::rewrite`] - The bytecode rewriter
//! - [`crate::prelude`] - Convenient re-exports of commonly used types
//! - [`crate::Error`] and [`crate::Result`] - Comprehensive error handling
//!
//! # Usage Examples
//!
//! ## Watching a field
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mutscope::prelude::*;
//! # fn host() -> Arc<dyn ClassHost> { unimplemented!() }
//! # fn stacks() -> Arc<dyn StackProvider> { unimplemented!() }
//!
//! let engine = Engine::new(host(), stacks());
//!
//! // The debugger arms the watchpoint and enables history.
//! engine.set_tracking_enabled("com.example.Foo", "items", true);
//! engine.emulate_field_watchpoint(
//!     "com.example.Foo",
//!     "items",
//!     "Ljava/util/List;",
//!     &["com.example.Foo"],
//! );
//!
//! // Later: query what happened to the field.
//! let assignments = engine.get_field_modifications("com.example.Foo", "items", None);
//! for container in assignments.into_iter().flatten() {
//!     for m in engine.get_container_modifications(container) {
//!         println!("{} {:?}", if m.is_addition() { "+" } else { "-" }, m.element());
//!     }
//! }
//! ```
//!
//! ## Rewriting a class directly
//!
//! ```rust,no_run
//! use mutscope::rewrite::{rewrite_class, RewriteRoles};
//!
//! # let bytes: Vec<u8> = vec![];
//! let roles = RewriteRoles { field_owner: true, ..RewriteRoles::default() };
//! let outcome = rewrite_class(&bytes, &roles)?;
//! # Ok::<(), mutscope::Error>(())
//! ```
//!
//! # Concurrency
//!
//! Any target-program thread may enter the hot path at any time. Appends to the
//! history run in parallel and only share the settings read lock; settings changes
//! drain in-flight appends. Each tracked container carries a reentrant mutex and a
//! thread-local entry counter so nested instrumented calls produce exactly one pair
//! of snapshots, taken by the outermost frame.
//!
//! # Error Handling
//!
//! Hot-path entry points never propagate errors to the rewritten caller; failures
//! are logged and swallowed. Rewrite failures skip the affected class and leave it
//! unmodified. See [`Error`] for the full taxonomy.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

pub mod catalog;
pub mod classfile;
pub mod engine;
pub mod host;
pub mod object;
pub mod prelude;
pub mod rewrite;
pub mod runtime;
pub mod storage;
pub mod utils;

/// `mutscope` Result type.
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`crate::Error`]. This is used consistently throughout the crate for all fallible
/// operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `mutscope` Error type.
///
/// The main error type for all operations in this crate. Provides detailed error
/// information for class file parsing, rewriting and runtime operations.
pub use error::Error;

/// Re-export: the engine context object.
pub use engine::{Engine, EngineConfig};

/// Re-export: the byte stream parser used by the class file layer.
pub use file::Parser;
