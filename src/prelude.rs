//! # mutscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and
//! traits of the library. Import it to get quick access to the essentials for
//! embedding the engine or writing a host bridge.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mutscope::prelude::*;
//! # fn host() -> Arc<dyn ClassHost> { unimplemented!() }
//! # fn stacks() -> Arc<dyn StackProvider> { unimplemented!() }
//!
//! let engine = Engine::new(host(), stacks());
//! engine.set_tracking_enabled("com.example.Foo", "items", true);
//! ```

pub use crate::{
    engine::{Engine, EngineConfig},
    host::ClassHost,
    object::{ContainerAccess, ContainerContents, ElementRef, MapEntryRef, ObjectId},
    storage::{
        stack::{CapturedStack, NullStackProvider, StackFrame, StackProvider},
        ContainerModification, FieldLocator, FieldModification, HistoryStore,
    },
    utils::{Delta, IdentityKey, Multiset},
    Error, Result,
};
