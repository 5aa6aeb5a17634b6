//! Shared fixtures for unit and integration tests: a class file builder, an
//! in-memory retransformation host, scripted containers and stack providers.

mod builder;
mod host;

pub use builder::ClassBuilder;
pub use host::MockHost;
pub use target::{ScriptedStackProvider, TestContainer};
