//! Shared utility types for the engine.
//!
//! # Key Components
//!
//! - [`identity`] - Identity-keyed hashing ([`identity::IdentityKey`])
//! - [`multiset`] - Identity bags and before/after deltas ([`multiset::Multiset`])
//! - [`mutf8`] - Modified UTF-8 encode/decode for constant pools and stack blobs

pub mod identity;
pub mod multiset;
pub mod mutf8;

pub use identity::IdentityKey;
pub use multiset::{Delta, Multiset};
