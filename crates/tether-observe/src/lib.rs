#![forbid(unsafe_code)]

//! Dependency-tracking observation primitives for tether.
//!
//! This crate is the engine's lower half: it makes plain data observable
//! and keeps path subscriptions honest as the data graph mutates.
//!
//! - [`value`]: the dynamic [`Value`](value::Value) tree and its identity
//!   semantics.
//! - [`object`]: observable objects with a per-property listener registry
//!   and descriptor capture/restore.
//! - [`array`]: the observable array façade with seven intercepted
//!   mutating operations.
//! - [`path`]: path descriptors and the boundary re-linking path observer.
//! - [`context`]: the per-view wrapper exposing observe/unobserve over
//!   paths, with locals layering and start/stop gating.
//!
//! Everything here is single-threaded and fully synchronous: a mutation
//! fans out to completion before the call that caused it returns.

pub mod array;
pub mod context;
pub mod object;
pub mod path;
pub mod value;

pub use array::{ArrayListener, ArrayRef};
pub use context::{Context, ContextCallback};
pub use object::{Getter, ObjectRef, PropertyListener, Setter, Slot, SlotFlags};
pub use path::{AccessError, PathDescriptor, PathNotifier, PathObserver, assign, resolve};
pub use value::Value;
