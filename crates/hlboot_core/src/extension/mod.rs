//! Secondary extension loading.
//!
//! The bytecode program depends on a native extension library for its host
//! primitives. This module opens that library and turns its `setup` export into
//! a typed [`SetupHook`] before anything calls it.

pub mod capability;
pub mod resolver;

pub use capability::{SetupFn, SetupHook};
pub use resolver::{DylibResolver, ExtensionResolver};
