//! Built-in interfaces (spec.md §4.6 C6).
//!
//! Each submodule exposes a single `pub fn interface() -> Pointer` that
//! hands out a `.cloned_owned()` clone of one process-wide, lazily built
//! [`crate::context::Interface`] handle — see
//! [`crate::context::interface_pointer`] for why this is a shared counter
//! rather than a fresh one per call.

pub mod hashmap_iface;
pub mod library;
pub mod memory;
pub mod parameters;
pub mod pointer_iface;
pub mod signal_management;
pub mod thread_group;
