//! The `parameters` built-in interface (spec.md §4.6 C6): a context whose
//! data is a named, ordered bag of Pointers, initialized from the init-time
//! parameter list and addressable afterwards by slot name.
//!
//! The transient, per-call [`crate::paramlist::ParamList`] is an `Rc` cons
//! list — perfect for a call-scoped scratch list, but `Rc` is `!Send`, and
//! context data must be safe to hand to another thread (e.g. a thread-group
//! work item reading a shared parameters context). So this interface copies
//! the init parameter list into a plain `Vec<(String, Pointer)>` behind a
//! `RefCell` for interior mutability on `set` — its own long-lived storage,
//! not a reuse of the `Rc` list type.

use std::cell::RefCell;
use std::sync::OnceLock;

use crate::context::{interface_pointer, Interface};
use crate::error::{EngineError, Status};
use crate::paramlist::{self, ParamList};
use crate::pointer::{Pointer, PointerFlags};
use crate::slot::SlotDesignator;

struct Store(RefCell<Vec<(String, Pointer)>>);

fn init(params: &ParamList<'_>) -> (Status, Pointer) {
    let entries: Vec<(String, Pointer)> = paramlist::iter(params)
        .map(|(name, value)| (name.to_string(), value.cloned_owned()))
        .collect();
    (
        Status::Ok,
        Pointer::boxed(Store(RefCell::new(entries)), PointerFlags::WRITABLE),
    )
}

fn fin(data: &Pointer) {
    let store = unsafe { data.as_ref::<Store>() };
    for (_, value) in store.0.borrow_mut().drain(..) {
        value.ref_count.decrement();
    }
}

fn get(data: &Pointer, slot: &SlotDesignator) -> (Status, Pointer) {
    if slot.name.is_empty() {
        return (Status::Err(EngineError::Key), Pointer::null());
    }
    let store = unsafe { data.as_ref::<Store>() };
    let entries = store.0.borrow();
    match entries.iter().find(|(name, _)| name == slot.name) {
        Some((_, value)) => (Status::Ok, value.clone()),
        None => (Status::SoftMiss, Pointer::null()),
    }
}

/// Sets (inserting or replacing, first-match-wins like the transient list)
/// the named entry. Takes ownership of `value`.
fn set(data: &Pointer, slot: &SlotDesignator, value: Pointer) -> Status {
    if slot.name.is_empty() {
        return Status::Err(EngineError::Key);
    }
    let store = unsafe { data.as_ref::<Store>() };
    let mut entries = store.0.borrow_mut();
    if let Some(entry) = entries.iter_mut().find(|(name, _)| name == slot.name) {
        let old = std::mem::replace(&mut entry.1, value);
        old.ref_count.decrement();
    } else {
        entries.push((slot.name.to_string(), value));
    }
    Status::Ok
}

/// Returns an aliasing snapshot of the stored entries in storage order: the
/// `Pointer`s are plain-cloned, not `cloned_owned`, matching the non-owning
/// "view" contract of the scratch list `INIT`/`ACT` build over a dynamic
/// tail drawn from the registry (spec.md §3 "prepending static parameters
/// onto an optional dynamic tail").
pub fn snapshot(data: &Pointer) -> Vec<(String, Pointer)> {
    let store = unsafe { data.as_ref::<Store>() };
    store.0.borrow().iter().map(|(name, value)| (name.clone(), value.clone())).collect()
}

/// `act(data, "_", params)`: prepends the whole of `params` onto the stored
/// list as a single batch, in the caller's order, without disturbing
/// existing entries of the same name (first-match-wins on lookup still
/// favors whichever copy comes first after the prepend).
fn act(data: &Pointer, slot: &SlotDesignator, params: &ParamList<'_>) -> Status {
    if slot.name != "_" {
        return Status::Err(EngineError::Key);
    }
    let store = unsafe { data.as_ref::<Store>() };
    let incoming: Vec<(String, Pointer)> = paramlist::iter(params)
        .map(|(name, value)| (name.to_string(), value.cloned_owned()))
        .collect();
    let mut entries = store.0.borrow_mut();
    for (i, entry) in incoming.into_iter().enumerate() {
        entries.insert(i, entry);
    }
    Status::Ok
}

static INTERFACE: Interface = Interface {
    name: "parameters",
    init: Some(init),
    final_fn: Some(fin),
    get: Some(get),
    set: Some(set),
    act: Some(act),
};

pub fn interface() -> Pointer {
    static HANDLE: OnceLock<Pointer> = OnceLock::new();
    HANDLE.get_or_init(|| interface_pointer(&INTERFACE)).cloned_owned()
}
