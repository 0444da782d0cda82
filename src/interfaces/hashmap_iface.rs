//! The `hashmap` built-in interface (spec.md §4.6 C6): a context over
//! [`crate::hashmap::OrderedHashMap`]. This is also the interface the
//! registry itself initializes against (spec.md §4.3: "the registry is
//! itself a context whose interface is the ordered-hashmap interface") —
//! [`crate::registry::Registry`] builds its root context from
//! [`interface`] the same way any other hashmap-backed context would, and
//! additionally reaches past the generic `get`/`set` dispatch via
//! [`map_ref`] for the insert-only/remove-on-FINAL semantics the executor
//! needs that a generic slot `set` can't express.

use std::cell::RefCell;
use std::sync::OnceLock;

use crate::context::{interface_pointer, Interface};
use crate::error::{EngineError, Status};
use crate::hashmap::{OrderedHashMap, SetOptions};
use crate::paramlist::{self, ParamList};
use crate::pointer::{Pointer, PointerFlags};
use crate::slot::SlotDesignator;

const DEFAULT_CAPACITY: usize = 256;

fn init(params: &ParamList<'_>) -> (Status, Pointer) {
    let capacity = match paramlist::find(params, "capacity") {
        Some(p) => unsafe { *p.as_ref::<u64>() as usize },
        None => DEFAULT_CAPACITY,
    };
    (
        Status::Ok,
        Pointer::boxed(RefCell::new(OrderedHashMap::with_capacity(capacity)), PointerFlags::WRITABLE),
    )
}

fn get(data: &Pointer, slot: &SlotDesignator) -> (Status, Pointer) {
    if slot.name.is_empty() {
        return (Status::Err(EngineError::Key), Pointer::null());
    }
    map_ref(data).borrow().get(slot.name)
}

fn set(data: &Pointer, slot: &SlotDesignator, value: Pointer) -> Status {
    if slot.name.is_empty() {
        return Status::Err(EngineError::Key);
    }
    map_ref(data).borrow_mut().set(slot.name, value, SetOptions::upsert())
}

static INTERFACE: Interface = Interface {
    name: "hashmap",
    init: Some(init),
    final_fn: None, // dropping the boxed RefCell<OrderedHashMap> already releases every entry
    get: Some(get),
    set: Some(set),
    act: None,
};

pub fn interface() -> Pointer {
    static HANDLE: OnceLock<Pointer> = OnceLock::new();
    HANDLE.get_or_init(|| interface_pointer(&INTERFACE)).cloned_owned()
}

/// Builds a hashmap context directly, bypassing parameter-list parsing —
/// used by [`crate::registry::Registry::new`].
pub fn new(capacity: usize) -> Pointer {
    Pointer::boxed(RefCell::new(OrderedHashMap::with_capacity(capacity)), PointerFlags::WRITABLE)
}

/// Borrows the `OrderedHashMap` behind a hashmap context's data Pointer.
///
/// # Safety / preconditions
/// `data` must have been produced by [`init`] or [`new`].
pub fn map_ref(data: &Pointer) -> &RefCell<OrderedHashMap> {
    unsafe { data.as_ref::<RefCell<OrderedHashMap>>() }
}
