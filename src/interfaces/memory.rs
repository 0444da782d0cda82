//! The `memory` built-in interface (spec.md §4.6 C6): a context wrapping an
//! allocation produced by a pluggable [`MemoryInterface`] — a small vtable
//! of `allocate`/`free`/`map`/`unmap` functions, addressed the same way a
//! [`crate::context::Interface`] is: a `'static` vtable behind a Function
//! Pointer. [`heap_interface`] is the default backend (a plain boxed byte
//! buffer, identity-mapped); other backends (mmap, GPU-visible memory, ...)
//! plug in by supplying their own `MemoryInterface` and passing its Pointer
//! as the `memory_interface` init parameter. [`map_copy_unmap`] is the
//! standalone cross-allocation copy helper spec.md §4.6 describes.

use std::cell::RefCell;
use std::sync::OnceLock;

use crate::context::{interface_pointer, Interface};
use crate::error::{EngineError, Status};
use crate::paramlist::{self, ParamList};
use crate::pointer::{Address, ArrayLayout, Pointer, PointerFlags};
use crate::refcount::RefCount;
use crate::slot::SlotDesignator;

pub type AllocateFn = fn(size: usize) -> Pointer;
pub type FreeFn = fn(&Pointer);
pub type MapFn = fn(&Pointer) -> *mut u8;
pub type UnmapFn = fn(&Pointer, *mut u8);

/// A pluggable memory backend's vtable (spec.md §4.6: "interfaces supply
/// allocate / free / map / unmap").
#[derive(Clone, Copy)]
pub struct MemoryInterface {
    pub name: &'static str,
    pub allocate: AllocateFn,
    pub free: FreeFn,
    pub map: MapFn,
    pub unmap: UnmapFn,
}

/// Reads the `&'static MemoryInterface` addressed by a Function Pointer.
///
/// # Safety
/// `p` must address a live, `'static` `MemoryInterface`.
unsafe fn memory_interface_ref(p: &Pointer) -> Option<&'static MemoryInterface> {
    if p.address.is_null() {
        return None;
    }
    Some(&*(p.address.raw() as *const MemoryInterface))
}

fn heap_allocate(size: usize) -> Pointer {
    let raw = Box::into_raw(vec![0u8; size].into_boxed_slice()) as *mut u8;
    Pointer {
        address: Address::Data(raw as usize),
        // Freed explicitly through `heap_free`, not the generic refcount
        // destructor — the `memory` interface's vtable owns teardown here,
        // matching every other pluggable backend.
        ref_count: RefCount::null(),
        flags: PointerFlags::WRITABLE,
        layout: ArrayLayout {
            num_of: size,
            elem_size: 1,
            elem_alignment: 1,
        },
    }
}

fn heap_free(p: &Pointer) {
    if p.address.is_null() {
        return;
    }
    // SAFETY: `p` was produced by `heap_allocate`, which records the exact
    // byte length as `layout.num_of`; this reconstructs the same boxed
    // slice `heap_allocate` leaked via `Box::into_raw`.
    unsafe {
        let slice_ptr = std::ptr::slice_from_raw_parts_mut(p.address.raw() as *mut u8, p.layout.num_of);
        drop(Box::from_raw(slice_ptr));
    }
}

fn heap_map(p: &Pointer) -> *mut u8 {
    p.address.raw() as *mut u8
}

fn heap_unmap(_p: &Pointer, _host: *mut u8) {}

static HEAP_INTERFACE: MemoryInterface = MemoryInterface {
    name: "heap",
    allocate: heap_allocate,
    free: heap_free,
    map: heap_map,
    unmap: heap_unmap,
};

/// The default backend: a plain heap buffer, identity-mapped (no real
/// map/unmap cost, since host and device address space are the same).
pub fn heap_interface() -> Pointer {
    Pointer {
        address: Address::Function(&HEAP_INTERFACE as *const MemoryInterface as usize),
        ref_count: RefCount::null(),
        flags: PointerFlags::FUNCTION,
        layout: ArrayLayout::single::<MemoryInterface>(),
    }
}

struct Store {
    mem_iface: Pointer,
    allocation: Pointer,
    mapped: RefCell<Option<usize>>,
}

fn init(params: &ParamList<'_>) -> (Status, Pointer) {
    let mem_iface_ptr = match paramlist::find(params, "memory_interface") {
        Some(p) => p.cloned_owned(),
        None => heap_interface(),
    };
    let Some(iface) = (unsafe { memory_interface_ref(&mem_iface_ptr) }) else {
        mem_iface_ptr.ref_count.decrement();
        return (Status::Err(EngineError::Interface), Pointer::null());
    };
    let Some(size_p) = paramlist::find(params, "size") else {
        mem_iface_ptr.ref_count.decrement();
        return (Status::Err(EngineError::Key), Pointer::null());
    };
    let size = unsafe { *size_p.as_ref::<u64>() as usize };
    let allocation = (iface.allocate)(size);
    (
        Status::Ok,
        Pointer::boxed(
            Store {
                mem_iface: mem_iface_ptr,
                allocation,
                mapped: RefCell::new(None),
            },
            PointerFlags::empty(),
        ),
    )
}

fn fin(data: &Pointer) {
    let store = unsafe { data.as_ref::<Store>() };
    if let Some(iface) = unsafe { memory_interface_ref(&store.mem_iface) } {
        if let Some(host) = store.mapped.borrow_mut().take() {
            (iface.unmap)(&store.allocation, host as *mut u8);
        }
        (iface.free)(&store.allocation);
    }
    store.mem_iface.ref_count.decrement();
}

fn get(data: &Pointer, slot: &SlotDesignator) -> (Status, Pointer) {
    let store = unsafe { data.as_ref::<Store>() };
    match slot.name {
        "allocation" => (Status::Ok, store.allocation.clone()),
        "size" => (
            Status::Ok,
            Pointer::boxed(store.allocation.layout.num_of as u64, PointerFlags::empty()),
        ),
        _ => (Status::Err(EngineError::Key), Pointer::null()),
    }
}

/// `act(data, "map"|"unmap", _)`: maps or unmaps the held allocation,
/// caching the host pointer `map` returns so a later `"unmap"` (or
/// finalization) can release it.
fn act(data: &Pointer, slot: &SlotDesignator, _params: &ParamList<'_>) -> Status {
    let store = unsafe { data.as_ref::<Store>() };
    let Some(iface) = (unsafe { memory_interface_ref(&store.mem_iface) }) else {
        return Status::Err(EngineError::Interface);
    };
    match slot.name {
        "map" => {
            let host = (iface.map)(&store.allocation);
            *store.mapped.borrow_mut() = Some(host as usize);
            Status::Ok
        }
        "unmap" => {
            if let Some(host) = store.mapped.borrow_mut().take() {
                (iface.unmap)(&store.allocation, host as *mut u8);
            }
            Status::Ok
        }
        _ => Status::Err(EngineError::Key),
    }
}

static INTERFACE: Interface = Interface {
    name: "memory",
    init: Some(init),
    final_fn: Some(fin),
    get: Some(get),
    set: None,
    act: Some(act),
};

pub fn interface() -> Pointer {
    static HANDLE: OnceLock<Pointer> = OnceLock::new();
    HANDLE.get_or_init(|| interface_pointer(&INTERFACE)).cloned_owned()
}

/// Maps `src`'s `[src_off, src_off + n)` range and `dst`'s `[dst_off,
/// dst_off + n)` range (through each allocation's own `MemoryInterface`),
/// memcpy's between them, and unmaps both (spec.md §4.6 "memory").
pub fn map_copy_unmap(
    dst: &Pointer,
    dst_off: usize,
    dst_iface: &MemoryInterface,
    src: &Pointer,
    src_off: usize,
    src_iface: &MemoryInterface,
    n: usize,
) -> Status {
    if dst_off + n > dst.layout.num_of || src_off + n > src.layout.num_of {
        return Status::Err(EngineError::Value);
    }
    let dst_host = (dst_iface.map)(dst);
    let src_host = (src_iface.map)(src);
    // SAFETY: both ranges were just bounds-checked against their
    // allocation's own recorded length, and `map` hands back a host pointer
    // valid for at least that length until the matching `unmap`.
    unsafe {
        std::ptr::copy_nonoverlapping(src_host.add(src_off), dst_host.add(dst_off), n);
    }
    (dst_iface.unmap)(dst, dst_host);
    (src_iface.unmap)(src, src_host);
    Status::Ok
}
