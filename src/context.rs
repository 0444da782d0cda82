//! Context & interface protocol (spec.md §3 "Context", §4.2 C4).
//!
//! An [`Interface`] is an immutable vtable of five optional function
//! pointers, stored and passed around **by value** rather than as a trait
//! object (spec.md §9 Design Notes: "interfaces are data the runtime passes
//! around and stores by value"). A [`Context`] is the heap-allocated wrapper
//! that owns an attached interface reference and the context's current
//! public data Pointer; its lifetime is governed entirely by the refcount
//! discipline in [`crate::refcount`] — there is no `Drop` impl here, only an
//! explicit destructor chain wired up once, in [`initialize`].

use crate::error::{EngineError, Status};
use crate::paramlist::ParamList;
use crate::pointer::{ArrayLayout, Pointer, PointerFlags};
use crate::refcount::RefCount;
use crate::slot::SlotDesignator;

pub type InitFn = for<'a> fn(params: &ParamList<'a>) -> (Status, Pointer);
pub type FinalFn = fn(data: &Pointer);
pub type GetFn = fn(data: &Pointer, slot: &SlotDesignator) -> (Status, Pointer);
pub type SetFn = fn(data: &Pointer, slot: &SlotDesignator, value: Pointer) -> Status;
pub type ActFn = for<'a> fn(data: &Pointer, slot: &SlotDesignator, params: &ParamList<'a>) -> Status;

/// An immutable vtable of five optional operations (spec.md §4.2).
#[derive(Clone, Copy)]
pub struct Interface {
    pub name: &'static str,
    pub init: Option<InitFn>,
    pub final_fn: Option<FinalFn>,
    pub get: Option<GetFn>,
    pub set: Option<SetFn>,
    pub act: Option<ActFn>,
}

/// Builds a fresh shared handle over a built-in interface's vtable: a
/// `RefCount` whose destructor is a no-op, since the vtable itself is
/// `'static` and outlives the process. Every `interfaces::*` module calls
/// this once behind a `OnceLock<Pointer>` and hands out `.cloned_owned()`
/// clones of that single handle, so every context attached to the same
/// built-in interface shares one counter — the in-process analogue of many
/// contexts sharing one dynamically loaded library's vtable (see
/// `interfaces::library`).
pub fn interface_pointer(iface: &'static Interface) -> Pointer {
    Pointer {
        address: crate::pointer::Address::Function(iface as *const Interface as usize),
        ref_count: RefCount::alloc(|| {}),
        flags: PointerFlags::FUNCTION,
        layout: ArrayLayout::single::<Interface>(),
    }
}

/// Reads the `&'static Interface` addressed by a Function Pointer.
///
/// # Safety
/// `p` must address a live `Interface` (built-in interfaces guarantee this
/// by construction: they only ever hand out Pointers built by
/// [`interface_pointer`] over a `'static` vtable).
pub unsafe fn interface_ref(p: &Pointer) -> Option<&'static Interface> {
    if p.address.is_null() {
        return None;
    }
    Some(&*(p.address.raw() as *const Interface))
}

/// The context wrapper (spec.md §3 "Context").
pub struct Context {
    /// The interface this context was initialized with; this Pointer's
    /// refcount was bumped on attachment and is released on finalization.
    pub interface: Pointer,
    /// The context's current public data Pointer. Its `ref_count` aliases
    /// the same handle that guards this whole `Context`'s lifetime, so
    /// assigning `data.clone()` elsewhere (SET_CONTEXT) correctly keeps the
    /// context alive for as long as that assignment is held.
    pub data: Pointer,
    /// The handle `init` originally produced, preserved so it can be
    /// restored into the `data` view handed to `final_fn` (some destructors
    /// inspect it).
    original_refcount: RefCount,
}

impl Context {
    /// `get` with the whole-context designator returns `data` directly
    /// without touching `get_fn` (spec.md §4.2).
    pub fn get(&self, slot: &SlotDesignator) -> (Status, Pointer) {
        if slot.is_whole() {
            return (Status::Ok, self.data.clone());
        }
        let Some(iface) = (unsafe { interface_ref(&self.interface) }) else {
            return (Status::Err(EngineError::Interface), Pointer::null());
        };
        match iface.get {
            Some(f) => f(&self.data, slot),
            None => (Status::Err(EngineError::Interface), Pointer::null()),
        }
    }

    /// `set` with the whole-context designator is forbidden (spec.md §4.2).
    pub fn set(&self, slot: &SlotDesignator, value: Pointer) -> Status {
        if slot.is_whole() {
            return Status::Err(EngineError::Misuse);
        }
        let Some(iface) = (unsafe { interface_ref(&self.interface) }) else {
            return Status::Err(EngineError::Interface);
        };
        match iface.set {
            Some(f) => f(&self.data, slot, value),
            None => Status::Err(EngineError::Interface),
        }
    }

    pub fn act(&self, slot: &SlotDesignator, params: &ParamList<'_>) -> Status {
        let Some(iface) = (unsafe { interface_ref(&self.interface) }) else {
            return Status::Err(EngineError::Interface);
        };
        match iface.act {
            Some(f) => f(&self.data, slot, params),
            None => Status::Err(EngineError::Interface),
        }
    }
}

/// `copy_slot(dst, dst_slot, src, src_slot) = src.get(src_slot) -> v;
/// dst.set(dst_slot, v)`, with early error propagation (spec.md §4.2).
pub fn copy_slot(
    dst: &Context,
    dst_slot: &SlotDesignator,
    src: &Context,
    src_slot: &SlotDesignator,
) -> Status {
    let (status, value) = src.get(src_slot);
    match status {
        Status::Ok => dst.set(dst_slot, value),
        other => other,
    }
}

/// Initializes a new context from `interface_ptr` and `params`, returning a
/// Pointer addressing the heap-allocated [`Context`] wrapper; the Pointer's
/// refcount is the one whose destructor runs the wrapper's strict teardown
/// sequence (spec.md §4.2): restore `data.ref_count`, call `final_fn`,
/// decrement the interface's refcount, free the wrapper.
pub fn initialize(interface_ptr: &Pointer, params: &ParamList<'_>) -> Result<Pointer, EngineError> {
    let iface = unsafe { interface_ref(interface_ptr) }.ok_or(EngineError::Interface)?;
    let init_fn = iface.init.ok_or(EngineError::Interface)?;

    let (status, data0) = init_fn(params);
    if let Status::Err(e) = status {
        return Err(e);
    }

    let original_refcount = data0.ref_count.clone();
    let attached_interface = interface_ptr.cloned_owned();
    let final_fn = iface.final_fn;

    let data_address = data0.address;
    let data_flags = data0.flags;
    let data_layout = data0.layout;
    let original_for_drop = original_refcount.clone();
    let interface_for_drop = attached_interface.clone();

    // The `Context` facade is what the registry ends up holding a Pointer
    // to; its own lifetime is governed by the very refcount we're about to
    // build below (`data.ref_count` is patched to alias it once built), so
    // we box it first and fix up the field after — a one-time,
    // self-referential wiring rather than two separate allocations.
    let facade_raw = Box::into_raw(Box::new(Context {
        interface: attached_interface,
        data: Pointer {
            address: data_address,
            ref_count: RefCount::null(),
            flags: data_flags,
            layout: data_layout,
        },
        original_refcount,
    }));

    let wrapper_rc = RefCount::alloc(move || {
        // SAFETY: `facade_raw` was produced by `Box::into_raw` above and
        // this closure runs at most once, on the refcount's 1->0
        // transition, so reclaiming the box here is sound.
        let facade = unsafe { Box::from_raw(facade_raw) };
        let data_view = Pointer {
            address: data_address,
            ref_count: original_for_drop.clone(),
            flags: data_flags,
            layout: data_layout,
        };
        if let Some(f) = final_fn {
            f(&data_view);
        }
        interface_for_drop.ref_count.decrement();
        drop(facade);
    });

    // SAFETY: `facade_raw` is still exclusively ours; nothing has read
    // `data.ref_count` yet.
    unsafe {
        (*facade_raw).data.ref_count = wrapper_rc.clone();
    }

    Ok(Pointer {
        address: crate::pointer::Address::Data(facade_raw as usize),
        ref_count: wrapper_rc,
        flags: PointerFlags::empty(),
        layout: ArrayLayout::single::<Context>(),
    })
}

/// Reads the [`Context`] addressed by a registry-entry Pointer. The
/// returned lifetime is deliberately not tied to `p`'s borrow — the
/// `Context` lives on the heap for as long as its refcount says it does,
/// independent of any particular Pointer value that happens to address it
/// (several Pointers, e.g. every `registry.get` of the same key, address
/// the same Context) — so callers choose the lifetime that matches how
/// long they know the refcount will hold.
///
/// # Safety
/// `p` must have been produced by [`initialize`], and the caller is
/// responsible for not outliving the context's actual refcounted lifetime.
pub unsafe fn context_ref<'a>(p: &Pointer) -> &'a Context {
    &*(p.address.raw() as *const Context)
}
