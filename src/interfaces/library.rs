//! The `library` built-in interface (spec.md §4.6 C6): wraps a dynamically
//! loaded shared object (`dlopen`/`dlsym`/`dlclose`, via `libc`) as a
//! context. `get` with a symbol name resolves that symbol; a preceding `act`
//! on the same symbol name stages the attributes (flags/layout) the next
//! `get` of that symbol reports, then those staged attributes are consumed —
//! subsequent gets of the same symbol fall back to the interface's defaults
//! (a plain function Pointer with no declared layout) until `act` stages
//! again (spec.md §4.6 "library").

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CString;
use std::sync::OnceLock;

use crate::context::{interface_pointer, Interface};
use crate::error::{EngineError, Status};
use crate::paramlist::{self, ParamList};
use crate::pointer::{Address, ArrayLayout, Pointer, PointerFlags};
use crate::refcount::RefCount;
use crate::slot::SlotDesignator;

/// A `dlopen` handle. Raw and process-global once loaded, so it is sound to
/// hand across threads; we assert that explicitly since `*mut c_void` is not
/// `Send` by default.
struct Handle(*mut libc::c_void);
unsafe impl Send for Handle {}

#[derive(Clone, Copy, Default)]
struct StagedAttrs {
    flags: PointerFlags,
    layout: ArrayLayout,
}

struct Store {
    handle: Handle,
    staged: RefCell<HashMap<String, StagedAttrs>>,
}

fn init(params: &ParamList<'_>) -> (Status, Pointer) {
    let Some(path_p) = paramlist::find(params, "path") else {
        return (Status::Err(EngineError::Key), Pointer::null());
    };
    let path = unsafe { path_p.as_ref::<String>() };
    // An empty path means "the main program's own symbol table", matching
    // `dlopen(NULL, ...)` rather than a real empty filename.
    let cpath = if path.is_empty() {
        None
    } else {
        match CString::new(path.as_str()) {
            Ok(c) => Some(c),
            Err(_) => return (Status::Err(EngineError::Value), Pointer::null()),
        }
    };
    let ptr = cpath.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());
    // SAFETY: `ptr` is either null or a valid NUL-terminated C string for
    // the duration of this call; `dlopen` does not retain it past return.
    let raw = unsafe { libc::dlopen(ptr, libc::RTLD_NOW | libc::RTLD_LOCAL) };
    if raw.is_null() {
        return (Status::Err(EngineError::Resource), Pointer::null());
    }
    (
        Status::Ok,
        Pointer::boxed(
            Store {
                handle: Handle(raw),
                staged: RefCell::new(HashMap::new()),
            },
            PointerFlags::empty(),
        ),
    )
}

fn fin(data: &Pointer) {
    let store = unsafe { data.as_ref::<Store>() };
    // SAFETY: `handle` was produced by a successful `dlopen` in `init` and
    // is closed exactly once, here, on the context's last decrement.
    unsafe {
        libc::dlclose(store.handle.0);
    }
}

fn get(data: &Pointer, slot: &SlotDesignator) -> (Status, Pointer) {
    let store = unsafe { data.as_ref::<Store>() };
    let Ok(cname) = CString::new(slot.name) else {
        return (Status::Err(EngineError::Value), Pointer::null());
    };
    // SAFETY: `store.handle.0` is a live handle for the duration of this
    // call; the returned symbol address, if non-null, remains valid for as
    // long as the library stays loaded.
    let addr = unsafe { libc::dlsym(store.handle.0, cname.as_ptr()) } as usize;
    // Staged attributes are consumed by this call regardless of whether the
    // symbol actually resolved (spec.md §9 Open Questions: "this spec
    // declares they are consumed regardless").
    let attrs = store.staged.borrow_mut().remove(slot.name).unwrap_or_default();
    if addr == 0 {
        return (Status::SoftMiss, Pointer::null());
    }
    (
        Status::Ok,
        Pointer {
            address: Address::Function(addr),
            ref_count: RefCount::null(),
            flags: attrs.flags | PointerFlags::FUNCTION,
            layout: attrs.layout,
        },
    )
}

/// `act(data, symbol_name, {flags?, num_elements?, element_size?,
/// element_alignment?})` stages the attributes the next `get` of
/// `symbol_name` reports.
fn act(data: &Pointer, slot: &SlotDesignator, params: &ParamList<'_>) -> Status {
    let store = unsafe { data.as_ref::<Store>() };
    let flags = match paramlist::find(params, "flags") {
        Some(p) => PointerFlags::from_bits_truncate(unsafe { *p.as_ref::<u64>() }),
        None => PointerFlags::empty(),
    };
    let layout = ArrayLayout {
        num_of: paramlist::find(params, "num_elements")
            .map(|p| unsafe { *p.as_ref::<u64>() as usize })
            .unwrap_or(0),
        elem_size: paramlist::find(params, "element_size")
            .map(|p| unsafe { *p.as_ref::<u64>() as usize })
            .unwrap_or(0),
        elem_alignment: paramlist::find(params, "element_alignment")
            .map(|p| unsafe { *p.as_ref::<u64>() as usize })
            .unwrap_or(0),
    };
    if !layout.is_valid() {
        return Status::Err(EngineError::Value);
    }
    store
        .staged
        .borrow_mut()
        .insert(slot.name.to_owned(), StagedAttrs { flags, layout });
    Status::Ok
}

static INTERFACE: Interface = Interface {
    name: "library",
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
