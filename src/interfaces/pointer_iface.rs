//! The `pointer` built-in interface (spec.md §4.6 C6): wraps an *existing*
//! Pointer as a context's data without allocating new storage — the
//! "pointer-copy" interface selected when INIT resolves an empty interface
//! key. `init` takes ownership of one reference on the resulting value;
//! `get`/`set`/`act` expose array-indexed element access plus the
//! `flags`/`layout`/`num_elements`/`element_size`/`element_alignment`
//! metadata slots, honoring [`crate::pointer::ArrayLayout`]'s
//! alignment-padded element offsets. Grounded on
//! `pointer.var.c`'s `archi_context_pointer_init`/`_get`/`_set`/`_act`.

use std::sync::OnceLock;

use crate::context::{interface_pointer, Interface};
use crate::error::{EngineError, Status};
use crate::paramlist::{self, ParamList};
use crate::pointer::{Address, ArrayLayout, Pointer, PointerFlags};
use crate::slot::SlotDesignator;

/// Builds the Pointer a context's data should hold from `value` (or the
/// null Pointer if absent, per `pointer.var.c`'s `value = {0}` default)
/// overlaid with the `flags`/`layout`/`num_elements`/`element_size`/
/// `element_alignment` scalar overrides, first-match-wins per name.
fn apply_param_overrides(seed: Pointer, params: &ParamList<'_>) -> Result<Pointer, Status> {
    let mut value = seed;
    let mut value_set = false;
    let mut flags_set = false;
    let mut layout_set = false;
    let mut num_elements_set = false;
    let mut element_size_set = false;
    let mut element_alignment_set = false;

    for (name, param) in paramlist::iter(params) {
        match name {
            "value" => {
                if value_set {
                    continue;
                }
                value_set = true;
                value = param.clone();
            }
            "flags" => {
                if flags_set {
                    continue;
                }
                flags_set = true;
                value.flags = PointerFlags::from_bits_truncate(read_override_u64(param)?);
            }
            "layout" => {
                if layout_set {
                    continue;
                }
                layout_set = true;
                value.layout = read_override_layout(param)?;
            }
            "num_elements" => {
                if num_elements_set {
                    continue;
                }
                num_elements_set = true;
                value.layout.num_of = read_override_u64(param)? as usize;
            }
            "element_size" => {
                if element_size_set {
                    continue;
                }
                element_size_set = true;
                value.layout.elem_size = read_override_u64(param)? as usize;
            }
            "element_alignment" => {
                if element_alignment_set {
                    continue;
                }
                element_alignment_set = true;
                value.layout.elem_alignment = read_override_u64(param)? as usize;
            }
            _ => return Err(Status::Err(EngineError::Key)),
        }
    }

    if !value.flags.contains(PointerFlags::FUNCTION) {
        let has_data = !value.address.is_null();
        if has_data != (value.layout.num_of != 0) {
            return Err(Status::Err(EngineError::Value));
        }
        if !value.layout.is_valid() {
            return Err(Status::Err(EngineError::Value));
        }
    }

    Ok(value)
}

fn read_override_u64(param: &Pointer) -> Result<u64, Status> {
    if param.flags.contains(PointerFlags::FUNCTION) || param.address.is_null() {
        return Err(Status::Err(EngineError::Value));
    }
    Ok(unsafe { *param.as_ref::<u64>() })
}

fn read_override_layout(param: &Pointer) -> Result<ArrayLayout, Status> {
    if param.flags.contains(PointerFlags::FUNCTION) || param.address.is_null() {
        return Err(Status::Err(EngineError::Value));
    }
    Ok(unsafe { *param.as_ref::<ArrayLayout>() })
}

fn init(params: &ParamList<'_>) -> (Status, Pointer) {
    match apply_param_overrides(Pointer::null(), params) {
        Ok(mut value) => {
            value.ref_count.increment();
            (Status::Ok, value)
        }
        Err(status) => (status, Pointer::null()),
    }
}

fn fin(data: &Pointer) {
    data.ref_count.decrement();
}

/// Mutates the context's own data in place. The executor's cooperative,
/// single-threaded model (spec.md §5: interface calls on the main thread
/// must not reenter the same context) guarantees `data` is the only live
/// reference for the duration of this call — the same exclusivity contract
/// [`Pointer::as_mut`] documents.
///
/// # Safety
/// The caller must uphold that exclusivity.
unsafe fn mutate(data: &Pointer) -> &mut Pointer {
    &mut *(data as *const Pointer as *mut Pointer)
}

fn get(data: &Pointer, slot: &SlotDesignator) -> (Status, Pointer) {
    match slot.name {
        "" => {
            let Some(index) = slot.single_index() else {
                return (Status::Err(EngineError::Misuse), Pointer::null());
            };
            if data.flags.contains(PointerFlags::FUNCTION) || data.layout.elem_size == 0 {
                return (Status::Err(EngineError::Misuse), Pointer::null());
            }
            if index < 0 || index as usize >= data.layout.num_of {
                return (Status::SoftMiss, Pointer::null());
            }
            let offset = data.layout.padded_offset(index as usize);
            let elem = Pointer {
                address: Address::Data(data.address.raw() + offset),
                ref_count: data.ref_count.clone(),
                flags: data.flags & !PointerFlags::FUNCTION,
                layout: ArrayLayout {
                    num_of: data.layout.num_of - index as usize,
                    elem_size: data.layout.elem_size,
                    elem_alignment: data.layout.elem_alignment,
                },
            };
            (Status::Ok, elem)
        }
        "flags" if slot.indices.is_empty() => (
            Status::Ok,
            Pointer::field_alias(&data.flags, PointerFlags::empty(), data.ref_count.clone()),
        ),
        "layout" if slot.indices.is_empty() => (
            Status::Ok,
            Pointer::field_alias(&data.layout, PointerFlags::empty(), data.ref_count.clone()),
        ),
        "num_elements" if slot.indices.is_empty() => (
            Status::Ok,
            Pointer::field_alias(&data.layout.num_of, PointerFlags::empty(), data.ref_count.clone()),
        ),
        "element_size" if slot.indices.is_empty() => (
            Status::Ok,
            Pointer::field_alias(&data.layout.elem_size, PointerFlags::empty(), data.ref_count.clone()),
        ),
        "element_alignment" if slot.indices.is_empty() => (
            Status::Ok,
            Pointer::field_alias(&data.layout.elem_alignment, PointerFlags::empty(), data.ref_count.clone()),
        ),
        "flags" | "layout" | "num_elements" | "element_size" | "element_alignment" => {
            (Status::Err(EngineError::Misuse), Pointer::null())
        }
        _ => (Status::Err(EngineError::Key), Pointer::null()),
    }
}

fn set(data: &Pointer, slot: &SlotDesignator, value: Pointer) -> Status {
    match slot.name {
        "value" => {
            if !slot.indices.is_empty() {
                return Status::Err(EngineError::Misuse);
            }
            value.ref_count.increment();
            data.ref_count.decrement();
            // SAFETY: single-threaded cooperative execution (spec.md §5).
            let data = unsafe { mutate(data) };
            data.address = value.address;
            data.flags = value.flags;
            data.layout = value.layout;
            data.ref_count = value.ref_count;
            Status::Ok
        }
        "" => {
            if !data.flags.contains(PointerFlags::WRITABLE) {
                return Status::Err(EngineError::Misuse);
            }
            let Some(index) = slot.single_index() else {
                return Status::Err(EngineError::Key);
            };
            if index < 0 || index as usize >= data.layout.num_of {
                return Status::Err(EngineError::Key);
            }
            if value.layout.elem_size != data.layout.elem_size {
                return Status::Err(EngineError::Value);
            }
            let offset = data.layout.padded_offset(index as usize);
            // SAFETY: both addresses describe `data.layout.elem_size` bytes
            // of initialized memory — `data`'s by its own layout invariant,
            // `value`'s because its layout matches and the caller upholds
            // Pointer's contract.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    value.address.raw() as *const u8,
                    (data.address.raw() + offset) as *mut u8,
                    data.layout.elem_size,
                );
            }
            value.ref_count.decrement();
            Status::Ok
        }
        _ => Status::Err(EngineError::Key),
    }
}

/// `act(data, "update", {value?, flags?, layout?, num_elements?,
/// element_size?, element_alignment?})`: the same override set `init`
/// accepts, replacing the context's current data wholesale (spec.md §4.6,
/// grounded on `pointer.var.c`'s `act`'s `"update"` branch).
fn act_update(data: &Pointer, params: &ParamList<'_>) -> Status {
    let seed = Pointer {
        address: data.address,
        ref_count: data.ref_count.clone(),
        flags: data.flags,
        layout: data.layout,
    };
    match apply_param_overrides(seed, params) {
        Ok(mut value) => {
            value.ref_count.increment();
            data.ref_count.decrement();
            // SAFETY: single-threaded cooperative execution (spec.md §5).
            let data = unsafe { mutate(data) };
            data.address = value.address;
            data.flags = value.flags;
            data.layout = value.layout;
            data.ref_count = value.ref_count;
            Status::Ok
        }
        Err(status) => status,
    }
}

/// `act(data, "copy"[, index], {source, source_offset?, num_elements?})`:
/// byte-copies (overlap-safe) a run of elements from `source` into `data`
/// starting at the optional destination index (default 0), matching
/// `pointer.var.c`'s `"copy"` branch.
fn act_copy(data: &Pointer, slot: &SlotDesignator, params: &ParamList<'_>) -> Status {
    if slot.indices.len() > 1 {
        return Status::Err(EngineError::Misuse);
    }
    if data.flags.contains(PointerFlags::FUNCTION) || data.address.is_null() || data.layout.elem_size == 0 {
        return Status::Err(EngineError::Misuse);
    }
    let offset = slot.indices.first().copied().unwrap_or(0);
    if offset < 0 || offset as usize >= data.layout.num_of {
        return Status::Err(EngineError::Misuse);
    }
    let offset = offset as usize;

    let Some(source) = paramlist::find(params, "source") else {
        return Status::Err(EngineError::Value);
    };
    if source.flags.contains(PointerFlags::FUNCTION) || source.address.is_null() {
        return Status::Err(EngineError::Value);
    }
    let source_offset = paramlist::find(params, "source_offset")
        .map(|p| unsafe { *p.as_ref::<u64>() as usize })
        .unwrap_or(0);
    let num_elements_override =
        paramlist::find(params, "num_elements").map(|p| unsafe { *p.as_ref::<u64>() as usize });

    if source.layout.elem_size != data.layout.elem_size {
        return Status::Err(EngineError::Misuse);
    }
    let dest_padded = data.layout.padded_offset(1);
    let source_padded = source.layout.padded_offset(1);
    if dest_padded != source_padded {
        return Status::Err(EngineError::Misuse);
    }

    let num_elements = num_elements_override.unwrap_or(data.layout.num_of - offset);
    if source_offset >= source.layout.num_of || num_elements > source.layout.num_of - source_offset {
        return Status::Err(EngineError::Misuse);
    }

    // SAFETY: both ranges describe initialized memory of `num_elements *
    // dest_padded` bytes, per the layout checks above; `copy` (not
    // `copy_nonoverlapping`) since source and dest may be the same buffer.
    unsafe {
        std::ptr::copy(
            (source.address.raw() + source_offset * source_padded) as *const u8,
            (data.address.raw() + offset * dest_padded) as *mut u8,
            num_elements * dest_padded,
        );
    }
    Status::Ok
}

fn act(data: &Pointer, slot: &SlotDesignator, params: &ParamList<'_>) -> Status {
    match slot.name {
        "update" => {
            if !slot.indices.is_empty() {
                return Status::Err(EngineError::Misuse);
            }
            act_update(data, params)
        }
        "copy" => act_copy(data, slot, params),
        _ => Status::Err(EngineError::Key),
    }
}

static INTERFACE: Interface = Interface {
    name: "pointer",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{context_ref, initialize};
    use crate::refcount::RefCount;

    #[test]
    fn indexed_get_and_set_honor_alignment_padding() {
        let mut backing = [0i32, 0, 0];
        let target = Pointer {
            address: Address::Data(backing.as_mut_ptr() as usize),
            ref_count: RefCount::null(),
            flags: PointerFlags::WRITABLE,
            layout: ArrayLayout {
                num_of: 3,
                elem_size: 4,
                elem_alignment: 4,
            },
        };

        let iface = interface();
        let params: ParamList = paramlist::view_push(None, "value", target);
        let ctx_ptr = initialize(&iface, &params).unwrap();
        let ctx = unsafe { context_ref(&ctx_ptr) };

        let write_value = Pointer::boxed(99i32, PointerFlags::empty());
        assert_eq!(
            ctx.set(&SlotDesignator::named_indexed("", &[1]), write_value),
            Status::Ok
        );
        assert_eq!(backing[1], 99);

        let (status, elem) = ctx.get(&SlotDesignator::named_indexed("", &[1]));
        assert_eq!(status, Status::Ok);
        assert_eq!(unsafe { *elem.as_ref::<i32>() }, 99);

        ctx_ptr.ref_count.decrement();
    }

    #[test]
    fn init_applies_num_elements_and_flags_overrides_onto_value() {
        let mut backing = [0i32; 4];
        let target = Pointer {
            address: Address::Data(backing.as_mut_ptr() as usize),
            ref_count: RefCount::null(),
            flags: PointerFlags::empty(),
            layout: ArrayLayout {
                num_of: 4,
                elem_size: 4,
                elem_alignment: 4,
            },
        };

        let iface = interface();
        let params: ParamList = paramlist::view_push(
            paramlist::view_push(
                paramlist::view_push(None, "value", target),
                "num_elements",
                Pointer::boxed(2u64, PointerFlags::empty()),
            ),
            "flags",
            Pointer::boxed(PointerFlags::WRITABLE.bits(), PointerFlags::empty()),
        );
        let ctx_ptr = initialize(&iface, &params).unwrap();
        let ctx = unsafe { context_ref(&ctx_ptr) };

        let (status, num_elements) = ctx.get(&SlotDesignator::named("num_elements"));
        assert_eq!(status, Status::Ok);
        assert_eq!(unsafe { *num_elements.as_ref::<usize>() }, 2);

        // The overridden count narrowed the array: index 2 is now out of range.
        let (status, _) = ctx.get(&SlotDesignator::named_indexed("", &[2]));
        assert_eq!(status, Status::SoftMiss);

        let write_value = Pointer::boxed(7i32, PointerFlags::empty());
        assert_eq!(
            ctx.set(&SlotDesignator::named_indexed("", &[0]), write_value),
            Status::Ok,
            "the flags override must have made the element slot writable"
        );
        assert_eq!(backing[0], 7);

        ctx_ptr.ref_count.decrement();
    }

    #[test]
    fn get_flags_aliases_the_context_and_keeps_it_alive_if_retained() {
        let value = Pointer::boxed(42u64, PointerFlags::WRITABLE);
        let iface = interface();
        let params: ParamList = paramlist::view_push(None, "value", value);
        let ctx_ptr = initialize(&iface, &params).unwrap();
        let ctx = unsafe { context_ref(&ctx_ptr) };

        let (status, flags_alias) = ctx.get(&SlotDesignator::named("flags"));
        assert_eq!(status, Status::Ok);
        assert!(unsafe { *flags_alias.as_ref::<PointerFlags>() }.contains(PointerFlags::WRITABLE));
        assert!(!flags_alias.ref_count.is_null(), "the alias must share the real refcount, not a null one");

        flags_alias.ref_count.decrement();
        ctx_ptr.ref_count.decrement();
    }

    #[test]
    fn act_update_replaces_the_whole_value() {
        let first = Pointer::boxed(1u64, PointerFlags::empty());
        let iface = interface();
        let params: ParamList = paramlist::view_push(None, "value", first);
        let ctx_ptr = initialize(&iface, &params).unwrap();
        let ctx = unsafe { context_ref(&ctx_ptr) };

        let second = Pointer::boxed(2u64, PointerFlags::empty());
        let act_params: ParamList = paramlist::view_push(None, "value", second);
        let status = ctx.act(&SlotDesignator::named("update"), &act_params);
        assert_eq!(status, Status::Ok);

        let (status, whole) = ctx.get(&SlotDesignator::whole());
        assert_eq!(status, Status::Ok);
        assert_eq!(unsafe { *whole.as_ref::<u64>() }, 2);

        ctx_ptr.ref_count.decrement();
    }

    #[test]
    fn act_copy_moves_a_run_of_elements_between_contexts() {
        let mut dest_backing = [0i32; 4];
        let dest = Pointer {
            address: Address::Data(dest_backing.as_mut_ptr() as usize),
            ref_count: RefCount::null(),
            flags: PointerFlags::WRITABLE,
            layout: ArrayLayout {
                num_of: 4,
                elem_size: 4,
                elem_alignment: 4,
            },
        };
        let iface = interface();
        let params: ParamList = paramlist::view_push(None, "value", dest);
        let ctx_ptr = initialize(&iface, &params).unwrap();
        let ctx = unsafe { context_ref(&ctx_ptr) };

        let source_backing = [10i32, 20, 30, 40];
        let source = Pointer {
            address: Address::Data(source_backing.as_ptr() as usize),
            ref_count: RefCount::null(),
            flags: PointerFlags::empty(),
            layout: ArrayLayout {
                num_of: 4,
                elem_size: 4,
                elem_alignment: 4,
            },
        };
        let act_params: ParamList = paramlist::view_push(
            paramlist::view_push(None, "source", source),
            "num_elements",
            Pointer::boxed(2u64, PointerFlags::empty()),
        );
        let status = ctx.act(&SlotDesignator::named_indexed("copy", &[1]), &act_params);
        assert_eq!(status, Status::Ok);
        assert_eq!(dest_backing, [0, 10, 20, 0]);

        ctx_ptr.ref_count.decrement();
    }
}
