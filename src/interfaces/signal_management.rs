//! The `signal_management` built-in interface (spec.md §4.6 C6, §4.7 C7):
//! wraps a [`crate::signal::SignalManager`] as a context, so a signal
//! watcher can be started, queried, and torn down through the same
//! INIT/FINAL/get instructions as any other context.

use std::cell::RefCell;
use std::sync::OnceLock;

use crate::context::{interface_pointer, Interface};
use crate::error::{EngineError, Status};
use crate::paramlist::{self, ParamList};
use crate::pointer::{Pointer, PointerFlags};
use crate::signal::{SignalManager, WatchSet};
use crate::slot::SlotDesignator;

struct Store(RefCell<Option<SignalManager>>);

fn init(params: &ParamList<'_>) -> (Status, Pointer) {
    let signals: Vec<i32> = paramlist::iter(params)
        .filter(|(name, _)| *name == "signal")
        .map(|(_, value)| unsafe { *value.as_ref::<i32>() })
        .collect();
    if signals.is_empty() {
        return (Status::Err(EngineError::Value), Pointer::null());
    }
    match SignalManager::start(signals) {
        Ok(manager) => (
            Status::Ok,
            Pointer::boxed(Store(RefCell::new(Some(manager))), PointerFlags::WRITABLE),
        ),
        Err(_) => (Status::Err(EngineError::Resource), Pointer::null()),
    }
}

fn fin(data: &Pointer) {
    let store = unsafe { data.as_ref::<Store>() };
    if let Some(manager) = store.0.borrow_mut().take() {
        manager.stop();
    }
}

fn get(data: &Pointer, slot: &SlotDesignator) -> (Status, Pointer) {
    let store = unsafe { data.as_ref::<Store>() };
    let guard = store.0.borrow();
    let Some(manager) = guard.as_ref() else {
        return (Status::Err(EngineError::Resource), Pointer::null());
    };
    match slot.name {
        "is_set" => match slot.single_index() {
            Some(signo) => (
                Status::Ok,
                Pointer::boxed(manager.watch_set().is_set(signo as i32), PointerFlags::empty()),
            ),
            None => (Status::Err(EngineError::Key), Pointer::null()),
        },
        _ => (Status::Err(EngineError::Key), Pointer::null()),
    }
}

/// `set(data, "handler.<name>", value)`: registers a handler through the
/// uniform context protocol (spec.md §6 slot table: `signal_management` set
/// slots `handler.<name>`). `value`'s address is a `fn(i32, &WatchSet) ->
/// bool`, reinterpreted the same way `thread_group`'s `act("dispatch", ...)`
/// reinterprets its `work` parameter (spec.md §3 "the discriminator is a
/// flag bit"). The name after `handler.` only needs to parse: this runtime's
/// `SignalManager` dispatches every registered handler on every delivery, so
/// there is no per-name table to key into beyond accepting the slot shape.
fn set(data: &Pointer, slot: &SlotDesignator, value: Pointer) -> Status {
    if slot.name.strip_prefix("handler.").is_none() {
        value.ref_count.decrement();
        return Status::Err(EngineError::Key);
    }
    let store = unsafe { data.as_ref::<Store>() };
    let guard = store.0.borrow();
    let Some(manager) = guard.as_ref() else {
        value.ref_count.decrement();
        return Status::Err(EngineError::Resource);
    };
    // SAFETY: callers populate `value` with the address of a live
    // `fn(i32, &WatchSet) -> bool` for as long as the signal manager runs.
    let handler_fn: fn(i32, &WatchSet) -> bool = unsafe { std::mem::transmute(value.address.raw()) };
    manager.register(Box::new(move |signo, watch_set| handler_fn(signo, watch_set)));
    value.ref_count.decrement();
    Status::Ok
}

static INTERFACE: Interface = Interface {
    name: "signal_management",
    init: Some(init),
    final_fn: Some(fin),
    get: Some(get),
    set: Some(set),
    act: None,
};

pub fn interface() -> Pointer {
    static HANDLE: OnceLock<Pointer> = OnceLock::new();
    HANDLE.get_or_init(|| interface_pointer(&INTERFACE)).cloned_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{context_ref, initialize};

    #[test]
    fn watch_set_flag_is_queryable_through_the_context() {
        let iface = interface();
        let params: ParamList = paramlist::view_push(
            None,
            "signal",
            Pointer::boxed(signal_hook::consts::SIGUSR2, PointerFlags::empty()),
        );
        let ctx_ptr = initialize(&iface, &params).unwrap();
        let ctx = unsafe { context_ref(&ctx_ptr) };

        let (status, value) =
            ctx.get(&SlotDesignator::named_indexed("is_set", &[signal_hook::consts::SIGUSR2 as isize]));
        assert_eq!(status, Status::Ok);
        assert!(!unsafe { *value.as_ref::<bool>() });

        ctx_ptr.ref_count.decrement();
    }

    static HANDLER_CALLS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
    fn counting_handler(_signo: i32, _watch_set: &WatchSet) -> bool {
        HANDLER_CALLS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        true
    }

    #[test]
    fn handler_registers_through_the_set_protocol() {
        let iface = interface();
        let params: ParamList = paramlist::view_push(
            None,
            "signal",
            Pointer::boxed(signal_hook::consts::SIGUSR1, PointerFlags::empty()),
        );
        let ctx_ptr = initialize(&iface, &params).unwrap();
        let ctx = unsafe { context_ref(&ctx_ptr) };

        let handler_addr = counting_handler as fn(i32, &WatchSet) -> bool as usize;
        let status = ctx.set(&SlotDesignator::named("handler.h1"), Pointer::function(handler_addr));
        assert_eq!(status, Status::Ok);

        unsafe {
            libc::raise(signal_hook::consts::SIGUSR1);
        }
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(200);
        while HANDLER_CALLS.load(std::sync::atomic::Ordering::SeqCst) == 0
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(HANDLER_CALLS.load(std::sync::atomic::Ordering::SeqCst) >= 1);

        ctx_ptr.ref_count.decrement();
    }
}
