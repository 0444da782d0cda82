//! The `thread_group` built-in interface (spec.md §4.6 C6, §4.8 C8): wraps a
//! [`crate::threadgroup::ThreadGroup`] as a context. `act` with the
//! `"dispatch"` slot runs a work function across the pool, and blocks the
//! calling thread until the dispatched work item's completion callback has
//! run — a synchronous fork-join, the simplest contract an instruction
//! stream can drive without inventing an async ACT protocol.

use std::cell::RefCell;
use std::sync::mpsc;
use std::sync::OnceLock;

use crate::context::{interface_pointer, Interface};
use crate::error::{EngineError, Status};
use crate::paramlist::{self, ParamList};
use crate::pointer::{Pointer, PointerFlags};
use crate::slot::SlotDesignator;
use crate::threadgroup::{ThreadGroup, WorkItem};

struct Store(RefCell<Option<ThreadGroup>>);

fn init(params: &ParamList<'_>) -> (Status, Pointer) {
    let workers = match paramlist::find(params, "workers") {
        Some(p) => unsafe { *p.as_ref::<u64>() as usize },
        None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    };
    (
        Status::Ok,
        Pointer::boxed(Store(RefCell::new(Some(ThreadGroup::new(workers)))), PointerFlags::WRITABLE),
    )
}

fn fin(data: &Pointer) {
    let store = unsafe { data.as_ref::<Store>() };
    if let Some(group) = store.0.borrow_mut().take() {
        group.shutdown();
    }
}

/// `act(data, "dispatch", {total, work, batch_size?})`: `work`'s address is
/// a `fn(usize, usize)` — `(index, worker_index)` — reinterpreted from the
/// raw Pointer address the same way every function Pointer in this protocol
/// is (spec.md §3 "Pointer ... the discriminator is a flag bit"). Called
/// once per index in `[0, total)`, never once per batch (spec.md §4.8).
fn act(data: &Pointer, slot: &SlotDesignator, params: &ParamList<'_>) -> Status {
    if slot.name != "dispatch" {
        return Status::Err(EngineError::Key);
    }
    let Some(total_p) = paramlist::find(params, "total") else {
        return Status::Err(EngineError::Value);
    };
    let Some(work_p) = paramlist::find(params, "work") else {
        return Status::Err(EngineError::Value);
    };
    let total = unsafe { *total_p.as_ref::<u64>() as usize };
    // SAFETY: callers populate `work` with the address of a live
    // `fn(usize, usize)` for the duration of this call.
    let work_fn: fn(usize, usize) = unsafe { std::mem::transmute(work_p.address.raw()) };
    let batch_size = paramlist::find(params, "batch_size").map(|p| unsafe { *p.as_ref::<u64>() as usize });

    let store = unsafe { data.as_ref::<Store>() };
    let guard = store.0.borrow();
    let Some(group) = guard.as_ref() else {
        return Status::Err(EngineError::Resource);
    };

    let item = match batch_size {
        Some(b) => WorkItem {
            total,
            batch_size: b.max(1),
        },
        None => WorkItem::auto(total, group.worker_count()),
    };

    let (tx, rx) = mpsc::channel();
    group.dispatch(
        item,
        move |index, worker_index| work_fn(index, worker_index),
        move |_worker_index| {
            let _ = tx.send(());
        },
    );
    let _ = rx.recv();
    Status::Ok
}

static INTERFACE: Interface = Interface {
    name: "thread_group",
    init: Some(init),
    final_fn: Some(fin),
    get: None,
    set: None,
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TOTAL: AtomicUsize = AtomicUsize::new(0);
    fn record(_index: usize, _worker_index: usize) {
        TOTAL.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn act_dispatch_runs_the_work_function_across_the_pool() {
        let iface = interface();
        let params: ParamList = paramlist::view_push(None, "workers", Pointer::boxed(4u64, PointerFlags::empty()));
        let ctx_ptr = initialize(&iface, &params).unwrap();
        let ctx = unsafe { context_ref(&ctx_ptr) };

        let work_addr = record as fn(usize, usize) as usize;
        let act_params: ParamList = paramlist::view_push(
            paramlist::view_push(None, "total", Pointer::boxed(500u64, PointerFlags::empty())),
            "work",
            Pointer::function(work_addr),
        );
        let status = ctx.act(&SlotDesignator::named("dispatch"), &act_params);
        assert_eq!(status, Status::Ok);
        assert_eq!(TOTAL.load(Ordering::SeqCst), 500);

        ctx_ptr.ref_count.decrement();
    }
}
