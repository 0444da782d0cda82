//! Reference counter (spec.md §3 "Reference counter", §4.1 C1).
//!
//! A [`RefCount`] is a *handle*, not an owner in the Rust-Drop sense: cloning
//! the handle does not bump the logical count (that is exactly what
//! [`RefCount::increment`] is for — Pointers are copy-by-value and ownership
//! is conveyed by explicitly cloning-then-incrementing). The handle itself is
//! an `Arc` purely so the underlying cell survives as long as any clone of
//! the handle is reachable; destroying the *object the counter guards* is a
//! separate, explicit act performed by [`RefCount::decrement`].

use std::fmt;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Mutex;

type Destructor = Box<dyn FnOnce() + Send>;

struct RefCountInner {
    count: AtomicUsize,
    destructor: Mutex<Option<Destructor>>,
}

/// A handle to a reference-counted resource. `None` is the null handle,
/// valid (as a no-op target) for every operation, per spec.md §4.1.
#[derive(Clone)]
pub struct RefCount(Option<std::sync::Arc<RefCountInner>>);

impl fmt::Debug for RefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => write!(f, "RefCount(null)"),
            Some(inner) => write!(f, "RefCount(count={})", inner.count.load(Ordering::Relaxed)),
        }
    }
}

impl RefCount {
    /// The null handle.
    pub fn null() -> Self {
        RefCount(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Allocates a new counter with initial value 1, owning `destructor`.
    /// spec.md §4.1: "fails returning null ... on null destructor"; since
    /// `destructor` here is a required closure (not an optional function
    /// pointer) that failure mode collapses to "caller must supply one".
    pub fn alloc(destructor: impl FnOnce() + Send + 'static) -> Self {
        RefCount(Some(std::sync::Arc::new(RefCountInner {
            count: AtomicUsize::new(1),
            destructor: Mutex::new(Some(Box::new(destructor))),
        })))
    }

    /// Unconditional free without invoking the destructor. No-op on null.
    /// Used by error-recovery paths that never surfaced the counter outside
    /// the failing call (spec.md §4.1, §7 "init routines must fully roll
    /// back on any failure").
    pub fn free(self) {
        if let Some(inner) = self.0 {
            // Drop the destructor without calling it; dropping the closure
            // (and whatever it captured) is the only cleanup that happens.
            if let Ok(mut slot) = inner.destructor.lock() {
                slot.take();
            }
        }
    }

    /// Relaxed-atomic increment. No-op on null.
    pub fn increment(&self) {
        if let Some(inner) = &self.0 {
            inner.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Release-atomic decrement; on the 1→0 transition, acquire-fences and
    /// invokes the destructor. Returns `true` only when this call destroyed
    /// the object — the caller must not use the handle afterwards.
    /// No-op on null, returning `false`.
    pub fn decrement(&self) -> bool {
        let Some(inner) = &self.0 else {
            return false;
        };
        let previous = inner.count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "refcount underflow");
        if previous == 1 {
            fence(Ordering::Acquire);
            let destructor = inner.destructor.lock().ok().and_then(|mut s| s.take());
            if let Some(destructor) = destructor {
                destructor();
            }
            true
        } else {
            false
        }
    }

    /// Current logical count, for diagnostics/tests only — not part of the
    /// spec'd API, since the production protocol never inspects it directly.
    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.0
            .as_ref()
            .map(|inner| inner.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc;

    #[test]
    fn null_handle_is_a_safe_no_op() {
        let rc = RefCount::null();
        rc.increment();
        assert!(!rc.decrement());
        rc.free();
    }

    #[test]
    fn single_owner_destroys_on_first_decrement() {
        let destroyed = Arc::new(StdAtomicUsize::new(0));
        let d = destroyed.clone();
        let rc = RefCount::alloc(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert!(rc.decrement());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_owners_destroy_only_on_last_decrement() {
        let destroyed = Arc::new(StdAtomicUsize::new(0));
        let d = destroyed.clone();
        let rc = RefCount::alloc(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        rc.increment();
        assert!(!rc.decrement());
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert!(rc.decrement());
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn free_skips_destructor() {
        let destroyed = Arc::new(StdAtomicUsize::new(0));
        let d = destroyed.clone();
        let rc = RefCount::alloc(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        rc.free();
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    }
}
