//! The universal value: [`Pointer`] (spec.md §3 "Pointer (the universal
//! value)", §4.1).
//!
//! A `Pointer` is copy-by-value; ownership of whatever it references is
//! conveyed by cloning the [`RefCount`] handle and incrementing it
//! (`Pointer::clone` does **not** increment — callers that mean to take a new
//! owning reference call [`Pointer::cloned_owned`]).

use std::fmt;

use crate::error::{EngineError, Status};
use crate::refcount::RefCount;

bitflags::bitflags! {
    /// High bits are reserved by the protocol; the remaining bits are free
    /// for interfaces to define their own per-slot meaning (spec.md §3).
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct PointerFlags: u64 {
        /// The address names a function, not data.
        const FUNCTION = 1 << 63;
        /// The data is writable in place (required by e.g. `pointer` interface's set).
        const WRITABLE = 1 << 62;
    }
}

/// `{ num_of, elem_size, elem_alignment }` — spec.md §3.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ArrayLayout {
    pub num_of: usize,
    pub elem_size: usize,
    pub elem_alignment: usize,
}

impl ArrayLayout {
    pub const NONE: ArrayLayout = ArrayLayout {
        num_of: 0,
        elem_size: 0,
        elem_alignment: 0,
    };

    pub fn single<T>() -> Self {
        ArrayLayout {
            num_of: 1,
            elem_size: std::mem::size_of::<T>(),
            elem_alignment: std::mem::align_of::<T>(),
        }
    }

    /// spec.md §3 invariant: alignment is 0 or a power of two.
    pub fn is_valid(&self) -> bool {
        self.elem_alignment == 0 || self.elem_alignment.is_power_of_two()
    }

    /// Byte offset of element `index`, honoring alignment padding
    /// (spec.md §4.6 "pointer" interface: "byte offset = index × padded
    /// element size, where padding honors alignment").
    pub fn padded_offset(&self, index: usize) -> usize {
        let align = self.elem_alignment.max(1);
        let padded = (self.elem_size + align - 1) / align * align;
        index * padded
    }
}

/// Raw address discriminator (spec.md §3: "either 'data' or 'function' —
/// the discriminator is a flag bit"). We keep the discriminant as a Rust
/// enum for safety even though `PointerFlags::FUNCTION` is still carried
/// alongside it for protocol fidelity (§9 Design Notes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Address {
    /// A data address, or null (0) when `num_of == 0`.
    Data(usize),
    /// A function address.
    Function(usize),
}

impl Address {
    pub fn raw(self) -> usize {
        match self {
            Address::Data(a) | Address::Function(a) => a,
        }
    }

    pub fn is_null(self) -> bool {
        self.raw() == 0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Data(a) => write!(f, "Data({a:#x})"),
            Address::Function(a) => write!(f, "Function({a:#x})"),
        }
    }
}

/// The universal value wrapper (spec.md §3/§4.1).
#[derive(Clone)]
pub struct Pointer {
    pub address: Address,
    pub ref_count: RefCount,
    pub flags: PointerFlags,
    pub layout: ArrayLayout,
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointer")
            .field("address", &self.address)
            .field("flags", &self.flags)
            .field("layout", &self.layout)
            .finish()
    }
}

impl Pointer {
    /// The canonical null pointer: no address, no refcount, empty layout.
    pub fn null() -> Self {
        Pointer {
            address: Address::Data(0),
            ref_count: RefCount::null(),
            flags: PointerFlags::empty(),
            layout: ArrayLayout::NONE,
        }
    }

    pub fn is_null(&self) -> bool {
        self.address.is_null() && self.layout.num_of == 0
    }

    /// spec.md §3 invariant check: `num_of == 0` iff the address is null
    /// (for data pointers); FUNCTION/WRITABLE are mutually exclusive.
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        if !self.layout.is_valid() {
            return Err(EngineError::Value);
        }
        if self.flags.contains(PointerFlags::FUNCTION) && self.flags.contains(PointerFlags::WRITABLE) {
            return Err(EngineError::Value);
        }
        if matches!(self.address, Address::Data(_)) {
            let null = self.address.is_null();
            if null != (self.layout.num_of == 0) {
                return Err(EngineError::Value);
            }
        }
        Ok(())
    }

    /// Clones the Pointer *and* takes a new owning reference on its
    /// refcount, matching spec.md §3: "ownership is conveyed by cloning the
    /// refcount handle and incrementing it."
    pub fn cloned_owned(&self) -> Self {
        self.ref_count.increment();
        self.clone()
    }

    /// Boxes `value` and returns a data Pointer over it, with a RefCount
    /// whose destructor drops the box. This is the one piece of unsafe
    /// plumbing every built-in interface's `init` goes through to stash its
    /// private state behind the opaque data slot the protocol hands back
    /// and forth (spec.md §4.2, §9 "type-erased Pointer").
    pub fn boxed<T: Send + 'static>(value: T, flags: PointerFlags) -> Self {
        let raw = Box::into_raw(Box::new(value));
        let addr = raw as usize;
        let rc = RefCount::alloc(move || {
            // SAFETY: `raw` was produced by `Box::into_raw` above and this
            // closure runs at most once (decrement only calls the
            // destructor on the 1→0 transition).
            unsafe {
                drop(Box::from_raw(raw));
            }
        });
        Pointer {
            address: Address::Data(addr),
            ref_count: rc,
            flags,
            layout: ArrayLayout::single::<T>(),
        }
    }

    /// Borrows the boxed `T` behind this Pointer's address.
    ///
    /// # Safety
    /// The caller must know that this Pointer was produced by
    /// [`Pointer::boxed::<T>`] (or carries an equivalent layout) and that
    /// the box has not yet been dropped.
    pub unsafe fn as_ref<T>(&self) -> &T {
        debug_assert!(!self.address.is_null());
        &*(self.address.raw() as *const T)
    }

    /// Mutable counterpart of [`Pointer::as_ref`].
    ///
    /// # Safety
    /// Same preconditions as [`Pointer::as_ref`], plus exclusivity: the
    /// caller must not alias this reference with another live reference.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut<T>(&self) -> &mut T {
        debug_assert!(!self.address.is_null());
        &mut *(self.address.raw() as *mut T)
    }

    /// An alias Pointer over a field of a held struct, used for metadata
    /// slots like `flags`/`layout`/`num_elements` in the `pointer` built-in
    /// interface (spec.md §4.6). The alias does not carry ownership: its
    /// refcount is null.
    pub fn alias_of<T>(value_ref: &T, flags: PointerFlags) -> Self {
        Pointer {
            address: Address::Data(value_ref as *const T as usize),
            ref_count: RefCount::null(),
            flags,
            layout: ArrayLayout::single::<T>(),
        }
    }

    /// Like [`Pointer::alias_of`], but the alias shares `ref_count` — the
    /// *real* handle guarding the field's owner — instead of a null one.
    /// Used for the `pointer` interface's metadata/indexed `get` slots
    /// (spec.md §4.6, grounded on `pointer.var.c`'s `get`, which populates
    /// every returned alias with `.ref_count = context_data->ref_count`
    /// rather than a no-op counter): a caller that decides to retain the
    /// alias can increment this handle and have it genuinely keep the
    /// field's owner alive.
    pub fn field_alias<T>(value_ref: &T, flags: PointerFlags, ref_count: RefCount) -> Self {
        Pointer {
            address: Address::Data(value_ref as *const T as usize),
            ref_count,
            flags,
            layout: ArrayLayout::single::<T>(),
        }
    }

    pub fn function(addr: usize) -> Self {
        Pointer {
            address: Address::Function(addr),
            ref_count: RefCount::null(),
            flags: PointerFlags::FUNCTION,
            layout: ArrayLayout::NONE,
        }
    }
}

/// Helper for call sites that need "decrement, and turn the bool result
/// into the executor's Status vocabulary" — not part of the spec API, just
/// a local ergonomics helper.
pub fn decrement_to_status(rc: &RefCount) -> Status {
    rc.decrement();
    Status::Ok
}
