//! The registry and the instruction executor (spec.md §4.3 C5).
//!
//! The registry is itself a context whose interface is the `hashmap`
//! built-in (§4.6): [`Registry::new`] is nothing more than
//! `context::initialize` applied to [`interfaces::hashmap_iface::interface`].
//! Every other context lives as a value under some key in that map.

use crate::context::{self, Context};
use crate::error::{EngineError, Status};
use crate::hashmap::SetOptions;
use crate::interfaces::{hashmap_iface, parameters, pointer_iface};
use crate::paramlist::{self, ParamList};
use crate::pointer::{Pointer, PointerFlags};
use crate::slot::SlotDesignator;

pub struct Registry {
    pub context: Pointer,
}

impl Registry {
    pub fn new(capacity: usize) -> Result<Registry, EngineError> {
        let iface = hashmap_iface::interface();
        let capacity_value = Pointer::boxed(capacity as u64, PointerFlags::empty());
        let params: ParamList = paramlist::view_push(None, "capacity", capacity_value.clone());
        let context = context::initialize(&iface, &params)?;
        iface.ref_count.decrement();
        capacity_value.ref_count.decrement();
        Ok(Registry { context })
    }

    pub fn root(&self) -> &Context {
        unsafe { context::context_ref(&self.context) }
    }

    fn map(&self) -> &std::cell::RefCell<crate::hashmap::OrderedHashMap> {
        hashmap_iface::map_ref(&self.root().data)
    }

    /// Number of contexts currently registered under a key.
    pub fn len(&self) -> usize {
        self.map().borrow().len()
    }

    /// Registers `interface` under `name` directly in the registry's map,
    /// so that a later `Instruction::Init` with `InterfaceKey::Named(name)`
    /// can resolve it (spec.md §4.3: "otherwise the key names a registered
    /// interface Pointer"). Used at startup to make the built-in interfaces
    /// besides `parameters`/`pointer` nameable from a program.
    pub fn register_interface(&self, name: &str, interface: Pointer) -> Status {
        self.map().borrow_mut().set(name, interface, SetOptions::insert_only())
    }

    /// Resolves `key` to the [`Context`] stored under it, if any. The
    /// returned reference stays valid for as long as `self` does, since
    /// finalizing `key` (or the whole registry) is the only thing that can
    /// invalidate it and both require `&mut`/ownership of `self`.
    pub fn resolve<'r>(&'r self, key: &str) -> Option<&'r Context> {
        let (status, value) = self.map().borrow().get(key);
        if status != Status::Ok {
            return None;
        }
        // SAFETY: every value this registry stores under a plain key was
        // produced by `context::initialize` (see `Instruction::Init`), and
        // it stays alive at least as long as `self` borrows `self.map()`.
        Some(unsafe { context::context_ref(&value) })
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.context.ref_count.decrement();
    }
}

/// Which interface INIT attaches to a new context (spec.md §4.3: "resolve
/// interface: null key selects the built-in `parameters` interface, empty
/// key selects the built-in `pointer`-copy interface, otherwise the key
/// names a registered interface Pointer").
pub enum InterfaceKey<'a> {
    Null,
    Empty,
    Named(&'a str),
}

pub enum Instruction<'a> {
    Noop,
    Init {
        key: String,
        interface_key: InterfaceKey<'a>,
        /// Key of a `parameters` context to draw a dynamic parameter tail
        /// from (spec.md §3 "scratch list ... prepending static parameters
        /// onto an optional dynamic tail drawn from the registry"). Must
        /// resolve if present; a missing key is a soft miss, not a hard
        /// error.
        dparams_key: Option<String>,
        params: ParamList<'a>,
    },
    Final {
        key: String,
    },
    SetValue {
        key: String,
        slot: SlotDesignator<'a>,
        value: Pointer,
    },
    SetContext {
        key: String,
        slot: SlotDesignator<'a>,
        source_key: String,
    },
    SetSlot {
        key: String,
        slot: SlotDesignator<'a>,
        source_key: String,
        source_slot: SlotDesignator<'a>,
    },
    Act {
        key: String,
        slot: SlotDesignator<'a>,
        /// See [`Instruction::Init::dparams_key`].
        dparams_key: Option<String>,
        params: ParamList<'a>,
    },
}

pub struct Executor<'r> {
    pub registry: &'r Registry,
    /// When set, INIT/FINAL/SET_*/ACT validate resolution (keys exist,
    /// interfaces resolve, slots are reachable) but perform no mutation and
    /// invoke no `act` (spec.md §4.3 "dry-run mode").
    pub dry_run: bool,
}

impl<'r> Executor<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Executor {
            registry,
            dry_run: false,
        }
    }

    fn resolve_interface(&self, key: &InterfaceKey) -> Result<Pointer, EngineError> {
        match key {
            InterfaceKey::Null => Ok(parameters::interface()),
            InterfaceKey::Empty => Ok(pointer_iface::interface()),
            InterfaceKey::Named(name) => {
                let (status, value) = self.registry.map().borrow().get(name);
                if status != Status::Ok {
                    return Err(EngineError::Key);
                }
                Ok(value.cloned_owned())
            }
        }
    }

    pub fn execute(&self, instr: &Instruction<'_>) -> Status {
        match instr {
            Instruction::Noop => Status::Ok,
            Instruction::Init {
                key,
                interface_key,
                dparams_key,
                params,
            } => self.init(key, interface_key, dparams_key, params),
            Instruction::Final { key } => self.fin(key),
            Instruction::SetValue { key, slot, value } => self.set_value(key, slot, value.clone()),
            Instruction::SetContext {
                key,
                slot,
                source_key,
            } => self.set_context(key, slot, source_key),
            Instruction::SetSlot {
                key,
                slot,
                source_key,
                source_slot,
            } => self.set_slot(key, slot, source_key, source_slot),
            Instruction::Act {
                key,
                slot,
                dparams_key,
                params,
            } => self.act(key, slot, dparams_key, params),
        }
    }

    /// Resolves `dparams_key` (if any) to a snapshot of a `parameters`
    /// context's stored entries, in storage order (spec.md §3). A present
    /// key that fails to resolve is a soft miss, not a hard error — callers
    /// building a scratch list from a missing dynamic tail still proceed
    /// with just `sparams`, carrying `Status::SoftMiss` forward as the
    /// instruction's reported status per the INIT/ACT table.
    fn resolve_dynamic_tail(&self, dparams_key: &Option<String>) -> (Vec<(String, Pointer)>, Option<Status>) {
        let Some(key) = dparams_key else {
            return (Vec::new(), None);
        };
        let Some(ctx) = self.registry.resolve(key) else {
            return (Vec::new(), Some(Status::SoftMiss));
        };
        match unsafe { context::interface_ref(&ctx.interface) } {
            Some(iface) if iface.name == "parameters" => (parameters::snapshot(&ctx.data), None),
            _ => (Vec::new(), Some(Status::Err(EngineError::Interface))),
        }
    }

    /// Builds the scratch parameter list: `sparams`, in their own relative
    /// order, prepended onto the dynamic tail snapshot (spec.md §3). Entries
    /// are copied by owned name/aliased value so the result does not borrow
    /// `sparams`' own lifetime — needed since the dynamic tail is itself a
    /// snapshot that only lives for the duration of this call.
    fn build_scratch(sparams: &ParamList<'_>, dynamic_tail: Vec<(String, Pointer)>) -> ParamList<'static> {
        let mut merged: ParamList<'static> = None;
        for (name, value) in dynamic_tail.into_iter().rev() {
            merged = paramlist::view_push_owned(merged, name, value);
        }
        let sparams_entries: Vec<(String, Pointer)> = paramlist::iter(sparams)
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        for (name, value) in sparams_entries.into_iter().rev() {
            merged = paramlist::view_push_owned(merged, name, value);
        }
        merged
    }

    fn init(
        &self,
        key: &str,
        interface_key: &InterfaceKey,
        dparams_key: &Option<String>,
        params: &ParamList<'_>,
    ) -> Status {
        if self.registry.map().borrow().contains(key) {
            return Status::Exists;
        }
        let iface = match self.resolve_interface(interface_key) {
            Ok(p) => p,
            Err(e) => return Status::Err(e),
        };
        let (dynamic_tail, dparams_status) = self.resolve_dynamic_tail(dparams_key);
        if let Some(Status::Err(e)) = dparams_status {
            iface.ref_count.decrement();
            return Status::Err(e);
        }
        let scratch = Self::build_scratch(params, dynamic_tail);
        if self.dry_run {
            iface.ref_count.decrement();
            return dparams_status.unwrap_or(Status::Ok);
        }
        let result = context::initialize(&iface, &scratch);
        iface.ref_count.decrement();
        let context = match result {
            Ok(c) => c,
            Err(e) => return Status::Err(e),
        };
        let set_status = self
            .registry
            .map()
            .borrow_mut()
            .set(key, context, SetOptions::insert_only());
        if set_status != Status::Ok {
            return set_status;
        }
        dparams_status.unwrap_or(Status::Ok)
    }

    fn fin(&self, key: &str) -> Status {
        if self.dry_run {
            return if self.registry.map().borrow().contains(key) {
                Status::Ok
            } else {
                Status::SoftMiss
            };
        }
        self.registry
            .map()
            .borrow_mut()
            .unset(key, crate::hashmap::UnsetOptions::none())
    }

    fn set_value(&self, key: &str, slot: &SlotDesignator<'_>, value: Pointer) -> Status {
        let Some(ctx) = self.registry.resolve(key) else {
            value.ref_count.decrement();
            return Status::Err(EngineError::Key);
        };
        if self.dry_run {
            value.ref_count.decrement();
            return Status::Ok;
        }
        ctx.set(slot, value)
    }

    fn set_context(&self, key: &str, slot: &SlotDesignator<'_>, source_key: &str) -> Status {
        let Some(dest) = self.registry.resolve(key) else {
            return Status::Err(EngineError::Key);
        };
        let Some(source) = self.registry.resolve(source_key) else {
            return Status::Err(EngineError::Key);
        };
        if self.dry_run {
            return Status::Ok;
        }
        let (status, value) = source.get(&SlotDesignator::whole());
        if status != Status::Ok {
            return status;
        }
        dest.set(slot, value.cloned_owned())
    }

    fn set_slot(
        &self,
        key: &str,
        slot: &SlotDesignator<'_>,
        source_key: &str,
        source_slot: &SlotDesignator<'_>,
    ) -> Status {
        let Some(dest) = self.registry.resolve(key) else {
            return Status::Err(EngineError::Key);
        };
        let Some(source) = self.registry.resolve(source_key) else {
            return Status::Err(EngineError::Key);
        };
        if self.dry_run {
            return Status::Ok;
        }
        context::copy_slot(dest, slot, source, source_slot)
    }

    fn act(
        &self,
        key: &str,
        slot: &SlotDesignator<'_>,
        dparams_key: &Option<String>,
        params: &ParamList<'_>,
    ) -> Status {
        let Some(ctx) = self.registry.resolve(key) else {
            return Status::Err(EngineError::Key);
        };
        let (dynamic_tail, dparams_status) = self.resolve_dynamic_tail(dparams_key);
        if let Some(Status::Err(e)) = dparams_status {
            return Status::Err(e);
        }
        let scratch = Self::build_scratch(params, dynamic_tail);
        if self.dry_run {
            return dparams_status.unwrap_or(Status::Ok);
        }
        let status = ctx.act(slot, &scratch);
        if status != Status::Ok {
            return status;
        }
        dparams_status.unwrap_or(Status::Ok)
    }
}
