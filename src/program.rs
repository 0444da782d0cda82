//! JSON instruction program (spec.md §4.3, ambient configuration layer).
//!
//! `serde`-derived mirror of the binary instruction record described in
//! spec.md §6: one JSON object per instruction, tagged by `op`. This is
//! deliberately a thin transcription, not a new configuration language —
//! every field maps directly onto [`crate::registry::Instruction`].

use serde::Deserialize;

use crate::pointer::{Pointer, PointerFlags};
use crate::registry::{InterfaceKey, Instruction};
use crate::slot::SlotDesignator;
use crate::paramlist::{self, ParamList};

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SlotSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub indices: Vec<isize>,
}

impl SlotSpec {
    fn designator(&self) -> SlotDesignator<'_> {
        SlotDesignator::named_indexed(&self.name, &self.indices)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterfaceKeySpec {
    Null,
    Empty,
    Named { name: String },
}

impl InterfaceKeySpec {
    fn key(&self) -> InterfaceKey<'_> {
        match self {
            InterfaceKeySpec::Null => InterfaceKey::Null,
            InterfaceKeySpec::Empty => InterfaceKey::Empty,
            InterfaceKeySpec::Named { name } => InterfaceKey::Named(name),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueSpec {
    I64 { value: i64 },
    U64 { value: u64 },
    Bool { value: bool },
    Str { value: String },
}

impl ValueSpec {
    fn into_pointer(self) -> Pointer {
        match self {
            ValueSpec::I64 { value } => Pointer::boxed(value, PointerFlags::empty()),
            ValueSpec::U64 { value } => Pointer::boxed(value, PointerFlags::empty()),
            ValueSpec::Bool { value } => Pointer::boxed(value, PointerFlags::empty()),
            ValueSpec::Str { value } => Pointer::boxed(value, PointerFlags::empty()),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub value: ValueSpec,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InstructionSpec {
    Noop,
    Init {
        key: String,
        interface: InterfaceKeySpec,
        /// Registry key of a `parameters` context to draw a dynamic
        /// parameter tail from (spec.md §3). Absent means no dynamic tail.
        #[serde(default)]
        dparams_key: Option<String>,
        #[serde(default)]
        params: Vec<ParamSpec>,
    },
    Final {
        key: String,
    },
    SetValue {
        key: String,
        slot: SlotSpec,
        value: ValueSpec,
    },
    SetContext {
        key: String,
        slot: SlotSpec,
        source: String,
    },
    SetSlot {
        key: String,
        slot: SlotSpec,
        source: String,
        source_slot: SlotSpec,
    },
    Act {
        key: String,
        slot: SlotSpec,
        /// See [`InstructionSpec::Init::dparams_key`].
        #[serde(default)]
        dparams_key: Option<String>,
        #[serde(default)]
        params: Vec<ParamSpec>,
    },
}

fn build_params(params: &[ParamSpec]) -> ParamList<'_> {
    let mut list: ParamList<'_> = None;
    // Instruction params are scratch, view-scoped for the single call the
    // executor makes with them (spec.md §4.5 "View semantics") — prepended
    // in file order so lookups see the first-declared entry on ties, same
    // as `paramlist::find`'s head-to-tail, first-match-wins rule.
    for param in params.iter().rev() {
        list = paramlist::view_push(list, &param.name, param.value.clone().into_pointer());
    }
    list
}

impl InstructionSpec {
    pub fn to_instruction(&self) -> Instruction<'_> {
        match self {
            InstructionSpec::Noop => Instruction::Noop,
            InstructionSpec::Init {
                key,
                interface,
                dparams_key,
                params,
            } => Instruction::Init {
                key: key.clone(),
                interface_key: interface.key(),
                dparams_key: dparams_key.clone(),
                params: build_params(params),
            },
            InstructionSpec::Final { key } => Instruction::Final { key: key.clone() },
            InstructionSpec::SetValue { key, slot, value } => Instruction::SetValue {
                key: key.clone(),
                slot: slot.designator(),
                value: value.clone().into_pointer(),
            },
            InstructionSpec::SetContext { key, slot, source } => Instruction::SetContext {
                key: key.clone(),
                slot: slot.designator(),
                source_key: source.clone(),
            },
            InstructionSpec::SetSlot {
                key,
                slot,
                source,
                source_slot,
            } => Instruction::SetSlot {
                key: key.clone(),
                slot: slot.designator(),
                source_key: source.clone(),
                source_slot: source_slot.designator(),
            },
            InstructionSpec::Act {
                key,
                slot,
                dparams_key,
                params,
            } => Instruction::Act {
                key: key.clone(),
                slot: slot.designator(),
                dparams_key: dparams_key.clone(),
                params: build_params(params),
            },
        }
    }
}

/// A whole program: capacity hint for the registry, the instruction list to
/// run in order, and the well-known registry keys the hierarchical state
/// processor entry point resolves against (spec.md §10.3).
#[derive(Deserialize, Debug, Clone)]
pub struct Program {
    #[serde(default = "default_capacity")]
    pub registry_capacity: usize,
    pub instructions: Vec<InstructionSpec>,
    /// Registry key of the context to run as the initial HSP state, if any.
    #[serde(default)]
    pub entry_state: Option<String>,
}

fn default_capacity() -> usize {
    256
}

impl Program {
    pub fn from_json(text: &str) -> serde_json::Result<Program> {
        serde_json::from_str(text)
    }

    pub fn instructions(&self) -> impl Iterator<Item = Instruction<'_>> {
        self.instructions.iter().map(InstructionSpec::to_instruction)
    }
}
