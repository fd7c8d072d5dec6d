//! Storage locations for generated code
//!
//! A `Store` is the generated-code-time representation of where one
//! variable lives. Register-backed stores support immediate writes and
//! plain moves; memory-backed stores are a base register plus a flattened
//! layout, and all access goes through offset-relative dereferences on the
//! base. Modeling the two as enum variants makes "unsupported on this
//! variant" a compile-time-checked omission at each match site.

use crate::backend::isa::Reg;
use crate::backend::layout::StructLayout;
use std::rc::Rc;

/// A storage location bound to one variable (or temporary).
#[derive(Clone, Debug)]
pub enum Store {
    /// Bound to one physical register.
    Register { reg: Reg },

    /// Bound to a base register holding the address of a flattened
    /// aggregate. Only ever produced for struct-typed variables and
    /// zero-sized opaque aggregates.
    Memory {
        base: Reg,
        layout: Rc<StructLayout>,
    },
}

impl Store {
    pub fn register(reg: Reg) -> Store {
        Store::Register { reg }
    }

    pub fn memory(base: Reg, layout: Rc<StructLayout>) -> Store {
        Store::Memory { base, layout }
    }

    /// The physical register backing this store: the value register for
    /// `Register`, the address register for `Memory`.
    pub fn reg(&self) -> Reg {
        match self {
            Store::Register { reg } => *reg,
            Store::Memory { base, .. } => *base,
        }
    }

    /// The flattened layout, for memory-backed stores.
    pub fn layout(&self) -> Option<&Rc<StructLayout>> {
        match self {
            Store::Register { .. } => None,
            Store::Memory { layout, .. } => Some(layout),
        }
    }
}
