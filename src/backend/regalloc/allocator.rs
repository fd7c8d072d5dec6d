//! Scope-chained store allocator
//!
//! One allocator exists per lexical block. Child blocks share the physical
//! register pool (occupancy is tracked globally within a function) but get
//! their own variable map, so inner bindings shadow without leaking out.
//! The variable map is a persistent `im::HashMap`: entering a scope clones
//! the map in O(1) and lookups naturally see outer bindings.

use crate::backend::error::{CodegenError, Result};
use crate::backend::isa::{Reg, NUM_REGS};
use crate::backend::layout::StructLayout;
use crate::backend::regalloc::store::Store;
use crate::common::types::Type;
use im::HashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// The shared pool of physical-register "in use" flags, plus the
/// session-owned counter that names anonymous temporaries.
#[derive(Debug)]
struct RegisterPool {
    in_use: [bool; NUM_REGS],
    next_tmp: u32,
}

impl RegisterPool {
    fn new() -> Self {
        let mut in_use = [false; NUM_REGS];
        // r0 is the call/return staging register; it is never allocated.
        in_use[Reg::RETURN_REG.index() as usize] = true;
        Self { in_use, next_tmp: 0 }
    }

    /// Claim the lowest-indexed free register.
    fn acquire(&mut self) -> Option<Reg> {
        for reg in Reg::ALL {
            let slot = &mut self.in_use[reg.index() as usize];
            if !*slot {
                *slot = true;
                return Some(reg);
            }
        }
        None
    }

    /// Mark a specific register as in use. Returns whether it was free.
    fn reserve(&mut self, reg: Reg) -> bool {
        let slot = &mut self.in_use[reg.index() as usize];
        let was_free = !*slot;
        *slot = true;
        was_free
    }

    fn release(&mut self, reg: Reg) {
        assert!(
            reg != Reg::RETURN_REG,
            "attempted to release the call/return register"
        );
        self.in_use[reg.index() as usize] = false;
    }

    /// In-use registers except r0, in ascending index order.
    fn live(&self) -> Vec<Reg> {
        Reg::ALL
            .into_iter()
            .filter(|reg| *reg != Reg::RETURN_REG && self.in_use[reg.index() as usize])
            .collect()
    }
}

/// Allocator for one lexical block.
#[derive(Clone, Debug)]
pub struct Allocator {
    pool: Rc<RefCell<RegisterPool>>,
    vars: HashMap<String, Store>,
}

impl Allocator {
    /// Fresh allocator with an empty pool; one per generated function.
    pub fn new() -> Self {
        Self {
            pool: Rc::new(RefCell::new(RegisterPool::new())),
            vars: HashMap::new(),
        }
    }

    /// Child allocator for a nested block: shares the register pool,
    /// private variable map.
    pub fn enter_scope(&self) -> Allocator {
        Allocator {
            pool: Rc::clone(&self.pool),
            vars: self.vars.clone(),
        }
    }

    /// Allocate a store for a named variable and bind it in this scope.
    ///
    /// Register-backed for scalars and reference handles, memory-backed for
    /// flattened structs and zero-sized aggregates (which must come with
    /// their layout). A type whose native size is neither zero nor a known
    /// primitive encoding is a compiler-internal error.
    pub fn allocate(
        &mut self,
        name: &str,
        ty: &Type,
        layout: Option<Rc<StructLayout>>,
    ) -> Result<Store> {
        let store = if ty.is_struct() || ty.native_size_bits() == Some(0) {
            let layout = layout.unwrap_or_else(|| {
                panic!("memory store for `{}` allocated without a layout", name)
            });
            let base = self.acquire()?;
            Store::memory(base, layout)
        } else if ty.is_reference() || ty.native_size_bits() == Some(64) {
            Store::register(self.acquire()?)
        } else {
            panic!("type `{}` of `{}` has no register encoding", ty, name);
        };

        self.vars.insert(name.to_string(), store.clone());
        Ok(store)
    }

    /// Bind a name to a pre-built store (used for parameters, whose
    /// registers are fixed by the calling convention). The store's backing
    /// register is marked in use.
    pub fn bind(&mut self, name: &str, store: Store) {
        self.pool.borrow_mut().reserve(store.reg());
        self.vars.insert(name.to_string(), store);
    }

    /// Resolve a variable through the scope chain. An unbound name at this
    /// stage is a bug in semantic analysis.
    pub fn get(&self, name: &str) -> Store {
        self.vars
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("unbound variable `{}` during code generation", name))
    }

    /// Allocate an anonymous register-backed scratch store. The caller
    /// must release it.
    pub fn temporary(&mut self) -> Result<Store> {
        let reg = self.acquire()?;
        let id = {
            let mut pool = self.pool.borrow_mut();
            let id = pool.next_tmp;
            pool.next_tmp += 1;
            id
        };
        tracing::trace!(tmp = id, reg = %reg, "temporary allocated");
        Ok(Store::register(reg))
    }

    /// Return a register-backed store's register to the free pool.
    ///
    /// Memory stores do not own a slot beyond their base register, which is
    /// released through the register-backed store holding it; releasing one
    /// here is a compiler-internal error.
    pub fn release(&mut self, store: &Store) {
        match store {
            Store::Register { reg } => self.pool.borrow_mut().release(*reg),
            Store::Memory { .. } => {
                panic!("memory stores are released through their base register")
            }
        }
    }

    /// Mark a specific register as in use (argument staging). Returns
    /// whether it was previously free.
    pub fn reserve(&mut self, reg: Reg) -> bool {
        self.pool.borrow_mut().reserve(reg)
    }

    /// Free a specific register.
    pub fn free(&mut self, reg: Reg) {
        self.pool.borrow_mut().release(reg);
    }

    /// Registers currently in use, excluding r0; the caller-saved set
    /// pushed before a call and popped in reverse after.
    pub fn live_registers(&self) -> Vec<Reg> {
        self.pool.borrow().live()
    }

    fn acquire(&mut self) -> Result<Reg> {
        self.pool
            .borrow_mut()
            .acquire()
            .ok_or(CodegenError::RegisterExhaustion(NUM_REGS))
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}
