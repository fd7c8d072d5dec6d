//! Code generation context
//!
//! Session state threaded through the tree walk: the image under
//! construction, the struct registry and layout cache, the current
//! function's allocator, and the branch-label counter. One context serves
//! a whole program; the allocator is replaced at each function boundary.

use crate::backend::image::ImageBuilder;
use crate::backend::isa::{Op, Reg};
use crate::backend::regalloc::Allocator;
use crate::backend::layout::LayoutCache;
use crate::common::tast::TProgram;
use crate::common::types::StructRegistry;
use std::collections::HashSet;

pub struct GenContext<'a> {
    pub image: &'a mut ImageBuilder,
    pub registry: &'a StructRegistry,
    /// Mangled names of every function in the program; calls are checked
    /// against this set (plus the foreign table) before emission.
    pub functions: HashSet<String>,
    pub layouts: LayoutCache,
    /// Allocator for the current lexical block of the current function.
    pub alloc: Allocator,
    /// Branch-label counter, unique across the whole image.
    labels: u32,
}

impl<'a> GenContext<'a> {
    pub fn new(
        image: &'a mut ImageBuilder,
        registry: &'a StructRegistry,
        program: &TProgram,
    ) -> Self {
        let functions = program
            .functions
            .iter()
            .map(|f| f.name.clone())
            .collect();
        Self {
            image,
            registry,
            functions,
            layouts: LayoutCache::new(),
            alloc: Allocator::new(),
            labels: 0,
        }
    }

    /// Fresh image-unique label for a branch target.
    pub fn fresh_label(&mut self, stem: &str) -> String {
        self.labels += 1;
        format!(".L{}_{}", self.labels, stem)
    }

    // ========================================================================
    // Scope management
    // ========================================================================

    /// Enter a nested lexical scope; returns the parent allocator to hand
    /// back to `pop_scope`.
    pub fn push_scope(&mut self) -> Allocator {
        let child = self.alloc.enter_scope();
        std::mem::replace(&mut self.alloc, child)
    }

    pub fn pop_scope(&mut self, parent: Allocator) {
        self.alloc = parent;
    }

    // ========================================================================
    // Caller-saved registers
    // ========================================================================

    /// Push every in-use register except r0, in ascending order, and
    /// return the pushed set for `restore_live`.
    pub fn save_live(&mut self) -> Vec<Reg> {
        let live = self.alloc.live_registers();
        for reg in &live {
            self.image.emit_reg(Op::Push, *reg);
        }
        live
    }

    /// Pop the saved registers back, in reverse order.
    pub fn restore_live(&mut self, saved: Vec<Reg>) {
        for reg in saved.iter().rev() {
            self.image.emit_reg(Op::Pop, *reg);
        }
    }
}
