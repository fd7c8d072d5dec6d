//! Function and program emission
//!
//! Functions open with an alignment pad and a label under their mangled
//! name; parameters arrive pre-bound to `r1..rN` per the calling
//! convention. The entry function is emitted first so that it begins at
//! the initial instruction pointer, just past the import-vector-table
//! region.

use crate::backend::error::{CodegenError, Result};
use crate::backend::image::ImageBuilder;
use crate::backend::isa::{Reg, NUM_REGS};
use crate::backend::regalloc::{Allocator, Store};
use crate::common::tast::{TFunction, TProgram};
use crate::common::types::StructRegistry;

use super::context::GenContext;
use super::stmt::emit_stmt;

/// Emit a whole program. The entry function lands first; every other
/// function follows in program order.
pub fn emit_program(
    image: &mut ImageBuilder,
    registry: &StructRegistry,
    program: &TProgram,
    entry: &str,
) -> Result<()> {
    let mut ctx = GenContext::new(image, registry, program);

    let entry_fn = program
        .functions
        .iter()
        .find(|f| f.name == entry)
        .ok_or_else(|| CodegenError::UnknownFunction(entry.to_string()))?;

    emit_function(&mut ctx, entry_fn)?;
    for func in program.functions.iter().filter(|f| f.name != entry) {
        emit_function(&mut ctx, func)?;
    }
    Ok(())
}

/// Emit one function into the image.
pub fn emit_function(ctx: &mut GenContext, func: &TFunction) -> Result<()> {
    tracing::debug!(function = %func.name, params = func.parameters.len(), "generating code");

    ctx.image.start_function(&func.name);
    ctx.alloc = Allocator::new();

    for (i, param) in func.parameters.iter().enumerate() {
        let reg = Reg::param(i).ok_or_else(|| CodegenError::TooManyArguments {
            callee: func.name.clone(),
            count: func.parameters.len(),
            max: NUM_REGS - 1,
        })?;
        let store = if param.ty.is_struct() || param.ty.native_size_bits() == Some(0) {
            let layout = ctx.layouts.layout_of(&param.ty, ctx.registry);
            Store::memory(reg, layout)
        } else {
            Store::register(reg)
        };
        ctx.alloc.bind(&param.name, store);
    }

    for stmt in &func.body {
        emit_stmt(ctx, stmt)?;
    }

    // Fall-off-the-end return; unreachable when every path already
    // returned.
    ctx.image.ret();
    Ok(())
}
