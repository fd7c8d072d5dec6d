//! The struct-copy rule
//!
//! Whenever a value of struct-flattened type (including the built-in
//! string and array reference types) is bound by a `let`, a whole-variable
//! assignment, or a call boundary, it is deep-copied, never aliased:
//!
//! - strings: read the stored length, add the 8-byte header, allocate that
//!   many bytes on the runtime heap, copy length + data;
//! - arrays: read length and stride, allocate `length * stride + 16`, copy
//!   the whole buffer;
//! - other flattened structs: the layout's total size is the copy length;
//! - plain scalars and pointers skip the rule and move by register write.
//!
//! Runtime allocation has no dedicated opcode: generated code bumps the
//! heap-pointer cell at the base of the heap segment.

use crate::backend::error::Result;
use crate::backend::image::HEAP_PTR_CELL;
use crate::backend::isa::{Op, Reg};
use crate::backend::regalloc::Store;
use crate::common::types::{Type, WORD};

use super::context::GenContext;

/// Copy-construct the value in `src` into `dst` according to its type.
/// `src` and `dst` hold the value itself for scalars, or the backing
/// pointer for reference and struct types.
pub fn copy_construct(ctx: &mut GenContext, ty: &Type, src: Reg, dst: Reg) -> Result<()> {
    match ty {
        Type::Str => copy_string(ctx, src, dst),
        Type::Array(_) => copy_array(ctx, src, dst),
        Type::Struct(_) => {
            let layout = ctx.layouts.layout_of(ty, ctx.registry);
            let ptr = heap_alloc_static(ctx, layout.size)?;
            let words = ctx.alloc.temporary()?;
            ctx.image.emit_ri(Op::MovI, words.reg(), (layout.size / WORD) as i64);
            copy_words(ctx, src, ptr.reg(), words.reg())?;
            ctx.alloc.release(&words);
            ctx.image.emit_rr(Op::Mov, dst, ptr.reg());
            ctx.alloc.release(&ptr);
            Ok(())
        }
        _ => {
            if dst != src {
                ctx.image.emit_rr(Op::Mov, dst, src);
            }
            Ok(())
        }
    }
}

/// Deep-copy a string: `[length][bytes]`, length + 8 bytes total.
fn copy_string(ctx: &mut GenContext, src: Reg, dst: Reg) -> Result<()> {
    let count = ctx.alloc.temporary()?;
    ctx.image.emit_rr(Op::LoadR, count.reg(), src);
    ctx.image.emit_ri(Op::AddI, count.reg(), WORD as i64);
    // Round up so the word-wise copy stays inside the allocation.
    ctx.image.emit_ri(Op::AddI, count.reg(), WORD as i64 - 1);
    let ptr = heap_alloc(ctx, count.reg())?;
    ctx.image.emit_ri(Op::DivI, count.reg(), WORD as i64);
    copy_words(ctx, src, ptr.reg(), count.reg())?;
    ctx.alloc.release(&count);
    ctx.image.emit_rr(Op::Mov, dst, ptr.reg());
    ctx.alloc.release(&ptr);
    Ok(())
}

/// Deep-copy an array: `[length][stride][elements]`,
/// `length * stride + 16` bytes total.
fn copy_array(ctx: &mut GenContext, src: Reg, dst: Reg) -> Result<()> {
    let count = ctx.alloc.temporary()?;
    let stride = ctx.alloc.temporary()?;
    ctx.image.emit_rr(Op::LoadR, count.reg(), src);
    ctx.image.emit_rr(Op::Mov, stride.reg(), src);
    ctx.image.emit_ri(Op::AddI, stride.reg(), WORD as i64);
    ctx.image.emit_rr(Op::LoadR, stride.reg(), stride.reg());
    ctx.image.emit_rr(Op::Mul, count.reg(), stride.reg());
    ctx.alloc.release(&stride);
    ctx.image.emit_ri(Op::AddI, count.reg(), 2 * WORD as i64);
    let ptr = heap_alloc(ctx, count.reg())?;
    ctx.image.emit_ri(Op::DivI, count.reg(), WORD as i64);
    copy_words(ctx, src, ptr.reg(), count.reg())?;
    ctx.alloc.release(&count);
    ctx.image.emit_rr(Op::Mov, dst, ptr.reg());
    ctx.alloc.release(&ptr);
    Ok(())
}

/// Bump-allocate `size` (a register) bytes on the runtime heap; returns a
/// temporary holding the block address. The caller releases it.
pub fn heap_alloc(ctx: &mut GenContext, size: Reg) -> Result<Store> {
    let ptr = ctx.alloc.temporary()?;
    let top = ctx.alloc.temporary()?;
    ctx.image.load(ptr.reg(), HEAP_PTR_CELL);
    ctx.image.emit_rr(Op::Mov, top.reg(), ptr.reg());
    ctx.image.emit_rr(Op::Add, top.reg(), size);
    ctx.image.store(top.reg(), HEAP_PTR_CELL);
    ctx.alloc.release(&top);
    Ok(ptr)
}

/// Bump-allocate a compile-time-known number of bytes.
pub fn heap_alloc_static(ctx: &mut GenContext, size: u64) -> Result<Store> {
    let ptr = ctx.alloc.temporary()?;
    let top = ctx.alloc.temporary()?;
    ctx.image.load(ptr.reg(), HEAP_PTR_CELL);
    ctx.image.emit_rr(Op::Mov, top.reg(), ptr.reg());
    ctx.image.emit_ri(Op::AddI, top.reg(), size as i64);
    ctx.image.store(top.reg(), HEAP_PTR_CELL);
    ctx.alloc.release(&top);
    Ok(ptr)
}

/// Emit a word-wise copy loop: `count` 8-byte words from `[src]` to
/// `[dst]`. The argument registers are left untouched.
pub fn copy_words(ctx: &mut GenContext, src: Reg, dst: Reg, count: Reg) -> Result<()> {
    let s = ctx.alloc.temporary()?;
    let d = ctx.alloc.temporary()?;
    let c = ctx.alloc.temporary()?;
    let word = ctx.alloc.temporary()?;
    ctx.image.emit_rr(Op::Mov, s.reg(), src);
    ctx.image.emit_rr(Op::Mov, d.reg(), dst);
    ctx.image.emit_rr(Op::Mov, c.reg(), count);

    let head = ctx.fresh_label("copy");
    let done = ctx.fresh_label("copy_done");
    ctx.image.define_label(&head);
    ctx.image.emit_ri(Op::CmpI, c.reg(), 0);
    ctx.image.jump(Op::Jz, &done);
    ctx.image.emit_rr(Op::LoadR, word.reg(), s.reg());
    ctx.image.emit_rr(Op::StoreR, d.reg(), word.reg());
    ctx.image.emit_ri(Op::AddI, s.reg(), WORD as i64);
    ctx.image.emit_ri(Op::AddI, d.reg(), WORD as i64);
    ctx.image.emit_ri(Op::SubI, c.reg(), 1);
    ctx.image.jump(Op::Jmp, &head);
    ctx.image.define_label(&done);

    ctx.alloc.release(&word);
    ctx.alloc.release(&c);
    ctx.alloc.release(&d);
    ctx.alloc.release(&s);
    Ok(())
}
