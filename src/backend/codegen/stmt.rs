//! Statement emission
//!
//! Statements bind and mutate stores, sequence effects, and shape control
//! flow. Binding applies the struct-copy rule from [`super::copy`];
//! assignment targets reuse expression emission with a write access.

use crate::backend::error::Result;
use crate::backend::isa::{Op, Reg};
use crate::backend::regalloc::Store;
use crate::common::tast::{TExpr, TStmt};
use crate::common::types::{Type, WORD};

use super::context::GenContext;
use super::copy::{copy_construct, copy_words, heap_alloc_static};
use super::expr::emit_expr;
use super::Access;

pub fn emit_stmt(ctx: &mut GenContext, stmt: &TStmt) -> Result<()> {
    match stmt {
        TStmt::Let { name, ty, value } => emit_let(ctx, name, ty, value),

        TStmt::Assign { target, value } => emit_assign(ctx, target, value),

        TStmt::Return { expr } => {
            let result = Store::register(Reg::RETURN_REG);
            if let Some(expr) = expr {
                emit_expr(ctx, expr, &result, Access::ReadValue)?;
            }
            ctx.image.ret();
            Ok(())
        }

        // Void: evaluate for effects, discard the value.
        TStmt::Expr(expr) => {
            let tmp = ctx.alloc.temporary()?;
            emit_expr(ctx, expr, &tmp, Access::ReadValue)?;
            ctx.alloc.release(&tmp);
            Ok(())
        }

        TStmt::For {
            init,
            cond,
            update,
            body,
        } => emit_for(ctx, init.as_deref(), cond.as_ref(), update.as_deref(), body),

        TStmt::Block(stmts) => {
            let parent = ctx.push_scope();
            let result = stmts.iter().try_for_each(|stmt| emit_stmt(ctx, stmt));
            ctx.pop_scope(parent);
            result
        }
    }
}

fn emit_let(ctx: &mut GenContext, name: &str, ty: &Type, value: &TExpr) -> Result<()> {
    // Evaluate the initializer before the name becomes visible, so a
    // shadowing binding can still read the outer one.
    let tmp = ctx.alloc.temporary()?;
    emit_expr(ctx, value, &tmp, Access::ReadValue)?;

    if ty.is_struct() || ty.native_size_bits() == Some(0) {
        let layout = ctx.layouts.layout_of(ty, ctx.registry);
        let store = ctx.alloc.allocate(name, ty, Some(layout.clone()))?;
        // Fresh backing, then byte-copy the initializer's aggregate.
        let ptr = heap_alloc_static(ctx, layout.size)?;
        let words = ctx.alloc.temporary()?;
        ctx.image
            .emit_ri(Op::MovI, words.reg(), (layout.size / WORD) as i64);
        copy_words(ctx, tmp.reg(), ptr.reg(), words.reg())?;
        ctx.alloc.release(&words);
        ctx.image.emit_rr(Op::Mov, store.reg(), ptr.reg());
        ctx.alloc.release(&ptr);
    } else if ty.is_reference() {
        let store = ctx.alloc.allocate(name, ty, None)?;
        copy_construct(ctx, ty, tmp.reg(), store.reg())?;
    } else {
        let store = ctx.alloc.allocate(name, ty, None)?;
        ctx.image.emit_rr(Op::Mov, store.reg(), tmp.reg());
    }

    ctx.alloc.release(&tmp);
    Ok(())
}

fn emit_assign(ctx: &mut GenContext, target: &TExpr, value: &TExpr) -> Result<()> {
    let tmp = ctx.alloc.temporary()?;
    emit_expr(ctx, value, &tmp, Access::ReadValue)?;

    match target {
        // Whole-variable assignment of a reference or struct value
        // deep-copies into the existing binding.
        TExpr::Variable { name, path, ty } if path.is_empty() && ty.is_reference() => {
            let store = ctx.alloc.get(name);
            copy_construct(ctx, ty, tmp.reg(), store.reg())?;
        }
        TExpr::Variable { name, path, ty } if path.is_empty() && ty.is_struct() => {
            let store = ctx.alloc.get(name);
            let layout = ctx.layouts.layout_of(ty, ctx.registry);
            let words = ctx.alloc.temporary()?;
            ctx.image
                .emit_ri(Op::MovI, words.reg(), (layout.size / WORD) as i64);
            copy_words(ctx, tmp.reg(), store.reg(), words.reg())?;
            ctx.alloc.release(&words);
        }
        // Scalar variables, member paths, and indexed elements all take a
        // plain word through the write-access path.
        _ => emit_expr(ctx, target, &tmp, Access::WriteValue)?,
    }

    ctx.alloc.release(&tmp);
    Ok(())
}

fn emit_for(
    ctx: &mut GenContext,
    init: Option<&TStmt>,
    cond: Option<&TExpr>,
    update: Option<&TStmt>,
    body: &[TStmt],
) -> Result<()> {
    let parent = ctx.push_scope();
    let result = emit_for_body(ctx, init, cond, update, body);
    ctx.pop_scope(parent);
    result
}

fn emit_for_body(
    ctx: &mut GenContext,
    init: Option<&TStmt>,
    cond: Option<&TExpr>,
    update: Option<&TStmt>,
    body: &[TStmt],
) -> Result<()> {
    if let Some(init) = init {
        emit_stmt(ctx, init)?;
    }

    let head = ctx.fresh_label("for");
    let end = ctx.fresh_label("for_end");
    ctx.image.define_label(&head);

    // The condition is re-evaluated on every iteration; falsy branches
    // out to the end label.
    if let Some(cond) = cond {
        let tmp = ctx.alloc.temporary()?;
        emit_expr(ctx, cond, &tmp, Access::ReadValue)?;
        ctx.image.emit_ri(Op::CmpI, tmp.reg(), 1);
        ctx.alloc.release(&tmp);
        ctx.image.jump(Op::Jnz, &end);
    }

    for stmt in body {
        emit_stmt(ctx, stmt)?;
    }
    if let Some(update) = update {
        emit_stmt(ctx, update)?;
    }
    ctx.image.jump(Op::Jmp, &head);
    ctx.image.define_label(&end);
    Ok(())
}
