//! Expression emission
//!
//! This module converts typed expressions into store-level operations.
//! Every emission receives the destination store and an [`Access`] flag;
//! plain variable reads/writes, struct-member accesses, and array element
//! accesses all route through the single [`derefer`] primitive.

use crate::backend::error::{CodegenError, Result};
use crate::backend::isa::{Op, Reg, NUM_REGS};
use crate::backend::regalloc::Store;
use crate::common::tast::{BinOp, Literal, TExpr, TStmt, UnaryOp};
use crate::common::types::{Type, WORD};

use super::context::GenContext;
use super::copy::{copy_construct, copy_words};
use super::stmt::emit_stmt;
use super::Access;

/// Emit `expr` against the destination store.
///
/// With a read access the expression's value flows into `dst`; with a
/// write access (only meaningful for places: identifiers and indexed
/// elements) the value in `dst` flows into the expression's storage.
pub fn emit_expr(ctx: &mut GenContext, expr: &TExpr, dst: &Store, access: Access) -> Result<()> {
    match expr {
        TExpr::Literal { value, .. } => emit_literal(ctx, value, dst),

        TExpr::Variable { name, path, .. } => emit_variable(ctx, name, path, dst, access),

        TExpr::Binary { op, lhs, rhs, .. } => emit_binary(ctx, *op, lhs, rhs, dst),

        TExpr::Unary { op, operand, .. } => emit_unary(ctx, *op, operand, dst),

        TExpr::Call { callee, args, .. } => emit_call(ctx, callee, args, dst),

        TExpr::NewArray { element_ty, args, .. } => emit_new_array(ctx, element_ty, args, dst),

        TExpr::NewStruct { name, args, .. } => emit_new_struct(ctx, name, args, dst),

        TExpr::Index { base, index, .. } => emit_index(ctx, base, index, dst, access),

        TExpr::If {
            cond,
            then_block,
            else_block,
            ..
        } => emit_if(ctx, cond, then_block, else_block.as_deref(), dst),

        // Thin pass-throughs: no code of their own.
        TExpr::Ref { inner, .. } => emit_expr(ctx, inner, dst, access),
        TExpr::Cast { inner, .. } => emit_expr(ctx, inner, dst, access),
        TExpr::Group { inner } => emit_expr(ctx, inner, dst, access),
    }
}

/// The single access primitive. `store` holds (or receives) the value;
/// `place` is the variable's own register for value accesses, or a
/// register holding the target address for memory accesses.
pub fn derefer(ctx: &mut GenContext, store: &Store, place: &Store, size: u64, access: Access) {
    debug_assert!(size <= WORD, "leaf access wider than a word");
    match access {
        Access::ReadValue => ctx.image.emit_rr(Op::Mov, store.reg(), place.reg()),
        Access::WriteValue => ctx.image.emit_rr(Op::Mov, place.reg(), store.reg()),
        Access::ReadMemory => ctx.image.emit_rr(Op::LoadR, store.reg(), place.reg()),
        Access::WriteMemory => ctx.image.emit_rr(Op::StoreR, place.reg(), store.reg()),
    }
}

/// Destination register for a computed (value-producing) expression.
/// Memory stores do not accept immediate or scalar-result writes.
fn expect_reg(dst: &Store) -> Reg {
    match dst {
        Store::Register { reg } => *reg,
        Store::Memory { .. } => panic!("scalar result written to a memory store"),
    }
}

fn write_result(ctx: &mut GenContext, dst: &Store, result: Reg) {
    let target = expect_reg(dst);
    if target != result {
        ctx.image.emit_rr(Op::Mov, target, result);
    }
}

fn emit_literal(ctx: &mut GenContext, value: &Literal, dst: &Store) -> Result<()> {
    let reg = expect_reg(dst);
    match value {
        Literal::Int(n) => ctx.image.emit_ri(Op::MovI, reg, *n),
        Literal::Bool(b) => ctx.image.emit_ri(Op::MovI, reg, *b as i64),
        // Strings live in read-only data; the value is the pointer.
        Literal::Str(s) => {
            let addr = ctx.image.intern_string(s);
            ctx.image.emit_ri(Op::MovI, reg, addr as i64);
        }
    }
    Ok(())
}

fn emit_variable(
    ctx: &mut GenContext,
    name: &str,
    path: &[String],
    dst: &Store,
    access: Access,
) -> Result<()> {
    let base = ctx.alloc.get(name);

    if path.is_empty() {
        // Plain identifier: a register of fixed word width.
        derefer(ctx, dst, &base, WORD, access.as_value());
        return Ok(());
    }

    // Member path: base register + member offset, dereferenced at the
    // leaf's size.
    let dotted = path.join(".");
    let layout = base.layout().cloned().unwrap_or_else(|| {
        panic!("member access `{}.{}` on a non-aggregate store", name, dotted)
    });
    let slot = layout
        .slot(&dotted)
        .unwrap_or_else(|| panic!("unknown member `{}` of `{}`", dotted, name));

    let addr = ctx.alloc.temporary()?;
    ctx.image.emit_rr(Op::Mov, addr.reg(), base.reg());
    ctx.image.emit_ri(Op::AddI, addr.reg(), slot.offset as i64);
    derefer(ctx, dst, &addr, slot.size, access.as_memory());
    ctx.alloc.release(&addr);
    Ok(())
}

fn emit_binary(
    ctx: &mut GenContext,
    op: BinOp,
    lhs: &TExpr,
    rhs: &TExpr,
    dst: &Store,
) -> Result<()> {
    // Both operands land in fresh temporaries; the left one becomes the
    // result.
    let lt = ctx.alloc.temporary()?;
    let rt = ctx.alloc.temporary()?;
    emit_expr(ctx, lhs, &lt, Access::ReadValue)?;
    emit_expr(ctx, rhs, &rt, Access::ReadValue)?;

    match op {
        BinOp::Mul => ctx.image.emit_rr(Op::Mul, lt.reg(), rt.reg()),
        BinOp::Div => ctx.image.emit_rr(Op::Div, lt.reg(), rt.reg()),
        BinOp::Mod => ctx.image.emit_rr(Op::Mod, lt.reg(), rt.reg()),
        BinOp::Add => ctx.image.emit_rr(Op::Add, lt.reg(), rt.reg()),
        BinOp::Sub => ctx.image.emit_rr(Op::Sub, lt.reg(), rt.reg()),
        BinOp::BitAnd => ctx.image.emit_rr(Op::And, lt.reg(), rt.reg()),
        BinOp::BitOr => ctx.image.emit_rr(Op::Or, lt.reg(), rt.reg()),

        // Comparisons: compare, then materialize 0/1 into the left
        // temporary.
        BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Gt | BinOp::Lte | BinOp::Gte => {
            ctx.image.emit_rr(Op::Cmp, lt.reg(), rt.reg());
            let set = match op {
                BinOp::Eq => Op::SetEq,
                BinOp::NotEq => Op::SetNe,
                BinOp::Lt => Op::SetLt,
                BinOp::Lte => Op::SetLe,
                BinOp::Gt => Op::SetGt,
                BinOp::Gte => Op::SetGe,
                _ => unreachable!(),
            };
            ctx.image.emit_reg(set, lt.reg());
        }
    }

    ctx.alloc.release(&rt);
    write_result(ctx, dst, lt.reg());
    ctx.alloc.release(&lt);
    Ok(())
}

fn emit_unary(ctx: &mut GenContext, op: UnaryOp, operand: &TExpr, dst: &Store) -> Result<()> {
    // Emit the inner expression, then apply the operator to the
    // destination register in place.
    emit_expr(ctx, operand, dst, Access::ReadValue)?;
    let reg = expect_reg(dst);
    match op {
        UnaryOp::Neg => ctx.image.emit_ri(Op::MulI, reg, -1),
        UnaryOp::Not => ctx.image.emit_reg(Op::Not, reg),
    }
    Ok(())
}

fn emit_call(ctx: &mut GenContext, callee: &str, args: &[TExpr], dst: &Store) -> Result<()> {
    if !ctx.functions.contains(callee) && !ctx.image.is_foreign(callee) {
        return Err(CodegenError::UnknownFunction(callee.to_string()));
    }

    // Caller-saved discipline: push everything live, stage arguments,
    // call, pop in reverse.
    let saved = ctx.save_live();
    let staging = Store::register(Reg::RETURN_REG);
    let mut staged: Vec<Reg> = Vec::new();

    for (i, arg) in args.iter().enumerate() {
        let param = Reg::param(i).ok_or_else(|| CodegenError::TooManyArguments {
            callee: callee.to_string(),
            count: args.len(),
            max: NUM_REGS - 1,
        })?;
        emit_expr(ctx, arg, &staging, Access::ReadValue)?;
        copy_construct(ctx, arg.get_type(), Reg::RETURN_REG, param)?;
        // Keep the staged register out of the temporary pool while the
        // remaining arguments are evaluated.
        if ctx.alloc.reserve(param) {
            staged.push(param);
        }
    }

    ctx.image.jump(Op::Call, callee);

    for reg in staged {
        ctx.alloc.free(reg);
    }
    ctx.restore_live(saved);

    // The return value is whatever r0 holds after the call.
    write_result(ctx, dst, Reg::RETURN_REG);
    Ok(())
}

fn emit_new_array(
    ctx: &mut GenContext,
    element_ty: &Type,
    args: &[TExpr],
    dst: &Store,
) -> Result<()> {
    // Element slots are word-sized: scalars and handles inline, struct
    // elements by reference.
    let stride = element_slot_size(element_ty);
    let length = args.len() as u64;

    // Compile-time-initialized block: [length][stride][elements].
    let block = ctx.image.alloc_data(2 * WORD + length * stride);
    ctx.image.data_write_u64(block, length);
    ctx.image.data_write_u64(block + WORD, stride);

    let staging = Store::register(Reg::RETURN_REG);
    for (i, arg) in args.iter().enumerate() {
        emit_expr(ctx, arg, &staging, Access::ReadValue)?;
        ctx.image
            .store(Reg::RETURN_REG, block + 2 * WORD + i as u64 * stride);
    }

    let reg = expect_reg(dst);
    ctx.image.emit_ri(Op::MovI, reg, block as i64);
    Ok(())
}

fn element_slot_size(ty: &Type) -> u64 {
    match ty.native_size_bits() {
        Some(0) | None => WORD,
        Some(bits) => bits as u64 / 8,
    }
}

fn emit_new_struct(ctx: &mut GenContext, name: &str, args: &[TExpr], dst: &Store) -> Result<()> {
    let ty = Type::Struct(name.to_string());
    let layout = ctx.layouts.layout_of(&ty, ctx.registry);
    let block = ctx.image.alloc_data(layout.size);

    let fields: Vec<(String, Type)> = ctx
        .registry
        .get(name)
        .unwrap_or_else(|| panic!("unresolved struct `{}` during instantiation", name))
        .fields
        .clone();
    assert_eq!(
        fields.len(),
        args.len(),
        "constructor arity for `{}` resolved incorrectly",
        name
    );

    for (arg, (field, field_ty)) in args.iter().zip(&fields) {
        let offset = layout
            .member_offset(field)
            .unwrap_or_else(|| panic!("unknown member `{}` of `{}`", field, name));
        let tmp = ctx.alloc.temporary()?;
        emit_expr(ctx, arg, &tmp, Access::ReadValue)?;

        if field_ty.is_struct() {
            // Nested struct fields are stored inline: copy the argument's
            // backing bytes into the field region.
            let field_layout = ctx.layouts.layout_of(field_ty, ctx.registry);
            let region = ctx.alloc.temporary()?;
            let words = ctx.alloc.temporary()?;
            ctx.image
                .emit_ri(Op::MovI, region.reg(), (block + offset) as i64);
            ctx.image
                .emit_ri(Op::MovI, words.reg(), (field_layout.size / WORD) as i64);
            copy_words(ctx, tmp.reg(), region.reg(), words.reg())?;
            ctx.alloc.release(&words);
            ctx.alloc.release(&region);
        } else {
            ctx.image.store(tmp.reg(), block + offset);
        }
        ctx.alloc.release(&tmp);
    }

    let reg = expect_reg(dst);
    ctx.image.emit_ri(Op::MovI, reg, block as i64);
    Ok(())
}

fn emit_index(
    ctx: &mut GenContext,
    base: &TExpr,
    index: &TExpr,
    dst: &Store,
    access: Access,
) -> Result<()> {
    let array = ctx.alloc.temporary()?;
    let element = ctx.alloc.temporary()?;
    emit_expr(ctx, base, &array, Access::ReadValue)?;
    emit_expr(ctx, index, &element, Access::ReadValue)?;

    // Element address: base + 16 + index * stride, stride read from the
    // buffer header at [base + 8].
    let stride = ctx.alloc.temporary()?;
    ctx.image.emit_rr(Op::Mov, stride.reg(), array.reg());
    ctx.image.emit_ri(Op::AddI, stride.reg(), WORD as i64);
    ctx.image.emit_rr(Op::LoadR, stride.reg(), stride.reg());
    ctx.image.emit_rr(Op::Mul, element.reg(), stride.reg());
    ctx.alloc.release(&stride);
    ctx.image.emit_ri(Op::AddI, element.reg(), 2 * WORD as i64);
    ctx.image.emit_rr(Op::Add, element.reg(), array.reg());
    ctx.alloc.release(&array);

    derefer(ctx, dst, &element, WORD, access.as_memory());
    ctx.alloc.release(&element);
    Ok(())
}

fn emit_if(
    ctx: &mut GenContext,
    cond: &TExpr,
    then_block: &[TStmt],
    else_block: Option<&[TStmt]>,
    dst: &Store,
) -> Result<()> {
    // Compare the condition against literal 1 and branch to the else
    // label when it does not hold.
    let cond_tmp = ctx.alloc.temporary()?;
    emit_expr(ctx, cond, &cond_tmp, Access::ReadValue)?;
    ctx.image.emit_ri(Op::CmpI, cond_tmp.reg(), 1);
    ctx.alloc.release(&cond_tmp);

    let else_label = ctx.fresh_label("else");
    let end_label = ctx.fresh_label("endif");
    ctx.image.jump(Op::Jnz, &else_label);

    // Both branches share the destination store.
    emit_branch(ctx, then_block, dst)?;
    ctx.image.jump(Op::Jmp, &end_label);

    ctx.image.define_label(&else_label);
    match else_block {
        Some(stmts) => emit_branch(ctx, stmts, dst)?,
        None => {
            let reg = expect_reg(dst);
            ctx.image.emit_ri(Op::MovI, reg, 0);
        }
    }
    ctx.image.define_label(&end_label);
    Ok(())
}

/// Emit one branch of a conditional in its own scope. The branch's value
/// is its trailing expression statement; a branch without one yields 0.
fn emit_branch(ctx: &mut GenContext, stmts: &[TStmt], dst: &Store) -> Result<()> {
    let parent = ctx.push_scope();
    let result = emit_branch_body(ctx, stmts, dst);
    ctx.pop_scope(parent);
    result
}

fn emit_branch_body(ctx: &mut GenContext, stmts: &[TStmt], dst: &Store) -> Result<()> {
    if let Some((last, rest)) = stmts.split_last() {
        for stmt in rest {
            emit_stmt(ctx, stmt)?;
        }
        if let TStmt::Expr(expr) = last {
            return emit_expr(ctx, expr, dst, Access::ReadValue);
        }
        emit_stmt(ctx, last)?;
    }
    let reg = expect_reg(dst);
    ctx.image.emit_ri(Op::MovI, reg, 0);
    Ok(())
}
