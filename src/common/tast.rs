//! Typed tree definitions
//!
//! The code generator consumes this tree. Every node carries a concrete
//! [`Type`]; identifiers and callees are already resolved and mangled by
//! semantic analysis, and generic instantiations (including the built-in
//! `Array` constructor) arrive monomorphized.

use crate::common::types::Type;

/// A literal value.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    BitAnd,
    BitOr,
    Eq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not (0/1 result).
    Not,
}

#[derive(Clone, Debug)]
pub enum TExpr {
    Literal {
        value: Literal,
        ty: Type,
    },

    /// An identifier with an optional dotted member path (`x`, `p.pos.y`).
    Variable {
        name: String,
        path: Vec<String>,
        ty: Type,
    },

    Binary {
        op: BinOp,
        lhs: Box<Self>,
        rhs: Box<Self>,
        ty: Type,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Self>,
        ty: Type,
    },

    /// Ordinary call; `callee` is the mangled function name. Foreign
    /// functions are called the same way.
    Call {
        callee: String,
        args: Vec<Self>,
        ty: Type,
    },

    /// The built-in `Array[T](...)` constructor.
    NewArray {
        element_ty: Type,
        args: Vec<Self>,
        ty: Type,
    },

    /// Struct instantiation; `name` is the mangled struct name and the
    /// arguments match the definition's fields in declaration order.
    NewStruct {
        name: String,
        args: Vec<Self>,
        ty: Type,
    },

    /// Array element access.
    Index {
        base: Box<Self>,
        index: Box<Self>,
        ty: Type,
    },

    /// Value-producing conditional; both branches write the same
    /// destination. A branch's value is its trailing expression statement.
    If {
        cond: Box<Self>,
        then_block: Vec<TStmt>,
        else_block: Option<Vec<TStmt>>,
        ty: Type,
    },

    /// Reference to a place; emission passes through to the inner
    /// expression.
    Ref {
        inner: Box<Self>,
        ty: Type,
    },

    /// A cast between representation-compatible types; no code emitted
    /// beyond the inner expression.
    Cast {
        inner: Box<Self>,
        ty: Type,
    },

    /// Parenthesized expression.
    Group {
        inner: Box<Self>,
    },
}

impl TExpr {
    pub fn get_type(&self) -> &Type {
        match self {
            TExpr::Literal { ty, .. } => ty,
            TExpr::Variable { ty, .. } => ty,
            TExpr::Binary { ty, .. } => ty,
            TExpr::Unary { ty, .. } => ty,
            TExpr::Call { ty, .. } => ty,
            TExpr::NewArray { ty, .. } => ty,
            TExpr::NewStruct { ty, .. } => ty,
            TExpr::Index { ty, .. } => ty,
            TExpr::If { ty, .. } => ty,
            TExpr::Ref { ty, .. } => ty,
            TExpr::Cast { ty, .. } => ty,
            TExpr::Group { inner } => inner.get_type(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum TStmt {
    /// `let`/`var` binding. Binding a reference or struct value deep-copies
    /// it (see the code generator's copy rule).
    Let {
        name: String,
        ty: Type,
        value: TExpr,
    },

    /// Assignment to a variable, member path, or indexed element.
    Assign {
        target: TExpr,
        value: TExpr,
    },

    Return {
        expr: Option<TExpr>,
    },

    /// Expression evaluated for its effects; the value is discarded.
    Expr(TExpr),

    /// `for` loop; all three header slots are optional, so a bare
    /// `for { ... }` or while-style `for cond { ... }` degenerate cleanly.
    For {
        init: Option<Box<TStmt>>,
        cond: Option<TExpr>,
        update: Option<Box<TStmt>>,
        body: Vec<TStmt>,
    },

    /// A nested block with its own lexical scope.
    Block(Vec<TStmt>),
}

#[derive(Clone, Debug)]
pub struct TParameter {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub struct TFunction {
    /// Mangled name.
    pub name: String,
    pub parameters: Vec<TParameter>,
    pub return_type: Type,
    pub body: Vec<TStmt>,
}

#[derive(Clone, Debug)]
pub struct TProgram {
    pub functions: Vec<TFunction>,
}
