//! Tree-level and end-to-end code generation tests
//!
//! Each test builds a typed tree by hand (the way semantic analysis would
//! deliver it), compiles it, and executes the image, asserting on the exit
//! value and captured foreign output.

use crate::common::tast::{
    BinOp, Literal, TExpr, TFunction, TParameter, TProgram, TStmt, UnaryOp,
};
use crate::common::types::{StructDef, StructRegistry, Type};
use crate::backend::error::CodegenError;
use crate::pipeline;
use std::sync::Arc;

fn int(n: i64) -> TExpr {
    TExpr::Literal {
        value: Literal::Int(n),
        ty: Type::Int,
    }
}

fn string(s: &str) -> TExpr {
    TExpr::Literal {
        value: Literal::Str(s.to_string()),
        ty: Type::Str,
    }
}

fn var(name: &str, ty: Type) -> TExpr {
    TExpr::Variable {
        name: name.to_string(),
        path: vec![],
        ty,
    }
}

fn member(name: &str, path: &[&str], ty: Type) -> TExpr {
    TExpr::Variable {
        name: name.to_string(),
        path: path.iter().map(|s| s.to_string()).collect(),
        ty,
    }
}

fn bin(op: BinOp, lhs: TExpr, rhs: TExpr) -> TExpr {
    let ty = match op {
        BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Gt | BinOp::Lte | BinOp::Gte => Type::Bool,
        _ => Type::Int,
    };
    TExpr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        ty,
    }
}

fn call(callee: &str, args: Vec<TExpr>, ty: Type) -> TExpr {
    TExpr::Call {
        callee: callee.to_string(),
        args,
        ty,
    }
}

fn int_array(values: &[i64]) -> TExpr {
    TExpr::NewArray {
        element_ty: Type::Int,
        args: values.iter().copied().map(int).collect(),
        ty: Type::Array(Arc::new(Type::Int)),
    }
}

fn index(base: TExpr, idx: TExpr) -> TExpr {
    TExpr::Index {
        base: Box::new(base),
        index: Box::new(idx),
        ty: Type::Int,
    }
}

fn let_stmt(name: &str, ty: Type, value: TExpr) -> TStmt {
    TStmt::Let {
        name: name.to_string(),
        ty,
        value,
    }
}

fn ret(expr: TExpr) -> TStmt {
    TStmt::Return { expr: Some(expr) }
}

fn function(name: &str, parameters: Vec<TParameter>, return_type: Type, body: Vec<TStmt>) -> TFunction {
    TFunction {
        name: name.to_string(),
        parameters,
        return_type,
        body,
    }
}

fn param(name: &str, ty: Type) -> TParameter {
    TParameter {
        name: name.to_string(),
        ty,
    }
}

fn main_only(body: Vec<TStmt>) -> TProgram {
    TProgram {
        functions: vec![function("main", vec![], Type::Int, body)],
    }
}

/// Compile and run, returning the exit value and captured output.
fn exec(program: &TProgram, registry: &StructRegistry) -> (i64, String) {
    let mut out = Vec::new();
    let value = pipeline::compile_and_run(program, registry, &mut out)
        .expect("program must compile and run");
    (value, String::from_utf8(out).unwrap())
}

fn exec_plain(program: &TProgram) -> i64 {
    exec(program, &StructRegistry::new()).0
}

/// Test: fn main() { return 2 + 3 * 4; }
#[test]
fn test_arithmetic_precedence_tree() {
    let program = main_only(vec![ret(bin(
        BinOp::Add,
        int(2),
        bin(BinOp::Mul, int(3), int(4)),
    ))]);
    assert_eq!(exec_plain(&program), 14);
}

/// Test: 10 / 3 and 10 % 3 truncate like the host machine.
#[test]
fn test_division_and_modulo() {
    let div = main_only(vec![ret(bin(BinOp::Div, int(10), int(3)))]);
    assert_eq!(exec_plain(&div), 3);

    let rem = main_only(vec![ret(bin(BinOp::Mod, int(10), int(3)))]);
    assert_eq!(exec_plain(&rem), 1);
}

#[test]
fn test_comparisons_produce_zero_or_one() {
    let cases = [
        (BinOp::Eq, 3, 3, 1),
        (BinOp::NotEq, 3, 3, 0),
        (BinOp::Lt, -5, 2, 1),
        (BinOp::Gt, -5, 2, 0),
        (BinOp::Lte, -2, -2, 1),
        (BinOp::Gte, -3, -2, 0),
    ];
    for (op, lhs, rhs, expect) in cases {
        let program = main_only(vec![ret(bin(op, int(lhs), int(rhs)))]);
        assert_eq!(exec_plain(&program), expect, "{:?} {} {}", op, lhs, rhs);
    }
}

/// Test: if (1 == 1) { return 1; } else { return 0; }
#[test]
fn test_if_else_with_returns() {
    let program = main_only(vec![TStmt::Expr(TExpr::If {
        cond: Box::new(bin(BinOp::Eq, int(1), int(1))),
        then_block: vec![ret(int(1))],
        else_block: Some(vec![ret(int(0))]),
        ty: Type::Int,
    })]);
    assert_eq!(exec_plain(&program), 1);
}

/// Test: if as a value; both branches share the destination.
#[test]
fn test_if_expression_value() {
    let min = |a: i64, b: i64| {
        main_only(vec![
            let_stmt("a", Type::Int, int(a)),
            let_stmt("b", Type::Int, int(b)),
            ret(TExpr::If {
                cond: Box::new(bin(
                    BinOp::Lt,
                    var("a", Type::Int),
                    var("b", Type::Int),
                )),
                then_block: vec![TStmt::Expr(var("a", Type::Int))],
                else_block: Some(vec![TStmt::Expr(var("b", Type::Int))]),
                ty: Type::Int,
            }),
        ])
    };
    assert_eq!(exec_plain(&min(3, 9)), 3);
    assert_eq!(exec_plain(&min(9, 3)), 3);
}

/// Test: for loop summing 0..4 into an accumulator returns 6.
#[test]
fn test_for_loop_sum() {
    let program = main_only(vec![
        let_stmt("sum", Type::Int, int(0)),
        TStmt::For {
            init: Some(Box::new(let_stmt("i", Type::Int, int(0)))),
            cond: Some(bin(BinOp::Lt, var("i", Type::Int), int(4))),
            update: Some(Box::new(TStmt::Assign {
                target: var("i", Type::Int),
                value: bin(BinOp::Add, var("i", Type::Int), int(1)),
            })),
            body: vec![TStmt::Assign {
                target: var("sum", Type::Int),
                value: bin(BinOp::Add, var("sum", Type::Int), var("i", Type::Int)),
            }],
        },
        ret(var("sum", Type::Int)),
    ]);
    assert_eq!(exec_plain(&program), 6);
}

/// Test: while-style loop (no init or update).
#[test]
fn test_condition_only_loop() {
    let program = main_only(vec![
        let_stmt("n", Type::Int, int(5)),
        TStmt::For {
            init: None,
            cond: Some(bin(BinOp::Gt, var("n", Type::Int), int(0))),
            update: None,
            body: vec![TStmt::Assign {
                target: var("n", Type::Int),
                value: bin(BinOp::Sub, var("n", Type::Int), int(2)),
            }],
        },
        ret(var("n", Type::Int)),
    ]);
    assert_eq!(exec_plain(&program), -1);
}

/// Test: Array[Int](10, 20, 30)[1] returns 20.
#[test]
fn test_array_construct_and_index() {
    let program = main_only(vec![ret(index(int_array(&[10, 20, 30]), int(1)))]);
    assert_eq!(exec_plain(&program), 20);
}

/// Struct-copy idempotence: mutating a copy leaves the original intact.
#[test]
fn test_array_copy_does_not_alias() {
    let array_ty = Type::Array(Arc::new(Type::Int));
    let program = main_only(vec![
        let_stmt("a", array_ty.clone(), int_array(&[1, 2, 3])),
        let_stmt("b", array_ty.clone(), var("a", array_ty.clone())),
        TStmt::Assign {
            target: index(var("b", array_ty.clone()), int(0)),
            value: int(99),
        },
        ret(bin(
            BinOp::Add,
            bin(
                BinOp::Mul,
                index(var("a", array_ty.clone()), int(0)),
                int(100),
            ),
            index(var("b", array_ty), int(0)),
        )),
    ]);
    // Original element 0 still 1, copy's element 0 now 99.
    assert_eq!(exec_plain(&program), 199);
}

/// Test: calls stage arguments in r1.. and preserve caller registers.
#[test]
fn test_call_with_arguments_and_live_registers() {
    let add = function(
        "add",
        vec![param("x", Type::Int), param("y", Type::Int)],
        Type::Int,
        vec![ret(bin(
            BinOp::Add,
            var("x", Type::Int),
            var("y", Type::Int),
        ))],
    );
    // add(2,3) * add(4,5): the first result stays live across the second
    // call.
    let main = function(
        "main",
        vec![],
        Type::Int,
        vec![ret(bin(
            BinOp::Mul,
            call("add", vec![int(2), int(3)], Type::Int),
            call("add", vec![int(4), int(5)], Type::Int),
        ))],
    );
    let program = TProgram {
        functions: vec![main, add],
    };
    assert_eq!(exec_plain(&program), 45);
}

/// Save/restore round-trip: a callee that churns through registers must
/// not disturb the caller's locals.
#[test]
fn test_callee_clobbering_is_invisible_to_caller() {
    let churn = function(
        "churn",
        vec![],
        Type::Int,
        vec![
            let_stmt("a", Type::Int, int(100)),
            let_stmt("b", Type::Int, int(200)),
            let_stmt("c", Type::Int, int(300)),
            let_stmt("d", Type::Int, int(400)),
            ret(var("d", Type::Int)),
        ],
    );
    let main = function(
        "main",
        vec![],
        Type::Int,
        vec![
            let_stmt("x", Type::Int, int(5)),
            let_stmt("y", Type::Int, int(6)),
            TStmt::Expr(call("churn", vec![], Type::Int)),
            ret(bin(BinOp::Add, var("x", Type::Int), var("y", Type::Int))),
        ],
    );
    let program = TProgram {
        functions: vec![main, churn],
    };
    assert_eq!(exec_plain(&program), 11);
}

/// Test: recursion through the downward-growing stack.
#[test]
fn test_recursive_factorial() {
    let fact = function(
        "fact",
        vec![param("n", Type::Int)],
        Type::Int,
        vec![ret(TExpr::If {
            cond: Box::new(bin(BinOp::Eq, var("n", Type::Int), int(0))),
            then_block: vec![TStmt::Expr(int(1))],
            else_block: Some(vec![TStmt::Expr(bin(
                BinOp::Mul,
                var("n", Type::Int),
                call(
                    "fact",
                    vec![bin(BinOp::Sub, var("n", Type::Int), int(1))],
                    Type::Int,
                ),
            ))]),
            ty: Type::Int,
        })],
    );
    let main = function(
        "main",
        vec![],
        Type::Int,
        vec![ret(call("fact", vec![int(5)], Type::Int))],
    );
    let program = TProgram {
        functions: vec![main, fact],
    };
    assert_eq!(exec_plain(&program), 120);
}

#[test]
fn test_unary_operators() {
    let neg = main_only(vec![ret(bin(
        BinOp::Add,
        TExpr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(int(5)),
            ty: Type::Int,
        },
        int(6),
    ))]);
    assert_eq!(exec_plain(&neg), 1);

    let not = main_only(vec![ret(TExpr::Unary {
        op: UnaryOp::Not,
        operand: Box::new(bin(BinOp::Eq, int(1), int(2))),
        ty: Type::Bool,
    })]);
    assert_eq!(exec_plain(&not), 1);
}

#[test]
fn test_bitwise_operators() {
    let program = main_only(vec![ret(bin(
        BinOp::BitOr,
        bin(BinOp::BitAnd, int(0b1100), int(0b1010)),
        int(0b0001),
    ))]);
    assert_eq!(exec_plain(&program), 0b1001);
}

#[test]
fn test_block_scope_shadowing() {
    let program = main_only(vec![
        let_stmt("x", Type::Int, int(1)),
        TStmt::Block(vec![
            let_stmt("x", Type::Int, int(2)),
            TStmt::Assign {
                target: var("x", Type::Int),
                value: int(3),
            },
        ]),
        ret(var("x", Type::Int)),
    ]);
    assert_eq!(exec_plain(&program), 1);
}

fn point_registry() -> StructRegistry {
    let mut registry = StructRegistry::new();
    registry.define(StructDef {
        name: "Point".to_string(),
        fields: vec![
            ("x".to_string(), Type::Int),
            ("y".to_string(), Type::Int),
        ],
    });
    registry.define(StructDef {
        name: "Rect".to_string(),
        fields: vec![
            ("min".to_string(), Type::Struct("Point".to_string())),
            ("max".to_string(), Type::Struct("Point".to_string())),
        ],
    });
    registry
}

fn new_point(x: i64, y: i64) -> TExpr {
    TExpr::NewStruct {
        name: "Point".to_string(),
        args: vec![int(x), int(y)],
        ty: Type::Struct("Point".to_string()),
    }
}

#[test]
fn test_struct_member_read_and_write() {
    let registry = point_registry();
    let point_ty = Type::Struct("Point".to_string());
    let program = main_only(vec![
        let_stmt("p", point_ty.clone(), new_point(3, 4)),
        TStmt::Assign {
            target: member("p", &["x"], Type::Int),
            value: int(10),
        },
        ret(bin(
            BinOp::Add,
            member("p", &["x"], Type::Int),
            member("p", &["y"], Type::Int),
        )),
    ]);
    assert_eq!(exec(&program, &registry).0, 14);
}

#[test]
fn test_nested_struct_flattened_access() {
    let registry = point_registry();
    let rect_ty = Type::Struct("Rect".to_string());
    let program = main_only(vec![
        let_stmt(
            "r",
            rect_ty,
            TExpr::NewStruct {
                name: "Rect".to_string(),
                args: vec![new_point(1, 2), new_point(3, 4)],
                ty: Type::Struct("Rect".to_string()),
            },
        ),
        ret(bin(
            BinOp::Add,
            bin(
                BinOp::Mul,
                member("r", &["max", "y"], Type::Int),
                int(10),
            ),
            member("r", &["min", "x"], Type::Int),
        )),
    ]);
    assert_eq!(exec(&program, &registry).0, 41);
}

/// Binding a struct deep-copies its backing bytes.
#[test]
fn test_struct_copy_does_not_alias() {
    let registry = point_registry();
    let point_ty = Type::Struct("Point".to_string());
    let program = main_only(vec![
        let_stmt("p", point_ty.clone(), new_point(1, 2)),
        let_stmt("q", point_ty.clone(), var("p", point_ty)),
        TStmt::Assign {
            target: member("q", &["x"], Type::Int),
            value: int(50),
        },
        ret(bin(
            BinOp::Add,
            member("p", &["x"], Type::Int),
            member("q", &["x"], Type::Int),
        )),
    ]);
    assert_eq!(exec(&program, &registry).0, 51);
}

#[test]
fn test_struct_passed_by_deep_copy() {
    let registry = point_registry();
    let point_ty = Type::Struct("Point".to_string());
    // fn mangle(p: Point) -> Int { p.x = 0; return p.x; }
    let mangle = function(
        "mangle",
        vec![param("p", point_ty.clone())],
        Type::Int,
        vec![
            TStmt::Assign {
                target: member("p", &["x"], Type::Int),
                value: int(0),
            },
            ret(member("p", &["x"], Type::Int)),
        ],
    );
    // The caller's point is unaffected by the callee's mutation.
    let main = function(
        "main",
        vec![],
        Type::Int,
        vec![
            let_stmt("p", point_ty.clone(), new_point(7, 8)),
            TStmt::Expr(call("mangle", vec![var("p", point_ty)], Type::Int)),
            ret(member("p", &["x"], Type::Int)),
        ],
    );
    let program = TProgram {
        functions: vec![main, mangle],
    };
    assert_eq!(exec(&program, &registry).0, 7);
}

#[test]
fn test_string_literal_printed() {
    let program = main_only(vec![
        let_stmt("s", Type::Str, string("hello, opal")),
        TStmt::Expr(call(
            "print_str",
            vec![var("s", Type::Str)],
            Type::Void,
        )),
        ret(int(0)),
    ]);
    let (value, output) = exec(&program, &StructRegistry::new());
    assert_eq!(value, 0);
    assert_eq!(output, "hello, opal\n");
}

#[test]
fn test_print_int_and_exit_foreigns() {
    let program = main_only(vec![
        TStmt::Expr(call("print_int", vec![int(41)], Type::Void)),
        TStmt::Expr(call("exit", vec![int(9)], Type::Void)),
        ret(int(0)),
    ]);
    let (value, output) = exec(&program, &StructRegistry::new());
    assert_eq!(value, 9);
    assert_eq!(output, "41\n");
}

#[test]
fn test_register_exhaustion_reported() {
    // 15 simultaneously live locals exhaust the file (r0 is reserved for
    // staging); the compile fails rather than miscompiling.
    let mut body: Vec<TStmt> = (0..15)
        .map(|i| let_stmt(&format!("v{}", i), Type::Int, int(i)))
        .collect();
    body.push(ret(int(0)));
    let program = main_only(body);

    let err = pipeline::compile(&program, &StructRegistry::new()).unwrap_err();
    assert!(matches!(err, CodegenError::RegisterExhaustion(_)));
}

#[test]
fn test_unknown_callee_reported() {
    let program = main_only(vec![ret(call("ghost", vec![], Type::Int))]);
    let err = pipeline::compile(&program, &StructRegistry::new()).unwrap_err();
    assert!(matches!(err, CodegenError::UnknownFunction(name) if name == "ghost"));
}

#[test]
fn test_missing_entry_reported() {
    let program = TProgram {
        functions: vec![function("helper", vec![], Type::Int, vec![ret(int(1))])],
    };
    let err = pipeline::compile(&program, &StructRegistry::new()).unwrap_err();
    assert!(matches!(err, CodegenError::UnknownFunction(name) if name == "main"));
}

#[test]
fn test_entry_function_starts_at_initial_ip() {
    let helper = function("helper", vec![], Type::Int, vec![ret(int(2))]);
    let main = function(
        "main",
        vec![],
        Type::Int,
        vec![ret(call("helper", vec![], Type::Int))],
    );
    // Entry is emitted first even when declared last.
    let program = TProgram {
        functions: vec![helper, main],
    };
    let image = pipeline::compile(&program, &StructRegistry::new()).unwrap();
    assert_eq!(
        image.symbol("main"),
        Some(crate::backend::image::IMPORT_VECTOR_SIZE as u64)
    );
    assert_eq!(exec_plain(&program), 2);
}

#[test]
fn test_pass_through_expressions() {
    let program = main_only(vec![ret(TExpr::Group {
        inner: Box::new(TExpr::Cast {
            inner: Box::new(int(12)),
            ty: Type::Int,
        }),
    })]);
    assert_eq!(exec_plain(&program), 12);
}
