//! End-to-end scenarios: AST in, QBE IL out, asserted by inspection.
//!
//! Each test builds the tree the front end would produce for a small BASIC
//! program and checks the structural properties of the emitted IL that the
//! runtime depends on.

use bqc::ast::*;
use bqc::data::{DataValue, DataValues};
use bqc::compile_to_il;
use std::path::PathBuf;

fn loc() -> SourceLocation {
    SourceLocation::new(PathBuf::from("scenario.bas"), 1, 1)
}

fn s(kind: StatementKind) -> Statement {
    Statement::new(kind, loc())
}

fn at_line(line: u32, kind: StatementKind) -> Statement {
    let mut st = s(kind);
    st.line_number = Some(line);
    st
}

fn e(kind: ExprKind) -> Expr {
    Expr::new(kind, loc())
}

fn int(v: i64) -> Expr {
    e(ExprKind::IntLiteral(v))
}

fn str_lit(text: &str) -> Expr {
    e(ExprKind::StringLiteral(text.to_string()))
}

fn var(name: &str) -> Expr {
    e(ExprKind::Variable(name.to_string()))
}

fn print1(expr: Expr) -> Statement {
    s(StatementKind::Print {
        items: vec![PrintItem {
            expr,
            sep: PrintSep::None,
        }],
    })
}

fn assign(name: &str, value: Expr) -> Statement {
    s(StatementKind::Let {
        target: var(name),
        value,
    })
}

fn compile(statements: Vec<Statement>) -> String {
    compile_program(statements, DataValues::default())
}

fn compile_program(statements: Vec<Statement>, data: DataValues) -> String {
    compile_to_il(&Program { statements }, &data)
        .expect("scenario compiles")
        .il
}

/// GOSUB 100 / PRINT "After" / END / 100 PRINT "Inside" / RETURN
///
/// The block for line 100 sits past END and is only reachable through the
/// Call edge; it must be emitted anyway, and RETURN must be able to come
/// back to the statement after the GOSUB.
#[test]
fn scenario_gosub_past_end() {
    let il = compile(vec![
        s(StatementKind::Gosub(JumpTarget::Line(100))),
        print1(str_lit("After")),
        s(StatementKind::End),
        at_line(100, StatementKind::Print {
            items: vec![PrintItem {
                expr: str_lit("Inside"),
                sep: PrintSep::None,
            }],
        }),
        s(StatementKind::Return(None)),
    ]);
    // the call site jumps to the subroutine block
    let call_jmp = il
        .lines()
        .find(|l| l.contains("jmp @line100"))
        .expect("call edge jumps to the line-100 block");
    assert!(call_jmp.starts_with('\t'));
    // "Inside" really is emitted
    assert!(il.contains("b \"Inside\""));
    // END reaches tidy_exit by an explicit edge, not just a flag
    assert!(il.contains("jmp @tidy_exit"));
    // return dispatch indexes the pushed site id
    assert!(il.contains("loadw $gosub_return_sp"));
    assert!(il.contains("jmp @ret_bad"));
}

/// SELECT CASE x with x = 2: only the second arm runs, no fallthrough.
#[test]
fn scenario_select_case_structure() {
    let il = compile(vec![
        assign("x", int(2)),
        s(StatementKind::Select {
            selector: var("x"),
            arms: vec![
                CaseArm {
                    labels: vec![CaseLabel::Value(int(1))],
                    body: vec![print1(str_lit("one"))],
                },
                CaseArm {
                    labels: vec![CaseLabel::Value(int(2))],
                    body: vec![print1(str_lit("two"))],
                },
            ],
            else_body: vec![print1(str_lit("other"))],
        }),
    ]);
    // every case body ends by jumping to the shared select exit
    let exits = il.matches("jmp @select_exit").count();
    assert!(exits >= 3, "all arms converge at the exit:\n{}", il);
    // checks cascade: check 1 false-edges into check 2
    let c1 = il.find("@case_check").unwrap();
    assert!(il[c1..].contains("ceqw"));
}

/// ON x GOSUB with x = 0: out of range, falls through to "done".
#[test]
fn scenario_on_gosub_out_of_range() {
    let il = compile(vec![
        assign("x", int(0)),
        s(StatementKind::OnGosub {
            selector: var("x"),
            targets: vec![JumpTarget::Line(100), JumpTarget::Line(200)],
        }),
        print1(str_lit("done")),
        s(StatementKind::End),
        at_line(100, StatementKind::Print {
            items: vec![PrintItem {
                expr: str_lit("a"),
                sep: PrintSep::None,
            }],
        }),
        s(StatementKind::Return(None)),
        at_line(200, StatementKind::Print {
            items: vec![PrintItem {
                expr: str_lit("b"),
                sep: PrintSep::None,
            }],
        }),
        s(StatementKind::Return(None)),
    ]);
    // the switch defaults to the shared return point, where "done" runs
    let switch_line = il
        .lines()
        .find(|l| l.contains("[") && l.contains("jmp @on_gosub_ret"))
        .expect("table dispatch with default");
    // two targets, two trampolines
    assert_eq!(switch_line.matches("@on_push_").count(), 2);
    // a trampoline pushes before jumping to its line
    assert!(il.contains("jmp @line100"));
    assert!(il.contains("jmp @line200"));
}

/// REDIM PRESERVE on a string array keeps the element kind and rank.
#[test]
fn scenario_redim_preserve_strings() {
    let il = compile(vec![
        s(StatementKind::Dim {
            decls: vec![VarDecl {
                name: "A$".to_string(),
                type_name: None,
                bounds: vec![ArrayBound {
                    lower: None,
                    upper: int(2),
                }],
            }],
        }),
        s(StatementKind::Let {
            target: e(ExprKind::ArrayElem {
                name: "A$".to_string(),
                indices: vec![int(0)],
            }),
            value: str_lit("x"),
        }),
        s(StatementKind::Redim {
            preserve: true,
            name: "A$".to_string(),
            bounds: vec![ArrayBound {
                lower: None,
                upper: int(5),
            }],
        }),
        print1(e(ExprKind::ArrayElem {
            name: "A$".to_string(),
            indices: vec![int(0)],
        })),
    ]);
    assert!(il.contains("call $array_new(l 8, w 1, w 1, ..., l 0, l 2)"));
    assert!(il.contains("call $array_redim(l"));
    assert!(il.contains(", w 1, w 1, ..., l 0, l 5)"));
    // the redim result replaces the stored descriptor pointer
    let redim_line = il
        .lines()
        .find(|l| l.contains("call $array_redim"))
        .unwrap();
    assert!(redim_line.trim_start().starts_with('%'));
    // local arrays are erased in tidy_exit
    assert!(il.contains("call $array_erase"));
}

/// TRY / THROW 42 / CATCH 42 / FINALLY: catch runs, then finally, then the
/// code after END TRY.
#[test]
fn scenario_try_catch_finally_ordering() {
    let il = compile(vec![
        s(StatementKind::Try {
            body: vec![s(StatementKind::Throw(int(42)))],
            catches: vec![CatchArm {
                code: Some(int(42)),
                body: vec![s(StatementKind::Print {
                    items: vec![
                        PrintItem {
                            expr: str_lit("caught"),
                            sep: PrintSep::Semicolon,
                        },
                        PrintItem {
                            expr: e(ExprKind::Call {
                                name: "ERR".to_string(),
                                args: vec![],
                            }),
                            sep: PrintSep::None,
                        },
                    ],
                })],
            }],
            finally: vec![print1(str_lit("cleanup"))],
        }),
        print1(str_lit("after")),
    ]);
    // the handler frame is pushed, armed, and popped
    assert!(il.contains("$basic_try_sp"));
    assert!(il.contains("call $setjmp"));
    // the catch checks the published code
    assert!(il.contains("loadw $basic_err_code"));
    assert!(il.contains("ceqw"));
    // ERR() reads the same cell
    assert!(il.contains("call $basic_print_int"));
    // catch body converges on finally, finally on the try exit
    assert!(il.contains("jmp @finally"));
    assert!(il.contains("jmp @try_exit"));
}

/// READ against the DATA table and a compile-time-resolved RESTORE.
#[test]
fn scenario_read_restore_data_tables() {
    let mut data = DataValues::default();
    data.values.push(DataValue::Int(7));
    data.values.push(DataValue::Str("name".to_string()));
    data.values.push(DataValue::Double(2.5));
    data.label_restore_points.insert("tbl".to_string(), 1);
    let il = compile_program(
        vec![
            s(StatementKind::Read {
                targets: vec![var("n%")],
            }),
            s(StatementKind::Restore {
                target: Some(JumpTarget::Label("tbl".to_string())),
            }),
            s(StatementKind::Read {
                targets: vec![var("s$")],
            }),
        ],
        data,
    );
    // values widened to 64 bits with a parallel tag array
    assert!(il.contains("export data $basic_data_count = align 8 { l 3 }"));
    assert!(il.contains("l 7"));
    assert!(il.contains("d d_2.5"));
    assert!(il.contains("b 0, b 2, b 1"));
    // the string value points into the pool
    assert!(il.contains("b \"name\""));
    // reads are type-directed; restore resolved to index 1 at compile time
    assert!(il.contains("call $fb_read_int()"));
    assert!(il.contains("call $fb_read_string()"));
    assert!(il.contains("call $fb_restore(l 1)"));
}

/// EXIT WHILE leaves through the loop's exit block.
#[test]
fn scenario_exit_while() {
    let il = compile(vec![s(StatementKind::While {
        cond: int(1),
        body: vec![
            s(StatementKind::Exit(ExitKind::While)),
            print1(str_lit("unreached")),
        ],
    })]);
    // two distinct jumps into loop_exit: the branch edge and the EXIT
    assert!(il.matches("@loop_exit").count() >= 2, "{}", il);
}

/// Implicit coercion at a call site: casts appear before the call.
#[test]
fn scenario_argument_casts_precede_call() {
    let f = ProcDef {
        name: "Halve".to_string(),
        params: vec![Param {
            name: "x".to_string(),
            type_name: TypeName::Double,
            byref: false,
        }],
        return_type: Some(TypeName::Double),
        body: vec![s(StatementKind::Return(Some(e(ExprKind::Binary {
            op: BinaryOp::Div,
            lhs: Box::new(var("x")),
            rhs: Box::new(int(2)),
        }))))],
    };
    let il = compile(vec![
        s(StatementKind::Function(f)),
        print1(e(ExprKind::Call {
            name: "Halve".to_string(),
            args: vec![int(9)],
        })),
    ]);
    let call_at = il.find("call $Halve(d").expect("double-typed call operand");
    let cast_at = il.find("swtof").expect("int argument converts to double");
    assert!(cast_at < call_at, "cast must precede the call");
}

/// String variables: overwrite releases the old value, tidy_exit releases
/// the last one.
#[test]
fn scenario_string_assignment_refcounts() {
    let il = compile(vec![
        assign("A$", str_lit("x")),
        s(StatementKind::Let {
            target: var("A$"),
            value: e(ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(var("A$")),
                rhs: Box::new(str_lit("y")),
            }),
        }),
        print1(var("A$")),
    ]);
    assert!(il.contains("call $string_concat"));
    // each overwrite releases what the slot held
    assert!(il.matches("call $string_release").count() >= 3, "{}", il);
    // and tidy_exit drops the final value before returning
    let tidy = il.find("@tidy_exit").unwrap();
    assert!(il[tidy..].contains("call $string_release"));
}

/// FUNCTION Tag$(n AS INTEGER) AS STRING: the reference in the return
/// slot leaves the procedure with the caller; tidy_exit releases the
/// other string locals only.
#[test]
fn scenario_string_function_returns_live_reference() {
    let f = ProcDef {
        name: "Tag$".to_string(),
        params: vec![Param {
            name: "n".to_string(),
            type_name: TypeName::Integer,
            byref: false,
        }],
        return_type: Some(TypeName::String),
        body: vec![
            s(StatementKind::Dim {
                decls: vec![VarDecl {
                    name: "pre$".to_string(),
                    type_name: None,
                    bounds: vec![],
                }],
            }),
            assign("pre$", str_lit("#")),
            s(StatementKind::Return(Some(e(ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(var("pre$")),
                rhs: Box::new(e(ExprKind::Call {
                    name: "STR$".to_string(),
                    args: vec![var("n")],
                })),
            })))),
        ],
    };
    let il = compile(vec![
        s(StatementKind::Function(f)),
        print1(e(ExprKind::Call {
            name: "Tag$".to_string(),
            args: vec![int(7)],
        })),
    ]);
    let start = il
        .find("export function l $Tag_s(w %p_n)")
        .expect("string-returning function signature");
    let body = &il[start..start + il[start..].find("\n}").unwrap()];
    let epilogue = &body[body.find("\n@tidy_exit").unwrap()..];
    // exactly one release in the epilogue: pre$, never the return slot
    assert_eq!(
        epilogue.matches("call $string_release").count(),
        1,
        "{}",
        epilogue
    );
    assert!(epilogue.contains("loadl %v_pre_s"));
    assert!(
        !epilogue.contains("loadl %v_Tag_s\n\tcall $string_release"),
        "the returned string must stay retained:\n{}",
        epilogue
    );
    // the return value is loaded out of its slot after the cleanup
    assert!(epilogue.contains("=l loadl %v_Tag_s"));
    assert!(
        epilogue
            .lines()
            .last()
            .unwrap()
            .trim_start()
            .starts_with("ret ")
    );
    // the caller drops the returned reference once printed
    let main_start = il.find("export function w $main()").unwrap();
    assert!(il[main_start..start].contains("call $string_release"));
}
