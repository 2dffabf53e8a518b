//! QBE IL code generation
//!
//! This module lowers the checked AST and its CFGs to QBE IL text (one
//! translation unit). Emission is split into focused submodules:
//!
//! - `state.rs`: the `CodeGen` struct, output buffers, slots, string pool
//! - `program.rs`: module assembly, function prologues and `tidy_exit`,
//!   the CFG walk, and terminator emission from edges
//! - `statements.rs`: straight-line statement bodies
//! - `expressions.rs`: expression emission, lvalues, casts, refcounts
//! - `types.rs`: conversion and comparison opcode selection
//! - `runtime.rs`: every external entry point and exported data symbol
//! - `error.rs`: error types
//!
//! # The two rules everything else hangs off
//!
//! **Scalar temps are promoted; memory is native width.** An INTEGER field
//! is `storew`-ed and `loadsw`-ed no matter what width the SSA temp had.
//! The field descriptor, not the register, decides the memory op.
//!
//! **Control flow is terminator-only.** The statement emitter skips
//! RETURN/GOTO/EXIT/THROW/ON entirely; the terminator emitter consumes the
//! block's outgoing edges exhaustively. Blocks reachable only through
//! GOSUB dispatch or CATCH edges are emitted like any other block.

mod error;
mod expressions;
mod program;
mod runtime;
mod state;
mod statements;
mod types;

pub use error::CodeGenError;
pub use program::emit_program;
pub use runtime::RUNTIME_SYMBOLS;
pub use state::CodeGen;

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::compile_to_il;
    use crate::data::DataValues;
    use std::path::PathBuf;

    fn loc() -> SourceLocation {
        SourceLocation::new(PathBuf::from("t.bas"), 1, 1)
    }

    fn e(kind: ExprKind) -> Expr {
        Expr::new(kind, loc())
    }

    fn s(kind: StatementKind) -> Statement {
        Statement::new(kind, loc())
    }

    fn int(v: i64) -> Expr {
        e(ExprKind::IntLiteral(v))
    }

    fn var(name: &str) -> Expr {
        e(ExprKind::Variable(name.to_string()))
    }

    fn print_one(expr: Expr) -> Statement {
        s(StatementKind::Print {
            items: vec![PrintItem {
                expr,
                sep: PrintSep::None,
            }],
        })
    }

    fn compile(statements: Vec<Statement>) -> String {
        let program = Program { statements };
        compile_to_il(&program, &DataValues::default())
            .expect("test program compiles")
            .il
    }

    #[test]
    fn test_hello_world() {
        let il = compile(vec![print_one(e(ExprKind::StringLiteral(
            "Hello, World!".to_string(),
        )))]);
        assert!(il.contains("export function w $main()"));
        assert!(il.contains("call $basic_runtime_init()"));
        assert!(il.contains("b \"Hello, World!\""));
        assert!(il.contains("call $string_new_utf8(l $str_0)"));
        assert!(il.contains("call $basic_print_string_desc"));
        assert!(il.contains("call $basic_print_newline()"));
        // the literal's reference is dropped once printed
        assert!(il.contains("call $string_release"));
        assert!(il.contains("ret 0"));
    }

    #[test]
    fn test_string_pool_is_module_scope() {
        let il = compile(vec![print_one(e(ExprKind::StringLiteral(
            "pooled".to_string(),
        )))]);
        // no literal text inside the function body
        let body_start = il.find("export function").unwrap();
        assert!(!il[body_start..].contains("b \"pooled\""));
        assert!(il[..body_start].contains("b \"pooled\""));
    }

    #[test]
    fn test_function_has_single_ret_through_tidy_exit() {
        // FUNCTION F(N AS INTEGER) AS INTEGER
        //   IF N <= 1 THEN RETURN 1
        //   RETURN N * F(N-1)
        // END FUNCTION
        // PRINT F(5)
        let f = ProcDef {
            name: "F".to_string(),
            params: vec![Param {
                name: "N".to_string(),
                type_name: TypeName::Integer,
                byref: false,
            }],
            return_type: Some(TypeName::Integer),
            body: vec![
                s(StatementKind::If {
                    arms: vec![IfArm {
                        cond: e(ExprKind::Binary {
                            op: BinaryOp::Le,
                            lhs: Box::new(var("N")),
                            rhs: Box::new(int(1)),
                        }),
                        body: vec![s(StatementKind::Return(Some(int(1))))],
                    }],
                    else_body: vec![],
                }),
                s(StatementKind::Return(Some(e(ExprKind::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(var("N")),
                    rhs: Box::new(e(ExprKind::Call {
                        name: "F".to_string(),
                        args: vec![e(ExprKind::Binary {
                            op: BinaryOp::Sub,
                            lhs: Box::new(var("N")),
                            rhs: Box::new(int(1)),
                        })],
                    })),
                })))),
            ],
        };
        let il = compile(vec![
            s(StatementKind::Function(f)),
            print_one(e(ExprKind::Call {
                name: "F".to_string(),
                args: vec![int(5)],
            })),
        ]);
        assert!(il.contains("export function w $F(w %p_N)"));
        let f_body: &str = {
            let start = il.find("export function w $F").unwrap();
            let end = il[start..].find("\n}").unwrap();
            &il[start..start + end]
        };
        // both RETURNs route through tidy_exit: exactly one ret instruction
        let rets = f_body.matches("\tret").count();
        assert_eq!(rets, 1, "expected a single ret, got:\n{}", f_body);
        // no duplicate jmp directly before any jmp/ret
        for pair in f_body
            .lines()
            .collect::<Vec<_>>()
            .windows(2)
        {
            if pair[0].trim_start().starts_with("jmp") {
                assert!(
                    pair[1].starts_with('@') || pair[1].starts_with('}'),
                    "instruction after a jmp must be a label: {:?}",
                    pair
                );
            }
        }
        // the recursive call's argument cast happens before the call
        assert!(f_body.contains("call $F(w"));
    }

    #[test]
    fn test_gosub_block_past_end_is_emitted() {
        // GOSUB 100 / PRINT "After" / END / 100 PRINT "Inside" / RETURN
        let mut target = print_one(e(ExprKind::StringLiteral("Inside".to_string())));
        target.line_number = Some(100);
        let il = compile(vec![
            s(StatementKind::Gosub(JumpTarget::Line(100))),
            print_one(e(ExprKind::StringLiteral("After".to_string()))),
            s(StatementKind::End),
            target,
            s(StatementKind::Return(None)),
        ]);
        // the subroutine block exists even though END precedes it lexically
        assert!(il.contains("@line100_"));
        assert!(il.contains("b \"Inside\""));
        // the call site pushes return-site id 1 and jumps
        assert!(il.contains("storew 1,"));
        assert!(il.contains("$gosub_return_sp"));
        // RETURN dispatches over the recorded return points
        assert!(il.contains("loadw $gosub_return_sp"));
    }

    #[test]
    fn test_select_case_no_fallthrough() {
        // LET x = 2 / SELECT CASE x / CASE 1,2,ELSE...
        let il = compile(vec![
            s(StatementKind::Let {
                target: var("x"),
                value: int(2),
            }),
            s(StatementKind::Select {
                selector: var("x"),
                arms: vec![
                    CaseArm {
                        labels: vec![CaseLabel::Value(int(1))],
                        body: vec![print_one(e(ExprKind::StringLiteral("one".to_string())))],
                    },
                    CaseArm {
                        labels: vec![CaseLabel::Value(int(2))],
                        body: vec![print_one(e(ExprKind::StringLiteral("two".to_string())))],
                    },
                ],
                else_body: vec![print_one(e(ExprKind::StringLiteral("other".to_string())))],
            }),
        ]);
        // selector stashed exactly once (the prologue zeroes it with storel)
        let stores = il
            .lines()
            .filter(|l| l.contains("storew") && l.contains(", %sel_0"))
            .count();
        assert_eq!(stores, 1, "{}", il);
        // two checks, an else arm, and a single shared exit
        assert!(il.contains("@case_check"));
        assert!(il.contains("@case_else"));
        assert!(il.contains("@select_exit"));
    }

    #[test]
    fn test_on_gosub_pushes_only_when_dispatching() {
        let mut t1 = print_one(e(ExprKind::StringLiteral("a".to_string())));
        t1.line_number = Some(100);
        let mut t2 = print_one(e(ExprKind::StringLiteral("b".to_string())));
        t2.line_number = Some(200);
        let il = compile(vec![
            s(StatementKind::Let {
                target: var("x"),
                value: int(0),
            }),
            s(StatementKind::OnGosub {
                selector: var("x"),
                targets: vec![JumpTarget::Line(100), JumpTarget::Line(200)],
            }),
            print_one(e(ExprKind::StringLiteral("done".to_string()))),
            s(StatementKind::End),
            t1,
            s(StatementKind::Return(None)),
            t2,
            s(StatementKind::Return(None)),
        ]);
        // switch over the 0-based selector with push trampolines
        assert!(il.contains("=w sub"));
        assert!(il.contains("@on_push_"));
        // the default edge goes straight to the shared return point: the
        // switch line names it directly, outside the trampoline table
        let switch_line = il
            .lines()
            .find(|l| l.contains("jmp @on_gosub_ret"))
            .expect("dispatch emitted");
        assert!(switch_line.contains("["), "{}", switch_line);
    }

    #[test]
    fn test_setjmp_feeds_jnz_directly() {
        let il = compile(vec![s(StatementKind::Try {
            body: vec![s(StatementKind::Throw(int(42)))],
            catches: vec![CatchArm {
                code: Some(int(42)),
                body: vec![print_one(e(ExprKind::StringLiteral("caught".to_string())))],
            }],
            finally: vec![print_one(e(ExprKind::StringLiteral("cleanup".to_string())))],
        })]);
        let lines: Vec<&str> = il.lines().collect();
        let setjmp_at = lines
            .iter()
            .position(|l| l.contains("call $setjmp"))
            .expect("setjmp emitted");
        assert!(
            lines[setjmp_at + 1].trim_start().starts_with("jnz"),
            "setjmp must feed the dispatching jnz with nothing in between"
        );
        // THROW publishes the code before unwinding
        assert!(il.contains("storew 42, $basic_err_code"));
        assert!(il.contains("call $longjmp"));
        // FINALLY exists on the normal path
        assert!(il.contains("@finally_"));
    }

    #[test]
    fn test_record_fields_use_native_width_ops() {
        // TYPE Point : x AS INTEGER : y AS INTEGER : END TYPE
        // DIM p AS Point / p.x = 5 / PRINT p.x
        let member = e(ExprKind::Member {
            base: Box::new(var("p")),
            field: "x".to_string(),
        });
        let il = compile(vec![
            s(StatementKind::TypeDecl {
                name: "Point".to_string(),
                fields: vec![
                    FieldDecl {
                        name: "x".to_string(),
                        type_name: TypeName::Integer,
                    },
                    FieldDecl {
                        name: "y".to_string(),
                        type_name: TypeName::Integer,
                    },
                ],
            }),
            s(StatementKind::Dim {
                decls: vec![VarDecl {
                    name: "p".to_string(),
                    type_name: Some(TypeName::Record("Point".to_string())),
                    bounds: vec![],
                }],
            }),
            s(StatementKind::Let {
                target: member.clone(),
                value: int(5),
            }),
            print_one(member),
        ]);
        // stores and loads at the field's native width, never storel/loadl
        assert!(il.contains("storew 5,"), "{}", il);
        assert!(il.contains("loadsw"), "{}", il);
        // member access adds the field offset from the base pointer
        assert!(il.contains("=l add %v_p, 0"));
        // record type emitted for the module
        assert!(il.contains("type :Point ="));
    }

    #[test]
    fn test_record_copy_retains_before_release() {
        // TYPE Pair has a STRING field; b = a must keep the field alive
        // even when source and destination are the same record
        let pair = TypeName::Record("Pair".to_string());
        let il = compile(vec![
            s(StatementKind::TypeDecl {
                name: "Pair".to_string(),
                fields: vec![FieldDecl {
                    name: "name".to_string(),
                    type_name: TypeName::String,
                }],
            }),
            s(StatementKind::Dim {
                decls: vec![
                    VarDecl {
                        name: "a".to_string(),
                        type_name: Some(pair.clone()),
                        bounds: vec![],
                    },
                    VarDecl {
                        name: "b".to_string(),
                        type_name: Some(pair),
                        bounds: vec![],
                    },
                ],
            }),
            s(StatementKind::Let {
                target: var("b"),
                value: var("a"),
            }),
        ]);
        let retain = il.find("call $string_retain").expect("field copy retains");
        let release = il
            .find("call $string_release")
            .expect("field copy releases");
        assert!(
            retain < release,
            "retain the source before releasing the destination:\n{}",
            il
        );
    }

    #[test]
    fn test_redim_preserve_and_array_calls() {
        // DIM A$(2) / REDIM PRESERVE A$(5) / A$(0) = "x"
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
            s(StatementKind::Redim {
                preserve: true,
                name: "A$".to_string(),
                bounds: vec![ArrayBound {
                    lower: None,
                    upper: int(5),
                }],
            }),
            s(StatementKind::Let {
                target: e(ExprKind::ArrayElem {
                    name: "A$".to_string(),
                    indices: vec![int(0)],
                }),
                value: e(ExprKind::StringLiteral("x".to_string())),
            }),
        ]);
        // string elements: 8-byte descriptors with the string element tag
        assert!(il.contains("call $array_new(l 8, w 1, w 1, ..., l 0, l 2)"));
        assert!(il.contains("call $array_redim(l"));
        assert!(il.contains("w 1, w 1, ..., l 0, l 5"));
        assert!(il.contains("call $array_get_address(l"));
        // element assignment releases the old string and keeps the new one
        assert!(il.contains("call $string_release"));
        assert!(il.contains("call $string_retain") || il.contains("$string_new_utf8"));
    }

    #[test]
    fn test_single_line_if_body_is_conditional() {
        // IF 0 THEN PRINT "no"
        let il = compile(vec![s(StatementKind::If {
            arms: vec![IfArm {
                cond: int(0),
                body: vec![print_one(e(ExprKind::StringLiteral("no".to_string())))],
            }],
            else_body: vec![],
        })]);
        // the THEN body sits behind its own label, after the branch
        let jnz = il.find("jnz").expect("conditional branch emitted");
        let then_label = il.find("@if_then").expect("then block exists");
        let print_call = il.find("call $basic_print_string_desc").unwrap();
        assert!(jnz < then_label);
        assert!(then_label < print_call, "body must not run unconditionally");
    }

    #[test]
    fn test_globals_go_through_base_pointer() {
        // GLOBAL n AS LONG / n = 7 / PRINT n
        let il = compile(vec![
            s(StatementKind::Global {
                decls: vec![VarDecl {
                    name: "n".to_string(),
                    type_name: Some(TypeName::Long),
                    bounds: vec![],
                }],
            }),
            s(StatementKind::Let {
                target: var("n"),
                value: int(7),
            }),
            print_one(var("n")),
        ]);
        assert!(il.contains("call $basic_global_init(l 1)"));
        // never an SSA scalar: always base + slot offset
        assert!(il.contains("call $basic_global_base()"));
        assert!(il.contains("=l add"));
        // the literal widens to the slot's LONG width before the store
        assert!(il.contains("=l extsw 7"));
        assert!(il.contains("storel"));
    }

    #[test]
    fn test_until_swaps_branch_edges() {
        // DO : LOOP UNTIL x  vs  WHILE x : WEND - compare edge polarity
        let while_il = compile(vec![
            s(StatementKind::Let {
                target: var("x"),
                value: int(0),
            }),
            s(StatementKind::While {
                cond: var("x"),
                body: vec![],
            }),
        ]);
        let until_il = compile(vec![
            s(StatementKind::Let {
                target: var("x"),
                value: int(0),
            }),
            s(StatementKind::DoLoop {
                test: LoopTest::PostUntil(var("x")),
                body: vec![],
            }),
        ]);
        // WHILE: true edge enters the body; UNTIL: true edge leaves
        let wl = while_il
            .lines()
            .find(|l| l.contains("jnz") && l.contains("loop_body"))
            .unwrap();
        assert!(wl.find("loop_body").unwrap() < wl.find("loop_exit").unwrap());
        let ul = until_il
            .lines()
            .find(|l| l.contains("jnz") && l.contains("loop_body"))
            .unwrap();
        assert!(ul.find("loop_exit").unwrap() < ul.find("loop_body").unwrap());
    }

    #[test]
    fn test_for_loop_checks_step_and_direction() {
        let il = compile(vec![s(StatementKind::For {
            var: "I".to_string(),
            from: int(1),
            to: int(10),
            step: None,
            body: vec![print_one(var("I"))],
        })]);
        assert!(il.contains("call $basic_for_check_step(l 1)"));
        assert!(il.contains("%for_lim_0"));
        assert!(il.contains("%for_stp_0"));
        // direction-aware test: both <= and >= appear, selected by step sign
        assert!(il.contains("cslel"));
        assert!(il.contains("csgel"));
        assert!(il.contains("@for_inc"));
    }
}
