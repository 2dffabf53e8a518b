//! CFG construction
//!
//! A single-pass recursive builder: one routine per control structure, each
//! following the same contract - given the incoming block and the AST node,
//! create the internal blocks, wire the internal edges, and return the exit
//! block the next lexical statement appends into. No routine looks forward
//! in the AST; forward jump references become deferred edges resolved in a
//! short post-pass.
//!
//! Loop, SELECT, and TRY contexts ride down the recursion as explicit
//! arguments (a parent-linked chain of stack frames), so "nearest enclosing
//! loop" is answerable at any depth without global state.

use super::{BlockFlags, BlockId, BlockOp, Cfg, EdgeKind, GosubSite, ProgramCfg, Term};
use crate::ast::*;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::semantic::{const_eval, for_each_nested};
use crate::symbols::{ConstValue, SymbolTable};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    For,
    While,
    Do,
}

/// One enclosing loop, linked to the loop enclosing it.
#[derive(Clone, Copy)]
struct LoopFrame<'f> {
    kind: LoopKind,
    exit: BlockId,
    cont: BlockId,
    parent: Option<&'f LoopFrame<'f>>,
}

/// One enclosing TRY, linked outward.
#[derive(Clone, Copy)]
struct TryFrame<'f> {
    dispatch: BlockId,
    parent: Option<&'f TryFrame<'f>>,
}

/// Lexical context carried down the recursion.
#[derive(Clone, Copy, Default)]
struct Ctx<'f> {
    loops: Option<&'f LoopFrame<'f>>,
    tries: Option<&'f TryFrame<'f>>,
}

impl<'f> Ctx<'f> {
    fn nearest_loop(&self, kind: LoopKind) -> Option<&'f LoopFrame<'f>> {
        let mut frame = self.loops;
        while let Some(f) = frame {
            if f.kind == kind {
                return Some(f);
            }
            frame = f.parent;
        }
        None
    }
}

struct Deferred {
    from: BlockId,
    target: JumpTarget,
    kind: EdgeKind,
    loc: SourceLocation,
}

/// Build the program CFG: one graph for `$main`, one per procedure.
/// Construction errors (unresolved jump targets, misplaced EXITs) come back
/// as diagnostics; emission never runs on a graph that failed here.
pub fn build_program<'a>(
    program: &'a Program,
    symbols: &SymbolTable,
) -> Result<ProgramCfg<'a>, Diagnostics> {
    let mut diags = Diagnostics::new();

    debug!("building cfg for main");
    let main_stmts: Vec<&'a Statement> = program.main_statements().collect();
    let main = FnBuilder::new("main", symbols).build(&main_stmts, &mut diags);

    let mut functions = Vec::new();
    for proc in program.procedures() {
        debug!(name = %proc.name, "building procedure cfg");
        let body: Vec<&'a Statement> = proc.body.iter().collect();
        let mut b = FnBuilder::new(&proc.name, symbols);
        if let Some(info) = symbols.lookup_procedure(&proc.name) {
            b.cfg.params = info.params.clone();
            b.cfg.return_type = info.return_type.clone();
        }
        b.is_procedure = true;
        functions.push(b.build(&body, &mut diags));
    }

    if diags.has_errors() {
        Err(diags)
    } else {
        Ok(ProgramCfg { main, functions })
    }
}

struct FnBuilder<'a, 's> {
    cfg: Cfg<'a>,
    symbols: &'s SymbolTable,
    is_procedure: bool,
    deferred: Vec<Deferred>,
    target_lines: HashSet<u32>,
    target_labels: HashSet<String>,
    target_blocks: HashSet<BlockId>,
    diags: Diagnostics,
}

impl<'a, 's> FnBuilder<'a, 's> {
    fn new(name: &str, symbols: &'s SymbolTable) -> Self {
        FnBuilder {
            cfg: Cfg::new(name),
            symbols,
            is_procedure: false,
            deferred: Vec::new(),
            target_lines: HashSet::new(),
            target_labels: HashSet::new(),
            target_blocks: HashSet::new(),
            diags: Diagnostics::new(),
        }
    }

    fn build(mut self, stmts: &[&'a Statement], out_diags: &mut Diagnostics) -> Cfg<'a> {
        self.collect_targets(stmts);

        let entry = self.cfg.new_block("entry");
        self.cfg.block_mut(entry).flags |= BlockFlags::ENTRY;
        self.cfg.entry = entry;
        let exit = self.cfg.new_block("tidy_exit");
        self.cfg.block_mut(exit).flags |= BlockFlags::EXIT;
        self.cfg.exit = exit;

        let end = self.build_list(stmts, entry, Ctx::default());
        if self.flows_on(end) {
            self.cfg.add_edge(end, exit, EdgeKind::Jump);
        }

        self.resolve_deferred();
        self.finish_gosub_returns();
        self.mark_unreachable();

        out_diags.extend(self.diags);
        self.cfg
    }

    // ---- pre-pass: which lines and labels are jump targets ----

    fn collect_targets(&mut self, stmts: &[&'a Statement]) {
        fn note(targets: &[JumpTarget], lines: &mut HashSet<u32>, labels: &mut HashSet<String>) {
            for t in targets {
                match t {
                    JumpTarget::Line(n) => {
                        lines.insert(*n);
                    }
                    JumpTarget::Label(s) => {
                        labels.insert(s.clone());
                    }
                }
            }
        }
        fn walk(stmt: &Statement, lines: &mut HashSet<u32>, labels: &mut HashSet<String>) {
            match &stmt.kind {
                StatementKind::Goto(t) | StatementKind::Gosub(t) => {
                    note(std::slice::from_ref(t), lines, labels)
                }
                StatementKind::OnGoto { targets, .. } | StatementKind::OnGosub { targets, .. } => {
                    note(targets, lines, labels)
                }
                _ => {}
            }
            for_each_nested(stmt, &mut |nested| {
                for s in nested {
                    walk(s, lines, labels);
                }
            });
        }
        for stmt in stmts {
            walk(stmt, &mut self.target_lines, &mut self.target_labels);
        }
    }

    fn is_jump_target(&self, stmt: &Statement) -> bool {
        stmt.line_number
            .is_some_and(|n| self.target_lines.contains(&n))
            || stmt
                .label
                .as_ref()
                .is_some_and(|l| self.target_labels.contains(l))
    }

    fn register_target(&mut self, stmt: &Statement, block: BlockId) {
        if let Some(n) = stmt.line_number {
            self.cfg.line_blocks.insert(n, block);
        }
        if let Some(l) = &stmt.label {
            self.cfg.label_blocks.insert(l.clone(), block);
        }
        self.target_blocks.insert(block);
    }

    /// Whether control can still flow out the bottom of `id`. False for
    /// terminated blocks and for the empty orphan a terminator left behind:
    /// wiring an orphan into a merge would make a dead merge look live.
    fn flows_on(&self, id: BlockId) -> bool {
        let b = self.cfg.block(id);
        if b.is_terminated() {
            return false;
        }
        !b.preds.is_empty()
            || b.flags.contains(BlockFlags::ENTRY)
            || !b.stmts.is_empty()
            || self.target_blocks.contains(&id)
    }

    // ---- the statement walk ----

    fn build_list(&mut self, stmts: &[&'a Statement], mut cur: BlockId, ctx: Ctx<'_>) -> BlockId {
        for &stmt in stmts {
            if self.is_jump_target(stmt) {
                let hint = match (&stmt.line_number, &stmt.label) {
                    (Some(n), _) => format!("line{}", n),
                    (_, Some(l)) => l.clone(),
                    _ => "line".to_string(),
                };
                let next = self.cfg.new_block(&hint);
                if !self.cfg.block(cur).is_terminated() {
                    self.cfg.add_edge(cur, next, EdgeKind::Fallthrough);
                }
                cur = next;
                self.register_target(stmt, cur);
            }
            cur = self.build_stmt(stmt, cur, ctx);
        }
        cur
    }

    /// Dispatch one statement. Every structured kind gets its own routine;
    /// everything else appends to the current block or becomes a terminator.
    fn build_stmt(&mut self, stmt: &'a Statement, cur: BlockId, ctx: Ctx<'_>) -> BlockId {
        match &stmt.kind {
            StatementKind::If { arms, else_body } => self.build_if(arms, else_body, cur, ctx),
            StatementKind::While { cond, body } => {
                self.build_pre_test(cond, false, LoopKind::While, body, cur, ctx)
            }
            StatementKind::DoLoop { test, body } => {
                if test.is_post() {
                    self.build_post_test(test.cond(), test.is_until(), body, cur, ctx)
                } else {
                    self.build_pre_test(test.cond(), test.is_until(), LoopKind::Do, body, cur, ctx)
                }
            }
            StatementKind::For {
                var,
                from,
                to,
                step,
                body,
            } => self.build_for(var, from, to, step.as_ref(), body, cur, ctx),
            StatementKind::Select {
                selector,
                arms,
                else_body,
            } => self.build_select(selector, arms, else_body, cur, ctx),
            StatementKind::Try {
                body,
                catches,
                finally,
            } => self.build_try(body, catches, finally, cur, ctx),
            StatementKind::Goto(target) => {
                self.jump_edge(cur, target, EdgeKind::Jump, &stmt.loc);
                self.terminate(cur, "after_goto")
            }
            StatementKind::Gosub(target) => self.build_gosub(target, cur, &stmt.loc),
            StatementKind::OnGoto { selector, targets } => {
                self.build_on(selector, targets, false, cur, &stmt.loc)
            }
            StatementKind::OnGosub { selector, targets } => {
                self.build_on(selector, targets, true, cur, &stmt.loc)
            }
            StatementKind::Return(value) => self.build_return(value.as_ref(), cur),
            StatementKind::Exit(kind) => self.build_exit(*kind, cur, ctx, &stmt.loc),
            StatementKind::Continue(kind) => self.build_continue(*kind, cur, ctx, &stmt.loc),
            StatementKind::End => {
                // an explicit edge, not just a flag: the terminator emitter
                // walks edges and would otherwise drop the jump
                self.cfg.add_edge(cur, self.cfg.exit, EdgeKind::Jump);
                self.terminate(cur, "after_end")
            }
            StatementKind::Throw(code) => {
                self.cfg.block_mut(cur).term = Term::Throw(code);
                if let Some(t) = ctx.tries {
                    self.cfg.add_edge(cur, t.dispatch, EdgeKind::Exception);
                }
                self.terminate(cur, "after_throw")
            }
            // declarations without code at this point
            StatementKind::Shared { .. }
            | StatementKind::Const { .. }
            | StatementKind::TypeDecl { .. }
            | StatementKind::Sub(_)
            | StatementKind::Function(_) => cur,
            // straight-line statements accumulate in the current block
            _ => {
                self.cfg.block_mut(cur).stmts.push(stmt);
                cur
            }
        }
    }

    /// Mark `block` terminated and hand back a fresh block for whatever
    /// lexically follows. The fresh block stays unreachable unless a later
    /// jump lands on it.
    fn terminate(&mut self, block: BlockId, hint: &str) -> BlockId {
        self.cfg.block_mut(block).flags |= BlockFlags::TERMINATED;
        self.cfg.new_block(hint)
    }

    fn jump_edge(&mut self, from: BlockId, target: &JumpTarget, kind: EdgeKind, loc: &SourceLocation) {
        let resolved = match target {
            JumpTarget::Line(n) => self.cfg.line_blocks.get(n).copied(),
            JumpTarget::Label(l) => self.cfg.label_blocks.get(l).copied(),
        };
        match resolved {
            Some(to) => self.cfg.add_edge(from, to, kind),
            None => self.deferred.push(Deferred {
                from,
                target: target.clone(),
                kind,
                loc: loc.clone(),
            }),
        }
    }

    // ---- structured statements ----

    fn build_if(
        &mut self,
        arms: &'a [IfArm],
        else_body: &'a [Statement],
        cur: BlockId,
        ctx: Ctx<'_>,
    ) -> BlockId {
        let merge = self.cfg.new_block("if_merge");
        let mut check = cur;
        for (i, arm) in arms.iter().enumerate() {
            self.cfg.block_mut(check).term = Term::Branch(&arm.cond);
            let then_b = self.cfg.new_block("if_then");
            let next = if i + 1 < arms.len() {
                self.cfg.new_block("if_elseif")
            } else if !else_body.is_empty() {
                self.cfg.new_block("if_else")
            } else {
                merge
            };
            self.cfg.add_edge(check, then_b, EdgeKind::CondTrue);
            self.cfg.add_edge(check, next, EdgeKind::CondFalse);

            // the THEN body gets its own blocks even for the single-line
            // form; hoisting it into the parent block would run it
            // unconditionally
            let body: Vec<&Statement> = arm.body.iter().collect();
            let end = self.build_list(&body, then_b, ctx);
            if self.flows_on(end) {
                self.cfg.add_edge(end, merge, EdgeKind::Jump);
            }
            check = next;
        }
        if !else_body.is_empty() {
            let body: Vec<&Statement> = else_body.iter().collect();
            let end = self.build_list(&body, check, ctx);
            if self.flows_on(end) {
                self.cfg.add_edge(end, merge, EdgeKind::Jump);
            }
        }
        merge
    }

    fn build_pre_test(
        &mut self,
        cond: &'a Expr,
        until: bool,
        kind: LoopKind,
        body: &'a [Statement],
        cur: BlockId,
        ctx: Ctx<'_>,
    ) -> BlockId {
        let header = self.cfg.new_block("loop_head");
        self.cfg.block_mut(header).flags |= BlockFlags::LOOP_HEADER;
        self.cfg.add_edge(cur, header, EdgeKind::Jump);
        self.cfg.block_mut(header).term = Term::Branch(cond);

        let body_b = self.cfg.new_block("loop_body");
        let exit_b = self.cfg.new_block("loop_exit");
        self.cfg.block_mut(exit_b).flags |= BlockFlags::LOOP_EXIT;
        // UNTIL inverts by swapping the conditional edges; the raw
        // condition is emitted either way
        if until {
            self.cfg.add_edge(header, exit_b, EdgeKind::CondTrue);
            self.cfg.add_edge(header, body_b, EdgeKind::CondFalse);
        } else {
            self.cfg.add_edge(header, body_b, EdgeKind::CondTrue);
            self.cfg.add_edge(header, exit_b, EdgeKind::CondFalse);
        }

        let frame = LoopFrame {
            kind,
            exit: exit_b,
            cont: header,
            parent: ctx.loops,
        };
        let inner = Ctx {
            loops: Some(&frame),
            ..ctx
        };
        let stmts: Vec<&Statement> = body.iter().collect();
        let end = self.build_list(&stmts, body_b, inner);
        if self.flows_on(end) {
            self.cfg.add_edge(end, header, EdgeKind::Jump);
        }
        exit_b
    }

    fn build_post_test(
        &mut self,
        cond: &'a Expr,
        until: bool,
        body: &'a [Statement],
        cur: BlockId,
        ctx: Ctx<'_>,
    ) -> BlockId {
        let body_b = self.cfg.new_block("loop_body");
        self.cfg.add_edge(cur, body_b, EdgeKind::Jump);
        let test_b = self.cfg.new_block("loop_test");
        self.cfg.block_mut(test_b).flags |= BlockFlags::LOOP_HEADER;
        let exit_b = self.cfg.new_block("loop_exit");
        self.cfg.block_mut(exit_b).flags |= BlockFlags::LOOP_EXIT;

        let frame = LoopFrame {
            kind: LoopKind::Do,
            exit: exit_b,
            cont: test_b,
            parent: ctx.loops,
        };
        let inner = Ctx {
            loops: Some(&frame),
            ..ctx
        };
        let stmts: Vec<&Statement> = body.iter().collect();
        let end = self.build_list(&stmts, body_b, inner);
        if self.flows_on(end) {
            self.cfg.add_edge(end, test_b, EdgeKind::Jump);
        }

        self.cfg.block_mut(test_b).term = Term::Branch(cond);
        if until {
            self.cfg.add_edge(test_b, exit_b, EdgeKind::CondTrue);
            self.cfg.add_edge(test_b, body_b, EdgeKind::CondFalse);
        } else {
            self.cfg.add_edge(test_b, body_b, EdgeKind::CondTrue);
            self.cfg.add_edge(test_b, exit_b, EdgeKind::CondFalse);
        }
        exit_b
    }

    fn build_for(
        &mut self,
        var: &'a str,
        from: &'a Expr,
        to: &'a Expr,
        step: Option<&'a Expr>,
        body: &'a [Statement],
        cur: BlockId,
        ctx: Ctx<'_>,
    ) -> BlockId {
        let id = self.cfg.for_count;
        self.cfg.for_count += 1;
        self.cfg.block_mut(cur).ops.push(BlockOp::ForInit {
            id,
            var,
            from,
            to,
            step,
        });

        let header = self.cfg.new_block("for_head");
        self.cfg.block_mut(header).flags |= BlockFlags::LOOP_HEADER;
        self.cfg.add_edge(cur, header, EdgeKind::Jump);
        self.cfg.block_mut(header).term = Term::ForTest { id, var };

        let body_b = self.cfg.new_block("for_body");
        let incr = self.cfg.new_block("for_inc");
        let exit_b = self.cfg.new_block("for_exit");
        self.cfg.block_mut(exit_b).flags |= BlockFlags::LOOP_EXIT;
        self.cfg.add_edge(header, body_b, EdgeKind::CondTrue);
        self.cfg.add_edge(header, exit_b, EdgeKind::CondFalse);

        let frame = LoopFrame {
            kind: LoopKind::For,
            exit: exit_b,
            cont: incr,
            parent: ctx.loops,
        };
        let inner = Ctx {
            loops: Some(&frame),
            ..ctx
        };
        let stmts: Vec<&Statement> = body.iter().collect();
        let end = self.build_list(&stmts, body_b, inner);
        if self.flows_on(end) {
            self.cfg.add_edge(end, incr, EdgeKind::Jump);
        }
        self.cfg.block_mut(incr).ops.push(BlockOp::ForStep { id, var });
        self.cfg.add_edge(incr, header, EdgeKind::Jump);
        exit_b
    }

    fn build_select(
        &mut self,
        selector: &'a Expr,
        arms: &'a [CaseArm],
        else_body: &'a [Statement],
        cur: BlockId,
        ctx: Ctx<'_>,
    ) -> BlockId {
        let id = self.cfg.select_count;
        self.cfg.select_count += 1;
        // the selector is evaluated exactly once, before any check
        self.cfg
            .block_mut(cur)
            .ops
            .push(BlockOp::EvalSelect { id, selector });

        let exit_b = self.cfg.new_block("select_exit");
        self.cfg
            .block_mut(exit_b)
            .ops
            .push(BlockOp::ReleaseSelect { id });

        if arms.is_empty() {
            // only CASE ELSE (or nothing): straight through
            let stmts: Vec<&Statement> = else_body.iter().collect();
            let end = self.build_list(&stmts, cur, ctx);
            if self.flows_on(end) {
                self.cfg.add_edge(end, exit_b, EdgeKind::Jump);
            }
            return exit_b;
        }

        let first_check = self.cfg.new_block("case_check");
        self.cfg.add_edge(cur, first_check, EdgeKind::Jump);
        let mut check = first_check;
        for (i, arm) in arms.iter().enumerate() {
            self.cfg.block_mut(check).term = Term::CaseTest {
                id,
                labels: &arm.labels,
            };
            let body_b = self.cfg.new_block("case_body");
            let next = if i + 1 < arms.len() {
                self.cfg.new_block("case_check")
            } else if !else_body.is_empty() {
                self.cfg.new_block("case_else")
            } else {
                exit_b
            };
            self.cfg.add_edge(check, body_b, EdgeKind::CondTrue);
            self.cfg.add_edge(check, next, EdgeKind::CondFalse);

            // every arm jumps to the exit; there is no fallthrough between
            // CASE bodies
            let stmts: Vec<&Statement> = arm.body.iter().collect();
            let end = self.build_list(&stmts, body_b, ctx);
            if self.flows_on(end) {
                self.cfg.add_edge(end, exit_b, EdgeKind::Jump);
            }
            check = next;
        }
        if !else_body.is_empty() {
            let stmts: Vec<&Statement> = else_body.iter().collect();
            let end = self.build_list(&stmts, check, ctx);
            if self.flows_on(end) {
                self.cfg.add_edge(end, exit_b, EdgeKind::Jump);
            }
        }
        exit_b
    }

    fn build_try(
        &mut self,
        body: &'a [Statement],
        catches: &'a [CatchArm],
        finally: &'a [Statement],
        cur: BlockId,
        ctx: Ctx<'_>,
    ) -> BlockId {
        let id = self.cfg.try_count;
        self.cfg.try_count += 1;

        // setjmp gets a block of its own so the call sits directly at the
        // block entry with nothing between it and the dispatching branch
        let setj = self.cfg.new_block("try_setjmp");
        self.cfg.add_edge(cur, setj, EdgeKind::Jump);
        self.cfg.block_mut(setj).term = Term::TrySetjmp { id };

        let body_b = self.cfg.new_block("try_body");
        let dispatch = self.cfg.new_block("catch_dispatch");
        self.cfg.add_edge(setj, body_b, EdgeKind::CondFalse);
        self.cfg.add_edge(setj, dispatch, EdgeKind::CondTrue);
        // the landed frame is spent; a rethrow must reach the next one out
        self.cfg.block_mut(dispatch).ops.push(BlockOp::TryPop);

        let fin_b = if finally.is_empty() {
            None
        } else {
            Some(self.cfg.new_block("finally"))
        };
        let exit_b = self.cfg.new_block("try_exit");
        let converge = fin_b.unwrap_or(exit_b);

        // the body runs under this handler
        let frame = TryFrame {
            dispatch,
            parent: ctx.tries,
        };
        let inner = Ctx {
            tries: Some(&frame),
            ..ctx
        };
        let stmts: Vec<&Statement> = body.iter().collect();
        let end = self.build_list(&stmts, body_b, inner);
        if self.flows_on(end) {
            self.cfg.block_mut(end).ops.push(BlockOp::TryPop);
            self.cfg.add_edge(end, converge, EdgeKind::Jump);
        }

        // catch arms run with the frame already popped: outer ctx
        let mut check = dispatch;
        let mut caught_all = false;
        for (i, arm) in catches.iter().enumerate() {
            let body_c = self.cfg.new_block("catch_body");
            self.cfg.add_edge(setj, body_c, EdgeKind::Exception);
            let code = arm
                .code
                .as_ref()
                .and_then(|e| const_eval(self.symbols, e));
            match code {
                None => {
                    // catch-all arm; later arms are dead
                    self.cfg.add_edge(check, body_c, EdgeKind::Jump);
                    caught_all = true;
                }
                Some(ConstValue::Int(v)) => {
                    self.cfg.block_mut(check).term = Term::CatchTest { code: v };
                    let next = if i + 1 < catches.len() {
                        self.cfg.new_block("catch_check")
                    } else {
                        self.cfg.new_block("rethrow")
                    };
                    self.cfg.add_edge(check, body_c, EdgeKind::CondTrue);
                    self.cfg.add_edge(check, next, EdgeKind::CondFalse);
                    check = next;
                }
                Some(_) => {
                    // semantic analysis already rejected non-integer codes
                    self.cfg.add_edge(check, body_c, EdgeKind::Jump);
                    caught_all = true;
                }
            }
            let stmts: Vec<&Statement> = arm.body.iter().collect();
            let endc = self.build_list(&stmts, body_c, ctx);
            if self.flows_on(endc) {
                self.cfg.add_edge(endc, converge, EdgeKind::Jump);
            }
            if caught_all {
                break;
            }
        }
        if !caught_all {
            // unmatched error continues outward past this TRY
            self.cfg.block_mut(check).term = Term::Rethrow;
            self.cfg.block_mut(check).flags |= BlockFlags::TERMINATED;
            if let Some(t) = ctx.tries {
                self.cfg.add_edge(check, t.dispatch, EdgeKind::Exception);
            }
        }

        if let Some(fin) = fin_b {
            let stmts: Vec<&Statement> = finally.iter().collect();
            let endf = self.build_list(&stmts, fin, ctx);
            if self.flows_on(endf) {
                self.cfg.add_edge(endf, exit_b, EdgeKind::Jump);
            }
        }
        exit_b
    }

    fn build_gosub(&mut self, target: &JumpTarget, cur: BlockId, loc: &SourceLocation) -> BlockId {
        let site = (self.cfg.gosub_sites.len() + 1) as u32;
        self.cfg.block_mut(cur).term = Term::GosubCall { site };
        self.jump_edge(cur, target, EdgeKind::Call, loc);
        let retp = self.cfg.new_block("gosub_ret");
        self.cfg.add_edge(cur, retp, EdgeKind::Fallthrough);
        self.cfg.gosub_sites.push(GosubSite {
            id: site,
            return_block: retp,
        });
        retp
    }

    fn build_on(
        &mut self,
        selector: &'a Expr,
        targets: &[JumpTarget],
        gosub: bool,
        cur: BlockId,
        loc: &SourceLocation,
    ) -> BlockId {
        let gosub_site = if gosub {
            Some((self.cfg.gosub_sites.len() + 1) as u32)
        } else {
            None
        };
        self.cfg.block_mut(cur).term = Term::Switch {
            selector,
            gosub_site,
        };
        for (i, t) in targets.iter().enumerate() {
            let kind = EdgeKind::Case((i + 1) as u32);
            self.jump_edge(cur, t, kind, loc);
        }
        // zero, negative, and past-the-end selectors fall through
        let cont = self.cfg.new_block(if gosub { "on_gosub_ret" } else { "on_cont" });
        self.cfg.add_edge(cur, cont, EdgeKind::Default);
        if let Some(site) = gosub_site {
            // one shared return point for every arm of the dispatch
            self.cfg.gosub_sites.push(GosubSite {
                id: site,
                return_block: cont,
            });
        }
        cont
    }

    fn build_return(&mut self, value: Option<&'a Expr>, cur: BlockId) -> BlockId {
        match value {
            Some(expr) if self.cfg.return_type.is_some() => {
                self.cfg.block_mut(cur).term = Term::Return(Some(expr));
                self.cfg.add_edge(cur, self.cfg.exit, EdgeKind::Jump);
            }
            _ => {
                // subroutine return via the runtime id stack; the post-pass
                // downgrades this to a procedure return when no GOSUB ever
                // targets this graph
                self.cfg.block_mut(cur).term = Term::GosubReturn;
            }
        }
        self.terminate(cur, "after_return")
    }

    fn build_exit(
        &mut self,
        kind: ExitKind,
        cur: BlockId,
        ctx: Ctx<'_>,
        loc: &SourceLocation,
    ) -> BlockId {
        let target = match kind {
            ExitKind::For => ctx.nearest_loop(LoopKind::For).map(|f| f.exit),
            ExitKind::While => ctx.nearest_loop(LoopKind::While).map(|f| f.exit),
            ExitKind::Do => ctx.nearest_loop(LoopKind::Do).map(|f| f.exit),
            ExitKind::Sub | ExitKind::Function => Some(self.cfg.exit),
        };
        match target {
            Some(t) => self.cfg.add_edge(cur, t, EdgeKind::Jump),
            None => self.diags.error(
                DiagnosticKind::UnresolvedJumpTarget,
                loc.clone(),
                format!("EXIT {} has no enclosing loop", loop_word(kind)),
            ),
        }
        self.terminate(cur, "after_exit")
    }

    fn build_continue(
        &mut self,
        kind: ExitKind,
        cur: BlockId,
        ctx: Ctx<'_>,
        loc: &SourceLocation,
    ) -> BlockId {
        let target = match kind {
            ExitKind::For => ctx.nearest_loop(LoopKind::For).map(|f| f.cont),
            ExitKind::While => ctx.nearest_loop(LoopKind::While).map(|f| f.cont),
            ExitKind::Do => ctx.nearest_loop(LoopKind::Do).map(|f| f.cont),
            _ => None,
        };
        match target {
            Some(t) => self.cfg.add_edge(cur, t, EdgeKind::Jump),
            None => self.diags.error(
                DiagnosticKind::UnresolvedJumpTarget,
                loc.clone(),
                format!("CONTINUE {} has no enclosing loop", loop_word(kind)),
            ),
        }
        self.terminate(cur, "after_continue")
    }

    // ---- post-passes ----

    fn resolve_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for d in deferred {
            let resolved = match &d.target {
                JumpTarget::Line(n) => self.cfg.line_blocks.get(n).copied(),
                JumpTarget::Label(l) => self.cfg.label_blocks.get(l).copied(),
            };
            match resolved {
                Some(to) => self.cfg.add_edge(d.from, to, d.kind),
                None => self.diags.error(
                    DiagnosticKind::UnresolvedJumpTarget,
                    d.loc,
                    format!("jump target {} not found", d.target),
                ),
            }
        }
    }

    /// Wire every RETURN-via-stack block to every recorded return point,
    /// or downgrade it to a plain procedure return when this graph has no
    /// GOSUB sites at all.
    fn finish_gosub_returns(&mut self) {
        let sites = self.cfg.gosub_sites.clone();
        let return_blocks: Vec<BlockId> = self
            .cfg
            .blocks
            .iter()
            .filter(|b| matches!(b.term, Term::GosubReturn))
            .map(|b| b.id)
            .collect();
        for id in return_blocks {
            if sites.is_empty() && self.is_procedure {
                self.cfg.block_mut(id).term = Term::Return(None);
                self.cfg.add_edge(id, self.cfg.exit, EdgeKind::Jump);
            } else {
                for site in &sites {
                    self.cfg.add_edge(id, site.return_block, EdgeKind::Return);
                }
            }
        }
    }

    fn mark_unreachable(&mut self) {
        let ids: Vec<BlockId> = self
            .cfg
            .blocks
            .iter()
            .filter(|b| b.preds.is_empty() && !b.flags.contains(BlockFlags::ENTRY))
            .map(|b| b.id)
            .collect();
        for id in ids {
            self.cfg.block_mut(id).flags |= BlockFlags::UNREACHABLE;
        }
    }
}

fn loop_word(kind: ExitKind) -> &'static str {
    match kind {
        ExitKind::For => "FOR",
        ExitKind::While => "WHILE",
        ExitKind::Do => "DO",
        ExitKind::Sub => "SUB",
        ExitKind::Function => "FUNCTION",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Term;
    use std::path::PathBuf;

    fn loc() -> SourceLocation {
        SourceLocation::new(PathBuf::from("t.bas"), 1, 1)
    }

    fn stmt(kind: StatementKind) -> Statement {
        Statement::new(kind, loc())
    }

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, loc())
    }

    fn int(v: i64) -> Expr {
        expr(ExprKind::IntLiteral(v))
    }

    fn print1() -> Statement {
        stmt(StatementKind::Print { items: vec![] })
    }

    fn build(statements: Vec<Statement>) -> ProgramCfg<'static> {
        let program = Box::leak(Box::new(Program { statements }));
        let symbols = Box::leak(Box::new(SymbolTable::new()));
        build_program(program, symbols).expect("cfg builds")
    }

    fn edge_kinds(cfg: &Cfg<'_>, from: BlockId) -> Vec<EdgeKind> {
        cfg.succ_edges(from).map(|e| e.kind).collect()
    }

    #[test]
    fn test_straight_line_falls_into_exit() {
        let p = build(vec![print1(), print1()]);
        let entry = p.main.entry;
        assert_eq!(p.main.block(entry).stmts.len(), 2);
        assert_eq!(p.main.succ_of(entry, EdgeKind::Jump), Some(p.main.exit));
    }

    #[test]
    fn test_if_emits_two_conditional_edges() {
        let p = build(vec![stmt(StatementKind::If {
            arms: vec![IfArm {
                cond: int(1),
                body: vec![print1()],
            }],
            else_body: vec![print1()],
        })]);
        let entry = p.main.entry;
        let kinds = edge_kinds(&p.main, entry);
        assert!(kinds.contains(&EdgeKind::CondTrue));
        assert!(kinds.contains(&EdgeKind::CondFalse));
        assert!(matches!(p.main.block(entry).term, Term::Branch(_)));
        // both branches converge on a single merge block
        let t = p.main.succ_of(entry, EdgeKind::CondTrue).unwrap();
        let f = p.main.succ_of(entry, EdgeKind::CondFalse).unwrap();
        assert_eq!(
            p.main.succ_of(t, EdgeKind::Jump),
            p.main.succ_of(f, EdgeKind::Jump)
        );
    }

    #[test]
    fn test_terminated_then_branch_skips_merge_edge() {
        // IF 1 THEN END ELSE END - both arms terminated, merge unreachable
        let p = build(vec![stmt(StatementKind::If {
            arms: vec![IfArm {
                cond: int(1),
                body: vec![stmt(StatementKind::End)],
            }],
            else_body: vec![stmt(StatementKind::End)],
        })]);
        let merge = p
            .main
            .blocks
            .iter()
            .find(|b| b.name.starts_with("if_merge"))
            .unwrap();
        assert!(merge.preds.is_empty());
        assert!(merge.flags.contains(BlockFlags::UNREACHABLE));
    }

    #[test]
    fn test_while_until_edge_polarity() {
        let p = build(vec![
            stmt(StatementKind::While {
                cond: int(1),
                body: vec![print1()],
            }),
            stmt(StatementKind::DoLoop {
                test: LoopTest::PreUntil(int(0)),
                body: vec![print1()],
            }),
        ]);
        let headers: Vec<_> = p
            .main
            .blocks
            .iter()
            .filter(|b| b.flags.contains(BlockFlags::LOOP_HEADER))
            .collect();
        assert_eq!(headers.len(), 2);
        // WHILE: true edge enters the body (a loop_body block)
        let w_true = p.main.succ_of(headers[0].id, EdgeKind::CondTrue).unwrap();
        assert!(p.main.block(w_true).name.starts_with("loop_body"));
        // UNTIL: true edge leaves via the exit; the raw condition is kept
        let u_true = p.main.succ_of(headers[1].id, EdgeKind::CondTrue).unwrap();
        assert!(p.main.block(u_true).flags.contains(BlockFlags::LOOP_EXIT));
    }

    #[test]
    fn test_for_loop_shape() {
        let p = build(vec![stmt(StatementKind::For {
            var: "I".to_string(),
            from: int(1),
            to: int(3),
            step: None,
            body: vec![print1()],
        })]);
        assert_eq!(p.main.for_count, 1);
        let header = p
            .main
            .blocks
            .iter()
            .find(|b| matches!(b.term, Term::ForTest { .. }))
            .unwrap();
        // body edge leads (through the increment block) back to the header
        let body = p.main.succ_of(header.id, EdgeKind::CondTrue).unwrap();
        let incr = p.main.succ_of(body, EdgeKind::Jump).unwrap();
        assert_eq!(p.main.succ_of(incr, EdgeKind::Jump), Some(header.id));
        assert!(matches!(
            p.main.block(p.main.entry).ops[..],
            [BlockOp::ForInit { .. }]
        ));
    }

    #[test]
    fn test_goto_forward_reference_resolves() {
        let mut target = print1();
        target.line_number = Some(100);
        let p = build(vec![
            stmt(StatementKind::Goto(JumpTarget::Line(100))),
            print1(), // unreachable
            target,
        ]);
        let entry = p.main.entry;
        let jump_to = p.main.succ_of(entry, EdgeKind::Jump).unwrap();
        assert_eq!(p.main.line_blocks.get(&100), Some(&jump_to));
        assert!(p.main.block(entry).is_terminated());
        // the statement after GOTO landed in a fresh unreachable block
        let orphan = p
            .main
            .blocks
            .iter()
            .find(|b| b.name.starts_with("after_goto"))
            .unwrap();
        assert!(orphan.flags.contains(BlockFlags::UNREACHABLE));
    }

    #[test]
    fn test_unresolved_goto_is_a_diagnostic() {
        let program = Box::leak(Box::new(Program {
            statements: vec![stmt(StatementKind::Goto(JumpTarget::Label(
                "nowhere".to_string(),
            )))],
        }));
        let symbols = Box::leak(Box::new(SymbolTable::new()));
        let err = build_program(program, symbols).unwrap_err();
        assert!(err.to_string().contains("label nowhere not found"));
    }

    #[test]
    fn test_gosub_records_site_and_return_edges() {
        let mut target = print1();
        target.line_number = Some(100);
        let p = build(vec![
            stmt(StatementKind::Gosub(JumpTarget::Line(100))),
            stmt(StatementKind::End),
            target,
            stmt(StatementKind::Return(None)),
        ]);
        assert_eq!(p.main.gosub_sites.len(), 1);
        let site = p.main.gosub_sites[0];
        assert_eq!(site.id, 1);
        // the call block carries a Call edge and a Fallthrough to the
        // return point
        let entry = p.main.entry;
        assert!(matches!(
            p.main.block(entry).term,
            Term::GosubCall { site: 1 }
        ));
        assert!(p.main.succ_of(entry, EdgeKind::Call).is_some());
        assert_eq!(
            p.main.succ_of(entry, EdgeKind::Fallthrough),
            Some(site.return_block)
        );
        // RETURN dispatches back to the recorded return point
        let ret_block = p
            .main
            .blocks
            .iter()
            .find(|b| matches!(b.term, Term::GosubReturn))
            .unwrap();
        assert_eq!(
            p.main.succ_of(ret_block.id, EdgeKind::Return),
            Some(site.return_block)
        );
    }

    #[test]
    fn test_on_goto_cases_plus_default() {
        let mut t1 = print1();
        t1.line_number = Some(10);
        let mut t2 = print1();
        t2.line_number = Some(20);
        let p = build(vec![
            stmt(StatementKind::OnGoto {
                selector: int(1),
                targets: vec![JumpTarget::Line(10), JumpTarget::Line(20)],
            }),
            t1,
            t2,
        ]);
        let entry = p.main.entry;
        let kinds = edge_kinds(&p.main, entry);
        assert!(kinds.contains(&EdgeKind::Case(1)));
        assert!(kinds.contains(&EdgeKind::Case(2)));
        assert!(kinds.contains(&EdgeKind::Default));
    }

    #[test]
    fn test_select_arms_jump_to_shared_exit() {
        let p = build(vec![stmt(StatementKind::Select {
            selector: int(2),
            arms: vec![
                CaseArm {
                    labels: vec![CaseLabel::Value(int(1))],
                    body: vec![print1()],
                },
                CaseArm {
                    labels: vec![CaseLabel::Value(int(2))],
                    body: vec![print1()],
                },
            ],
            else_body: vec![],
        })]);
        let exit = p
            .main
            .blocks
            .iter()
            .find(|b| b.name.starts_with("select_exit"))
            .unwrap();
        // both case bodies and the final CondFalse land here
        assert!(exit.preds.len() >= 3);
        let checks = p
            .main
            .blocks
            .iter()
            .filter(|b| matches!(b.term, Term::CaseTest { .. }))
            .count();
        assert_eq!(checks, 2);
    }

    #[test]
    fn test_exit_for_targets_nearest_for() {
        // FOR ... DO ... EXIT FOR ... LOOP ... NEXT
        let p = build(vec![stmt(StatementKind::For {
            var: "I".to_string(),
            from: int(1),
            to: int(3),
            step: None,
            body: vec![stmt(StatementKind::DoLoop {
                test: LoopTest::PreWhile(int(1)),
                body: vec![stmt(StatementKind::Exit(ExitKind::For))],
            })],
        })]);
        let for_exit = p
            .main
            .blocks
            .iter()
            .find(|b| b.name.starts_with("for_exit"))
            .unwrap();
        // reachable from the FOR header and from the EXIT FOR jump
        assert!(for_exit.preds.len() >= 2);
    }

    #[test]
    fn test_exit_while_without_loop_is_an_error() {
        let program = Box::leak(Box::new(Program {
            statements: vec![stmt(StatementKind::Exit(ExitKind::While))],
        }));
        let symbols = Box::leak(Box::new(SymbolTable::new()));
        let err = build_program(program, symbols).unwrap_err();
        assert!(err.to_string().contains("EXIT WHILE"));
    }

    #[test]
    fn test_try_structure() {
        let p = build(vec![stmt(StatementKind::Try {
            body: vec![stmt(StatementKind::Throw(int(7)))],
            catches: vec![CatchArm {
                code: Some(int(7)),
                body: vec![print1()],
            }],
            finally: vec![print1()],
        })]);
        assert_eq!(p.main.try_count, 1);
        let setj = p
            .main
            .blocks
            .iter()
            .find(|b| matches!(b.term, Term::TrySetjmp { .. }))
            .unwrap();
        // zero -> body, nonzero -> dispatch, plus the exception edge to
        // the catch body
        let kinds = edge_kinds(&p.main, setj.id);
        assert!(kinds.contains(&EdgeKind::CondTrue));
        assert!(kinds.contains(&EdgeKind::CondFalse));
        assert!(kinds.contains(&EdgeKind::Exception));
        // THROW carries an exception edge to the dispatch block
        let throw = p
            .main
            .blocks
            .iter()
            .find(|b| matches!(b.term, Term::Throw(_)))
            .unwrap();
        let dispatch = p.main.succ_of(setj.id, EdgeKind::CondTrue).unwrap();
        assert_eq!(
            p.main.succ_of(throw.id, EdgeKind::Exception),
            Some(dispatch)
        );
        // a rethrow block exists for the unmatched path
        assert!(p
            .main
            .blocks
            .iter()
            .any(|b| matches!(b.term, Term::Rethrow)));
    }

    #[test]
    fn test_procedure_bare_return_without_gosub_is_proc_return() {
        let p = build(vec![stmt(StatementKind::Sub(ProcDef {
            name: "S".to_string(),
            params: vec![],
            return_type: None,
            body: vec![stmt(StatementKind::Return(None))],
        }))]);
        let s = p.function("S").unwrap();
        let ret = s
            .blocks
            .iter()
            .find(|b| matches!(b.term, Term::Return(None)))
            .expect("bare RETURN downgraded to a procedure return");
        assert_eq!(s.succ_of(ret.id, EdgeKind::Jump), Some(s.exit));
    }
}
