//! Program assembly and CFG-driven emission
//!
//! Each function walks its CFG in block order and emits every block it
//! finds there - reachability is the edge graph's business, so blocks only
//! reachable through GOSUB dispatch or CATCH still appear. Block bodies go
//! through the statement emitter; terminators are derived from the
//! outgoing edges and the block's `Term` payload, and from nowhere else.

use super::expressions::global_array_label;
use super::runtime;
use super::state::{mangle, Slot, SlotKind, Value};
use super::types::zero_for;
use super::{CodeGen, CodeGenError};
use crate::ast::{CaseLabel, Expr};
use crate::cfg::{BasicBlock, BlockFlags, BlockId, BlockOp, Cfg, EdgeKind, ProgramCfg, Term};
use crate::data::DataValue;
use crate::symbols::Scope;
use crate::types::{promote_types, TypeDescriptor};
use std::fmt::Write as _;
use tracing::debug;

/// Lower a whole program CFG to one QBE IL translation unit.
pub fn emit_program(
    pcfg: &ProgramCfg<'_>,
    symbols: &crate::symbols::SymbolTable,
    data: &crate::data::DataValues,
) -> Result<String, CodeGenError> {
    let mut cg = CodeGen::new(symbols, data);
    cg.emit_record_types()?;
    cg.emit_static_data()?;
    debug!("emitting main");
    cg.emit_function(&pcfg.main, true)?;
    for f in &pcfg.functions {
        debug!(name = %f.name, "emitting procedure");
        cg.emit_function(f, false)?;
    }
    let mut out = String::with_capacity(
        cg.type_section.len() + cg.data_section.len() + cg.string_pool.len() + cg.output.len(),
    );
    out.push_str(&cg.type_section);
    out.push_str(&cg.data_section);
    out.push_str(&cg.string_pool);
    out.push_str(&cg.output);
    Ok(out)
}

impl<'a> CodeGen<'a> {
    // ---- module-level sections ----

    fn emit_record_types(&mut self) -> Result<(), CodeGenError> {
        let mut records: Vec<_> = self.symbols.records().collect();
        records.sort_by_key(|r| r.id);
        for rec in records {
            writeln!(
                self.type_section,
                "type :{} = align 8 {{ {} }}",
                mangle(&rec.name),
                rec.size.max(8)
            )?;
        }
        Ok(())
    }

    fn emit_static_data(&mut self) -> Result<(), CodeGenError> {
        writeln!(
            self.data_section,
            "export data ${} = align 4 {{ w 0 }}",
            runtime::ERR_CODE
        )?;
        writeln!(
            self.data_section,
            "export data ${} = align 4 {{ z {} }}",
            runtime::GOSUB_STACK,
            4 * runtime::GOSUB_STACK_DEPTH
        )?;
        writeln!(
            self.data_section,
            "export data ${} = align 4 {{ w 0 }}",
            runtime::GOSUB_SP
        )?;
        writeln!(
            self.data_section,
            "export data ${} = align 8 {{ z {} }}",
            runtime::TRY_STACK,
            8 * runtime::TRY_STACK_DEPTH
        )?;
        writeln!(
            self.data_section,
            "export data ${} = align 4 {{ w 0 }}",
            runtime::TRY_SP
        )?;

        // DATA segment: values widened to 64 bits, with a parallel tag array
        writeln!(
            self.data_section,
            "export data ${} = align 8 {{ l {} }}",
            runtime::DATA_COUNT,
            self.data.len()
        )?;
        let mut values = String::new();
        let mut tags = String::new();
        for (i, v) in self.data.values.clone().iter().enumerate() {
            if i > 0 {
                values.push_str(", ");
                tags.push_str(", ");
            }
            match v {
                DataValue::Int(n) => {
                    let _ = write!(values, "l {}", n);
                }
                DataValue::Double(d) => {
                    let _ = write!(values, "d d_{:?}", d);
                }
                DataValue::Str(s) => {
                    let label = self.string_global(s);
                    let _ = write!(values, "l {}", label);
                }
            }
            let _ = write!(tags, "b {}", v.type_tag());
        }
        if self.data.is_empty() {
            values.push_str("l 0");
            tags.push_str("b 0");
        }
        writeln!(
            self.data_section,
            "export data ${} = align 8 {{ {} }}",
            runtime::DATA_VALUES,
            values
        )?;
        writeln!(
            self.data_section,
            "export data ${} = {{ {} }}",
            runtime::DATA_TYPES,
            tags
        )?;

        // one pointer slot per GLOBAL array; array_new fills it in $main
        let mut globals: Vec<_> = self.symbols.global_arrays().collect();
        globals.sort_by(|a, b| a.name.cmp(&b.name));
        for ga in globals {
            writeln!(
                self.data_section,
                "data ${} = align 8 {{ l 0 }}",
                global_array_label(&ga.name)
            )?;
        }
        Ok(())
    }

    // ---- functions ----

    fn emit_function(&mut self, cfg: &Cfg<'a>, is_main: bool) -> Result<(), CodeGenError> {
        let scope = if is_main {
            Scope::global()
        } else {
            Scope::function(&cfg.name)
        };
        self.reset_function(scope);

        let params: Vec<String> = cfg
            .params
            .iter()
            .map(|p| {
                let class = if p.byref && p.ty.is_record() {
                    "l"
                } else {
                    p.ty.qbe_scalar()
                };
                format!("{} %p_{}", class, mangle(&p.name))
            })
            .collect();
        let header = if is_main {
            "export function w $main() {".to_string()
        } else {
            match &cfg.return_type {
                Some(ret) => format!(
                    "export function {} ${}({}) {{",
                    ret.qbe_scalar(),
                    mangle(&cfg.name),
                    params.join(", ")
                ),
                None => format!(
                    "export function ${}({}) {{",
                    mangle(&cfg.name),
                    params.join(", ")
                ),
            }
        };
        writeln!(self.output, "{}", header)?;

        // the entry block's label comes first; the prologue lives under it
        writeln!(self.output, "@{}", cfg.block(cfg.entry).name)?;
        self.emit_prologue(cfg, is_main)?;

        // exit last, everything else in id order
        let order: Vec<BlockId> = cfg
            .blocks
            .iter()
            .map(|b| b.id)
            .filter(|&id| id != cfg.exit)
            .chain(std::iter::once(cfg.exit))
            .collect();
        for id in order {
            let block = cfg.block(id);
            if id != cfg.entry {
                writeln!(self.output, "@{}", block.name)?;
            }
            for stmt in &block.stmts {
                self.emit_stmt(stmt)?;
            }
            for op in &block.ops {
                self.emit_block_op(op)?;
            }
            self.emit_terminator(cfg, block, is_main)?;
        }
        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        Ok(())
    }

    fn emit_prologue(&mut self, cfg: &Cfg<'a>, is_main: bool) -> Result<(), CodeGenError> {
        if is_main {
            writeln!(self.output, "\tcall ${}()", runtime::RUNTIME_INIT)?;
            writeln!(
                self.output,
                "\tcall ${}(l {})",
                runtime::GLOBAL_INIT,
                self.symbols.global_slot_count()
            )?;
        }

        // parameters get slots like any local so name lookup stays uniform
        let mut param_names = Vec::new();
        for p in cfg.params.clone() {
            let temp = format!("%v_{}", mangle(&p.name));
            writeln!(self.output, "\t{} =l alloc8 8", temp)?;
            let store = if p.byref && p.ty.is_record() {
                "storel"
            } else {
                p.ty.qbe_store()
            };
            writeln!(self.output, "\t{} %p_{}, {}", store, mangle(&p.name), temp)?;
            self.slots.insert(
                p.name.clone(),
                Slot {
                    temp,
                    ty: p.ty.clone(),
                    kind: SlotKind::Indirect,
                },
            );
            param_names.push(p.name.clone());
        }

        // locals: every variable declared in this scope, zero-initialized
        let mut vars: Vec<_> = self
            .symbols
            .variables_in(&self.scope)
            .filter(|v| v.global_slot.is_none() && !param_names.contains(&v.name))
            .cloned()
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        for var in vars {
            let temp = format!("%v_{}", mangle(&var.name));
            if var.ty.is_record() {
                let size = self
                    .symbols
                    .record_by_id(var.ty.record_id)
                    .map(|r| r.size.max(8))
                    .unwrap_or(8);
                writeln!(self.output, "\t{} =l alloc8 {}", temp, size)?;
                self.zero_memory(&temp, size)?;
                self.slots.insert(
                    var.name.clone(),
                    Slot {
                        temp,
                        ty: var.ty.clone(),
                        kind: SlotKind::Direct,
                    },
                );
            } else {
                writeln!(self.output, "\t{} =l alloc8 8", temp)?;
                writeln!(
                    self.output,
                    "\t{} {}, {}",
                    var.ty.qbe_store(),
                    zero_for(&var.ty),
                    temp
                )?;
                // the return slot's reference is handed to the caller;
                // tidy_exit must not release it
                let is_return_slot = !is_main && var.name == cfg.name;
                if var.ty.is_string() && !is_return_slot {
                    self.local_strings.push(temp.clone());
                }
                self.slots.insert(
                    var.name.clone(),
                    Slot {
                        temp,
                        ty: var.ty.clone(),
                        kind: SlotKind::Indirect,
                    },
                );
            }
        }

        // local array descriptor slots
        let mut arrays: Vec<_> = self
            .symbols
            .arrays_in(&self.scope)
            .filter(|a| !a.global)
            .cloned()
            .collect();
        arrays.sort_by(|a, b| a.name.cmp(&b.name));
        for arr in arrays {
            let temp = format!("%v_{}", mangle(&arr.name));
            writeln!(self.output, "\t{} =l alloc8 8", temp)?;
            writeln!(self.output, "\tstorel 0, {}", temp)?;
            self.local_arrays.push(temp.clone());
            self.slots.insert(
                arr.name.clone(),
                Slot {
                    temp,
                    ty: TypeDescriptor::array_of(arr.element.clone(), arr.rank),
                    kind: SlotKind::Indirect,
                },
            );
        }

        // record-typed GLOBALs live in main's frame, which outlives every
        // procedure activation; their pointer goes into the global vector
        if is_main {
            let mut grecs: Vec<_> = self
                .symbols
                .variables_in(&Scope::global())
                .filter(|v| v.global_slot.is_some() && v.ty.is_record())
                .cloned()
                .collect();
            grecs.sort_by_key(|v| v.global_slot);
            for var in grecs {
                let size = self
                    .symbols
                    .record_by_id(var.ty.record_id)
                    .map(|r| r.size.max(8))
                    .unwrap_or(8);
                let storage = self.fresh_temp();
                writeln!(self.output, "\t{} =l alloc8 {}", storage, size)?;
                self.zero_memory(&storage, size)?;
                let addr = self.emit_global_addr(var.global_slot.unwrap())?;
                writeln!(self.output, "\tstorel {}, {}", storage, addr)?;
            }
        }

        // hidden slots for loops, selects, and handler frames
        for id in 0..cfg.for_count {
            writeln!(self.output, "\t%for_lim_{} =l alloc8 8", id)?;
            writeln!(self.output, "\t%for_stp_{} =l alloc8 8", id)?;
        }
        for id in 0..cfg.select_count {
            writeln!(self.output, "\t%sel_{} =l alloc8 8", id)?;
            writeln!(self.output, "\tstorel 0, %sel_{}", id)?;
        }
        for id in 0..cfg.try_count {
            writeln!(
                self.output,
                "\t%try_buf_{} =l alloc8 {}",
                id,
                runtime::JMP_BUF_SIZE
            )?;
        }
        Ok(())
    }

    fn zero_memory(&mut self, base: &str, size: u64) -> Result<(), CodeGenError> {
        let mut off = 0;
        while off < size {
            if off == 0 {
                writeln!(self.output, "\tstorel 0, {}", base)?;
            } else {
                let addr = self.fresh_temp();
                writeln!(self.output, "\t{} =l add {}, {}", addr, base, off)?;
                writeln!(self.output, "\tstorel 0, {}", addr)?;
            }
            off += 8;
        }
        Ok(())
    }

    // ---- block ops ----

    fn emit_block_op(&mut self, op: &BlockOp<'a>) -> Result<(), CodeGenError> {
        match op {
            BlockOp::EvalSelect { id, selector } => {
                let ty = self.infer(selector)?;
                let slot = format!("%sel_{}", id);
                if ty.is_string() {
                    let v = self.emit_expr(selector)?;
                    self.take_string_ownership(&v)?;
                    let old = self.fresh_temp();
                    writeln!(self.output, "\t{} =l loadl {}", old, slot)?;
                    writeln!(
                        self.output,
                        "\tcall ${}(l {})",
                        runtime::STRING_RELEASE,
                        old
                    )?;
                    writeln!(self.output, "\tstorel {}, {}", v.temp, slot)?;
                } else {
                    let v = self.emit_expr(selector)?;
                    writeln!(self.output, "\t{} {}, {}", v.ty.qbe_store(), v.temp, slot)?;
                }
                self.select_types.insert(*id, ty);
                self.flush_stmt_strings()?;
            }
            BlockOp::ForInit {
                id,
                var,
                from,
                to,
                step,
            } => {
                let v = self.emit_expr(from)?;
                let lv = self.var_lvalue(var)?;
                self.store_value(&lv, v)?;
                let limit = self.emit_expr_cast(to, &TypeDescriptor::long())?;
                writeln!(self.output, "\tstorel {}, %for_lim_{}", limit.temp, id)?;
                let step_v = match step {
                    Some(e) => self.emit_expr_cast(e, &TypeDescriptor::long())?,
                    None => Value::borrowed("1".to_string(), TypeDescriptor::long()),
                };
                // STEP 0 is a runtime error; the runtime aborts with a
                // diagnostic before the loop can spin
                writeln!(
                    self.output,
                    "\tcall ${}(l {})",
                    runtime::FOR_CHECK_STEP,
                    step_v.temp
                )?;
                writeln!(self.output, "\tstorel {}, %for_stp_{}", step_v.temp, id)?;
                self.flush_stmt_strings()?;
            }
            BlockOp::ForStep { id, var } => {
                let lv = self.var_lvalue(var)?;
                let cur = self.load_from(&lv)?;
                let cur_l = self.emit_cast(cur, &TypeDescriptor::long())?;
                let stp = self.fresh_temp();
                writeln!(self.output, "\t{} =l loadl %for_stp_{}", stp, id)?;
                let next = self.fresh_temp();
                writeln!(self.output, "\t{} =l add {}, {}", next, cur_l.temp, stp)?;
                self.store_value(
                    &lv,
                    Value::borrowed(next, TypeDescriptor::long()),
                )?;
            }
            BlockOp::TryPop => {
                let sp = self.fresh_temp();
                writeln!(self.output, "\t{} =w loadw ${}", sp, runtime::TRY_SP)?;
                let sp1 = self.fresh_temp();
                writeln!(self.output, "\t{} =w sub {}, 1", sp1, sp)?;
                writeln!(self.output, "\tstorew {}, ${}", sp1, runtime::TRY_SP)?;
            }
            BlockOp::ReleaseSelect { id } => {
                if self
                    .select_types
                    .get(id)
                    .map(|t| t.is_string())
                    .unwrap_or(false)
                {
                    let slot = format!("%sel_{}", id);
                    let old = self.fresh_temp();
                    writeln!(self.output, "\t{} =l loadl {}", old, slot)?;
                    writeln!(
                        self.output,
                        "\tcall ${}(l {})",
                        runtime::STRING_RELEASE,
                        old
                    )?;
                    writeln!(self.output, "\tstorel 0, {}", slot)?;
                }
            }
        }
        Ok(())
    }

    // ---- terminators ----

    fn emit_terminator(
        &mut self,
        cfg: &Cfg<'a>,
        block: &BasicBlock<'a>,
        is_main: bool,
    ) -> Result<(), CodeGenError> {
        match block.term {
            Term::None => {
                if block.flags.contains(BlockFlags::EXIT) {
                    return self.emit_epilogue(cfg, is_main);
                }
                let target = cfg
                    .succ_edges(block.id)
                    .find(|e| matches!(e.kind, EdgeKind::Jump | EdgeKind::Fallthrough))
                    .map(|e| e.to);
                match target {
                    Some(to) => writeln!(self.output, "\tjmp @{}", cfg.block(to).name)?,
                    None => writeln!(self.output, "\thlt")?,
                }
            }
            Term::Branch(cond) => {
                let c = self.emit_cond(cond)?;
                self.flush_stmt_strings()?;
                self.emit_jnz(cfg, block.id, &c)?;
            }
            Term::ForTest { id, var } => {
                let lv = self.var_lvalue(var)?;
                let cur = self.load_from(&lv)?;
                let cur_l = self.emit_cast(cur, &TypeDescriptor::long())?;
                let lim = self.fresh_temp();
                writeln!(self.output, "\t{} =l loadl %for_lim_{}", lim, id)?;
                let stp = self.fresh_temp();
                writeln!(self.output, "\t{} =l loadl %for_stp_{}", stp, id)?;
                // upward loops test <=, downward loops test >=
                let nonneg = self.fresh_temp();
                writeln!(self.output, "\t{} =w csgel {}, 0", nonneg, stp)?;
                let le = self.fresh_temp();
                writeln!(self.output, "\t{} =w cslel {}, {}", le, cur_l.temp, lim)?;
                let ge = self.fresh_temp();
                writeln!(self.output, "\t{} =w csgel {}, {}", ge, cur_l.temp, lim)?;
                let up = self.fresh_temp();
                writeln!(self.output, "\t{} =w and {}, {}", up, nonneg, le)?;
                let neg = self.fresh_temp();
                writeln!(self.output, "\t{} =w xor {}, 1", neg, nonneg)?;
                let down = self.fresh_temp();
                writeln!(self.output, "\t{} =w and {}, {}", down, neg, ge)?;
                let cond = self.fresh_temp();
                writeln!(self.output, "\t{} =w or {}, {}", cond, up, down)?;
                self.emit_jnz(cfg, block.id, &cond)?;
            }
            Term::CaseTest { id, labels } => {
                let sel_ty = self
                    .select_types
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!("SELECT {} tested before its selector", id))
                    })?;
                let slot = format!("%sel_{}", id);
                let sel = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} ={} {} {}",
                    sel,
                    sel_ty.qbe_scalar(),
                    sel_ty.qbe_load(),
                    slot
                )?;
                let sel_v = Value::borrowed(sel, sel_ty);
                let mut acc: Option<String> = None;
                for label in labels {
                    let m = self.emit_case_label_match(&sel_v, label)?;
                    acc = Some(match acc {
                        None => m,
                        Some(prev) => {
                            let t = self.fresh_temp();
                            writeln!(self.output, "\t{} =w or {}, {}", t, prev, m)?;
                            t
                        }
                    });
                }
                let cond = acc.unwrap_or_else(|| "0".to_string());
                self.flush_stmt_strings()?;
                self.emit_jnz(cfg, block.id, &cond)?;
            }
            Term::Switch {
                selector,
                gosub_site,
            } => {
                // BASIC's 1-based dispatch over QBE's 0-based table; any
                // fractional selector truncates
                let sel = self.emit_expr_cast(selector, &TypeDescriptor::integer())?;
                self.flush_stmt_strings()?;
                let idx = self.fresh_temp();
                writeln!(self.output, "\t{} =w sub {}, 1", idx, sel.temp)?;
                let mut cases: Vec<(u32, BlockId)> = cfg
                    .succ_edges(block.id)
                    .filter_map(|e| match e.kind {
                        EdgeKind::Case(n) => Some((n, e.to)),
                        _ => None,
                    })
                    .collect();
                cases.sort_by_key(|(n, _)| *n);
                let default = cfg
                    .succ_of(block.id, EdgeKind::Default)
                    .ok_or_else(|| {
                        CodeGenError::Logic("computed dispatch without a default edge".into())
                    })?;
                let default_name = cfg.block(default).name.clone();
                match gosub_site {
                    None => {
                        let table: Vec<String> = cases
                            .iter()
                            .map(|(_, to)| format!("@{}", cfg.block(*to).name))
                            .collect();
                        writeln!(
                            self.output,
                            "\tjmp @{} [ {} {} ]",
                            default_name,
                            idx,
                            table.join(" ")
                        )?;
                    }
                    Some(site) => {
                        // trampolines push the shared return-site id, so an
                        // out-of-range selector never touches the stack
                        let tramps: Vec<String> = cases
                            .iter()
                            .map(|_| self.fresh_aux_label("on_push"))
                            .collect();
                        let table: Vec<String> =
                            tramps.iter().map(|t| format!("@{}", t)).collect();
                        writeln!(
                            self.output,
                            "\tjmp @{} [ {} {} ]",
                            default_name,
                            idx,
                            table.join(" ")
                        )?;
                        for (tramp, (_, to)) in tramps.iter().zip(cases.iter()) {
                            writeln!(self.output, "@{}", tramp)?;
                            self.emit_gosub_push(site)?;
                            writeln!(self.output, "\tjmp @{}", cfg.block(*to).name)?;
                        }
                    }
                }
            }
            Term::GosubCall { site } => {
                let target = cfg.succ_of(block.id, EdgeKind::Call).ok_or_else(|| {
                    CodeGenError::Logic("GOSUB block lost its call edge".into())
                })?;
                self.emit_gosub_push(site)?;
                writeln!(self.output, "\tjmp @{}", cfg.block(target).name)?;
            }
            Term::GosubReturn => {
                let returns: Vec<BlockId> = cfg
                    .succ_edges(block.id)
                    .filter(|e| e.kind == EdgeKind::Return)
                    .map(|e| e.to)
                    .collect();
                if returns.is_empty() {
                    // RETURN with no GOSUB anywhere in the procedure
                    writeln!(
                        self.output,
                        "\tcall ${}()",
                        runtime::ERROR_GOSUB_UNDERFLOW
                    )?;
                    writeln!(self.output, "\thlt")?;
                    return Ok(());
                }
                let sp = self.fresh_temp();
                writeln!(self.output, "\t{} =w loadw ${}", sp, runtime::GOSUB_SP)?;
                let under = self.fresh_aux_label("ret_under");
                let ok = self.fresh_aux_label("ret_ok");
                writeln!(self.output, "\tjnz {}, @{}, @{}", sp, ok, under)?;
                writeln!(self.output, "@{}", under)?;
                writeln!(
                    self.output,
                    "\tcall ${}()",
                    runtime::ERROR_GOSUB_UNDERFLOW
                )?;
                writeln!(self.output, "\thlt")?;
                writeln!(self.output, "@{}", ok)?;
                let sp1 = self.fresh_temp();
                writeln!(self.output, "\t{} =w sub {}, 1", sp1, sp)?;
                writeln!(self.output, "\tstorew {}, ${}", sp1, runtime::GOSUB_SP)?;
                let off = self.fresh_temp();
                writeln!(self.output, "\t{} =l extsw {}", off, sp1)?;
                let off4 = self.fresh_temp();
                writeln!(self.output, "\t{} =l mul {}, 4", off4, off)?;
                let addr = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l add ${}, {}",
                    addr,
                    runtime::GOSUB_STACK,
                    off4
                )?;
                let id = self.fresh_temp();
                writeln!(self.output, "\t{} =w loadw {}", id, addr)?;
                let idx = self.fresh_temp();
                writeln!(self.output, "\t{} =w sub {}, 1", idx, id)?;
                let bad = self.fresh_aux_label("ret_bad");
                let table: Vec<String> = returns
                    .iter()
                    .map(|&to| format!("@{}", cfg.block(to).name))
                    .collect();
                writeln!(
                    self.output,
                    "\tjmp @{} [ {} {} ]",
                    bad,
                    idx,
                    table.join(" ")
                )?;
                writeln!(self.output, "@{}", bad)?;
                writeln!(self.output, "\thlt")?;
            }
            Term::Return(value) => {
                if let Some(expr) = value {
                    let v = self.emit_expr(expr)?;
                    let lv = self.var_lvalue(&cfg.name)?;
                    self.store_value(&lv, v)?;
                    self.flush_stmt_strings()?;
                }
                let target = cfg.succ_of(block.id, EdgeKind::Jump).ok_or_else(|| {
                    CodeGenError::Logic("RETURN block lost its exit edge".into())
                })?;
                writeln!(self.output, "\tjmp @{}", cfg.block(target).name)?;
            }
            Term::Throw(code) => {
                let v = self.emit_expr_cast(code, &TypeDescriptor::integer())?;
                self.flush_stmt_strings()?;
                writeln!(self.output, "\tstorew {}, ${}", v.temp, runtime::ERR_CODE)?;
                self.emit_longjmp_top(&v.temp)?;
            }
            Term::Rethrow => {
                let code = self.fresh_temp();
                writeln!(self.output, "\t{} =w loadw ${}", code, runtime::ERR_CODE)?;
                self.emit_longjmp_top(&code)?;
            }
            Term::TrySetjmp { id } => {
                let buf = format!("%try_buf_{}", id);
                // push this frame before arming it
                let sp = self.fresh_temp();
                writeln!(self.output, "\t{} =w loadw ${}", sp, runtime::TRY_SP)?;
                let full = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =w csgew {}, {}",
                    full,
                    sp,
                    runtime::TRY_STACK_DEPTH
                )?;
                let ovf = self.fresh_aux_label("try_ovf");
                let ok = self.fresh_aux_label("try_ok");
                writeln!(self.output, "\tjnz {}, @{}, @{}", full, ovf, ok)?;
                writeln!(self.output, "@{}", ovf)?;
                writeln!(self.output, "\tcall ${}()", runtime::ERROR_TRY_OVERFLOW)?;
                writeln!(self.output, "\thlt")?;
                writeln!(self.output, "@{}", ok)?;
                let off = self.fresh_temp();
                writeln!(self.output, "\t{} =l extsw {}", off, sp)?;
                let off8 = self.fresh_temp();
                writeln!(self.output, "\t{} =l mul {}, 8", off8, off)?;
                let addr = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l add ${}, {}",
                    addr,
                    runtime::TRY_STACK,
                    off8
                )?;
                writeln!(self.output, "\tstorel {}, {}", buf, addr)?;
                let sp1 = self.fresh_temp();
                writeln!(self.output, "\t{} =w add {}, 1", sp1, sp)?;
                writeln!(self.output, "\tstorew {}, ${}", sp1, runtime::TRY_SP)?;
                // setjmp, then branch on its result with nothing in between:
                // longjmp restores the frame this call establishes
                let r = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =w call ${}(l {})",
                    r,
                    runtime::SETJMP,
                    buf
                )?;
                self.emit_jnz(cfg, block.id, &r)?;
            }
            Term::CatchTest { code } => {
                let err = self.fresh_temp();
                writeln!(self.output, "\t{} =w loadw ${}", err, runtime::ERR_CODE)?;
                let c = self.fresh_temp();
                writeln!(self.output, "\t{} =w ceqw {}, {}", c, err, code)?;
                self.emit_jnz(cfg, block.id, &c)?;
            }
            Term::Halt => writeln!(self.output, "\thlt")?,
        }
        Ok(())
    }

    fn emit_jnz(&mut self, cfg: &Cfg<'a>, block: BlockId, cond: &str) -> Result<(), CodeGenError> {
        let t = cfg.succ_of(block, EdgeKind::CondTrue).ok_or_else(|| {
            CodeGenError::Logic(format!("{} branch lost its true edge", cfg.block(block).name))
        })?;
        let f = cfg.succ_of(block, EdgeKind::CondFalse).ok_or_else(|| {
            CodeGenError::Logic(format!(
                "{} branch lost its false edge",
                cfg.block(block).name
            ))
        })?;
        writeln!(
            self.output,
            "\tjnz {}, @{}, @{}",
            cond,
            cfg.block(t).name,
            cfg.block(f).name
        )?;
        Ok(())
    }

    /// One label's worth of a CASE check: 0/1 in a `w` temp.
    fn emit_case_label_match(
        &mut self,
        sel: &Value,
        label: &CaseLabel,
    ) -> Result<String, CodeGenError> {
        use crate::ast::BinaryOp;
        match label {
            CaseLabel::Value(e) => self.emit_case_compare(sel, BinaryOp::Eq, e),
            CaseLabel::Is(op, e) => self.emit_case_compare(sel, *op, e),
            CaseLabel::Range(lo, hi) => {
                let a = self.emit_case_compare(sel, BinaryOp::Ge, lo)?;
                let b = self.emit_case_compare(sel, BinaryOp::Le, hi)?;
                let t = self.fresh_temp();
                writeln!(self.output, "\t{} =w and {}, {}", t, a, b)?;
                Ok(t)
            }
        }
    }

    fn emit_case_compare(
        &mut self,
        sel: &Value,
        op: crate::ast::BinaryOp,
        label: &Expr,
    ) -> Result<String, CodeGenError> {
        use super::types::cmp_op;
        if sel.ty.is_string() {
            let lv = self.emit_expr(label)?;
            let c = self.fresh_temp();
            writeln!(
                self.output,
                "\t{} =w call ${}(l {}, l {})",
                c,
                runtime::STRING_COMPARE,
                sel.temp,
                lv.temp
            )?;
            let t = self.fresh_temp();
            writeln!(self.output, "\t{} =w {} {}, 0", t, cmp_op(op, "w", false), c)?;
            return Ok(t);
        }
        let lt = self.infer(label)?;
        let prom = promote_types(&sel.ty, &lt);
        let a = self.emit_cast(sel.clone(), &prom)?;
        let b = self.emit_expr_cast(label, &prom)?;
        let t = self.fresh_temp();
        writeln!(
            self.output,
            "\t{} =w {} {}, {}",
            t,
            cmp_op(op, prom.qbe_scalar(), prom.is_unsigned()),
            a.temp,
            b.temp
        )?;
        Ok(t)
    }

    /// Push one GOSUB return-site id, guarding the 1000-entry stack.
    fn emit_gosub_push(&mut self, site: u32) -> Result<(), CodeGenError> {
        let sp = self.fresh_temp();
        writeln!(self.output, "\t{} =w loadw ${}", sp, runtime::GOSUB_SP)?;
        let full = self.fresh_temp();
        writeln!(
            self.output,
            "\t{} =w csgew {}, {}",
            full,
            sp,
            runtime::GOSUB_STACK_DEPTH
        )?;
        let ovf = self.fresh_aux_label("gosub_ovf");
        let ok = self.fresh_aux_label("gosub_ok");
        writeln!(self.output, "\tjnz {}, @{}, @{}", full, ovf, ok)?;
        writeln!(self.output, "@{}", ovf)?;
        writeln!(self.output, "\tcall ${}()", runtime::ERROR_GOSUB_OVERFLOW)?;
        writeln!(self.output, "\thlt")?;
        writeln!(self.output, "@{}", ok)?;
        let off = self.fresh_temp();
        writeln!(self.output, "\t{} =l extsw {}", off, sp)?;
        let off4 = self.fresh_temp();
        writeln!(self.output, "\t{} =l mul {}, 4", off4, off)?;
        let addr = self.fresh_temp();
        writeln!(
            self.output,
            "\t{} =l add ${}, {}",
            addr,
            runtime::GOSUB_STACK,
            off4
        )?;
        writeln!(self.output, "\tstorew {}, {}", site, addr)?;
        let sp1 = self.fresh_temp();
        writeln!(self.output, "\t{} =w add {}, 1", sp1, sp)?;
        writeln!(self.output, "\tstorew {}, ${}", sp1, runtime::GOSUB_SP)?;
        Ok(())
    }

    /// longjmp to the innermost live handler, or die with a diagnostic.
    fn emit_longjmp_top(&mut self, code: &str) -> Result<(), CodeGenError> {
        let sp = self.fresh_temp();
        writeln!(self.output, "\t{} =w loadw ${}", sp, runtime::TRY_SP)?;
        let unhandled = self.fresh_aux_label("throw_unhandled");
        let live = self.fresh_aux_label("throw_live");
        writeln!(self.output, "\tjnz {}, @{}, @{}", sp, live, unhandled)?;
        writeln!(self.output, "@{}", unhandled)?;
        writeln!(
            self.output,
            "\tcall ${}(w {})",
            runtime::ERROR_UNHANDLED,
            code
        )?;
        writeln!(self.output, "\thlt")?;
        writeln!(self.output, "@{}", live)?;
        let sp1 = self.fresh_temp();
        writeln!(self.output, "\t{} =w sub {}, 1", sp1, sp)?;
        let off = self.fresh_temp();
        writeln!(self.output, "\t{} =l extsw {}", off, sp1)?;
        let off8 = self.fresh_temp();
        writeln!(self.output, "\t{} =l mul {}, 8", off8, off)?;
        let addr = self.fresh_temp();
        writeln!(
            self.output,
            "\t{} =l add ${}, {}",
            addr,
            runtime::TRY_STACK,
            off8
        )?;
        let buf = self.fresh_temp();
        writeln!(self.output, "\t{} =l loadl {}", buf, addr)?;
        writeln!(
            self.output,
            "\tcall ${}(l {}, w {})",
            runtime::LONGJMP,
            buf,
            code
        )?;
        writeln!(self.output, "\thlt")?;
        Ok(())
    }

    /// tidy_exit: every exit path of a procedure funnels through here.
    /// Frees registered locals, then returns.
    fn emit_epilogue(&mut self, cfg: &Cfg<'a>, is_main: bool) -> Result<(), CodeGenError> {
        for slot in self.local_strings.clone() {
            let v = self.fresh_temp();
            writeln!(self.output, "\t{} =l loadl {}", v, slot)?;
            writeln!(self.output, "\tcall ${}(l {})", runtime::STRING_RELEASE, v)?;
        }
        for slot in self.local_arrays.clone() {
            let v = self.fresh_temp();
            writeln!(self.output, "\t{} =l loadl {}", v, slot)?;
            writeln!(self.output, "\tcall ${}(l {})", runtime::ARRAY_ERASE, v)?;
        }
        if is_main {
            // globals: strings released, arrays erased, then the vector goes
            let mut gstrings: Vec<_> = self
                .symbols
                .variables_in(&Scope::global())
                .filter(|v| v.global_slot.is_some() && v.ty.is_string())
                .cloned()
                .collect();
            gstrings.sort_by_key(|v| v.global_slot);
            for var in gstrings {
                let addr = self.emit_global_addr(var.global_slot.unwrap())?;
                let v = self.fresh_temp();
                writeln!(self.output, "\t{} =l loadl {}", v, addr)?;
                writeln!(self.output, "\tcall ${}(l {})", runtime::STRING_RELEASE, v)?;
            }
            let mut garrays: Vec<_> = self.symbols.global_arrays().cloned().collect();
            garrays.sort_by(|a, b| a.name.cmp(&b.name));
            for arr in garrays {
                let v = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l loadl ${}",
                    v,
                    global_array_label(&arr.name)
                )?;
                writeln!(self.output, "\tcall ${}(l {})", runtime::ARRAY_ERASE, v)?;
            }
            writeln!(self.output, "\tcall ${}()", runtime::GLOBAL_CLEANUP)?;
            writeln!(self.output, "\tcall ${}()", runtime::RUNTIME_CLEANUP)?;
            writeln!(self.output, "\tret 0")?;
            return Ok(());
        }
        match &cfg.return_type {
            Some(ret) => {
                let slot = self.slots.get(&cfg.name).cloned().ok_or_else(|| {
                    CodeGenError::Logic(format!("function `{}` has no return slot", cfg.name))
                })?;
                let v = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} ={} {} {}",
                    v,
                    ret.qbe_scalar(),
                    ret.qbe_load(),
                    slot.temp
                )?;
                writeln!(self.output, "\tret {}", v)?;
            }
            None => writeln!(self.output, "\tret")?,
        }
        Ok(())
    }
}
