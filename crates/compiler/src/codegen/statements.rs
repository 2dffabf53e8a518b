//! Statement emission
//!
//! Bodies of basic blocks: assignments, array management, console I/O, and
//! DATA access. Control-flow statements never reach this module - the CFG
//! builder turned them into edges, and the terminator emitter owns them.
//! The guard at the top keeps that rule honest.

use super::runtime;
use super::state::Value;
use super::{CodeGen, CodeGenError};
use crate::ast::{
    ArrayBound, Expr, JumpTarget, PrintItem, PrintSep, Statement, StatementKind, VarDecl,
};
use crate::types::TypeDescriptor;
use std::fmt::Write as _;

impl<'a> CodeGen<'a> {
    /// Emit one straight-line statement, then release any string
    /// temporaries it produced and did not store.
    pub(super) fn emit_stmt(&mut self, stmt: &Statement) -> Result<(), CodeGenError> {
        if stmt.kind.is_control_flow() {
            // terminator-only statements are handled from the edges
            return Ok(());
        }
        match &stmt.kind {
            StatementKind::Let { target, value } => {
                let v = self.emit_expr(value)?;
                let lv = self.emit_lvalue(target)?;
                self.store_value(&lv, v)?;
            }
            StatementKind::Dim { decls }
            | StatementKind::Local { decls }
            | StatementKind::Global { decls } => {
                self.emit_array_decls(decls)?;
            }
            StatementKind::Redim {
                preserve,
                name,
                bounds,
            } => {
                let ptr = self.emit_array_ptr(name)?;
                let bound_args = self.emit_bound_args(bounds)?;
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l call ${}(l {}, w {}, w {}, ...{})",
                    t,
                    runtime::ARRAY_REDIM,
                    ptr,
                    if *preserve { 1 } else { 0 },
                    bounds.len(),
                    bound_args
                )?;
                self.store_array_ptr(name, &t)?;
            }
            StatementKind::Erase { names } => {
                for name in names {
                    let ptr = self.emit_array_ptr(name)?;
                    writeln!(self.output, "\tcall ${}(l {})", runtime::ARRAY_ERASE, ptr)?;
                    self.store_array_ptr(name, "0")?;
                }
            }
            StatementKind::Print { items } => self.emit_print(items)?,
            StatementKind::PrintUsing { format, args } => self.emit_print_using(format, args)?,
            StatementKind::Input { prompt, targets } => {
                if let Some(text) = prompt {
                    let label = self.string_global(text);
                    let t = self.fresh_temp();
                    writeln!(
                        self.output,
                        "\t{} =l call ${}(l {})",
                        t,
                        runtime::STRING_NEW_UTF8,
                        label
                    )?;
                    self.stmt_strings.push(t.clone());
                    writeln!(self.output, "\tcall ${}(l {})", runtime::PRINT_STRING, t)?;
                }
                for target in targets {
                    let lv = self.emit_lvalue(target)?;
                    let v = if lv.ty.is_string() {
                        let t = self.fresh_temp();
                        writeln!(
                            self.output,
                            "\t{} =l call ${}()",
                            t,
                            runtime::INPUT_STRING
                        )?;
                        self.stmt_strings.push(t.clone());
                        Value::owned(t, TypeDescriptor::string())
                    } else if lv.ty.is_float() {
                        let t = self.fresh_temp();
                        writeln!(
                            self.output,
                            "\t{} =d call ${}()",
                            t,
                            runtime::INPUT_DOUBLE
                        )?;
                        Value::borrowed(t, TypeDescriptor::double())
                    } else {
                        let t = self.fresh_temp();
                        writeln!(self.output, "\t{} =l call ${}()", t, runtime::INPUT_INT)?;
                        Value::borrowed(t, TypeDescriptor::long())
                    };
                    self.store_value(&lv, v)?;
                }
            }
            StatementKind::Read { targets } => {
                for target in targets {
                    let lv = self.emit_lvalue(target)?;
                    let v = if lv.ty.is_string() {
                        let t = self.fresh_temp();
                        writeln!(self.output, "\t{} =l call ${}()", t, runtime::FB_READ_STRING)?;
                        self.stmt_strings.push(t.clone());
                        Value::owned(t, TypeDescriptor::string())
                    } else if lv.ty.is_float() {
                        let t = self.fresh_temp();
                        writeln!(self.output, "\t{} =d call ${}()", t, runtime::FB_READ_DOUBLE)?;
                        Value::borrowed(t, TypeDescriptor::double())
                    } else {
                        let t = self.fresh_temp();
                        writeln!(self.output, "\t{} =l call ${}()", t, runtime::FB_READ_INT)?;
                        Value::borrowed(t, TypeDescriptor::long())
                    };
                    self.store_value(&lv, v)?;
                }
            }
            StatementKind::Restore { target } => {
                let index = match target {
                    None => 0,
                    Some(JumpTarget::Line(n)) => *self
                        .data
                        .line_restore_points
                        .get(n)
                        .ok_or_else(|| {
                            CodeGenError::Logic(format!("RESTORE line {} has no DATA", n))
                        })?,
                    Some(JumpTarget::Label(l)) => *self
                        .data
                        .label_restore_points
                        .get(l)
                        .ok_or_else(|| {
                            CodeGenError::Logic(format!("RESTORE label {} has no DATA", l))
                        })?,
                };
                writeln!(self.output, "\tcall ${}(l {})", runtime::FB_RESTORE, index)?;
            }
            StatementKind::Call { name, args } => {
                self.emit_call(name, args, &stmt.loc, false)?;
            }
            // declarations with no code of their own
            StatementKind::Shared { .. }
            | StatementKind::Const { .. }
            | StatementKind::TypeDecl { .. } => {}
            other => {
                return Err(CodeGenError::Logic(format!(
                    "{}: structured statement {:?} reached the block-body emitter",
                    stmt.loc,
                    std::mem::discriminant(other)
                )));
            }
        }
        self.flush_stmt_strings()?;
        Ok(())
    }

    /// DIM/LOCAL/GLOBAL array declarators create their runtime arrays at
    /// the point of declaration. Scalar declarators cost nothing here: the
    /// prologue already allocated and zeroed their slots.
    fn emit_array_decls(&mut self, decls: &[VarDecl]) -> Result<(), CodeGenError> {
        for decl in decls {
            if decl.bounds.is_empty() {
                continue;
            }
            let info = self
                .symbols
                .lookup_array(&self.scope, &decl.name)
                .ok_or_else(|| {
                    CodeGenError::Logic(format!("array `{}` not in symbol table", decl.name))
                })?;
            let elem = info.element.clone();
            let (size, tag) = self.element_size_and_tag(&elem)?;
            let bound_args = self.emit_bound_args(&decl.bounds)?;
            let t = self.fresh_temp();
            writeln!(
                self.output,
                "\t{} =l call ${}(l {}, w {}, w {}, ...{})",
                t,
                runtime::ARRAY_NEW,
                size,
                tag,
                decl.bounds.len(),
                bound_args
            )?;
            self.store_array_ptr(&decl.name, &t)?;
        }
        Ok(())
    }

    /// Element byte size and runtime element-kind tag for array creation.
    pub(super) fn element_size_and_tag(
        &self,
        elem: &TypeDescriptor,
    ) -> Result<(u64, u32), CodeGenError> {
        if elem.is_record() {
            let rec = self.symbols.record_by_id(elem.record_id).ok_or_else(|| {
                CodeGenError::Logic(format!("record id {} unknown", elem.record_id))
            })?;
            Ok((rec.size, runtime::ARRAY_ELEM_RECORD))
        } else if elem.is_string() {
            Ok((8, runtime::ARRAY_ELEM_STRING))
        } else {
            Ok((elem.scalar_size(), runtime::ARRAY_ELEM_PLAIN))
        }
    }

    /// `, l lo, l hi` pairs for array_new/array_redim, lower defaulting
    /// to zero.
    fn emit_bound_args(&mut self, bounds: &[ArrayBound]) -> Result<String, CodeGenError> {
        let mut out = String::new();
        for bound in bounds {
            let lo = match &bound.lower {
                Some(e) => self.emit_expr_cast(e, &TypeDescriptor::long())?.temp,
                None => "0".to_string(),
            };
            let hi = self.emit_expr_cast(&bound.upper, &TypeDescriptor::long())?.temp;
            let _ = write!(out, ", l {}, l {}", lo, hi);
        }
        Ok(out)
    }

    fn emit_print(&mut self, items: &[PrintItem]) -> Result<(), CodeGenError> {
        for item in items {
            let v = self.emit_expr(&item.expr)?;
            if v.ty.is_string() {
                writeln!(
                    self.output,
                    "\tcall ${}(l {})",
                    runtime::PRINT_STRING,
                    v.temp
                )?;
            } else if v.ty.is_float() {
                let d = self.emit_cast(v, &TypeDescriptor::double())?;
                writeln!(
                    self.output,
                    "\tcall ${}(d {})",
                    runtime::PRINT_DOUBLE,
                    d.temp
                )?;
            } else {
                let l = self.emit_cast(v, &TypeDescriptor::long())?;
                writeln!(self.output, "\tcall ${}(l {})", runtime::PRINT_INT, l.temp)?;
            }
            if item.sep == PrintSep::Comma {
                writeln!(self.output, "\tcall ${}()", runtime::PRINT_TAB)?;
            }
        }
        let newline = items.last().is_none_or(|i| i.sep == PrintSep::None);
        if newline {
            writeln!(self.output, "\tcall ${}()", runtime::PRINT_NEWLINE)?;
        }
        Ok(())
    }

    /// PRINT USING passes a count and a vector of string-descriptor
    /// pointers; the runtime never sees varargs here.
    fn emit_print_using(&mut self, format: &Expr, args: &[Expr]) -> Result<(), CodeGenError> {
        let fmt = self.emit_expr(format)?;
        let buf = self.fresh_temp();
        let bytes = (args.len().max(1)) * 8;
        writeln!(self.output, "\t{} =l alloc8 {}", buf, bytes)?;
        for (i, arg) in args.iter().enumerate() {
            let at = self.infer(arg)?;
            let desc = if at.is_string() {
                self.emit_expr(arg)?.temp
            } else if at.is_float() {
                let v = self.emit_expr_cast(arg, &TypeDescriptor::double())?;
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l call ${}(d {})",
                    t,
                    runtime::STRING_FROM_DOUBLE,
                    v.temp
                )?;
                self.stmt_strings.push(t.clone());
                t
            } else {
                let v = self.emit_expr_cast(arg, &TypeDescriptor::long())?;
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l call ${}(l {})",
                    t,
                    runtime::STRING_FROM_INT,
                    v.temp
                )?;
                self.stmt_strings.push(t.clone());
                t
            };
            let slot = self.fresh_temp();
            writeln!(self.output, "\t{} =l add {}, {}", slot, buf, 8 * i)?;
            writeln!(self.output, "\tstorel {}, {}", desc, slot)?;
        }
        writeln!(
            self.output,
            "\tcall ${}(l {}, w {}, l {})",
            runtime::PRINT_USING,
            fmt.temp,
            args.len(),
            buf
        )?;
        Ok(())
    }
}
