//! Expression emission
//!
//! Every expression evaluates to an SSA temp (or a bare constant operand)
//! tagged with its resolved type. Arithmetic happens at the promoted QBE
//! scalar class; memory traffic happens at the native width of the field
//! or slot being touched. Record-typed expressions evaluate to their base
//! pointer.

use super::runtime;
use super::state::{mangle, SlotKind, Value};
use super::types::{cast_op, cmp_op};
use super::{CodeGen, CodeGenError};
use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::builtins::{self, ParamSpec};
use crate::semantic::infer_expr;
use crate::symbols::{ConstValue, RecordInfo};
use crate::types::{promote_types, TypeDescriptor};
use std::fmt::Write as _;

/// A resolved storage location: an address operand plus the type stored
/// there.
pub(super) struct LValueRef {
    pub addr: String,
    pub ty: TypeDescriptor,
}

impl<'a> CodeGen<'a> {
    pub(super) fn infer(&self, expr: &Expr) -> Result<TypeDescriptor, CodeGenError> {
        infer_expr(self.symbols, &self.scope, expr)
            .map_err(|e| CodeGenError::Logic(format!("{}: {}", e.loc, e.message)))
    }

    /// Spell a literal as a QBE operand for the given scalar class.
    fn float_operand(v: f64) -> String {
        format!("d_{:?}", v)
    }

    pub(super) fn emit_expr(&mut self, expr: &Expr) -> Result<Value, CodeGenError> {
        match &expr.kind {
            ExprKind::IntLiteral(v) => Ok(Value::borrowed(
                format!("{}", v),
                crate::types::integer_literal_type(*v),
            )),
            ExprKind::FloatLiteral(v) => Ok(Value::borrowed(
                Self::float_operand(*v),
                TypeDescriptor::double(),
            )),
            ExprKind::StringLiteral(s) => {
                let label = self.string_global(s);
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l call ${}(l {})",
                    t,
                    runtime::STRING_NEW_UTF8,
                    label
                )?;
                self.stmt_strings.push(t.clone());
                Ok(Value::owned(t, TypeDescriptor::string()))
            }
            ExprKind::Variable(name) => self.emit_var_value(name, expr),
            ExprKind::ArrayElem { name, indices } => {
                if self.symbols.lookup_array(&self.scope, name).is_some() {
                    let lv = self.emit_lvalue(expr)?;
                    self.load_from(&lv)
                } else {
                    // same spelling as an array access, but it's a call
                    self.emit_call(name, indices, &expr.loc, true)
                        .map(|v| v.expect("function call produces a value"))
                }
            }
            ExprKind::Member { .. } => {
                let lv = self.emit_lvalue(expr)?;
                self.load_from(&lv)
            }
            ExprKind::Call { name, args } => self
                .emit_call(name, args, &expr.loc, true)
                .map(|v| v.expect("function call produces a value")),
            ExprKind::Unary { op, expr: inner } => self.emit_unary(*op, inner),
            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs, expr),
        }
    }

    /// Evaluate and coerce to `to` in one step.
    pub(super) fn emit_expr_cast(
        &mut self,
        expr: &Expr,
        to: &TypeDescriptor,
    ) -> Result<Value, CodeGenError> {
        let v = self.emit_expr(expr)?;
        self.emit_cast(v, to)
    }

    /// Convert a value to the scalar class of `to`. No-op within a class.
    pub(super) fn emit_cast(
        &mut self,
        v: Value,
        to: &TypeDescriptor,
    ) -> Result<Value, CodeGenError> {
        match cast_op(&v.ty, to) {
            None => Ok(Value {
                temp: v.temp,
                ty: to.clone(),
                owned: v.owned,
            }),
            Some(op) => {
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} ={} {} {}",
                    t,
                    to.qbe_scalar(),
                    op,
                    v.temp
                )?;
                Ok(Value::borrowed(t, to.clone()))
            }
        }
    }

    /// Evaluate a condition into a `w` temp suitable for `jnz`.
    pub(super) fn emit_cond(&mut self, expr: &Expr) -> Result<String, CodeGenError> {
        let v = self.emit_expr(expr)?;
        match v.ty.qbe_scalar() {
            "w" => Ok(v.temp),
            class => {
                let t = self.fresh_temp();
                let zero = if class == "s" {
                    "s_0"
                } else if class == "d" {
                    "d_0"
                } else {
                    "0"
                };
                writeln!(self.output, "\t{} =w cne{} {}, {}", t, class, v.temp, zero)?;
                Ok(t)
            }
        }
    }

    // ---- variables ----

    fn emit_var_value(&mut self, name: &str, expr: &Expr) -> Result<Value, CodeGenError> {
        if let Some(slot) = self.slots.get(name).cloned() {
            return match slot.kind {
                SlotKind::Direct => Ok(Value::borrowed(slot.temp, slot.ty)),
                SlotKind::Indirect if slot.ty.is_record() => {
                    // the slot cell holds the record's base pointer
                    let t = self.fresh_temp();
                    writeln!(self.output, "\t{} =l loadl {}", t, slot.temp)?;
                    Ok(Value::borrowed(t, slot.ty))
                }
                SlotKind::Indirect => self.load_from(&LValueRef {
                    addr: slot.temp,
                    ty: slot.ty,
                }),
            };
        }
        if let Some(var) = self.symbols.lookup_variable(&self.scope, name)
            && let Some(slot) = var.global_slot
        {
            let ty = var.ty.clone();
            let addr = self.emit_global_addr(slot)?;
            if ty.is_record() {
                let t = self.fresh_temp();
                writeln!(self.output, "\t{} =l loadl {}", t, addr)?;
                return Ok(Value::borrowed(t, ty));
            }
            return self.load_from(&LValueRef { addr, ty });
        }
        if let Some(c) = self.symbols.lookup_constant(name) {
            // constants are inlined at each use; they have no storage
            return match c.value.clone() {
                ConstValue::Int(v) => {
                    Ok(Value::borrowed(format!("{}", v), c.ty.clone()))
                }
                ConstValue::Float(v) => {
                    Ok(Value::borrowed(Self::float_operand(v), c.ty.clone()))
                }
                ConstValue::Str(s) => {
                    let label = self.string_global(&s);
                    let t = self.fresh_temp();
                    writeln!(
                        self.output,
                        "\t{} =l call ${}(l {})",
                        t,
                        runtime::STRING_NEW_UTF8,
                        label
                    )?;
                    self.stmt_strings.push(t.clone());
                    Ok(Value::owned(t, TypeDescriptor::string()))
                }
            };
        }
        Err(CodeGenError::Logic(format!(
            "{}: unresolved variable `{}` reached the emitter",
            expr.loc, name
        )))
    }

    /// Address of global slot `slot` inside the runtime global vector.
    pub(super) fn emit_global_addr(&mut self, slot: u32) -> Result<String, CodeGenError> {
        let base = self.fresh_temp();
        writeln!(
            self.output,
            "\t{} =l call ${}()",
            base,
            runtime::GLOBAL_BASE
        )?;
        let addr = self.fresh_temp();
        writeln!(self.output, "\t{} =l add {}, {}", addr, base, 8 * slot)?;
        Ok(addr)
    }

    /// Load a value out of a storage location at its native width.
    /// Records do not load: the address is the value.
    pub(super) fn load_from(&mut self, lv: &LValueRef) -> Result<Value, CodeGenError> {
        if lv.ty.is_record() {
            return Ok(Value::borrowed(lv.addr.clone(), lv.ty.clone()));
        }
        let t = self.fresh_temp();
        writeln!(
            self.output,
            "\t{} ={} {} {}",
            t,
            lv.ty.qbe_scalar(),
            lv.ty.qbe_load(),
            lv.addr
        )?;
        Ok(Value::borrowed(t, lv.ty.clone()))
    }

    /// Runtime array object pointer for a named array.
    pub(super) fn emit_array_ptr(&mut self, name: &str) -> Result<String, CodeGenError> {
        let info = self
            .symbols
            .lookup_array(&self.scope, name)
            .ok_or_else(|| {
                CodeGenError::Logic(format!("unknown array `{}` reached the emitter", name))
            })?;
        let t = self.fresh_temp();
        if info.global {
            writeln!(
                self.output,
                "\t{} =l loadl ${}",
                t,
                global_array_label(name)
            )?;
        } else {
            let slot = self.slots.get(name).cloned().ok_or_else(|| {
                CodeGenError::Logic(format!("array `{}` has no slot", name))
            })?;
            writeln!(self.output, "\t{} =l loadl {}", t, slot.temp)?;
        }
        Ok(t)
    }

    /// Store a runtime array pointer back into its descriptor slot.
    pub(super) fn store_array_ptr(&mut self, name: &str, ptr: &str) -> Result<(), CodeGenError> {
        let info = self
            .symbols
            .lookup_array(&self.scope, name)
            .ok_or_else(|| {
                CodeGenError::Logic(format!("unknown array `{}` reached the emitter", name))
            })?;
        if info.global {
            writeln!(
                self.output,
                "\tstorel {}, ${}",
                ptr,
                global_array_label(name)
            )?;
        } else {
            let slot = self.slots.get(name).cloned().ok_or_else(|| {
                CodeGenError::Logic(format!("array `{}` has no slot", name))
            })?;
            writeln!(self.output, "\tstorel {}, {}", ptr, slot.temp)?;
        }
        Ok(())
    }

    // ---- lvalues ----

    /// Storage location of a named variable in the current scope.
    pub(super) fn var_lvalue(&mut self, name: &str) -> Result<LValueRef, CodeGenError> {
        if let Some(slot) = self.slots.get(name).cloned() {
            return match slot.kind {
                SlotKind::Direct => Ok(LValueRef {
                    addr: slot.temp,
                    ty: slot.ty,
                }),
                SlotKind::Indirect if slot.ty.is_record() => {
                    // slot holds the record's base pointer
                    let t = self.fresh_temp();
                    writeln!(self.output, "\t{} =l loadl {}", t, slot.temp)?;
                    Ok(LValueRef {
                        addr: t,
                        ty: slot.ty,
                    })
                }
                SlotKind::Indirect => Ok(LValueRef {
                    addr: slot.temp,
                    ty: slot.ty,
                }),
            };
        }
        if let Some(var) = self.symbols.lookup_variable(&self.scope, name)
            && let Some(gslot) = var.global_slot
        {
            let ty = var.ty.clone();
            let addr = self.emit_global_addr(gslot)?;
            if ty.is_record() {
                let t = self.fresh_temp();
                writeln!(self.output, "\t{} =l loadl {}", t, addr)?;
                return Ok(LValueRef { addr: t, ty });
            }
            return Ok(LValueRef { addr, ty });
        }
        Err(CodeGenError::Logic(format!(
            "unresolved assignment target `{}`",
            name
        )))
    }

    pub(super) fn emit_lvalue(&mut self, expr: &Expr) -> Result<LValueRef, CodeGenError> {
        match &expr.kind {
            ExprKind::Variable(name) => self.var_lvalue(name),
            ExprKind::ArrayElem { name, indices } => {
                let info = self
                    .symbols
                    .lookup_array(&self.scope, name)
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!(
                            "{}: `{}` is not an array",
                            expr.loc, name
                        ))
                    })?;
                let elem = info.element.clone();
                let ptr = self.emit_array_ptr(name)?;
                let mut idx_temps = Vec::with_capacity(indices.len());
                for idx in indices {
                    let v = self.emit_expr_cast(idx, &TypeDescriptor::long())?;
                    idx_temps.push(v.temp);
                }
                let addr = self.fresh_temp();
                let mut call = format!(
                    "\t{} =l call ${}(l {}, w {}, ...",
                    addr,
                    runtime::ARRAY_GET_ADDRESS,
                    ptr,
                    idx_temps.len()
                );
                for t in &idx_temps {
                    let _ = write!(call, ", l {}", t);
                }
                writeln!(self.output, "{})", call)?;
                Ok(LValueRef { addr, ty: elem })
            }
            ExprKind::Member { base, field } => {
                let base_lv = self.emit_lvalue(base)?;
                if !base_lv.ty.is_record() {
                    return Err(CodeGenError::Logic(format!(
                        "{}: member access on non-record",
                        expr.loc
                    )));
                }
                let rec = self
                    .symbols
                    .record_by_id(base_lv.ty.record_id)
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!(
                            "record id {} unknown",
                            base_lv.ty.record_id
                        ))
                    })?;
                let f = rec.field(field).ok_or_else(|| {
                    CodeGenError::Logic(format!(
                        "{}: no field `{}` on {}",
                        expr.loc, field, rec.name
                    ))
                })?;
                let (offset, fty) = (f.offset, f.ty.clone());
                let addr = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l add {}, {}",
                    addr, base_lv.addr, offset
                )?;
                Ok(LValueRef { addr, ty: fty })
            }
            _ => Err(CodeGenError::Logic(format!(
                "{}: expression is not assignable",
                expr.loc
            ))),
        }
    }

    /// The store half of an assignment: coerce, maintain string refcounts,
    /// copy records field by field.
    pub(super) fn store_value(&mut self, lv: &LValueRef, v: Value) -> Result<(), CodeGenError> {
        if lv.ty.is_record() {
            let rec = self
                .symbols
                .record_by_id(lv.ty.record_id)
                .ok_or_else(|| {
                    CodeGenError::Logic(format!("record id {} unknown", lv.ty.record_id))
                })?
                .clone();
            return self.emit_record_copy(&lv.addr, &v.temp, &rec);
        }
        if lv.ty.is_string() {
            // keep the new reference alive before releasing the old one:
            // self-assignment must not free the value it is about to store
            self.take_string_ownership(&v)?;
            let old = self.fresh_temp();
            writeln!(self.output, "\t{} =l loadl {}", old, lv.addr)?;
            writeln!(
                self.output,
                "\tcall ${}(l {})",
                runtime::STRING_RELEASE,
                old
            )?;
            writeln!(self.output, "\tstorel {}, {}", v.temp, lv.addr)?;
            return Ok(());
        }
        let casted = self.emit_cast(v, &lv.ty)?;
        writeln!(
            self.output,
            "\t{} {}, {}",
            lv.ty.qbe_store(),
            casted.temp,
            lv.addr
        )?;
        Ok(())
    }

    /// Field-wise copy between two same-type records, honoring string
    /// refcounts and recursing through nested records.
    fn emit_record_copy(
        &mut self,
        dst: &str,
        src: &str,
        rec: &RecordInfo,
    ) -> Result<(), CodeGenError> {
        for f in &rec.fields {
            let da = self.fresh_temp();
            writeln!(self.output, "\t{} =l add {}, {}", da, dst, f.offset)?;
            let sa = self.fresh_temp();
            writeln!(self.output, "\t{} =l add {}, {}", sa, src, f.offset)?;
            if f.ty.is_record() {
                let nested = self
                    .symbols
                    .record_by_id(f.ty.record_id)
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!("record id {} unknown", f.ty.record_id))
                    })?
                    .clone();
                self.emit_record_copy(&da, &sa, &nested)?;
            } else if f.ty.is_string() {
                // retain the source reference before releasing the
                // destination's, same as store_value: dst and src may be
                // the same record
                let new = self.fresh_temp();
                writeln!(self.output, "\t{} =l loadl {}", new, sa)?;
                writeln!(self.output, "\tcall ${}(l {})", runtime::STRING_RETAIN, new)?;
                let old = self.fresh_temp();
                writeln!(self.output, "\t{} =l loadl {}", old, da)?;
                writeln!(self.output, "\tcall ${}(l {})", runtime::STRING_RELEASE, old)?;
                writeln!(self.output, "\tstorel {}, {}", new, da)?;
            } else {
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} ={} {} {}",
                    t,
                    f.ty.qbe_scalar(),
                    f.ty.qbe_load(),
                    sa
                )?;
                writeln!(self.output, "\t{} {}, {}", f.ty.qbe_store(), t, da)?;
            }
        }
        Ok(())
    }

    // ---- operators ----

    fn emit_unary(&mut self, op: UnaryOp, inner: &Expr) -> Result<Value, CodeGenError> {
        match op {
            UnaryOp::Neg => {
                let v = self.emit_expr(inner)?;
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} ={} neg {}",
                    t,
                    v.ty.qbe_scalar(),
                    v.temp
                )?;
                Ok(Value::borrowed(t, v.ty))
            }
            UnaryOp::Not => {
                let v = self.emit_expr_cast(inner, &TypeDescriptor::long())?;
                let t = self.fresh_temp();
                writeln!(self.output, "\t{} =l xor {}, -1", t, v.temp)?;
                Ok(Value::borrowed(t, TypeDescriptor::long()))
            }
        }
    }

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        whole: &Expr,
    ) -> Result<Value, CodeGenError> {
        let lt = self.infer(lhs)?;
        let rt = self.infer(rhs)?;

        if lt.is_string() && rt.is_string() {
            let a = self.emit_expr(lhs)?;
            let b = self.emit_expr(rhs)?;
            if op == BinaryOp::Add {
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l call ${}(l {}, l {})",
                    t,
                    runtime::STRING_CONCAT,
                    a.temp,
                    b.temp
                )?;
                self.stmt_strings.push(t.clone());
                return Ok(Value::owned(t, TypeDescriptor::string()));
            }
            // comparisons go through the runtime's three-way compare
            let c = self.fresh_temp();
            writeln!(
                self.output,
                "\t{} =w call ${}(l {}, l {})",
                c,
                runtime::STRING_COMPARE,
                a.temp,
                b.temp
            )?;
            let t = self.fresh_temp();
            writeln!(self.output, "\t{} =w {} {}, 0", t, cmp_op(op, "w", false), c)?;
            return Ok(Value::borrowed(t, TypeDescriptor::integer()));
        }

        if op.is_comparison() {
            let prom = promote_types(&lt, &rt);
            let a = self.emit_expr_cast(lhs, &prom)?;
            let b = self.emit_expr_cast(rhs, &prom)?;
            let t = self.fresh_temp();
            writeln!(
                self.output,
                "\t{} =w {} {}, {}",
                t,
                cmp_op(op, prom.qbe_scalar(), prom.is_unsigned()),
                a.temp,
                b.temp
            )?;
            return Ok(Value::borrowed(t, TypeDescriptor::integer()));
        }

        if op.is_integer_only() {
            let long = TypeDescriptor::long();
            let a = self.emit_expr_cast(lhs, &long)?;
            let b = self.emit_expr_cast(rhs, &long)?;
            let instr = match op {
                BinaryOp::IntDiv => "div",
                BinaryOp::Mod => "rem",
                BinaryOp::And => "and",
                BinaryOp::Or => "or",
                BinaryOp::Xor => "xor",
                _ => unreachable!(),
            };
            let t = self.fresh_temp();
            writeln!(self.output, "\t{} =l {} {}, {}", t, instr, a.temp, b.temp)?;
            return Ok(Value::borrowed(t, long));
        }

        // Add/Sub/Mul/Div at the promoted class; `/` is always floating
        let result = self.infer(whole)?;
        let a = self.emit_expr_cast(lhs, &result)?;
        let b = self.emit_expr_cast(rhs, &result)?;
        let instr = match op {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            _ => unreachable!(),
        };
        let t = self.fresh_temp();
        writeln!(
            self.output,
            "\t{} ={} {} {}, {}",
            t,
            result.qbe_scalar(),
            instr,
            a.temp,
            b.temp
        )?;
        Ok(Value::borrowed(t, result))
    }

    // ---- calls ----

    /// Emit a builtin or user call. Returns None only when `want_result`
    /// is false (SUB call). Argument casts are all emitted before the call
    /// instruction itself.
    pub(super) fn emit_call(
        &mut self,
        name: &str,
        args: &[Expr],
        loc: &crate::ast::SourceLocation,
        want_result: bool,
    ) -> Result<Option<Value>, CodeGenError> {
        if let Some(def) = builtins::builtin(name) {
            return self.emit_builtin(def, args).map(Some);
        }
        let proc = self
            .symbols
            .lookup_procedure(name)
            .ok_or_else(|| {
                CodeGenError::Logic(format!("{}: unknown procedure `{}`", loc, name))
            })?
            .clone();
        let mut operands = Vec::with_capacity(args.len());
        for (arg, param) in args.iter().zip(proc.params.iter()) {
            if param.byref && param.ty.is_record() {
                let lv = self.emit_lvalue(arg)?;
                operands.push(format!("l {}", lv.addr));
            } else {
                let v = self.emit_expr_cast(arg, &param.ty)?;
                operands.push(format!("{} {}", param.ty.qbe_scalar(), v.temp));
            }
        }
        let arg_list = operands.join(", ");
        match (&proc.return_type, want_result) {
            (Some(ret), true) => {
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} ={} call ${}({})",
                    t,
                    ret.qbe_scalar(),
                    mangle(&proc.name),
                    arg_list
                )?;
                if ret.is_string() {
                    self.stmt_strings.push(t.clone());
                    return Ok(Some(Value::owned(t, ret.clone())));
                }
                Ok(Some(Value::borrowed(t, ret.clone())))
            }
            (Some(ret), false) => {
                // FUNCTION called as a statement: discard, but balance refs
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} ={} call ${}({})",
                    t,
                    ret.qbe_scalar(),
                    mangle(&proc.name),
                    arg_list
                )?;
                if ret.is_string() {
                    self.stmt_strings.push(t);
                }
                Ok(None)
            }
            (None, false) => {
                writeln!(self.output, "\tcall ${}({})", mangle(&proc.name), arg_list)?;
                Ok(None)
            }
            (None, true) => Err(CodeGenError::Logic(format!(
                "{}: SUB `{}` used as a value",
                loc, name
            ))),
        }
    }

    fn emit_builtin(
        &mut self,
        def: &builtins::BuiltinDef,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let ret = def.ret.descriptor();
        match def.name {
            "CINT" | "CLNG" | "CSNG" | "CDBL" => {
                // explicit conversions lower to bare cast instructions
                let v = self.emit_expr(&args[0])?;
                return self.emit_cast(v, &ret);
            }
            "ERR" => {
                let t = self.fresh_temp();
                writeln!(self.output, "\t{} =w loadw ${}", t, runtime::ERR_CODE)?;
                return Ok(Value::borrowed(t, ret));
            }
            "STR$" => {
                let at = self.infer(&args[0])?;
                let t = self.fresh_temp();
                if at.is_float() {
                    let v = self.emit_expr_cast(&args[0], &TypeDescriptor::double())?;
                    writeln!(
                        self.output,
                        "\t{} =l call ${}(d {})",
                        t,
                        runtime::STRING_FROM_DOUBLE,
                        v.temp
                    )?;
                } else {
                    let v = self.emit_expr_cast(&args[0], &TypeDescriptor::long())?;
                    writeln!(
                        self.output,
                        "\t{} =l call ${}(l {})",
                        t,
                        runtime::STRING_FROM_INT,
                        v.temp
                    )?;
                }
                self.stmt_strings.push(t.clone());
                return Ok(Value::owned(t, ret));
            }
            "ASC" => {
                let v = self.emit_expr(&args[0])?;
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l call $string_char_at(l {}, l 0)",
                    t, v.temp
                )?;
                return Ok(Value::borrowed(t, ret));
            }
            "LBOUND" | "UBOUND" => {
                let ExprKind::Variable(arr_name) = &args[0].kind else {
                    return Err(CodeGenError::Logic(format!(
                        "{} expects an array name",
                        def.name
                    )));
                };
                let ptr = self.emit_array_ptr(arr_name)?;
                let dim = if args.len() > 1 {
                    self.emit_expr_cast(&args[1], &TypeDescriptor::integer())?.temp
                } else {
                    "1".to_string()
                };
                let t = self.fresh_temp();
                writeln!(
                    self.output,
                    "\t{} =l call ${}(l {}, w {})",
                    t,
                    def.symbol.expect("bound builtins have symbols"),
                    ptr,
                    dim
                )?;
                return Ok(Value::borrowed(t, ret));
            }
            _ => {}
        }

        // the common shape: evaluate arguments per parameter shape, then
        // call the symbol
        let symbol = def.symbol.ok_or_else(|| {
            CodeGenError::Logic(format!("builtin {} has no runtime symbol", def.name))
        })?;
        let mut operands = Vec::new();
        for (arg, spec) in args.iter().zip(def.params.iter()) {
            match spec {
                ParamSpec::Str => {
                    let v = self.emit_expr(arg)?;
                    operands.push(format!("l {}", v.temp));
                }
                ParamSpec::Int | ParamSpec::Num => {
                    let v = self.emit_expr_cast(arg, &TypeDescriptor::long())?;
                    operands.push(format!("l {}", v.temp));
                }
                ParamSpec::ArrayName => {
                    return Err(CodeGenError::Logic(format!(
                        "{} takes an array name",
                        def.name
                    )));
                }
            }
        }
        // optional trailing arguments are filled with the runtime's
        // "not given" sentinel
        for _ in args.len()..def.params.len() {
            operands.push("l -1".to_string());
        }
        let t = self.fresh_temp();
        writeln!(
            self.output,
            "\t{} ={} call ${}({})",
            t,
            ret.qbe_scalar(),
            symbol,
            operands.join(", ")
        )?;
        if ret.is_string() {
            self.stmt_strings.push(t.clone());
            Ok(Value::owned(t, ret))
        } else {
            Ok(Value::borrowed(t, ret))
        }
    }
}

/// Module data slot holding a GLOBAL array's runtime pointer.
pub(super) fn global_array_label(name: &str) -> String {
    format!("g_arr_{}", mangle(name))
}
