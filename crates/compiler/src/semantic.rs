//! Semantic analysis
//!
//! Two passes over the AST. Pass one collects declarations: record types
//! (with field offsets), GLOBAL slots, constants, procedure signatures, and
//! every DIM/LOCAL - the declaring scope of a DIM is wherever it lexically
//! sits, not where execution first reaches it. Pass two walks statement
//! bodies, infers a type for every expression, and checks assignments,
//! argument passing, and jump targets.
//!
//! Expression inference lives here as a free function shared with the
//! emitter: by the time code generation runs, every expression re-infers
//! cleanly against the same symbol table.

use crate::ast::*;
use crate::builtins::{self, ParamSpec};
use crate::data::DataValues;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::symbols::{
    ConstValue, ConstantInfo, ParamInfo, ProcedureInfo, RecordField, Scope, SymbolTable,
};
use crate::types::{
    BaseType, Coercion, TypeDescriptor, check_coercion, integer_literal_type, promote_types,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Failure surfaced by expression inference. Semantic analysis converts
/// these into diagnostics; the emitter treats one as an internal error
/// since analysis already validated the tree.
#[derive(Debug, Clone)]
pub struct InferError {
    pub loc: SourceLocation,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl InferError {
    fn new(kind: DiagnosticKind, loc: &SourceLocation, message: String) -> Self {
        InferError {
            loc: loc.clone(),
            kind,
            message,
        }
    }
}

/// Variable type implied by a BASIC name suffix, if any.
pub fn suffix_type(name: &str) -> Option<TypeDescriptor> {
    match name.chars().last()? {
        '$' => Some(TypeDescriptor::string()),
        '%' => Some(TypeDescriptor::integer()),
        '&' => Some(TypeDescriptor::long()),
        '!' => Some(TypeDescriptor::single()),
        '#' => Some(TypeDescriptor::double()),
        _ => None,
    }
}

/// Resolve a source-level type name against declared records.
pub fn resolve_type_name(
    symbols: &SymbolTable,
    tn: &TypeName,
    loc: &SourceLocation,
) -> Result<TypeDescriptor, InferError> {
    Ok(match tn {
        TypeName::Byte => TypeDescriptor::byte(),
        TypeName::UByte => TypeDescriptor::new(BaseType::UByte),
        TypeName::Short => TypeDescriptor::short(),
        TypeName::UShort => TypeDescriptor::new(BaseType::UShort),
        TypeName::Integer => TypeDescriptor::integer(),
        TypeName::UInteger => TypeDescriptor::new(BaseType::UInteger),
        TypeName::Long => TypeDescriptor::long(),
        TypeName::ULong => TypeDescriptor::new(BaseType::ULong),
        TypeName::Single => TypeDescriptor::single(),
        TypeName::Double => TypeDescriptor::double(),
        TypeName::String => TypeDescriptor::string(),
        TypeName::Unicode => TypeDescriptor::new(BaseType::Unicode),
        TypeName::Record(name) => {
            let rec = symbols.lookup_record(name).ok_or_else(|| {
                InferError::new(
                    DiagnosticKind::UndefinedIdentifier,
                    loc,
                    format!("unknown type `{}`", name),
                )
            })?;
            TypeDescriptor::record(rec.id, &rec.name)
        }
    })
}

/// Infer the type of an expression. Every expression node that reaches the
/// emitter resolves to a non-UNKNOWN type through this function.
pub fn infer_expr(
    symbols: &SymbolTable,
    scope: &Scope,
    expr: &Expr,
) -> Result<TypeDescriptor, InferError> {
    match &expr.kind {
        ExprKind::IntLiteral(v) => Ok(integer_literal_type(*v)),
        ExprKind::FloatLiteral(_) => Ok(TypeDescriptor::double()),
        ExprKind::StringLiteral(_) => Ok(TypeDescriptor::string()),
        ExprKind::Variable(name) => {
            if let Some(v) = symbols.lookup_variable(scope, name) {
                return Ok(v.ty.clone());
            }
            if let Some(c) = symbols.lookup_constant(name) {
                return Ok(c.ty.clone());
            }
            if let Some(a) = symbols.lookup_array(scope, name) {
                // bare array name, as passed to LBOUND/UBOUND
                return Ok(TypeDescriptor::array_of(a.element.clone(), a.rank));
            }
            Err(InferError::new(
                DiagnosticKind::UndefinedIdentifier,
                &expr.loc,
                format!("undefined identifier `{}`", name),
            ))
        }
        ExprKind::ArrayElem { name, indices } => {
            if let Some(a) = symbols.lookup_array(scope, name) {
                if indices.len() != a.rank {
                    return Err(InferError::new(
                        DiagnosticKind::WrongArgumentCount,
                        &expr.loc,
                        format!(
                            "array `{}` has {} dimension(s), {} index(es) given",
                            name,
                            a.rank,
                            indices.len()
                        ),
                    ));
                }
                for idx in indices {
                    let t = infer_expr(symbols, scope, idx)?;
                    if !t.is_numeric() {
                        return Err(InferError::new(
                            DiagnosticKind::TypeMismatch,
                            &idx.loc,
                            format!("array index must be numeric, got {}", t),
                        ));
                    }
                }
                return Ok(a.element.clone());
            }
            // not an array: the parser spells calls the same way
            infer_call(symbols, scope, name, indices, &expr.loc)
        }
        ExprKind::Member { base, field } => {
            let base_ty = infer_expr(symbols, scope, base)?;
            if !base_ty.is_record() {
                return Err(InferError::new(
                    DiagnosticKind::TypeMismatch,
                    &expr.loc,
                    format!("member access on non-record type {}", base_ty),
                ));
            }
            let rec = symbols.record_by_id(base_ty.record_id).ok_or_else(|| {
                InferError::new(
                    DiagnosticKind::Internal,
                    &expr.loc,
                    format!("record id {} has no registration", base_ty.record_id),
                )
            })?;
            let f = rec.field(field).ok_or_else(|| {
                InferError::new(
                    DiagnosticKind::UnknownField,
                    &expr.loc,
                    format!("type {} has no field `{}`", rec.name, field),
                )
            })?;
            Ok(f.ty.clone())
        }
        ExprKind::Call { name, args } => infer_call(symbols, scope, name, args, &expr.loc),
        ExprKind::Unary { op, expr: inner } => {
            let t = infer_expr(symbols, scope, inner)?;
            match op {
                UnaryOp::Neg => {
                    if !t.is_numeric() {
                        return Err(InferError::new(
                            DiagnosticKind::TypeMismatch,
                            &expr.loc,
                            format!("cannot negate {}", t),
                        ));
                    }
                    Ok(t)
                }
                UnaryOp::Not => {
                    if !t.is_numeric() {
                        return Err(InferError::new(
                            DiagnosticKind::TypeMismatch,
                            &expr.loc,
                            format!("NOT requires an integer operand, got {}", t),
                        ));
                    }
                    Ok(TypeDescriptor::long())
                }
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let lt = infer_expr(symbols, scope, lhs)?;
            let rt = infer_expr(symbols, scope, rhs)?;
            infer_binary(*op, &lt, &rt, &expr.loc)
        }
    }
}

fn infer_binary(
    op: BinaryOp,
    lt: &TypeDescriptor,
    rt: &TypeDescriptor,
    loc: &SourceLocation,
) -> Result<TypeDescriptor, InferError> {
    if lt.is_string() && rt.is_string() {
        return match op {
            BinaryOp::Add => Ok(TypeDescriptor::string()),
            _ if op.is_comparison() => Ok(TypeDescriptor::integer()),
            _ => Err(InferError::new(
                DiagnosticKind::TypeMismatch,
                loc,
                format!("operator not defined for {} and {}", lt, rt),
            )),
        };
    }
    if lt.is_string() != rt.is_string() || lt.is_record() || rt.is_record() {
        return Err(InferError::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("operator not defined for {} and {}", lt, rt),
        ));
    }
    if op.is_comparison() {
        return Ok(TypeDescriptor::integer());
    }
    if op.is_integer_only() {
        return Ok(TypeDescriptor::long());
    }
    if op == BinaryOp::Div {
        // floating division; stays SINGLE only when nothing widens it
        return if lt.base == BaseType::Single && rt.base == BaseType::Single {
            Ok(TypeDescriptor::single())
        } else {
            Ok(TypeDescriptor::double())
        };
    }
    Ok(promote_types(lt, rt))
}

fn infer_call(
    symbols: &SymbolTable,
    scope: &Scope,
    name: &str,
    args: &[Expr],
    loc: &SourceLocation,
) -> Result<TypeDescriptor, InferError> {
    if let Some(def) = builtins::builtin(name) {
        if args.len() < def.min_args || args.len() > def.params.len() {
            return Err(InferError::new(
                DiagnosticKind::WrongArgumentCount,
                loc,
                format!(
                    "{} takes {} to {} argument(s), {} given",
                    def.name,
                    def.min_args,
                    def.params.len(),
                    args.len()
                ),
            ));
        }
        for (arg, spec) in args.iter().zip(def.params.iter()) {
            match spec {
                ParamSpec::ArrayName => {
                    let ok = matches!(&arg.kind, ExprKind::Variable(n)
                        if symbols.lookup_array(scope, n).is_some());
                    if !ok {
                        return Err(InferError::new(
                            DiagnosticKind::TypeMismatch,
                            &arg.loc,
                            format!("{} expects an array name", def.name),
                        ));
                    }
                }
                ParamSpec::Str => {
                    let t = infer_expr(symbols, scope, arg)?;
                    if !t.is_string() {
                        return Err(InferError::new(
                            DiagnosticKind::TypeMismatch,
                            &arg.loc,
                            format!("{} expects a string, got {}", def.name, t),
                        ));
                    }
                }
                ParamSpec::Num | ParamSpec::Int => {
                    let t = infer_expr(symbols, scope, arg)?;
                    if !t.is_numeric() {
                        return Err(InferError::new(
                            DiagnosticKind::TypeMismatch,
                            &arg.loc,
                            format!("{} expects a number, got {}", def.name, t),
                        ));
                    }
                }
            }
        }
        return Ok(def.ret.descriptor());
    }

    let proc = symbols.lookup_procedure(name).ok_or_else(|| {
        InferError::new(
            DiagnosticKind::UndefinedIdentifier,
            loc,
            format!("undefined function `{}`", name),
        )
    })?;
    let ret = proc.return_type.clone().ok_or_else(|| {
        InferError::new(
            DiagnosticKind::TypeMismatch,
            loc,
            format!("SUB `{}` used as a value", name),
        )
    })?;
    if args.len() != proc.params.len() {
        return Err(InferError::new(
            DiagnosticKind::WrongArgumentCount,
            loc,
            format!(
                "`{}` takes {} argument(s), {} given",
                name,
                proc.params.len(),
                args.len()
            ),
        ));
    }
    for arg in args {
        infer_expr(symbols, scope, arg)?;
    }
    Ok(ret)
}

/// Fold an expression to a constant, when it is one. Used for CONST
/// declarations, CATCH codes, and range diagnostics.
pub fn const_eval(symbols: &SymbolTable, expr: &Expr) -> Option<ConstValue> {
    match &expr.kind {
        ExprKind::IntLiteral(v) => Some(ConstValue::Int(*v)),
        ExprKind::FloatLiteral(v) => Some(ConstValue::Float(*v)),
        ExprKind::StringLiteral(s) => Some(ConstValue::Str(s.clone())),
        ExprKind::Variable(name) => symbols.lookup_constant(name).map(|c| c.value.clone()),
        ExprKind::Unary { op, expr: inner } => {
            let v = const_eval(symbols, inner)?;
            match (op, v) {
                (UnaryOp::Neg, ConstValue::Int(i)) => Some(ConstValue::Int(i.wrapping_neg())),
                (UnaryOp::Neg, ConstValue::Float(f)) => Some(ConstValue::Float(-f)),
                (UnaryOp::Not, ConstValue::Int(i)) => Some(ConstValue::Int(!i)),
                _ => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let l = const_eval(symbols, lhs)?;
            let r = const_eval(symbols, rhs)?;
            match (l, r) {
                (ConstValue::Int(a), ConstValue::Int(b)) => const_int_op(*op, a, b),
                (ConstValue::Float(a), ConstValue::Float(b)) => const_float_op(*op, a, b),
                (ConstValue::Int(a), ConstValue::Float(b)) => const_float_op(*op, a as f64, b),
                (ConstValue::Float(a), ConstValue::Int(b)) => const_float_op(*op, a, b as f64),
                (ConstValue::Str(a), ConstValue::Str(b)) if *op == BinaryOp::Add => {
                    Some(ConstValue::Str(format!("{}{}", a, b)))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn const_int_op(op: BinaryOp, a: i64, b: i64) -> Option<ConstValue> {
    Some(ConstValue::Int(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::IntDiv => {
            if b == 0 {
                return None;
            }
            a.wrapping_div(b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return None;
            }
            a.wrapping_rem(b)
        }
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Eq => (a == b) as i64,
        BinaryOp::Ne => (a != b) as i64,
        BinaryOp::Lt => (a < b) as i64,
        BinaryOp::Le => (a <= b) as i64,
        BinaryOp::Gt => (a > b) as i64,
        BinaryOp::Ge => (a >= b) as i64,
        BinaryOp::Div => return None,
    }))
}

fn const_float_op(op: BinaryOp, a: f64, b: f64) -> Option<ConstValue> {
    Some(match op {
        BinaryOp::Add => ConstValue::Float(a + b),
        BinaryOp::Sub => ConstValue::Float(a - b),
        BinaryOp::Mul => ConstValue::Float(a * b),
        BinaryOp::Div => ConstValue::Float(a / b),
        BinaryOp::Eq => ConstValue::Int((a == b) as i64),
        BinaryOp::Ne => ConstValue::Int((a != b) as i64),
        BinaryOp::Lt => ConstValue::Int((a < b) as i64),
        BinaryOp::Le => ConstValue::Int((a <= b) as i64),
        BinaryOp::Gt => ConstValue::Int((a > b) as i64),
        BinaryOp::Ge => ConstValue::Int((a >= b) as i64),
        _ => return None,
    })
}

fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

/// Labels and line numbers present in one procedure body, for jump
/// target validation.
#[derive(Debug, Default)]
struct JumpTargets {
    lines: HashSet<u32>,
    labels: HashSet<String>,
}

impl JumpTargets {
    fn contains(&self, t: &JumpTarget) -> bool {
        match t {
            JumpTarget::Line(n) => self.lines.contains(n),
            JumpTarget::Label(s) => self.labels.contains(s),
        }
    }
}

pub struct SemanticAnalyzer {
    symbols: SymbolTable,
    diags: Diagnostics,
    /// scope key prefix -> collected jump targets
    targets: HashMap<String, JumpTargets>,
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        SemanticAnalyzer {
            symbols: SymbolTable::new(),
            diags: Diagnostics::new(),
            targets: HashMap::new(),
        }
    }

    /// Run both passes. The symbol table is complete afterwards even when
    /// diagnostics carry errors; the driver decides whether to continue.
    pub fn analyze(mut self, program: &Program, data: &DataValues) -> (SymbolTable, Diagnostics) {
        debug!("semantic pass 1: declarations");
        self.collect_records(program);
        self.collect_globals_and_consts(program);
        self.collect_procedures(program);
        self.collect_dims(&program.statements, &Scope::global());
        self.collect_jump_targets(program);

        debug!("semantic pass 2: validation");
        self.check_stmts(
            &program.statements,
            &Scope::global(),
            None,
        );
        self.validate_restores(program, data);
        (self.symbols, self.diags)
    }

    // ---- pass 1 ----

    fn collect_records(&mut self, program: &Program) {
        for stmt in &program.statements {
            let StatementKind::TypeDecl { name, fields } = &stmt.kind else {
                continue;
            };
            let mut offset = 0u64;
            let mut rec_fields = Vec::with_capacity(fields.len());
            let mut seen = HashSet::new();
            for field in fields {
                if !seen.insert(field.name.clone()) {
                    self.diags.error(
                        DiagnosticKind::DuplicateDeclaration,
                        stmt.loc.clone(),
                        format!("duplicate field `{}` in TYPE {}", field.name, name),
                    );
                    continue;
                }
                let ty = match resolve_type_name(&self.symbols, &field.type_name, &stmt.loc) {
                    Ok(t) => t,
                    Err(e) => {
                        self.diags.error(e.kind, e.loc, e.message);
                        continue;
                    }
                };
                let size = if ty.is_record() {
                    self.symbols
                        .record_by_id(ty.record_id)
                        .map(|r| r.size)
                        .unwrap_or(8)
                } else {
                    ty.scalar_size()
                };
                rec_fields.push(RecordField {
                    name: field.name.clone(),
                    ty,
                    offset,
                });
                offset = align8(offset + size);
            }
            if self
                .symbols
                .declare_record(name, rec_fields, offset, stmt.loc.clone())
                .is_none()
            {
                self.diags.error(
                    DiagnosticKind::DuplicateDeclaration,
                    stmt.loc.clone(),
                    format!("TYPE `{}` is already declared", name),
                );
            }
        }
    }

    fn decl_type(
        &mut self,
        decl: &VarDecl,
        loc: &SourceLocation,
    ) -> TypeDescriptor {
        if let Some(tn) = &decl.type_name {
            match resolve_type_name(&self.symbols, tn, loc) {
                Ok(t) => t,
                Err(e) => {
                    self.diags.error(e.kind, e.loc, e.message);
                    TypeDescriptor::unknown()
                }
            }
        } else {
            suffix_type(&decl.name).unwrap_or_else(TypeDescriptor::double)
        }
    }

    fn collect_globals_and_consts(&mut self, program: &Program) {
        for stmt in &program.statements {
            match &stmt.kind {
                StatementKind::Global { decls } => {
                    for decl in decls {
                        let ty = self.decl_type(decl, &stmt.loc);
                        let ok = if decl.bounds.is_empty() {
                            self.symbols.declare_global(&decl.name, ty, stmt.loc.clone())
                        } else {
                            self.symbols.declare_array(
                                &Scope::global(),
                                &decl.name,
                                ty,
                                decl.bounds.len(),
                                true,
                                stmt.loc.clone(),
                            )
                        };
                        if !ok {
                            self.diags.error(
                                DiagnosticKind::DuplicateDeclaration,
                                stmt.loc.clone(),
                                format!("GLOBAL `{}` is already declared", decl.name),
                            );
                        }
                    }
                }
                StatementKind::Const { name, value } => {
                    self.declare_const(name, value, &stmt.loc);
                }
                _ => {}
            }
        }
        // CONST inside a procedure is still module-visible
        for proc in program.procedures() {
            for stmt in &proc.body {
                if let StatementKind::Const { name, value } = &stmt.kind {
                    self.declare_const(name, value, &stmt.loc);
                }
            }
        }
    }

    fn declare_const(&mut self, name: &str, value: &Expr, loc: &SourceLocation) {
        let Some(v) = const_eval(&self.symbols, value) else {
            self.diags.error(
                DiagnosticKind::OutOfRangeConstant,
                loc.clone(),
                format!("CONST `{}` is not a constant expression", name),
            );
            return;
        };
        let ty = match &v {
            ConstValue::Int(i) => integer_literal_type(*i),
            ConstValue::Float(_) => TypeDescriptor::double(),
            ConstValue::Str(_) => TypeDescriptor::string(),
        };
        let ok = self.symbols.declare_constant(ConstantInfo {
            name: name.to_string(),
            ty,
            value: v,
            loc: loc.clone(),
        });
        if !ok {
            self.diags.error(
                DiagnosticKind::DuplicateDeclaration,
                loc.clone(),
                format!("CONST `{}` is already declared", name),
            );
        }
    }

    fn collect_procedures(&mut self, program: &Program) {
        for stmt in &program.statements {
            let (proc, is_function) = match &stmt.kind {
                StatementKind::Sub(p) => (p, false),
                StatementKind::Function(p) => (p, true),
                _ => continue,
            };
            let scope = Scope::function(&proc.name);
            let mut params = Vec::with_capacity(proc.params.len());
            for p in &proc.params {
                let ty = match resolve_type_name(&self.symbols, &p.type_name, &stmt.loc) {
                    Ok(t) => t,
                    Err(e) => {
                        self.diags.error(e.kind, e.loc, e.message);
                        TypeDescriptor::unknown()
                    }
                };
                // records always travel by reference
                let byref = p.byref || ty.is_record();
                // the emitter looks parameters up by name like any variable
                if !self
                    .symbols
                    .declare_variable(&scope, &p.name, ty.clone(), stmt.loc.clone())
                {
                    self.diags.error(
                        DiagnosticKind::DuplicateDeclaration,
                        stmt.loc.clone(),
                        format!("duplicate parameter `{}` in `{}`", p.name, proc.name),
                    );
                }
                params.push(ParamInfo {
                    name: p.name.clone(),
                    ty,
                    byref,
                });
            }
            let return_type = match &proc.return_type {
                Some(tn) => match resolve_type_name(&self.symbols, tn, &stmt.loc) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        self.diags.error(e.kind, e.loc, e.message);
                        Some(TypeDescriptor::unknown())
                    }
                },
                // an undeclared FUNCTION type follows the name's suffix
                None if is_function => {
                    Some(suffix_type(&proc.name).unwrap_or_else(TypeDescriptor::double))
                }
                None => None,
            };
            if let Some(rt) = &return_type
                && rt.is_record()
            {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    stmt.loc.clone(),
                    format!("FUNCTION `{}` cannot return a record", proc.name),
                );
            }
            if let Some(ret) = &return_type {
                // the function's return slot reads and writes by its own name
                self.symbols
                    .declare_variable(&scope, &proc.name, ret.clone(), stmt.loc.clone());
            }
            let ok = self.symbols.declare_procedure(ProcedureInfo {
                name: proc.name.clone(),
                params,
                return_type,
                loc: stmt.loc.clone(),
            });
            if !ok {
                self.diags.error(
                    DiagnosticKind::DuplicateDeclaration,
                    stmt.loc.clone(),
                    format!("procedure `{}` is already declared", proc.name),
                );
            }
        }
    }

    /// Collect DIM and LOCAL declarations, recursing through structured
    /// statements. The declaring scope follows the lexical nesting.
    fn collect_dims(&mut self, stmts: &[Statement], scope: &Scope) {
        for stmt in stmts {
            match &stmt.kind {
                StatementKind::Dim { decls } | StatementKind::Local { decls } => {
                    for decl in decls {
                        let ty = self.decl_type(decl, &stmt.loc);
                        let ok = if decl.bounds.is_empty() {
                            self.symbols
                                .declare_variable(scope, &decl.name, ty, stmt.loc.clone())
                        } else {
                            self.symbols.declare_array(
                                scope,
                                &decl.name,
                                ty,
                                decl.bounds.len(),
                                false,
                                stmt.loc.clone(),
                            )
                        };
                        if !ok {
                            self.diags.error(
                                DiagnosticKind::DuplicateDeclaration,
                                stmt.loc.clone(),
                                format!("`{}` is already declared", decl.name),
                            );
                        }
                    }
                }
                StatementKind::Sub(p) | StatementKind::Function(p) => {
                    let inner = Scope::function(&p.name);
                    self.collect_dims(&p.body, &inner);
                }
                StatementKind::If { arms, else_body } => {
                    for arm in arms {
                        self.collect_dims(&arm.body, scope);
                    }
                    self.collect_dims(else_body, scope);
                }
                StatementKind::While { body, .. }
                | StatementKind::DoLoop { body, .. }
                | StatementKind::For { body, .. } => self.collect_dims(body, scope),
                StatementKind::Select {
                    arms, else_body, ..
                } => {
                    for arm in arms {
                        self.collect_dims(&arm.body, scope);
                    }
                    self.collect_dims(else_body, scope);
                }
                StatementKind::Try {
                    body,
                    catches,
                    finally,
                } => {
                    self.collect_dims(body, scope);
                    for c in catches {
                        self.collect_dims(&c.body, scope);
                    }
                    self.collect_dims(finally, scope);
                }
                _ => {}
            }
        }
    }

    fn collect_jump_targets(&mut self, program: &Program) {
        let main: Vec<&Statement> = program.main_statements().collect();
        let mut t = JumpTargets::default();
        Self::gather_targets(&main, &mut t);
        self.targets.insert(Scope::global().key(""), t);
        for proc in program.procedures() {
            let body: Vec<&Statement> = proc.body.iter().collect();
            let mut t = JumpTargets::default();
            Self::gather_targets(&body, &mut t);
            self.targets.insert(Scope::function(&proc.name).key(""), t);
        }
    }

    fn gather_targets(stmts: &[&Statement], out: &mut JumpTargets) {
        for stmt in stmts {
            if let Some(n) = stmt.line_number {
                out.lines.insert(n);
            }
            if let Some(l) = &stmt.label {
                out.labels.insert(l.clone());
            }
            for_each_nested(stmt, &mut |nested| {
                Self::gather_targets(&nested.iter().collect::<Vec<_>>(), out);
            });
        }
    }

    // ---- pass 2 ----

    fn scope_targets(&self, scope: &Scope) -> Option<&JumpTargets> {
        self.targets.get(&scope.key(""))
    }

    fn infer(&mut self, scope: &Scope, expr: &Expr) -> TypeDescriptor {
        match infer_expr(&self.symbols, scope, expr) {
            Ok(t) => t,
            Err(e) => {
                self.diags.error(e.kind, e.loc, e.message);
                TypeDescriptor::unknown()
            }
        }
    }

    /// The three coercion sites (assignment, argument passing, return)
    /// funnel through here.
    fn validate_assignment(
        &mut self,
        lhs: &TypeDescriptor,
        rhs: &TypeDescriptor,
        loc: &SourceLocation,
    ) -> bool {
        if lhs.base == BaseType::Unknown || rhs.base == BaseType::Unknown {
            // inference already reported the real problem
            return false;
        }
        match check_coercion(rhs, lhs) {
            Coercion::Identical | Coercion::ImplicitSafe => true,
            Coercion::ImplicitLossy => {
                self.diags.warning(
                    DiagnosticKind::LossyConversion,
                    loc.clone(),
                    format!("implicit conversion {} -> {} may lose information", rhs, lhs),
                );
                true
            }
            Coercion::ExplicitRequired => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    loc.clone(),
                    format!("cannot implicitly convert {} -> {}", rhs, lhs),
                );
                false
            }
            Coercion::Incompatible => {
                self.diags.error(
                    DiagnosticKind::TypeMismatch,
                    loc.clone(),
                    format!("incompatible types {} -> {}", rhs, lhs),
                );
                false
            }
        }
    }

    /// Declare a variable on first assignment, QB style: suffix wins, then
    /// the initializer's family picks a sensible width.
    fn implicit_declare(
        &mut self,
        scope: &Scope,
        name: &str,
        init: Option<&TypeDescriptor>,
        loc: &SourceLocation,
    ) {
        let ty = suffix_type(name).unwrap_or_else(|| match init {
            Some(t) if t.is_string() => TypeDescriptor::string(),
            Some(t) if t.is_float() => TypeDescriptor::double(),
            Some(t) if t.is_integer() => {
                if t.bit_width() > 32 {
                    TypeDescriptor::long()
                } else {
                    TypeDescriptor::integer()
                }
            }
            Some(t) if t.is_record() => t.clone(),
            _ => TypeDescriptor::double(),
        });
        self.symbols.declare_variable(scope, name, ty, loc.clone());
    }

    /// Make sure an assignment/INPUT/READ target resolves, implicitly
    /// declaring plain variables, and return its type.
    fn target_type(
        &mut self,
        scope: &Scope,
        target: &Expr,
        init: Option<&TypeDescriptor>,
    ) -> Option<TypeDescriptor> {
        match &target.kind {
            ExprKind::Variable(name) => {
                if self.symbols.lookup_constant(name).is_some() {
                    self.diags.error(
                        DiagnosticKind::InvalidTarget,
                        target.loc.clone(),
                        format!("cannot assign to constant `{}`", name),
                    );
                    return None;
                }
                if self.symbols.lookup_variable(scope, name).is_none() {
                    self.implicit_declare(scope, name, init, &target.loc);
                }
                Some(self.infer(scope, target))
            }
            ExprKind::ArrayElem { .. } | ExprKind::Member { .. } => Some(self.infer(scope, target)),
            _ => {
                self.diags.error(
                    DiagnosticKind::InvalidTarget,
                    target.loc.clone(),
                    "assignment target must be a variable, array element, or field".to_string(),
                );
                None
            }
        }
    }

    fn check_condition(&mut self, scope: &Scope, cond: &Expr) {
        let t = self.infer(scope, cond);
        if t.base != BaseType::Unknown && !t.is_numeric() {
            self.diags.error(
                DiagnosticKind::TypeMismatch,
                cond.loc.clone(),
                format!("condition must be numeric, got {}", t),
            );
        }
    }

    fn check_call_args(
        &mut self,
        proc_name: &str,
        args: &[Expr],
        scope: &Scope,
        loc: &SourceLocation,
    ) {
        let Some(proc) = self.symbols.lookup_procedure(proc_name) else {
            self.diags.error(
                DiagnosticKind::UndefinedIdentifier,
                loc.clone(),
                format!("undefined procedure `{}`", proc_name),
            );
            return;
        };
        let params = proc.params.clone();
        if args.len() != params.len() {
            self.diags.error(
                DiagnosticKind::WrongArgumentCount,
                loc.clone(),
                format!(
                    "`{}` takes {} argument(s), {} given",
                    proc_name,
                    params.len(),
                    args.len()
                ),
            );
            return;
        }
        for (arg, param) in args.iter().zip(params.iter()) {
            let at = self.infer(scope, arg);
            if param.byref
                && !matches!(
                    arg.kind,
                    ExprKind::Variable(_) | ExprKind::ArrayElem { .. } | ExprKind::Member { .. }
                )
            {
                self.diags.error(
                    DiagnosticKind::InvalidTarget,
                    arg.loc.clone(),
                    format!("argument for BYREF parameter `{}` must be addressable", param.name),
                );
                continue;
            }
            self.validate_assignment(&param.ty, &at, &arg.loc);
        }
    }

    fn check_stmts(&mut self, stmts: &[Statement], scope: &Scope, proc: Option<&str>) {
        for stmt in stmts {
            self.check_stmt(stmt, scope, proc);
        }
    }

    fn check_stmt(&mut self, stmt: &Statement, scope: &Scope, proc: Option<&str>) {
        match &stmt.kind {
            StatementKind::Let { target, value } => {
                let vt = self.infer(scope, value);
                if let Some(tt) = self.target_type(scope, target, Some(&vt)) {
                    self.validate_assignment(&tt, &vt, &stmt.loc);
                }
            }
            StatementKind::Dim { decls } | StatementKind::Local { decls } => {
                if matches!(stmt.kind, StatementKind::Local { .. }) && proc.is_none() {
                    self.diags.error(
                        DiagnosticKind::OutsideProcedure,
                        stmt.loc.clone(),
                        "LOCAL outside a procedure".to_string(),
                    );
                }
                for decl in decls {
                    for bound in &decl.bounds {
                        if let Some(lo) = &bound.lower {
                            self.check_condition(scope, lo);
                        }
                        self.check_condition(scope, &bound.upper);
                    }
                }
            }
            StatementKind::Redim { name, bounds, .. } => {
                match self.symbols.lookup_array(scope, name) {
                    None => self.diags.error(
                        DiagnosticKind::UndefinedIdentifier,
                        stmt.loc.clone(),
                        format!("REDIM of undeclared array `{}`", name),
                    ),
                    Some(a) if a.rank != bounds.len() => {
                        let rank = a.rank;
                        self.diags.error(
                            DiagnosticKind::TypeMismatch,
                            stmt.loc.clone(),
                            format!(
                                "REDIM changes rank of `{}` from {} to {}",
                                name,
                                rank,
                                bounds.len()
                            ),
                        );
                    }
                    Some(_) => {}
                }
                for bound in bounds {
                    if let Some(lo) = &bound.lower {
                        self.check_condition(scope, lo);
                    }
                    self.check_condition(scope, &bound.upper);
                }
            }
            StatementKind::Erase { names } => {
                for name in names {
                    if self.symbols.lookup_array(scope, name).is_none() {
                        self.diags.error(
                            DiagnosticKind::UndefinedIdentifier,
                            stmt.loc.clone(),
                            format!("ERASE of undeclared array `{}`", name),
                        );
                    }
                }
            }
            StatementKind::Print { items } => {
                for item in items {
                    let t = self.infer(scope, &item.expr);
                    if t.base != BaseType::Unknown && !t.is_numeric() && !t.is_string() {
                        self.diags.error(
                            DiagnosticKind::TypeMismatch,
                            item.expr.loc.clone(),
                            format!("cannot PRINT a value of type {}", t),
                        );
                    }
                }
            }
            StatementKind::PrintUsing { format, args } => {
                let ft = self.infer(scope, format);
                if ft.base != BaseType::Unknown && !ft.is_string() {
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        format.loc.clone(),
                        "PRINT USING format must be a string".to_string(),
                    );
                }
                for arg in args {
                    self.infer(scope, arg);
                }
            }
            StatementKind::Input { targets, .. } | StatementKind::Read { targets } => {
                for target in targets {
                    self.target_type(scope, target, None);
                }
            }
            StatementKind::Restore { .. } => {} // validated against DATA tables separately
            StatementKind::If { arms, else_body } => {
                for arm in arms {
                    self.check_condition(scope, &arm.cond);
                    self.check_stmts(&arm.body, scope, proc);
                }
                self.check_stmts(else_body, scope, proc);
            }
            StatementKind::While { cond, body } => {
                self.check_condition(scope, cond);
                self.check_stmts(body, scope, proc);
            }
            StatementKind::DoLoop { test, body } => {
                self.check_condition(scope, test.cond());
                self.check_stmts(body, scope, proc);
            }
            StatementKind::For {
                var,
                from,
                to,
                step,
                body,
            } => {
                if self.symbols.lookup_variable(scope, var).is_none() {
                    // the counter is integral by construction
                    let ty = suffix_type(var).unwrap_or_else(TypeDescriptor::long);
                    self.symbols.declare_variable(scope, var, ty, stmt.loc.clone());
                }
                let vt = self.infer(
                    scope,
                    &Expr::new(ExprKind::Variable(var.clone()), stmt.loc.clone()),
                );
                if vt.base != BaseType::Unknown && !vt.is_numeric() {
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        stmt.loc.clone(),
                        format!("FOR counter `{}` must be numeric, is {}", var, vt),
                    );
                }
                self.check_condition(scope, from);
                self.check_condition(scope, to);
                if let Some(s) = step {
                    self.check_condition(scope, s);
                }
                self.check_stmts(body, scope, proc);
            }
            StatementKind::Select {
                selector,
                arms,
                else_body,
            } => {
                let st = self.infer(scope, selector);
                for arm in arms {
                    for label in &arm.labels {
                        let (lt, loc) = match label {
                            CaseLabel::Value(e) | CaseLabel::Is(_, e) => {
                                (self.infer(scope, e), &e.loc)
                            }
                            CaseLabel::Range(lo, hi) => {
                                let lot = self.infer(scope, lo);
                                self.infer(scope, hi);
                                (lot, &lo.loc)
                            }
                        };
                        let compatible = (st.is_numeric() && lt.is_numeric())
                            || (st.is_string() && lt.is_string())
                            || st.base == BaseType::Unknown
                            || lt.base == BaseType::Unknown;
                        if !compatible {
                            self.diags.error(
                                DiagnosticKind::TypeMismatch,
                                loc.clone(),
                                format!("CASE label type {} does not match selector {}", lt, st),
                            );
                        }
                    }
                    self.check_stmts(&arm.body, scope, proc);
                }
                self.check_stmts(else_body, scope, proc);
            }
            StatementKind::Try {
                body,
                catches,
                finally,
            } => {
                self.check_stmts(body, scope, proc);
                for c in catches {
                    if let Some(code) = &c.code
                        && !matches!(const_eval(&self.symbols, code), Some(ConstValue::Int(_)))
                    {
                        self.diags.error(
                            DiagnosticKind::OutOfRangeConstant,
                            code.loc.clone(),
                            "CATCH code must be a constant integer".to_string(),
                        );
                    }
                    self.check_stmts(&c.body, scope, proc);
                }
                self.check_stmts(finally, scope, proc);
            }
            StatementKind::Goto(t) | StatementKind::Gosub(t) => {
                self.check_jump_target(t, scope, &stmt.loc);
            }
            StatementKind::OnGoto { selector, targets }
            | StatementKind::OnGosub { selector, targets } => {
                self.check_condition(scope, selector);
                for t in targets {
                    self.check_jump_target(t, scope, &stmt.loc);
                }
            }
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    let vt = self.infer(scope, value);
                    let ret = proc
                        .and_then(|p| self.symbols.lookup_procedure(p))
                        .and_then(|p| p.return_type.clone());
                    match ret {
                        Some(rt) => {
                            self.validate_assignment(&rt, &vt, &stmt.loc);
                        }
                        None => self.diags.error(
                            DiagnosticKind::TypeMismatch,
                            stmt.loc.clone(),
                            "RETURN with a value outside a FUNCTION".to_string(),
                        ),
                    }
                }
            }
            StatementKind::Exit(kind) => {
                let wants_proc = matches!(kind, ExitKind::Sub | ExitKind::Function);
                if wants_proc && proc.is_none() {
                    self.diags.error(
                        DiagnosticKind::OutsideProcedure,
                        stmt.loc.clone(),
                        "EXIT SUB/FUNCTION outside a procedure".to_string(),
                    );
                }
            }
            StatementKind::Continue(_) | StatementKind::End => {}
            StatementKind::Throw(code) => {
                let t = self.infer(scope, code);
                if t.base != BaseType::Unknown && !t.is_integer() {
                    self.diags.error(
                        DiagnosticKind::TypeMismatch,
                        code.loc.clone(),
                        format!("THROW code must be an integer, got {}", t),
                    );
                }
            }
            StatementKind::Call { name, args } => {
                self.check_call_args(name, args, scope, &stmt.loc);
            }
            StatementKind::Sub(p) | StatementKind::Function(p) => {
                let inner = Scope::function(&p.name);
                self.check_stmts(&p.body, &inner, Some(&p.name));
            }
            StatementKind::TypeDecl { .. } => {
                if proc.is_some() {
                    self.diags.error(
                        DiagnosticKind::OutsideProcedure,
                        stmt.loc.clone(),
                        "TYPE declarations are only allowed at module level".to_string(),
                    );
                }
            }
            StatementKind::Global { .. } => {
                if proc.is_some() {
                    self.diags.error(
                        DiagnosticKind::OutsideProcedure,
                        stmt.loc.clone(),
                        "GLOBAL is only allowed at module level".to_string(),
                    );
                }
            }
            StatementKind::Shared { names } => {
                if proc.is_none() {
                    self.diags.error(
                        DiagnosticKind::OutsideProcedure,
                        stmt.loc.clone(),
                        "SHARED outside a procedure".to_string(),
                    );
                    return;
                }
                for name in names {
                    let known = self
                        .symbols
                        .lookup_variable(&Scope::global(), name)
                        .is_some()
                        || self.symbols.lookup_array(&Scope::global(), name).is_some();
                    if !known {
                        self.diags.error(
                            DiagnosticKind::UndefinedIdentifier,
                            stmt.loc.clone(),
                            format!("SHARED names unknown global `{}`", name),
                        );
                    }
                }
            }
            StatementKind::Const { .. } => {} // collected in pass 1
        }
    }

    fn check_jump_target(&mut self, target: &JumpTarget, scope: &Scope, loc: &SourceLocation) {
        let found = self
            .scope_targets(scope)
            .map(|t| t.contains(target))
            .unwrap_or(false);
        if !found {
            self.diags.error(
                DiagnosticKind::UnresolvedJumpTarget,
                loc.clone(),
                format!("jump target {} not found", target),
            );
        }
    }

    fn validate_restores(&mut self, program: &Program, data: &DataValues) {
        fn walk(
            stmts: &[Statement],
            data: &DataValues,
            diags: &mut Diagnostics,
        ) {
            for stmt in stmts {
                if let StatementKind::Restore { target: Some(t) } = &stmt.kind {
                    let known = match t {
                        JumpTarget::Line(n) => data.line_restore_points.contains_key(n),
                        JumpTarget::Label(l) => data.label_restore_points.contains_key(l),
                    };
                    if !known {
                        diags.error(
                            DiagnosticKind::UnresolvedJumpTarget,
                            stmt.loc.clone(),
                            format!("RESTORE target {} has no DATA", t),
                        );
                    }
                }
                for_each_nested(stmt, &mut |nested| walk(nested, data, diags));
            }
        }
        walk(&program.statements, data, &mut self.diags);
        for proc in program.procedures() {
            walk(&proc.body, data, &mut self.diags);
        }
    }
}

/// Invoke `f` on each nested statement list of a structured statement.
/// Procedure bodies are deliberately excluded; callers handle those.
pub fn for_each_nested<'a>(stmt: &'a Statement, f: &mut dyn FnMut(&'a [Statement])) {
    match &stmt.kind {
        StatementKind::If { arms, else_body } => {
            for arm in arms {
                f(&arm.body);
            }
            f(else_body);
        }
        StatementKind::While { body, .. }
        | StatementKind::DoLoop { body, .. }
        | StatementKind::For { body, .. } => f(body),
        StatementKind::Select {
            arms, else_body, ..
        } => {
            for arm in arms {
                f(&arm.body);
            }
            f(else_body);
        }
        StatementKind::Try {
            body,
            catches,
            finally,
        } => {
            f(body);
            for c in catches {
                f(&c.body);
            }
            f(finally);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn analyze(statements: Vec<Statement>) -> (SymbolTable, Diagnostics) {
        SemanticAnalyzer::new().analyze(&Program { statements }, &DataValues::default())
    }

    fn assign(name: &str, value: Expr) -> Statement {
        stmt(StatementKind::Let {
            target: expr(ExprKind::Variable(name.to_string())),
            value,
        })
    }

    #[test]
    fn test_implicit_declaration_follows_suffix() {
        let (symbols, diags) = analyze(vec![
            assign("A$", expr(ExprKind::StringLiteral("x".to_string()))),
            assign("n%", expr(ExprKind::IntLiteral(1))),
            assign("r", expr(ExprKind::FloatLiteral(1.5))),
            assign("k", expr(ExprKind::IntLiteral(2))),
        ]);
        assert!(!diags.has_errors(), "{}", diags);
        let g = Scope::global();
        assert!(symbols.lookup_variable(&g, "A$").unwrap().ty.is_string());
        assert_eq!(
            symbols.lookup_variable(&g, "n%").unwrap().ty.base,
            BaseType::Integer
        );
        assert_eq!(
            symbols.lookup_variable(&g, "r").unwrap().ty.base,
            BaseType::Double
        );
        assert_eq!(
            symbols.lookup_variable(&g, "k").unwrap().ty.base,
            BaseType::Integer
        );
    }

    #[test]
    fn test_record_offsets_are_eight_aligned() {
        let (symbols, diags) = analyze(vec![stmt(StatementKind::TypeDecl {
            name: "Mixed".to_string(),
            fields: vec![
                FieldDecl {
                    name: "flag".to_string(),
                    type_name: TypeName::Byte,
                },
                FieldDecl {
                    name: "count".to_string(),
                    type_name: TypeName::Integer,
                },
                FieldDecl {
                    name: "total".to_string(),
                    type_name: TypeName::Double,
                },
            ],
        })]);
        assert!(!diags.has_errors());
        let rec = symbols.lookup_record("Mixed").unwrap();
        let offsets: Vec<u64> = rec.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(rec.size, 24);
        assert!(rec.id > 0);
    }

    #[test]
    fn test_duplicate_record_is_an_error() {
        let decl = stmt(StatementKind::TypeDecl {
            name: "P".to_string(),
            fields: vec![FieldDecl {
                name: "x".to_string(),
                type_name: TypeName::Long,
            }],
        });
        let (_, diags) = analyze(vec![decl.clone(), decl]);
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("already declared"));
    }

    #[test]
    fn test_lossy_assignment_warns_but_compiles() {
        let (_, diags) = analyze(vec![
            stmt(StatementKind::Dim {
                decls: vec![
                    VarDecl {
                        name: "n".to_string(),
                        type_name: Some(TypeName::Integer),
                        bounds: vec![],
                    },
                    VarDecl {
                        name: "big".to_string(),
                        type_name: Some(TypeName::Long),
                        bounds: vec![],
                    },
                ],
            }),
            assign("n", expr(ExprKind::Variable("big".to_string()))),
        ]);
        assert!(!diags.has_errors());
        assert_eq!(diags.len(), 1);
        assert!(diags.to_string().contains("warning"));
    }

    #[test]
    fn test_string_to_number_requires_conversion() {
        let (_, diags) = analyze(vec![
            assign("n%", expr(ExprKind::IntLiteral(1))),
            assign("n%", expr(ExprKind::StringLiteral("5".to_string()))),
        ]);
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("STRING -> INTEGER"));
    }

    #[test]
    fn test_unknown_field_diagnostic() {
        let (_, diags) = analyze(vec![
            stmt(StatementKind::TypeDecl {
                name: "P".to_string(),
                fields: vec![FieldDecl {
                    name: "x".to_string(),
                    type_name: TypeName::Long,
                }],
            }),
            stmt(StatementKind::Dim {
                decls: vec![VarDecl {
                    name: "p".to_string(),
                    type_name: Some(TypeName::Record("P".to_string())),
                    bounds: vec![],
                }],
            }),
            stmt(StatementKind::Let {
                target: expr(ExprKind::Member {
                    base: Box::new(expr(ExprKind::Variable("p".to_string()))),
                    field: "y".to_string(),
                }),
                value: expr(ExprKind::IntLiteral(1)),
            }),
        ]);
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("no field `y`"));
    }

    #[test]
    fn test_wrong_argument_count() {
        let (_, diags) = analyze(vec![
            stmt(StatementKind::Sub(ProcDef {
                name: "S".to_string(),
                params: vec![Param {
                    name: "a".to_string(),
                    type_name: TypeName::Long,
                    byref: false,
                }],
                return_type: None,
                body: vec![],
            })),
            stmt(StatementKind::Call {
                name: "S".to_string(),
                args: vec![],
            }),
        ]);
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("takes 1 argument(s), 0 given"));
    }

    #[test]
    fn test_return_value_outside_function() {
        let (_, diags) = analyze(vec![stmt(StatementKind::Return(Some(expr(
            ExprKind::IntLiteral(1),
        ))))]);
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("outside a FUNCTION"));
    }

    #[test]
    fn test_local_outside_procedure() {
        let (_, diags) = analyze(vec![stmt(StatementKind::Local {
            decls: vec![VarDecl {
                name: "x".to_string(),
                type_name: Some(TypeName::Long),
                bounds: vec![],
            }],
        })]);
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("LOCAL outside a procedure"));
    }

    #[test]
    fn test_goto_target_checked_per_scope() {
        let mut target = stmt(StatementKind::End);
        target.line_number = Some(10);
        // the label lives in main; the procedure cannot jump to it
        let (_, diags) = analyze(vec![
            target,
            stmt(StatementKind::Sub(ProcDef {
                name: "S".to_string(),
                params: vec![],
                return_type: None,
                body: vec![stmt(StatementKind::Goto(JumpTarget::Line(10)))],
            })),
        ]);
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("line 10 not found"));
    }

    #[test]
    fn test_const_folding_and_case_insensitivity() {
        let (symbols, diags) = analyze(vec![
            stmt(StatementKind::Const {
                name: "MaxN".to_string(),
                value: expr(ExprKind::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(expr(ExprKind::IntLiteral(10))),
                    rhs: Box::new(expr(ExprKind::IntLiteral(5))),
                }),
            }),
            assign("k", expr(ExprKind::Variable("MAXN".to_string()))),
        ]);
        assert!(!diags.has_errors(), "{}", diags);
        match &symbols.lookup_constant("maxn").unwrap().value {
            ConstValue::Int(v) => assert_eq!(*v, 50),
            other => panic!("expected an int constant, got {:?}", other),
        }
    }

    #[test]
    fn test_function_return_var_in_scope() {
        let (symbols, diags) = analyze(vec![stmt(StatementKind::Function(ProcDef {
            name: "F".to_string(),
            params: vec![],
            return_type: Some(TypeName::Integer),
            body: vec![assign("F", expr(ExprKind::IntLiteral(3)))],
        }))]);
        assert!(!diags.has_errors(), "{}", diags);
        let f_scope = Scope::function("F");
        let ret = symbols.lookup_variable(&f_scope, "F").unwrap();
        assert_eq!(ret.ty.base, BaseType::Integer);
    }
}
