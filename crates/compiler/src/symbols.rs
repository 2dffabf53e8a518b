//! Scoped symbol table
//!
//! Separate maps for variables, arrays, procedures, record types, and
//! constants. Variables and arrays are keyed by a scope-qualified string so
//! a global and a function local with the same name coexist as distinct
//! bindings. The table is mutated only during semantic analysis; the CFG
//! builder and emitter read it afterwards.

use crate::ast::SourceLocation;
use crate::types::TypeDescriptor;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Global,
    Function,
}

/// Where a binding lives. `block` is reserved for block-granular scoping;
/// BASIC procedures are flat so it stays 0 today.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: String,
    pub block: u32,
}

impl Scope {
    pub fn global() -> Self {
        Scope {
            kind: ScopeKind::Global,
            name: String::new(),
            block: 0,
        }
    }

    pub fn function(name: &str) -> Self {
        Scope {
            kind: ScopeKind::Function,
            name: name.to_string(),
            block: 0,
        }
    }

    pub fn is_global(&self) -> bool {
        self.kind == ScopeKind::Global
    }

    /// Symbol-table key: `<kind>:<scopename>::<varname>`.
    pub fn key(&self, var: &str) -> String {
        match self.kind {
            ScopeKind::Global => format!("global:::{}", var),
            ScopeKind::Function => format!("function:{}::{}", self.name, var),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub scope: Scope,
    pub ty: TypeDescriptor,
    /// Dense index into the runtime global vector, for GLOBAL scalars
    pub global_slot: Option<u32>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub name: String,
    pub scope: Scope,
    /// Element type (never itself an array)
    pub element: TypeDescriptor,
    pub rank: usize,
    /// Declared via GLOBAL - descriptor lives in a module data slot
    pub global: bool,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub byref: bool,
}

#[derive(Debug, Clone)]
pub struct ProcedureInfo {
    pub name: String,
    pub params: Vec<ParamInfo>,
    /// Some for FUNCTION, None for SUB
    pub return_type: Option<TypeDescriptor>,
    pub loc: SourceLocation,
}

impl ProcedureInfo {
    pub fn is_function(&self) -> bool {
        self.return_type.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: String,
    pub ty: TypeDescriptor,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub name: String,
    pub id: u32,
    pub fields: Vec<RecordField>,
    pub size: u64,
    pub loc: SourceLocation,
}

impl RecordInfo {
    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct ConstantInfo {
    pub name: String,
    pub ty: TypeDescriptor,
    pub value: ConstValue,
    pub loc: SourceLocation,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    variables: HashMap<String, VariableInfo>,
    arrays: HashMap<String, ArrayInfo>,
    procedures: HashMap<String, ProcedureInfo>,
    records: HashMap<String, RecordInfo>,
    /// Keyed by uppercased name - constants are case-insensitive
    constants: HashMap<String, ConstantInfo>,
    next_record_id: u32,
    global_slots: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- variables ----

    /// Declare a variable; returns false when the exact binding already
    /// exists (duplicate declaration in the same scope).
    pub fn declare_variable(
        &mut self,
        scope: &Scope,
        name: &str,
        ty: TypeDescriptor,
        loc: SourceLocation,
    ) -> bool {
        let key = scope.key(name);
        if self.variables.contains_key(&key) {
            return false;
        }
        self.variables.insert(
            key,
            VariableInfo {
                name: name.to_string(),
                scope: scope.clone(),
                ty,
                global_slot: None,
                loc,
            },
        );
        true
    }

    /// Declare a GLOBAL scalar, assigning it the next dense slot index.
    pub fn declare_global(
        &mut self,
        name: &str,
        ty: TypeDescriptor,
        loc: SourceLocation,
    ) -> bool {
        let scope = Scope::global();
        let key = scope.key(name);
        if self.variables.contains_key(&key) {
            return false;
        }
        let slot = self.global_slots;
        self.global_slots += 1;
        self.variables.insert(
            key,
            VariableInfo {
                name: name.to_string(),
                scope,
                ty,
                global_slot: Some(slot),
                loc,
            },
        );
        true
    }

    /// Resolve a variable: the enclosing function scope first, then the
    /// global scope. Exactly one binding wins.
    pub fn lookup_variable(&self, scope: &Scope, name: &str) -> Option<&VariableInfo> {
        if !scope.is_global()
            && let Some(v) = self.variables.get(&scope.key(name))
        {
            return Some(v);
        }
        self.variables.get(&Scope::global().key(name))
    }

    /// Resolve without the global fallback, for duplicate checks.
    pub fn variable_in_scope(&self, scope: &Scope, name: &str) -> Option<&VariableInfo> {
        self.variables.get(&scope.key(name))
    }

    pub fn variables_in(&self, scope: &Scope) -> impl Iterator<Item = &VariableInfo> {
        self.variables.values().filter(move |v| v.scope == *scope)
    }

    pub fn global_slot_count(&self) -> u32 {
        self.global_slots
    }

    // ---- arrays ----

    pub fn declare_array(
        &mut self,
        scope: &Scope,
        name: &str,
        element: TypeDescriptor,
        rank: usize,
        global: bool,
        loc: SourceLocation,
    ) -> bool {
        let key = scope.key(name);
        if self.arrays.contains_key(&key) {
            return false;
        }
        self.arrays.insert(
            key,
            ArrayInfo {
                name: name.to_string(),
                scope: scope.clone(),
                element,
                rank,
                global,
                loc,
            },
        );
        true
    }

    pub fn lookup_array(&self, scope: &Scope, name: &str) -> Option<&ArrayInfo> {
        if !scope.is_global()
            && let Some(a) = self.arrays.get(&scope.key(name))
        {
            return Some(a);
        }
        self.arrays.get(&Scope::global().key(name))
    }

    pub fn arrays_in(&self, scope: &Scope) -> impl Iterator<Item = &ArrayInfo> {
        self.arrays.values().filter(move |a| a.scope == *scope)
    }

    pub fn global_arrays(&self) -> impl Iterator<Item = &ArrayInfo> {
        self.arrays.values().filter(|a| a.global)
    }

    // ---- procedures ----

    pub fn declare_procedure(&mut self, info: ProcedureInfo) -> bool {
        if self.procedures.contains_key(&info.name) {
            return false;
        }
        self.procedures.insert(info.name.clone(), info);
        true
    }

    pub fn lookup_procedure(&self, name: &str) -> Option<&ProcedureInfo> {
        self.procedures.get(name)
    }

    // ---- record types ----

    /// Register a record type, assigning the next unique id.
    /// Fields arrive in declaration order with offsets already computed.
    pub fn declare_record(
        &mut self,
        name: &str,
        fields: Vec<RecordField>,
        size: u64,
        loc: SourceLocation,
    ) -> Option<u32> {
        if self.records.contains_key(name) {
            return None;
        }
        self.next_record_id += 1;
        let id = self.next_record_id;
        self.records.insert(
            name.to_string(),
            RecordInfo {
                name: name.to_string(),
                id,
                fields,
                size,
                loc,
            },
        );
        Some(id)
    }

    pub fn lookup_record(&self, name: &str) -> Option<&RecordInfo> {
        self.records.get(name)
    }

    pub fn record_by_id(&self, id: u32) -> Option<&RecordInfo> {
        self.records.values().find(|r| r.id == id)
    }

    pub fn records(&self) -> impl Iterator<Item = &RecordInfo> {
        self.records.values()
    }

    // ---- constants ----

    pub fn declare_constant(&mut self, info: ConstantInfo) -> bool {
        let key = info.name.to_uppercase();
        if self.constants.contains_key(&key) {
            return false;
        }
        self.constants.insert(key, info);
        true
    }

    pub fn lookup_constant(&self, name: &str) -> Option<&ConstantInfo> {
        self.constants.get(&name.to_uppercase())
    }

    /// Textual dump for the debug surface.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by_key(|r| r.id);
        for r in records {
            let _ = writeln!(out, "record {} #{} size={}", r.name, r.id, r.size);
            for f in &r.fields {
                let _ = writeln!(out, "  .{} : {} @{}", f.name, f.ty, f.offset);
            }
        }
        let mut vars: Vec<_> = self.variables.keys().collect();
        vars.sort();
        for key in vars {
            let v = &self.variables[key];
            match v.global_slot {
                Some(slot) => {
                    let _ = writeln!(out, "var {} : {} (global slot {})", key, v.ty, slot);
                }
                None => {
                    let _ = writeln!(out, "var {} : {}", key, v.ty);
                }
            }
        }
        let mut arrays: Vec<_> = self.arrays.keys().collect();
        arrays.sort();
        for key in arrays {
            let a = &self.arrays[key];
            let _ = writeln!(out, "array {} : {} rank={}", key, a.element, a.rank);
        }
        let mut procs: Vec<_> = self.procedures.keys().collect();
        procs.sort();
        for name in procs {
            let p = &self.procedures[name];
            let ret = p
                .return_type
                .as_ref()
                .map(|t| format!(" -> {}", t))
                .unwrap_or_default();
            let _ = writeln!(out, "proc {}({} params){}", name, p.params.len(), ret);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::default()
    }

    #[test]
    fn test_scope_keys_disambiguate() {
        let g = Scope::global();
        let f = Scope::function("F");
        assert_eq!(g.key("x"), "global:::x");
        assert_eq!(f.key("x"), "function:F::x");
        assert_ne!(g.key("x"), f.key("x"));
    }

    #[test]
    fn test_local_shadows_global_without_collision() {
        let mut t = SymbolTable::new();
        assert!(t.declare_global("x", TypeDescriptor::long(), loc()));
        let f = Scope::function("F");
        assert!(t.declare_variable(&f, "x", TypeDescriptor::integer(), loc()));

        // both bindings exist; the function scope resolves to the local
        let local = t.lookup_variable(&f, "x").unwrap();
        assert!(local.global_slot.is_none());
        let global = t.lookup_variable(&Scope::global(), "x").unwrap();
        assert_eq!(global.global_slot, Some(0));
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut t = SymbolTable::new();
        let g = Scope::global();
        assert!(t.declare_variable(&g, "n", TypeDescriptor::integer(), loc()));
        assert!(!t.declare_variable(&g, "n", TypeDescriptor::integer(), loc()));
    }

    #[test]
    fn test_global_slots_are_dense() {
        let mut t = SymbolTable::new();
        t.declare_global("a", TypeDescriptor::long(), loc());
        t.declare_global("b", TypeDescriptor::double(), loc());
        t.declare_global("c", TypeDescriptor::string(), loc());
        let g = Scope::global();
        assert_eq!(t.lookup_variable(&g, "a").unwrap().global_slot, Some(0));
        assert_eq!(t.lookup_variable(&g, "b").unwrap().global_slot, Some(1));
        assert_eq!(t.lookup_variable(&g, "c").unwrap().global_slot, Some(2));
        assert_eq!(t.global_slot_count(), 3);
    }

    #[test]
    fn test_record_identity_by_id() {
        let mut t = SymbolTable::new();
        let id1 = t.declare_record("Point", vec![], 0, loc()).unwrap();
        let id2 = t.declare_record("Size", vec![], 0, loc()).unwrap();
        assert_ne!(id1, id2);
        // name collision is an error
        assert!(t.declare_record("Point", vec![], 0, loc()).is_none());
        assert_eq!(t.record_by_id(id1).unwrap().name, "Point");
    }

    #[test]
    fn test_constants_fold_case() {
        let mut t = SymbolTable::new();
        assert!(t.declare_constant(ConstantInfo {
            name: "MaxLines".to_string(),
            ty: TypeDescriptor::integer(),
            value: ConstValue::Int(500),
            loc: loc(),
        }));
        assert!(t.lookup_constant("MAXLINES").is_some());
        assert!(t.lookup_constant("maxlines").is_some());
        assert!(!t.declare_constant(ConstantInfo {
            name: "MAXLINES".to_string(),
            ty: TypeDescriptor::integer(),
            value: ConstValue::Int(1),
            loc: loc(),
        }));
    }
}
