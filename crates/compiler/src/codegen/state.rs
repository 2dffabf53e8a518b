//! Emitter state and core types
//!
//! `CodeGen` accumulates four text buffers - record type definitions, the
//! module data section, the interned string pool, and function bodies -
//! that are concatenated in that order once every function is emitted.
//! QBE only allows `data` at module scope, so nothing here ever writes a
//! data item into the function buffer.

use crate::data::DataValues;
use crate::symbols::{Scope, SymbolTable};
use crate::types::TypeDescriptor;
use std::collections::HashMap;
use std::fmt::Write as _;

/// How a variable's slot temp relates to its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SlotKind {
    /// The temp IS the storage address (record locals)
    Direct,
    /// The temp is an 8-byte cell holding the value or pointer
    Indirect,
}

#[derive(Debug, Clone)]
pub(super) struct Slot {
    pub temp: String,
    pub ty: TypeDescriptor,
    pub kind: SlotKind,
}

/// An evaluated expression: the operand text (temp, literal, or symbol)
/// plus its resolved type. `owned` marks a string reference this statement
/// is responsible for releasing unless it stores it somewhere.
#[derive(Debug, Clone)]
pub(super) struct Value {
    pub temp: String,
    pub ty: TypeDescriptor,
    pub owned: bool,
}

impl Value {
    pub fn borrowed(temp: String, ty: TypeDescriptor) -> Self {
        Value {
            temp,
            ty,
            owned: false,
        }
    }

    pub fn owned(temp: String, ty: TypeDescriptor) -> Self {
        Value {
            temp,
            ty,
            owned: true,
        }
    }
}

/// Mangle a BASIC identifier into a QBE-safe name. Type sigils become
/// suffix letters; anything else unusual is hex-escaped.
pub(super) fn mangle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '$' => out.push_str("_s"),
            '%' => out.push_str("_i"),
            '&' => out.push_str("_l"),
            '!' => out.push_str("_f"),
            '#' => out.push_str("_d"),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => out.push(c),
            c => {
                let _ = write!(out, "_x{:02X}_", c as u32);
            }
        }
    }
    out
}

pub struct CodeGen<'a> {
    pub(super) symbols: &'a SymbolTable,
    pub(super) data: &'a DataValues,

    // module-level buffers, concatenated at the end
    pub(super) type_section: String,
    pub(super) data_section: String,
    pub(super) string_pool: String,
    pub(super) output: String,

    pub(super) temp_counter: usize,
    pub(super) aux_label_counter: usize,
    pub(super) string_counter: usize,
    /// string content -> pool label (deduplicated)
    pub(super) string_constants: HashMap<String, String>,

    // per-function state, reset by each function's prologue
    pub(super) scope: Scope,
    pub(super) slots: HashMap<String, Slot>,
    /// SELECT id -> selector type, recorded when the selector is stashed
    pub(super) select_types: HashMap<u32, TypeDescriptor>,
    /// owned string temps to release when the current statement finishes
    pub(super) stmt_strings: Vec<String>,
    /// slot temps of local string variables, released in tidy_exit
    pub(super) local_strings: Vec<String>,
    /// slot temps of local arrays, erased in tidy_exit
    pub(super) local_arrays: Vec<String>,
}

impl<'a> CodeGen<'a> {
    pub fn new(symbols: &'a SymbolTable, data: &'a DataValues) -> Self {
        CodeGen {
            symbols,
            data,
            type_section: String::new(),
            data_section: String::new(),
            string_pool: String::new(),
            output: String::new(),
            temp_counter: 0,
            aux_label_counter: 0,
            string_counter: 0,
            string_constants: HashMap::new(),
            scope: Scope::global(),
            slots: HashMap::new(),
            select_types: HashMap::new(),
            stmt_strings: Vec::new(),
            local_strings: Vec::new(),
            local_arrays: Vec::new(),
        }
    }

    pub(super) fn fresh_temp(&mut self) -> String {
        self.temp_counter += 1;
        format!("%t{}", self.temp_counter)
    }

    /// Label for emitter-synthesized sub-steps of a terminator (push
    /// guards, switch trampolines). Not CFG blocks.
    pub(super) fn fresh_aux_label(&mut self, hint: &str) -> String {
        self.aux_label_counter += 1;
        format!("{}_{}", hint, self.aux_label_counter)
    }

    /// Intern a string literal into the module string pool, returning its
    /// `$label`. Data items may only appear at module scope; the pool
    /// buffer keeps literal text out of function bodies.
    pub(super) fn string_global(&mut self, content: &str) -> String {
        if let Some(label) = self.string_constants.get(content) {
            return label.clone();
        }
        let label = format!("$str_{}", self.string_counter);
        self.string_counter += 1;
        let mut item = String::new();
        let _ = write!(item, "data {} = {{ ", label);
        let mut in_quote = false;
        for b in content.bytes() {
            let printable = (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\';
            if printable {
                if !in_quote {
                    item.push_str("b \"");
                    in_quote = true;
                }
                item.push(b as char);
            } else {
                if in_quote {
                    item.push_str("\", ");
                    in_quote = false;
                }
                let _ = write!(item, "b {}, ", b);
            }
        }
        if in_quote {
            item.push_str("\", ");
        }
        item.push_str("b 0 }\n");
        self.string_pool.push_str(&item);
        self.string_constants.insert(content.to_string(), label.clone());
        label
    }

    /// Forget per-function state before emitting the next function.
    pub(super) fn reset_function(&mut self, scope: Scope) {
        self.scope = scope;
        self.slots.clear();
        self.select_types.clear();
        self.stmt_strings.clear();
        self.local_strings.clear();
        self.local_arrays.clear();
    }

    /// Release every owned string temp the current statement left behind.
    pub(super) fn flush_stmt_strings(&mut self) -> Result<(), std::fmt::Error> {
        let pending = std::mem::take(&mut self.stmt_strings);
        for temp in pending {
            writeln!(
                self.output,
                "\tcall ${}(l {})",
                super::runtime::STRING_RELEASE,
                temp
            )?;
        }
        Ok(())
    }

    /// Transfer ownership of a string value to a store: an owned temp is
    /// simply removed from the pending-release list, a borrowed one gets a
    /// retain.
    pub(super) fn take_string_ownership(&mut self, v: &Value) -> Result<(), std::fmt::Error> {
        if v.owned {
            self.stmt_strings.retain(|t| t != &v.temp);
        } else {
            writeln!(
                self.output,
                "\tcall ${}(l {})",
                super::runtime::STRING_RETAIN,
                v.temp
            )?;
        }
        Ok(())
    }
}
