//! Built-in function registry
//!
//! Maps BASIC builtin names to their parameter shapes, result types, and
//! runtime entry points. Pure conversions (CINT and friends) have no
//! runtime symbol; the emitter lowers them to cast instructions.

use crate::types::TypeDescriptor;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSpec {
    /// Any string expression
    Str,
    /// Any numeric expression
    Num,
    /// Numeric, coerced to LONG at the call
    Int,
    /// The bare name of a declared array (LBOUND/UBOUND)
    ArrayName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetSpec {
    Str,
    Long,
    Integer,
    Single,
    Double,
}

impl RetSpec {
    pub fn descriptor(self) -> TypeDescriptor {
        match self {
            RetSpec::Str => TypeDescriptor::string(),
            RetSpec::Long => TypeDescriptor::long(),
            RetSpec::Integer => TypeDescriptor::integer(),
            RetSpec::Single => TypeDescriptor::single(),
            RetSpec::Double => TypeDescriptor::double(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuiltinDef {
    pub name: &'static str,
    /// Runtime entry point; None when the emitter lowers the call inline
    pub symbol: Option<&'static str>,
    pub params: &'static [ParamSpec],
    /// Trailing parameters may be omitted down to this count
    pub min_args: usize,
    pub ret: RetSpec,
}

static DEFS: &[BuiltinDef] = &[
    BuiltinDef {
        name: "LEN",
        symbol: Some("string_length"),
        params: &[ParamSpec::Str],
        min_args: 1,
        ret: RetSpec::Long,
    },
    BuiltinDef {
        name: "MID$",
        symbol: Some("string_mid"),
        params: &[ParamSpec::Str, ParamSpec::Int, ParamSpec::Int],
        min_args: 2,
        ret: RetSpec::Str,
    },
    BuiltinDef {
        name: "LEFT$",
        symbol: Some("string_left"),
        params: &[ParamSpec::Str, ParamSpec::Int],
        min_args: 2,
        ret: RetSpec::Str,
    },
    BuiltinDef {
        name: "RIGHT$",
        symbol: Some("string_right"),
        params: &[ParamSpec::Str, ParamSpec::Int],
        min_args: 2,
        ret: RetSpec::Str,
    },
    BuiltinDef {
        name: "INSTR",
        symbol: Some("string_instr"),
        params: &[ParamSpec::Str, ParamSpec::Str],
        min_args: 2,
        ret: RetSpec::Long,
    },
    BuiltinDef {
        name: "UCASE$",
        symbol: Some("string_upper"),
        params: &[ParamSpec::Str],
        min_args: 1,
        ret: RetSpec::Str,
    },
    BuiltinDef {
        name: "LCASE$",
        symbol: Some("string_lower"),
        params: &[ParamSpec::Str],
        min_args: 1,
        ret: RetSpec::Str,
    },
    BuiltinDef {
        name: "TRIM$",
        symbol: Some("string_trim"),
        params: &[ParamSpec::Str],
        min_args: 1,
        ret: RetSpec::Str,
    },
    BuiltinDef {
        name: "CHR$",
        symbol: Some("string_from_char"),
        params: &[ParamSpec::Int],
        min_args: 1,
        ret: RetSpec::Str,
    },
    // lowered to string_char_at(s, 0)
    BuiltinDef {
        name: "ASC",
        symbol: Some("string_char_at"),
        params: &[ParamSpec::Str],
        min_args: 1,
        ret: RetSpec::Long,
    },
    // symbol picked by argument type: string_from_int / string_from_double
    BuiltinDef {
        name: "STR$",
        symbol: None,
        params: &[ParamSpec::Num],
        min_args: 1,
        ret: RetSpec::Str,
    },
    BuiltinDef {
        name: "VAL",
        symbol: Some("string_to_double"),
        params: &[ParamSpec::Str],
        min_args: 1,
        ret: RetSpec::Double,
    },
    BuiltinDef {
        name: "CINT",
        symbol: None,
        params: &[ParamSpec::Num],
        min_args: 1,
        ret: RetSpec::Integer,
    },
    BuiltinDef {
        name: "CLNG",
        symbol: None,
        params: &[ParamSpec::Num],
        min_args: 1,
        ret: RetSpec::Long,
    },
    BuiltinDef {
        name: "CSNG",
        symbol: None,
        params: &[ParamSpec::Num],
        min_args: 1,
        ret: RetSpec::Single,
    },
    BuiltinDef {
        name: "CDBL",
        symbol: None,
        params: &[ParamSpec::Num],
        min_args: 1,
        ret: RetSpec::Double,
    },
    BuiltinDef {
        name: "ERR",
        symbol: None,
        params: &[],
        min_args: 0,
        ret: RetSpec::Integer,
    },
    BuiltinDef {
        name: "LBOUND",
        symbol: Some("array_lbound"),
        params: &[ParamSpec::ArrayName, ParamSpec::Int],
        min_args: 1,
        ret: RetSpec::Long,
    },
    BuiltinDef {
        name: "UBOUND",
        symbol: Some("array_ubound"),
        params: &[ParamSpec::ArrayName, ParamSpec::Int],
        min_args: 1,
        ret: RetSpec::Long,
    },
];

fn registry() -> &'static HashMap<String, &'static BuiltinDef> {
    static REGISTRY: OnceLock<HashMap<String, &'static BuiltinDef>> = OnceLock::new();
    REGISTRY.get_or_init(|| DEFS.iter().map(|d| (d.name.to_string(), d)).collect())
}

/// Look a builtin up by name. BASIC keywords are case-insensitive.
pub fn builtin(name: &str) -> Option<&'static BuiltinDef> {
    registry().get(&name.to_uppercase()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BaseType;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(builtin("len").is_some());
        assert!(builtin("LEN").is_some());
        assert!(builtin("mid$").is_some());
        assert!(builtin("nosuch").is_none());
    }

    #[test]
    fn test_conversions_have_no_symbol() {
        for name in ["CINT", "CLNG", "CSNG", "CDBL", "ERR", "STR$"] {
            assert!(builtin(name).unwrap().symbol.is_none(), "{}", name);
        }
    }

    #[test]
    fn test_mid_allows_two_or_three_args() {
        let mid = builtin("MID$").unwrap();
        assert_eq!(mid.params.len(), 3);
        assert_eq!(mid.min_args, 2);
    }

    #[test]
    fn test_return_descriptors() {
        assert_eq!(builtin("LEN").unwrap().ret.descriptor().base, BaseType::Long);
        assert!(builtin("TRIM$").unwrap().ret.descriptor().is_string());
        assert_eq!(
            builtin("CINT").unwrap().ret.descriptor().base,
            BaseType::Integer
        );
    }
}
