//! QBE type helpers for the emitter
//!
//! Scalar classes and memory widths come from the type descriptors; this
//! module picks conversion opcodes between classes.

use crate::types::TypeDescriptor;

/// Conversion instruction moving a value of `from` into the scalar class
/// of `to`, or None when both live in the same class.
///
/// Extensions take their signedness from the source type; float-to-integer
/// conversions take it from the destination.
pub(super) fn cast_op(from: &TypeDescriptor, to: &TypeDescriptor) -> Option<&'static str> {
    let (f, t) = (from.qbe_scalar(), to.qbe_scalar());
    match (f, t) {
        ("w", "l") => Some(if from.is_unsigned() { "extuw" } else { "extsw" }),
        ("l", "w") => Some("copy"),
        ("w", "s") | ("w", "d") => Some(if from.is_unsigned() { "uwtof" } else { "swtof" }),
        ("l", "s") | ("l", "d") => Some(if from.is_unsigned() { "ultof" } else { "sltof" }),
        ("s", "w") | ("s", "l") => Some(if to.is_unsigned() { "stoui" } else { "stosi" }),
        ("d", "w") | ("d", "l") => Some(if to.is_unsigned() { "dtoui" } else { "dtosi" }),
        ("s", "d") => Some("exts"),
        ("d", "s") => Some("truncd"),
        _ => None,
    }
}

/// Comparison opcode for promoted operands of class `class`.
pub(super) fn cmp_op(op: crate::ast::BinaryOp, class: &str, unsigned: bool) -> String {
    use crate::ast::BinaryOp::*;
    let name = match (op, class) {
        (Eq, _) => "eq",
        (Ne, _) => "ne",
        (Lt, "s") | (Lt, "d") => "lt",
        (Le, "s") | (Le, "d") => "le",
        (Gt, "s") | (Gt, "d") => "gt",
        (Ge, "s") | (Ge, "d") => "ge",
        (Lt, _) => {
            if unsigned {
                "ult"
            } else {
                "slt"
            }
        }
        (Le, _) => {
            if unsigned {
                "ule"
            } else {
                "sle"
            }
        }
        (Gt, _) => {
            if unsigned {
                "ugt"
            } else {
                "sgt"
            }
        }
        (Ge, _) => {
            if unsigned {
                "uge"
            } else {
                "sge"
            }
        }
        _ => unreachable!("not a comparison"),
    };
    format!("c{}{}", name, class)
}

/// Zero constant spelled for a store of the given type.
pub(super) fn zero_for(ty: &TypeDescriptor) -> &'static str {
    match ty.qbe_scalar() {
        "s" => "s_0",
        "d" => "d_0",
        _ => "0",
    }
}
