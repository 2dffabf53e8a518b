//! Compile-time diagnostics
//!
//! Semantic analysis and CFG construction accumulate diagnostics instead of
//! failing fast; the driver prints them all and aborts before the next
//! pipeline stage if any reached error severity.

use crate::ast::SourceLocation;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Hint,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Hint => write!(f, "hint"),
        }
    }
}

/// The fixed taxonomy of compile-time failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    UndefinedIdentifier,
    DuplicateDeclaration,
    TypeMismatch,
    UnknownField,
    WrongArgumentCount,
    OutOfRangeConstant,
    UnresolvedJumpTarget,
    OutsideProcedure,
    InvalidTarget,
    LossyConversion,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub location: SourceLocation,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}: {}",
            self.location, self.severity, self.message
        )
    }
}

/// Ordered collection of diagnostics for one compilation.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, kind: DiagnosticKind, location: SourceLocation, message: String) {
        self.items.push(Diagnostic {
            severity: Severity::Error,
            kind,
            location,
            message,
        });
    }

    pub fn warning(&mut self, kind: DiagnosticKind, location: SourceLocation, message: String) {
        self.items.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            location,
            message,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for d in &self.items {
            writeln!(f, "{}", d)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn loc() -> SourceLocation {
        SourceLocation::new(PathBuf::from("t.bas"), 4, 7)
    }

    #[test]
    fn test_display_format() {
        let d = Diagnostic {
            severity: Severity::Error,
            kind: DiagnosticKind::TypeMismatch,
            location: loc(),
            message: "cannot assign STRING to INTEGER".to_string(),
        };
        assert_eq!(
            d.to_string(),
            "t.bas:4:7: error: cannot assign STRING to INTEGER"
        );
    }

    #[test]
    fn test_has_errors() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());
        diags.warning(
            DiagnosticKind::LossyConversion,
            loc(),
            "LONG narrowed to INTEGER".to_string(),
        );
        assert!(!diags.has_errors());
        diags.error(
            DiagnosticKind::UndefinedIdentifier,
            loc(),
            "unknown variable `q`".to_string(),
        );
        assert!(diags.has_errors());
        assert_eq!(diags.len(), 2);
    }
}
