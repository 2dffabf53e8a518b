//! Abstract Syntax Tree for the BASIC front end
//!
//! The lexer and parser live outside this crate; they hand us this tree,
//! already shaped into typed statement and expression nodes. Everything
//! derives serde so the front end can ship the tree as JSON and so the
//! `bqc` tool can dump it back out.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Source location for error reporting and tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceLocation {
    pub file: PathBuf,
    /// 1-indexed source line
    pub line: u32,
    /// 1-indexed column
    pub col: u32,
}

impl SourceLocation {
    pub fn new(file: PathBuf, line: u32, col: u32) -> Self {
        SourceLocation { file, line, col }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.col)
    }
}

/// A type as spelled in source (`AS INTEGER`, `AS Point`).
///
/// Resolution to a full descriptor happens in semantic analysis; record
/// names are looked up there so declaration order can be diagnosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeName {
    Byte,
    UByte,
    Short,
    UShort,
    Integer,
    UInteger,
    Long,
    ULong,
    Single,
    Double,
    String,
    Unicode,
    Record(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Bitwise NOT (integer operands only)
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Floating-point division `/`
    Div,
    /// Integer division `\`
    IntDiv,
    Mod,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// MOD and the bitwise operators work on integers only.
    pub fn is_integer_only(self) -> bool {
        matches!(
            self,
            BinaryOp::Mod | BinaryOp::IntDiv | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: SourceLocation,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: SourceLocation) -> Self {
        Expr { kind, loc }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    /// Plain identifier: variable, constant, or function-return slot
    Variable(String),
    /// `A(i)`, `A(i, j)` - also how the parser spells calls to
    /// zero-declared arrays; semantic analysis disambiguates
    ArrayElem { name: String, indices: Vec<Expr> },
    /// `p.x`, `p.inner.y` - base is a Variable, ArrayElem, or Member
    Member { base: Box<Expr>, field: String },
    /// Builtin or user FUNCTION call
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// `GOTO 100` / `GOTO loop_top`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JumpTarget {
    Line(u32),
    Label(String),
}

impl std::fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JumpTarget::Line(n) => write!(f, "line {}", n),
            JumpTarget::Label(s) => write!(f, "label {}", s),
        }
    }
}

/// One `lower TO upper` (or bare `upper`, lower defaulting to 0) in a DIM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayBound {
    pub lower: Option<Expr>,
    pub upper: Expr,
}

/// One declarator in DIM / GLOBAL / LOCAL.
/// Empty `bounds` means a scalar; `type_name` of None means suffix-or-inferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub type_name: Option<TypeName>,
    pub bounds: Vec<ArrayBound>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub type_name: TypeName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_name: TypeName,
    #[serde(default)]
    pub byref: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcDef {
    pub name: String,
    pub params: Vec<Param>,
    /// Some for FUNCTION, None for SUB
    pub return_type: Option<TypeName>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfArm {
    pub cond: Expr,
    pub body: Vec<Statement>,
}

/// Placement and polarity of a DO/REPEAT loop test.
/// UNTIL carries the raw condition; edge polarity handles the inversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoopTest {
    PreWhile(Expr),
    PreUntil(Expr),
    PostWhile(Expr),
    PostUntil(Expr),
}

impl LoopTest {
    pub fn cond(&self) -> &Expr {
        match self {
            LoopTest::PreWhile(c)
            | LoopTest::PreUntil(c)
            | LoopTest::PostWhile(c)
            | LoopTest::PostUntil(c) => c,
        }
    }

    pub fn is_until(&self) -> bool {
        matches!(self, LoopTest::PreUntil(_) | LoopTest::PostUntil(_))
    }

    pub fn is_post(&self) -> bool {
        matches!(self, LoopTest::PostWhile(_) | LoopTest::PostUntil(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CaseLabel {
    /// `CASE 2`
    Value(Expr),
    /// `CASE 1 TO 5`
    Range(Expr, Expr),
    /// `CASE IS > 10`
    Is(BinaryOp, Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseArm {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchArm {
    /// Error code this arm handles; None is a catch-all
    pub code: Option<Expr>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintSep {
    /// Last item, newline follows
    None,
    /// `;` - juxtapose, and suppress the newline when trailing
    Semicolon,
    /// `,` - advance to the next print zone
    Comma,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintItem {
    pub expr: Expr,
    pub sep: PrintSep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    For,
    While,
    Do,
    Sub,
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub loc: SourceLocation,
    /// Numeric BASIC line label, when the source line carried one
    #[serde(default)]
    pub line_number: Option<u32>,
    /// Symbolic label (`top:`) attached to this statement
    #[serde(default)]
    pub label: Option<String>,
}

impl Statement {
    pub fn new(kind: StatementKind, loc: SourceLocation) -> Self {
        Statement {
            kind,
            loc,
            line_number: None,
            label: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementKind {
    /// LET and bare assignment; target is a Variable, ArrayElem, or Member
    Let { target: Expr, value: Expr },
    Dim { decls: Vec<VarDecl> },
    Redim {
        preserve: bool,
        name: String,
        bounds: Vec<ArrayBound>,
    },
    Erase { names: Vec<String> },
    Print { items: Vec<PrintItem> },
    PrintUsing { format: Expr, args: Vec<Expr> },
    Input {
        prompt: Option<String>,
        targets: Vec<Expr>,
    },
    Read { targets: Vec<Expr> },
    Restore { target: Option<JumpTarget> },
    If {
        arms: Vec<IfArm>,
        else_body: Vec<Statement>,
    },
    While { cond: Expr, body: Vec<Statement> },
    DoLoop { test: LoopTest, body: Vec<Statement> },
    For {
        var: String,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        body: Vec<Statement>,
    },
    Select {
        selector: Expr,
        arms: Vec<CaseArm>,
        else_body: Vec<Statement>,
    },
    Try {
        body: Vec<Statement>,
        catches: Vec<CatchArm>,
        finally: Vec<Statement>,
    },
    Goto(JumpTarget),
    Gosub(JumpTarget),
    OnGoto {
        selector: Expr,
        targets: Vec<JumpTarget>,
    },
    OnGosub {
        selector: Expr,
        targets: Vec<JumpTarget>,
    },
    Return(Option<Expr>),
    Exit(ExitKind),
    Continue(ExitKind),
    End,
    Throw(Expr),
    /// CALL of a SUB (or a FUNCTION whose result is discarded)
    Call { name: String, args: Vec<Expr> },
    Sub(ProcDef),
    Function(ProcDef),
    TypeDecl {
        name: String,
        fields: Vec<FieldDecl>,
    },
    Global { decls: Vec<VarDecl> },
    Local { decls: Vec<VarDecl> },
    Shared { names: Vec<String> },
    Const { name: String, value: Expr },
}

impl StatementKind {
    /// Control-flow statements are terminator-only: the CFG builder turns
    /// them into edges and the block-body emitter must never see them.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            StatementKind::Goto(_)
                | StatementKind::Gosub(_)
                | StatementKind::OnGoto { .. }
                | StatementKind::OnGosub { .. }
                | StatementKind::Return(_)
                | StatementKind::Exit(_)
                | StatementKind::Continue(_)
                | StatementKind::End
                | StatementKind::Throw(_)
        )
    }

    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            StatementKind::If { .. }
                | StatementKind::While { .. }
                | StatementKind::DoLoop { .. }
                | StatementKind::For { .. }
                | StatementKind::Select { .. }
                | StatementKind::Try { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    /// Top-level statements excluding SUB/FUNCTION definitions - the body
    /// of the emitted `$main`.
    pub fn main_statements(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter().filter(|s| {
            !matches!(
                s.kind,
                StatementKind::Sub(_) | StatementKind::Function(_)
            )
        })
    }

    pub fn procedures(&self) -> impl Iterator<Item = &ProcDef> {
        self.statements.iter().filter_map(|s| match &s.kind {
            StatementKind::Sub(p) | StatementKind::Function(p) => Some(p),
            _ => None,
        })
    }

    pub fn find_procedure(&self, name: &str) -> Option<&ProcDef> {
        self.procedures().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::default()
    }

    #[test]
    fn test_control_flow_classification() {
        assert!(StatementKind::End.is_control_flow());
        assert!(StatementKind::Goto(JumpTarget::Line(100)).is_control_flow());
        assert!(StatementKind::Return(None).is_control_flow());
        assert!(!StatementKind::Print { items: vec![] }.is_control_flow());
        assert!(
            !StatementKind::While {
                cond: Expr::new(ExprKind::IntLiteral(1), loc()),
                body: vec![]
            }
            .is_control_flow()
        );
    }

    #[test]
    fn test_main_statements_skip_procedures() {
        let program = Program {
            statements: vec![
                Statement::new(StatementKind::End, loc()),
                Statement::new(
                    StatementKind::Sub(ProcDef {
                        name: "Greet".to_string(),
                        params: vec![],
                        return_type: None,
                        body: vec![],
                    }),
                    loc(),
                ),
            ],
        };
        assert_eq!(program.main_statements().count(), 1);
        assert_eq!(program.procedures().count(), 1);
        assert!(program.find_procedure("Greet").is_some());
    }

    #[test]
    fn test_until_polarity() {
        let cond = Expr::new(ExprKind::IntLiteral(0), loc());
        let t = LoopTest::PostUntil(cond.clone());
        assert!(t.is_until());
        assert!(t.is_post());
        assert_eq!(t.cond(), &cond);
    }

    #[test]
    fn test_ast_round_trips_through_json() {
        let stmt = Statement::new(
            StatementKind::Let {
                target: Expr::new(ExprKind::Variable("x".to_string()), loc()),
                value: Expr::new(ExprKind::IntLiteral(2), loc()),
            },
            loc(),
        );
        let json = serde_json::to_string(&stmt).unwrap();
        let back: Statement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stmt);
    }
}
