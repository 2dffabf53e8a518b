//! Control-flow graphs
//!
//! One `Cfg` per procedure plus one for the top-level program. A CFG owns
//! its blocks and edges; statement nodes are borrowed from the AST, never
//! copied. Edges carry block ids rather than pointers, so the graph stays
//! cycle-friendly and cheap to clone around.
//!
//! Blocks carry a `Term` payload describing the value their terminator
//! needs (a branch condition, a switch selector, a return expression); the
//! targets themselves always come from the edges. The emitter dispatches on
//! edge kinds and consults the payload, never the statement list, when
//! closing a block.

mod builder;

pub use builder::build_program;

use crate::ast::{CaseLabel, Expr, Statement};
use crate::symbols::ParamInfo;
use crate::types::TypeDescriptor;
use bitflags::bitflags;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u8 {
        const ENTRY       = 1 << 0;
        const EXIT        = 1 << 1;
        const TERMINATED  = 1 << 2;
        const UNREACHABLE = 1 << 3;
        const LOOP_HEADER = 1 << 4;
        const LOOP_EXIT   = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Jump,
    /// Lexical successor; semantically a Jump
    Fallthrough,
    CondTrue,
    CondFalse,
    Exception,
    /// GOSUB dispatch to a subroutine entry
    Call,
    /// Subroutine RETURN back to a recorded return point
    Return,
    /// One arm of a computed dispatch, 1-based
    Case(u32),
    Default,
}

#[derive(Debug, Clone, Copy)]
pub struct CfgEdge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

/// Value payload for a block's terminator. Targets live on the edges.
#[derive(Debug, Clone, Copy, Default)]
pub enum Term<'a> {
    /// Close from edges alone: jmp for a single Jump/Fallthrough, the
    /// procedure epilogue on the exit block, hlt when nothing leaves
    #[default]
    None,
    /// Two-way branch on a raw condition; UNTIL polarity is expressed by
    /// swapping the CondTrue/CondFalse edges, never by rewriting the test
    Branch(&'a Expr),
    /// FOR header: compare the counter against the hidden limit slot,
    /// direction chosen by the hidden step slot's sign
    ForTest { id: u32, var: &'a str },
    /// One SELECT CASE check: test the stashed selector against arm labels
    CaseTest { id: u32, labels: &'a [CaseLabel] },
    /// ON ... GOTO / ON ... GOSUB table dispatch; `gosub_site` is set for
    /// the GOSUB form and pushes the shared return-point id before jumping
    Switch {
        selector: &'a Expr,
        gosub_site: Option<u32>,
    },
    /// GOSUB: push the return-site id, then jmp along the Call edge
    GosubCall { site: u32 },
    /// RETURN via the runtime id stack: pop and dispatch over Return edges
    GosubReturn,
    /// Procedure RETURN: store the value, then jmp to the exit block
    Return(Option<&'a Expr>),
    /// THROW: publish the code and longjmp to the innermost handler
    Throw(&'a Expr),
    /// TRY entry: setjmp, then branch on its result (zero means body)
    TrySetjmp { id: u32 },
    /// One CATCH check against the published error code
    CatchTest { code: i64 },
    /// No CATCH matched: forward the published code to the next handler out
    Rethrow,
    Halt,
}

/// Synthesized work a block performs after its statements and before its
/// terminator: loop bookkeeping and handler-stack maintenance.
#[derive(Debug, Clone, Copy)]
pub enum BlockOp<'a> {
    /// Evaluate a SELECT selector once into its hidden slot
    EvalSelect { id: u32, selector: &'a Expr },
    /// Initialize counter, hidden limit, and hidden step slots
    ForInit {
        id: u32,
        var: &'a str,
        from: &'a Expr,
        to: &'a Expr,
        step: Option<&'a Expr>,
    },
    /// Advance the counter by the hidden step slot
    ForStep { id: u32, var: &'a str },
    /// Pop the innermost TRY frame off the handler stack
    TryPop,
    /// Drop the reference a string SELECT stashed in its hidden slot
    ReleaseSelect { id: u32 },
}

#[derive(Debug)]
pub struct BasicBlock<'a> {
    pub id: BlockId,
    /// Display name; doubles as the emitted QBE label
    pub name: String,
    /// Straight-line statements, borrowed from the AST. Never contains a
    /// control-flow statement: those become `term` and edges.
    pub stmts: Vec<&'a Statement>,
    pub ops: Vec<BlockOp<'a>>,
    pub term: Term<'a>,
    pub flags: BlockFlags,
    /// Outgoing edge indices, in creation order
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
}

impl BasicBlock<'_> {
    pub fn is_terminated(&self) -> bool {
        self.flags.contains(BlockFlags::TERMINATED)
    }
}

/// One GOSUB call site: the id pushed at the call and the block RETURN
/// dispatches back to.
#[derive(Debug, Clone, Copy)]
pub struct GosubSite {
    pub id: u32,
    pub return_block: BlockId,
}

#[derive(Debug)]
pub struct Cfg<'a> {
    pub name: String,
    pub blocks: Vec<BasicBlock<'a>>,
    pub edges: Vec<CfgEdge>,
    pub entry: BlockId,
    pub exit: BlockId,
    pub line_blocks: HashMap<u32, BlockId>,
    pub label_blocks: HashMap<String, BlockId>,
    pub gosub_sites: Vec<GosubSite>,
    /// Hidden-slot counts for the emitter's prologue
    pub select_count: u32,
    pub for_count: u32,
    pub try_count: u32,
    /// Signature, when this CFG is a procedure
    pub return_type: Option<TypeDescriptor>,
    pub params: Vec<ParamInfo>,
}

impl<'a> Cfg<'a> {
    pub fn new(name: &str) -> Self {
        Cfg {
            name: name.to_string(),
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: BlockId(0),
            exit: BlockId(0),
            line_blocks: HashMap::new(),
            label_blocks: HashMap::new(),
            gosub_sites: Vec::new(),
            select_count: 0,
            for_count: 0,
            try_count: 0,
            return_type: None,
            params: Vec::new(),
        }
    }

    pub fn new_block(&mut self, name_hint: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            name: format!("{}_{}", name_hint, id.0),
            stmts: Vec::new(),
            ops: Vec::new(),
            term: Term::None,
            flags: BlockFlags::empty(),
            succs: Vec::new(),
            preds: Vec::new(),
        });
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock<'a> {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock<'a> {
        &mut self.blocks[id.0 as usize]
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        let idx = self.edges.len();
        self.edges.push(CfgEdge { from, to, kind });
        self.block_mut(from).succs.push(idx);
        self.block_mut(to).preds.push(idx);
    }

    pub fn succ_edges(&self, id: BlockId) -> impl Iterator<Item = &CfgEdge> {
        self.block(id).succs.iter().map(|&i| &self.edges[i])
    }

    pub fn pred_edges(&self, id: BlockId) -> impl Iterator<Item = &CfgEdge> {
        self.block(id).preds.iter().map(|&i| &self.edges[i])
    }

    /// First successor of the given kind, if any.
    pub fn succ_of(&self, id: BlockId, kind: EdgeKind) -> Option<BlockId> {
        self.succ_edges(id).find(|e| e.kind == kind).map(|e| e.to)
    }

    /// Textual dump for the debug surface.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "cfg {} entry={} exit={} blocks={}",
            self.name,
            self.entry,
            self.exit,
            self.blocks.len()
        );
        for block in &self.blocks {
            let _ = writeln!(
                out,
                "  {} \"{}\" flags={:?} stmts={}",
                block.id,
                block.name,
                block.flags,
                block.stmts.len()
            );
            for edge in block.succs.iter().map(|&i| &self.edges[i]) {
                let _ = writeln!(out, "    -> {} {:?}", edge.to, edge.kind);
            }
        }
        out
    }
}

/// The whole program: `$main` plus one CFG per SUB/FUNCTION.
#[derive(Debug)]
pub struct ProgramCfg<'a> {
    pub main: Cfg<'a>,
    pub functions: Vec<Cfg<'a>>,
}

impl<'a> ProgramCfg<'a> {
    pub fn function(&self, name: &str) -> Option<&Cfg<'a>> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Cfg<'a>> {
        std::iter::once(&self.main).chain(self.functions.iter())
    }
}
