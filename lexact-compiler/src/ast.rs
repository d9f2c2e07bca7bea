//! Input model: expression trees, actions, rule definitions, and modules.
//!
//! The loader (a collaborator of this crate) parses source files into this
//! shape. Expression nodes live in a single arena shared by every module, so
//! annotations can refer to nodes from any rule with one plain index.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use crate::error::CompileError;

pub type ModuleId = usize;
pub type DefineId = usize;

/// Byte span of a construct in its source file, carried for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Loc {
    pub start: usize,
    pub end: usize,
}

impl Loc {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

bitflags::bitflags! {
    /// Roles a state plays for an annotating expression. A state can hold
    /// several roles for the same expression at once; merges are bitwise-or.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ExprTag: u8 {
        const START = 1 << 0;
        const INNER = 1 << 1;
        const FINAL = 1 << 2;
    }
}

/// Index of an expression node in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A semantic action attached to an expression, either verbatim code or a
/// named reference resolved through the defining module's action table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Inline(String),
    Ref { module: ModuleId, ident: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// Character class as sorted, disjoint half-open byte ranges.
    Bracket(Vec<(u32, u32)>),
    Literal(Vec<u8>),
    Dot,
    Epsilon,
    Concat(ExprId, ExprId),
    Union(ExprId, ExprId),
    Intersect(ExprId, ExprId),
    Difference(ExprId, ExprId),
    Complement(ExprId),
    Star(ExprId),
    Plus(ExprId),
    Question(ExprId),
    Repeat {
        inner: ExprId,
        lo: u32,
        hi: Option<u32>,
    },
    /// Inline substitution of another rule's automaton.
    Collapse {
        name: String,
        target: Option<DefineId>,
    },
    /// Insertion of another rule's automaton, opaque to action scheduling.
    Embed {
        name: String,
        target: Option<DefineId>,
    },
}

impl ExprKind {
    pub fn children(&self) -> Vec<ExprId> {
        match self {
            ExprKind::Concat(l, r)
            | ExprKind::Union(l, r)
            | ExprKind::Intersect(l, r)
            | ExprKind::Difference(l, r) => vec![*l, *r],
            ExprKind::Complement(x)
            | ExprKind::Star(x)
            | ExprKind::Plus(x)
            | ExprKind::Question(x)
            | ExprKind::Repeat { inner: x, .. } => vec![*x],
            _ => Vec::new(),
        }
    }
}

/// An expression node. `pre`, `post`, `depth` and `anc` are filled by the
/// preprocessing pass before any automaton is built and stay fixed from then
/// on; `anc[k]` is the `2^k`-th ancestor, `anc[0]` the parent.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Loc,
    pub pre: u32,
    pub post: u32,
    pub depth: u32,
    pub anc: Vec<Option<ExprId>>,
    pub entering: Vec<Action>,
    pub leaving: Vec<Action>,
    pub transiting: Vec<Action>,
    pub finishing: Vec<Action>,
}

impl Expr {
    fn new(kind: ExprKind, loc: Loc) -> Self {
        Self {
            kind,
            loc,
            pre: 0,
            post: 0,
            depth: 0,
            anc: Vec::new(),
            entering: Vec::new(),
            leaving: Vec::new(),
            transiting: Vec::new(),
            finishing: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<ExprId> {
        self.anc.first().copied().flatten()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExprArena {
    nodes: Vec<Expr>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kind: ExprKind, loc: Loc) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(Expr::new(kind, loc));
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ExprId> {
        (0..self.nodes.len() as u32).map(ExprId)
    }
}

impl Index<ExprId> for ExprArena {
    type Output = Expr;

    fn index(&self, id: ExprId) -> &Expr {
        &self.nodes[id.index()]
    }
}

impl IndexMut<ExprId> for ExprArena {
    fn index_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.nodes[id.index()]
    }
}

/// One `define` statement: a named expression tree plus its flags.
#[derive(Debug, Clone)]
pub struct DefineStmt {
    pub module: ModuleId,
    pub lhs: String,
    pub rhs: ExprId,
    pub export: bool,
    /// Exempt from the substring-grammar transformation.
    pub intact: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub filename: String,
    pub defines: Vec<DefineId>,
    /// Named action bodies referenced by `Action::Ref`.
    pub actions: HashMap<String, String>,
}

/// The whole compilation input: every module's trees in one arena.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub arena: ExprArena,
    pub modules: Vec<Module>,
    pub defines: Vec<DefineStmt>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, filename: impl Into<String>) -> ModuleId {
        self.modules.push(Module {
            filename: filename.into(),
            ..Module::default()
        });
        self.modules.len() - 1
    }

    pub fn define_action(
        &mut self,
        module: ModuleId,
        ident: impl Into<String>,
        code: impl Into<String>,
    ) {
        self.modules[module].actions.insert(ident.into(), code.into());
    }

    pub fn add_define(
        &mut self,
        module: ModuleId,
        lhs: impl Into<String>,
        rhs: ExprId,
        export: bool,
        intact: bool,
    ) -> DefineId {
        let id = self.defines.len();
        self.defines.push(DefineStmt {
            module,
            lhs: lhs.into(),
            rhs,
            export,
            intact,
        });
        self.modules[module].defines.push(id);
        id
    }

    pub fn find_define(&self, name: &str) -> Option<DefineId> {
        self.defines.iter().position(|d| d.lhs == name)
    }

    /// The code behind an action. A dangling named reference resolves to the
    /// empty snippet, matching how the emitter treats absent actions.
    pub fn action_code<'a>(&'a self, action: &'a Action) -> &'a str {
        match action {
            Action::Inline(code) => code,
            Action::Ref { module, ident } => self.modules[*module]
                .actions
                .get(ident)
                .map(String::as_str)
                .unwrap_or(""),
        }
    }

    /// Fills every `Collapse`/`Embed` target by rule-name lookup. An unknown
    /// name is fatal for the referencing rule.
    pub fn resolve_references(&mut self) -> Result<(), CompileError> {
        let defines = &self.defines;
        for node in &mut self.arena.nodes {
            let (name, target) = match &mut node.kind {
                ExprKind::Collapse { name, target } | ExprKind::Embed { name, target } => {
                    (name, target)
                }
                _ => continue,
            };
            if target.is_some() {
                continue;
            }
            match defines.iter().position(|d| d.lhs == *name) {
                Some(def) => *target = Some(def),
                None => {
                    return Err(CompileError::UndefinedReference {
                        name: name.clone(),
                        loc: node.loc,
                    })
                }
            }
        }
        Ok(())
    }
}
