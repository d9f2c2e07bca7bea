//! Rule compilation: the structural walk from expression trees to annotated
//! automata, and the full export pipeline.

use lexact_fsa::{StateLimitExceeded, SPECIAL_BASE};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::anno::AnnoFsa;
use crate::ast::{DefineId, ExprId, ExprKind, Loc, Program};
use crate::error::CompileError;
use crate::expand;
use crate::options::CompileOptions;

/// Compilation state threaded through the whole run: the per-rule memo
/// tables, the options, and the placeholder-symbol counter. One context
/// serves one program; rule automata are compiled once and reused by every
/// expansion that references them.
pub struct CompileCtx<'p> {
    pub(crate) program: &'p Program,
    pub(crate) opts: &'p CompileOptions,
    pub(crate) compiled: FxHashMap<DefineId, AnnoFsa>,
    pub(crate) expanded: FxHashMap<DefineId, AnnoFsa>,
    pub(crate) expanding: Vec<DefineId>,
    next_special: u32,
}

impl<'p> CompileCtx<'p> {
    pub fn new(program: &'p Program, opts: &'p CompileOptions) -> Self {
        Self {
            program,
            opts,
            compiled: FxHashMap::default(),
            expanded: FxHashMap::default(),
            expanding: Vec::new(),
            next_special: 0,
        }
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    /// Allocates the next placeholder symbol for a reference skeleton.
    fn fresh_special(&mut self) -> u32 {
        let symbol = SPECIAL_BASE + self.next_special;
        self.next_special += 1;
        symbol
    }

    fn limit_error(&self, def: DefineId, loc: Loc) -> impl Fn(StateLimitExceeded) -> CompileError {
        let rule = self.program.defines[def].lhs.clone();
        move |e| CompileError::StateLimitExceeded {
            rule: rule.clone(),
            limit: e.limit,
            loc,
        }
    }

    /// Compiles one rule's tree to a determinized, minimized automaton.
    /// Memoized; the placeholder edges of any references stay in place for
    /// the expander.
    pub fn compile(&mut self, def: DefineId) -> Result<&AnnoFsa, CompileError> {
        if !self.compiled.contains_key(&def) {
            let stmt = &self.program.defines[def];
            let rhs = stmt.rhs;
            let loc = self.program.arena[rhs].loc;
            let mut anno = self.compile_expr(def, rhs)?;
            anno.determinize(self.opts.state_limit)
                .map_err(self.limit_error(def, loc))?;
            anno.minimize();
            debug!(
                rule = %self.program.defines[def].lhs,
                states = anno.fsa.n(),
                "compiled rule"
            );
            self.compiled.insert(def, anno);
        }
        Ok(&self.compiled[&def])
    }

    /// Structural recursion over the expression tree. Each case builds an
    /// automaton whose states are annotated with the expression that
    /// produced them.
    fn compile_expr(&mut self, def: DefineId, id: ExprId) -> Result<AnnoFsa, CompileError> {
        let program = self.program;
        let expr = &program.arena[id];
        let limit = self.opts.state_limit;
        match &expr.kind {
            ExprKind::Literal(bytes) => Ok(AnnoFsa::literal(id, bytes)),
            ExprKind::Bracket(ranges) => Ok(AnnoFsa::bracket(id, ranges)),
            ExprKind::Dot => Ok(AnnoFsa::dot(id)),
            ExprKind::Epsilon => Ok(AnnoFsa::epsilon(id)),
            ExprKind::Concat(l, r) => {
                let mut anno = self.compile_expr(def, *l)?;
                let rhs = self.compile_expr(def, *r)?;
                anno.concat(&rhs, id);
                Ok(anno)
            }
            ExprKind::Union(l, r) => {
                let mut anno = self.compile_expr(def, *l)?;
                let rhs = self.compile_expr(def, *r)?;
                anno.union(&rhs, id);
                Ok(anno)
            }
            ExprKind::Intersect(l, r) => {
                let mut anno = self.compile_expr(def, *l)?;
                let rhs = self.compile_expr(def, *r)?;
                anno.intersect(rhs, id, limit)
                    .map_err(self.limit_error(def, expr.loc))?;
                Ok(anno)
            }
            ExprKind::Difference(l, r) => {
                let mut anno = self.compile_expr(def, *l)?;
                let rhs = self.compile_expr(def, *r)?;
                anno.difference(rhs, id, limit)
                    .map_err(self.limit_error(def, expr.loc))?;
                Ok(anno)
            }
            ExprKind::Complement(x) => {
                let mut anno = self.compile_expr(def, *x)?;
                anno.complement(id, limit)
                    .map_err(self.limit_error(def, expr.loc))?;
                Ok(anno)
            }
            ExprKind::Star(x) => {
                let mut anno = self.compile_expr(def, *x)?;
                anno.star(id);
                Ok(anno)
            }
            ExprKind::Plus(x) => {
                let mut anno = self.compile_expr(def, *x)?;
                anno.plus(id);
                Ok(anno)
            }
            ExprKind::Question(x) => {
                let mut anno = self.compile_expr(def, *x)?;
                anno.question(id);
                Ok(anno)
            }
            ExprKind::Repeat { inner, lo, hi } => {
                let mut anno = self.compile_expr(def, *inner)?;
                anno.repeat(*lo, *hi, id);
                Ok(anno)
            }
            ExprKind::Collapse { .. } | ExprKind::Embed { .. } => {
                let special = self.fresh_special();
                Ok(AnnoFsa::reference(id, special))
            }
        }
    }

    /// Full pipeline for an exported rule: expansion, the optional substring
    /// grammar, determinization, minimization, and both trimming passes.
    pub fn compile_export(&mut self, def: DefineId) -> Result<AnnoFsa, CompileError> {
        let stmt = &self.program.defines[def];
        let rule = stmt.lhs.clone();
        let intact = stmt.intact;
        let loc = self.program.arena[stmt.rhs].loc;

        self.compile(def)?;
        let mut anno = expand::expand(self, def)?;
        debug!(rule = %rule, states = anno.fsa.n(), "expanded references");

        if self.opts.substring_grammar && !intact {
            anno.substring_grammar();
            debug!(rule = %rule, states = anno.fsa.n(), "substring grammar");
        }

        anno.determinize(self.opts.state_limit)
            .map_err(self.limit_error(def, loc))?;
        debug!(rule = %rule, states = anno.fsa.n(), "determinized");
        anno.minimize();
        debug!(rule = %rule, states = anno.fsa.n(), "minimized");
        anno.accessible();
        debug!(rule = %rule, states = anno.fsa.n(), "kept accessible states");
        if !anno.co_accessible() {
            warn!(rule = %rule, at = %loc, "rule matches the empty language");
        }
        debug!(rule = %rule, states = anno.fsa.n(), "kept co-accessible states");
        Ok(anno)
    }
}
