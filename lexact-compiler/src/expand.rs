//! Collapse and embed expansion: replacing reference placeholders with the
//! referenced automata, stitched in through epsilon edges.

use lexact_fsa::{Edge, Fsa, StateId, EPSILON, SPECIAL_BASE};
use rustc_hash::FxHashMap;

use crate::anno::{AnnoFsa, Assoc};
use crate::ast::{DefineId, ExprKind};
use crate::compile::CompileCtx;
use crate::error::CompileError;

/// Expands every reference reachable from `def`, producing one large NFA with
/// epsilon stitches and no placeholder edges left. Annotations are preserved
/// and may now point into several rules' trees. Memoized per rule; embeds of
/// a rule currently being expanded cannot terminate and are fatal.
pub(crate) fn expand(ctx: &mut CompileCtx, def: DefineId) -> Result<AnnoFsa, CompileError> {
    if let Some(done) = ctx.expanded.get(&def) {
        return Ok(done.clone());
    }
    if ctx.expanding.contains(&def) {
        let stmt = &ctx.program.defines[def];
        return Err(CompileError::EmbedCycle {
            rule: stmt.lhs.clone(),
            loc: ctx.program.arena[stmt.rhs].loc,
        });
    }
    ctx.expanding.push(def);
    let result = Expander::default().run(ctx, def);
    ctx.expanding.pop();
    let anno = result?;
    ctx.expanded.insert(def, anno.clone());
    Ok(anno)
}

fn has_special(edges: &[Edge]) -> bool {
    edges.iter().any(|e| e.hi > SPECIAL_BASE)
}

/// Builds the expanded automaton. Each referenced rule is spliced in at most
/// once per kind of splice: collapse splices keep the rule's annotations so
/// the scheduler sees its expressions, embed splices copy the rule's fully
/// expanded automaton with annotations dropped, leaving the region opaque.
#[derive(Default)]
struct Expander {
    adj: Vec<Vec<Edge>>,
    assoc: Vec<Assoc>,
    collapse_offsets: FxHashMap<DefineId, StateId>,
    embed_offsets: FxHashMap<DefineId, StateId>,
    /// The source-side stitches, `reference state -> spliced start`. A cycle
    /// among these means a chain of rules each invoking the next before
    /// consuming any input: left recursion.
    entry_stitches: Vec<(StateId, StateId)>,
}

impl Expander {
    fn run(mut self, ctx: &mut CompileCtx, root: DefineId) -> Result<AnnoFsa, CompileError> {
        self.splice(ctx, root)?;
        if self.has_entry_cycle() {
            let stmt = &ctx.program.defines[root];
            return Err(CompileError::LeftRecursion {
                rule: stmt.lhs.clone(),
                loc: ctx.program.arena[stmt.rhs].loc,
            });
        }
        // The root was spliced first, at offset zero.
        let root_fsa = &ctx.compiled[&root].fsa;
        let fsa = Fsa {
            start: root_fsa.start,
            finals: root_fsa.finals.clone(),
            adj: self.adj,
        };
        Ok(AnnoFsa {
            fsa,
            assoc: self.assoc,
            deterministic: false,
        })
    }

    fn has_entry_cycle(&self) -> bool {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;
        let mut succ: FxHashMap<StateId, Vec<StateId>> = FxHashMap::default();
        for &(from, to) in &self.entry_stitches {
            succ.entry(from).or_default().push(to);
        }
        let mut color: FxHashMap<StateId, u8> = FxHashMap::default();
        let empty: Vec<StateId> = Vec::new();
        for &(root, _) in &self.entry_stitches {
            if color.get(&root).copied().unwrap_or(WHITE) != WHITE {
                continue;
            }
            color.insert(root, GRAY);
            let mut stack: Vec<(StateId, usize)> = vec![(root, 0)];
            while let Some(&(u, resume)) = stack.last() {
                let edges = succ.get(&u).unwrap_or(&empty);
                let mut k = resume;
                let mut descend = None;
                while k < edges.len() {
                    let v = edges[k];
                    k += 1;
                    match color.get(&v).copied().unwrap_or(WHITE) {
                        WHITE => {
                            descend = Some(v);
                            break;
                        }
                        GRAY => return true,
                        _ => {}
                    }
                }
                if let Some(frame) = stack.last_mut() {
                    frame.1 = k;
                }
                match descend {
                    Some(v) => {
                        color.insert(v, GRAY);
                        stack.push((v, 0));
                    }
                    None => {
                        color.insert(u, BLACK);
                        stack.pop();
                    }
                }
            }
        }
        false
    }

    fn add_epsilon(&mut self, from: StateId, to: StateId) {
        let e = Edge {
            lo: EPSILON,
            hi: EPSILON + 1,
            to,
        };
        let list = &mut self.adj[from];
        if let Err(i) = list.binary_search(&e) {
            list.insert(i, e);
        }
    }

    /// Copies a compiled rule into the expansion (annotations included) plus
    /// one follow vertex, then resolves the placeholder edges of the new
    /// region. Returns the region's offset.
    fn splice(&mut self, ctx: &mut CompileCtx, def: DefineId) -> Result<StateId, CompileError> {
        if let Some(&offset) = self.collapse_offsets.get(&def) {
            return Ok(offset);
        }
        let (n, adj, assoc) = {
            let compiled = ctx.compile(def)?;
            (
                compiled.fsa.n(),
                compiled.fsa.adj.clone(),
                compiled.assoc.clone(),
            )
        };
        let offset = self.adj.len();
        self.collapse_offsets.insert(def, offset);
        for mut edges in adj {
            for e in &mut edges {
                e.to += offset;
            }
            self.adj.push(edges);
        }
        self.assoc.extend(assoc);
        self.adj.push(Vec::new());
        self.assoc.push(Assoc::new());

        for state in offset..offset + n {
            if has_special(&self.adj[state]) {
                self.stitch(ctx, state)?;
            }
        }
        Ok(offset)
    }

    /// Copies a rule's fully expanded automaton with empty annotation sets.
    /// Returns the region's offset, its start, and its finals (already
    /// shifted).
    fn splice_opaque(
        &mut self,
        ctx: &mut CompileCtx,
        def: DefineId,
    ) -> Result<(StateId, Vec<StateId>), CompileError> {
        if let Some(&offset) = self.embed_offsets.get(&def) {
            let exp = expand(ctx, def)?;
            let finals = exp.fsa.finals.iter().map(|&f| offset + f).collect();
            return Ok((offset + exp.fsa.start, finals));
        }
        let exp = expand(ctx, def)?;
        let offset = self.adj.len();
        self.embed_offsets.insert(def, offset);
        for edges in &exp.fsa.adj {
            let mut shifted = edges.clone();
            for e in &mut shifted {
                e.to += offset;
            }
            self.adj.push(shifted);
            self.assoc.push(Assoc::new());
        }
        let finals = exp.fsa.finals.iter().map(|&f| offset + f).collect();
        Ok((offset + exp.fsa.start, finals))
    }

    fn reference_annotations(&self, ctx: &CompileCtx, state: StateId) -> Vec<(bool, DefineId)> {
        let mut refs = Vec::new();
        for &(expr, _) in &self.assoc[state] {
            match &ctx.program.arena[expr].kind {
                ExprKind::Collapse {
                    target: Some(def), ..
                } => refs.push((false, *def)),
                ExprKind::Embed {
                    target: Some(def), ..
                } => refs.push((true, *def)),
                _ => {}
            }
        }
        refs
    }

    /// Resolves the placeholder edges leaving `state`. Reference annotations
    /// on the source receive an epsilon into the referenced start; reference
    /// annotations on each placeholder target receive epsilons from the
    /// referenced finals into that target, which is the reference's follow
    /// state. The placeholder band is then removed, clipping any byte part.
    fn stitch(&mut self, ctx: &mut CompileCtx, state: StateId) -> Result<(), CompileError> {
        for (opaque, def) in self.reference_annotations(ctx, state) {
            let start = if opaque {
                let (start, _) = self.splice_opaque(ctx, def)?;
                start
            } else {
                let offset = self.splice(ctx, def)?;
                offset + ctx.compiled[&def].fsa.start
            };
            self.add_epsilon(state, start);
            self.entry_stitches.push((state, start));
        }

        let placeholders: Vec<Edge> = self.adj[state]
            .iter()
            .filter(|e| e.hi > SPECIAL_BASE)
            .copied()
            .collect();
        for edge in placeholders {
            for (opaque, def) in self.reference_annotations(ctx, edge.to) {
                if opaque {
                    let (_, finals) = self.splice_opaque(ctx, def)?;
                    for f in finals {
                        self.add_epsilon(f, edge.to);
                    }
                } else {
                    let offset = self.splice(ctx, def)?;
                    let finals = ctx.compiled[&def].fsa.finals.clone();
                    for f in finals {
                        self.add_epsilon(offset + f, edge.to);
                    }
                }
            }
        }

        let edges = std::mem::take(&mut self.adj[state]);
        let mut kept: Vec<Edge> = Vec::with_capacity(edges.len());
        for e in edges {
            if e.hi <= SPECIAL_BASE {
                kept.push(e);
            } else if e.lo < EPSILON {
                kept.push(Edge {
                    lo: e.lo,
                    hi: EPSILON,
                    to: e.to,
                });
            }
        }
        kept.sort_unstable();
        self.adj[state] = kept;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprKind, Loc, Program};
    use crate::options::CompileOptions;
    use crate::preprocess::preprocess;

    fn collapse(program: &mut Program, name: &str) -> crate::ast::ExprId {
        program.arena.alloc(
            ExprKind::Collapse {
                name: name.into(),
                target: None,
            },
            Loc::default(),
        )
    }

    fn embed(program: &mut Program, name: &str) -> crate::ast::ExprId {
        program.arena.alloc(
            ExprKind::Embed {
                name: name.into(),
                target: None,
            },
            Loc::default(),
        )
    }

    fn literal(program: &mut Program, bytes: &[u8]) -> crate::ast::ExprId {
        program
            .arena
            .alloc(ExprKind::Literal(bytes.to_vec()), Loc::default())
    }

    fn prepare(program: &mut Program) {
        program.resolve_references().expect("references resolve");
        for def in 0..program.defines.len() {
            let rhs = program.defines[def].rhs;
            preprocess(&mut program.arena, rhs).expect("bounds are fine");
        }
    }

    #[test]
    fn collapse_splices_the_referenced_automaton() {
        // A := "x" B "y";  B := "z"
        let mut program = Program::new();
        let module = program.add_module("m.ls");
        let b_rhs = literal(&mut program, b"z");
        program.add_define(module, "B", b_rhs, false, false);
        let x = literal(&mut program, b"x");
        let b_ref = collapse(&mut program, "B");
        let y = literal(&mut program, b"y");
        let xb = program.arena.alloc(ExprKind::Concat(x, b_ref), Loc::default());
        let a_rhs = program.arena.alloc(ExprKind::Concat(xb, y), Loc::default());
        program.add_define(module, "A", a_rhs, true, false);
        prepare(&mut program);

        let opts = CompileOptions::default();
        let mut ctx = CompileCtx::new(&program, &opts);
        let a = 1;
        ctx.compile(a).expect("compiles");
        let anno = expand(&mut ctx, a).expect("expands");
        assert!(anno.fsa.accepts(b"xzy"));
        assert!(!anno.fsa.accepts(b"xy"));
        assert!(!anno.fsa.accepts(b"xz"));
        // No placeholder edges survive expansion.
        assert!(anno.fsa.adj.iter().all(|edges| !has_special(edges)));
        // The spliced region still carries B's literal annotations.
        let carries_b_literal = anno
            .assoc
            .iter()
            .any(|assoc| assoc.iter().any(|&(e, _)| e == b_rhs));
        assert!(carries_b_literal);
    }

    #[test]
    fn shared_reference_is_spliced_once() {
        // A := B B — both placeholders stitch into one copy of B. The copy
        // is entered from every call site and exits into every follow state,
        // so repetition counts across shared references blur into "one or
        // more".
        let mut program = Program::new();
        let module = program.add_module("m.ls");
        let b_rhs = literal(&mut program, b"z");
        program.add_define(module, "B", b_rhs, false, false);
        let r1 = collapse(&mut program, "B");
        let r2 = collapse(&mut program, "B");
        let a_rhs = program.arena.alloc(ExprKind::Concat(r1, r2), Loc::default());
        program.add_define(module, "A", a_rhs, true, false);
        prepare(&mut program);

        let opts = CompileOptions::default();
        let mut ctx = CompileCtx::new(&program, &opts);
        ctx.compile(1).expect("compiles");
        let anno = expand(&mut ctx, 1).expect("expands");
        assert!(!anno.fsa.accepts(b""));
        assert!(anno.fsa.accepts(b"z"));
        assert!(anno.fsa.accepts(b"zz"));
        assert!(anno.fsa.accepts(b"zzz"));
        let b_states = ctx.compiled[&0].fsa.n();
        let a_states = ctx.compiled[&1].fsa.n();
        // Root region + follow vertex + one shared B region + follow vertex.
        assert_eq!(anno.fsa.n(), a_states + 1 + b_states + 1);
    }

    #[test]
    fn self_collapse_is_left_recursion() {
        // A := A "x" — the rule invokes itself before consuming anything.
        let mut program = Program::new();
        let module = program.add_module("m.ls");
        let self_ref = collapse(&mut program, "A");
        let x = literal(&mut program, b"x");
        let a_rhs = program
            .arena
            .alloc(ExprKind::Concat(self_ref, x), Loc::default());
        program.add_define(module, "A", a_rhs, true, false);
        prepare(&mut program);

        let opts = CompileOptions::default();
        let mut ctx = CompileCtx::new(&program, &opts);
        ctx.compile(0).expect("compiles");
        let err = expand(&mut ctx, 0).unwrap_err();
        assert!(matches!(err, CompileError::LeftRecursion { ref rule, .. } if rule == "A"));
    }

    #[test]
    fn mutual_collapse_at_the_start_is_left_recursion() {
        // A := B, B := A — entry stitches chase each other forever.
        let mut program = Program::new();
        let module = program.add_module("m.ls");
        let b_in_a = collapse(&mut program, "B");
        program.add_define(module, "A", b_in_a, true, false);
        let a_in_b = collapse(&mut program, "A");
        program.add_define(module, "B", a_in_b, false, false);
        prepare(&mut program);

        let opts = CompileOptions::default();
        let mut ctx = CompileCtx::new(&program, &opts);
        ctx.compile(0).expect("compiles");
        let err = expand(&mut ctx, 0).unwrap_err();
        assert!(matches!(err, CompileError::LeftRecursion { .. }));
    }

    #[test]
    fn nullable_shared_reference_is_not_left_recursion() {
        // A := B B with nullable B — the shared region's exit stitches feed
        // back into its entries, which must not read as recursion.
        let mut program = Program::new();
        let module = program.add_module("m.ls");
        let z = literal(&mut program, b"z");
        let b_rhs = program.arena.alloc(ExprKind::Question(z), Loc::default());
        program.add_define(module, "B", b_rhs, false, false);
        let r1 = collapse(&mut program, "B");
        let r2 = collapse(&mut program, "B");
        let a_rhs = program.arena.alloc(ExprKind::Concat(r1, r2), Loc::default());
        program.add_define(module, "A", a_rhs, true, false);
        prepare(&mut program);

        let opts = CompileOptions::default();
        let mut ctx = CompileCtx::new(&program, &opts);
        ctx.compile(1).expect("compiles");
        let anno = expand(&mut ctx, 1).expect("not recursive");
        assert!(anno.fsa.accepts(b""));
        assert!(anno.fsa.accepts(b"z"));
        assert!(anno.fsa.accepts(b"zzz"));
        assert!(!anno.fsa.accepts(b"y"));
    }

    #[test]
    fn embedded_region_has_no_annotations() {
        // A := "x" <B>;  B := "z"
        let mut program = Program::new();
        let module = program.add_module("m.ls");
        let b_rhs = literal(&mut program, b"z");
        program.add_define(module, "B", b_rhs, false, false);
        let x = literal(&mut program, b"x");
        let b_ref = embed(&mut program, "B");
        let a_rhs = program.arena.alloc(ExprKind::Concat(x, b_ref), Loc::default());
        program.add_define(module, "A", a_rhs, true, false);
        prepare(&mut program);

        let opts = CompileOptions::default();
        let mut ctx = CompileCtx::new(&program, &opts);
        ctx.compile(1).expect("compiles");
        let anno = expand(&mut ctx, 1).expect("expands");
        assert!(anno.fsa.accepts(b"xz"));
        assert!(!anno.fsa.accepts(b"x"));
        // B's tree never shows up in the expanded annotations.
        let carries_b_literal = anno
            .assoc
            .iter()
            .any(|assoc| assoc.iter().any(|&(e, _)| e == b_rhs));
        assert!(!carries_b_literal);
    }

    #[test]
    fn mutually_recursive_embeds_are_fatal() {
        let mut program = Program::new();
        let module = program.add_module("m.ls");
        let b_in_a = embed(&mut program, "B");
        program.add_define(module, "A", b_in_a, true, false);
        let a_in_b = embed(&mut program, "A");
        program.add_define(module, "B", a_in_b, false, false);
        prepare(&mut program);

        let opts = CompileOptions::default();
        let mut ctx = CompileCtx::new(&program, &opts);
        ctx.compile(0).expect("compiles");
        let err = expand(&mut ctx, 0).unwrap_err();
        assert!(matches!(err, CompileError::EmbedCycle { .. }));
    }
}
