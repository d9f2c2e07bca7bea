//! Expression-tree preprocessing: DFS traversal labels and the binary-lifting
//! ancestor tables that make lowest-common-ancestor queries `O(log depth)`.

use crate::ast::{ExprArena, ExprId, ExprKind};
use crate::error::CompileError;

/// Labels one rule's tree. `pre` is assigned on entry from a monotone
/// counter, `post` on exit with the counter's current value, so
/// `a.pre <= d.pre && d.post <= a.post` is the ancestor test. `depth` and
/// `anc` feed [`find_lca`]. Repeat bounds are validated here, before any
/// automaton exists.
///
/// The labels are computed once per rule and never change afterwards; the
/// collapse expander relies on them staying stable across every rule a
/// compilation touches.
pub fn preprocess(arena: &mut ExprArena, root: ExprId) -> Result<(), CompileError> {
    enum Step {
        Enter(ExprId, Option<ExprId>, u32),
        Exit(ExprId),
    }

    let mut tick: u32 = 0;
    let mut stack = vec![Step::Enter(root, None, 0)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(id, parent, depth) => {
                if let ExprKind::Repeat {
                    lo, hi: Some(hi), ..
                } = arena[id].kind
                {
                    if hi < lo {
                        return Err(CompileError::RepeatBounds {
                            lo,
                            hi,
                            loc: arena[id].loc,
                        });
                    }
                }

                let mut anc: Vec<Option<ExprId>> = vec![parent];
                let mut k = 1;
                while 1u32 << k <= depth {
                    let half = anc[k - 1].and_then(|a| arena[a].anc.get(k - 1).copied().flatten());
                    anc.push(half);
                    k += 1;
                }

                let node = &mut arena[id];
                node.pre = tick;
                tick += 1;
                node.depth = depth;
                node.anc = anc;

                stack.push(Step::Exit(id));
                let children = arena[id].kind.children();
                for &child in children.iter().rev() {
                    stack.push(Step::Enter(child, Some(id), depth + 1));
                }
            }
            Step::Exit(id) => {
                arena[id].post = tick;
            }
        }
    }
    Ok(())
}

fn ancestor(arena: &ExprArena, x: ExprId, k: usize) -> Option<ExprId> {
    arena[x].anc.get(k).copied().flatten()
}

/// Deepest common ancestor of two nodes, or `None` when they live in
/// different trees — which happens once collapse expansion mixes annotations
/// from several rules on one state.
pub fn find_lca(arena: &ExprArena, mut u: ExprId, mut v: ExprId) -> Option<ExprId> {
    if arena[u].depth > arena[v].depth {
        std::mem::swap(&mut u, &mut v);
    }
    // Lift v to u's depth, largest jumps first.
    while arena[v].depth > arena[u].depth {
        let diff = arena[v].depth - arena[u].depth;
        let k = (u32::BITS - 1 - diff.leading_zeros()) as usize;
        v = ancestor(arena, v, k)?;
    }
    if u == v {
        return Some(u);
    }
    let mut k = arena[u].anc.len().max(1);
    while k > 0 {
        k -= 1;
        if let (Some(a), Some(b)) = (ancestor(arena, u, k), ancestor(arena, v, k)) {
            if a != b {
                u = a;
                v = b;
            }
        }
    }
    arena[u].parent()
}
