//! Action scheduling: turning per-state annotations into per-transition
//! action sequences, and the structured output handed to the emitter.

use lexact_fsa::StateId;
use rustc_hash::FxHashMap;

use crate::anno::{AnnoFsa, Assoc};
use crate::ast::{DefineId, ExprId, ExprTag, Program};
use crate::preprocess::find_lca;

/// All transitions from one state into one target: the byte ranges taking
/// them and the action code they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionGroup {
    pub target: StateId,
    /// Sorted, coalesced half-open byte ranges.
    pub ranges: Vec<(u32, u32)>,
    /// Action snippets in execution order, joined with newlines. Formatting
    /// beyond the order is the emitter's business.
    pub actions: String,
}

/// The emitter's view of one exported rule.
#[derive(Debug, Clone)]
pub struct RuleTransducer {
    pub name: String,
    pub start: StateId,
    pub finals: Vec<StateId>,
    /// Indexed by source state; groups appear in order of their first range.
    pub transitions: Vec<Vec<TransitionGroup>>,
}

impl RuleTransducer {
    /// One step of the emitted transition function.
    pub fn step(&self, state: StateId, byte: u8) -> Option<StateId> {
        let symbol = byte as u32;
        for group in &self.transitions[state] {
            for &(lo, hi) in &group.ranges {
                if lo <= symbol && symbol < hi {
                    return Some(group.target);
                }
            }
        }
        None
    }

    pub fn accepts(&self, input: &[u8]) -> bool {
        let mut state = self.start;
        for &b in input {
            match self.step(state, b) {
                Some(next) => state = next,
                None => return false,
            }
        }
        self.finals.binary_search(&state).is_ok()
    }

    /// The action text of the `from` to `to` transition, if one exists.
    pub fn actions_between(&self, from: StateId, to: StateId) -> Option<&str> {
        self.transitions[from]
            .iter()
            .find(|g| g.target == to)
            .map(|g| g.actions.as_str())
    }
}

/// Expressions whose scope contains a state: the state's own annotations
/// plus, walking them in `pre` order, every ancestor up to (but excluding)
/// the lowest common ancestor with the previous annotation. The result is
/// re-sorted by expression with tags or-merged, ready for merge-joins.
fn find_within(program: &Program, assoc: &Assoc) -> Assoc {
    let arena = &program.arena;
    let mut entries = assoc.clone();
    entries.sort_by_key(|&(e, t)| (arena[e].pre, e, t));

    let mut within: Vec<(ExprId, ExprTag)> = Vec::new();
    let mut previous: Option<ExprId> = None;
    for (expr, tag) in entries {
        let stop = previous.and_then(|p| find_lca(arena, p, expr));
        previous = Some(expr);
        let mut walk = Some(expr);
        while walk != stop {
            match walk {
                Some(node) => {
                    within.push((node, tag));
                    walk = arena[node].parent();
                }
                None => break,
            }
        }
    }

    within.sort_unstable_by_key(|&(e, t)| (e, t));
    let mut merged: Assoc = Vec::with_capacity(within.len());
    for (expr, tag) in within {
        match merged.last_mut() {
            Some((prev, prev_tag)) if *prev == expr => *prev_tag |= tag,
            _ => merged.push((expr, tag)),
        }
    }
    merged
}

/// The four action blocks of one transition, in their fixed order: leave
/// scopes present only at the source, enter scopes present only at the
/// destination, transit scopes present at both, and finish scopes present at
/// both whose destination role is accepting. Each block is a merge-join over
/// the pre-sorted `within` sets; action lists are emitted in source order.
fn action_text(program: &Program, source: &Assoc, dest: &Assoc) -> String {
    let arena = &program.arena;
    let mut snippets: Vec<&str> = Vec::new();

    let mut j = 0;
    for &(expr, _) in source {
        while j < dest.len() && dest[j].0 < expr {
            j += 1;
        }
        if j >= dest.len() || dest[j].0 != expr {
            for action in &arena[expr].leaving {
                snippets.push(program.action_code(action));
            }
        }
    }

    let mut i = 0;
    for &(expr, _) in dest {
        while i < source.len() && source[i].0 < expr {
            i += 1;
        }
        if i >= source.len() || source[i].0 != expr {
            for action in &arena[expr].entering {
                snippets.push(program.action_code(action));
            }
        }
    }

    let mut i = 0;
    for &(expr, _) in dest {
        while i < source.len() && source[i].0 < expr {
            i += 1;
        }
        if i < source.len() && source[i].0 == expr {
            for action in &arena[expr].transiting {
                snippets.push(program.action_code(action));
            }
        }
    }

    let mut i = 0;
    for &(expr, tag) in dest {
        while i < source.len() && source[i].0 < expr {
            i += 1;
        }
        if i < source.len() && source[i].0 == expr && tag.contains(ExprTag::FINAL) {
            for action in &arena[expr].finishing {
                snippets.push(program.action_code(action));
            }
        }
    }

    snippets.join("\n")
}

/// Derives the transition table of a finished rule automaton. Transitions
/// are grouped by destination, so input ranges sharing a target share one
/// action text.
pub fn schedule(program: &Program, def: DefineId, anno: &AnnoFsa) -> RuleTransducer {
    let withins: Vec<Assoc> = (0..anno.fsa.n())
        .map(|u| find_within(program, &anno.assoc[u]))
        .collect();

    let mut transitions = Vec::with_capacity(anno.fsa.n());
    for u in 0..anno.fsa.n() {
        let mut groups: Vec<TransitionGroup> = Vec::new();
        let mut group_of: FxHashMap<StateId, usize> = FxHashMap::default();
        for e in &anno.fsa.adj[u] {
            let slot = *group_of.entry(e.to).or_insert_with(|| {
                groups.push(TransitionGroup {
                    target: e.to,
                    ranges: Vec::new(),
                    actions: action_text(program, &withins[u], &withins[e.to]),
                });
                groups.len() - 1
            });
            let group = &mut groups[slot];
            match group.ranges.last_mut() {
                Some(last) if last.1 == e.lo => last.1 = e.hi,
                _ => group.ranges.push((e.lo, e.hi)),
            }
        }
        transitions.push(groups);
    }

    RuleTransducer {
        name: program.defines[def].lhs.clone(),
        start: anno.fsa.start,
        finals: anno.fsa.finals.clone(),
        transitions,
    }
}
