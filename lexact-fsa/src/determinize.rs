//! Subset construction.

use rustc_hash::FxHashMap;

use crate::fsa::{coalesce, Edge, Fsa, StateId};
use crate::partition::RangePartitioner;
use crate::StateLimitExceeded;

struct SubsetBuilder<'a> {
    nfa: &'a Fsa,
    limit: usize,
    subsets: Vec<Vec<StateId>>,
    interned: FxHashMap<Vec<StateId>, StateId>,
    adj: Vec<Vec<Edge>>,
    finals: Vec<StateId>,
}

impl<'a> SubsetBuilder<'a> {
    fn new(nfa: &'a Fsa, limit: usize) -> Self {
        Self {
            nfa,
            limit,
            subsets: Vec::new(),
            interned: FxHashMap::default(),
            adj: Vec::new(),
            finals: Vec::new(),
        }
    }

    fn intern(
        &mut self,
        subset: Vec<StateId>,
        on_subset: &mut impl FnMut(&[StateId]),
    ) -> Result<StateId, StateLimitExceeded> {
        if let Some(&id) = self.interned.get(&subset) {
            return Ok(id);
        }
        if self.subsets.len() >= self.limit {
            return Err(StateLimitExceeded { limit: self.limit });
        }
        let id = self.subsets.len();
        on_subset(&subset);
        if subset.iter().any(|&s| self.nfa.is_final(s)) {
            self.finals.push(id);
        }
        self.interned.insert(subset.clone(), id);
        self.subsets.push(subset);
        self.adj.push(Vec::new());
        Ok(id)
    }

    fn build(
        mut self,
        mut on_subset: impl FnMut(&[StateId]),
    ) -> Result<Fsa, StateLimitExceeded> {
        let seed = self.nfa.epsilon_closure(&[self.nfa.start]);
        self.intern(seed, &mut on_subset)?;

        let mut current = 0;
        while current < self.subsets.len() {
            let members = self.subsets[current].clone();
            let mut nfa_edges: Vec<Edge> = Vec::new();
            for &s in &members {
                for e in &self.nfa.adj[s] {
                    if !e.is_epsilon() {
                        nfa_edges.push(*e);
                    }
                }
            }

            let mut out: Vec<Edge> = Vec::new();
            for (lo, hi) in RangePartitioner::new(nfa_edges.iter().map(|e| (e.lo, e.hi))) {
                let mut targets: Vec<StateId> = nfa_edges
                    .iter()
                    .filter(|e| e.lo <= lo && lo < e.hi)
                    .map(|e| e.to)
                    .collect();
                targets.sort_unstable();
                targets.dedup();
                let dest = self.nfa.epsilon_closure(&targets);
                let to = self.intern(dest, &mut on_subset)?;
                out.push(Edge { lo, hi, to });
            }
            coalesce(&mut out);
            self.adj[current] = out;
            current += 1;
        }

        Ok(Fsa {
            start: 0,
            finals: self.finals,
            adj: self.adj,
        })
    }
}

impl Fsa {
    /// Classical subset construction with epsilon closure. Non-epsilon labels,
    /// the reference placeholders included, take part as ordinary symbols;
    /// overlapping ranges are split into atomic pieces so every resulting
    /// state has disjoint outgoing ranges.
    ///
    /// `on_subset` is invoked once per constructed state, in state order, with
    /// the sorted source subset; the annotation layer uses it to union the
    /// member annotations.
    pub fn determinize(
        &self,
        limit: usize,
        on_subset: impl FnMut(&[StateId]),
    ) -> Result<Fsa, StateLimitExceeded> {
        SubsetBuilder::new(self, limit).build(on_subset)
    }
}
