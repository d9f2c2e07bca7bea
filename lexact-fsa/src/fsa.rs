//! The automaton graph: states, range-labeled edges, and the structural
//! operations that do not change the state numbering contract.

use rustc_hash::{FxHashMap, FxHashSet};

pub type StateId = usize;

/// Symbol reserved for empty transitions, stored as the range
/// `[EPSILON, EPSILON + 1)`.
pub const EPSILON: u32 = 256;
/// First symbol of the band reserved for unexpanded reference placeholders.
/// The `i`-th placeholder occupies `[SPECIAL_BASE + i, SPECIAL_BASE + i + 1)`.
pub const SPECIAL_BASE: u32 = 257;

/// A transition labeled with the half-open symbol range `[lo, hi)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub lo: u32,
    pub hi: u32,
    pub to: StateId,
}

impl Edge {
    pub fn is_epsilon(&self) -> bool {
        self.lo == EPSILON
    }
}

/// Merge adjacent entries of a sorted edge list that continue the same range
/// to the same target.
pub(crate) fn coalesce(edges: &mut Vec<Edge>) {
    let mut out: Vec<Edge> = Vec::with_capacity(edges.len());
    for e in edges.drain(..) {
        match out.last_mut() {
            Some(last) if last.hi == e.lo && last.to == e.to => last.hi = e.hi,
            _ => out.push(e),
        }
    }
    *edges = out;
}

/// A finite-state automaton. States are `0..n`; every adjacency list is kept
/// sorted by `(lo, hi, to)` and `finals` is kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fsa {
    pub start: StateId,
    pub finals: Vec<StateId>,
    pub adj: Vec<Vec<Edge>>,
}

impl Fsa {
    pub fn with_states(n: usize) -> Self {
        Fsa {
            start: 0,
            finals: Vec::new(),
            adj: vec![Vec::new(); n],
        }
    }

    pub fn n(&self) -> usize {
        self.adj.len()
    }

    pub fn add_state(&mut self) -> StateId {
        self.adj.push(Vec::new());
        self.adj.len() - 1
    }

    pub fn add_edge(&mut self, from: StateId, lo: u32, hi: u32, to: StateId) {
        debug_assert!(lo < hi);
        let e = Edge { lo, hi, to };
        let list = &mut self.adj[from];
        if let Err(i) = list.binary_search(&e) {
            list.insert(i, e);
        }
    }

    pub fn add_epsilon(&mut self, from: StateId, to: StateId) {
        self.add_edge(from, EPSILON, EPSILON + 1, to);
    }

    pub fn set_final(&mut self, s: StateId) {
        if let Err(i) = self.finals.binary_search(&s) {
            self.finals.insert(i, s);
        }
    }

    pub fn is_final(&self, s: StateId) -> bool {
        self.finals.binary_search(&s).is_ok()
    }

    /// Copies another automaton's states and edges into this one, shifting
    /// state numbers past the existing ones. `start` and `finals` are left for
    /// the caller to wire up. Returns the offset of the copy.
    pub fn merge_in(&mut self, other: &Fsa) -> usize {
        let offset = self.adj.len();
        for edges in &other.adj {
            let mut shifted = edges.clone();
            for e in &mut shifted {
                e.to += offset;
            }
            self.adj.push(shifted);
        }
        offset
    }

    /// All states reachable from `seed` through epsilon edges, sorted,
    /// including the seed states themselves.
    pub fn epsilon_closure(&self, seed: &[StateId]) -> Vec<StateId> {
        let mut visited: FxHashSet<StateId> = FxHashSet::default();
        let mut stack: Vec<StateId> = Vec::new();
        for &s in seed {
            if visited.insert(s) {
                stack.push(s);
            }
        }
        while let Some(s) = stack.pop() {
            for e in &self.adj[s] {
                if e.is_epsilon() && visited.insert(e.to) {
                    stack.push(e.to);
                }
            }
        }
        let mut closure: Vec<StateId> = visited.into_iter().collect();
        closure.sort_unstable();
        closure
    }

    /// Keeps only states reachable from `start`, renumbering survivors in
    /// ascending order. Returns the trimmed automaton and the old-to-new map.
    pub fn accessible(&self) -> (Fsa, Vec<Option<StateId>>) {
        let mut reached = vec![false; self.n()];
        let mut stack = vec![self.start];
        reached[self.start] = true;
        while let Some(s) = stack.pop() {
            for e in &self.adj[s] {
                if !reached[e.to] {
                    reached[e.to] = true;
                    stack.push(e.to);
                }
            }
        }
        self.rebuild(&reached)
    }

    /// Keeps only states that can reach a final state. `start` is always
    /// retained, even when the language is empty.
    pub fn co_accessible(&self) -> (Fsa, Vec<Option<StateId>>) {
        let mut rev: Vec<Vec<StateId>> = vec![Vec::new(); self.n()];
        for (s, edges) in self.adj.iter().enumerate() {
            for e in edges {
                rev[e.to].push(s);
            }
        }
        let mut keep = vec![false; self.n()];
        let mut stack: Vec<StateId> = Vec::new();
        for &f in &self.finals {
            if !keep[f] {
                keep[f] = true;
                stack.push(f);
            }
        }
        while let Some(s) = stack.pop() {
            for &p in &rev[s] {
                if !keep[p] {
                    keep[p] = true;
                    stack.push(p);
                }
            }
        }
        keep[self.start] = true;
        self.rebuild(&keep)
    }

    fn rebuild(&self, keep: &[bool]) -> (Fsa, Vec<Option<StateId>>) {
        let mut map: Vec<Option<StateId>> = vec![None; self.n()];
        let mut next = 0;
        for (s, &kept) in keep.iter().enumerate() {
            if kept {
                map[s] = Some(next);
                next += 1;
            }
        }
        let mut adj: Vec<Vec<Edge>> = Vec::with_capacity(next);
        for (s, &kept) in keep.iter().enumerate() {
            if !kept {
                continue;
            }
            // The old-to-new map is monotone, so edge order survives.
            let edges = self.adj[s]
                .iter()
                .filter_map(|e| {
                    map[e.to].map(|to| Edge {
                        lo: e.lo,
                        hi: e.hi,
                        to,
                    })
                })
                .collect();
            adj.push(edges);
        }
        let start = map[self.start].unwrap_or(0);
        let finals = self.finals.iter().filter_map(|&f| map[f]).collect();
        (Fsa { start, finals, adj }, map)
    }

    /// Completes a deterministic automaton over `[lo, hi)` by routing missing
    /// symbols to a fresh dead state. Returns the dead state if one was added.
    pub fn totalize(&mut self, lo: u32, hi: u32) -> Option<StateId> {
        let n = self.n();
        let mut gaps: Vec<Vec<(u32, u32)>> = Vec::with_capacity(n);
        let mut any = false;
        for s in 0..n {
            let mut cursor = lo;
            let mut state_gaps = Vec::new();
            for e in &self.adj[s] {
                let elo = e.lo.max(lo);
                let ehi = e.hi.min(hi);
                if elo >= ehi {
                    continue;
                }
                if elo > cursor {
                    state_gaps.push((cursor, elo));
                }
                cursor = cursor.max(ehi);
            }
            if cursor < hi {
                state_gaps.push((cursor, hi));
            }
            any |= !state_gaps.is_empty();
            gaps.push(state_gaps);
        }
        if !any {
            return None;
        }
        let dead = self.add_state();
        self.add_edge(dead, lo, hi, dead);
        for (s, state_gaps) in gaps.into_iter().enumerate() {
            for (glo, ghi) in state_gaps {
                self.add_edge(s, glo, ghi, dead);
            }
        }
        Some(dead)
    }

    /// Flips finality of every state.
    pub fn complement_finals(&mut self) {
        let flipped = (0..self.n()).filter(|&s| !self.is_final(s)).collect();
        self.finals = flipped;
    }

    /// Pairwise product of two deterministic, epsilon-free automata over the
    /// reachable pairs. `accept` decides finality from the component
    /// finalities. Returns the product and the pair backing each new state.
    pub fn product(
        &self,
        other: &Fsa,
        accept: impl Fn(bool, bool) -> bool,
    ) -> (Fsa, Vec<(StateId, StateId)>) {
        let mut map: FxHashMap<(StateId, StateId), StateId> = FxHashMap::default();
        let mut pairs: Vec<(StateId, StateId)> = vec![(self.start, other.start)];
        map.insert((self.start, other.start), 0);
        let mut adj: Vec<Vec<Edge>> = Vec::new();
        let mut i = 0;
        while i < pairs.len() {
            let (s1, s2) = pairs[i];
            let (ea, eb) = (&self.adj[s1], &other.adj[s2]);
            let mut edges: Vec<Edge> = Vec::new();
            let (mut x, mut y) = (0, 0);
            while x < ea.len() && y < eb.len() {
                let lo = ea[x].lo.max(eb[y].lo);
                let hi = ea[x].hi.min(eb[y].hi);
                if lo < hi {
                    let key = (ea[x].to, eb[y].to);
                    let fresh = pairs.len();
                    let to = *map.entry(key).or_insert_with(|| {
                        pairs.push(key);
                        fresh
                    });
                    edges.push(Edge { lo, hi, to });
                }
                if ea[x].hi <= eb[y].hi {
                    x += 1;
                } else {
                    y += 1;
                }
            }
            coalesce(&mut edges);
            adj.push(edges);
            i += 1;
        }
        let finals = (0..pairs.len())
            .filter(|&id| accept(self.is_final(pairs[id].0), other.is_final(pairs[id].1)))
            .collect();
        (
            Fsa {
                start: 0,
                finals,
                adj,
            },
            pairs,
        )
    }

    /// Runs the automaton on a byte string, epsilon transitions included.
    pub fn accepts(&self, input: &[u8]) -> bool {
        let mut current = self.epsilon_closure(&[self.start]);
        for &b in input {
            let mut next: Vec<StateId> = Vec::new();
            for &s in &current {
                for e in &self.adj[s] {
                    if e.lo <= b as u32 && (b as u32) < e.hi {
                        next.push(e.to);
                    }
                }
            }
            next.sort_unstable();
            next.dedup();
            if next.is_empty() {
                return false;
            }
            current = self.epsilon_closure(&next);
        }
        current.iter().any(|&s| self.is_final(s))
    }
}
