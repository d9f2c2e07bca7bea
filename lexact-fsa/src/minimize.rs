//! Partition-refinement minimization.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::fsa::{coalesce, Edge, Fsa, StateId};
use crate::partition::RangePartitioner;

impl Fsa {
    /// Minimizes a deterministic, epsilon-free automaton by partition
    /// refinement, splitting blocks on preimages under each atomic symbol
    /// range. `initial[s]` seeds the partition; states in different seed
    /// classes are never merged. Callers must already separate final from
    /// non-final states in the seeds — the annotation layer does, since its
    /// seeds are `(finality, annotation set)` classes.
    ///
    /// Returns the minimized automaton and the old-state to new-state map.
    pub fn minimize(&self, initial: &[u32]) -> (Fsa, Vec<u32>) {
        let n = self.n();
        if n == 0 {
            return (self.clone(), Vec::new());
        }
        debug_assert_eq!(initial.len(), n);

        // Atomic ranges across the whole automaton; every edge is a union of
        // consecutive atoms.
        let atoms: Vec<(u32, u32)> =
            RangePartitioner::new(self.adj.iter().flatten().map(|e| (e.lo, e.hi))).collect();
        let k = atoms.len();

        // Missing transitions go to an implicit dead state so partial
        // automata refine exactly like total ones.
        let dead = n;
        let total = n + 1;
        let mut delta = vec![dead as u32; total * k];
        for s in 0..n {
            for e in &self.adj[s] {
                let mut a = atoms.partition_point(|&(lo, _)| lo < e.lo);
                while a < k && atoms[a].1 <= e.hi {
                    delta[s * k + a] = e.to as u32;
                    a += 1;
                }
            }
        }

        // Seed blocks: the caller's classes plus a fresh one for the dead
        // state, so it can never merge with a real state.
        let dead_seed = initial.iter().copied().max().map_or(0, |m| m + 1);
        let mut seed_index: FxHashMap<u32, u32> = FxHashMap::default();
        let mut blocks: Vec<Vec<u32>> = Vec::new();
        let mut find = vec![0u32; total];
        for s in 0..total {
            let seed = if s == dead { dead_seed } else { initial[s] };
            let fresh = blocks.len() as u32;
            let id = *seed_index.entry(seed).or_insert(fresh);
            if id == fresh {
                blocks.push(Vec::new());
            }
            blocks[id as usize].push(s as u32);
            find[s] = id;
        }

        // Reverse transition index: inv[t * k + a] = predecessors of t on a.
        let mut inv: Vec<Vec<u32>> = vec![Vec::new(); total * k];
        for s in 0..total {
            for a in 0..k {
                let t = delta[s * k + a] as usize;
                inv[t * k + a].push(s as u32);
            }
        }

        let mut worklist: Vec<u32> = (0..blocks.len() as u32).collect();
        let mut in_worklist = vec![true; blocks.len()];
        let mut preimage_by_block: FxHashMap<u32, Vec<u32>> = FxHashMap::default();

        while let Some(splitter) = worklist.pop() {
            in_worklist[splitter as usize] = false;
            let splitter_states = blocks[splitter as usize].clone();

            for sym in 0..k {
                preimage_by_block.clear();
                for &j in &splitter_states {
                    for &p in &inv[j as usize * k + sym] {
                        preimage_by_block.entry(find[p as usize]).or_default().push(p);
                    }
                }

                for (&bid, hits) in &preimage_by_block {
                    // States may have moved since the preimage was grouped;
                    // keep only the ones still in this block.
                    let mut in_x: FxHashSet<u32> = FxHashSet::default();
                    for &s in hits {
                        if find[s as usize] == bid {
                            in_x.insert(s);
                        }
                    }
                    let y_len = blocks[bid as usize].len();
                    if in_x.is_empty() || in_x.len() == y_len {
                        continue;
                    }

                    let mut stay = Vec::with_capacity(in_x.len());
                    let mut moved = Vec::with_capacity(y_len - in_x.len());
                    for &s in &blocks[bid as usize] {
                        if in_x.contains(&s) {
                            stay.push(s);
                        } else {
                            moved.push(s);
                        }
                    }
                    let fresh = blocks.len() as u32;
                    for &s in &moved {
                        find[s as usize] = fresh;
                    }
                    blocks[bid as usize] = stay;
                    blocks.push(moved);
                    in_worklist.push(false);

                    // Enqueue the smaller half (both, if the parent is
                    // already queued).
                    if in_worklist[bid as usize] {
                        in_worklist[fresh as usize] = true;
                        worklist.push(fresh);
                    } else if blocks[bid as usize].len() <= blocks[fresh as usize].len() {
                        in_worklist[bid as usize] = true;
                        worklist.push(bid);
                    } else {
                        in_worklist[fresh as usize] = true;
                        worklist.push(fresh);
                    }
                }
            }
        }

        // Renumber the surviving classes of real states by first occurrence.
        let mut class_renumber: Vec<Option<u32>> = vec![None; blocks.len()];
        let mut old_to_new = vec![0u32; n];
        let mut next = 0u32;
        for s in 0..n {
            let block = find[s] as usize;
            let class = match class_renumber[block] {
                Some(c) => c,
                None => {
                    let c = next;
                    class_renumber[block] = Some(c);
                    next += 1;
                    c
                }
            };
            old_to_new[s] = class;
        }

        let m = next as usize;
        let mut adj: Vec<Vec<Edge>> = vec![Vec::new(); m];
        let mut built = vec![false; m];
        for s in 0..n {
            let class = old_to_new[s] as usize;
            if built[class] {
                continue;
            }
            built[class] = true;
            let mut edges: Vec<Edge> = self.adj[s]
                .iter()
                .map(|e| Edge {
                    lo: e.lo,
                    hi: e.hi,
                    to: old_to_new[e.to] as usize,
                })
                .collect();
            edges.sort_unstable();
            edges.dedup();
            coalesce(&mut edges);
            adj[class] = edges;
        }
        let start = old_to_new[self.start] as usize;
        let mut finals: Vec<StateId> = self.finals.iter().map(|&f| old_to_new[f] as usize).collect();
        finals.sort_unstable();
        finals.dedup();

        (Fsa { start, finals, adj }, old_to_new)
    }
}
