//! Finite-state automaton engine for the lexact transducer compiler.
//!
//! Automata are graphs of states whose edges carry half-open symbol ranges.
//! Symbols `[0, 256)` are input bytes; [`EPSILON`] marks empty transitions and
//! the band starting at [`SPECIAL_BASE`] holds placeholder symbols that stand
//! in for rule references until they are spliced away.

mod determinize;
mod minimize;
pub mod fsa;
pub mod partition;

pub use fsa::{Edge, Fsa, StateId, EPSILON, SPECIAL_BASE};
pub use partition::RangePartitioner;

use thiserror::Error;

/// Subset construction grew past the configured cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("determinized automaton exceeds {limit} states")]
pub struct StateLimitExceeded {
    pub limit: usize,
}
