//! Fatal compilation errors. Each carries the source span of the construct
//! that caused it; the driver renders them and sets the exit code.

use thiserror::Error;

use crate::ast::Loc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("undefined rule reference `{name}` at {loc}")]
    UndefinedReference { name: String, loc: Loc },

    /// An epsilon cycle survived reference expansion, meaning some collapse
    /// chain can re-enter itself without consuming input.
    #[error("rule `{rule}` at {loc} is left-recursive")]
    LeftRecursion { rule: String, loc: Loc },

    #[error("rule `{rule}` at {loc} embeds itself, directly or indirectly")]
    EmbedCycle { rule: String, loc: Loc },

    #[error("rule `{rule}` at {loc} needs more than {limit} states")]
    StateLimitExceeded { rule: String, limit: usize, loc: Loc },

    #[error("malformed repeat bounds {{{lo},{hi}}} at {loc}")]
    RepeatBounds { lo: u32, hi: u32, loc: Loc },
}
