//! Switches the surrounding driver passes through to the core.

/// Core-relevant compilation options. The driver's dump and emission flags
/// never reach this crate; it returns structured data either way.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Accept every substring of each exported rule's language. Rules marked
    /// `intact` are exempt.
    pub substring_grammar: bool,
    /// Hard cap on every determinization; exceeding it aborts the rule
    /// instead of thrashing.
    pub state_limit: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            substring_grammar: false,
            state_limit: 1 << 16,
        }
    }
}
