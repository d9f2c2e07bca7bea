//! Compiler core of the lexact transducer generator.
//!
//! Takes a parsed program of rule definitions — regular expressions with
//! embedded semantic actions — and produces, for every exported rule, a
//! minimal deterministic transducer: a transition table whose entries carry
//! the action code to run. Parsing, module loading, and the final textual
//! emission live in the surrounding driver; this crate starts at the
//! expression trees and stops at [`RuleTransducer`].
//!
//! The pipeline per exported rule: preprocess the trees (traversal labels,
//! ancestor tables), compile each rule to an annotated automaton, splice in
//! collapse/embed references, optionally apply the substring grammar, then
//! determinize, minimize, trim, and schedule the actions.

pub mod anno;
pub mod ast;
pub mod compile;
pub mod error;
mod expand;
pub mod options;
pub mod preprocess;
pub mod schedule;

pub use anno::AnnoFsa;
pub use ast::{
    Action, DefineId, DefineStmt, Expr, ExprArena, ExprId, ExprKind, ExprTag, Loc, Module,
    ModuleId, Program,
};
pub use compile::CompileCtx;
pub use error::CompileError;
pub use options::CompileOptions;
pub use schedule::{RuleTransducer, TransitionGroup};

/// Compiles every exported rule of the program, in definition order.
pub fn compile_program(
    program: &mut Program,
    opts: &CompileOptions,
) -> Result<Vec<RuleTransducer>, CompileError> {
    program.resolve_references()?;
    for def in 0..program.defines.len() {
        let rhs = program.defines[def].rhs;
        preprocess::preprocess(&mut program.arena, rhs)?;
    }

    let program = &*program;
    let mut ctx = CompileCtx::new(program, opts);
    let mut transducers = Vec::new();
    for def in 0..program.defines.len() {
        if program.defines[def].export {
            let anno = ctx.compile_export(def)?;
            transducers.push(schedule::schedule(program, def, &anno));
        }
    }
    Ok(transducers)
}
