//! PROG: a small dynamically typed scripting language.
//!
//! Source text goes through [`tokenizer::tokenize`], [`parser::parse`] and is
//! then executed by a tree-walking [`Interpreter`] with lexical scoping,
//! closures and a handful of built-in functions.

pub mod cli;
pub mod environment;
pub mod error;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod stdlib;
pub mod tokenizer;

pub use error::{Error, Result};
pub use runtime::{Interpreter, Value};

use parser::Stmt;

// Recursive descent in both the parser and the evaluator grows the host
// stack in chunks once less than the red zone is left.
pub(crate) const STACK_RED_ZONE: usize = 64 * 1024;
pub(crate) const STACK_GROWTH: usize = 1024 * 1024;

/// Tokenizes and parses `source` without running it.
pub fn parse_source(source: &str) -> Result<Vec<Stmt>> {
    let tokens = tokenizer::tokenize(source)?;
    parser::parse(&tokens)
}

/// Runs `source` in a fresh interpreter that prints to stdout.
pub fn run(source: &str) -> Result<()> {
    Interpreter::new().exec(source)
}
