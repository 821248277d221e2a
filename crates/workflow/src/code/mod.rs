//! Inline code blocks.
//!
//! A task engine may end its run with a small block of arithmetic and
//! data-shaping statements. The block runs in a closed expression language
//! (a Python-flavoured subset): assignments, literals, arithmetic,
//! comparisons, boolean logic, indexing and a fixed set of built-ins
//! (`len`, `range`, `sum`, `min`, `max`, `sorted`). There is no attribute
//! access, no imports, no user-defined functions and no loops, so a block
//! cannot reach the host. Output size and nesting are bounded.
//!
//! The result is every top-level binding the block created.

mod eval;
mod lexer;
mod parser;

use serde_json::{Map, Value};

/// Largest list any expression may produce.
pub const MAX_ELEMENTS: usize = 10_000;

/// Longest string any expression may produce, in characters.
pub const MAX_STRING_LEN: usize = 100_000;

/// Deepest expression nesting accepted.
pub const MAX_DEPTH: usize = 64;

/// Most statements a single block may contain.
pub const MAX_STATEMENTS: usize = 1_000;

/// Largest combined size of any one value, and of all bindings of a block.
/// Every scalar and container counts one unit; strings and object keys add
/// one unit per character.
pub const MAX_TOTAL_SIZE: usize = 200_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodeError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("error on line {line}: {message}")]
    Runtime { line: usize, message: String },

    #[error("limit exceeded: {0}")]
    Limit(String),
}

/// Run a code block and return its bindings.
pub fn execute(source: &str) -> Result<Map<String, Value>, CodeError> {
    let tokens = lexer::tokenize(source)?;
    let program = parser::parse(&tokens)?;
    eval::run(&program)
}
