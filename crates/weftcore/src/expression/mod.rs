//! Boolean condition expressions.
//!
//! Used by condition vertices and loop predicates. Expressions look like:
//! - `{{#classify.intent#}} == 'search'`
//! - `count < 3`
//! - `score >= 0.8 and not (tags contains 'spam')`
//! - `{{llm.text}} is not empty`

mod ast;
mod evaluator;
mod parser;

pub use ast::{Check, CompareOp, Expression, Operand};
pub use evaluator::{evaluate, values_equal};
pub use parser::parse;
