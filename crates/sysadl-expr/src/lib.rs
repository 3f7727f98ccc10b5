mod ast;
mod dependency;
mod eval;
mod lexer;
mod parser;
mod rng;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use dependency::{is_valid_dependency, DependencyTracker, DependencyTrackerStatistics};
pub use eval::{Evaluator, LayeredScope, Scope, StateScope};
pub use parser::parse_expression;

#[cfg(test)]
mod eval_tests;
