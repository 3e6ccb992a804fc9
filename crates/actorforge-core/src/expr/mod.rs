//! The expression language used by parameters, guards and actions.
//!
//! The pipeline never calls the parser directly; it goes through the
//! [`ExpressionParser`] capability held by the container so the dialect can
//! be replaced without touching any pass.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp, BUILTIN_CONSTANTS, PSEUDO_VARIABLES};
pub use eval::{evaluate, EmptyScope, Scope};

use crate::data::TokenError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("lexical error at offset {offset} in `{source_text}`: {message}")]
    Lex {
        offset: usize,
        message: String,
        source_text: String,
    },

    #[error("syntax error at offset {offset} in `{source_text}`: {message}")]
    Parse {
        offset: usize,
        message: String,
        source_text: String,
    },

    #[error("unbound identifier `{0}`")]
    Unbound(String),

    #[error("{0}")]
    Unsupported(String),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Parse `source` with the default grammar.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    parser::Parser::new(source)?.parse()
}

/// Injected expression capability.
pub trait ExpressionParser: Send + Sync {
    fn parse(&self, source: &str) -> Result<Expr, ExprError>;

    fn free_variables(&self, expr: &Expr) -> Vec<String> {
        expr.free_variables()
    }

    fn evaluate(&self, expr: &Expr, scope: &dyn Scope) -> Result<crate::data::Token, ExprError> {
        evaluate(expr, scope)
    }
}

/// The built-in expression dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExpressionParser;

impl ExpressionParser for DefaultExpressionParser {
    fn parse(&self, source: &str) -> Result<Expr, ExprError> {
        parse(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_variables_are_ordered_and_unique() {
        let parser = DefaultExpressionParser;
        let expr = parser.parse("b + a * b + PI + time").unwrap();
        assert_eq!(parser.free_variables(&expr), vec!["b", "a", "time"]);
    }

    #[test]
    fn test_literals_have_no_free_variables() {
        let expr = parse("{1, 2} ").unwrap();
        assert!(expr.free_variables().is_empty());
    }
}
