//! Typed errors for expression handling and registry construction APIs.
//!
//! Most registry operations report failure through a `bool` return and an
//! error event instead of a `Result`; these types cover the places where a
//! caller asked for something explicitly and deserves to see why it failed.

use thiserror::Error;

/// Errors produced while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// The expression text could not be parsed.
    #[error("failed to parse expression '{expression}': {message}")]
    Syntax {
        /// Original expression text.
        expression: String,
        /// Parser diagnostic.
        message: String,
    },
    /// The expression parsed but could not be evaluated against the context.
    #[error("failed to evaluate expression '{expression}': {message}")]
    Eval {
        /// Original expression text.
        expression: String,
        /// Evaluator diagnostic.
        message: String,
    },
}

impl ExprError {
    pub fn expression(&self) -> &str {
        match self {
            ExprError::Syntax { expression, .. } | ExprError::Eval { expression, .. } => {
                expression
            }
        }
    }
}

/// Errors returned by the explicit construction APIs of the registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("value '{0}' is already registered")]
    DuplicateId(String),
    #[error(transparent)]
    Expression(#[from] ExprError),
}
