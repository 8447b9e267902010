//! Error types for expression compilation and evaluation.
//!
//! Compilation errors (lex, parse, compile) surface immediately from the
//! compiler entry point; no partial evaluator is ever returned. At
//! evaluation time the only error an expression can raise is a security
//! rejection from one of the sandbox guards.

use std::fmt;

/// An error raised while compiling or evaluating an expression.
#[derive(Debug, Clone)]
pub enum ExprError {
    /// Malformed literal, unknown character, or unmatched quote.
    Lex {
        message: String,
        /// Byte index into the source where the lexer stopped.
        index: usize,
    },
    /// An expected token was missing or the input ended early.
    Parse {
        message: String,
        /// Byte index of the offending token.
        index: usize,
    },
    /// The expression parsed but cannot be lowered, e.g. a non-assignable
    /// assignment target or a filter name the registry does not know.
    Compile { message: String },
    /// A sandbox guard rejected a value or member name.
    Security { message: String },
}

impl ExprError {
    /// Create a lex error at the given source index.
    pub fn lex(message: impl Into<String>, index: usize) -> Self {
        ExprError::Lex {
            message: message.into(),
            index,
        }
    }

    /// Create a parse error at the given source index.
    pub fn parse(message: impl Into<String>, index: usize) -> Self {
        ExprError::Parse {
            message: message.into(),
            index,
        }
    }

    /// Create a compile error.
    pub fn compile(message: impl Into<String>) -> Self {
        ExprError::Compile {
            message: message.into(),
        }
    }

    /// Create a security error.
    pub fn security(message: impl Into<String>) -> Self {
        ExprError::Security {
            message: message.into(),
        }
    }

    /// Whether this is a sandbox rejection.
    pub fn is_security(&self) -> bool {
        matches!(self, ExprError::Security { .. })
    }
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Lex { message, index } => {
                write!(f, "lex error at {}: {}", index, message)
            }
            ExprError::Parse { message, index } => {
                write!(f, "parse error at {}: {}", index, message)
            }
            ExprError::Compile { message } => write!(f, "compile error: {}", message),
            ExprError::Security { message } => write!(f, "security error: {}", message),
        }
    }
}

impl std::error::Error for ExprError {}

/// Result type for expression operations.
pub type EvalResult<T> = Result<T, ExprError>;
