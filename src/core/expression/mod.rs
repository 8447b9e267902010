//! The expression engine.
//!
//! Compiles short binding expressions (`a.b + c | filter:arg`) into
//! reusable evaluators over a dynamic value domain.
//!
//! # Architecture
//!
//! ```text
//! Expression Text
//!        │
//!        ▼
//!    ┌───────────┐
//!    │   Lexer   │  (token stream)
//!    └───────────┘
//!        │
//!        ▼
//!    ┌───────────┐
//!    │  Parser   │  (AST + constant / input-set metadata)
//!    └───────────┘
//!        │
//!        ▼
//!    ┌───────────┐
//!    │ Compiler  │  (cached, reusable evaluator)
//!    └───────────┘
//!        │
//!        ▼
//!    evaluate(scope, locals) → Value
//! ```
//!
//! Evaluation resolves free identifiers against a caller-supplied scope
//! object (with optional locals layered on top), guarded by the sandbox
//! checks in [`sandbox`].

pub mod ast;
mod compile;
mod data;
mod error;
mod lexer;
mod ops;
mod parser;
mod registry;
pub mod sandbox;
mod value;

pub use compile::{CompiledExpression, Compiler};
pub use data::{from_json, to_json};
pub use error::{EvalResult, ExprError};
pub use lexer::{lex, Lexer, Token};
pub use parser::{parse, Parser};
pub use registry::{Filter, FilterFactory, FilterRegistry};
pub use value::{
    fmt_number, new_array, new_object, ArrayRef, FnKind, Function, NativeFn, ObjectRef, Value,
};
