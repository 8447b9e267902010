//! minibind: a lightweight data-binding runtime.
//!
//! Two subsystems make up the crate:
//!
//! - an **expression engine** that compiles short textual expressions
//!   (`a.b + c | filter:arg`) into reusable evaluators bound against a
//!   scope object and optional locals, with a sandboxing contract over
//!   the value graph;
//! - a **dirty-checking scope** that polls registered watchers until
//!   their values stabilize (a *digest*), firing listeners on change and
//!   interleaving deferred and post-digest work.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use minibind::{Compiler, FilterRegistry, Scope, Value};
//!
//! let compiler = Rc::new(Compiler::new(Rc::new(FilterRegistry::new())));
//! let scope = Scope::new(compiler);
//!
//! scope.set("price", 2.5);
//! scope.set("qty", 4);
//! scope
//!     .watch("price * qty", |total, _, _| {
//!         println!("total: {}", total);
//!     }, false)
//!     .unwrap();
//! scope.digest().unwrap();
//!
//! assert_eq!(scope.eval_expr("price * qty").unwrap(), Value::Number(10.0));
//! ```

pub mod core;

pub use crate::core::expression::{
    from_json, lex, parse, to_json, CompiledExpression, Compiler, EvalResult, ExprError, Filter,
    FilterFactory, FilterRegistry, FnKind, Function, Lexer, Parser, Token, Value,
};
pub use crate::core::expression::{new_array, new_object, ArrayRef, NativeFn, ObjectRef};
pub use crate::core::scope::{
    DigestError, GroupListenerFn, ListenerFn, Phase, Scheduler, Scope, TaskId, TickScheduler,
    WatchFn, WatchGroupHandle, WatchHandle,
};
