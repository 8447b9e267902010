//! Value types for the binding runtime.
//!
//! Expressions are untyped at the source level; at runtime every value is
//! one of the variants below. Arrays and objects are shared mutable
//! references so an evaluator can write through the scope graph, and so
//! strict equality can mean reference identity the way the expression
//! language defines it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::error::EvalResult;

/// Shared mutable object storage (insertion-ordered keys).
pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;

/// Shared mutable array storage.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Allocate a fresh empty object.
pub fn new_object() -> ObjectRef {
    Rc::new(RefCell::new(IndexMap::new()))
}

/// Allocate a fresh empty array.
pub fn new_array() -> ArrayRef {
    Rc::new(RefCell::new(Vec::new()))
}

// ============================================================================
// Functions
// ============================================================================

/// Native function signature: `(this, args) -> value`.
pub type NativeFn = dyn Fn(Value, &[Value]) -> EvalResult<Value>;

/// Identity tag on a function value.
///
/// The tags mark functions the evaluator must refuse to touch: the function
/// constructor and the bound-call primitives. Ordinary functions are `Plain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    Plain,
    Constructor,
    CallPrimitive,
    ApplyPrimitive,
    BindPrimitive,
}

/// A callable value.
pub struct Function {
    /// Optional name for display.
    name: Option<String>,
    /// Identity tag consulted by the sandbox guards.
    kind: FnKind,
    func: Box<NativeFn>,
}

impl Function {
    /// Create an ordinary function.
    pub fn new(func: impl Fn(Value, &[Value]) -> EvalResult<Value> + 'static) -> Self {
        Self {
            name: None,
            kind: FnKind::Plain,
            func: Box::new(func),
        }
    }

    /// Create a named function.
    pub fn named(
        name: impl Into<String>,
        func: impl Fn(Value, &[Value]) -> EvalResult<Value> + 'static,
    ) -> Self {
        Self {
            name: Some(name.into()),
            kind: FnKind::Plain,
            func: Box::new(func),
        }
    }

    /// Create a function with an explicit identity tag.
    pub fn with_kind(
        kind: FnKind,
        func: impl Fn(Value, &[Value]) -> EvalResult<Value> + 'static,
    ) -> Self {
        Self {
            name: None,
            kind,
            func: Box::new(func),
        }
    }

    /// The identity tag.
    pub fn kind(&self) -> FnKind {
        self.kind
    }

    /// The function name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke the function with a receiver and arguments.
    pub fn call(&self, this: Value, args: &[Value]) -> EvalResult<Value> {
        (self.func)(this, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<function {}>", name),
            None => write!(f, "<function>"),
        }
    }
}

// ============================================================================
// The Main Value Enum
// ============================================================================

/// A runtime value in the binding runtime.
#[derive(Clone, Default)]
pub enum Value {
    /// A missing value: unresolved identifiers, absent members.
    #[default]
    Undefined,
    /// The null literal.
    Null,
    /// A boolean: `true`, `false`.
    Bool(bool),
    /// An IEEE double: `120`, `0.5`, `1e3`.
    Number(f64),
    /// A string: `"hello"`.
    Str(String),
    /// A shared array: `[1, "hi", 3]`.
    Array(ArrayRef),
    /// A shared object: `{a: 1, b: "hi"}` (insertion-ordered keys).
    Object(ObjectRef),
    /// A callable value.
    Function(Rc<Function>),
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Build an object value from entries.
    pub fn object(entries: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    /// Build an array value from elements.
    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    /// Build a function value.
    pub fn function(func: Function) -> Self {
        Value::Function(Rc::new(func))
    }

    /// Get the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Whether this value is neither undefined nor null.
    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined | Value::Null)
    }

    /// Whether this value is `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether this is a NaN number.
    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    /// Check if this value is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) | Value::Function(_) => true,
        }
    }

    /// Coerce to a number. Follows the usual dynamic rules: null is 0,
    /// booleans are 0/1, strings parse (empty or blank is 0), everything
    /// else is NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(_) | Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// Coerce to a display string.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => fmt_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(arr) => {
                let items: Vec<String> = arr
                    .borrow()
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_display(),
                    })
                    .collect();
                items.join(",")
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(func) => match func.name() {
                Some(name) => format!("function {}", name),
                None => "function".to_string(),
            },
        }
    }

    /// Try to read this value as a number without coercion.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to read this value as a string without coercion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Try to read this value as a bool without coercion.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to read this value as an object reference.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Try to read this value as an array reference.
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to read this value as a function.
    pub fn as_function(&self) -> Option<&Rc<Function>> {
        match self {
            Value::Function(func) => Some(func),
            _ => None,
        }
    }

    /// Strict equality (`===`): value equality for primitives, reference
    /// identity for arrays, objects, and functions. `NaN` is not equal to
    /// itself.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Loose equality (`==`): null and undefined are equal to each other,
    /// numbers, strings, and booleans compare after numeric coercion, and
    /// containers compare by identity.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Number(_), Value::Number(_))
            | (Value::Str(_), Value::Str(_))
            | (Value::Bool(_), Value::Bool(_)) => self.strict_eq(other),
            (Value::Number(_) | Value::Str(_) | Value::Bool(_), Value::Number(_) | Value::Str(_) | Value::Bool(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Array(_) | Value::Object(_) | Value::Function(_), _)
            | (_, Value::Array(_) | Value::Object(_) | Value::Function(_)) => {
                self.strict_eq(other)
            }
            _ => false,
        }
    }

    /// Deep structural equality, used for by-value watches. Two `NaN`
    /// number slots are considered equal so a stable NaN does not keep a
    /// digest dirty forever.
    pub fn deep_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|w| v.deep_eq(w)).unwrap_or(false))
            }
            _ => self.strict_eq(other),
        }
    }

    /// Deep clone, used to snapshot by-value watch results. Arrays and
    /// objects are copied recursively; functions stay shared.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::Array(arr) => {
                let copied: Vec<Value> = arr.borrow().iter().map(|v| v.deep_clone()).collect();
                Value::array(copied)
            }
            Value::Object(obj) => {
                let copied: IndexMap<String, Value> = obj
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect();
                Value::object(copied)
            }
            other => other.clone(),
        }
    }
}

/// Format a number the way the expression language displays it: integral
/// values drop the fraction, non-finite values spell out.
pub fn fmt_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == n.trunc() && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", fmt_number(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", v)?;
                }
                write!(f, "]")
            }
            Value::Object(obj) => {
                write!(f, "{{")?;
                for (i, (k, v)) in obj.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {:?}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "{:?}", func),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(elements: Vec<Value>) -> Self {
        Value::array(elements)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(entries: IndexMap<String, Value>) -> Self {
        Value::object(entries)
    }
}
