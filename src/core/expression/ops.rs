//! Operations on values.
//!
//! This module implements the arithmetic, comparison, and logical operators
//! of the expression language. None of them fail: the value domain follows
//! the usual dynamic rules (division by zero is infinity, bad coercions are
//! NaN), and the additive operators substitute `undefined` with `0` so that
//! half-initialized bindings render as numbers instead of poisoning the
//! whole expression.

use super::value::Value;

/// Replace `undefined` with `0` for the additive operators.
fn defined_or_zero(value: Value) -> Value {
    match value {
        Value::Undefined => Value::Number(0.0),
        other => other,
    }
}

/// Apply unary plus.
pub fn pos(value: Value) -> Value {
    Value::Number(defined_or_zero(value).to_number())
}

/// Apply unary minus.
pub fn neg(value: Value) -> Value {
    Value::Number(-defined_or_zero(value).to_number())
}

/// Apply logical negation.
pub fn not(value: Value) -> Value {
    Value::Bool(!value.is_truthy())
}

/// Add two values. Strings concatenate; everything else goes numeric.
pub fn add(lhs: Value, rhs: Value) -> Value {
    let lhs = defined_or_zero(lhs);
    let rhs = defined_or_zero(rhs);
    match (&lhs, &rhs) {
        (Value::Str(a), _) => Value::Str(format!("{}{}", a, rhs.to_display())),
        (_, Value::Str(b)) => Value::Str(format!("{}{}", lhs.to_display(), b)),
        _ => Value::Number(lhs.to_number() + rhs.to_number()),
    }
}

/// Subtract two values.
pub fn sub(lhs: Value, rhs: Value) -> Value {
    Value::Number(defined_or_zero(lhs).to_number() - defined_or_zero(rhs).to_number())
}

/// Multiply two values.
pub fn mul(lhs: Value, rhs: Value) -> Value {
    Value::Number(lhs.to_number() * rhs.to_number())
}

/// Divide two values.
pub fn div(lhs: Value, rhs: Value) -> Value {
    Value::Number(lhs.to_number() / rhs.to_number())
}

/// Remainder of two values.
pub fn rem(lhs: Value, rhs: Value) -> Value {
    Value::Number(lhs.to_number() % rhs.to_number())
}

/// Loose equality (`==`).
pub fn eq(lhs: &Value, rhs: &Value) -> Value {
    Value::Bool(lhs.loose_eq(rhs))
}

/// Loose inequality (`!=`).
pub fn neq(lhs: &Value, rhs: &Value) -> Value {
    Value::Bool(!lhs.loose_eq(rhs))
}

/// Strict equality (`===`).
pub fn strict_eq(lhs: &Value, rhs: &Value) -> Value {
    Value::Bool(lhs.strict_eq(rhs))
}

/// Strict inequality (`!==`).
pub fn strict_neq(lhs: &Value, rhs: &Value) -> Value {
    Value::Bool(!lhs.strict_eq(rhs))
}

/// Ordering used by the relational operators: strings compare
/// lexicographically when both sides are strings, otherwise both sides
/// coerce to numbers and NaN comparisons are false.
fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => lhs.to_number().partial_cmp(&rhs.to_number()),
    }
}

/// Less-than.
pub fn lt(lhs: &Value, rhs: &Value) -> Value {
    Value::Bool(matches!(compare(lhs, rhs), Some(std::cmp::Ordering::Less)))
}

/// Greater-than.
pub fn gt(lhs: &Value, rhs: &Value) -> Value {
    Value::Bool(matches!(
        compare(lhs, rhs),
        Some(std::cmp::Ordering::Greater)
    ))
}

/// Less-than-or-equal.
pub fn le(lhs: &Value, rhs: &Value) -> Value {
    Value::Bool(matches!(
        compare(lhs, rhs),
        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
    ))
}

/// Greater-than-or-equal.
pub fn ge(lhs: &Value, rhs: &Value) -> Value {
    Value::Bool(matches!(
        compare(lhs, rhs),
        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
    ))
}
